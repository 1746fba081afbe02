//! DWM1001 shell driver.
//!
//! [`Dwm1001`] owns the serial link for its whole lifetime and drives the
//! module's UART shell: it wakes the shell with a bounded handshake, issues
//! configuration and query commands, parses the replies, and can hand the
//! module's unsolicited measurement lines to a caller-supplied sink.
//!
//! # Protocol limitations
//!
//! - The shell has no request ids. A reply is attributed to the last command
//!   purely by arrival order, so a command whose reply is not fully drained
//!   leaves lines that the next parser will see. Parsers check the echo and
//!   prompt where the grammar allows and fail instead of guessing.
//! - A mode change reboots the shell. The driver re-runs the handshake after
//!   every mode switch and drops the cached identity.
//! - While streaming, the module writes measurement lines at its own pace.
//!   Commands sent in that state have their replies interleaved with
//!   measurements; stop streaming before configuring the module.

use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::Level;
use serde::Serialize;

use crate::errors::{DriverError, Result};
use crate::logging::{EventSink, LogSink};
use crate::parse::{
    self, AbsolutePosition, Anchor, DeviceIdentity, DistanceMeasurement, Mode, Point3, FAREWELL,
};
use crate::shell::{pause, CommandChannel, ShellTiming};
use crate::transport::{LineTransport, Port, SerialSettings};

// Shell commands
const CMD_SYSTEM_INFO: &str = "si";
const CMD_GET_POSITION: &str = "apg";
const CMD_SET_POSITION: &str = "aps";
const CMD_LIST_ANCHORS: &str = "la";
const CMD_SET_NETWORK_ID: &str = "nis";
const CMD_GET_MODE: &str = "nmg";
const CMD_TOGGLE_STREAM: &str = "lec";
const CMD_QUIT: &str = "quit";

// ============================================================================
// Data Types
// ============================================================================

/// Lifecycle state of the shell session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Closed,
    Handshaking,
    Connected,
}

/// Outcome of a streaming run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StreamSummary {
    /// Records handed to the sink.
    pub records: usize,
    /// Lines that did not carry a record.
    pub skipped: usize,
    /// The stop flag ended the run (as opposed to the sink).
    pub cancelled: bool,
}

// ============================================================================
// Dwm1001 Driver
// ============================================================================

/// DWM1001 shell driver.
///
/// # Example
/// ```ignore
/// let mut device = Dwm1001::connect_serial("/dev/ttyACM0")?;
/// println!("{:?}", device.identity());
///
/// device.set_position(1.2, 0.0, 2.0)?;
/// for anchor in device.get_anchor_list()? {
///     println!("{} seat {}", anchor.id, anchor.seat);
/// }
/// device.close()?;
/// ```
pub struct Dwm1001 {
    channel: Option<CommandChannel>,
    state: ConnectionState,
    identity: Option<DeviceIdentity>,
    position: Option<AbsolutePosition>,
    sink: Arc<dyn EventSink>,
}

impl Dwm1001 {
    // ------------------------------------------------------------------------
    // Constructors
    // ------------------------------------------------------------------------

    /// Wrap an already-open port. The session starts `Closed`; call
    /// [`Dwm1001::open`] to wake the shell.
    pub fn new(port: Box<dyn Port>, timing: ShellTiming, sink: Arc<dyn EventSink>) -> Self {
        let transport = LineTransport::new(port, timing.read_timeout);
        Self {
            channel: Some(CommandChannel::new(transport, timing, sink.clone())),
            state: ConnectionState::Closed,
            identity: None,
            position: None,
            sink,
        }
    }

    /// Open the serial port at `path` with default timing and logging, and
    /// run the handshake.
    pub fn connect_serial(path: &str) -> Result<Self> {
        Self::connect_serial_with(
            &SerialSettings::new(path),
            ShellTiming::default(),
            Arc::new(LogSink),
        )
    }

    pub fn connect_serial_with(
        settings: &SerialSettings,
        timing: ShellTiming,
        sink: Arc<dyn EventSink>,
    ) -> Result<Self> {
        let port = settings.open()?;
        sink.record(
            Level::Info,
            "serial port opened",
            &[("path", &settings.path), ("baud", &settings.baud_rate)],
        );
        pause(timing.open_settle);
        let mut device = Self::new(port, timing, sink);
        device.open()?;
        Ok(device)
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    /// Wake the shell and refresh the cached identity.
    ///
    /// Each attempt sends a carriage return, waits the wake delay, sends a
    /// second one and looks for the prompt. After `max_retries` failed
    /// attempts the session is left `Closed` and [`DriverError::Connection`]
    /// carries the last raw response.
    pub fn open(&mut self) -> Result<()> {
        self.state = ConnectionState::Handshaking;
        match self.handshake() {
            Ok(()) => {
                self.state = ConnectionState::Connected;
                self.sink.record(Level::Info, "connected to DWM1001", &[]);
                self.refresh_identity().map(|_| ())
            }
            Err(e) => {
                self.state = ConnectionState::Closed;
                Err(e)
            }
        }
    }

    fn handshake(&mut self) -> Result<()> {
        let sink = self.sink.clone();
        let channel = self
            .channel
            .as_mut()
            .ok_or_else(|| DriverError::NotConnected("transport released".into()))?;
        let timing = channel.timing().clone();

        let mut last_response = Vec::new();
        for attempt in 1..=timing.max_retries {
            channel.send_command("")?;
            pause(timing.wake_delay);
            channel.send_command("")?;
            let response = channel.read_response(timing.handshake_timeout)?;
            if parse::has_prompt(&response) {
                return Ok(());
            }
            let rendered = format!("{response:?}");
            sink.record(
                Level::Warn,
                "handshake attempt failed, retrying",
                &[("attempt", &attempt), ("response", &rendered)],
            );
            last_response = response;
        }

        let raw = last_response.join("\n");
        sink.record(
            Level::Error,
            "connection to DWM1001 failed",
            &[("attempts", &timing.max_retries)],
        );
        Err(DriverError::Connection {
            attempts: timing.max_retries,
            raw,
        })
    }

    /// Leave the shell with `quit` and release the port.
    ///
    /// A missing `bye!` is logged as a warning only. The port is released in
    /// every case; a write failure during `quit` is returned afterwards.
    pub fn close(&mut self) -> Result<()> {
        let was_connected = self.state == ConnectionState::Connected;
        let channel = self.channel.take();
        self.state = ConnectionState::Closed;
        self.identity = None;

        let Some(mut channel) = channel else {
            return Ok(());
        };
        if !was_connected {
            return Ok(());
        }

        let response = channel.check_output(CMD_QUIT)?;
        if response.iter().any(|l| l.contains(FAREWELL)) {
            self.sink.record(Level::Info, "disconnected from DWM1001", &[]);
        } else {
            let rendered = format!("{response:?}");
            self.sink.record(
                Level::Warn,
                "no farewell from DWM1001 after quit",
                &[("response", &rendered)],
            );
        }
        Ok(())
    }

    /// Send a mode command and reconnect once the shell has restarted.
    fn switch_mode(&mut self, command: &str) -> Result<()> {
        let channel = self.channel()?;
        channel.send_command(command)?;
        channel.flush()?;
        let settle = channel.timing().mode_switch_settle;

        self.identity = None;
        self.position = None;
        self.sink.record(
            Level::Info,
            "mode changed, reconnecting",
            &[("command", &command)],
        );
        pause(settle);
        self.open()
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// Identity read at the last refresh. `None` after a mode or network id
    /// change until [`Dwm1001::refresh_identity`] runs again.
    pub fn identity(&self) -> Option<&DeviceIdentity> {
        self.identity.as_ref()
    }

    /// Position read at the last identity refresh or `get_position`.
    pub fn cached_position(&self) -> Option<AbsolutePosition> {
        self.position
    }

    /// Current per-line read timeout for command replies.
    pub fn timeout(&self) -> Option<Duration> {
        self.channel.as_ref().map(|c| c.transport().timeout())
    }

    pub fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.channel()?.transport_mut().set_timeout(timeout);
        Ok(())
    }

    fn channel(&mut self) -> Result<&mut CommandChannel> {
        if self.state != ConnectionState::Connected {
            return Err(DriverError::NotConnected(format!("session is {:?}", self.state)));
        }
        self.channel
            .as_mut()
            .ok_or_else(|| DriverError::NotConnected("transport released".into()))
    }

    // ------------------------------------------------------------------------
    // Device Commands
    // ------------------------------------------------------------------------

    /// Send a raw command and return its reply lines.
    pub fn check_output(&mut self, command: &str) -> Result<Vec<String>> {
        self.channel()?.check_output(command)
    }

    /// Drain and discard pending input.
    pub fn flush(&mut self) -> Result<()> {
        self.channel()?.flush().map(|_| ())
    }

    /// Raw `si` reply, for diagnostics.
    pub fn get_system_info(&mut self) -> Result<Vec<String>> {
        self.check_output(CMD_SYSTEM_INFO)
    }

    /// Re-read mode, PAN id and address (`si`), and the configured position.
    ///
    /// A position reply that does not parse is logged and leaves the cached
    /// position empty; the identity itself must parse.
    pub fn refresh_identity(&mut self) -> Result<&DeviceIdentity> {
        let response = self.get_system_info()?;
        let identity = parse::parse_system_info(&response)?;
        self.sink.record(
            Level::Debug,
            "device identity",
            &[
                ("mode", &identity.mode),
                ("network_id", &identity.network_id),
                ("address", &identity.address),
            ],
        );

        match self.get_position() {
            Ok(_) => {}
            Err(DriverError::Parse(e)) => {
                self.position = None;
                self.sink.record(
                    Level::Warn,
                    "position unreadable during refresh",
                    &[("error", &e)],
                );
            }
            Err(e) => return Err(e),
        }

        Ok(&*self.identity.insert(identity))
    }

    /// Current mode as reported by `nmg`.
    pub fn get_mode(&mut self) -> Result<Mode> {
        let response = self.check_output(CMD_GET_MODE)?;
        Ok(parse::parse_mode(&response)?)
    }

    /// Switch the module's operating mode. The shell restarts, so this blocks
    /// for the mode-switch settle delay and a fresh handshake.
    pub fn set_mode(&mut self, mode: Mode) -> Result<()> {
        let command = mode
            .command()
            .ok_or_else(|| DriverError::InvalidInput(format!("cannot switch to mode {mode}")))?;
        self.switch_mode(command)
    }

    /// Set the PAN id, given as hex (`0x1234` or `1234`). The cached identity
    /// is dropped; call [`Dwm1001::refresh_identity`] to read it back.
    pub fn set_network_id(&mut self, network_id: &str) -> Result<()> {
        let digits = network_id
            .strip_prefix("0x")
            .or_else(|| network_id.strip_prefix("0X"))
            .unwrap_or(network_id);
        let value = u16::from_str_radix(digits, 16).map_err(|_| {
            DriverError::InvalidInput(format!(
                "network id {network_id:?} is not a 16-bit hex value"
            ))
        })?;
        self.check_output(&format!("{CMD_SET_NETWORK_ID} 0x{value:04X}"))?;
        self.identity = None;
        Ok(())
    }

    /// Set the configured position, given in metres. Values are truncated to
    /// whole millimetres; the millimetre value sent is returned.
    pub fn set_position(&mut self, x: f64, y: f64, z: f64) -> Result<AbsolutePosition> {
        let mm = AbsolutePosition::from_metres(x, y, z).ok_or_else(|| {
            DriverError::InvalidInput(format!(
                "position ({x}, {y}, {z}) is not finite or does not fit in millimetres"
            ))
        })?;
        self.check_output(&format!("{CMD_SET_POSITION} {} {} {}", mm.x, mm.y, mm.z))?;
        self.position = None;
        Ok(mm)
    }

    /// Configured position in millimetres (`apg`).
    pub fn get_position(&mut self) -> Result<AbsolutePosition> {
        let response = self.check_output(CMD_GET_POSITION)?;
        let position = parse::parse_position(&response)?;
        self.position = Some(position);
        Ok(position)
    }

    /// Anchors known to the module, in seat order.
    ///
    /// Pending input is flushed first so that a stale reply cannot be taken
    /// for the `la` listing.
    pub fn get_anchor_list(&mut self) -> Result<Vec<Anchor>> {
        let channel = self.channel()?;
        channel.flush()?;
        let response = channel.check_output(CMD_LIST_ANCHORS)?;
        match parse::parse_anchor_list(&response) {
            Ok(anchors) => Ok(anchors),
            Err(e) => {
                self.sink.record(
                    Level::Warn,
                    "unable to read the anchor list",
                    &[("error", &e)],
                );
                Err(e.into())
            }
        }
    }

    /// Whether the module is pushing measurement lines on its own.
    ///
    /// Flushes pending input, then waits up to the listen probe window for
    /// one unsolicited line.
    pub fn is_listen_mode(&mut self) -> Result<bool> {
        let channel = self.channel()?;
        channel.flush()?;
        let probe = channel.timing().listen_probe;
        let line = channel.transport_mut().poll_line(probe)?;
        Ok(line.is_some())
    }

    /// Turn measurement streaming on or off, toggling with `lec` only when the
    /// current state differs.
    pub fn set_listen_mode(&mut self, enabled: bool) -> Result<()> {
        if self.is_listen_mode()? == enabled {
            return Ok(());
        }
        let channel = self.channel()?;
        channel.send_command(CMD_TOGGLE_STREAM)?;
        channel.flush()?;
        self.sink
            .record(Level::Info, "listen mode toggled", &[("enabled", &enabled)]);
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Streaming
    // ------------------------------------------------------------------------

    /// Hand every streamed `POS` triple to `sink` until `stop` is set, the
    /// sink breaks, or the transport fails.
    ///
    /// Lines without a `POS` segment are skipped. No command may be issued
    /// while this runs; `&mut self` guarantees it.
    pub fn stream_positions<F>(&mut self, stop: &AtomicBool, sink: F) -> Result<StreamSummary>
    where
        F: FnMut(Point3) -> ControlFlow<()>,
    {
        self.stream_positions_with(|| stop.load(Ordering::SeqCst), sink)
    }

    /// Like [`Dwm1001::stream_positions`], with cancellation decided by
    /// `cancelled`. It is asked once per poll, including polls that time out
    /// with no line, so a silent module can still be interrupted.
    pub fn stream_positions_with<C, F>(
        &mut self,
        cancelled: C,
        mut sink: F,
    ) -> Result<StreamSummary>
    where
        C: FnMut() -> bool,
        F: FnMut(Point3) -> ControlFlow<()>,
    {
        self.stream_lines(cancelled, |line| {
            parse::parse_stream_position(line).map(&mut sink)
        })
    }

    /// Like [`Dwm1001::stream_positions`], but hands full `DIST` records.
    /// Malformed `DIST` lines are logged and skipped.
    pub fn stream_measurements<F>(&mut self, stop: &AtomicBool, sink: F) -> Result<StreamSummary>
    where
        F: FnMut(DistanceMeasurement) -> ControlFlow<()>,
    {
        self.stream_measurements_with(|| stop.load(Ordering::SeqCst), sink)
    }

    /// [`Dwm1001::stream_measurements`] with a per-poll cancellation check.
    pub fn stream_measurements_with<C, F>(
        &mut self,
        cancelled: C,
        mut sink: F,
    ) -> Result<StreamSummary>
    where
        C: FnMut() -> bool,
        F: FnMut(DistanceMeasurement) -> ControlFlow<()>,
    {
        let events = self.sink.clone();
        self.stream_lines(cancelled, |line| {
            if !line.starts_with("DIST") {
                return None;
            }
            match parse::parse_distance_record(line) {
                Ok(record) => Some(sink(record)),
                Err(e) => {
                    events.record(Level::Debug, "skipping malformed record", &[("error", &e)]);
                    None
                }
            }
        })
    }

    fn stream_lines<C, F>(&mut self, mut cancelled: C, mut on_line: F) -> Result<StreamSummary>
    where
        C: FnMut() -> bool,
        F: FnMut(&str) -> Option<ControlFlow<()>>,
    {
        let channel = self.channel()?;
        let poll = channel.timing().stream_poll;
        let transport = channel.transport_mut();
        let mut summary = StreamSummary::default();

        loop {
            if cancelled() {
                summary.cancelled = true;
                break;
            }
            let Some(line) = transport.poll_line(poll)? else {
                continue;
            };
            match on_line(&line) {
                Some(ControlFlow::Continue(())) => summary.records += 1,
                Some(ControlFlow::Break(())) => {
                    summary.records += 1;
                    break;
                }
                None => summary.skipped += 1,
            }
        }

        self.sink.record(
            Level::Info,
            "streaming stopped",
            &[
                ("records", &summary.records),
                ("skipped", &summary.skipped),
                ("cancelled", &summary.cancelled),
            ],
        );
        Ok(summary)
    }
}

impl Drop for Dwm1001 {
    fn drop(&mut self) {
        if self.is_connected() {
            let _ = self.close();
        }
    }
}

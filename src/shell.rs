//! Command channel for the DWM1001 UART shell.
//!
//! The shell drops characters when a whole command arrives at once, so every
//! command is typed one character at a time with a fixed delay, followed by a
//! carriage return. Responses carry no request id: a response belongs to a
//! command only because it arrives after it, and the caller must drain one
//! response before sending the next command.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::Level;

use crate::errors::Result;
use crate::logging::EventSink;
use crate::transport::LineTransport;

/// Delay between characters of a typed command.
const CHAR_DELAY: Duration = Duration::from_millis(10);

/// Delay after the terminating carriage return.
const COMMAND_SETTLE: Duration = Duration::from_millis(50);

/// Time the shell needs to execute a command before its reply is read.
const RESPONSE_WAIT: Duration = Duration::from_secs(1);

/// Per-line read timeout when collecting a reply.
const READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Upper bound on collecting one reply, however chatty the module is.
const RESPONSE_LIMIT: Duration = Duration::from_secs(3);

/// Gap between the two carriage returns that wake the shell.
const WAKE_DELAY: Duration = Duration::from_millis(200);

/// Per-line read timeout while waiting for the prompt during the handshake.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(1);

/// Settle time after opening the serial port, before the first handshake.
const OPEN_SETTLE: Duration = Duration::from_secs(2);

/// The module reboots its shell after a mode change.
const MODE_SWITCH_SETTLE: Duration = Duration::from_secs(5);

const MAX_RETRIES: u32 = 3;

/// How long a streaming read blocks before re-checking the stop flag.
const STREAM_POLL: Duration = Duration::from_millis(500);

/// Window in which an unsolicited line must arrive for the module to count as
/// streaming. Stationary tags report every few seconds, hence the long window.
const LISTEN_PROBE: Duration = Duration::from_secs(11);

/// Delays and timeouts of the shell protocol.
///
/// Defaults are tuned for a real module. [`ShellTiming::immediate`] removes
/// every delay for simulated devices.
#[derive(Debug, Clone)]
pub struct ShellTiming {
    pub char_delay: Duration,
    pub command_settle: Duration,
    pub response_wait: Duration,
    pub read_timeout: Duration,
    pub response_limit: Duration,
    pub wake_delay: Duration,
    pub handshake_timeout: Duration,
    pub open_settle: Duration,
    pub mode_switch_settle: Duration,
    pub max_retries: u32,
    pub stream_poll: Duration,
    pub listen_probe: Duration,
}

impl Default for ShellTiming {
    fn default() -> Self {
        Self {
            char_delay: CHAR_DELAY,
            command_settle: COMMAND_SETTLE,
            response_wait: RESPONSE_WAIT,
            read_timeout: READ_TIMEOUT,
            response_limit: RESPONSE_LIMIT,
            wake_delay: WAKE_DELAY,
            handshake_timeout: HANDSHAKE_TIMEOUT,
            open_settle: OPEN_SETTLE,
            mode_switch_settle: MODE_SWITCH_SETTLE,
            max_retries: MAX_RETRIES,
            stream_poll: STREAM_POLL,
            listen_probe: LISTEN_PROBE,
        }
    }
}

impl ShellTiming {
    /// No delays and zero timeouts; reads return as soon as the port is empty.
    /// The response limit is kept as a cap.
    pub fn immediate() -> Self {
        Self {
            char_delay: Duration::ZERO,
            command_settle: Duration::ZERO,
            response_wait: Duration::ZERO,
            read_timeout: Duration::ZERO,
            response_limit: RESPONSE_LIMIT,
            wake_delay: Duration::ZERO,
            handshake_timeout: Duration::ZERO,
            open_settle: Duration::ZERO,
            mode_switch_settle: Duration::ZERO,
            max_retries: MAX_RETRIES,
            stream_poll: Duration::ZERO,
            listen_probe: Duration::ZERO,
        }
    }
}

pub(crate) fn pause(delay: Duration) {
    if !delay.is_zero() {
        thread::sleep(delay);
    }
}

/// Typed writes and line-collecting reads over one [`LineTransport`].
pub struct CommandChannel {
    transport: LineTransport,
    timing: ShellTiming,
    sink: Arc<dyn EventSink>,
}

impl CommandChannel {
    pub fn new(transport: LineTransport, timing: ShellTiming, sink: Arc<dyn EventSink>) -> Self {
        Self {
            transport,
            timing,
            sink,
        }
    }

    pub fn timing(&self) -> &ShellTiming {
        &self.timing
    }

    pub fn transport(&self) -> &LineTransport {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut LineTransport {
        &mut self.transport
    }

    /// Type `text` one character at a time, then a carriage return.
    pub fn send_command(&mut self, text: &str) -> Result<()> {
        for byte in text.bytes() {
            self.transport.write(&[byte])?;
            pause(self.timing.char_delay);
        }
        self.transport.write(b"\r")?;
        pause(self.timing.command_settle);
        self.sink
            .record(Level::Debug, "written on serial", &[("command", &text)]);
        Ok(())
    }

    /// Collect every line that arrives within `timeout` of the previous one,
    /// for at most `response_limit` in total, dropping empty lines. The prompt
    /// line is kept for the parsers.
    pub fn read_response(&mut self, timeout: Duration) -> Result<Vec<String>> {
        let limit = self.timing.response_limit;
        let lines: Vec<String> = self
            .transport
            .read_all_buffered(timeout, limit)?
            .into_iter()
            .filter(|line| !line.is_empty())
            .collect();
        let rendered = format!("{lines:?}");
        self.sink
            .record(Level::Debug, "read from serial", &[("lines", &rendered)]);
        Ok(lines)
    }

    /// Send `text`, give the shell time to execute it, and return its reply.
    pub fn check_output(&mut self, text: &str) -> Result<Vec<String>> {
        self.send_command(text)?;
        pause(self.timing.response_wait);
        let timeout = self.transport.timeout();
        self.read_response(timeout)
    }

    /// Discard whatever is waiting on the link. Uses the same per-line
    /// timeout as [`Self::check_output`].
    pub fn flush(&mut self) -> Result<Vec<String>> {
        let timeout = self.transport.timeout();
        self.read_response(timeout)
    }
}

//! In-memory stand-in for a DWM1001 running the UART shell.
//!
//! [`SimulatedDevice`] implements [`Port`] and answers the shell commands the
//! driver uses with replies in the module's own text format. Clones share
//! state, so a test can hand one clone to the driver and inspect the other.
//!
//! ```
//! use dwm1001::{Dwm1001, LogSink, ShellTiming, SimulatedDevice};
//! use std::sync::Arc;
//!
//! let sim = SimulatedDevice::new();
//! let mut device = Dwm1001::new(Box::new(sim.clone()), ShellTiming::immediate(), Arc::new(LogSink));
//! device.open().unwrap();
//! device.set_position(1.0, 2.0, 0.5).unwrap();
//! assert_eq!(sim.commands().last().map(String::as_str), Some("aps 1000 2000 500"));
//! ```

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use crate::parse::{AbsolutePosition, Mode, Point3};
use crate::transport::Port;

#[derive(Debug, Clone)]
struct SimAnchor {
    id: String,
    position: Point3,
    seen: u32,
}

#[derive(Debug)]
struct SimState {
    mode: Mode,
    network_id: u16,
    address: String,
    position: AbsolutePosition,
    anchors: Vec<SimAnchor>,
    shell_active: bool,
    ignored_wakes: usize,
    farewell: bool,
    streaming: bool,
    stream: VecDeque<String>,
    stream_gap: bool,
    unplugged: bool,
    read_timeout: Duration,
    uptime_ms: u64,
    input: Vec<u8>,
    output: VecDeque<u8>,
    commands: Vec<String>,
    write_calls: Vec<Vec<u8>>,
}

impl SimState {
    fn stamp(&mut self) -> String {
        self.uptime_ms += 10;
        format!(
            "[{:06}.{:03} INF]",
            self.uptime_ms / 1000,
            self.uptime_ms % 1000
        )
    }

    fn emit(&mut self, text: &str) {
        self.output.extend(text.as_bytes());
    }

    fn emit_line(&mut self, line: &str) {
        self.emit(line);
        self.emit("\r\n");
    }

    fn prompt(&mut self) {
        self.emit("dwm> ");
    }

    fn execute(&mut self, command: String) {
        self.commands.push(command.clone());

        if !self.shell_active {
            // Only a bare carriage return gets the module's attention; the
            // first one after a reset switches the UART into shell mode.
            if command.is_empty() {
                if self.ignored_wakes > 0 {
                    self.ignored_wakes -= 1;
                } else {
                    self.shell_active = true;
                }
            }
            return;
        }

        if command.is_empty() {
            self.emit("\r\n");
            self.prompt();
            return;
        }

        self.emit_line(&command);
        let mut words = command.split_whitespace();
        let verb = words.next().unwrap_or_default();
        let args: Vec<&str> = words.collect();
        match verb {
            "si" => self.system_info(),
            "apg" => {
                let p = self.position;
                self.emit_line(&format!("x:{} y:{} z:{} qf:100", p.x, p.y, p.z));
            }
            "aps" => self.set_position(&args),
            "la" => self.list_anchors(),
            "nis" => match args.first().and_then(|a| parse_hex16(a)) {
                Some(id) => self.network_id = id,
                None => self.emit_line("error: invalid panid"),
            },
            "nmg" => {
                let line = format!("mode: {} (act,twr,np,nole)", self.mode.device_token());
                self.emit_line(&line);
            }
            "nmt" | "nma" | "nmi" | "nmp" => {
                self.mode = match verb {
                    "nmt" => Mode::Tag,
                    "nma" => Mode::Anchor,
                    "nmi" => Mode::AnchorInitiator,
                    _ => Mode::TagListener,
                };
                // The shell restarts; no prompt until woken again.
                self.shell_active = false;
                self.streaming = false;
                return;
            }
            "lec" => {
                self.streaming = !self.streaming;
                if self.streaming {
                    return;
                }
            }
            "quit" => {
                if self.farewell {
                    self.emit_line("bye!");
                }
                self.shell_active = false;
                self.streaming = false;
                return;
            }
            _ => self.emit_line("error: unknown command"),
        }
        self.prompt();
    }

    fn system_info(&mut self) {
        let lines = [
            "sys: fw2 fw_ver=x01030001 cfg_ver=x00010700".to_string(),
            format!("uwb0: panid=x{:04X} addr=x{}", self.network_id, self.address),
            format!("mode: {} (act,twr,np,nole)", self.mode.device_token()),
            "uwbmac: connected prov".to_string(),
            "enc: off".to_string(),
        ];
        for line in lines {
            let stamp = self.stamp();
            self.emit_line(&format!("{stamp} {line}"));
        }
    }

    fn set_position(&mut self, args: &[&str]) {
        let parsed: Vec<i32> = args.iter().filter_map(|a| a.parse().ok()).collect();
        if args.len() != 3 || parsed.len() != 3 {
            self.emit_line("error: usage aps <x> <y> <z>");
            return;
        }
        self.position = AbsolutePosition::new(parsed[0], parsed[1], parsed[2]);
    }

    fn list_anchors(&mut self) {
        let stamp = self.stamp();
        let header = format!("{stamp} AN: cnt={} seq=x03", self.anchors.len());
        self.emit_line(&header);
        for (seat, anchor) in self.anchors.clone().iter().enumerate() {
            let stamp = self.stamp();
            let p = anchor.position;
            self.emit_line(&format!(
                "{stamp}    {seat}) id={:0>16} seat={seat} seens={} map=0000 pos={:.2}:{:.2}:{:.2}",
                anchor.id, anchor.seen, p.x, p.y, p.z
            ));
        }
        let stamp = self.stamp();
        self.emit_line(&stamp);
    }
}

fn parse_hex16(text: &str) -> Option<u16> {
    let digits = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
        .unwrap_or(text);
    u16::from_str_radix(digits, 16).ok()
}

/// A scripted DWM1001 shell. See the module docs.
#[derive(Debug, Clone)]
pub struct SimulatedDevice {
    state: Arc<Mutex<SimState>>,
}

impl Default for SimulatedDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedDevice {
    /// A tag on PAN `0x1234` with its shell not yet woken.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState {
                mode: Mode::Tag,
                network_id: 0x1234,
                address: "DECA3C2A9A4B8E45".to_string(),
                position: AbsolutePosition::default(),
                anchors: Vec::new(),
                shell_active: false,
                ignored_wakes: 0,
                farewell: true,
                streaming: false,
                stream: VecDeque::new(),
                stream_gap: false,
                unplugged: false,
                read_timeout: Duration::ZERO,
                uptime_ms: 12_000,
                input: Vec::new(),
                output: VecDeque::new(),
                commands: Vec::new(),
                write_calls: Vec::new(),
            })),
        }
    }

    /// A device whose shell is already active, as after a handshake.
    pub fn awake() -> Self {
        let sim = Self::new();
        sim.lock().shell_active = true;
        sim
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Ignore the first `count` wake-up carriage returns.
    pub fn ignore_wakes(self, count: usize) -> Self {
        self.lock().ignored_wakes = count;
        self
    }

    /// Answer `quit` without the `bye!` line.
    pub fn without_farewell(self) -> Self {
        self.lock().farewell = false;
        self
    }

    pub fn with_mode(self, mode: Mode) -> Self {
        self.lock().mode = mode;
        self
    }

    pub fn with_anchor(self, id: &str, position: Point3, seen: u32) -> Self {
        self.lock().anchors.push(SimAnchor {
            id: id.to_string(),
            position,
            seen,
        });
        self
    }

    /// Queue a line the module pushes while streaming (`lec` active).
    ///
    /// Queued lines are delivered one at a time with a quiet read in between,
    /// as from a module reporting at its update rate.
    pub fn push_stream_line(&self, line: &str) {
        self.lock().stream.push_back(format!("{line}\r\n"));
    }

    /// Put the module in streaming mode as if `lec` had been sent earlier.
    pub fn start_streaming(&self) {
        self.lock().streaming = true;
    }

    /// Make every further read and write fail as if the cable was pulled.
    pub fn unplug(&self) {
        self.lock().unplugged = true;
    }

    pub fn mode(&self) -> Mode {
        self.lock().mode
    }

    pub fn network_id(&self) -> u16 {
        self.lock().network_id
    }

    pub fn position(&self) -> AbsolutePosition {
        self.lock().position
    }

    pub fn is_streaming(&self) -> bool {
        self.lock().streaming
    }

    pub fn is_shell_active(&self) -> bool {
        self.lock().shell_active
    }

    /// Every command received, in order, without the carriage return.
    pub fn commands(&self) -> Vec<String> {
        self.lock().commands.clone()
    }

    /// Read timeout most recently applied through [`Port::set_timeout`].
    pub fn last_read_timeout(&self) -> Duration {
        self.lock().read_timeout
    }

    /// The byte slices of every individual write call.
    pub fn write_calls(&self) -> Vec<Vec<u8>> {
        self.lock().write_calls.clone()
    }
}

fn unplugged() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "device unplugged")
}

impl Read for SimulatedDevice {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.lock();
        if state.unplugged {
            return Err(unplugged());
        }
        if state.output.is_empty() && state.streaming {
            if state.stream_gap {
                state.stream_gap = false;
            } else if let Some(line) = state.stream.pop_front() {
                state.output.extend(line.as_bytes());
                state.stream_gap = true;
            }
        }
        if state.output.is_empty() {
            // Block like a real port so idle readers do not spin.
            let wait = state.read_timeout;
            drop(state);
            if !wait.is_zero() {
                thread::sleep(wait);
            }
            return Err(io::Error::new(io::ErrorKind::TimedOut, "no data"));
        }
        let n = buf.len().min(state.output.len());
        for (slot, byte) in buf.iter_mut().zip(state.output.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for SimulatedDevice {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.lock();
        if state.unplugged {
            return Err(unplugged());
        }
        state.write_calls.push(buf.to_vec());
        for &byte in buf {
            if byte == b'\r' {
                let line = std::mem::take(&mut state.input);
                let command = String::from_utf8_lossy(&line).trim().to_string();
                state.execute(command);
            } else {
                state.input.push(byte);
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Port for SimulatedDevice {
    fn set_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        self.lock().read_timeout = timeout;
        Ok(())
    }
}

//! Line-oriented access to the serial link.
//!
//! The DWM1001 shell speaks ASCII lines terminated by `\r\n`, except for the
//! prompt `dwm> `, which is printed without a terminator. [`LineTransport`]
//! therefore returns whatever arrived before a timeout as a final partial line
//! when framing command responses, and keeps it buffered when streaming.

use std::io::{self, Read, Write};
use std::time::{Duration, Instant};

use log::debug;
use serialport::{DataBits, FlowControl, Parity, StopBits};

use crate::errors::Result;

/// Default serial baud rate of the DWM1001 UART shell.
pub const BAUD_RATE: u32 = 115200;

/// Read timeout the port is opened with.
const OPEN_TIMEOUT: Duration = Duration::from_millis(500);

const READ_CHUNK: usize = 256;

// ============================================================================
// Port Abstraction
// ============================================================================

/// A duplex byte stream with an adjustable read timeout.
///
/// Reads that see no data before the timeout must fail with
/// [`io::ErrorKind::TimedOut`] (or `WouldBlock`), matching `serialport`.
pub trait Port: Read + Write + Send {
    fn set_timeout(&mut self, timeout: Duration) -> io::Result<()>;
}

impl Port for Box<dyn serialport::SerialPort> {
    fn set_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        serialport::SerialPort::set_timeout(self.as_mut(), timeout).map_err(io::Error::from)
    }
}

/// Serial link parameters. Defaults match the DWM1001 shell: 115200 8N1 with
/// XON/XOFF flow control.
#[derive(Debug, Clone)]
pub struct SerialSettings {
    pub path: String,
    pub baud_rate: u32,
    pub flow_control: FlowControl,
}

impl SerialSettings {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            baud_rate: BAUD_RATE,
            flow_control: FlowControl::Software,
        }
    }

    /// Open the port. On Unix `serialport` takes an exclusive lock on the TTY,
    /// so a second driver instance cannot share the link.
    pub fn open(&self) -> Result<Box<dyn Port>> {
        let port = serialport::new(self.path.as_str(), self.baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(self.flow_control)
            .timeout(OPEN_TIMEOUT)
            .open()?;
        debug!(
            "serial port opened: path={}, baud={}, flow={:?}",
            self.path, self.baud_rate, self.flow_control
        );
        Ok(Box::new(port))
    }
}

// ============================================================================
// Line Transport
// ============================================================================

enum Fill {
    Line(String),
    TimedOut,
}

/// Buffers raw bytes from a [`Port`] and hands them out as lines.
///
/// Lines are decoded lossily and stripped of trailing whitespace (`\r`, the
/// space after the prompt). No other interpretation happens here.
pub struct LineTransport {
    port: Box<dyn Port>,
    pending: Vec<u8>,
    timeout: Duration,
    port_timeout: Option<Duration>,
}

impl LineTransport {
    pub fn new(port: Box<dyn Port>, timeout: Duration) -> Self {
        Self {
            port,
            pending: Vec::new(),
            timeout,
            port_timeout: None,
        }
    }

    /// Per-line gap used when collecting command replies.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    pub fn write(&mut self, bytes: &[u8]) -> Result<()> {
        self.port.write_all(bytes)?;
        self.port.flush()?;
        Ok(())
    }

    /// Read one line, waiting at most `timeout`.
    ///
    /// Bytes that arrived without a terminator are returned as a partial line
    /// once the timeout elapses. `None` means nothing arrived at all.
    pub fn read_line(&mut self, timeout: Duration) -> Result<Option<String>> {
        match self.fill(timeout)? {
            Fill::Line(line) => Ok(Some(line)),
            Fill::TimedOut if self.pending.is_empty() => Ok(None),
            Fill::TimedOut => {
                let partial = std::mem::take(&mut self.pending);
                Ok(Some(decode(&partial)))
            }
        }
    }

    /// Read one complete line, waiting at most `timeout`. A partial line stays
    /// buffered for the next call.
    pub fn poll_line(&mut self, timeout: Duration) -> Result<Option<String>> {
        match self.fill(timeout)? {
            Fill::Line(line) => Ok(Some(line)),
            Fill::TimedOut => Ok(None),
        }
    }

    /// Read lines until the link stays quiet for `gap`, or until `limit` has
    /// passed since the call started. A module that keeps talking (streaming
    /// with `lec`) is cut off at `limit`; the rest stays on the link.
    ///
    /// The effective limit is never shorter than `gap`.
    pub fn read_all_buffered(&mut self, gap: Duration, limit: Duration) -> Result<Vec<String>> {
        let deadline = Instant::now() + limit.max(gap);
        let mut lines = Vec::new();
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.read_line(gap.min(remaining))? {
                Some(line) => lines.push(line),
                None => break,
            }
            if Instant::now() >= deadline {
                debug!("read limit reached after {} line(s)", lines.len());
                break;
            }
        }
        Ok(lines)
    }

    fn fill(&mut self, timeout: Duration) -> Result<Fill> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(line) = self.take_line() {
                return Ok(Fill::Line(line));
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if !self.read_chunk(remaining)? {
                return Ok(Fill::TimedOut);
            }
        }
    }

    fn take_line(&mut self) -> Option<String> {
        let end = self.pending.iter().position(|&b| b == b'\n')?;
        let raw: Vec<u8> = self.pending.drain(..=end).collect();
        Some(decode(&raw))
    }

    /// One read from the port. Returns `false` when the read timed out.
    fn read_chunk(&mut self, timeout: Duration) -> Result<bool> {
        if self.port_timeout != Some(timeout) {
            self.port.set_timeout(timeout)?;
            self.port_timeout = Some(timeout);
        }
        let mut buf = [0u8; READ_CHUNK];
        loop {
            match self.port.read(&mut buf) {
                Ok(0) => return Ok(false),
                Ok(n) => {
                    self.pending.extend_from_slice(&buf[..n]);
                    return Ok(true);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == io::ErrorKind::TimedOut => return Ok(false),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(false),
                Err(e) => return Err(e.into()),
            }
        }
    }
}

fn decode(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw).trim_end().to_string()
}

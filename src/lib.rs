//! DWM1001 UWB module driver over the UART shell, with optional Python bindings.
//!
//! The DWM1001 exposes a line-oriented text shell on its USB serial port. This
//! crate wakes that shell, issues configuration and query commands (mode,
//! network id, position, anchor list), parses the replies into typed values,
//! and turns the module's unsolicited measurement stream into records.
//!
//! # Layers
//!
//! 1. [`LineTransport`] frames bytes from a [`Port`] into lines.
//! 2. [`CommandChannel`] types commands character by character and collects
//!    replies, with delays from [`ShellTiming`].
//! 3. [`parse`] holds one pure parser per reply grammar.
//! 4. [`Dwm1001`] ties them into a session with a handshake, retries, cached
//!    identity and streaming.
//!
//! [`SimulatedDevice`] answers the same commands in memory, so everything above
//! the serial port can run without hardware.
//!
//! # Logging
//!
//! Driver events go through an [`EventSink`]. [`LogSink`] forwards them to the
//! `log` facade under the `dwm1001` target; [`init_rust_logging`] installs
//! `env_logger` honouring `DWM_LOG` or `RUST_LOG`.

mod dwm1001;
mod errors;
mod logging;
pub mod parse;
mod shell;
mod sim;
mod transport;

#[cfg(feature = "python")]
mod python;

pub use dwm1001::{ConnectionState, Dwm1001, StreamSummary};
pub use errors::*;
pub use logging::{init_rust_logging, Event, EventSink, LogSink, MemorySink};
pub use parse::{
    AbsolutePosition, Anchor, AnchorDistance, DeviceIdentity, DistanceMeasurement, Mode, Point3,
};
pub use shell::{CommandChannel, ShellTiming};
pub use sim::SimulatedDevice;
pub use transport::{LineTransport, Port, SerialSettings, BAUD_RATE};

#[cfg(feature = "python")]
pub use logging::{init_python_logging, set_python_log_level, set_python_log_level_str};

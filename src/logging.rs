use std::fmt::{self, Write as _};
use std::sync::{Mutex, Once};

use env_logger::Env;
use log::{Level, LevelFilter};

static RUST_LOG_ONCE: Once = Once::new();

fn env_level() -> LevelFilter {
    std::env::var("DWM_LOG")
        .or_else(|_| std::env::var("RUST_LOG"))
        .ok()
        .as_deref()
        .and_then(|v| v.parse::<LevelFilter>().ok())
        .unwrap_or(LevelFilter::Info)
}

fn level_to_str(level: LevelFilter) -> &'static str {
    match level {
        LevelFilter::Off => "off",
        LevelFilter::Error => "error",
        LevelFilter::Warn => "warn",
        LevelFilter::Info => "info",
        LevelFilter::Debug => "debug",
        LevelFilter::Trace => "trace",
    }
}

/// Initialize logging for Rust binaries (stderr formatter) based on `DWM_LOG`/`RUST_LOG`.
pub fn init_rust_logging() {
    let level = env_level();
    RUST_LOG_ONCE.call_once(|| {
        let env = Env::default().default_filter_or(level_to_str(level));
        env_logger::Builder::from_env(env)
            .format_timestamp_millis()
            .format_module_path(true)
            .format_target(true)
            .init();
    });
}

// ============================================================================
// Event Sink
// ============================================================================

/// Destination for the driver's structured events.
///
/// Every component of a [`crate::Dwm1001`] reports through the same sink, which
/// is handed in once at construction. `fields` are `(key, value)` pairs that a
/// sink may render or store as it sees fit.
pub trait EventSink: Send + Sync {
    fn record(&self, level: Level, message: &str, fields: &[(&str, &dyn fmt::Display)]);
}

/// Forwards events to the `log` facade, rendering fields as `key=value`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

pub(crate) const LOG_TARGET: &str = "dwm1001";

impl EventSink for LogSink {
    fn record(&self, level: Level, message: &str, fields: &[(&str, &dyn fmt::Display)]) {
        if !log::log_enabled!(target: LOG_TARGET, level) {
            return;
        }
        log::log!(target: LOG_TARGET, level, "{}{}", message, render_fields(fields));
    }
}

fn render_fields(fields: &[(&str, &dyn fmt::Display)]) -> String {
    let mut out = String::new();
    for (i, (key, value)) in fields.iter().enumerate() {
        out.push_str(if i == 0 { ": " } else { ", " });
        let _ = write!(out, "{key}={value}");
    }
    out
}

/// One event captured by [`MemorySink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub level: Level,
    pub message: String,
    pub fields: Vec<(String, String)>,
}

impl Event {
    /// Value of the named field, if the event carried it.
    pub fn field(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Keeps every event in memory. Useful for hosts that surface driver
/// diagnostics themselves, and for tests.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<Event>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Event> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Events at exactly `level`.
    pub fn at_level(&self, level: Level) -> Vec<Event> {
        self.events()
            .into_iter()
            .filter(|e| e.level == level)
            .collect()
    }
}

impl EventSink for MemorySink {
    fn record(&self, level: Level, message: &str, fields: &[(&str, &dyn fmt::Display)]) {
        let event = Event {
            level,
            message: message.to_string(),
            fields: fields
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        };
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(event);
    }
}

// ============================================================================
// Python Bridge
// ============================================================================

#[cfg(feature = "python")]
pub use python_bridge::{init_python_logging, set_python_log_level, set_python_log_level_str};

#[cfg(feature = "python")]
mod python_bridge {
    use std::sync::Once;

    use log::{LevelFilter, Log, Metadata, Record};
    use pyo3::prelude::*;
    use pyo3::types::PyModule;

    use super::env_level;

    static PY_LOG_ONCE: Once = Once::new();

    /// Hands each record to `logging.getLogger(<target>)`; Python's own
    /// handler configuration decides what is emitted.
    struct PyLogger {
        logging_mod: Py<PyModule>,
    }

    fn map_level(level: log::Level) -> usize {
        match level {
            log::Level::Error => 40,
            log::Level::Warn => 30,
            log::Level::Info => 20,
            log::Level::Debug => 10,
            log::Level::Trace => 5,
        }
    }

    impl Log for PyLogger {
        fn enabled(&self, metadata: &Metadata) -> bool {
            metadata.level().to_level_filter() <= log::max_level()
        }

        fn log(&self, record: &Record) {
            if !self.enabled(record.metadata()) {
                return;
            }
            let target = record.target().replace("::", ".");
            let msg = format!("{}", record.args());
            let lvl = map_level(record.level());
            Python::attach(|py| {
                let logging = self.logging_mod.bind(py);
                let result = logging
                    .getattr("getLogger")
                    .and_then(|f| f.call1((target.as_str(),)))
                    .and_then(|logger| logger.call_method1("log", (lvl, msg)));
                if let Err(e) = result {
                    e.restore(py);
                }
            });
        }

        fn flush(&self) {}
    }

    /// Route Rust log records into Python's `logging` module.
    /// Safe to call multiple times; the bridge is installed on first call.
    pub fn init_python_logging(py: Python<'_>) -> PyResult<()> {
        let level = env_level();
        let logging = py.import("logging")?;
        PY_LOG_ONCE.call_once(|| {
            let leaked: &'static PyLogger = Box::leak(Box::new(PyLogger {
                logging_mod: logging.unbind(),
            }));
            if log::set_logger(leaked).is_ok() {
                log::set_max_level(level);
            }
        });
        Ok(())
    }

    /// Allow Python to set an explicit minimum level at runtime.
    pub fn set_python_log_level(py: Python<'_>, level: LevelFilter) -> PyResult<()> {
        init_python_logging(py)?;
        log::set_max_level(level);
        Ok(())
    }

    /// Parse a string log level (or env fallback) and apply it to the Python bridge.
    pub fn set_python_log_level_str(py: Python<'_>, level: Option<&str>) -> PyResult<()> {
        let lvl = level
            .and_then(|s| s.parse::<LevelFilter>().ok())
            .unwrap_or_else(env_level);
        set_python_log_level(py, lvl)
    }
}

use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("serial error: {0}")]
    Serial(#[from] serialport::Error),
    #[error("connection failed after {attempts} attempt(s); last response: {raw:?}")]
    Connection { attempts: u32, raw: String },
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error("device not connected: {0}")]
    NotConnected(String),
    #[error("invalid argument: {0}")]
    InvalidInput(String),
}

/// A response did not match the grammar the caller expected.
///
/// `raw` keeps the unparsed response text: the shell has no error codes, so the
/// text is the only diagnostic available.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("could not parse {expected} from response {raw:?}")]
pub struct ParseError {
    pub expected: String,
    pub raw: String,
}

impl ParseError {
    pub fn new(expected: impl Into<String>, raw: impl Into<String>) -> Self {
        Self {
            expected: expected.into(),
            raw: raw.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, DriverError>;

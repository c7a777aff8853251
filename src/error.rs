//! Error types for the controller core
//!
//! Errors cross component boundaries as values, never as panics: the framer
//! reports malformed frames, the engine reports protocol violations, the
//! register bank reports handshake faults, and the line layer reports
//! transport trouble. Callers decide between retry, drop and NAK.

use std::error::Error as StdError;
use std::fmt;
use std::io;
use std::time::Duration;

/// Top-level error type for controller operations
#[derive(Debug)]
pub enum Cc3705Error {
    /// Register bank handshake faults
    Register(RegisterError),
    /// SDLC frame assembly/validation errors
    Framing(FramingError),
    /// SNA session protocol errors
    Session(SessionError),
    /// Line transport and scanner errors
    Line(LineError),
    /// Configuration errors
    Config(ConfigError),
}

/// Register bank handshake faults
#[derive(Debug)]
pub enum RegisterError {
    /// Word index outside the bank
    BadWord { index: usize },
    /// An interrupt bit was raised before the peer cleared the previous one
    InterruptOverrun { index: usize, mask: u32 },
    /// The peer never acknowledged within the allowed window
    Timeout { timeout: Duration },
}

/// SDLC frame assembly/validation errors
#[derive(Debug, PartialEq)]
pub enum FramingError {
    /// Frame span ran out before the expected bytes
    Truncated { at: usize, wanted: usize },
    /// Buffer did not begin with an opening flag
    MissingFlag { at: usize },
    /// No closing flag terminates the frame
    MissingTerminator,
    /// The FCS does not match the received span
    CrcMismatch,
    /// An I-frame arrived with an unexpected send sequence number
    SequenceMismatch { expected: u8, got: u8 },
}

/// SNA session protocol errors
#[derive(Debug, PartialEq)]
pub enum SessionError {
    /// Frame address does not name a configured station
    UnknownStation { address: u8 },
    /// TH destination address does not name an LU slot
    BadLuAddress { daf: u8 },
    /// PIU shorter than its mandatory headers
    ShortPiu { len: usize },
    /// Expedited PIU with no RU opcode
    EmptyRu,
}

/// Line transport and scanner errors
#[derive(Debug)]
pub enum LineError {
    /// Upstream endpoint is gone and reconnecting failed
    Disconnected { attempts: u32 },
    /// Register handshake failed underneath the scanner
    Register(RegisterError),
    /// Socket-level failure on the line
    Io(io::Error),
    /// The peer thread stopped making progress
    Stalled { waited: Duration },
}

/// Configuration errors
#[derive(Debug)]
pub enum ConfigError {
    /// Configuration file could not be read or written
    Io(io::Error),
    /// Configuration file did not parse
    Parse(serde_json::Error),
    /// A field value is out of range
    InvalidValue { field: &'static str, reason: String },
}

impl fmt::Display for Cc3705Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cc3705Error::Register(e) => write!(f, "register bank error: {e}"),
            Cc3705Error::Framing(e) => write!(f, "framing error: {e}"),
            Cc3705Error::Session(e) => write!(f, "session error: {e}"),
            Cc3705Error::Line(e) => write!(f, "line error: {e}"),
            Cc3705Error::Config(e) => write!(f, "configuration error: {e}"),
        }
    }
}

impl fmt::Display for RegisterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegisterError::BadWord { index } => {
                write!(f, "register word {index:#04X} out of range")
            }
            RegisterError::InterruptOverrun { index, mask } => {
                write!(f, "interrupt bit {mask:#06X} in word {index:#04X} raised before acknowledgement")
            }
            RegisterError::Timeout { timeout } => {
                write!(f, "peer did not acknowledge within {timeout:?}")
            }
        }
    }
}

impl fmt::Display for FramingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FramingError::Truncated { at, wanted } => {
                write!(f, "frame truncated at offset {at} (wanted {wanted} more bytes)")
            }
            FramingError::MissingFlag { at } => {
                write!(f, "no opening flag at offset {at}")
            }
            FramingError::MissingTerminator => {
                write!(f, "no closing flag terminates the frame")
            }
            FramingError::CrcMismatch => {
                write!(f, "frame check sequence mismatch")
            }
            FramingError::SequenceMismatch { expected, got } => {
                write!(f, "send sequence {got} received, expected {expected}")
            }
        }
    }
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::UnknownStation { address } => {
                write!(f, "no station at address {address:#04X}")
            }
            SessionError::BadLuAddress { daf } => {
                write!(f, "destination address {daf:#04X} names no LU slot")
            }
            SessionError::ShortPiu { len } => {
                write!(f, "PIU of {len} bytes is shorter than its headers")
            }
            SessionError::EmptyRu => {
                write!(f, "expedited PIU carries no RU opcode")
            }
        }
    }
}

impl fmt::Display for LineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LineError::Disconnected { attempts } => {
                write!(f, "line disconnected; gave up after {attempts} reconnect attempts")
            }
            LineError::Register(e) => write!(f, "register handshake failed: {e}"),
            LineError::Io(e) => write!(f, "line transport failure: {e}"),
            LineError::Stalled { waited } => {
                write!(f, "peer thread made no progress for {waited:?}")
            }
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "config file I/O failed: {e}"),
            ConfigError::Parse(e) => write!(f, "config file did not parse: {e}"),
            ConfigError::InvalidValue { field, reason } => {
                write!(f, "invalid value for {field}: {reason}")
            }
        }
    }
}

impl StdError for Cc3705Error {}
impl StdError for RegisterError {}
impl StdError for FramingError {}
impl StdError for SessionError {}
impl StdError for LineError {}
impl StdError for ConfigError {}

impl From<RegisterError> for Cc3705Error {
    fn from(e: RegisterError) -> Self {
        Cc3705Error::Register(e)
    }
}

impl From<FramingError> for Cc3705Error {
    fn from(e: FramingError) -> Self {
        Cc3705Error::Framing(e)
    }
}

impl From<SessionError> for Cc3705Error {
    fn from(e: SessionError) -> Self {
        Cc3705Error::Session(e)
    }
}

impl From<LineError> for Cc3705Error {
    fn from(e: LineError) -> Self {
        Cc3705Error::Line(e)
    }
}

impl From<ConfigError> for Cc3705Error {
    fn from(e: ConfigError) -> Self {
        Cc3705Error::Config(e)
    }
}

impl From<RegisterError> for LineError {
    fn from(e: RegisterError) -> Self {
        LineError::Register(e)
    }
}

impl From<io::Error> for LineError {
    fn from(e: io::Error) -> Self {
        LineError::Io(e)
    }
}

impl From<io::Error> for ConfigError {
    fn from(e: io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(e: serde_json::Error) -> Self {
        ConfigError::Parse(e)
    }
}

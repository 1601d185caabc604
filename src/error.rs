//! Error types for the TN3270 engine
//!
//! Errors are split by the layer that raises them so callers can decide how
//! to react: transport failures end the terminal, datastream failures only
//! drop one inbound message, and terminal errors are precondition failures a
//! test can assert on and recover from.

use std::error::Error as StdError;
use std::fmt;
use std::io;

/// Top-level error type for tn3270r operations
#[derive(Debug)]
pub enum Tn3270Error {
    /// Connection, negotiation and socket errors
    Network(NetworkError),
    /// Malformed inbound 3270 datastream
    Datastream(DatastreamError),
    /// Caller precondition failures on synchronous terminal operations
    Terminal(TerminalError),
    /// Illegal field list operations
    Field(FieldError),
    /// Configuration errors
    Config(ConfigError),
}

/// Transport level errors. Fatal to the terminal that raised them.
#[derive(Debug)]
pub enum NetworkError {
    /// Connection refused by remote host
    ConnectionRefused { host: String, port: u16 },
    /// Connection or negotiation did not finish in time
    Timeout { host: String, port: u16, timeout_ms: u64 },
    /// Host name did not resolve to any address
    DnsResolution { host: String },
    /// Peer closed the connection or an I/O error ended it
    ConnectionLost { reason: String },
    /// Telnet negotiation did not reach TN3270 mode
    NegotiationFailed { reason: String },
    /// TLS setup or handshake failure
    TlsError { message: String },
    /// Operation attempted on a closed or never opened connection
    NotConnected,
}

/// Inbound datastream decoding errors.
///
/// Every variant carries the byte offset into the record at which decoding
/// gave up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatastreamError {
    /// Record contained no bytes
    Empty,
    /// First byte is not a known 3270 command
    UnknownCommand { code: u8, offset: usize },
    /// Byte below 0x40 that is neither an order nor a 3270 control character
    UnknownOrder { code: u8, offset: usize },
    /// Order or command needed more bytes than the record holds
    Truncated { what: &'static str, offset: usize },
    /// Buffer address outside the current screen
    InvalidAddress { address: usize, buffer_size: usize, offset: usize },
    /// Structured field with a bad length or unsupported content
    InvalidStructuredField { offset: usize, reason: String },
}

/// Terminal operation failures returned to the calling test
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminalError {
    /// Keyboard is inhibited, the host has not released it yet
    KeyboardLocked,
    /// No modifiable field where one was required
    FieldNotFound { detail: String },
    /// Text did not appear before the deadline
    TextNotFound { text: String, timeout_ms: u64 },
    /// A wait expired
    Timeout { operation: String, timeout_ms: u64 },
    /// Transport closed while waiting or operating
    ConnectionClosed { reason: String },
    /// Input rejected by the field (numeric field, overflow)
    InvalidInput { reason: String },
    /// Row/column outside the screen
    InvalidCursorPosition { row: usize, col: usize },
    /// Operation needs a connected terminal
    NotConnected,
}

/// Field list contract violations.
///
/// These indicate a bug in the codec or the screen algorithm, not a runtime
/// condition a caller can fix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldError {
    UnsupportedOperation { operation: &'static str, reason: String },
}

/// Configuration errors
#[derive(Debug)]
pub enum ConfigError {
    /// Invalid configuration parameter
    InvalidParameter { parameter: String, value: String, reason: String },
    /// Configuration file could not be read or written
    FileError { path: String, error: String },
    /// Configuration text is not valid JSON for the schema
    Parse { message: String },
}

impl fmt::Display for Tn3270Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tn3270Error::Network(err) => write!(f, "Network error: {err}"),
            Tn3270Error::Datastream(err) => write!(f, "Datastream error: {err}"),
            Tn3270Error::Terminal(err) => write!(f, "Terminal error: {err}"),
            Tn3270Error::Field(err) => write!(f, "Field error: {err}"),
            Tn3270Error::Config(err) => write!(f, "Configuration error: {err}"),
        }
    }
}

impl fmt::Display for NetworkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkError::ConnectionRefused { host, port } =>
                write!(f, "Connection refused to {host}:{port}"),
            NetworkError::Timeout { host, port, timeout_ms } =>
                write!(f, "Timed out after {timeout_ms}ms connecting to {host}:{port}"),
            NetworkError::DnsResolution { host } =>
                write!(f, "DNS resolution failed for {host}"),
            NetworkError::ConnectionLost { reason } =>
                write!(f, "Connection lost: {reason}"),
            NetworkError::NegotiationFailed { reason } =>
                write!(f, "Telnet negotiation failed: {reason}"),
            NetworkError::TlsError { message } =>
                write!(f, "TLS error: {message}"),
            NetworkError::NotConnected =>
                write!(f, "Not connected"),
        }
    }
}

impl fmt::Display for DatastreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatastreamError::Empty =>
                write!(f, "Empty datastream"),
            DatastreamError::UnknownCommand { code, offset } =>
                write!(f, "Unknown 3270 command 0x{code:02X} at offset {offset}"),
            DatastreamError::UnknownOrder { code, offset } =>
                write!(f, "Unknown order 0x{code:02X} at offset {offset}"),
            DatastreamError::Truncated { what, offset } =>
                write!(f, "Datastream ended inside {what} at offset {offset}"),
            DatastreamError::InvalidAddress { address, buffer_size, offset } =>
                write!(f, "Buffer address {address} outside buffer of {buffer_size} at offset {offset}"),
            DatastreamError::InvalidStructuredField { offset, reason } =>
                write!(f, "Invalid structured field at offset {offset}: {reason}"),
        }
    }
}

impl fmt::Display for TerminalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminalError::KeyboardLocked =>
                write!(f, "Keyboard is locked"),
            TerminalError::FieldNotFound { detail } =>
                write!(f, "Field not found: {detail}"),
            TerminalError::TextNotFound { text, timeout_ms } =>
                write!(f, "Text '{text}' not found in a field within {timeout_ms}ms"),
            TerminalError::Timeout { operation, timeout_ms } =>
                write!(f, "Timed out after {timeout_ms}ms waiting for {operation}"),
            TerminalError::ConnectionClosed { reason } =>
                write!(f, "Connection closed: {reason}"),
            TerminalError::InvalidInput { reason } =>
                write!(f, "Input rejected: {reason}"),
            TerminalError::InvalidCursorPosition { row, col } =>
                write!(f, "Invalid cursor position: row {row}, col {col}"),
            TerminalError::NotConnected =>
                write!(f, "Terminal is not connected"),
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldError::UnsupportedOperation { operation, reason } =>
                write!(f, "Unsupported {operation}: {reason}"),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidParameter { parameter, value, reason } =>
                write!(f, "Invalid configuration parameter '{parameter}' = '{value}': {reason}"),
            ConfigError::FileError { path, error } =>
                write!(f, "Configuration file error '{path}': {error}"),
            ConfigError::Parse { message } =>
                write!(f, "Configuration parse error: {message}"),
        }
    }
}

impl StdError for Tn3270Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Tn3270Error::Network(err) => Some(err),
            Tn3270Error::Datastream(err) => Some(err),
            Tn3270Error::Terminal(err) => Some(err),
            Tn3270Error::Field(err) => Some(err),
            Tn3270Error::Config(err) => Some(err),
        }
    }
}

impl StdError for NetworkError {}
impl StdError for DatastreamError {}
impl StdError for TerminalError {}
impl StdError for FieldError {}
impl StdError for ConfigError {}

impl From<NetworkError> for Tn3270Error {
    fn from(err: NetworkError) -> Self {
        Tn3270Error::Network(err)
    }
}

impl From<DatastreamError> for Tn3270Error {
    fn from(err: DatastreamError) -> Self {
        Tn3270Error::Datastream(err)
    }
}

impl From<TerminalError> for Tn3270Error {
    fn from(err: TerminalError) -> Self {
        Tn3270Error::Terminal(err)
    }
}

impl From<FieldError> for Tn3270Error {
    fn from(err: FieldError) -> Self {
        Tn3270Error::Field(err)
    }
}

impl From<ConfigError> for Tn3270Error {
    fn from(err: ConfigError) -> Self {
        Tn3270Error::Config(err)
    }
}

impl From<io::Error> for NetworkError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::ConnectionRefused => NetworkError::ConnectionRefused {
                host: "unknown".to_string(),
                port: 0,
            },
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => NetworkError::Timeout {
                host: "unknown".to_string(),
                port: 0,
                timeout_ms: 0,
            },
            _ => NetworkError::ConnectionLost { reason: err.to_string() },
        }
    }
}

impl From<io::Error> for Tn3270Error {
    fn from(err: io::Error) -> Self {
        Tn3270Error::Network(err.into())
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        ConfigError::Parse { message: err.to_string() }
    }
}

impl Tn3270Error {
    /// True for failures that end the terminal
    pub fn is_fatal(&self) -> bool {
        matches!(self, Tn3270Error::Network(_))
            || matches!(self, Tn3270Error::Terminal(TerminalError::ConnectionClosed { .. }))
    }
}

/// Result type alias for tn3270r operations
pub type Tn3270Result<T> = Result<T, Tn3270Error>;

/// Specialized result types for different components
pub type NetworkResult<T> = Result<T, NetworkError>;
pub type DatastreamResult<T> = Result<T, DatastreamError>;
pub type TerminalResult<T> = Result<T, TerminalError>;
pub type FieldResult<T> = Result<T, FieldError>;
pub type ConfigResult<T> = Result<T, ConfigError>;

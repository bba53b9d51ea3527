//! Error types for the PLC bridge.

use std::time::Duration;

use thiserror::Error;

/// Errors raised by a Modbus session.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TransportError {
    /// Could not open a session (refused, unreachable, connect timeout).
    #[error("connection failed: {0}")]
    Connection(String),

    /// A request did not complete in time.
    #[error("request timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    /// The socket failed mid-request.
    #[error("I/O error: {0}")]
    Io(String),

    /// The device answered with a Modbus exception.
    #[error("device exception: {0}")]
    Exception(String),

    /// The signal kind cannot be written.
    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// The value does not fit the signal kind.
    #[error("invalid value: {0}")]
    InvalidValue(String),
}

impl TransportError {
    /// Whether this error closed the session.
    ///
    /// Exceptions and rejected requests leave the connection usable.
    pub fn drops_connection(&self) -> bool {
        matches!(
            self,
            TransportError::Connection(_) | TransportError::Timeout(_) | TransportError::Io(_)
        )
    }
}

/// Errors from a configuration source.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse signal definitions: {0}")]
    Parse(String),

    #[error("configuration source returned no signals")]
    Empty,

    #[error("no reply from '{key}' within {}ms", .timeout.as_millis())]
    Timeout { key: String, timeout: Duration },

    #[error("query failed: {0}")]
    Query(String),
}

/// Errors surfaced by the bridge components.
///
/// Every variant maps to a stable [`code`](PlcError::code) used in command replies.
#[derive(Debug, Error)]
pub enum PlcError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("connection error: {0}")]
    Connection(#[source] TransportError),

    #[error("failed to read '{signal}': {source}")]
    Read {
        signal: String,
        #[source]
        source: TransportError,
    },

    #[error("failed to write '{signal}': {source}")]
    Write {
        signal: String,
        #[source]
        source: TransportError,
    },

    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("signal not found: {0}")]
    NotFound(String),

    #[error("invalid value: {0}")]
    InvalidValue(String),

    #[error("configuration source error: {0}")]
    Source(#[from] SourceError),
}

impl PlcError {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            PlcError::Config(_) => "config_error",
            PlcError::Connection(_) => "connection_error",
            PlcError::Read { .. } => "read_error",
            PlcError::Write { .. } => "write_error",
            PlcError::UnsupportedOperation(_) => "unsupported_operation",
            PlcError::NotFound(_) => "not_found",
            PlcError::InvalidValue(_) => "invalid_value",
            PlcError::Source(_) => "source_error",
        }
    }

    /// A per-signal read failure.
    pub fn read(signal: &str, source: TransportError) -> Self {
        PlcError::Read {
            signal: signal.to_string(),
            source,
        }
    }

    /// Classify a failed write, keeping rejections distinct from I/O failures.
    pub fn write(signal: &str, err: TransportError) -> Self {
        match err {
            TransportError::UnsupportedOperation(msg) => PlcError::UnsupportedOperation(msg),
            TransportError::InvalidValue(msg) => PlcError::InvalidValue(msg),
            TransportError::Connection(_) => PlcError::Connection(err),
            source => PlcError::Write {
                signal: signal.to_string(),
                source,
            },
        }
    }
}

impl From<plclink_common::Error> for PlcError {
    fn from(err: plclink_common::Error) -> Self {
        match err {
            plclink_common::Error::InvalidValue(msg) => PlcError::InvalidValue(msg),
            plclink_common::Error::InvalidSignal(msg) | plclink_common::Error::Config(msg) => {
                PlcError::Config(msg)
            }
            other => PlcError::Config(other.to_string()),
        }
    }
}

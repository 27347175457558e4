use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Unified error type for the lumen runtime
#[derive(Debug, Error)]
pub enum LumenError {
    /// Locator resolution failed or a registry key is missing
    #[error("Not found: {what} [{name}]")]
    NotFound { what: &'static str, name: String },

    /// A native module (or one of its dependencies) failed to load
    #[error("Failed to load module [path='{path}']: {diagnostic}")]
    LoadError { path: String, diagnostic: String },

    /// A key read back from a stream has no registered constructor
    #[error("Round-trip mismatch: no constructor registered for key '{key}'")]
    RoundTripMismatch { key: String },

    /// Link to a worker or to the coordinator was severed
    #[error("Connection lost: {peer} - {message}")]
    ConnectionLost { peer: String, message: String },

    /// One or more workers did not answer a gather request in time
    #[error("Gather incomplete for '{film}': {replied}/{expected} workers replied")]
    GatherIncomplete {
        film: String,
        replied: usize,
        expected: usize,
    },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Configuration {
        message: String,
        field: Option<String>,
    },

    /// Stream encoding/decoding errors
    #[error("Serialization failed: {format}")]
    Serialization {
        format: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Wire protocol violations (unexpected message, oversized frame)
    #[error("Protocol error: {message}")]
    Protocol { message: String },

    /// Channel/messaging errors
    #[error("Channel error: {channel} - {message}")]
    Channel { channel: String, message: String },

    /// Timeout errors
    #[error("Operation timed out: {operation} (timeout: {timeout_ms}ms)")]
    Timeout { operation: String, timeout_ms: u64 },

    /// IO errors
    #[error("IO operation failed: {operation}")]
    Io {
        operation: String,
        #[source]
        source: std::io::Error,
    },
}

/// Distinguishable error code at the API boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    LoadError,
    RoundTripMismatch,
    ConnectionLost,
    GatherIncomplete,
    Configuration,
    Serialization,
    Protocol,
    Channel,
    Timeout,
    Io,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::LoadError => "load_error",
            ErrorKind::RoundTripMismatch => "round_trip_mismatch",
            ErrorKind::ConnectionLost => "connection_lost",
            ErrorKind::GatherIncomplete => "gather_incomplete",
            ErrorKind::Configuration => "configuration",
            ErrorKind::Serialization => "serialization",
            ErrorKind::Protocol => "protocol",
            ErrorKind::Channel => "channel",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Io => "io",
        };
        f.write_str(name)
    }
}

impl LumenError {
    /// Error code of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::LoadError { .. } => ErrorKind::LoadError,
            Self::RoundTripMismatch { .. } => ErrorKind::RoundTripMismatch,
            Self::ConnectionLost { .. } => ErrorKind::ConnectionLost,
            Self::GatherIncomplete { .. } => ErrorKind::GatherIncomplete,
            Self::Configuration { .. } => ErrorKind::Configuration,
            Self::Serialization { .. } => ErrorKind::Serialization,
            Self::Protocol { .. } => ErrorKind::Protocol,
            Self::Channel { .. } => ErrorKind::Channel,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Io { .. } => ErrorKind::Io,
        }
    }

    /// Create a not-found error
    pub fn not_found<S: Into<String>>(what: &'static str, name: S) -> Self {
        Self::NotFound {
            what,
            name: name.into(),
        }
    }

    /// Create a module load error
    pub fn load_error<P: Into<String>, D: Into<String>>(path: P, diagnostic: D) -> Self {
        Self::LoadError {
            path: path.into(),
            diagnostic: diagnostic.into(),
        }
    }

    /// Create a connection lost error
    pub fn connection_lost<P: Into<String>, M: Into<String>>(peer: P, message: M) -> Self {
        Self::ConnectionLost {
            peer: peer.into(),
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
            field: None,
        }
    }

    /// Create a configuration error for a specific field
    pub fn configuration_field<S: Into<String>, F: Into<String>>(message: S, field: F) -> Self {
        Self::Configuration {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Create a protocol error
    pub fn protocol<S: Into<String>>(message: S) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Create a channel error
    pub fn channel<C: Into<String>, M: Into<String>>(channel: C, message: M) -> Self {
        Self::Channel {
            channel: channel.into(),
            message: message.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout<S: Into<String>>(operation: S, timeout: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms: timeout.as_millis() as u64,
        }
    }

    /// Create an IO error with the failing operation attached
    pub fn io<S: Into<String>>(operation: S, source: std::io::Error) -> Self {
        Self::Io {
            operation: operation.into(),
            source,
        }
    }

    /// Check if this error only affects a single peer and the run can go on
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::ConnectionLost { .. } | Self::Timeout { .. } | Self::Channel { .. }
        )
    }
}

impl From<bincode::Error> for LumenError {
    fn from(err: bincode::Error) -> Self {
        Self::Serialization {
            format: "bincode".to_string(),
            source: err,
        }
    }
}

impl From<serde_json::Error> for LumenError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization {
            format: "json".to_string(),
            source: Box::new(err),
        }
    }
}

impl From<serde_yaml::Error> for LumenError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Serialization {
            format: "yaml".to_string(),
            source: Box::new(err),
        }
    }
}

impl From<std::io::Error> for LumenError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            operation: "io".to_string(),
            source: err,
        }
    }
}

/// Result type alias using LumenError
pub type Result<T> = std::result::Result<T, LumenError>;

//! Error types for the OS layer
//!
//! Every operation in this crate reports failure through [`Error`]; nothing
//! here terminates the process on its own.

use thiserror::Error;

/// Result type alias for OS layer operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for the OS layer
#[derive(Error, Debug)]
pub enum Error {
    /// A socket operation was attempted before `IpSupport::startup()`
    /// or after cleanup
    #[error("Socket subsystem not ready")]
    SubsystemNotReady,

    /// `IpSupport::startup()` called while the subsystem is already started
    #[error("Socket subsystem already started")]
    AlreadyStarted,

    /// Socket-layer failure, carrying the normalized error code
    #[error("Transport error (code {code}): {message}")]
    Transport {
        /// Normalized socket error code
        code: i32,
        /// Human-readable description
        message: String,
    },

    /// The diagnostic sink (file or syslog) could not be opened
    #[error("Diagnostic sink unavailable: {0}")]
    SinkUnavailable(String),

    /// The update command could not be launched
    #[error("Failed to spawn command: {0}")]
    Spawn(String),

    /// The update command did not finish within its time budget
    #[error("Command timed out after {0:?}")]
    CommandTimeout(std::time::Duration),

    /// Installing a signal handler failed
    #[error("Signal registration failed for {signal}: {message}")]
    SignalRegistration {
        /// Signal name (e.g. "SIGTERM")
        signal: &'static str,
        /// OS error description
        message: String,
    },

    /// The command template is empty or malformed
    #[error("Invalid command template: {0}")]
    InvalidTemplate(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a transport error from a normalized code
    pub fn transport(code: i32, message: impl Into<String>) -> Self {
        Self::Transport {
            code,
            message: message.into(),
        }
    }

    /// Create a sink-unavailable error
    pub fn sink_unavailable(msg: impl Into<String>) -> Self {
        Self::SinkUnavailable(msg.into())
    }

    /// Create a spawn error
    pub fn spawn(msg: impl Into<String>) -> Self {
        Self::Spawn(msg.into())
    }

    /// Create a signal registration error
    pub fn signal_registration(signal: &'static str, message: impl Into<String>) -> Self {
        Self::SignalRegistration {
            signal,
            message: message.into(),
        }
    }

    /// Create an invalid template error
    pub fn invalid_template(msg: impl Into<String>) -> Self {
        Self::InvalidTemplate(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Stable numeric code for this error
    ///
    /// `0` is reserved for success and never returned here.
    pub fn code(&self) -> i32 {
        match self {
            Self::SubsystemNotReady => 10,
            Self::AlreadyStarted => 11,
            Self::Transport { .. } => 20,
            Self::SinkUnavailable(_) => 30,
            Self::Spawn(_) => 40,
            Self::CommandTimeout(_) => 41,
            Self::InvalidTemplate(_) => 42,
            Self::SignalRegistration { .. } => 50,
            Self::Config(_) => 60,
            Self::Io(_) => 70,
            Self::Json(_) => 71,
            Self::Other(_) => 99,
        }
    }
}

/// Helper for converting anyhow::Error to our Error type
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_distinct_and_nonzero() {
        let errors = [
            Error::SubsystemNotReady,
            Error::AlreadyStarted,
            Error::transport(104, "reset"),
            Error::sink_unavailable("x"),
            Error::spawn("x"),
            Error::CommandTimeout(std::time::Duration::from_secs(1)),
            Error::invalid_template("x"),
            Error::signal_registration("SIGTERM", "x"),
            Error::config("x"),
            Error::Other("x".to_string()),
        ];

        let mut codes: Vec<i32> = errors.iter().map(Error::code).collect();
        assert!(codes.iter().all(|c| *c != 0));
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
    }

    #[test]
    fn anyhow_errors_convert_to_other() {
        let err: Error = anyhow::anyhow!("boom").into();
        assert!(matches!(err, Error::Other(ref m) if m == "boom"));
    }
}

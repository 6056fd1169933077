//! Error types shared by the relay library and its binaries.

use std::io;

/// Result type alias for relay operations.
pub type Result<T> = std::result::Result<T, RelayError>;

/// Failures that stop the relay from starting or running.
///
/// Per-connection transport errors never surface here; they end the affected endpoint direction
/// and are only logged.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// Socket, file or thread creation failures.
    #[error("I/O error: {context}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },

    /// A configuration value is out of range.
    #[error("Invalid configuration: {parameter} - {message}")]
    Config { parameter: String, message: String },

    /// The configuration file is not valid TOML for [`RelayConfig`](crate::config::RelayConfig).
    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// The tracing subscriber could not be installed.
    #[error("Logging initialization failed: {0}")]
    Logging(String),

    /// A relay thread panicked before it could be joined.
    #[error("Thread {0} panicked")]
    ThreadPanicked(String),
}

impl RelayError {
    pub fn io(source: io::Error, context: impl Into<String>) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    pub fn config(parameter: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Config {
            parameter: parameter.into(),
            message: message.into(),
        }
    }
}

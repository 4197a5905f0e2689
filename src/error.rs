//! Error types for authgate

use std::io;

use thiserror::Error;

/// Result type alias for authgate
pub type Result<T> = std::result::Result<T, Error>;

/// authgate errors
///
/// These only surface at startup or construction time. Request-path failures
/// are folded into [`AuthResult`](crate::auth::AuthResult) values instead.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error (fatal at startup)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid argument passed to a constructor
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Key material could not be loaded or parsed
    #[error("Key material error: {0}")]
    KeyMaterial(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Shorthand for a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Whether this error indicates a misconfiguration rather than a runtime fault
    #[must_use]
    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config(_) | Self::InvalidArgument(_) | Self::KeyMaterial(_))
    }
}

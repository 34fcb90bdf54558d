//! Error types for chatgate

use std::io;

use thiserror::Error;

use crate::jwks::KeyFetchError;

/// Result type alias for chatgate
pub type Result<T> = std::result::Result<T, Error>;

/// Crate-level errors.
///
/// Request-scoped authentication failures are not represented here; they
/// live in [`crate::gate::GateError`] and are rendered straight into HTTP
/// responses.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// HTTP error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<KeyFetchError> for Error {
    fn from(err: KeyFetchError) -> Self {
        match err {
            KeyFetchError::Http(e) => Self::Http(e),
        }
    }
}

impl Error {
    /// Process exit code for a fatal error surfaced by the binary.
    #[must_use]
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Config(_) => 78, // EX_CONFIG
            Self::Io(_) => 74,     // EX_IOERR
            Self::Http(_) => 69,   // EX_UNAVAILABLE
            _ => 1,
        }
    }
}

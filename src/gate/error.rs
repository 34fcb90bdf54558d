//! Gate rejections and their HTTP rendering.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::{Value, json};

/// Why the gate refused a request. Every variant is terminal for the
/// request and maps to exactly one status/body pair.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GateError {
    /// No `Authorization` header.
    #[error("Authorization header missing")]
    MissingAuthHeader,
    /// Header is not exactly `<scheme> <credential>`.
    #[error("Invalid Authorization header format")]
    MalformedAuthHeader,
    /// Scheme is not `Bearer`.
    #[error("Invalid token type")]
    UnsupportedScheme,
    /// The signing keys could not be fetched.
    #[error("Unable to fetch signing keys")]
    KeyDirectoryUnavailable,
    /// Token's `kid` is absent or not in the key set.
    #[error("Public key not found")]
    UnknownSigningKey,
    /// Token's `exp` has passed.
    #[error("Token has expired")]
    ExpiredToken,
    /// Signature, claims or structure rejected.
    #[error("Invalid token: {0}")]
    InvalidToken(String),
    /// User creation hit a uniqueness conflict.
    #[error("Error creating or retrieving user")]
    UserProvisioningConflict,
    /// User directory failed for another reason.
    #[error("User directory error: {0}")]
    UserDirectory(String),
}

impl GateError {
    /// HTTP status for this rejection.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::KeyDirectoryUnavailable
            | Self::UserProvisioningConflict
            | Self::UserDirectory(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::UNAUTHORIZED,
        }
    }

    /// JSON body for this rejection.
    #[must_use]
    pub fn body(&self) -> Value {
        match self {
            Self::InvalidToken(details) => json!({
                "error": "Invalid token",
                "details": details,
            }),
            // Directory internals stay in the logs.
            Self::UserDirectory(_) => json!({ "error": "Error creating or retrieving user" }),
            other => json!({ "error": other.to_string() }),
        }
    }
}

impl IntoResponse for GateError {
    fn into_response(self) -> Response {
        (self.status(), Json(self.body())).into_response()
    }
}

//! chatgate library
//!
//! Bearer-token gate for the chat/RAG REST backend.
//!
//! # Features
//!
//! - **JWKS verification**: identity tokens are checked against the identity
//!   provider's published keys, selected by `kid`
//! - **Strict algorithms**: asymmetric allow-list only (`RS256` by default)
//! - **On-demand provisioning**: first valid token for a username creates the
//!   local user
//! - **Pluggable directories**: in-memory or SQLite user storage
//! - **Optional key cache**: TTL cache with refresh on unknown `kid`

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cli;
pub mod config;
pub mod error;
pub mod gate;
pub mod jwks;
pub mod server;
pub mod users;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    let installed = match format {
        Some("json") => subscriber.with(fmt::layer().json()).try_init(),
        _ => subscriber.with(fmt::layer()).try_init(),
    };

    installed.map_err(|e| Error::Internal(format!("tracing already initialised: {e}")))
}

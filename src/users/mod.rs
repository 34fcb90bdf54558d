//! Local user directory.
//!
//! The [`UserDirectory`] trait abstracts over storage backends:
//! [`InMemoryUserDirectory`] (a `DashMap`, lost on restart) and
//! [`SqliteUserDirectory`] (a `users` table with a unique `username`).
//!
//! The gate only ever reads or creates users. Email is written once, at
//! creation, and never updated from later tokens.

pub mod memory;
pub mod sqlite;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Result;
use crate::config::{UserBackend, UsersConfig};

pub use memory::InMemoryUserDirectory;
pub use sqlite::SqliteUserDirectory;

/// A locally provisioned user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalUser {
    /// Directory-assigned id.
    pub id: i64,
    /// Unique username taken from the identity token.
    pub username: String,
    /// Email from the token that created the user; may be empty.
    pub email: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// User directory failures.
#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    /// Another writer created the same username first.
    #[error("username already exists: {0}")]
    Conflict(String),
    /// Storage failure.
    #[error("user directory backend error: {0}")]
    Backend(String),
}

/// Trait abstracting the user storage backend.
///
/// Implementations must be `Send + Sync` because the directory is shared
/// across request tasks.
#[async_trait]
pub trait UserDirectory: Send + Sync + 'static {
    /// Look up a user by username.
    async fn find(&self, username: &str) -> std::result::Result<Option<LocalUser>, DirectoryError>;

    /// Create a user. Returns [`DirectoryError::Conflict`] if the username
    /// is already taken.
    async fn create(
        &self,
        username: &str,
        email: &str,
    ) -> std::result::Result<LocalUser, DirectoryError>;

    /// Number of users.
    async fn count(&self) -> std::result::Result<u64, DirectoryError>;

    /// Return the existing user or create one; the flag is `true` when a
    /// user was created.
    ///
    /// Lookup and insert are separate steps, so two concurrent callers can
    /// both miss the lookup; the loser gets [`DirectoryError::Conflict`].
    async fn find_or_create(
        &self,
        username: &str,
        email: &str,
    ) -> std::result::Result<(LocalUser, bool), DirectoryError> {
        if let Some(user) = self.find(username).await? {
            return Ok((user, false));
        }
        let user = self.create(username, email).await?;
        Ok((user, true))
    }
}

/// Build the directory selected by `config`.
pub async fn open(config: &UsersConfig) -> Result<Arc<dyn UserDirectory>> {
    match config.backend {
        UserBackend::Memory => Ok(Arc::new(InMemoryUserDirectory::new())),
        UserBackend::Sqlite => {
            let dir = SqliteUserDirectory::connect(&config.database_url).await?;
            Ok(Arc::new(dir))
        }
    }
}

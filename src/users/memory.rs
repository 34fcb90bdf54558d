//! In-memory user directory backed by a `DashMap`.

use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use dashmap::{DashMap, mapref::entry::Entry};
use tracing::debug;

use super::{DirectoryError, LocalUser, UserDirectory};

/// Process-local directory keyed by username.
pub struct InMemoryUserDirectory {
    by_username: DashMap<String, LocalUser>,
    next_id: AtomicI64,
}

impl InMemoryUserDirectory {
    /// Create an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self {
            by_username: DashMap::new(),
            next_id: AtomicI64::new(1),
        }
    }
}

impl Default for InMemoryUserDirectory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UserDirectory for InMemoryUserDirectory {
    async fn find(&self, username: &str) -> Result<Option<LocalUser>, DirectoryError> {
        Ok(self.by_username.get(username).map(|e| e.value().clone()))
    }

    async fn create(&self, username: &str, email: &str) -> Result<LocalUser, DirectoryError> {
        match self.by_username.entry(username.to_string()) {
            Entry::Occupied(_) => Err(DirectoryError::Conflict(username.to_string())),
            Entry::Vacant(slot) => {
                let user = LocalUser {
                    id: self.next_id.fetch_add(1, Ordering::Relaxed),
                    username: username.to_string(),
                    email: email.to_string(),
                    created_at: Utc::now(),
                };
                slot.insert(user.clone());
                debug!(username = %username, id = user.id, "Created user");
                Ok(user)
            }
        }
    }

    async fn count(&self) -> Result<u64, DirectoryError> {
        Ok(self.by_username.len() as u64)
    }
}

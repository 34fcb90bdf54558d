//! SQLite user directory.

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};
use tracing::{debug, error, info};

use super::{DirectoryError, LocalUser, UserDirectory};
use crate::Result;

const SCHEMA: &str = r"
    CREATE TABLE IF NOT EXISTS users (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        username TEXT NOT NULL UNIQUE,
        email TEXT NOT NULL DEFAULT '',
        created_at TEXT NOT NULL
    )
";

#[derive(sqlx::FromRow)]
struct UserRow {
    id: i64,
    username: String,
    email: String,
    created_at: DateTime<Utc>,
}

impl From<UserRow> for LocalUser {
    fn from(row: UserRow) -> Self {
        Self {
            id: row.id,
            username: row.username,
            email: row.email,
            created_at: row.created_at,
        }
    }
}

/// Directory stored in a `users` table with `UNIQUE(username)`.
#[derive(Debug, Clone)]
pub struct SqliteUserDirectory {
    pool: SqlitePool,
}

impl SqliteUserDirectory {
    /// Open (creating if needed) the database at `database_url` and ensure
    /// the schema exists.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = pool_options(database_url).connect_with(options).await?;
        Self::with_pool(pool).await
    }

    /// Use an existing pool and ensure the schema exists.
    pub async fn with_pool(pool: SqlitePool) -> Result<Self> {
        sqlx::query(SCHEMA).execute(&pool).await?;
        info!("User directory ready");
        Ok(Self { pool })
    }
}

/// Every connection to `:memory:` is its own database, so an in-memory pool
/// holds exactly one connection that is never idled out or recycled.
fn pool_options(database_url: &str) -> SqlitePoolOptions {
    if database_url.contains(":memory:") {
        SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
    } else {
        SqlitePoolOptions::new().max_connections(8)
    }
}

fn backend(err: &sqlx::Error) -> DirectoryError {
    error!(error = %err, "User directory query failed");
    DirectoryError::Backend(err.to_string())
}

#[async_trait]
impl UserDirectory for SqliteUserDirectory {
    async fn find(&self, username: &str) -> std::result::Result<Option<LocalUser>, DirectoryError> {
        let row: Option<UserRow> = sqlx::query_as(
            "SELECT id, username, email, created_at FROM users WHERE username = ?",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| backend(&e))?;
        Ok(row.map(LocalUser::from))
    }

    async fn create(
        &self,
        username: &str,
        email: &str,
    ) -> std::result::Result<LocalUser, DirectoryError> {
        let inserted: std::result::Result<UserRow, sqlx::Error> = sqlx::query_as(
            "INSERT INTO users (username, email, created_at) VALUES (?, ?, ?) \
             RETURNING id, username, email, created_at",
        )
        .bind(username)
        .bind(email)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await;

        match inserted {
            Ok(row) => {
                debug!(username = %username, id = row.id, "Created user");
                Ok(row.into())
            }
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(DirectoryError::Conflict(username.to_string()))
            }
            Err(e) => Err(backend(&e)),
        }
    }

    async fn count(&self) -> std::result::Result<u64, DirectoryError> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| backend(&e))?;
        Ok(u64::try_from(n).unwrap_or_default())
    }
}

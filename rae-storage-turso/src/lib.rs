//! # RAE Storage - Turso
//!
//! Turso/libSQL adapter implementing the durable halves of the storage
//! seam: [`MemoryStorage`] for artifacts and [`GraphStore`] for the
//! knowledge graph.
//!
//! Every query carries the tenant (and usually project) in its WHERE
//! clause; a row from another scope is unreachable by construction.
//! Transient driver failures map to `StorageUnavailable` (retriable),
//! invariant breaches to `ConstraintViolation` (fatal).
//!
//! ## Example
//!
//! ```no_run
//! use rae_storage_turso::TursoStorage;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let storage = TursoStorage::new("libsql://db.example.turso.io", "token").await?;
//! storage.initialize_schema().await?;
//! # Ok(())
//! # }
//! ```
//!
//! [`MemoryStorage`]: rae_core::MemoryStorage
//! [`GraphStore`]: rae_core::GraphStore

use libsql::{Builder, Connection, Database};
use rae_core::{Error, Result};
use std::sync::Arc;
use tracing::info;

mod artifacts;
mod graph;
mod schema;

#[cfg(test)]
mod tests;

/// Turso storage backend for durable persistence.
pub struct TursoStorage {
    db: Arc<Database>,
}

impl TursoStorage {
    /// Create a storage instance.
    ///
    /// # Arguments
    ///
    /// * `url` - only `libsql://`, `file:`, or `:memory:` are accepted
    /// * `token` - required for `libsql://`, empty for local databases
    ///
    /// # Security
    ///
    /// Plain `http(s)://` URLs are rejected; remote connections go
    /// through `libsql://` with a token or not at all.
    pub async fn new(url: &str, token: &str) -> Result<Self> {
        let db = if url == ":memory:" || url.starts_with("file:") {
            let path = url.strip_prefix("file:").unwrap_or(url);
            Builder::new_local(path)
                .build()
                .await
                .map_err(|e| Error::StorageUnavailable(format!("local open failed: {e}")))?
        } else if url.starts_with("libsql://") {
            if token.is_empty() {
                return Err(Error::Config(
                    "libsql:// connections require an auth token".into(),
                ));
            }
            // Validate URL shape before handing it to the driver.
            url::Url::parse(url)
                .map_err(|e| Error::Config(format!("invalid libsql URL: {e}")))?;
            Builder::new_remote(url.to_string(), token.to_string())
                .build()
                .await
                .map_err(|e| Error::StorageUnavailable(format!("remote open failed: {e}")))?
        } else {
            return Err(Error::Config(format!(
                "unsupported storage URL '{url}': use libsql://, file:, or :memory:"
            )));
        };

        Ok(Self { db: Arc::new(db) })
    }

    /// Wrap an existing database handle (used by tests).
    #[must_use]
    pub fn from_database(db: Database) -> Self {
        Self { db: Arc::new(db) }
    }

    /// Create tables and indices. Idempotent.
    pub async fn initialize_schema(&self) -> Result<()> {
        let conn = self.connect()?;
        for statement in schema::ALL_STATEMENTS {
            conn.execute(statement, ())
                .await
                .map_err(|e| Error::StorageUnavailable(format!("schema setup failed: {e}")))?;
        }
        info!("turso schema initialized");
        Ok(())
    }

    pub(crate) fn connect(&self) -> Result<Connection> {
        self.db
            .connect()
            .map_err(|e| Error::StorageUnavailable(format!("connect failed: {e}")))
    }

    pub(crate) fn storage_err(context: &str, error: libsql::Error) -> Error {
        let message = error.to_string();
        if message.contains("UNIQUE constraint failed") {
            Error::ConstraintViolation(format!("{context}: {message}"))
        } else {
            Error::StorageUnavailable(format!("{context}: {message}"))
        }
    }
}

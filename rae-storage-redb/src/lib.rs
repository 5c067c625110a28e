//! # RAE Storage - redb
//!
//! Embedded vector index over redb: per-model semantic view storage
//! with exact top-k cosine search.
//!
//! Keys compose (tenant, project, model, artifact) so a scan never
//! leaves its scope or mixes models. Values are postcard-encoded.
//! Synchronous redb work runs inside `spawn_blocking` under a database
//! timeout. Exact scan rather than ANN: the index contract only
//! requires top-k by similarity, and exactness keeps retrieval
//! deterministic.
//!
//! ## Example
//!
//! ```no_run
//! use rae_storage_redb::RedbVectorIndex;
//! use std::path::Path;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let index = RedbVectorIndex::new(Path::new("./vectors.redb")).await?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use rae_core::storage::memory::cosine_similarity;
use rae_core::{Error, Result, Scope, SemanticView, VectorIndex};
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use uuid::Uuid;


/// Maximum size for a stored view (1MB). Typical embedding dimensions
/// (384-3072) × 4 bytes/f32 land well below this; the cap bounds
/// deserialization of corrupted entries.
pub const MAX_VIEW_SIZE: usize = 1_000_000;

pub(crate) const VIEWS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("semantic_views");

/// Timeout for blocking database operations.
const DB_OPERATION_TIMEOUT: Duration = Duration::from_secs(10);

/// Key separator; sorts below every printable key component.
const SEP: char = '\u{1f}';

async fn with_db_timeout<T, F>(operation: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    match tokio::time::timeout(DB_OPERATION_TIMEOUT, tokio::task::spawn_blocking(operation)).await
    {
        Ok(Ok(result)) => result,
        Ok(Err(join_err)) => Err(Error::StorageUnavailable(format!(
            "task join error: {join_err}"
        ))),
        Err(_) => Err(Error::Timeout(format!(
            "database operation exceeded {DB_OPERATION_TIMEOUT:?}"
        ))),
    }
}

#[derive(Serialize, Deserialize)]
struct StoredView {
    dimension: usize,
    vector: Vec<f32>,
    generated_at_ms: i64,
}

fn view_key(scope: &Scope, model: &str, artifact_id: Uuid) -> String {
    format!(
        "{}{SEP}{}{SEP}{}{SEP}{}",
        scope.tenant(),
        scope.project(),
        model,
        artifact_id
    )
}

fn scan_prefix(scope: &Scope, model: &str) -> String {
    format!("{}{SEP}{}{SEP}{}{SEP}", scope.tenant(), scope.project(), model)
}

fn check_scope(scope: &Scope) -> Result<()> {
    if scope.tenant().is_empty() {
        return Err(Error::InvalidInput("missing tenant scope".into()));
    }
    Ok(())
}

/// redb-backed vector index.
pub struct RedbVectorIndex {
    db: Arc<Database>,
}

impl RedbVectorIndex {
    /// Open (or create) the index at `path`.
    pub async fn new(path: &Path) -> Result<Self> {
        let path = path.to_path_buf();
        let db = with_db_timeout(move || {
            Database::create(&path)
                .map_err(|e| Error::StorageUnavailable(format!("failed to open redb: {e}")))
        })
        .await?;
        // Ensure the table exists so first reads do not error.
        let db = Arc::new(db);
        let init = Arc::clone(&db);
        with_db_timeout(move || {
            let write_txn = init
                .begin_write()
                .map_err(|e| Error::StorageUnavailable(format!("begin write: {e}")))?;
            write_txn
                .open_table(VIEWS_TABLE)
                .map_err(|e| Error::StorageUnavailable(format!("open table: {e}")))?;
            write_txn
                .commit()
                .map_err(|e| Error::StorageUnavailable(format!("commit: {e}")))?;
            Ok(())
        })
        .await?;
        info!("redb vector index ready");
        Ok(Self { db })
    }
}

#[async_trait]
impl VectorIndex for RedbVectorIndex {
    async fn upsert(&self, scope: &Scope, view: &SemanticView) -> Result<()> {
        check_scope(scope)?;
        if view.vector.is_empty() {
            return Err(Error::InvalidInput("empty embedding vector".into()));
        }
        let db = Arc::clone(&self.db);
        let key = view_key(scope, &view.model, view.artifact_id);
        let stored = StoredView {
            dimension: view.dimension,
            vector: view.vector.clone(),
            generated_at_ms: view.generated_at.timestamp_millis(),
        };
        let bytes = postcard::to_allocvec(&stored)
            .map_err(|e| Error::StorageUnavailable(format!("serialize view: {e}")))?;

        with_db_timeout(move || {
            let write_txn = db
                .begin_write()
                .map_err(|e| Error::StorageUnavailable(format!("begin write: {e}")))?;
            {
                let mut table = write_txn
                    .open_table(VIEWS_TABLE)
                    .map_err(|e| Error::StorageUnavailable(format!("open table: {e}")))?;
                table
                    .insert(key.as_str(), bytes.as_slice())
                    .map_err(|e| Error::StorageUnavailable(format!("insert view: {e}")))?;
            }
            write_txn
                .commit()
                .map_err(|e| Error::StorageUnavailable(format!("commit: {e}")))?;
            Ok(())
        })
        .await
    }

    async fn remove(&self, scope: &Scope, artifact_id: Uuid, model: Option<&str>) -> Result<()> {
        check_scope(scope)?;
        let db = Arc::clone(&self.db);
        let scope = scope.clone();
        let model = model.map(ToString::to_string);

        with_db_timeout(move || {
            let write_txn = db
                .begin_write()
                .map_err(|e| Error::StorageUnavailable(format!("begin write: {e}")))?;
            {
                let mut table = write_txn
                    .open_table(VIEWS_TABLE)
                    .map_err(|e| Error::StorageUnavailable(format!("open table: {e}")))?;
                match &model {
                    Some(model) => {
                        table
                            .remove(view_key(&scope, model, artifact_id).as_str())
                            .map_err(|e| {
                                Error::StorageUnavailable(format!("remove view: {e}"))
                            })?;
                    }
                    None => {
                        // All models for the artifact: collect matching
                        // keys first, then remove.
                        let suffix = format!("{SEP}{artifact_id}");
                        let prefix =
                            format!("{}{SEP}{}{SEP}", scope.tenant(), scope.project());
                        let mut stale = Vec::new();
                        for entry in table
                            .range(prefix.as_str()..)
                            .map_err(|e| Error::StorageUnavailable(format!("range: {e}")))?
                        {
                            let (key, _) = entry.map_err(|e| {
                                Error::StorageUnavailable(format!("range entry: {e}"))
                            })?;
                            let key = key.value().to_string();
                            if !key.starts_with(&prefix) {
                                break;
                            }
                            if key.ends_with(&suffix) {
                                stale.push(key);
                            }
                        }
                        for key in stale {
                            table.remove(key.as_str()).map_err(|e| {
                                Error::StorageUnavailable(format!("remove view: {e}"))
                            })?;
                        }
                    }
                }
            }
            write_txn
                .commit()
                .map_err(|e| Error::StorageUnavailable(format!("commit: {e}")))?;
            Ok(())
        })
        .await
    }

    async fn get(
        &self,
        scope: &Scope,
        artifact_id: Uuid,
        model: &str,
    ) -> Result<Option<SemanticView>> {
        check_scope(scope)?;
        let db = Arc::clone(&self.db);
        let key = view_key(scope, model, artifact_id);
        let model = model.to_string();

        with_db_timeout(move || {
            let read_txn = db
                .begin_read()
                .map_err(|e| Error::StorageUnavailable(format!("begin read: {e}")))?;
            let table = read_txn
                .open_table(VIEWS_TABLE)
                .map_err(|e| Error::StorageUnavailable(format!("open table: {e}")))?;
            match table
                .get(key.as_str())
                .map_err(|e| Error::StorageUnavailable(format!("get view: {e}")))?
            {
                Some(guard) => {
                    let bytes = guard.value();
                    if bytes.len() > MAX_VIEW_SIZE {
                        return Err(Error::StorageUnavailable(
                            "stored view exceeds size cap".into(),
                        ));
                    }
                    let stored: StoredView = postcard::from_bytes(bytes).map_err(|e| {
                        Error::StorageUnavailable(format!("deserialize view: {e}"))
                    })?;
                    Ok(Some(SemanticView {
                        artifact_id,
                        model,
                        dimension: stored.dimension,
                        vector: stored.vector,
                        generated_at: chrono::DateTime::from_timestamp_millis(
                            stored.generated_at_ms,
                        )
                        .unwrap_or_else(chrono::Utc::now),
                    }))
                }
                None => Ok(None),
            }
        })
        .await
    }

    async fn search(
        &self,
        scope: &Scope,
        model: &str,
        query: &[f32],
        top_k: usize,
    ) -> Result<Vec<(Uuid, f32)>> {
        check_scope(scope)?;
        if query.is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }
        let db = Arc::clone(&self.db);
        let prefix = scan_prefix(scope, model);
        let query = query.to_vec();

        with_db_timeout(move || {
            let read_txn = db
                .begin_read()
                .map_err(|e| Error::StorageUnavailable(format!("begin read: {e}")))?;
            let table = read_txn
                .open_table(VIEWS_TABLE)
                .map_err(|e| Error::StorageUnavailable(format!("open table: {e}")))?;

            let mut scored: Vec<(Uuid, f32)> = Vec::new();
            for entry in table
                .range(prefix.as_str()..)
                .map_err(|e| Error::StorageUnavailable(format!("range: {e}")))?
            {
                let (key, value) =
                    entry.map_err(|e| Error::StorageUnavailable(format!("range entry: {e}")))?;
                let key = key.value();
                if !key.starts_with(&prefix) {
                    break;
                }
                let Some(id_part) = key.rsplit(SEP).next() else {
                    continue;
                };
                let Ok(artifact_id) = Uuid::parse_str(id_part) else {
                    continue;
                };
                let bytes = value.value();
                if bytes.len() > MAX_VIEW_SIZE {
                    continue;
                }
                let stored: StoredView = postcard::from_bytes(bytes)
                    .map_err(|e| Error::StorageUnavailable(format!("deserialize view: {e}")))?;
                scored.push((artifact_id, cosine_similarity(&query, &stored.vector)));
            }

            scored.sort_by(|a, b| {
                b.1.partial_cmp(&a.1)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.0.cmp(&b.0))
            });
            scored.truncate(top_k);
            Ok(scored)
        })
        .await
    }
}

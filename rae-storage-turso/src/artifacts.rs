//! `MemoryStorage` implementation over libSQL.

use crate::TursoStorage;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{params, Row};
use rae_core::types::{IMPORTANCE_CEILING, IMPORTANCE_FLOOR};
use rae_core::{
    AccessStatsUpdate, AggregateField, AggregateOp, ArtifactFilter, Error, MemoryArtifact,
    MemoryLayer, MemoryStorage, Result, Scope,
};
use std::collections::BTreeMap;
use tracing::debug;
use uuid::Uuid;

fn check_scope(scope: &Scope) -> Result<()> {
    if scope.tenant().is_empty() {
        return Err(Error::InvalidInput("missing tenant scope".into()));
    }
    Ok(())
}

fn millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_else(Utc::now)
}

fn row_to_artifact(row: &Row) -> Result<MemoryArtifact> {
    let id_text: String = row
        .get(0)
        .map_err(|e| Error::StorageUnavailable(format!("bad artifact row: {e}")))?;
    let tenant: String = row
        .get(1)
        .map_err(|e| Error::StorageUnavailable(format!("bad artifact row: {e}")))?;
    let project: String = row
        .get(2)
        .map_err(|e| Error::StorageUnavailable(format!("bad artifact row: {e}")))?;
    let layer_text: String = row
        .get(3)
        .map_err(|e| Error::StorageUnavailable(format!("bad artifact row: {e}")))?;
    let content: String = row
        .get(4)
        .map_err(|e| Error::StorageUnavailable(format!("bad artifact row: {e}")))?;
    let metadata_json: String = row
        .get(5)
        .map_err(|e| Error::StorageUnavailable(format!("bad artifact row: {e}")))?;
    let tags_json: String = row
        .get(6)
        .map_err(|e| Error::StorageUnavailable(format!("bad artifact row: {e}")))?;
    let created_at: i64 = row
        .get(7)
        .map_err(|e| Error::StorageUnavailable(format!("bad artifact row: {e}")))?;
    let last_accessed_at: i64 = row
        .get(8)
        .map_err(|e| Error::StorageUnavailable(format!("bad artifact row: {e}")))?;
    let usage_count: i64 = row
        .get(9)
        .map_err(|e| Error::StorageUnavailable(format!("bad artifact row: {e}")))?;
    let importance: f64 = row
        .get(10)
        .map_err(|e| Error::StorageUnavailable(format!("bad artifact row: {e}")))?;
    let user_rating: Option<f64> = row
        .get(11)
        .map_err(|e| Error::StorageUnavailable(format!("bad artifact row: {e}")))?;
    let consolidated: i64 = row
        .get(12)
        .map_err(|e| Error::StorageUnavailable(format!("bad artifact row: {e}")))?;
    let provenance_json: String = row
        .get(13)
        .map_err(|e| Error::StorageUnavailable(format!("bad artifact row: {e}")))?;
    let token_count: i64 = row
        .get(14)
        .map_err(|e| Error::StorageUnavailable(format!("bad artifact row: {e}")))?;

    let id = Uuid::parse_str(&id_text)
        .map_err(|e| Error::StorageUnavailable(format!("bad artifact id: {e}")))?;
    let layer: MemoryLayer = layer_text.parse()?;
    let metadata: BTreeMap<String, serde_json::Value> = serde_json::from_str(&metadata_json)?;
    let tags: Vec<String> = serde_json::from_str(&tags_json)?;
    let provenance: Vec<Uuid> = serde_json::from_str(&provenance_json)?;

    let scope = Scope::new(tenant, project)?;
    Ok(MemoryArtifact {
        id,
        scope,
        layer,
        content,
        metadata,
        tags,
        created_at: from_millis(created_at),
        last_accessed_at: from_millis(last_accessed_at),
        usage_count: usage_count.max(0) as u64,
        importance: importance as f32,
        user_rating: user_rating.map(|r| r as f32),
        consolidated: consolidated != 0,
        provenance,
        token_count: token_count.max(0) as usize,
    })
}

const SELECT_COLUMNS: &str = "artifact_id, tenant, project, layer, content, metadata, tags, \
     created_at, last_accessed_at, usage_count, importance, user_rating, \
     consolidated, provenance, token_count";

/// Matches the post-SQL filter parts (tags) that SQL does not cover.
fn passes_tag_filter(artifact: &MemoryArtifact, filter: &ArtifactFilter) -> bool {
    filter.tags_any.is_empty() || artifact.tags.iter().any(|t| filter.tags_any.contains(t))
}

/// WHERE-clause fragments for the SQL-expressible filter parts.
fn filter_sql(filter: &ArtifactFilter) -> (String, Vec<libsql::Value>) {
    let mut clauses = String::new();
    let mut values: Vec<libsql::Value> = Vec::new();

    if !filter.layers.is_empty() {
        let placeholders = vec!["?"; filter.layers.len()].join(", ");
        clauses.push_str(&format!(" AND layer IN ({placeholders})"));
        for layer in &filter.layers {
            values.push(libsql::Value::Text(layer.to_string()));
        }
    }
    if let Some(before) = filter.created_before {
        clauses.push_str(" AND created_at < ?");
        values.push(libsql::Value::Integer(millis(before)));
    }
    if let Some(after) = filter.created_after {
        clauses.push_str(" AND created_at >= ?");
        values.push(libsql::Value::Integer(millis(after)));
    }
    if let Some(before) = filter.accessed_before {
        clauses.push_str(" AND last_accessed_at < ?");
        values.push(libsql::Value::Integer(millis(before)));
    }
    if let Some(flag) = filter.consolidated {
        clauses.push_str(" AND consolidated = ?");
        values.push(libsql::Value::Integer(i64::from(flag)));
    }
    (clauses, values)
}

impl TursoStorage {
    async fn query_artifacts(
        &self,
        scope: &Scope,
        filter: &ArtifactFilter,
    ) -> Result<Vec<MemoryArtifact>> {
        let conn = self.connect()?;
        let (clauses, mut values) = filter_sql(filter);
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM artifacts \
             WHERE tenant = ? AND project = ?{clauses} \
             ORDER BY created_at DESC, artifact_id ASC"
        );
        let mut all_values = vec![
            libsql::Value::Text(scope.tenant().to_string()),
            libsql::Value::Text(scope.project().to_string()),
        ];
        all_values.append(&mut values);

        let mut rows = conn
            .query(&sql, all_values)
            .await
            .map_err(|e| Self::storage_err("query artifacts", e))?;
        let mut artifacts = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| Self::storage_err("fetch artifact row", e))?
        {
            let artifact = row_to_artifact(&row)?;
            if !passes_tag_filter(&artifact, filter) {
                continue;
            }
            artifacts.push(artifact);
            if let Some(limit) = filter.limit {
                if artifacts.len() >= limit {
                    break;
                }
            }
        }
        Ok(artifacts)
    }
}

#[async_trait]
impl MemoryStorage for TursoStorage {
    async fn insert(&self, artifact: &MemoryArtifact) -> Result<()> {
        check_scope(&artifact.scope)?;
        artifact.validate()?;
        let conn = self.connect()?;

        let sql = "INSERT INTO artifacts (
                artifact_id, tenant, project, layer, content, metadata, tags,
                created_at, last_accessed_at, usage_count, importance, user_rating,
                consolidated, provenance, token_count, fingerprint
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)";

        conn.execute(
            sql,
            params![
                artifact.id.to_string(),
                artifact.scope.tenant(),
                artifact.scope.project(),
                artifact.layer.to_string(),
                artifact.content.clone(),
                serde_json::to_string(&artifact.metadata)?,
                serde_json::to_string(&artifact.tags)?,
                millis(artifact.created_at),
                millis(artifact.last_accessed_at),
                artifact.usage_count as i64,
                f64::from(artifact.importance),
                artifact.user_rating.map(f64::from),
                i64::from(artifact.consolidated),
                serde_json::to_string(&artifact.provenance)?,
                artifact.token_count as i64,
                artifact.content_fingerprint(),
            ],
        )
        .await
        .map_err(|e| Self::storage_err("insert artifact", e))?;

        debug!(artifact_id = %artifact.id, "artifact inserted");
        Ok(())
    }

    async fn get(&self, scope: &Scope, id: Uuid) -> Result<Option<MemoryArtifact>> {
        check_scope(scope)?;
        let conn = self.connect()?;
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM artifacts \
             WHERE artifact_id = ? AND tenant = ? AND project = ?"
        );
        let mut rows = conn
            .query(
                &sql,
                params![id.to_string(), scope.tenant(), scope.project()],
            )
            .await
            .map_err(|e| Self::storage_err("get artifact", e))?;
        match rows
            .next()
            .await
            .map_err(|e| Self::storage_err("fetch artifact", e))?
        {
            Some(row) => Ok(Some(row_to_artifact(&row)?)),
            None => Ok(None),
        }
    }

    async fn update(&self, artifact: &MemoryArtifact) -> Result<()> {
        check_scope(&artifact.scope)?;
        artifact.validate()?;

        let existing = self
            .get(&artifact.scope, artifact.id)
            .await?
            .ok_or(Error::NotFound(artifact.id))?;
        if existing.layer != artifact.layer && !existing.layer.can_promote_to(artifact.layer) {
            return Err(Error::ConstraintViolation(format!(
                "illegal layer transition {} -> {}",
                existing.layer, artifact.layer
            )));
        }

        let conn = self.connect()?;
        let sql = "UPDATE artifacts SET
                layer = ?, content = ?, metadata = ?, tags = ?,
                last_accessed_at = ?, usage_count = ?, importance = ?,
                user_rating = ?, consolidated = ?, provenance = ?,
                token_count = ?, fingerprint = ?
             WHERE artifact_id = ? AND tenant = ? AND project = ?";
        conn.execute(
            sql,
            params![
                artifact.layer.to_string(),
                artifact.content.clone(),
                serde_json::to_string(&artifact.metadata)?,
                serde_json::to_string(&artifact.tags)?,
                millis(artifact.last_accessed_at),
                artifact.usage_count as i64,
                f64::from(artifact.importance),
                artifact.user_rating.map(f64::from),
                i64::from(artifact.consolidated),
                serde_json::to_string(&artifact.provenance)?,
                artifact.token_count as i64,
                artifact.content_fingerprint(),
                artifact.id.to_string(),
                artifact.scope.tenant(),
                artifact.scope.project(),
            ],
        )
        .await
        .map_err(|e| Self::storage_err("update artifact", e))?;
        Ok(())
    }

    async fn delete(&self, scope: &Scope, id: Uuid) -> Result<bool> {
        check_scope(scope)?;
        let conn = self.connect()?;
        let affected = conn
            .execute(
                "DELETE FROM artifacts WHERE artifact_id = ? AND tenant = ? AND project = ?",
                params![id.to_string(), scope.tenant(), scope.project()],
            )
            .await
            .map_err(|e| Self::storage_err("delete artifact", e))?;
        Ok(affected > 0)
    }

    async fn list(&self, scope: &Scope, filter: &ArtifactFilter) -> Result<Vec<MemoryArtifact>> {
        check_scope(scope)?;
        self.query_artifacts(scope, filter).await
    }

    async fn count(&self, scope: &Scope, filter: &ArtifactFilter) -> Result<u64> {
        check_scope(scope)?;
        // Tag filtering happens in Rust, so counting goes through the
        // same row path as listing.
        let unlimited = ArtifactFilter {
            limit: None,
            ..filter.clone()
        };
        Ok(self.query_artifacts(scope, &unlimited).await?.len() as u64)
    }

    async fn update_access_stats(
        &self,
        scope: &Scope,
        updates: &[AccessStatsUpdate],
    ) -> Result<()> {
        check_scope(scope)?;
        if updates.is_empty() {
            return Ok(());
        }
        let conn = self.connect()?;
        for update in updates {
            conn.execute(
                "UPDATE artifacts SET usage_count = usage_count + 1, last_accessed_at = ? \
                 WHERE artifact_id = ? AND tenant = ? AND project = ?",
                params![
                    millis(update.accessed_at),
                    update.artifact_id.to_string(),
                    scope.tenant(),
                    scope.project(),
                ],
            )
            .await
            .map_err(|e| Self::storage_err("update access stats", e))?;
        }
        Ok(())
    }

    async fn adjust_importance(&self, scope: &Scope, id: Uuid, delta: f32) -> Result<()> {
        check_scope(scope)?;
        let conn = self.connect()?;
        // Single statement keeps the adjustment atomic under the
        // driver's row locking.
        let affected = conn
            .execute(
                "UPDATE artifacts SET importance = MAX(?, MIN(?, importance + ?)) \
                 WHERE artifact_id = ? AND tenant = ? AND project = ?",
                params![
                    f64::from(IMPORTANCE_FLOOR),
                    f64::from(IMPORTANCE_CEILING),
                    f64::from(delta),
                    id.to_string(),
                    scope.tenant(),
                    scope.project(),
                ],
            )
            .await
            .map_err(|e| Self::storage_err("adjust importance", e))?;
        if affected == 0 {
            return Err(Error::NotFound(id));
        }
        Ok(())
    }

    async fn aggregate(
        &self,
        scope: &Scope,
        filter: &ArtifactFilter,
        field: AggregateField,
        op: AggregateOp,
    ) -> Result<f64> {
        check_scope(scope)?;
        // Tag filters force the Rust path; otherwise aggregate in SQL.
        if !filter.tags_any.is_empty() {
            let artifacts = self.query_artifacts(scope, filter).await?;
            let values: Vec<f64> = artifacts
                .iter()
                .map(|a| match field {
                    AggregateField::Importance => f64::from(a.importance),
                    AggregateField::UsageCount => a.usage_count as f64,
                    AggregateField::TokenCount => a.token_count as f64,
                })
                .collect();
            let sum: f64 = values.iter().sum();
            return Ok(match op {
                AggregateOp::Sum => sum,
                AggregateOp::Avg if values.is_empty() => 0.0,
                AggregateOp::Avg => sum / values.len() as f64,
            });
        }

        let column = match field {
            AggregateField::Importance => "importance",
            AggregateField::UsageCount => "usage_count",
            AggregateField::TokenCount => "token_count",
        };
        let function = match op {
            AggregateOp::Sum => "SUM",
            AggregateOp::Avg => "AVG",
        };
        let (clauses, mut values) = filter_sql(filter);
        let sql = format!(
            "SELECT COALESCE({function}({column}), 0) FROM artifacts \
             WHERE tenant = ? AND project = ?{clauses}"
        );
        let mut all_values = vec![
            libsql::Value::Text(scope.tenant().to_string()),
            libsql::Value::Text(scope.project().to_string()),
        ];
        all_values.append(&mut values);

        let conn = self.connect()?;
        let mut rows = conn
            .query(&sql, all_values)
            .await
            .map_err(|e| Self::storage_err("aggregate", e))?;
        let row = rows
            .next()
            .await
            .map_err(|e| Self::storage_err("aggregate fetch", e))?
            .ok_or_else(|| Error::StorageUnavailable("aggregate returned no row".into()))?;
        let value: f64 = row
            .get(0)
            .map_err(|e| Error::StorageUnavailable(format!("aggregate value: {e}")))?;
        Ok(value)
    }

    async fn find_by_fingerprint(
        &self,
        scope: &Scope,
        fingerprint: &str,
    ) -> Result<Option<MemoryArtifact>> {
        check_scope(scope)?;
        let conn = self.connect()?;
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM artifacts \
             WHERE tenant = ? AND project = ? AND fingerprint = ? \
             ORDER BY created_at ASC LIMIT 1"
        );
        let mut rows = conn
            .query(
                &sql,
                params![scope.tenant(), scope.project(), fingerprint],
            )
            .await
            .map_err(|e| Self::storage_err("find by fingerprint", e))?;
        match rows
            .next()
            .await
            .map_err(|e| Self::storage_err("fingerprint fetch", e))?
        {
            Some(row) => Ok(Some(row_to_artifact(&row)?)),
            None => Ok(None),
        }
    }

    async fn list_projects(&self, tenant: &str) -> Result<Vec<String>> {
        if tenant.is_empty() {
            return Err(Error::InvalidInput("missing tenant scope".into()));
        }
        let conn = self.connect()?;
        let mut rows = conn
            .query(
                "SELECT DISTINCT project FROM artifacts WHERE tenant = ? ORDER BY project",
                params![tenant],
            )
            .await
            .map_err(|e| Self::storage_err("list projects", e))?;
        let mut projects = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| Self::storage_err("project fetch", e))?
        {
            let project: String = row
                .get(0)
                .map_err(|e| Error::StorageUnavailable(format!("project value: {e}")))?;
            projects.push(project);
        }
        Ok(projects)
    }
}

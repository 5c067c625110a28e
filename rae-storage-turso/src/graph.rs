//! `GraphStore` implementation over libSQL.

use crate::TursoStorage;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{params, Row};
use rae_core::{Entity, Error, GraphStore, GraphTriple, Result};
use tracing::debug;
use uuid::Uuid;

fn check_tenant(tenant: &str) -> Result<()> {
    if tenant.is_empty() {
        return Err(Error::InvalidInput("missing tenant scope".into()));
    }
    Ok(())
}

fn parse_uuid(text: &str) -> Result<Uuid> {
    Uuid::parse_str(text).map_err(|e| Error::StorageUnavailable(format!("bad uuid: {e}")))
}

fn row_to_entity(row: &Row) -> Result<Entity> {
    let id_text: String = row
        .get(0)
        .map_err(|e| Error::StorageUnavailable(format!("bad entity row: {e}")))?;
    let tenant: String = row
        .get(1)
        .map_err(|e| Error::StorageUnavailable(format!("bad entity row: {e}")))?;
    let canonical_name: String = row
        .get(2)
        .map_err(|e| Error::StorageUnavailable(format!("bad entity row: {e}")))?;
    let entity_type: String = row
        .get(3)
        .map_err(|e| Error::StorageUnavailable(format!("bad entity row: {e}")))?;
    let importance: f64 = row
        .get(4)
        .map_err(|e| Error::StorageUnavailable(format!("bad entity row: {e}")))?;
    Ok(Entity {
        id: parse_uuid(&id_text)?,
        tenant,
        canonical_name,
        entity_type,
        importance,
    })
}

fn row_to_triple(row: &Row) -> Result<GraphTriple> {
    let id_text: String = row
        .get(0)
        .map_err(|e| Error::StorageUnavailable(format!("bad triple row: {e}")))?;
    let tenant: String = row
        .get(1)
        .map_err(|e| Error::StorageUnavailable(format!("bad triple row: {e}")))?;
    let subject: String = row
        .get(2)
        .map_err(|e| Error::StorageUnavailable(format!("bad triple row: {e}")))?;
    let predicate: String = row
        .get(3)
        .map_err(|e| Error::StorageUnavailable(format!("bad triple row: {e}")))?;
    let object: String = row
        .get(4)
        .map_err(|e| Error::StorageUnavailable(format!("bad triple row: {e}")))?;
    let confidence: f64 = row
        .get(5)
        .map_err(|e| Error::StorageUnavailable(format!("bad triple row: {e}")))?;
    let source_artifact: String = row
        .get(6)
        .map_err(|e| Error::StorageUnavailable(format!("bad triple row: {e}")))?;
    let created_at: i64 = row
        .get(7)
        .map_err(|e| Error::StorageUnavailable(format!("bad triple row: {e}")))?;

    Ok(GraphTriple {
        id: parse_uuid(&id_text)?,
        tenant,
        subject: parse_uuid(&subject)?,
        predicate,
        object: parse_uuid(&object)?,
        confidence: confidence as f32,
        source_artifact: parse_uuid(&source_artifact)?,
        created_at: DateTime::from_timestamp_millis(created_at).unwrap_or_else(Utc::now),
    })
}

const TRIPLE_COLUMNS: &str =
    "triple_id, tenant, subject, predicate, object, confidence, source_artifact, created_at";

#[async_trait]
impl GraphStore for TursoStorage {
    async fn upsert_entity(&self, entity: &Entity) -> Result<Uuid> {
        check_tenant(&entity.tenant)?;
        let conn = self.connect()?;

        conn.execute(
            "INSERT OR IGNORE INTO graph_entities \
             (entity_id, tenant, canonical_name, entity_type, importance) \
             VALUES (?, ?, ?, ?, ?)",
            params![
                entity.id.to_string(),
                entity.tenant.clone(),
                entity.canonical_name.clone(),
                entity.entity_type.clone(),
                entity.importance,
            ],
        )
        .await
        .map_err(|e| Self::storage_err("upsert entity", e))?;

        let mut rows = conn
            .query(
                "SELECT entity_id FROM graph_entities WHERE tenant = ? AND canonical_name = ?",
                params![entity.tenant.clone(), entity.canonical_name.clone()],
            )
            .await
            .map_err(|e| Self::storage_err("entity lookup", e))?;
        let row = rows
            .next()
            .await
            .map_err(|e| Self::storage_err("entity fetch", e))?
            .ok_or_else(|| Error::StorageUnavailable("entity vanished after upsert".into()))?;
        let id_text: String = row
            .get(0)
            .map_err(|e| Error::StorageUnavailable(format!("entity id: {e}")))?;
        parse_uuid(&id_text)
    }

    async fn get_entity(&self, tenant: &str, id: Uuid) -> Result<Option<Entity>> {
        check_tenant(tenant)?;
        let conn = self.connect()?;
        let mut rows = conn
            .query(
                "SELECT entity_id, tenant, canonical_name, entity_type, importance \
                 FROM graph_entities WHERE entity_id = ? AND tenant = ?",
                params![id.to_string(), tenant],
            )
            .await
            .map_err(|e| Self::storage_err("get entity", e))?;
        match rows
            .next()
            .await
            .map_err(|e| Self::storage_err("entity fetch", e))?
        {
            Some(row) => Ok(Some(row_to_entity(&row)?)),
            None => Ok(None),
        }
    }

    async fn find_entity(&self, tenant: &str, canonical_name: &str) -> Result<Option<Entity>> {
        check_tenant(tenant)?;
        let conn = self.connect()?;
        let mut rows = conn
            .query(
                "SELECT entity_id, tenant, canonical_name, entity_type, importance \
                 FROM graph_entities WHERE tenant = ? AND canonical_name = ?",
                params![tenant, canonical_name],
            )
            .await
            .map_err(|e| Self::storage_err("find entity", e))?;
        match rows
            .next()
            .await
            .map_err(|e| Self::storage_err("entity fetch", e))?
        {
            Some(row) => Ok(Some(row_to_entity(&row)?)),
            None => Ok(None),
        }
    }

    async fn insert_triple(&self, triple: &GraphTriple) -> Result<()> {
        check_tenant(&triple.tenant)?;
        let conn = self.connect()?;
        // Dedup on (tenant, subject, predicate, object): only a
        // strictly higher confidence replaces the stored edge.
        conn.execute(
            "INSERT INTO graph_triples \
             (triple_id, tenant, subject, predicate, object, confidence, source_artifact, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(tenant, subject, predicate, object) DO UPDATE SET \
                 triple_id = excluded.triple_id, \
                 confidence = excluded.confidence, \
                 source_artifact = excluded.source_artifact, \
                 created_at = excluded.created_at \
             WHERE excluded.confidence > graph_triples.confidence",
            params![
                triple.id.to_string(),
                triple.tenant.clone(),
                triple.subject.to_string(),
                triple.predicate.clone(),
                triple.object.to_string(),
                f64::from(triple.confidence),
                triple.source_artifact.to_string(),
                triple.created_at.timestamp_millis(),
            ],
        )
        .await
        .map_err(|e| Self::storage_err("insert triple", e))?;
        debug!(triple_id = %triple.id, "triple offered");
        Ok(())
    }

    async fn neighbors(
        &self,
        tenant: &str,
        entity_id: Uuid,
        min_confidence: f32,
    ) -> Result<Vec<GraphTriple>> {
        check_tenant(tenant)?;
        let conn = self.connect()?;
        let sql = format!(
            "SELECT {TRIPLE_COLUMNS} FROM graph_triples \
             WHERE tenant = ? AND confidence >= ? AND (subject = ? OR object = ?) \
             ORDER BY triple_id"
        );
        let mut rows = conn
            .query(
                &sql,
                params![
                    tenant,
                    f64::from(min_confidence),
                    entity_id.to_string(),
                    entity_id.to_string(),
                ],
            )
            .await
            .map_err(|e| Self::storage_err("neighbors", e))?;
        let mut triples = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| Self::storage_err("neighbor fetch", e))?
        {
            triples.push(row_to_triple(&row)?);
        }
        Ok(triples)
    }

    async fn entities(&self, tenant: &str) -> Result<Vec<Entity>> {
        check_tenant(tenant)?;
        let conn = self.connect()?;
        let mut rows = conn
            .query(
                "SELECT entity_id, tenant, canonical_name, entity_type, importance \
                 FROM graph_entities WHERE tenant = ? ORDER BY entity_id",
                params![tenant],
            )
            .await
            .map_err(|e| Self::storage_err("entities", e))?;
        let mut entities = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| Self::storage_err("entity fetch", e))?
        {
            entities.push(row_to_entity(&row)?);
        }
        Ok(entities)
    }

    async fn triples(&self, tenant: &str) -> Result<Vec<GraphTriple>> {
        check_tenant(tenant)?;
        let conn = self.connect()?;
        let sql = format!(
            "SELECT {TRIPLE_COLUMNS} FROM graph_triples WHERE tenant = ? ORDER BY triple_id"
        );
        let mut rows = conn
            .query(&sql, params![tenant])
            .await
            .map_err(|e| Self::storage_err("triples", e))?;
        let mut triples = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| Self::storage_err("triple fetch", e))?
        {
            triples.push(row_to_triple(&row)?);
        }
        Ok(triples)
    }

    async fn entities_for_artifact(&self, tenant: &str, artifact_id: Uuid) -> Result<Vec<Uuid>> {
        check_tenant(tenant)?;
        let conn = self.connect()?;
        let mut rows = conn
            .query(
                "SELECT DISTINCT subject, object FROM graph_triples \
                 WHERE tenant = ? AND source_artifact = ?",
                params![tenant, artifact_id.to_string()],
            )
            .await
            .map_err(|e| Self::storage_err("entities for artifact", e))?;
        let mut ids = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| Self::storage_err("mention fetch", e))?
        {
            let subject: String = row
                .get(0)
                .map_err(|e| Error::StorageUnavailable(format!("subject: {e}")))?;
            let object: String = row
                .get(1)
                .map_err(|e| Error::StorageUnavailable(format!("object: {e}")))?;
            ids.push(parse_uuid(&subject)?);
            ids.push(parse_uuid(&object)?);
        }
        ids.sort();
        ids.dedup();
        Ok(ids)
    }

    async fn update_entity_importances(
        &self,
        tenant: &str,
        importances: &[(Uuid, f64)],
    ) -> Result<()> {
        check_tenant(tenant)?;
        let conn = self.connect()?;
        for (id, importance) in importances {
            conn.execute(
                "UPDATE graph_entities SET importance = ? WHERE entity_id = ? AND tenant = ?",
                params![*importance, id.to_string(), tenant],
            )
            .await
            .map_err(|e| Self::storage_err("update importances", e))?;
        }
        Ok(())
    }

    async fn delete_for_artifact(&self, tenant: &str, artifact_id: Uuid) -> Result<()> {
        check_tenant(tenant)?;
        let conn = self.connect()?;
        conn.execute(
            "DELETE FROM graph_triples WHERE tenant = ? AND source_artifact = ?",
            params![tenant, artifact_id.to_string()],
        )
        .await
        .map_err(|e| Self::storage_err("delete for artifact", e))?;
        Ok(())
    }
}

//! In-memory reference adapters.
//!
//! These back the working layer, the test suites, and any deployment
//! that does not configure external storage. They implement the same
//! invariant checks the durable adapters do, so behavior is identical
//! modulo persistence.

use super::{
    AccessStatsUpdate, AggregateField, AggregateOp, ArtifactFilter, GraphStore, MemoryStorage,
    VectorIndex,
};
use crate::error::Error;
use crate::types::{Entity, GraphTriple, MemoryArtifact, Scope, SemanticView};
use crate::Result;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use uuid::Uuid;

/// In-memory artifact storage.
#[derive(Debug, Default)]
pub struct InMemoryStorage {
    artifacts: RwLock<HashMap<Uuid, MemoryArtifact>>,
}

impl InMemoryStorage {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn check_scope(scope: &Scope) -> Result<()> {
        // Scope::new validated on construction; a default-deserialized
        // scope with empty tenant must still be rejected here.
        if scope.tenant().is_empty() {
            return Err(Error::InvalidInput("missing tenant scope".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl MemoryStorage for InMemoryStorage {
    async fn insert(&self, artifact: &MemoryArtifact) -> Result<()> {
        Self::check_scope(&artifact.scope)?;
        artifact.validate()?;
        let mut artifacts = self.artifacts.write();
        if artifacts.contains_key(&artifact.id) {
            return Err(Error::ConstraintViolation(format!(
                "artifact {} already exists",
                artifact.id
            )));
        }
        artifacts.insert(artifact.id, artifact.clone());
        Ok(())
    }

    async fn get(&self, scope: &Scope, id: Uuid) -> Result<Option<MemoryArtifact>> {
        Self::check_scope(scope)?;
        let artifacts = self.artifacts.read();
        Ok(artifacts
            .get(&id)
            .filter(|a| &a.scope == scope)
            .cloned())
    }

    async fn update(&self, artifact: &MemoryArtifact) -> Result<()> {
        Self::check_scope(&artifact.scope)?;
        artifact.validate()?;
        let mut artifacts = self.artifacts.write();
        let existing = artifacts
            .get(&artifact.id)
            .ok_or(Error::NotFound(artifact.id))?;
        if existing.scope != artifact.scope {
            return Err(Error::ConstraintViolation(
                "artifact scope is immutable".into(),
            ));
        }
        if existing.layer != artifact.layer && !existing.layer.can_promote_to(artifact.layer) {
            return Err(Error::ConstraintViolation(format!(
                "illegal layer transition {} -> {}",
                existing.layer, artifact.layer
            )));
        }
        artifacts.insert(artifact.id, artifact.clone());
        Ok(())
    }

    async fn delete(&self, scope: &Scope, id: Uuid) -> Result<bool> {
        Self::check_scope(scope)?;
        let mut artifacts = self.artifacts.write();
        match artifacts.get(&id) {
            Some(a) if &a.scope == scope => {
                artifacts.remove(&id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list(&self, scope: &Scope, filter: &ArtifactFilter) -> Result<Vec<MemoryArtifact>> {
        Self::check_scope(scope)?;
        let artifacts = self.artifacts.read();
        let mut rows: Vec<MemoryArtifact> = artifacts
            .values()
            .filter(|a| &a.scope == scope && filter.matches(a))
            .cloned()
            .collect();
        // Newest first, id-tiebreak for stable ordering.
        rows.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        if let Some(limit) = filter.limit {
            rows.truncate(limit);
        }
        Ok(rows)
    }

    async fn count(&self, scope: &Scope, filter: &ArtifactFilter) -> Result<u64> {
        Self::check_scope(scope)?;
        let artifacts = self.artifacts.read();
        Ok(artifacts
            .values()
            .filter(|a| &a.scope == scope && filter.matches(a))
            .count() as u64)
    }

    async fn update_access_stats(
        &self,
        scope: &Scope,
        updates: &[AccessStatsUpdate],
    ) -> Result<()> {
        Self::check_scope(scope)?;
        let mut artifacts = self.artifacts.write();
        for update in updates {
            if let Some(artifact) = artifacts.get_mut(&update.artifact_id) {
                if &artifact.scope == scope {
                    artifact.record_access(update.accessed_at);
                }
            }
        }
        Ok(())
    }

    async fn adjust_importance(&self, scope: &Scope, id: Uuid, delta: f32) -> Result<()> {
        Self::check_scope(scope)?;
        let mut artifacts = self.artifacts.write();
        let artifact = artifacts.get_mut(&id).ok_or(Error::NotFound(id))?;
        if &artifact.scope != scope {
            return Err(Error::NotFound(id));
        }
        artifact.adjust_importance(delta);
        Ok(())
    }

    async fn aggregate(
        &self,
        scope: &Scope,
        filter: &ArtifactFilter,
        field: AggregateField,
        op: AggregateOp,
    ) -> Result<f64> {
        Self::check_scope(scope)?;
        let artifacts = self.artifacts.read();
        let values: Vec<f64> = artifacts
            .values()
            .filter(|a| &a.scope == scope && filter.matches(a))
            .map(|a| match field {
                AggregateField::Importance => f64::from(a.importance),
                AggregateField::UsageCount => a.usage_count as f64,
                AggregateField::TokenCount => a.token_count as f64,
            })
            .collect();
        let sum: f64 = values.iter().sum();
        Ok(match op {
            AggregateOp::Sum => sum,
            AggregateOp::Avg => {
                if values.is_empty() {
                    0.0
                } else {
                    sum / values.len() as f64
                }
            }
        })
    }

    async fn find_by_fingerprint(
        &self,
        scope: &Scope,
        fingerprint: &str,
    ) -> Result<Option<MemoryArtifact>> {
        Self::check_scope(scope)?;
        let artifacts = self.artifacts.read();
        let mut matches: Vec<&MemoryArtifact> = artifacts
            .values()
            .filter(|a| &a.scope == scope && a.content_fingerprint() == fingerprint)
            .collect();
        matches.sort_by_key(|a| a.created_at);
        Ok(matches.first().map(|a| (*a).clone()))
    }

    async fn list_projects(&self, tenant: &str) -> Result<Vec<String>> {
        if tenant.is_empty() {
            return Err(Error::InvalidInput("missing tenant scope".into()));
        }
        let artifacts = self.artifacts.read();
        let mut projects: Vec<String> = artifacts
            .values()
            .filter(|a| a.scope.tenant() == tenant)
            .map(|a| a.scope.project().to_string())
            .collect();
        projects.sort();
        projects.dedup();
        Ok(projects)
    }
}

/// In-memory vector index with per-model separation.
#[derive(Debug, Default)]
pub struct InMemoryVectorIndex {
    // (scope, model) -> artifact -> view
    views: RwLock<HashMap<(Scope, String), HashMap<Uuid, SemanticView>>>,
}

impl InMemoryVectorIndex {
    /// Create an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

/// Cosine similarity normalized to [0, 1]. Mismatched dimensions score
/// zero rather than erroring: the index only ever compares vectors from
/// the same model, so a mismatch is a stale-view symptom, not a bug in
/// the caller.
#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }
    // Normalize from [-1, 1] to [0, 1]
    (dot / (mag_a * mag_b) + 1.0) / 2.0
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    async fn upsert(&self, scope: &Scope, view: &SemanticView) -> Result<()> {
        if scope.tenant().is_empty() {
            return Err(Error::InvalidInput("missing tenant scope".into()));
        }
        if view.vector.is_empty() {
            return Err(Error::InvalidInput("empty embedding vector".into()));
        }
        let mut views = self.views.write();
        views
            .entry((scope.clone(), view.model.clone()))
            .or_default()
            .insert(view.artifact_id, view.clone());
        Ok(())
    }

    async fn remove(&self, scope: &Scope, artifact_id: Uuid, model: Option<&str>) -> Result<()> {
        let mut views = self.views.write();
        match model {
            Some(model) => {
                if let Some(table) = views.get_mut(&(scope.clone(), model.to_string())) {
                    table.remove(&artifact_id);
                }
            }
            None => {
                for ((s, _), table) in views.iter_mut() {
                    if s == scope {
                        table.remove(&artifact_id);
                    }
                }
            }
        }
        Ok(())
    }

    async fn get(
        &self,
        scope: &Scope,
        artifact_id: Uuid,
        model: &str,
    ) -> Result<Option<SemanticView>> {
        let views = self.views.read();
        Ok(views
            .get(&(scope.clone(), model.to_string()))
            .and_then(|table| table.get(&artifact_id))
            .cloned())
    }

    async fn search(
        &self,
        scope: &Scope,
        model: &str,
        query: &[f32],
        top_k: usize,
    ) -> Result<Vec<(Uuid, f32)>> {
        if query.is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }
        let views = self.views.read();
        let Some(table) = views.get(&(scope.clone(), model.to_string())) else {
            return Ok(Vec::new());
        };
        let mut scored: Vec<(Uuid, f32)> = table
            .values()
            .map(|view| (view.artifact_id, cosine_similarity(query, &view.vector)))
            .collect();
        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        scored.truncate(top_k);
        Ok(scored)
    }
}

/// In-memory knowledge-graph store.
#[derive(Debug, Default)]
pub struct InMemoryGraphStore {
    entities: RwLock<HashMap<Uuid, Entity>>,
    // (tenant, canonical_name) -> entity id
    names: RwLock<HashMap<(String, String), Uuid>>,
    // (subject, predicate, object) -> triple
    triples: RwLock<HashMap<(Uuid, String, Uuid), GraphTriple>>,
}

impl InMemoryGraphStore {
    /// Create an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn check_tenant(tenant: &str) -> Result<()> {
        if tenant.is_empty() {
            return Err(Error::InvalidInput("missing tenant scope".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl GraphStore for InMemoryGraphStore {
    async fn upsert_entity(&self, entity: &Entity) -> Result<Uuid> {
        Self::check_tenant(&entity.tenant)?;
        let key = (entity.tenant.clone(), entity.canonical_name.clone());
        let mut names = self.names.write();
        if let Some(existing) = names.get(&key) {
            return Ok(*existing);
        }
        names.insert(key, entity.id);
        self.entities.write().insert(entity.id, entity.clone());
        Ok(entity.id)
    }

    async fn get_entity(&self, tenant: &str, id: Uuid) -> Result<Option<Entity>> {
        Self::check_tenant(tenant)?;
        Ok(self
            .entities
            .read()
            .get(&id)
            .filter(|e| e.tenant == tenant)
            .cloned())
    }

    async fn find_entity(&self, tenant: &str, canonical_name: &str) -> Result<Option<Entity>> {
        Self::check_tenant(tenant)?;
        let names = self.names.read();
        let Some(id) = names.get(&(tenant.to_string(), canonical_name.to_string())) else {
            return Ok(None);
        };
        Ok(self.entities.read().get(id).cloned())
    }

    async fn insert_triple(&self, triple: &GraphTriple) -> Result<()> {
        Self::check_tenant(&triple.tenant)?;
        let mut triples = self.triples.write();
        match triples.get(&triple.key()) {
            // Dedup: keep the highest-confidence edge; equal confidence
            // keeps the newer timestamp.
            Some(existing)
                if existing.confidence > triple.confidence
                    || (existing.confidence == triple.confidence
                        && existing.created_at >= triple.created_at) => {}
            _ => {
                triples.insert(triple.key(), triple.clone());
            }
        }
        Ok(())
    }

    async fn neighbors(
        &self,
        tenant: &str,
        entity_id: Uuid,
        min_confidence: f32,
    ) -> Result<Vec<GraphTriple>> {
        Self::check_tenant(tenant)?;
        let triples = self.triples.read();
        let mut edges: Vec<GraphTriple> = triples
            .values()
            .filter(|t| {
                t.tenant == tenant
                    && t.confidence >= min_confidence
                    && (t.subject == entity_id || t.object == entity_id)
            })
            .cloned()
            .collect();
        edges.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(edges)
    }

    async fn entities(&self, tenant: &str) -> Result<Vec<Entity>> {
        Self::check_tenant(tenant)?;
        let mut all: Vec<Entity> = self
            .entities
            .read()
            .values()
            .filter(|e| e.tenant == tenant)
            .cloned()
            .collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(all)
    }

    async fn triples(&self, tenant: &str) -> Result<Vec<GraphTriple>> {
        Self::check_tenant(tenant)?;
        let mut all: Vec<GraphTriple> = self
            .triples
            .read()
            .values()
            .filter(|t| t.tenant == tenant)
            .cloned()
            .collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(all)
    }

    async fn entities_for_artifact(&self, tenant: &str, artifact_id: Uuid) -> Result<Vec<Uuid>> {
        Self::check_tenant(tenant)?;
        let triples = self.triples.read();
        let mut ids: Vec<Uuid> = triples
            .values()
            .filter(|t| t.tenant == tenant && t.source_artifact == artifact_id)
            .flat_map(|t| [t.subject, t.object])
            .collect();
        ids.sort();
        ids.dedup();
        Ok(ids)
    }

    async fn update_entity_importances(
        &self,
        tenant: &str,
        importances: &[(Uuid, f64)],
    ) -> Result<()> {
        Self::check_tenant(tenant)?;
        let mut entities = self.entities.write();
        for (id, importance) in importances {
            if let Some(entity) = entities.get_mut(id) {
                if entity.tenant == tenant {
                    entity.importance = *importance;
                }
            }
        }
        Ok(())
    }

    async fn delete_for_artifact(&self, tenant: &str, artifact_id: Uuid) -> Result<()> {
        Self::check_tenant(tenant)?;
        self.triples
            .write()
            .retain(|_, t| !(t.tenant == tenant && t.source_artifact == artifact_id));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MemoryLayer;

    fn scope() -> Scope {
        Scope::new("t1", "p1").unwrap()
    }

    fn other_scope() -> Scope {
        Scope::new("t2", "p1").unwrap()
    }

    #[tokio::test]
    async fn test_insert_get_round_trip() {
        let store = InMemoryStorage::new();
        let artifact = MemoryArtifact::new(scope(), MemoryLayer::Semantic, "fact".into());
        store.insert(&artifact).await.unwrap();

        let fetched = store.get(&scope(), artifact.id).await.unwrap().unwrap();
        assert_eq!(fetched, artifact);
    }

    #[tokio::test]
    async fn test_tenant_isolation_on_get() {
        let store = InMemoryStorage::new();
        let artifact = MemoryArtifact::new(scope(), MemoryLayer::Semantic, "secret".into());
        store.insert(&artifact).await.unwrap();

        assert!(store
            .get(&other_scope(), artifact.id)
            .await
            .unwrap()
            .is_none());
        assert!(!store.delete(&other_scope(), artifact.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_insert_rejects_invalid_reflective() {
        let store = InMemoryStorage::new();
        let bad = MemoryArtifact::new(scope(), MemoryLayer::Reflective, "orphan".into());
        assert!(matches!(
            store.insert(&bad).await,
            Err(Error::ConstraintViolation(_))
        ));
    }

    #[tokio::test]
    async fn test_update_rejects_layer_demotion() {
        let store = InMemoryStorage::new();
        let artifact = MemoryArtifact::new(scope(), MemoryLayer::Semantic, "fact".into());
        store.insert(&artifact).await.unwrap();

        let mut demoted = artifact.clone();
        demoted.layer = MemoryLayer::Episodic;
        assert!(matches!(
            store.update(&demoted).await,
            Err(Error::ConstraintViolation(_))
        ));

        let mut promoted = artifact;
        promoted.layer = MemoryLayer::Reflective;
        promoted.provenance = vec![Uuid::new_v4()];
        store.update(&promoted).await.unwrap();
    }

    #[tokio::test]
    async fn test_adjust_importance_clamps() {
        let store = InMemoryStorage::new();
        let artifact = MemoryArtifact::new(scope(), MemoryLayer::Episodic, "x".into())
            .with_importance(0.95);
        store.insert(&artifact).await.unwrap();

        store
            .adjust_importance(&scope(), artifact.id, 0.5)
            .await
            .unwrap();
        let fetched = store.get(&scope(), artifact.id).await.unwrap().unwrap();
        assert_eq!(fetched.importance, 1.0);

        store
            .adjust_importance(&scope(), artifact.id, -5.0)
            .await
            .unwrap();
        let fetched = store.get(&scope(), artifact.id).await.unwrap().unwrap();
        assert_eq!(fetched.importance, 0.01);
    }

    #[tokio::test]
    async fn test_aggregate_avg_importance() {
        let store = InMemoryStorage::new();
        for importance in [0.2_f32, 0.4, 0.6] {
            let artifact = MemoryArtifact::new(scope(), MemoryLayer::Episodic, "x".into())
                .with_importance(importance);
            store.insert(&artifact).await.unwrap();
        }
        let avg = store
            .aggregate(
                &scope(),
                &ArtifactFilter::default(),
                AggregateField::Importance,
                AggregateOp::Avg,
            )
            .await
            .unwrap();
        assert!((avg - 0.4).abs() < 1e-6);

        let empty = store
            .aggregate(
                &other_scope(),
                &ArtifactFilter::default(),
                AggregateField::Importance,
                AggregateOp::Avg,
            )
            .await
            .unwrap();
        assert_eq!(empty, 0.0);
    }

    #[tokio::test]
    async fn test_vector_index_per_model_separation() {
        let index = InMemoryVectorIndex::new();
        let id = Uuid::new_v4();
        index
            .upsert(&scope(), &SemanticView::new(id, "short", vec![1.0, 0.0]))
            .await
            .unwrap();

        let hits = index
            .search(&scope(), "short", &[1.0, 0.0], 10)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);

        // Same scope, different model: nothing.
        let misses = index
            .search(&scope(), "long", &[1.0, 0.0], 10)
            .await
            .unwrap();
        assert!(misses.is_empty());

        // Different scope: nothing.
        let misses = index
            .search(&other_scope(), "short", &[1.0, 0.0], 10)
            .await
            .unwrap();
        assert!(misses.is_empty());
    }

    #[tokio::test]
    async fn test_vector_search_ranks_by_similarity() {
        let index = InMemoryVectorIndex::new();
        let near = Uuid::new_v4();
        let far = Uuid::new_v4();
        index
            .upsert(&scope(), &SemanticView::new(near, "m", vec![1.0, 0.0]))
            .await
            .unwrap();
        index
            .upsert(&scope(), &SemanticView::new(far, "m", vec![0.0, 1.0]))
            .await
            .unwrap();

        let hits = index.search(&scope(), "m", &[1.0, 0.1], 2).await.unwrap();
        assert_eq!(hits[0].0, near);
        assert!(hits[0].1 > hits[1].1);
    }

    #[tokio::test]
    async fn test_graph_entity_dedup_by_canonical_name() {
        let graph = InMemoryGraphStore::new();
        let first = Entity::new("t1", "rust", "technology");
        let id = graph.upsert_entity(&first).await.unwrap();

        let duplicate = Entity::new("t1", "rust", "technology");
        let deduped = graph.upsert_entity(&duplicate).await.unwrap();
        assert_eq!(id, deduped);

        // Same name under a different tenant is a distinct entity.
        let foreign = Entity::new("t2", "rust", "technology");
        let foreign_id = graph.upsert_entity(&foreign).await.unwrap();
        assert_ne!(id, foreign_id);
    }

    #[tokio::test]
    async fn test_triple_dedup_keeps_highest_confidence() {
        let graph = InMemoryGraphStore::new();
        let (s, o, src) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());

        graph
            .insert_triple(&GraphTriple::new("t1", s, "USES", o, 0.6, src))
            .await
            .unwrap();
        graph
            .insert_triple(&GraphTriple::new("t1", s, "USES", o, 0.9, src))
            .await
            .unwrap();
        graph
            .insert_triple(&GraphTriple::new("t1", s, "USES", o, 0.3, src))
            .await
            .unwrap();

        let triples = graph.triples("t1").await.unwrap();
        assert_eq!(triples.len(), 1);
        assert_eq!(triples[0].confidence, 0.9);
    }

    #[tokio::test]
    async fn test_neighbors_bidirectional() {
        let graph = InMemoryGraphStore::new();
        let (a, b, src) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        graph
            .insert_triple(&GraphTriple::new("t1", a, "IMPORTS", b, 0.8, src))
            .await
            .unwrap();

        // Traversal from the object side must find the subject.
        let from_b = graph.neighbors("t1", b, 0.5).await.unwrap();
        assert_eq!(from_b.len(), 1);
        assert_eq!(from_b[0].subject, a);

        // Confidence threshold filters.
        assert!(graph.neighbors("t1", b, 0.9).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_for_artifact_cascades() {
        let graph = InMemoryGraphStore::new();
        let (a, b, src) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        graph
            .insert_triple(&GraphTriple::new("t1", a, "USES", b, 0.8, src))
            .await
            .unwrap();
        graph.delete_for_artifact("t1", src).await.unwrap();
        assert!(graph.triples("t1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_empty_tenant_rejected_everywhere() {
        let graph = InMemoryGraphStore::new();
        assert!(graph.entities("").await.is_err());
        let store = InMemoryStorage::new();
        assert!(store.list_projects("").await.is_err());
    }
}

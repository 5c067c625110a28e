//! # Storage Abstraction
//!
//! Three narrow, replaceable persistence seams: artifact storage
//! ([`MemoryStorage`]), the per-model vector index ([`VectorIndex`]), and
//! the knowledge-graph triple store ([`GraphStore`]).
//!
//! Every operation takes an explicit tenant scope; adapters MUST reject
//! calls whose scope is missing or empty. Transient I/O failures map to
//! [`Error::StorageUnavailable`] (retriable); invariant breaches map to
//! [`Error::ConstraintViolation`] (fatal).
//!
//! [`Error::StorageUnavailable`]: crate::error::Error::StorageUnavailable
//! [`Error::ConstraintViolation`]: crate::error::Error::ConstraintViolation

pub mod memory;

use crate::types::{Entity, GraphTriple, MemoryArtifact, MemoryLayer, Scope, SemanticView};
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Filter for listing and counting artifacts inside a scope.
///
/// The scope itself is always an explicit parameter; the filter narrows
/// within it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ArtifactFilter {
    /// Restrict to these layers (empty = all layers).
    pub layers: Vec<MemoryLayer>,
    /// Match artifacts carrying at least one of these tags.
    pub tags_any: Vec<String>,
    /// Created strictly before this instant.
    pub created_before: Option<DateTime<Utc>>,
    /// Created at or after this instant.
    pub created_after: Option<DateTime<Utc>>,
    /// Last accessed strictly before this instant.
    pub accessed_before: Option<DateTime<Utc>>,
    /// Restrict by consolidation flag.
    pub consolidated: Option<bool>,
    /// Maximum rows returned (listing only).
    pub limit: Option<usize>,
}

impl ArtifactFilter {
    /// Filter to a single layer.
    #[must_use]
    pub fn layer(layer: MemoryLayer) -> Self {
        Self {
            layers: vec![layer],
            ..Self::default()
        }
    }

    /// Whether an artifact passes this filter (scope not considered).
    #[must_use]
    pub fn matches(&self, artifact: &MemoryArtifact) -> bool {
        if !self.layers.is_empty() && !self.layers.contains(&artifact.layer) {
            return false;
        }
        if !self.tags_any.is_empty()
            && !artifact.tags.iter().any(|t| self.tags_any.contains(t))
        {
            return false;
        }
        if let Some(before) = self.created_before {
            if artifact.created_at >= before {
                return false;
            }
        }
        if let Some(after) = self.created_after {
            if artifact.created_at < after {
                return false;
            }
        }
        if let Some(before) = self.accessed_before {
            if artifact.last_accessed_at >= before {
                return false;
            }
        }
        if let Some(flag) = self.consolidated {
            if artifact.consolidated != flag {
                return false;
            }
        }
        true
    }
}

/// Numeric artifact field usable in aggregates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateField {
    /// Dynamic importance.
    Importance,
    /// Access counter.
    UsageCount,
    /// Estimated token count.
    TokenCount,
}

/// Aggregate operation over a numeric field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateOp {
    /// Sum over matching artifacts.
    Sum,
    /// Arithmetic mean over matching artifacts (0 when none match).
    Avg,
}

/// A single access-statistics update; adapters prefer applying these in
/// batch.
#[derive(Debug, Clone, PartialEq)]
pub struct AccessStatsUpdate {
    /// Artifact to touch.
    pub artifact_id: Uuid,
    /// Access instant.
    pub accessed_at: DateTime<Utc>,
}

/// Transactional, filterable artifact storage.
#[async_trait]
pub trait MemoryStorage: Send + Sync {
    /// Insert a new artifact. The artifact's own invariants (importance
    /// bounds, reflective provenance) are enforced here.
    async fn insert(&self, artifact: &MemoryArtifact) -> Result<()>;

    /// Fetch by id within a scope. `None` when absent — including when
    /// the id exists under a different scope.
    async fn get(&self, scope: &Scope, id: Uuid) -> Result<Option<MemoryArtifact>>;

    /// Replace an existing artifact. Rejects scope changes and layer
    /// demotions with [`crate::error::Error::ConstraintViolation`].
    async fn update(&self, artifact: &MemoryArtifact) -> Result<()>;

    /// Delete by id within a scope. Returns whether a row was removed.
    async fn delete(&self, scope: &Scope, id: Uuid) -> Result<bool>;

    /// List artifacts matching a filter, newest first.
    async fn list(&self, scope: &Scope, filter: &ArtifactFilter) -> Result<Vec<MemoryArtifact>>;

    /// Count artifacts matching a filter.
    async fn count(&self, scope: &Scope, filter: &ArtifactFilter) -> Result<u64>;

    /// Apply access-statistics updates in batch.
    async fn update_access_stats(
        &self,
        scope: &Scope,
        updates: &[AccessStatsUpdate],
    ) -> Result<()>;

    /// Atomically add `delta` to an artifact's importance, clamping to
    /// the legal range.
    async fn adjust_importance(&self, scope: &Scope, id: Uuid, delta: f32) -> Result<()>;

    /// Aggregate a numeric field over matching artifacts.
    async fn aggregate(
        &self,
        scope: &Scope,
        filter: &ArtifactFilter,
        field: AggregateField,
        op: AggregateOp,
    ) -> Result<f64>;

    /// Find an artifact in scope by content fingerprint (store-time
    /// deduplication support).
    async fn find_by_fingerprint(
        &self,
        scope: &Scope,
        fingerprint: &str,
    ) -> Result<Option<MemoryArtifact>>;

    /// Distinct projects known for a tenant. Lets background workers
    /// walk every scope without a side registry.
    async fn list_projects(&self, tenant: &str) -> Result<Vec<String>>;
}

/// Per-model approximate-nearest-neighbor index over semantic views.
///
/// Models never mix: a search against model M only ever sees vectors
/// generated by M. Adapters may implement exact top-k; the contract is
/// "top-k by cosine similarity, descending, ties by artifact id".
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Insert or replace the view for (artifact, model) in a scope.
    async fn upsert(&self, scope: &Scope, view: &SemanticView) -> Result<()>;

    /// Remove views for an artifact; `model = None` removes all models.
    async fn remove(&self, scope: &Scope, artifact_id: Uuid, model: Option<&str>) -> Result<()>;

    /// Fetch a stored view.
    async fn get(
        &self,
        scope: &Scope,
        artifact_id: Uuid,
        model: &str,
    ) -> Result<Option<SemanticView>>;

    /// Top-k artifacts by cosine similarity under one model.
    async fn search(
        &self,
        scope: &Scope,
        model: &str,
        query: &[f32],
        top_k: usize,
    ) -> Result<Vec<(Uuid, f32)>>;
}

/// Triple store with traversal support for the knowledge graph.
///
/// The graph is tenant-wide (entities are shared across a tenant's
/// projects) and is an index over artifacts, not a memory layer.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Insert an entity, or return the existing id when the canonical
    /// name is already present for the tenant.
    async fn upsert_entity(&self, entity: &Entity) -> Result<Uuid>;

    /// Fetch an entity by id.
    async fn get_entity(&self, tenant: &str, id: Uuid) -> Result<Option<Entity>>;

    /// Fetch an entity by canonical name.
    async fn find_entity(&self, tenant: &str, canonical_name: &str) -> Result<Option<Entity>>;

    /// Insert a triple, deduplicating on (subject, predicate, object):
    /// only the highest-confidence edge is retained.
    async fn insert_triple(&self, triple: &GraphTriple) -> Result<()>;

    /// Edges touching an entity in either direction, at or above a
    /// confidence threshold.
    async fn neighbors(
        &self,
        tenant: &str,
        entity_id: Uuid,
        min_confidence: f32,
    ) -> Result<Vec<GraphTriple>>;

    /// All entities for a tenant.
    async fn entities(&self, tenant: &str) -> Result<Vec<Entity>>;

    /// All triples for a tenant.
    async fn triples(&self, tenant: &str) -> Result<Vec<GraphTriple>>;

    /// Entity ids mentioned by an artifact (via triple provenance).
    async fn entities_for_artifact(&self, tenant: &str, artifact_id: Uuid) -> Result<Vec<Uuid>>;

    /// Rewrite accumulated entity importances (PageRank output).
    async fn update_entity_importances(
        &self,
        tenant: &str,
        importances: &[(Uuid, f64)],
    ) -> Result<()>;

    /// Drop all triples extracted from an artifact (pruning cascade).
    async fn delete_for_artifact(&self, tenant: &str, artifact_id: Uuid) -> Result<()>;
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A node in the per-tenant knowledge graph.
///
/// Canonical names are unique per tenant; the extractor folds case and
/// resolves aliases before insertion. `importance` holds the latest
/// PageRank score and is rewritten on every recompute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// Stable identifier.
    pub id: Uuid,
    /// Owning tenant.
    pub tenant: String,
    /// Canonical (case-folded, alias-resolved) name.
    pub canonical_name: String,
    /// Type tag, e.g. `"technology"`, `"person"`, `"concept"`.
    pub entity_type: String,
    /// Accumulated PageRank importance.
    pub importance: f64,
}

impl Entity {
    /// Create an entity with zero accumulated importance.
    #[must_use]
    pub fn new(
        tenant: impl Into<String>,
        canonical_name: impl Into<String>,
        entity_type: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant: tenant.into(),
            canonical_name: canonical_name.into(),
            entity_type: entity_type.into(),
            importance: 0.0,
        }
    }
}

/// A subject–predicate–object edge in the knowledge graph.
///
/// Triples are immutable once confidence-verified; corrections are
/// expressed as a new triple with a newer timestamp. The store
/// deduplicates on (subject, predicate, object), keeping only the
/// highest-confidence edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphTriple {
    /// Stable identifier.
    pub id: Uuid,
    /// Owning tenant.
    pub tenant: String,
    /// Subject entity id.
    pub subject: Uuid,
    /// Relation type, short symbol such as `USES` or `PART_OF`.
    pub predicate: String,
    /// Object entity id.
    pub object: Uuid,
    /// Extraction confidence in [0, 1].
    pub confidence: f32,
    /// Artifact the triple was extracted from (provenance).
    pub source_artifact: Uuid,
    /// Extraction timestamp.
    pub created_at: DateTime<Utc>,
}

impl GraphTriple {
    /// Create a triple with a fresh id and the current timestamp.
    #[must_use]
    pub fn new(
        tenant: impl Into<String>,
        subject: Uuid,
        predicate: impl Into<String>,
        object: Uuid,
        confidence: f32,
        source_artifact: Uuid,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant: tenant.into(),
            subject,
            predicate: predicate.into(),
            object,
            confidence: confidence.clamp(0.0, 1.0),
            source_artifact,
            created_at: Utc::now(),
        }
    }

    /// Dedup key: the (subject, predicate, object) tuple.
    #[must_use]
    pub fn key(&self) -> (Uuid, String, Uuid) {
        (self.subject, self.predicate.clone(), self.object)
    }

    /// Traversal edge weight: the reciprocal of confidence, so
    /// high-confidence edges are "short" for shortest-path queries.
    #[must_use]
    pub fn edge_weight(&self) -> f64 {
        if self.confidence <= f32::EPSILON {
            f64::INFINITY
        } else {
            1.0 / f64::from(self.confidence)
        }
    }
}

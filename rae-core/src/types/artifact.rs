use super::scope::Scope;
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

// ============================================================================
// Validation Constants
// ============================================================================

/// Minimum importance. The floor guarantees no artifact is
/// mathematically erased by decay; removal is pruning's job.
pub const IMPORTANCE_FLOOR: f32 = 0.01;

/// Maximum importance.
pub const IMPORTANCE_CEILING: f32 = 1.0;

/// Maximum artifact content length (100KB).
///
/// Prevents unbounded input strings from exhausting memory during
/// serialization or storage operations.
pub const MAX_CONTENT_LEN: usize = 100_000;

/// Maximum number of tags per artifact.
pub const MAX_TAG_COUNT: usize = 64;

/// Maximum number of metadata entries per artifact.
pub const MAX_METADATA_ENTRIES: usize = 128;

/// Token count at which the density sub-score saturates.
pub const TOKEN_DENSITY_CEILING: usize = 500;

// ============================================================================
// Layer
// ============================================================================

/// Lifecycle category of a memory artifact.
///
/// Transitions are monotonic: episodic → semantic → reflective
/// (consolidation only flows up); nothing demotes. `Working` is
/// transient, per-query state that is never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryLayer {
    /// Raw experience, created on every ingest; retention-bounded.
    Episodic,
    /// Consolidated or explicitly ingested facts; not auto-pruned.
    Semantic,
    /// Insights produced by the reflection engine; never auto-pruned.
    Reflective,
    /// Per-query scratch space, discarded at request end.
    Working,
}

impl MemoryLayer {
    /// Consolidation rank. Higher ranks are "further up" the lifecycle;
    /// `Working` sits outside the promotion chain.
    #[must_use]
    pub fn rank(self) -> u8 {
        match self {
            MemoryLayer::Episodic => 0,
            MemoryLayer::Semantic => 1,
            MemoryLayer::Reflective => 2,
            MemoryLayer::Working => u8::MAX,
        }
    }

    /// Whether promotion from `self` to `target` is allowed.
    #[must_use]
    pub fn can_promote_to(self, target: MemoryLayer) -> bool {
        if matches!(self, MemoryLayer::Working) || matches!(target, MemoryLayer::Working) {
            return false;
        }
        target.rank() > self.rank()
    }
}

impl std::fmt::Display for MemoryLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MemoryLayer::Episodic => write!(f, "episodic"),
            MemoryLayer::Semantic => write!(f, "semantic"),
            MemoryLayer::Reflective => write!(f, "reflective"),
            MemoryLayer::Working => write!(f, "working"),
        }
    }
}

impl std::str::FromStr for MemoryLayer {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "episodic" => Ok(MemoryLayer::Episodic),
            "semantic" => Ok(MemoryLayer::Semantic),
            "reflective" => Ok(MemoryLayer::Reflective),
            "working" => Ok(MemoryLayer::Working),
            other => Err(Error::InvalidInput(format!("unknown layer '{other}'"))),
        }
    }
}

// ============================================================================
// Artifact
// ============================================================================

/// A single memory record — the atom of the system.
///
/// Artifacts carry their own usage statistics and dynamic importance so
/// the scoring engine can rank them without auxiliary lookups. Embeddings
/// live in [`SemanticView`]s, never on the artifact itself: views are a
/// local cache and may be regenerated at any time without affecting
/// identity.
///
/// # Examples
///
/// ```
/// use rae_core::{MemoryArtifact, MemoryLayer, Scope};
///
/// let scope = Scope::new("acme", "support").unwrap();
/// let artifact = MemoryArtifact::new(
///     scope,
///     MemoryLayer::Semantic,
///     "PostgreSQL supports JSONB columns".to_string(),
/// )
/// .with_tags(vec!["db".into(), "postgres".into()]);
///
/// assert!(artifact.token_count > 0);
/// assert_eq!(artifact.usage_count, 0);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryArtifact {
    /// Stable identifier.
    pub id: Uuid,
    /// Owning (tenant, project) scope.
    pub scope: Scope,
    /// Lifecycle layer.
    pub layer: MemoryLayer,
    /// Raw textual content.
    pub content: String,
    /// Free-form structured metadata. BTreeMap keeps serialization
    /// order stable, which keeps dedup fingerprints stable.
    pub metadata: BTreeMap<String, serde_json::Value>,
    /// Tag set for lexical filtering.
    pub tags: Vec<String>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last retrieval or explicit access.
    pub last_accessed_at: DateTime<Utc>,
    /// Number of times the artifact has been accessed.
    pub usage_count: u64,
    /// Dynamic importance in `[IMPORTANCE_FLOOR, IMPORTANCE_CEILING]`.
    pub importance: f32,
    /// Optional explicit user rating in [0, 1].
    pub user_rating: Option<f32>,
    /// Whether this artifact has been consolidated upward.
    pub consolidated: bool,
    /// Parent artifact ids. Mandatory (non-empty) for reflective
    /// artifacts.
    pub provenance: Vec<Uuid>,
    /// Estimated token count of `content`.
    pub token_count: usize,
}

impl MemoryArtifact {
    /// Create a new artifact with default importance and a fresh id.
    ///
    /// `token_count` is estimated from the content; callers with an
    /// exact count can overwrite it.
    #[must_use]
    pub fn new(scope: Scope, layer: MemoryLayer, content: String) -> Self {
        let token_count = estimate_tokens(&content);
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            scope,
            layer,
            content,
            metadata: BTreeMap::new(),
            tags: Vec::new(),
            created_at: now,
            last_accessed_at: now,
            usage_count: 0,
            importance: 0.5,
            user_rating: None,
            consolidated: false,
            provenance: Vec::new(),
            token_count,
        }
    }

    /// Builder-style tag assignment.
    #[must_use]
    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    /// Builder-style importance assignment (clamped).
    #[must_use]
    pub fn with_importance(mut self, importance: f32) -> Self {
        self.importance = clamp_importance(importance);
        self
    }

    /// Builder-style provenance assignment.
    #[must_use]
    pub fn with_provenance(mut self, provenance: Vec<Uuid>) -> Self {
        self.provenance = provenance;
        self
    }

    /// Builder-style metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Record an access at `now`, bumping usage statistics.
    pub fn record_access(&mut self, now: DateTime<Utc>) {
        self.usage_count = self.usage_count.saturating_add(1);
        self.last_accessed_at = now;
    }

    /// Apply an importance delta, clamping to the legal range.
    pub fn adjust_importance(&mut self, delta: f32) {
        self.importance = clamp_importance(self.importance + delta);
    }

    /// Age in fractional days relative to `now`.
    #[must_use]
    pub fn age_days(&self, now: DateTime<Utc>) -> f64 {
        let secs = (now - self.created_at).num_seconds().max(0);
        secs as f64 / 86_400.0
    }

    /// Days since the artifact was last accessed, relative to `now`.
    #[must_use]
    pub fn days_since_access(&self, now: DateTime<Utc>) -> f64 {
        let secs = (now - self.last_accessed_at).num_seconds().max(0);
        secs as f64 / 86_400.0
    }

    /// Stable content fingerprint used for store-time deduplication.
    #[must_use]
    pub fn content_fingerprint(&self) -> String {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(self.scope.tenant().as_bytes());
        hasher.update(b"\x1f");
        hasher.update(self.scope.project().as_bytes());
        hasher.update(b"\x1f");
        hasher.update(self.content.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Validate the artifact's own invariants.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for size violations and
    /// [`Error::ConstraintViolation`] for a reflective artifact without
    /// provenance or an out-of-range importance.
    pub fn validate(&self) -> Result<()> {
        if self.content.len() > MAX_CONTENT_LEN {
            return Err(Error::InvalidInput(format!(
                "content exceeds {MAX_CONTENT_LEN} bytes"
            )));
        }
        if self.tags.len() > MAX_TAG_COUNT {
            return Err(Error::InvalidInput(format!(
                "more than {MAX_TAG_COUNT} tags"
            )));
        }
        if self.metadata.len() > MAX_METADATA_ENTRIES {
            return Err(Error::InvalidInput(format!(
                "more than {MAX_METADATA_ENTRIES} metadata entries"
            )));
        }
        if !(IMPORTANCE_FLOOR..=IMPORTANCE_CEILING).contains(&self.importance) {
            return Err(Error::ConstraintViolation(format!(
                "importance {} outside [{IMPORTANCE_FLOOR}, {IMPORTANCE_CEILING}]",
                self.importance
            )));
        }
        if self.layer == MemoryLayer::Reflective && self.provenance.is_empty() {
            return Err(Error::ConstraintViolation(
                "reflective artifact must cite at least one parent".into(),
            ));
        }
        Ok(())
    }
}

/// Clamp an importance value into the legal range.
#[must_use]
pub(crate) fn clamp_importance(value: f32) -> f32 {
    value.clamp(IMPORTANCE_FLOOR, IMPORTANCE_CEILING)
}

/// Rough token estimate: one token per four characters, minimum one for
/// non-empty content.
#[must_use]
pub(crate) fn estimate_tokens(content: &str) -> usize {
    if content.is_empty() {
        0
    } else {
        content.chars().count().div_ceil(4)
    }
}

// ============================================================================
// Semantic View
// ============================================================================

/// Per-model embedding cache for an artifact.
///
/// An artifact may have zero, one, or many views — one per embedding
/// model that has seen it. Views are local cache, never canonical truth;
/// federation never transmits them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SemanticView {
    /// Owning artifact.
    pub artifact_id: Uuid,
    /// Embedding model identifier (provider-defined string).
    pub model: String,
    /// Dimensionality of `vector`.
    pub dimension: usize,
    /// The embedding itself.
    pub vector: Vec<f32>,
    /// When this view was generated.
    pub generated_at: DateTime<Utc>,
}

impl SemanticView {
    /// Create a view, deriving `dimension` from the vector.
    #[must_use]
    pub fn new(artifact_id: Uuid, model: impl Into<String>, vector: Vec<f32>) -> Self {
        Self {
            artifact_id,
            model: model.into(),
            dimension: vector.len(),
            vector,
            generated_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scope() -> Scope {
        Scope::new("t", "p").unwrap()
    }

    #[test]
    fn test_layer_promotion_is_monotonic() {
        assert!(MemoryLayer::Episodic.can_promote_to(MemoryLayer::Semantic));
        assert!(MemoryLayer::Episodic.can_promote_to(MemoryLayer::Reflective));
        assert!(MemoryLayer::Semantic.can_promote_to(MemoryLayer::Reflective));

        assert!(!MemoryLayer::Semantic.can_promote_to(MemoryLayer::Episodic));
        assert!(!MemoryLayer::Reflective.can_promote_to(MemoryLayer::Semantic));
        assert!(!MemoryLayer::Working.can_promote_to(MemoryLayer::Semantic));
        assert!(!MemoryLayer::Episodic.can_promote_to(MemoryLayer::Working));
    }

    #[test]
    fn test_layer_round_trips_through_str() {
        for layer in [
            MemoryLayer::Episodic,
            MemoryLayer::Semantic,
            MemoryLayer::Reflective,
            MemoryLayer::Working,
        ] {
            let parsed: MemoryLayer = layer.to_string().parse().unwrap();
            assert_eq!(parsed, layer);
        }
        assert!("graph".parse::<MemoryLayer>().is_err());
    }

    #[test]
    fn test_token_estimation() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abc"), 1);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }

    #[test]
    fn test_importance_clamping() {
        let a = MemoryArtifact::new(scope(), MemoryLayer::Episodic, "x".into())
            .with_importance(7.0);
        assert_eq!(a.importance, IMPORTANCE_CEILING);

        let b = MemoryArtifact::new(scope(), MemoryLayer::Episodic, "x".into())
            .with_importance(-1.0);
        assert_eq!(b.importance, IMPORTANCE_FLOOR);
    }

    #[test]
    fn test_adjust_importance_clamps_at_floor() {
        let mut a = MemoryArtifact::new(scope(), MemoryLayer::Episodic, "x".into())
            .with_importance(0.02);
        a.adjust_importance(-0.5);
        assert_eq!(a.importance, IMPORTANCE_FLOOR);
    }

    #[test]
    fn test_reflective_requires_provenance() {
        let bad = MemoryArtifact::new(scope(), MemoryLayer::Reflective, "insight".into());
        assert!(matches!(
            bad.validate(),
            Err(Error::ConstraintViolation(_))
        ));

        let good = MemoryArtifact::new(scope(), MemoryLayer::Reflective, "insight".into())
            .with_provenance(vec![Uuid::new_v4()]);
        assert!(good.validate().is_ok());
    }

    #[test]
    fn test_record_access_bumps_stats() {
        let mut a = MemoryArtifact::new(scope(), MemoryLayer::Episodic, "x".into());
        let later = a.created_at + chrono::Duration::days(3);
        a.record_access(later);
        assert_eq!(a.usage_count, 1);
        assert_eq!(a.last_accessed_at, later);
    }

    #[test]
    fn test_content_fingerprint_scoped_by_tenant() {
        let a = MemoryArtifact::new(scope(), MemoryLayer::Semantic, "same".into());
        let other = Scope::new("t2", "p").unwrap();
        let b = MemoryArtifact::new(other, MemoryLayer::Semantic, "same".into());
        assert_ne!(a.content_fingerprint(), b.content_fingerprint());
    }

    #[test]
    fn test_semantic_view_dimension_derived() {
        let view = SemanticView::new(Uuid::new_v4(), "mini", vec![0.1, 0.2, 0.3]);
        assert_eq!(view.dimension, 3);
    }
}

//! # Hybrid Retrieval Pipeline
//!
//! A five-stage cascade: lexical prefilter, short-vector recall,
//! long-vector rerank, graph expansion, reflective bonus, then final
//! ranking. Each stage narrows the pool; a stage that cannot run is
//! skipped and annotated, never raised.

pub mod cache;
mod mmr;
mod pipeline;

pub use cache::{QueryCache, QueryCacheMetrics};
pub use mmr::mmr_reorder;
pub use pipeline::{HybridRetriever, RetrieverParts};

use crate::scoring::SubScores;
use crate::storage::ArtifactFilter;
use crate::types::MemoryArtifact;
use serde::{Deserialize, Serialize};

/// A named pipeline stage, for skip annotations and ranking provenance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// BM25 lexical prefilter (Math-1).
    Lexical,
    /// ANN recall with the cheap embedding model.
    ShortVector,
    /// Six-factor rerank with the expensive model (Math-2).
    LongRerank,
    /// Knowledge-graph neighborhood expansion.
    GraphExpansion,
    /// Szubar boost/demotion from reflective traces.
    ReflectiveBonus,
    /// A federated peer consulted for this query.
    Federation,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Stage::Lexical => "lexical",
            Stage::ShortVector => "short_vector",
            Stage::LongRerank => "long_rerank",
            Stage::GraphExpansion => "graph_expansion",
            Stage::ReflectiveBonus => "reflective_bonus",
            Stage::Federation => "federation",
        };
        write!(f, "{name}")
    }
}

/// A stage the pipeline had to skip, and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedStage {
    /// Which stage.
    pub stage: Stage,
    /// Operator-readable reason.
    pub reason: String,
}

/// Options controlling one retrieval.
#[derive(Debug, Clone)]
pub struct RetrievalOptions {
    /// Maximum results returned.
    pub k_final: usize,
    /// Narrowing filter within the scope.
    pub filter: ArtifactFilter,
    /// Run the graph-expansion stage and synthesize a context string.
    pub expand_graph: bool,
    /// Apply diversity-aware (MMR) re-ordering to the final ranking.
    pub apply_mmr: bool,
}

impl Default for RetrievalOptions {
    fn default() -> Self {
        Self {
            k_final: 10,
            filter: ArtifactFilter::default(),
            expand_graph: false,
            apply_mmr: false,
        }
    }
}

impl RetrievalOptions {
    /// Options returning at most `k_final` results.
    #[must_use]
    pub fn top_k(k_final: usize) -> Self {
        Self {
            k_final,
            ..Self::default()
        }
    }

    /// Stable fingerprint over the options, for cache keys.
    #[must_use]
    pub fn fingerprint_material(&self) -> String {
        format!(
            "k={};layers={:?};tags={:?};graph={};mmr={}",
            self.k_final, self.filter.layers, self.filter.tags_any, self.expand_graph,
            self.apply_mmr
        )
    }
}

/// One ranked artifact leaving the pipeline.
#[derive(Debug, Clone)]
pub struct RankedArtifact {
    /// The artifact.
    pub artifact: MemoryArtifact,
    /// Composite score in [0, 1] after all bonuses.
    pub composite: f64,
    /// The six sub-scores behind the composite.
    pub sub_scores: SubScores,
    /// Which stages produced or adjusted this ranking, in order.
    pub ranking_provenance: Vec<String>,
}

/// Output of one retrieval.
#[derive(Debug, Clone, Default)]
pub struct RetrievalResult {
    /// Ranked artifacts, best first, length ≤ `k_final`.
    pub results: Vec<RankedArtifact>,
    /// True when any stage was skipped or degraded.
    pub degraded: bool,
    /// The skipped stages, with reasons.
    pub skipped_stages: Vec<SkippedStage>,
    /// Synthesized graph context, when expansion was requested and ran.
    pub graph_context: Option<String>,
}

impl RetrievalResult {
    /// Empty result with no annotations.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Record a skipped stage and flip the degraded flag.
    pub fn mark_skipped(&mut self, stage: Stage, reason: impl Into<String>) {
        self.degraded = true;
        self.skipped_stages.push(SkippedStage {
            stage,
            reason: reason.into(),
        });
    }
}

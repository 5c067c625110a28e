//! # Scoring Engine
//!
//! Three layers of ranking machinery:
//!
//! - **Math-1** ([`lexical`]): cheap lexical heuristics — BM25 over
//!   content and tags — used by the retrieval prefilter.
//! - **Math-2** (this module): the probabilistic six-factor composite
//!   score. Deterministic given the same inputs.
//! - **Math-3** ([`bandit`]): adaptive per-tenant weighting via Thompson
//!   sampling over reward history.

pub mod bandit;
pub mod lexical;
mod weights;

pub use bandit::WeightBandit;
pub use weights::ScoreWeights;

use crate::clock::SharedClock;
use crate::error::{Error, Result};
use crate::storage::memory::cosine_similarity;
use crate::types::{MemoryArtifact, SemanticView, TOKEN_DENSITY_CEILING};
use chrono::{DateTime, Utc};

/// The six sub-scores behind a composite score. Each lies in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Default, serde::Serialize, serde::Deserialize)]
pub struct SubScores {
    /// `0.8·cosine(query, artifact) + 0.2·importance`, or the
    /// importance share alone when no vector is available.
    pub relevance: f64,
    /// Current dynamic importance.
    pub importance: f64,
    /// Usage-aware exponential freshness.
    pub recency: f64,
    /// Normalized PageRank of mentioned entities.
    pub centrality: f64,
    /// One minus mean similarity to the rest of the batch.
    pub diversity: f64,
    /// `min(1, tokens / 500)`.
    pub density: f64,
}

impl SubScores {
    /// Weighted combination into the composite score.
    #[must_use]
    pub fn composite(&self, weights: &ScoreWeights) -> f64 {
        let raw = self.relevance * weights.relevance
            + self.importance * weights.importance
            + self.recency * weights.recency
            + self.centrality * weights.centrality
            + self.diversity * weights.diversity
            + self.density * weights.density;
        raw.clamp(0.0, 1.0)
    }
}

/// A candidate entering the Math-2 scorer.
#[derive(Debug, Clone)]
pub struct ScoringCandidate {
    /// The artifact being ranked.
    pub artifact: MemoryArtifact,
    /// Embedding under the query's model, when one exists. A view from
    /// a different model is a hard error, not a silent zero.
    pub view: Option<SemanticView>,
    /// Normalized centrality in [0, 1], computed by the caller from the
    /// knowledge graph.
    pub centrality: f64,
}

/// A scored candidate leaving the Math-2 scorer.
#[derive(Debug, Clone)]
pub struct ScoredCandidate {
    /// The artifact being ranked.
    pub artifact: MemoryArtifact,
    /// Composite score in [0, 1].
    pub composite: f64,
    /// The six factors behind it.
    pub sub_scores: SubScores,
}

/// Deterministic total order for ranked candidates: composite desc,
/// then importance desc, then newer first, then id asc.
pub(crate) fn rank_ordering(a: &ScoredCandidate, b: &ScoredCandidate) -> std::cmp::Ordering {
    b.composite
        .partial_cmp(&a.composite)
        .unwrap_or(std::cmp::Ordering::Equal)
        .then_with(|| {
            b.artifact
                .importance
                .partial_cmp(&a.artifact.importance)
                .unwrap_or(std::cmp::Ordering::Equal)
        })
        .then_with(|| b.artifact.created_at.cmp(&a.artifact.created_at))
        .then_with(|| a.artifact.id.cmp(&b.artifact.id))
}

/// The Math-2 scoring engine.
///
/// Stateless and freely shared; all inputs arrive per call, so two
/// calls with identical inputs produce identical outputs.
#[derive(Clone)]
pub struct ScoringEngine {
    clock: SharedClock,
    /// Daily base decay rate feeding the recency factor.
    decay_base_rate: f64,
}

impl ScoringEngine {
    /// Create an engine over a clock and the tenant's decay rate.
    #[must_use]
    pub fn new(clock: SharedClock, decay_base_rate: f64) -> Self {
        Self {
            clock,
            decay_base_rate,
        }
    }

    /// Score a batch of candidates against a query embedding.
    ///
    /// `query` carries the model name alongside the vector; every
    /// candidate view must come from the same model.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ModelMismatch`] when a candidate's view was
    /// generated by a different model than the query embedding.
    pub fn score_batch(
        &self,
        query: Option<(&str, &[f32])>,
        candidates: &[ScoringCandidate],
        weights: &ScoreWeights,
    ) -> Result<Vec<ScoredCandidate>> {
        let now = self.clock.now();

        if let Some((model, _)) = query {
            for candidate in candidates {
                if let Some(view) = &candidate.view {
                    if view.model != model {
                        return Err(Error::ModelMismatch {
                            expected: model.to_string(),
                            actual: view.model.clone(),
                        });
                    }
                }
            }
        }

        let diversity = batch_diversity(candidates);

        let mut scored: Vec<ScoredCandidate> = candidates
            .iter()
            .zip(diversity)
            .map(|(candidate, diversity)| {
                let artifact = &candidate.artifact;
                let sub_scores = SubScores {
                    relevance: relevance_score(query, candidate),
                    importance: f64::from(artifact.importance),
                    recency: recency_score(artifact, now, self.decay_base_rate),
                    centrality: candidate.centrality.clamp(0.0, 1.0),
                    diversity,
                    density: density_score(artifact.token_count),
                };
                ScoredCandidate {
                    artifact: artifact.clone(),
                    composite: sub_scores.composite(weights),
                    sub_scores,
                }
            })
            .collect();

        scored.sort_by(rank_ordering);
        Ok(scored)
    }
}

/// Relevance: `0.8·cosine + 0.2·importance`. Without a vector pair only
/// the importance share contributes — the vector contribution is
/// dropped, not faked.
fn relevance_score(query: Option<(&str, &[f32])>, candidate: &ScoringCandidate) -> f64 {
    let importance_share = 0.2 * f64::from(candidate.artifact.importance);
    match (query, &candidate.view) {
        (Some((_, query_vec)), Some(view)) => {
            0.8 * f64::from(cosine_similarity(query_vec, &view.vector)) + importance_share
        }
        _ => importance_share,
    }
}

/// Recency with usage-slowed decay:
/// `effective = base / (ln(1 + usage) + 1)`, `recency = exp(-effective · age)`.
/// Frequently used artifacts stay fresh; a zero base rate pins recency
/// at 1.
fn recency_score(artifact: &MemoryArtifact, now: DateTime<Utc>, base_rate: f64) -> f64 {
    let effective = base_rate / ((1.0 + artifact.usage_count as f64).ln() + 1.0);
    (-effective * artifact.age_days(now)).exp().clamp(0.0, 1.0)
}

/// Density: substantive artifacts score higher, saturating at the
/// configured token ceiling.
fn density_score(token_count: usize) -> f64 {
    (token_count as f64 / TOKEN_DENSITY_CEILING as f64).min(1.0)
}

/// Per-batch diversity: for candidate i, one minus the mean cosine
/// similarity to every other embedded candidate. Candidates without a
/// vector (or a batch with fewer than two vectors) take a neutral 0.5.
fn batch_diversity(candidates: &[ScoringCandidate]) -> Vec<f64> {
    let embedded: Vec<(usize, &SemanticView)> = candidates
        .iter()
        .enumerate()
        .filter_map(|(i, c)| c.view.as_ref().map(|v| (i, v)))
        .collect();

    let mut diversity = vec![0.5_f64; candidates.len()];
    if embedded.len() < 2 {
        return diversity;
    }

    for (i, view_i) in &embedded {
        let mut total = 0.0_f64;
        for (j, view_j) in &embedded {
            if i != j {
                total += f64::from(cosine_similarity(&view_i.vector, &view_j.vector));
            }
        }
        let mean = total / (embedded.len() - 1) as f64;
        diversity[*i] = (1.0 - mean).clamp(0.0, 1.0);
    }
    diversity
}

/// Resolve an artifact's normalized centrality from entity importances.
///
/// `entity_importances` are the raw PageRank values of the entities the
/// artifact mentions; `max_importance` is the tenant-wide maximum used
/// for normalization. No mentions (or an empty graph) is zero.
#[must_use]
pub fn normalized_centrality(entity_importances: &[f64], max_importance: f64) -> f64 {
    if entity_importances.is_empty() || max_importance <= 0.0 {
        return 0.0;
    }
    let mean = entity_importances.iter().sum::<f64>() / entity_importances.len() as f64;
    (mean / max_importance).clamp(0.0, 1.0)
}

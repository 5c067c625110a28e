use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Weights for the six composite-score factors.
///
/// Weights must sum to 1.0; [`ScoreWeights::validate`] enforces this at
/// configuration time so a bad weight set never reaches the ranking
/// path.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreWeights {
    /// Query/content match quality.
    pub relevance: f64,
    /// Dynamic importance of the artifact.
    pub importance: f64,
    /// Usage-aware temporal freshness.
    pub recency: f64,
    /// Knowledge-graph hub proximity.
    pub centrality: f64,
    /// Per-batch near-duplicate penalty.
    pub diversity: f64,
    /// Substantiveness up to a soft token ceiling.
    pub density: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            relevance: 0.40,
            importance: 0.20,
            recency: 0.10,
            centrality: 0.10,
            diversity: 0.10,
            density: 0.10,
        }
    }
}

impl ScoreWeights {
    /// Validate that weights are non-negative and sum to 1.0 (within
    /// floating-point tolerance).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] otherwise.
    pub fn validate(&self) -> Result<()> {
        let components = [
            self.relevance,
            self.importance,
            self.recency,
            self.centrality,
            self.diversity,
            self.density,
        ];
        if components.iter().any(|w| *w < 0.0) {
            return Err(Error::Config("score weights must be non-negative".into()));
        }
        let sum: f64 = components.iter().sum();
        if (sum - 1.0).abs() > 0.01 {
            return Err(Error::Config(format!(
                "score weights must sum to 1.0, got {sum}"
            )));
        }
        Ok(())
    }
}

//! # Importance & Decay Service
//!
//! On a scheduled tick, walks the artifacts in a scope and decays their
//! importance. The decay rate is piecewise over days-since-access:
//! recently touched artifacts are protected (half rate), long-untouched
//! ones decay at an accelerating rate, and everything is floored at
//! [`IMPORTANCE_FLOOR`] — decay never erases, pruning removes.
//!
//! The same service recomputes full importance from its weighted factor
//! set when callers supply the graph/relevance context.
//!
//! [`IMPORTANCE_FLOOR`]: crate::types::IMPORTANCE_FLOOR

use crate::clock::SharedClock;
use crate::config::DecayConfig;
use crate::storage::{ArtifactFilter, MemoryStorage};
use crate::types::{MemoryArtifact, Scope, IMPORTANCE_FLOOR};
use crate::Result;
use tracing::{debug, instrument};

/// Outcome of one decay tick over a scope.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecayReport {
    /// Artifacts examined.
    pub scanned: usize,
    /// Artifacts whose importance changed.
    pub decayed: usize,
    /// Artifacts that hit the floor this tick.
    pub floored: usize,
}

/// Context for full importance recomputation. Everything the artifact
/// does not know about itself.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImportanceFactors {
    /// Normalized graph centrality in [0, 1].
    pub centrality: f64,
    /// Semantic relevance to the tenant's recent queries in [0, 1].
    pub recent_query_relevance: f64,
    /// Operator-applied boost in [0, 1].
    pub manual_boost: f64,
}

/// Importance & decay service.
#[derive(Clone)]
pub struct DecayService {
    clock: SharedClock,
    config: DecayConfig,
}

impl DecayService {
    /// Create the service over a clock and decay configuration.
    #[must_use]
    pub fn new(clock: SharedClock, config: DecayConfig) -> Self {
        Self { clock, config }
    }

    /// The effective daily rate for an artifact, given its access
    /// history:
    ///
    /// - protected zone (accessed within 7 days): half rate
    /// - accelerated zone (untouched past 30 days): rate grows linearly
    ///   with staleness, continuous at the boundary
    /// - otherwise: base rate
    #[must_use]
    pub fn effective_rate(&self, days_since_access: f64) -> f64 {
        let base = self.config.base_rate;
        let rate = if days_since_access > self.config.accelerated_after_days {
            base * (days_since_access / self.config.accelerated_after_days)
        } else if days_since_access < self.config.protected_within_days {
            base * 0.5
        } else {
            base
        };
        rate.clamp(0.0, 1.0)
    }

    /// One day of decay applied to an importance value.
    #[must_use]
    pub fn decay_step(&self, importance: f32, days_since_access: f64) -> f32 {
        if self.config.base_rate == 0.0 {
            return importance;
        }
        let rate = self.effective_rate(days_since_access);
        ((f64::from(importance)) * (1.0 - rate)).max(f64::from(IMPORTANCE_FLOOR)) as f32
    }

    /// Walk a scope and apply one decay step per artifact.
    ///
    /// With a zero base rate this is a no-op that still reports the
    /// scan count — zero-decay idempotence is an invariant, not an
    /// optimization.
    #[instrument(skip(self, storage), fields(scope = %scope))]
    pub async fn run_tick(
        &self,
        storage: &dyn MemoryStorage,
        scope: &Scope,
    ) -> Result<DecayReport> {
        let artifacts = storage.list(scope, &ArtifactFilter::default()).await?;
        let mut report = DecayReport {
            scanned: artifacts.len(),
            ..DecayReport::default()
        };
        if self.config.base_rate == 0.0 {
            return Ok(report);
        }

        let now = self.clock.now();
        for artifact in &artifacts {
            let new_importance = self.decay_step(artifact.importance, artifact.days_since_access(now));
            let delta = new_importance - artifact.importance;
            if delta.abs() < f32::EPSILON {
                continue;
            }
            storage
                .adjust_importance(scope, artifact.id, delta)
                .await?;
            report.decayed += 1;
            if new_importance <= IMPORTANCE_FLOOR {
                report.floored += 1;
            }
        }

        debug!(
            scanned = report.scanned,
            decayed = report.decayed,
            floored = report.floored,
            "decay tick complete"
        );
        Ok(report)
    }

    /// Recompute importance from the weighted factor set:
    /// recency 15%, log-scaled access frequency 20%, centrality 15%,
    /// recent-query relevance 15%, user rating 10%, consolidation 10%,
    /// manual boost 15%.
    #[must_use]
    pub fn recompute_importance(
        &self,
        artifact: &MemoryArtifact,
        factors: &ImportanceFactors,
    ) -> f32 {
        let now = self.clock.now();
        let recency = 0.5_f64.powf(artifact.days_since_access(now) / 30.0);
        let frequency =
            ((1.0 + artifact.usage_count as f64).ln() / (1.0 + 100.0_f64).ln()).min(1.0);
        let rating = artifact.user_rating.map_or(0.5, f64::from);
        let consolidated = if artifact.consolidated { 1.0 } else { 0.0 };

        let combined = 0.15 * recency
            + 0.20 * frequency
            + 0.15 * factors.centrality.clamp(0.0, 1.0)
            + 0.15 * factors.recent_query_relevance.clamp(0.0, 1.0)
            + 0.10 * rating
            + 0.10 * consolidated
            + 0.15 * factors.manual_boost.clamp(0.0, 1.0);
        (combined as f32).clamp(IMPORTANCE_FLOOR, 1.0)
    }
}

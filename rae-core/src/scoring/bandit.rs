//! Math-3 adaptive weighting: a per-tenant multi-armed bandit over a
//! fixed palette of weight profiles.
//!
//! Thompson sampling with Beta(successes + 1, failures + 1) posteriors.
//! The reward signal is whether a retrieved artifact turned out useful —
//! explicit caller feedback, or implicit appearance in a later
//! reflection's provenance.
//!
//! Determinism: arms are re-sampled only when a reward is observed,
//! never during retrieval, so a frozen-state retrieval always reads a
//! stable weight snapshot. The RNG is ChaCha seeded from the tenant
//! name, making reward replays reproducible.

use super::weights::ScoreWeights;
use parking_lot::Mutex;
use rand::{Rng, RngExt, SeedableRng};
use rand_chacha::ChaCha8Rng;
use sha2::{Digest, Sha256};
use std::collections::HashMap;

/// Queries a tenant must issue before adaptive weights activate.
pub const WARMUP_QUERIES: u64 = 200;

/// The weight profiles the bandit chooses between.
#[must_use]
pub fn default_palette() -> Vec<(&'static str, ScoreWeights)> {
    vec![
        ("default", ScoreWeights::default()),
        (
            "relevance-heavy",
            ScoreWeights {
                relevance: 0.55,
                importance: 0.15,
                recency: 0.10,
                centrality: 0.05,
                diversity: 0.10,
                density: 0.05,
            },
        ),
        (
            "importance-heavy",
            ScoreWeights {
                relevance: 0.30,
                importance: 0.35,
                recency: 0.10,
                centrality: 0.10,
                diversity: 0.10,
                density: 0.05,
            },
        ),
        (
            "recency-heavy",
            ScoreWeights {
                relevance: 0.35,
                importance: 0.15,
                recency: 0.25,
                centrality: 0.10,
                diversity: 0.10,
                density: 0.05,
            },
        ),
        (
            "graph-heavy",
            ScoreWeights {
                relevance: 0.35,
                importance: 0.15,
                recency: 0.10,
                centrality: 0.25,
                diversity: 0.10,
                density: 0.05,
            },
        ),
        (
            "diversity-heavy",
            ScoreWeights {
                relevance: 0.35,
                importance: 0.15,
                recency: 0.10,
                centrality: 0.10,
                diversity: 0.25,
                density: 0.05,
            },
        ),
    ]
}

#[derive(Debug, Clone, Copy, Default)]
struct ArmStats {
    successes: u64,
    failures: u64,
}

struct TenantState {
    arms: Vec<ArmStats>,
    queries: u64,
    current_arm: usize,
    rng: ChaCha8Rng,
}

impl TenantState {
    fn new(tenant: &str, arm_count: usize) -> Self {
        Self {
            arms: vec![ArmStats::default(); arm_count],
            queries: 0,
            current_arm: 0,
            rng: ChaCha8Rng::seed_from_u64(tenant_seed(tenant)),
        }
    }
}

fn tenant_seed(tenant: &str) -> u64 {
    let digest = Sha256::digest(tenant.as_bytes());
    u64::from_le_bytes([
        digest[0], digest[1], digest[2], digest[3], digest[4], digest[5], digest[6], digest[7],
    ])
}

/// Per-tenant adaptive weight selection.
pub struct WeightBandit {
    palette: Vec<(String, ScoreWeights)>,
    tenants: Mutex<HashMap<String, TenantState>>,
}

impl Default for WeightBandit {
    fn default() -> Self {
        Self::new()
    }
}

impl WeightBandit {
    /// Bandit over the default weight palette.
    #[must_use]
    pub fn new() -> Self {
        Self {
            palette: default_palette()
                .into_iter()
                .map(|(name, weights)| (name.to_string(), weights))
                .collect(),
            tenants: Mutex::new(HashMap::new()),
        }
    }

    /// Record a query and return the weights to rank it with.
    ///
    /// Returns the default profile until the tenant clears the warm-up
    /// threshold, the current arm's profile after.
    pub fn weights_for_query(&self, tenant: &str) -> ScoreWeights {
        let mut tenants = self.tenants.lock();
        let arm_count = self.palette.len();
        let state = tenants
            .entry(tenant.to_string())
            .or_insert_with(|| TenantState::new(tenant, arm_count));
        state.queries = state.queries.saturating_add(1);
        if state.queries < WARMUP_QUERIES {
            self.palette[0].1
        } else {
            self.palette[state.current_arm].1
        }
    }

    /// Observe a reward for the tenant's current arm and re-sample.
    ///
    /// Arm switching happens here — between retrievals — so rankings
    /// over frozen state stay reproducible.
    pub fn observe_reward(&self, tenant: &str, useful: bool) {
        let mut tenants = self.tenants.lock();
        let arm_count = self.palette.len();
        let state = tenants
            .entry(tenant.to_string())
            .or_insert_with(|| TenantState::new(tenant, arm_count));

        let stats = &mut state.arms[state.current_arm];
        if useful {
            stats.successes = stats.successes.saturating_add(1);
        } else {
            stats.failures = stats.failures.saturating_add(1);
        }

        if state.queries < WARMUP_QUERIES {
            return;
        }

        let mut best_arm = 0usize;
        let mut best_draw = f64::NEG_INFINITY;
        for (index, stats) in state.arms.iter().enumerate() {
            let draw = sample_beta(
                stats.successes as f64 + 1.0,
                stats.failures as f64 + 1.0,
                &mut state.rng,
            );
            if draw > best_draw {
                best_draw = draw;
                best_arm = index;
            }
        }
        if best_arm != state.current_arm {
            tracing::debug!(
                tenant,
                from = %self.palette[state.current_arm].0,
                to = %self.palette[best_arm].0,
                "bandit switched weight profile"
            );
        }
        state.current_arm = best_arm;
    }

    /// Name of the tenant's active profile (diagnostics).
    #[must_use]
    pub fn active_profile(&self, tenant: &str) -> String {
        let tenants = self.tenants.lock();
        match tenants.get(tenant) {
            Some(state) if state.queries >= WARMUP_QUERIES => {
                self.palette[state.current_arm].0.clone()
            }
            _ => self.palette[0].0.clone(),
        }
    }

    /// Queries observed for a tenant.
    #[must_use]
    pub fn query_count(&self, tenant: &str) -> u64 {
        self.tenants
            .lock()
            .get(tenant)
            .map_or(0, |state| state.queries)
    }
}

/// Beta(a, b) draw from two Gamma draws: X/(X+Y).
fn sample_beta<R: Rng>(a: f64, b: f64, rng: &mut R) -> f64 {
    let x = sample_gamma(a, rng);
    let y = sample_gamma(b, rng);
    if x + y == 0.0 {
        0.5
    } else {
        x / (x + y)
    }
}

/// Gamma(shape, 1) via Marsaglia–Tsang squeeze. Shapes here are always
/// ≥ 1 (counts + 1), which is the regime the method covers directly.
fn sample_gamma<R: Rng>(shape: f64, rng: &mut R) -> f64 {
    let d = shape - 1.0 / 3.0;
    let c = 1.0 / (9.0 * d).sqrt();
    loop {
        let x = sample_standard_normal(rng);
        let v = (1.0 + c * x).powi(3);
        if v <= 0.0 {
            continue;
        }
        let u: f64 = rng.random();
        if u < 1.0 - 0.0331 * x.powi(4) {
            return d * v;
        }
        if u.ln() < 0.5 * x * x + d * (1.0 - v + v.ln()) {
            return d * v;
        }
    }
}

/// Standard normal via Box–Muller.
fn sample_standard_normal<R: Rng>(rng: &mut R) -> f64 {
    let u1: f64 = rng.random::<f64>().max(f64::MIN_POSITIVE);
    let u2: f64 = rng.random();
    (-2.0 * u1.ln()).sqrt() * (std::f64::consts::TAU * u2).cos()
}

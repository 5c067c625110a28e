//! Engine configuration.
//!
//! All knobs default to the values the retrieval/reflection pipeline was
//! tuned with; everything is overridable via [`RaeConfig::from_env`] or a
//! TOML file. Configuration problems are reported at construction
//! ([`RaeConfig::validate`]) so a misconfigured engine fails at startup,
//! not at first use.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Per-call timeouts for external collaborators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Storage adapter calls (seconds).
    pub storage_secs: u64,
    /// Embedding provider calls (seconds).
    pub embedding_secs: u64,
    /// LLM provider calls (seconds).
    pub llm_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            storage_secs: 5,
            embedding_secs: 10,
            llm_secs: 30,
        }
    }
}

impl TimeoutConfig {
    /// Storage timeout as a [`Duration`].
    #[must_use]
    pub fn storage(&self) -> Duration {
        Duration::from_secs(self.storage_secs)
    }

    /// Embedding timeout as a [`Duration`].
    #[must_use]
    pub fn embedding(&self) -> Duration {
        Duration::from_secs(self.embedding_secs)
    }

    /// LLM timeout as a [`Duration`].
    #[must_use]
    pub fn llm(&self) -> Duration {
        Duration::from_secs(self.llm_secs)
    }
}

/// Importance decay configuration (per tenant).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecayConfig {
    /// Daily base decay rate. 0.01 = 1%/day; 0 disables decay entirely.
    pub base_rate: f64,
    /// Days since last access beyond which decay accelerates.
    pub accelerated_after_days: f64,
    /// Days since last access within which decay is halved.
    pub protected_within_days: f64,
}

impl Default for DecayConfig {
    fn default() -> Self {
        Self {
            base_rate: 0.01,
            accelerated_after_days: 30.0,
            protected_within_days: 7.0,
        }
    }
}

/// Hybrid retrieval cascade configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Candidates kept after the lexical prefilter (K₁).
    pub lexical_top_k: usize,
    /// Candidates kept after short-vector recall (K₂).
    pub short_vector_top_k: usize,
    /// Candidates kept after long-vector rerank (K₃).
    pub rerank_top_k: usize,
    /// Maximum graph hops during expansion.
    pub graph_depth: usize,
    /// Minimum edge confidence followed during expansion (τ).
    pub graph_confidence_threshold: f32,
    /// Centrality × relevance threshold for resonance induction.
    pub resonance_threshold: f64,
    /// Hard cap on nodes visited during graph expansion.
    pub max_graph_nodes: usize,
    /// Composite-score bonus/penalty applied by reflective traces.
    pub reflective_bonus: f32,
    /// Cheap embedding model for recall (stage 2).
    pub short_embedding_model: String,
    /// Expensive embedding model for rerank (stage 3).
    pub long_embedding_model: String,
    /// MMR lambda for diversity-aware re-ordering (1.0 = pure relevance).
    pub mmr_lambda: f32,
    /// Query-cache capacity (entries); 0 disables caching.
    pub cache_capacity: usize,
    /// Query-cache TTL in seconds.
    pub cache_ttl_secs: u64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            lexical_top_k: 200,
            short_vector_top_k: 50,
            rerank_top_k: 20,
            graph_depth: 2,
            graph_confidence_threshold: 0.5,
            resonance_threshold: 0.1,
            max_graph_nodes: 1000,
            reflective_bonus: 0.05,
            short_embedding_model: "local-minilm-384".into(),
            long_embedding_model: "text-embedding-large-3072".into(),
            mmr_lambda: 0.7,
            cache_capacity: 256,
            cache_ttl_secs: 60,
        }
    }
}

/// Reflection engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReflectionConfig {
    /// Importance delta applied to sources of a success reflection.
    pub reinforce_delta: f32,
    /// Importance delta applied (negatively) on failure. Never erases.
    pub demote_delta: f32,
    /// Episodes per bucket in hierarchical reflection.
    pub bucket_size: usize,
    /// Maximum episodes consumed per hierarchical run.
    pub max_episodes_per_run: usize,
    /// Quality-score threshold for the threshold evaluator.
    pub success_threshold: f32,
    /// Quality-score threshold below which a trace is a failure.
    pub failure_threshold: f32,
    /// LLM retry attempts for reflector/extractor calls.
    pub llm_max_retries: u32,
}

impl Default for ReflectionConfig {
    fn default() -> Self {
        Self {
            reinforce_delta: 0.05,
            demote_delta: 0.05,
            bucket_size: 10,
            max_episodes_per_run: 100,
            success_threshold: 0.7,
            failure_threshold: 0.3,
            llm_max_retries: 3,
        }
    }
}

/// Quality/efficiency preference for context assembly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssemblyPreference {
    /// Prefer quality: low β, include more.
    Quality,
    /// Balanced trade-off.
    Balanced,
    /// Prefer efficiency: high β, compress hard.
    Efficiency,
}

impl AssemblyPreference {
    /// Base β for the Information-Bottleneck objective.
    #[must_use]
    pub fn base_beta(self) -> f64 {
        match self {
            AssemblyPreference::Quality => 0.1,
            AssemblyPreference::Balanced => 0.5,
            AssemblyPreference::Efficiency => 2.0,
        }
    }
}

/// Context assembler configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssemblerConfig {
    /// Quality/efficiency preference.
    pub preference: AssemblyPreference,
    /// Multiplier applied to β for queries flagged complex (< 1 pulls
    /// more context in).
    pub complex_query_beta_factor: f64,
}

impl Default for AssemblerConfig {
    fn default() -> Self {
        Self {
            preference: AssemblyPreference::Balanced,
            complex_query_beta_factor: 0.5,
        }
    }
}

/// Federation configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FederationConfig {
    /// Invitation token lifetime (seconds).
    pub invitation_expiry_secs: u64,
    /// This instance's public endpoint, advertised in invitations.
    pub public_endpoint: String,
    /// Maximum candidates accepted from a peer per query.
    pub max_peer_candidates: usize,
}

impl Default for FederationConfig {
    fn default() -> Self {
        Self {
            invitation_expiry_secs: 300,
            public_endpoint: String::new(),
            max_peer_candidates: 50,
        }
    }
}

/// Background worker cadence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Importance decay interval (seconds). Default: daily.
    pub decay_interval_secs: u64,
    /// Hierarchical reflection interval (seconds). Default: 6 hours.
    pub reflection_interval_secs: u64,
    /// Episodic pruning interval (seconds). Default: daily.
    pub prune_interval_secs: u64,
    /// Episodic retention in days. 0 disables pruning.
    pub episodic_retention_days: u32,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            decay_interval_secs: 86_400,
            reflection_interval_secs: 6 * 3_600,
            prune_interval_secs: 86_400,
            episodic_retention_days: 30,
        }
    }
}

/// Store-time behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// When true, storing content identical to an existing artifact in
    /// the same scope returns the existing id instead of inserting.
    pub deduplicate: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self { deduplicate: false }
    }
}

/// Aggregate configuration for the engine.
///
/// # Examples
///
/// ```
/// use rae_core::config::RaeConfig;
///
/// let config = RaeConfig::default();
/// assert!(config.validate().is_ok());
/// assert_eq!(config.retrieval.lexical_top_k, 200);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RaeConfig {
    /// Per-call timeouts.
    pub timeouts: TimeoutConfig,
    /// Importance decay.
    pub decay: DecayConfig,
    /// Retrieval cascade.
    pub retrieval: RetrievalConfig,
    /// Reflection engine.
    pub reflection: ReflectionConfig,
    /// Context assembler.
    pub assembler: AssemblerConfig,
    /// Federation protocol.
    pub federation: FederationConfig,
    /// Background workers.
    pub worker: WorkerConfig,
    /// Store-time behavior.
    pub store: StoreConfig,
}

impl RaeConfig {
    /// Load configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] on parse failure or invalid values.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(raw).map_err(|e| Error::Config(format!("invalid TOML: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Create a configuration from environment variables, falling back
    /// to defaults for any missing value.
    ///
    /// # Environment Variables
    ///
    /// * `RAE_DECAY_BASE_RATE` - daily decay rate (default `0.01`)
    /// * `RAE_EPISODIC_RETENTION_DAYS` - retention window (default `30`)
    /// * `RAE_LEXICAL_TOP_K` / `RAE_SHORT_VECTOR_TOP_K` / `RAE_RERANK_TOP_K`
    /// * `RAE_GRAPH_DEPTH` - expansion hops (default `2`)
    /// * `RAE_REFLECTIVE_BONUS` - Szubar bonus (default `0.05`)
    /// * `RAE_ASSEMBLY_PREFERENCE` - `quality` | `balanced` | `efficiency`
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(rate) = std::env::var("RAE_DECAY_BASE_RATE") {
            if let Ok(value) = rate.parse::<f64>() {
                config.decay.base_rate = value.max(0.0);
            }
        }
        if let Ok(days) = std::env::var("RAE_EPISODIC_RETENTION_DAYS") {
            if let Ok(value) = days.parse::<u32>() {
                config.worker.episodic_retention_days = value;
            }
        }
        if let Ok(k) = std::env::var("RAE_LEXICAL_TOP_K") {
            if let Ok(value) = k.parse::<usize>() {
                config.retrieval.lexical_top_k = value;
            }
        }
        if let Ok(k) = std::env::var("RAE_SHORT_VECTOR_TOP_K") {
            if let Ok(value) = k.parse::<usize>() {
                config.retrieval.short_vector_top_k = value;
            }
        }
        if let Ok(k) = std::env::var("RAE_RERANK_TOP_K") {
            if let Ok(value) = k.parse::<usize>() {
                config.retrieval.rerank_top_k = value;
            }
        }
        if let Ok(depth) = std::env::var("RAE_GRAPH_DEPTH") {
            if let Ok(value) = depth.parse::<usize>() {
                config.retrieval.graph_depth = value;
            }
        }
        if let Ok(bonus) = std::env::var("RAE_REFLECTIVE_BONUS") {
            if let Ok(value) = bonus.parse::<f32>() {
                config.retrieval.reflective_bonus = value.clamp(0.0, 1.0);
            }
        }
        if let Ok(pref) = std::env::var("RAE_ASSEMBLY_PREFERENCE") {
            config.assembler.preference = match pref.to_lowercase().as_str() {
                "quality" => AssemblyPreference::Quality,
                "efficiency" => AssemblyPreference::Efficiency,
                "balanced" => AssemblyPreference::Balanced,
                other => {
                    tracing::warn!("Invalid RAE_ASSEMBLY_PREFERENCE '{}', using balanced", other);
                    AssemblyPreference::Balanced
                }
            };
        }

        config
    }

    /// Check cross-field consistency.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] on any out-of-range or inconsistent
    /// value; an engine never starts with an invalid configuration.
    pub fn validate(&self) -> Result<()> {
        if self.decay.base_rate < 0.0 || self.decay.base_rate >= 1.0 {
            return Err(Error::Config(format!(
                "decay.base_rate must be in [0, 1), got {}",
                self.decay.base_rate
            )));
        }
        if self.decay.protected_within_days >= self.decay.accelerated_after_days {
            return Err(Error::Config(
                "decay.protected_within_days must be below accelerated_after_days".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.retrieval.graph_confidence_threshold) {
            return Err(Error::Config(
                "retrieval.graph_confidence_threshold must be in [0, 1]".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.retrieval.reflective_bonus) {
            return Err(Error::Config(
                "retrieval.reflective_bonus must be in [0, 1]".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.retrieval.mmr_lambda) {
            return Err(Error::Config("retrieval.mmr_lambda must be in [0, 1]".into()));
        }
        if self.retrieval.short_embedding_model.is_empty()
            || self.retrieval.long_embedding_model.is_empty()
        {
            return Err(Error::Config("retrieval embedding models must be named".into()));
        }
        if self.reflection.bucket_size == 0 {
            return Err(Error::Config("reflection.bucket_size must be positive".into()));
        }
        if self.assembler.complex_query_beta_factor <= 0.0 {
            return Err(Error::Config(
                "assembler.complex_query_beta_factor must be positive".into(),
            ));
        }
        Ok(())
    }
}

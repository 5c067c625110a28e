#![allow(clippy::cast_precision_loss)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_docs_in_private_items)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::redundant_closure_for_method_calls)]
#![allow(clippy::items_after_statements)]
#![allow(clippy::match_same_arms)]
#![allow(clippy::float_cmp)]
#![allow(clippy::module_name_repetitions)]

//! # RAE Core
//!
//! Retrieval and reflection core of the RAE agentic memory engine: a
//! persistent, multi-tenant memory substrate for LLM-driven agents.
//!
//! ## Core Concepts
//!
//! - **Artifacts**: the memory atom, living in one of four layers
//!   (episodic, semantic, reflective, working) inside a (tenant,
//!   project) scope
//! - **Hybrid retrieval**: a lexical → short-vector → long-vector →
//!   graph → reflective cascade with deterministic ranking
//! - **Importance & decay**: usage-aware dynamic importance with
//!   protected/normal/accelerated decay zones and a hard floor
//! - **Reflection**: an Actor–Evaluator–Reflector loop that turns
//!   operation traces into provenance-bearing insights, plus periodic
//!   hierarchical consolidation
//! - **Knowledge graph**: entity/relation triples as an index over
//!   artifacts, with PageRank centrality and bounded traversal
//! - **Federation**: content-only memory exchange between instances
//!   with incompatible embedding spaces
//!
//! ## Module Organization
//!
//! ### Primary APIs
//! - [`engine`]: the [`RaeEngine`] facade over the six inbound
//!   operations
//! - [`retrieval`]: the hybrid cascade pipeline
//! - [`reflection`]: evaluator strategies, the reflector, hierarchical
//!   reflection, Szubar fingerprints
//! - [`federation`]: handshake, peer registry, federated query
//!
//! ### Support Modules
//! - [`types`]: artifacts, scopes, views, triples, traces
//! - [`storage`]: the three adapter traits plus in-memory references
//! - [`scoring`]: Math-1/2/3 ranking machinery
//! - [`graph`]: extraction and traversal
//! - [`decay`], [`assembler`], [`worker`], [`providers`], [`config`],
//!   [`clock`], [`retry`]
//!
//! ## Quick Start
//!
//! ```
//! use rae_core::engine::{AssembleOptions, RaeEngineBuilder};
//! use rae_core::providers::{MockEmbeddingProvider, MockLlmProvider};
//! use rae_core::retrieval::RetrievalOptions;
//! use rae_core::{MemoryArtifact, MemoryLayer, Scope};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> rae_core::Result<()> {
//!     let engine = RaeEngineBuilder::new()
//!         .embedder(Arc::new(MockEmbeddingProvider::with_default_models()))
//!         .llm(Arc::new(MockLlmProvider::constant("insight")))
//!         .build()?;
//!
//!     let scope = Scope::new("acme", "support-bot")?;
//!     engine
//!         .store(
//!             MemoryArtifact::new(
//!                 scope.clone(),
//!                 MemoryLayer::Semantic,
//!                 "PostgreSQL supports JSONB columns".to_string(),
//!             )
//!             .with_tags(vec!["db".into(), "postgres".into()]),
//!         )
//!         .await?;
//!
//!     let results = engine
//!         .retrieve(&scope, "which databases support JSON?", &RetrievalOptions::top_k(5))
//!         .await?;
//!     assert!(!results.results.is_empty());
//!
//!     let context = engine
//!         .assemble_context(&scope, "json support", 500, &AssembleOptions::default())
//!         .await?;
//!     println!("assembled {} artifacts", context.artifacts.len());
//!     Ok(())
//! }
//! ```

pub mod assembler;
pub mod clock;
pub mod config;
pub mod decay;
pub mod engine;
pub mod error;
pub mod federation;
pub mod graph;
pub mod providers;
pub mod reflection;
pub mod retrieval;
pub mod retry;
pub mod scoring;
pub mod storage;
pub mod types;
pub mod worker;

// Re-export commonly used types
pub use assembler::{AssembledContext, ContextAssembler};
pub use clock::{system_clock, Clock, SharedClock, SystemClock};
pub use config::RaeConfig;
pub use decay::{DecayReport, DecayService, ImportanceFactors};
pub use engine::{AssembleOptions, RaeEngine, RaeEngineBuilder, TenantStats};
pub use error::{Error, ProviderError, Result};
pub use federation::{FederatedCandidate, FederatedQuery, InvitationToken, PeerRegistry};
pub use graph::{GraphExtractor, GraphService};
pub use reflection::{
    DeterministicEvaluator, EvaluationStrategy, HierarchicalReflector, LlmEvaluator,
    ReflectionEngine, Reflector, ThresholdEvaluator,
};
pub use retrieval::{
    HybridRetriever, RankedArtifact, RetrievalOptions, RetrievalResult, SkippedStage, Stage,
};
pub use retry::{RetryConfig, RetryMetrics, RetryPolicy};
pub use scoring::{ScoreWeights, ScoringEngine, SubScores, WeightBandit};
pub use storage::{
    AccessStatsUpdate, AggregateField, AggregateOp, ArtifactFilter, GraphStore, MemoryStorage,
    VectorIndex,
};
pub use types::{
    Entity, GraphTriple, MemoryArtifact, MemoryLayer, OperationKind, ReflectiveTrace, Scope,
    SemanticView, TraceOutcome, TraceRecord,
};
pub use worker::{BackgroundWorker, WorkerTask};

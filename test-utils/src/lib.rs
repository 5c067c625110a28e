//! # Test Utilities
//!
//! Shared fixtures for the RAE test suites:
//! - artifact and trace factories
//! - a manually advanced clock for decay/recency scenarios
//! - engine construction helpers over the deterministic mock providers

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use rae_core::engine::{RaeEngine, RaeEngineBuilder};
use rae_core::providers::{MockEmbeddingProvider, MockLlmProvider};
use rae_core::{
    Clock, MemoryArtifact, MemoryLayer, OperationKind, RaeConfig, Scope, SharedClock, TraceRecord,
};
use std::sync::Arc;
use uuid::Uuid;

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: RwLock<DateTime<Utc>>,
}

impl ManualClock {
    /// Clock frozen at `start`.
    #[must_use]
    pub fn starting_at(start: DateTime<Utc>) -> Arc<Self> {
        Arc::new(Self {
            now: RwLock::new(start),
        })
    }

    /// Clock frozen at the current wall time.
    #[must_use]
    pub fn now() -> Arc<Self> {
        Self::starting_at(Utc::now())
    }

    /// The frozen instant (inherent, so it never shadows the
    /// constructor in method resolution).
    #[must_use]
    pub fn current(&self) -> DateTime<Utc> {
        *self.now.read()
    }

    /// Advance by whole days.
    pub fn advance_days(&self, days: i64) {
        *self.now.write() += Duration::days(days);
    }

    /// Advance by seconds.
    pub fn advance_secs(&self, secs: i64) {
        *self.now.write() += Duration::seconds(secs);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.read()
    }
}

/// The default test scope.
#[must_use]
pub fn test_scope() -> Scope {
    Scope::new("test-tenant", "test-project").unwrap()
}

/// A scope under a different tenant, for isolation tests.
#[must_use]
pub fn foreign_scope() -> Scope {
    Scope::new("other-tenant", "test-project").unwrap()
}

/// Minimal artifact in the given layer.
#[must_use]
pub fn create_test_artifact(layer: MemoryLayer, content: &str) -> MemoryArtifact {
    MemoryArtifact::new(test_scope(), layer, content.to_string())
}

/// Semantic fact with tags and importance, as an explicit ingest would
/// produce it.
#[must_use]
pub fn create_fact(content: &str, tags: &[&str], importance: f32) -> MemoryArtifact {
    MemoryArtifact::new(test_scope(), MemoryLayer::Semantic, content.to_string())
        .with_tags(tags.iter().map(ToString::to_string).collect())
        .with_importance(importance)
}

/// Episodic artifact backdated by `age_days` relative to `now`.
#[must_use]
pub fn create_aged_episode(content: &str, age_days: i64, now: DateTime<Utc>) -> MemoryArtifact {
    let mut artifact =
        MemoryArtifact::new(test_scope(), MemoryLayer::Episodic, content.to_string());
    artifact.created_at = now - Duration::days(age_days);
    artifact.last_accessed_at = artifact.created_at;
    artifact
}

/// Trace referencing the given source artifacts.
#[must_use]
pub fn create_trace(input: &str, sources: Vec<Uuid>) -> TraceRecord {
    TraceRecord::new(test_scope(), OperationKind::ToolCall, input).with_sources(sources)
}

/// Engine over in-memory adapters, mock providers, and a manual clock.
#[must_use]
pub fn build_test_engine(clock: Arc<ManualClock>) -> RaeEngine {
    build_test_engine_with_config(clock, RaeConfig::default())
}

/// Engine with a caller-supplied configuration.
#[must_use]
pub fn build_test_engine_with_config(clock: Arc<ManualClock>, config: RaeConfig) -> RaeEngine {
    let shared: SharedClock = clock;
    RaeEngineBuilder::new()
        .config(config)
        .clock(shared)
        .embedder(Arc::new(MockEmbeddingProvider::with_default_models()))
        .llm(Arc::new(MockLlmProvider::constant(
            "A generated reflection insight.",
        )))
        .build()
        .unwrap()
}

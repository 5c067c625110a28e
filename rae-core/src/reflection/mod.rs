//! # Reflection Engine (Actor–Evaluator–Reflector)
//!
//! The learning loop. Actors emit [`TraceRecord`]s after operations;
//! the [`evaluator`] classifies each into success/failure/neutral; the
//! [`reflector`] turns success and failure verdicts into reflective
//! artifacts with mandatory provenance and importance proposals;
//! [`hierarchical`] periodically consolidates episodic memory bottom-up.
//! [`szubar`] keeps failure fingerprints so known traps resurface as
//! negative exemplars.
//!
//! [`TraceRecord`]: crate::types::TraceRecord

pub mod evaluator;
pub mod hierarchical;
pub mod reflector;
pub mod szubar;

pub use evaluator::{
    DeterministicEvaluator, EvaluationStrategy, LlmEvaluator, ThresholdEvaluator,
};
pub use hierarchical::{HierarchicalReflector, HierarchicalReport};
pub use reflector::{ReflectionProposal, Reflector};

use crate::storage::MemoryStorage;
use crate::types::{MemoryArtifact, TraceOutcome, TraceRecord};
use crate::Result;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// Wires an evaluation strategy to the reflector and applies the
/// resulting proposal to storage as one unit.
pub struct ReflectionEngine {
    evaluator: Arc<dyn EvaluationStrategy>,
    reflector: Reflector,
    storage: Arc<dyn MemoryStorage>,
}

impl ReflectionEngine {
    /// Compose the engine.
    #[must_use]
    pub fn new(
        evaluator: Arc<dyn EvaluationStrategy>,
        reflector: Reflector,
        storage: Arc<dyn MemoryStorage>,
    ) -> Self {
        Self {
            evaluator,
            reflector,
            storage,
        }
    }

    /// Process one trace: evaluate, reflect on success/failure, persist.
    ///
    /// Returns the stored reflective artifact, or `None` when the trace
    /// was neutral (archived) or the reflector's LLM stayed unavailable.
    ///
    /// The reflection, its importance boosts, and its fingerprint are
    /// applied together: if persisting the artifact fails nothing else
    /// is applied, and if an importance update fails the artifact is
    /// removed again (compensation in lieu of a cross-store
    /// transaction).
    #[instrument(skip(self, trace), fields(trace_id = %trace.id))]
    pub async fn process_trace(&self, trace: &TraceRecord) -> Result<Option<MemoryArtifact>> {
        let outcome = self.evaluator.evaluate(trace).await?;
        if outcome == TraceOutcome::Neutral {
            debug!("neutral trace archived without reflection");
            return Ok(None);
        }

        let Some(proposal) = self.reflector.reflect(trace, outcome).await? else {
            return Ok(None);
        };

        let artifact = proposal.trace.into_artifact()?;
        self.storage.insert(&artifact).await?;

        for (source_id, delta) in &proposal.importance_deltas {
            if let Err(error) = self
                .storage
                .adjust_importance(&trace.scope, *source_id, *delta)
                .await
            {
                warn!(%error, %source_id, "importance update failed, rolling back reflection");
                let _ = self.storage.delete(&trace.scope, artifact.id).await;
                return Err(error);
            }
        }

        debug!(artifact_id = %artifact.id, %outcome, "reflection stored");
        Ok(Some(artifact))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReflectionConfig;
    use crate::providers::{HookSet, MockLlmProvider};
    use crate::storage::memory::InMemoryStorage;
    use crate::types::{MemoryLayer, OperationKind, Scope};
    use uuid::Uuid;

    fn scope() -> Scope {
        Scope::new("t", "p").unwrap()
    }

    async fn engine_with_source(
        llm: MockLlmProvider,
    ) -> (ReflectionEngine, Arc<InMemoryStorage>, Uuid) {
        let storage = Arc::new(InMemoryStorage::new());
        let source = MemoryArtifact::new(scope(), MemoryLayer::Semantic, "source fact".into())
            .with_importance(0.5);
        let source_id = source.id;
        storage.insert(&source).await.unwrap();

        let engine = ReflectionEngine::new(
            Arc::new(DeterministicEvaluator),
            Reflector::new(Arc::new(llm), HookSet::new(), ReflectionConfig::default()),
            storage.clone(),
        );
        (engine, storage, source_id)
    }

    #[tokio::test]
    async fn test_success_trace_boosts_source() {
        let (engine, storage, source_id) =
            engine_with_source(MockLlmProvider::constant("Worked because of caching.")).await;

        let trace = TraceRecord::new(scope(), OperationKind::ToolCall, "warm the cache")
            .with_sources(vec![source_id])
            .with_outcome(TraceOutcome::Success);
        let reflection = engine.process_trace(&trace).await.unwrap().unwrap();

        assert_eq!(reflection.layer, MemoryLayer::Reflective);
        assert!(reflection.provenance.contains(&source_id));

        let source = storage.get(&scope(), source_id).await.unwrap().unwrap();
        assert!((source.importance - 0.55).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_failure_trace_demotes_source() {
        let (engine, storage, source_id) =
            engine_with_source(MockLlmProvider::constant("Lock contention.")).await;

        let trace = TraceRecord::new(scope(), OperationKind::ToolCall, "bulk update")
            .with_sources(vec![source_id])
            .with_error("deadlock");
        engine.process_trace(&trace).await.unwrap().unwrap();

        let source = storage.get(&scope(), source_id).await.unwrap().unwrap();
        assert!((source.importance - 0.45).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_neutral_trace_is_archived() {
        let (engine, storage, source_id) =
            engine_with_source(MockLlmProvider::constant("unused")).await;

        let trace = TraceRecord::new(scope(), OperationKind::Retrieval, "lookup")
            .with_sources(vec![source_id]);
        assert!(engine.process_trace(&trace).await.unwrap().is_none());

        // No reflective artifact was created.
        let reflective = storage
            .list(
                &scope(),
                &crate::storage::ArtifactFilter::layer(MemoryLayer::Reflective),
            )
            .await
            .unwrap();
        assert!(reflective.is_empty());
    }

    #[tokio::test]
    async fn test_missing_source_rolls_back_reflection() {
        let (engine, storage, source_id) =
            engine_with_source(MockLlmProvider::constant("insight")).await;

        // Second source id does not exist, so its importance update
        // fails and the stored reflection must be rolled back.
        let ghost = Uuid::new_v4();
        let trace = TraceRecord::new(scope(), OperationKind::ToolCall, "op")
            .with_sources(vec![source_id, ghost])
            .with_outcome(TraceOutcome::Success);
        assert!(engine.process_trace(&trace).await.is_err());

        let reflective = storage
            .list(
                &scope(),
                &crate::storage::ArtifactFilter::layer(MemoryLayer::Reflective),
            )
            .await
            .unwrap();
        assert!(reflective.is_empty());
    }
}

//! Store-and-retrieve scenarios: the hybrid cascade end to end, plus
//! the retrieval boundary behaviors.

use rae_core::error::{Error, ProviderError};
use rae_core::providers::EmbeddingProvider;
use rae_core::retrieval::{RetrievalOptions, Stage};
use rae_core::{Entity, GraphStore, GraphTriple, MemoryArtifact, MemoryLayer};
use std::sync::Arc;
use test_utils::{build_test_engine, create_fact, test_scope, ManualClock};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[tokio::test]
async fn test_store_and_retrieve_top_two() {
    let engine = build_test_engine(ManualClock::now());

    let fact = create_fact("PostgreSQL supports JSONB", &["db", "postgres"], 0.8);
    let fact_id = fact.id;
    engine.store(fact).await.unwrap();

    // Distractors on unrelated topics.
    for (content, tags) in [
        ("Axum routes HTTP requests through tower layers", &["web"][..]),
        ("Tokio schedules asynchronous tasks cooperatively", &["async"][..]),
        ("The borrow checker enforces aliasing rules", &["lang"][..]),
    ] {
        engine.store(create_fact(content, tags, 0.5)).await.unwrap();
    }

    let result = engine
        .retrieve(
            &test_scope(),
            "which databases have JSON support?",
            &RetrievalOptions::top_k(5),
        )
        .await
        .unwrap();

    assert!(!result.degraded);
    assert!(result.skipped_stages.is_empty());

    let position = result
        .results
        .iter()
        .position(|r| r.artifact.id == fact_id)
        .expect("stored fact retrieved");
    assert!(position < 2, "expected top-2, got position {position}");
    assert!(
        result.results[position].composite >= 0.5,
        "composite was {}",
        result.results[position].composite
    );
}

#[tokio::test]
async fn test_retrieval_is_deterministic_over_frozen_state() {
    let engine = build_test_engine(ManualClock::now());
    for i in 0..10 {
        engine
            .store(create_fact(
                &format!("database replication note number {i}"),
                &["db"],
                0.4 + (i as f32) * 0.05,
            ))
            .await
            .unwrap();
    }

    let options = RetrievalOptions::top_k(5);
    let first = engine
        .retrieve(&test_scope(), "database replication", &options)
        .await
        .unwrap();
    let second = engine
        .retrieve(&test_scope(), "database replication", &options)
        .await
        .unwrap();

    let ids_a: Vec<_> = first.results.iter().map(|r| r.artifact.id).collect();
    let ids_b: Vec<_> = second.results.iter().map(|r| r.artifact.id).collect();
    assert_eq!(ids_a, ids_b);
    for (a, b) in first.results.iter().zip(&second.results) {
        assert_eq!(a.composite, b.composite);
        assert_eq!(a.sub_scores, b.sub_scores);
    }
}

#[tokio::test]
async fn test_k_zero_returns_empty_immediately() {
    let engine = build_test_engine(ManualClock::now());
    engine.store(create_fact("something", &[], 0.5)).await.unwrap();

    let result = engine
        .retrieve(&test_scope(), "something", &RetrievalOptions::top_k(0))
        .await
        .unwrap();
    assert!(result.results.is_empty());
    assert!(!result.degraded);
}

#[tokio::test]
async fn test_empty_tenant_returns_empty_without_error() {
    let engine = build_test_engine(ManualClock::now());
    let result = engine
        .retrieve(&test_scope(), "anything at all", &RetrievalOptions::top_k(5))
        .await
        .unwrap();
    assert!(result.results.is_empty());
    assert!(!result.degraded);
}

#[tokio::test]
async fn test_cancellation_unwinds_cleanly() {
    let engine = build_test_engine(ManualClock::now());
    engine.store(create_fact("cancel me", &[], 0.5)).await.unwrap();

    let cancel = CancellationToken::new();
    cancel.cancel();
    let result = engine
        .retrieve_with(
            &test_scope(),
            "cancel me",
            None,
            &RetrievalOptions::top_k(5),
            &cancel,
        )
        .await;
    assert!(matches!(result, Err(Error::Cancelled)));
}

/// Embedder that claims to serve the default models but fails every
/// call, forcing the vector stages to degrade.
struct OutageEmbedder;

#[async_trait::async_trait]
impl EmbeddingProvider for OutageEmbedder {
    async fn embed(&self, _text: &str, _model: &str) -> rae_core::Result<Vec<f32>> {
        Err(ProviderError::ModelError("provider outage".into()).into())
    }

    fn dimension(&self, model: &str) -> Option<usize> {
        match model {
            "local-minilm-384" => Some(384),
            "text-embedding-large-3072" => Some(3072),
            _ => None,
        }
    }
}

#[tokio::test]
async fn test_embedding_outage_degrades_to_lexical() {
    let engine = rae_core::engine::RaeEngineBuilder::new()
        .embedder(Arc::new(OutageEmbedder))
        .llm(Arc::new(rae_core::providers::MockLlmProvider::constant("x")))
        .build()
        .unwrap();

    let scope = test_scope();
    let artifact = MemoryArtifact::new(
        scope.clone(),
        MemoryLayer::Semantic,
        "lexical match target".into(),
    );
    let id = artifact.id;
    engine.store(artifact).await.unwrap();

    let result = engine
        .retrieve(&scope, "lexical match", &RetrievalOptions::top_k(5))
        .await
        .unwrap();

    // The vector stages were skipped, but the lexical result survives.
    assert!(result.degraded);
    assert!(!result.skipped_stages.is_empty());
    assert_eq!(result.results[0].artifact.id, id);
}

/// Graph store that serves the triple listing but fails on every
/// traversal-support call, simulating a graph shard going down after
/// the expansion stage has started.
struct FlakyGraphStore {
    triple: GraphTriple,
}

impl FlakyGraphStore {
    fn new() -> Self {
        Self {
            triple: GraphTriple::new(
                "test-tenant",
                Uuid::new_v4(),
                "USES",
                Uuid::new_v4(),
                0.9,
                Uuid::new_v4(),
            ),
        }
    }
}

#[async_trait::async_trait]
impl GraphStore for FlakyGraphStore {
    async fn upsert_entity(&self, entity: &Entity) -> rae_core::Result<Uuid> {
        Ok(entity.id)
    }

    async fn get_entity(&self, _tenant: &str, _id: Uuid) -> rae_core::Result<Option<Entity>> {
        Ok(None)
    }

    async fn find_entity(
        &self,
        _tenant: &str,
        _canonical_name: &str,
    ) -> rae_core::Result<Option<Entity>> {
        Ok(None)
    }

    async fn insert_triple(&self, _triple: &GraphTriple) -> rae_core::Result<()> {
        Ok(())
    }

    async fn neighbors(
        &self,
        _tenant: &str,
        _entity_id: Uuid,
        _min_confidence: f32,
    ) -> rae_core::Result<Vec<GraphTriple>> {
        Ok(Vec::new())
    }

    async fn entities(&self, _tenant: &str) -> rae_core::Result<Vec<Entity>> {
        Ok(Vec::new())
    }

    async fn triples(&self, _tenant: &str) -> rae_core::Result<Vec<GraphTriple>> {
        Ok(vec![self.triple.clone()])
    }

    async fn entities_for_artifact(
        &self,
        _tenant: &str,
        _artifact_id: Uuid,
    ) -> rae_core::Result<Vec<Uuid>> {
        Err(Error::StorageUnavailable("graph shard offline".into()))
    }

    async fn update_entity_importances(
        &self,
        _tenant: &str,
        _importances: &[(Uuid, f64)],
    ) -> rae_core::Result<()> {
        Ok(())
    }

    async fn delete_for_artifact(&self, _tenant: &str, _artifact_id: Uuid) -> rae_core::Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn test_graph_store_failure_mid_expansion_degrades() {
    let engine = rae_core::engine::RaeEngineBuilder::new()
        .graph_store(Arc::new(FlakyGraphStore::new()))
        .embedder(Arc::new(
            rae_core::providers::MockEmbeddingProvider::with_default_models(),
        ))
        .llm(Arc::new(rae_core::providers::MockLlmProvider::constant("x")))
        .build()
        .unwrap();

    let fact = create_fact("graph expansion survivor", &[], 0.7);
    let fact_id = fact.id;
    engine.store(fact).await.unwrap();

    // The triple listing succeeds, so the stage starts; the traversal
    // lookup then keeps failing past its retry. The retrieval must come
    // back degraded with the expansion annotated, not error out.
    let mut options = RetrievalOptions::top_k(5);
    options.expand_graph = true;
    let result = engine
        .retrieve(&test_scope(), "graph expansion survivor", &options)
        .await
        .unwrap();

    assert!(result.degraded);
    assert!(result
        .skipped_stages
        .iter()
        .any(|s| s.stage == Stage::GraphExpansion));
    assert!(result.graph_context.is_none());
    assert_eq!(result.results[0].artifact.id, fact_id);
}

#[tokio::test]
async fn test_no_lexical_overlap_returns_empty() {
    let engine = build_test_engine(ManualClock::now());
    engine
        .store(create_fact("completely unrelated content", &[], 0.9))
        .await
        .unwrap();

    let result = engine
        .retrieve(&test_scope(), "zzyzx quux", &RetrievalOptions::top_k(5))
        .await
        .unwrap();
    assert!(result.results.is_empty());
    assert!(!result.degraded);
}

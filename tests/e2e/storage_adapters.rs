//! End-to-end runs over the durable adapters: Turso artifacts + graph,
//! redb vectors, wired into the full engine.

use rae_core::engine::RaeEngineBuilder;
use rae_core::providers::{MockEmbeddingProvider, MockLlmProvider};
use rae_core::retrieval::RetrievalOptions;
use rae_core::{ArtifactFilter, MemoryArtifact, MemoryLayer, Scope};
use rae_storage_redb::RedbVectorIndex;
use rae_storage_turso::TursoStorage;
use std::sync::Arc;

fn scope() -> Scope {
    Scope::new("adapter-tenant", "adapter-project").unwrap()
}

async fn durable_parts() -> (Arc<TursoStorage>, Arc<RedbVectorIndex>, tempfile::TempDir) {
    let storage = TursoStorage::new(":memory:", "").await.unwrap();
    storage.initialize_schema().await.unwrap();
    let dir = tempfile::tempdir().unwrap();
    let vectors = RedbVectorIndex::new(&dir.path().join("vectors.redb"))
        .await
        .unwrap();
    (Arc::new(storage), Arc::new(vectors), dir)
}

#[tokio::test]
async fn test_store_and_retrieve_over_durable_adapters() {
    let (storage, vectors, _dir) = durable_parts().await;
    let engine = RaeEngineBuilder::new()
        .storage(storage.clone())
        .graph_store(storage)
        .vectors(vectors)
        .embedder(Arc::new(MockEmbeddingProvider::with_default_models()))
        .llm(Arc::new(MockLlmProvider::constant("insight")))
        .build()
        .unwrap();

    let fact = MemoryArtifact::new(
        scope(),
        MemoryLayer::Semantic,
        "PostgreSQL supports JSONB".into(),
    )
    .with_tags(vec!["db".into(), "postgres".into()])
    .with_importance(0.8);
    let fact_id = fact.id;
    engine.store(fact).await.unwrap();
    engine
        .store(MemoryArtifact::new(
            scope(),
            MemoryLayer::Semantic,
            "Axum handles HTTP routing".into(),
        ))
        .await
        .unwrap();

    let result = engine
        .retrieve(
            &scope(),
            "which databases have JSON support?",
            &RetrievalOptions::top_k(5),
        )
        .await
        .unwrap();
    assert!(!result.degraded);
    assert_eq!(result.results[0].artifact.id, fact_id);
    assert!(result.results[0].composite >= 0.5);
}

#[tokio::test]
async fn test_graph_extraction_over_turso() {
    let (storage, vectors, _dir) = durable_parts().await;
    let triples_json = r#"[
        {"subject": "PostgreSQL", "subject_type": "technology",
         "predicate": "supports", "object": "JSONB", "object_type": "format",
         "confidence": 0.9}
    ]"#;
    let engine = RaeEngineBuilder::new()
        .storage(storage.clone())
        .graph_store(storage.clone())
        .vectors(vectors)
        .embedder(Arc::new(MockEmbeddingProvider::with_default_models()))
        .llm(Arc::new(MockLlmProvider::constant(triples_json)))
        .build()
        .unwrap();

    engine
        .store(MemoryArtifact::new(
            scope(),
            MemoryLayer::Semantic,
            "PostgreSQL supports JSONB".into(),
        ))
        .await
        .unwrap();

    let added = engine
        .extract_graph(&scope(), &ArtifactFilter::default())
        .await
        .unwrap();
    assert_eq!(added, 1);

    // Entities landed in the SQL graph with PageRank importances.
    use rae_core::GraphStore;
    let entities = storage.entities("adapter-tenant").await.unwrap();
    assert_eq!(entities.len(), 2);
    assert!(entities.iter().all(|e| e.importance > 0.0));

    // Graph-expanded retrieval synthesizes a context string.
    let mut options = RetrievalOptions::top_k(5);
    options.expand_graph = true;
    let result = engine
        .retrieve(&scope(), "postgresql jsonb", &options)
        .await
        .unwrap();
    let context = result.graph_context.expect("graph context synthesized");
    assert!(context.contains("SUPPORTS"));
}

#[tokio::test]
async fn test_decay_and_prune_over_durable_adapters() {
    let (storage, vectors, _dir) = durable_parts().await;
    let engine = RaeEngineBuilder::new()
        .storage(storage.clone())
        .graph_store(storage.clone())
        .vectors(vectors.clone())
        .embedder(Arc::new(MockEmbeddingProvider::with_default_models()))
        .llm(Arc::new(MockLlmProvider::constant("insight")))
        .build()
        .unwrap();

    let mut stale = MemoryArtifact::new(scope(), MemoryLayer::Episodic, "stale episode".into());
    stale.created_at = chrono::Utc::now() - chrono::Duration::days(60);
    stale.last_accessed_at = stale.created_at;
    let stale_id = stale.id;
    engine.store(stale).await.unwrap();

    let report = engine.run_decay(&scope()).await.unwrap();
    assert_eq!(report.scanned, 1);
    assert_eq!(report.decayed, 1);

    let worker = engine.background_worker();
    worker.register_tenant("adapter-tenant");
    let pruned = worker.run_prune_once("adapter-tenant").await.unwrap().unwrap();
    assert_eq!(pruned, 1);

    use rae_core::{MemoryStorage, VectorIndex};
    assert!(storage.get(&scope(), stale_id).await.unwrap().is_none());
    assert!(vectors
        .get(&scope(), stale_id, "local-minilm-384")
        .await
        .unwrap()
        .is_none());
}

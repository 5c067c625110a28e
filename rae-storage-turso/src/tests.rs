//! Adapter tests against a local in-memory libSQL database.

use crate::TursoStorage;
use rae_core::{
    AggregateField, AggregateOp, ArtifactFilter, Entity, Error, GraphStore, GraphTriple,
    MemoryArtifact, MemoryLayer, MemoryStorage, Scope,
};
use uuid::Uuid;

async fn storage() -> TursoStorage {
    let storage = TursoStorage::new(":memory:", "").await.unwrap();
    storage.initialize_schema().await.unwrap();
    storage
}

fn scope() -> Scope {
    Scope::new("t1", "p1").unwrap()
}

fn other_scope() -> Scope {
    Scope::new("t2", "p1").unwrap()
}

#[tokio::test]
async fn test_insert_get_round_trip() {
    let storage = storage().await;
    let artifact = MemoryArtifact::new(scope(), MemoryLayer::Semantic, "fact".into())
        .with_tags(vec!["db".into()])
        .with_metadata("source", serde_json::json!("manual"));
    storage.insert(&artifact).await.unwrap();

    let fetched = storage.get(&scope(), artifact.id).await.unwrap().unwrap();
    assert_eq!(fetched.id, artifact.id);
    assert_eq!(fetched.content, artifact.content);
    assert_eq!(fetched.tags, artifact.tags);
    assert_eq!(fetched.metadata, artifact.metadata);
    assert_eq!(fetched.layer, MemoryLayer::Semantic);
    // Timestamps survive with millisecond precision.
    assert_eq!(
        fetched.created_at.timestamp_millis(),
        artifact.created_at.timestamp_millis()
    );
}

#[tokio::test]
async fn test_tenant_isolation() {
    let storage = storage().await;
    let artifact = MemoryArtifact::new(scope(), MemoryLayer::Semantic, "secret".into());
    storage.insert(&artifact).await.unwrap();

    assert!(storage
        .get(&other_scope(), artifact.id)
        .await
        .unwrap()
        .is_none());
    assert!(!storage.delete(&other_scope(), artifact.id).await.unwrap());
    assert_eq!(
        storage
            .count(&other_scope(), &ArtifactFilter::default())
            .await
            .unwrap(),
        0
    );
}

#[tokio::test]
async fn test_reflective_without_provenance_rejected() {
    let storage = storage().await;
    let orphan = MemoryArtifact::new(scope(), MemoryLayer::Reflective, "insight".into());
    assert!(matches!(
        storage.insert(&orphan).await,
        Err(Error::ConstraintViolation(_))
    ));
}

#[tokio::test]
async fn test_duplicate_primary_key_is_constraint_violation() {
    let storage = storage().await;
    let artifact = MemoryArtifact::new(scope(), MemoryLayer::Semantic, "x".into());
    storage.insert(&artifact).await.unwrap();
    assert!(matches!(
        storage.insert(&artifact).await,
        Err(Error::ConstraintViolation(_))
    ));
}

#[tokio::test]
async fn test_layer_demotion_rejected() {
    let storage = storage().await;
    let artifact = MemoryArtifact::new(scope(), MemoryLayer::Semantic, "fact".into());
    storage.insert(&artifact).await.unwrap();

    let mut demoted = artifact.clone();
    demoted.layer = MemoryLayer::Episodic;
    assert!(matches!(
        storage.update(&demoted).await,
        Err(Error::ConstraintViolation(_))
    ));
}

#[tokio::test]
async fn test_filters_and_limit() {
    let storage = storage().await;
    for i in 0..5 {
        let layer = if i % 2 == 0 {
            MemoryLayer::Episodic
        } else {
            MemoryLayer::Semantic
        };
        let artifact = MemoryArtifact::new(scope(), layer, format!("doc {i}"))
            .with_tags(vec![format!("tag{i}")]);
        storage.insert(&artifact).await.unwrap();
    }

    let episodic = storage
        .list(&scope(), &ArtifactFilter::layer(MemoryLayer::Episodic))
        .await
        .unwrap();
    assert_eq!(episodic.len(), 3);

    let limited = storage
        .list(
            &scope(),
            &ArtifactFilter {
                limit: Some(2),
                ..ArtifactFilter::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(limited.len(), 2);

    let tagged = storage
        .list(
            &scope(),
            &ArtifactFilter {
                tags_any: vec!["tag3".into()],
                ..ArtifactFilter::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(tagged.len(), 1);
    assert_eq!(tagged[0].tags, vec!["tag3".to_string()]);
}

#[tokio::test]
async fn test_adjust_importance_clamps_at_bounds() {
    let storage = storage().await;
    let artifact = MemoryArtifact::new(scope(), MemoryLayer::Semantic, "x".into())
        .with_importance(0.95);
    storage.insert(&artifact).await.unwrap();

    storage
        .adjust_importance(&scope(), artifact.id, 0.2)
        .await
        .unwrap();
    let boosted = storage.get(&scope(), artifact.id).await.unwrap().unwrap();
    assert!((boosted.importance - 1.0).abs() < 1e-6);

    storage
        .adjust_importance(&scope(), artifact.id, -5.0)
        .await
        .unwrap();
    let floored = storage.get(&scope(), artifact.id).await.unwrap().unwrap();
    assert!((floored.importance - 0.01).abs() < 1e-6);

    assert!(matches!(
        storage
            .adjust_importance(&scope(), Uuid::new_v4(), 0.1)
            .await,
        Err(Error::NotFound(_))
    ));
}

#[tokio::test]
async fn test_access_stats_batch() {
    let storage = storage().await;
    let artifact = MemoryArtifact::new(scope(), MemoryLayer::Episodic, "x".into());
    storage.insert(&artifact).await.unwrap();

    let later = chrono::Utc::now() + chrono::Duration::hours(1);
    storage
        .update_access_stats(
            &scope(),
            &[rae_core::AccessStatsUpdate {
                artifact_id: artifact.id,
                accessed_at: later,
            }],
        )
        .await
        .unwrap();

    let touched = storage.get(&scope(), artifact.id).await.unwrap().unwrap();
    assert_eq!(touched.usage_count, 1);
    assert_eq!(
        touched.last_accessed_at.timestamp_millis(),
        later.timestamp_millis()
    );
}

#[tokio::test]
async fn test_aggregate_sum_and_avg() {
    let storage = storage().await;
    for importance in [0.2_f32, 0.6] {
        let artifact = MemoryArtifact::new(scope(), MemoryLayer::Semantic, "x".into())
            .with_importance(importance);
        storage.insert(&artifact).await.unwrap();
    }
    let avg = storage
        .aggregate(
            &scope(),
            &ArtifactFilter::default(),
            AggregateField::Importance,
            AggregateOp::Avg,
        )
        .await
        .unwrap();
    assert!((avg - 0.4).abs() < 1e-5);

    let empty = storage
        .aggregate(
            &other_scope(),
            &ArtifactFilter::default(),
            AggregateField::Importance,
            AggregateOp::Sum,
        )
        .await
        .unwrap();
    assert_eq!(empty, 0.0);
}

#[tokio::test]
async fn test_fingerprint_lookup() {
    let storage = storage().await;
    let artifact = MemoryArtifact::new(scope(), MemoryLayer::Semantic, "dedup me".into());
    storage.insert(&artifact).await.unwrap();

    let found = storage
        .find_by_fingerprint(&scope(), &artifact.content_fingerprint())
        .await
        .unwrap();
    assert_eq!(found.unwrap().id, artifact.id);

    assert!(storage
        .find_by_fingerprint(&scope(), "missing")
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_list_projects() {
    let storage = storage().await;
    for project in ["alpha", "beta", "alpha"] {
        let scope = Scope::new("t1", project).unwrap();
        storage
            .insert(&MemoryArtifact::new(scope, MemoryLayer::Episodic, "x".into()))
            .await
            .unwrap();
    }
    assert_eq!(
        storage.list_projects("t1").await.unwrap(),
        vec!["alpha".to_string(), "beta".to_string()]
    );
    assert!(storage.list_projects("").await.is_err());
}

// ---- graph store -------------------------------------------------------

#[tokio::test]
async fn test_entity_dedup_and_lookup() {
    let storage = storage().await;
    let first = Entity::new("t1", "rust", "technology");
    let id = storage.upsert_entity(&first).await.unwrap();

    let duplicate = Entity::new("t1", "rust", "technology");
    assert_eq!(storage.upsert_entity(&duplicate).await.unwrap(), id);

    let found = storage.find_entity("t1", "rust").await.unwrap().unwrap();
    assert_eq!(found.id, id);
    assert!(storage.find_entity("t2", "rust").await.unwrap().is_none());
}

#[tokio::test]
async fn test_triple_dedup_keeps_highest_confidence() {
    let storage = storage().await;
    let (s, o, src) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());

    storage
        .insert_triple(&GraphTriple::new("t1", s, "USES", o, 0.6, src))
        .await
        .unwrap();
    storage
        .insert_triple(&GraphTriple::new("t1", s, "USES", o, 0.9, src))
        .await
        .unwrap();
    storage
        .insert_triple(&GraphTriple::new("t1", s, "USES", o, 0.3, src))
        .await
        .unwrap();

    let triples = storage.triples("t1").await.unwrap();
    assert_eq!(triples.len(), 1);
    assert!((triples[0].confidence - 0.9).abs() < 1e-6);
}

#[tokio::test]
async fn test_neighbors_bidirectional_with_threshold() {
    let storage = storage().await;
    let (a, b, src) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
    storage
        .insert_triple(&GraphTriple::new("t1", a, "IMPORTS", b, 0.8, src))
        .await
        .unwrap();

    let from_object = storage.neighbors("t1", b, 0.5).await.unwrap();
    assert_eq!(from_object.len(), 1);
    assert_eq!(from_object[0].subject, a);
    assert!(storage.neighbors("t1", b, 0.9).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_provenance_cascade() {
    let storage = storage().await;
    let (a, b, src) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
    storage
        .insert_triple(&GraphTriple::new("t1", a, "USES", b, 0.8, src))
        .await
        .unwrap();

    let mentioned = storage.entities_for_artifact("t1", src).await.unwrap();
    assert_eq!(mentioned.len(), 2);

    storage.delete_for_artifact("t1", src).await.unwrap();
    assert!(storage.triples("t1").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_importance_writeback() {
    let storage = storage().await;
    let entity = Entity::new("t1", "tokio", "technology");
    let id = storage.upsert_entity(&entity).await.unwrap();

    storage
        .update_entity_importances("t1", &[(id, 0.42)])
        .await
        .unwrap();
    let updated = storage.get_entity("t1", id).await.unwrap().unwrap();
    assert!((updated.importance - 0.42).abs() < 1e-9);
}

#[tokio::test]
async fn test_rejects_bad_urls() {
    assert!(matches!(
        TursoStorage::new("https://insecure.example", "tok").await,
        Err(Error::Config(_))
    ));
    assert!(matches!(
        TursoStorage::new("libsql://db.example", "").await,
        Err(Error::Config(_))
    ));
}

//! Reflection lifecycle scenarios: success reinforcement, Szubar
//! failure demotion, and hierarchical map-reduce consolidation.

use rae_core::retrieval::RetrievalOptions;
use rae_core::{ArtifactFilter, MemoryLayer, MemoryStorage, TraceOutcome};
use test_utils::{
    build_test_engine, create_fact, create_test_artifact, create_trace, test_scope, ManualClock,
};

#[tokio::test]
async fn test_success_trace_creates_reflection_and_reinforces() {
    let engine = build_test_engine(ManualClock::now());

    let artifact = create_fact("use staged rollouts for deploys", &["deploy"], 0.5);
    let artifact_id = artifact.id;
    engine.store(artifact).await.unwrap();

    let trace = create_trace("deploy the billing service", vec![artifact_id])
        .with_outcome(TraceOutcome::Success);
    let reflection = engine.reflect(&trace).await.unwrap().expect("reflection");

    assert_eq!(reflection.layer, MemoryLayer::Reflective);
    assert!(reflection.provenance.contains(&artifact_id));

    let reinforced = engine
        .storage()
        .get(&test_scope(), artifact_id)
        .await
        .unwrap()
        .unwrap();
    assert!((reinforced.importance - 0.55).abs() < 1e-6);

    // Subsequent retrievals matching the source get the success bonus.
    let result = engine
        .retrieve(
            &test_scope(),
            "staged rollouts for deploys",
            &RetrievalOptions::top_k(5),
        )
        .await
        .unwrap();
    let entry = result
        .results
        .iter()
        .find(|r| r.artifact.id == artifact_id)
        .expect("source ranked");
    assert!(entry
        .ranking_provenance
        .iter()
        .any(|p| p.starts_with("reflective_bonus:+")));
}

#[tokio::test]
async fn test_failure_fingerprint_surfaces_negative_exemplar() {
    let engine = build_test_engine(ManualClock::now());

    let artifact = create_fact("the flux capacitor deployment runbook", &["deploy"], 0.5);
    let artifact_id = artifact.id;
    engine.store(artifact).await.unwrap();

    // Several strong distractors that would normally fill the top ranks.
    for i in 0..4 {
        engine
            .store(create_fact(
                &format!("flux capacitor maintenance note {i}"),
                &["deploy"],
                0.9,
            ))
            .await
            .unwrap();
    }

    let trace = create_trace("deploy the flux capacitor to production", vec![artifact_id])
        .with_error("phase inversion");
    let failure_reflection = engine.reflect(&trace).await.unwrap().expect("reflection");

    // A retrieval matching the failure fingerprint must surface the
    // reflection in the top 3, ahead of higher-similarity distractors.
    let result = engine
        .retrieve(
            &test_scope(),
            "deploy flux capacitor production",
            &RetrievalOptions::top_k(5),
        )
        .await
        .unwrap();
    let top3: Vec<_> = result
        .results
        .iter()
        .take(3)
        .map(|r| r.artifact.id)
        .collect();
    assert!(
        top3.contains(&failure_reflection.id),
        "failure reflection not in top 3"
    );

    // And the failed source is demoted back to its starting band.
    let demoted = engine
        .storage()
        .get(&test_scope(), artifact_id)
        .await
        .unwrap()
        .unwrap();
    assert!((demoted.importance - 0.45).abs() < 1e-6);
}

#[tokio::test]
async fn test_unrelated_query_does_not_trigger_szubar() {
    let engine = build_test_engine(ManualClock::now());

    let artifact = create_fact("unrelated background fact", &[], 0.5);
    let artifact_id = artifact.id;
    engine.store(artifact).await.unwrap();

    let trace = create_trace("deploy the flux capacitor to production", vec![artifact_id])
        .with_error("phase inversion");
    let failure_reflection = engine.reflect(&trace).await.unwrap().expect("reflection");

    engine
        .store(create_fact("rust compiler diagnostics guide", &["lang"], 0.6))
        .await
        .unwrap();
    let result = engine
        .retrieve(
            &test_scope(),
            "rust compiler diagnostics",
            &RetrievalOptions::top_k(5),
        )
        .await
        .unwrap();
    assert!(result
        .results
        .iter()
        .all(|r| r.artifact.id != failure_reflection.id));
}

#[tokio::test]
async fn test_neutral_trace_archives_without_reflection() {
    let engine = build_test_engine(ManualClock::now());
    let artifact = create_fact("some fact", &[], 0.5);
    let artifact_id = artifact.id;
    engine.store(artifact).await.unwrap();

    let trace = create_trace("an unremarkable lookup", vec![artifact_id]);
    assert!(engine.reflect(&trace).await.unwrap().is_none());

    let reflective = engine
        .storage()
        .list(
            &test_scope(),
            &ArtifactFilter::layer(MemoryLayer::Reflective),
        )
        .await
        .unwrap();
    assert!(reflective.is_empty());
}

#[tokio::test]
async fn test_hierarchical_reflection_map_reduce_counts() {
    let engine = build_test_engine(ManualClock::now());

    for i in 0..25 {
        engine
            .store(create_test_artifact(
                MemoryLayer::Episodic,
                &format!("investigated flaky integration test number {i}"),
            ))
            .await
            .unwrap();
    }

    let report = engine
        .run_hierarchical_reflection(&test_scope())
        .await
        .unwrap();
    assert_eq!(report.episodes, 25);
    assert_eq!(report.level1_summaries, 3); // buckets of 10, 10, 5
    assert_eq!(report.level2_summaries, 1);

    let reflective = engine
        .storage()
        .list(
            &test_scope(),
            &ArtifactFilter::layer(MemoryLayer::Reflective),
        )
        .await
        .unwrap();
    assert!(
        reflective.iter().any(|a| a.provenance.len() == 25),
        "reduce-level summary must cite the union of all 25 episodes"
    );
}

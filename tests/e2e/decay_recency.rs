//! Decay-and-recency scenario: accelerated-zone decay over 45 days,
//! then the protected-zone recency advantage of an accessed artifact.

use rae_core::retrieval::RetrievalOptions;
use rae_core::{AccessStatsUpdate, MemoryStorage};
use test_utils::{build_test_engine, create_fact, test_scope, ManualClock};

#[tokio::test]
async fn test_45_days_of_daily_decay_lands_in_expected_band() {
    let clock = ManualClock::now();
    let engine = build_test_engine(clock.clone());

    let artifact = create_fact("decaying knowledge", &[], 0.8);
    let id = engine.store(artifact).await.unwrap();

    for _ in 0..45 {
        clock.advance_days(1);
        engine.run_decay(&test_scope()).await.unwrap();
    }

    let decayed = engine
        .storage()
        .get(&test_scope(), id)
        .await
        .unwrap()
        .unwrap();
    assert!(
        (0.5..=0.55).contains(&decayed.importance),
        "importance was {}",
        decayed.importance
    );
}

#[tokio::test]
async fn test_zero_rate_decay_is_idempotent() {
    let clock = ManualClock::now();
    let mut config = rae_core::RaeConfig::default();
    config.decay.base_rate = 0.0;
    let engine = test_utils::build_test_engine_with_config(clock.clone(), config);

    let id = engine
        .store(create_fact("immortal fact", &[], 0.42))
        .await
        .unwrap();
    clock.advance_days(100);
    engine.run_decay(&test_scope()).await.unwrap();

    let unchanged = engine
        .storage()
        .get(&test_scope(), id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(unchanged.importance, 0.42);
}

#[tokio::test]
async fn test_accessed_artifact_scores_fresher_than_untouched_twin() {
    let clock = ManualClock::now();
    let engine = build_test_engine(clock.clone());

    let accessed = create_fact("shared retention topic alpha", &[], 0.6);
    let untouched = create_fact("shared retention topic beta", &[], 0.6);
    let accessed_id = accessed.id;
    let untouched_id = untouched.id;
    engine.store(accessed).await.unwrap();
    engine.store(untouched).await.unwrap();

    // A long idle stretch with daily decay.
    for _ in 0..45 {
        clock.advance_days(1);
        engine.run_decay(&test_scope()).await.unwrap();
    }

    // Access one of the twins, then query a day later.
    engine
        .storage()
        .update_access_stats(
            &test_scope(),
            &[AccessStatsUpdate {
                artifact_id: accessed_id,
                accessed_at: clock.current(),
            }],
        )
        .await
        .unwrap();
    clock.advance_days(1);

    let result = engine
        .retrieve(
            &test_scope(),
            "shared retention topic",
            &RetrievalOptions::top_k(5),
        )
        .await
        .unwrap();

    let recency_of = |id| {
        result
            .results
            .iter()
            .find(|r| r.artifact.id == id)
            .map(|r| r.sub_scores.recency)
            .expect("artifact ranked")
    };
    assert!(recency_of(accessed_id) > recency_of(untouched_id));
}

//! Shared helpers for the criterion benches.

use rae_core::{MemoryArtifact, MemoryLayer, Scope, SemanticView};

/// Deterministic pseudo-embedding for benchmark candidates.
#[must_use]
pub fn bench_vector(seed: u64, dimension: usize) -> Vec<f32> {
    // xorshift keeps the fixture cheap and reproducible.
    let mut state = seed.wrapping_mul(0x9e37_79b9_7f4a_7c15) | 1;
    (0..dimension)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            (state as f32 / u64::MAX as f32) * 2.0 - 1.0
        })
        .collect()
}

/// A candidate pool of `n` semantic artifacts with embeddings.
#[must_use]
pub fn bench_pool(n: usize, dimension: usize) -> Vec<(MemoryArtifact, SemanticView)> {
    let scope = Scope::new("bench-tenant", "bench-project").unwrap();
    (0..n)
        .map(|i| {
            let artifact = MemoryArtifact::new(
                scope.clone(),
                MemoryLayer::Semantic,
                format!("benchmark document number {i} about retrieval pipelines"),
            );
            let view = SemanticView::new(artifact.id, "bench-model", bench_vector(i as u64, dimension));
            (artifact, view)
        })
        .collect()
}

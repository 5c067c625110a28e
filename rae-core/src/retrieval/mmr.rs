//! Diversity-aware re-ordering (maximal marginal relevance).
//!
//! `λ·score − (1−λ)·max_similarity_to_selected`, greedily. λ = 1 is
//! pure relevance, λ = 0 pure diversity.

use super::RankedArtifact;
use crate::storage::memory::cosine_similarity;
use std::collections::HashMap;
use uuid::Uuid;

/// Re-order ranked artifacts by MMR. `vectors` maps artifact ids to
/// embeddings under one model; artifacts without a vector contribute no
/// similarity penalty and compete on score alone.
#[must_use]
pub fn mmr_reorder(
    ranked: Vec<RankedArtifact>,
    vectors: &HashMap<Uuid, Vec<f32>>,
    lambda: f32,
) -> Vec<RankedArtifact> {
    if ranked.len() <= 1 {
        return ranked;
    }
    let lambda = f64::from(lambda.clamp(0.0, 1.0));

    let mut remaining = ranked;
    let mut selected: Vec<RankedArtifact> = Vec::with_capacity(remaining.len());

    while !remaining.is_empty() {
        let mut best_index = 0usize;
        let mut best_value = f64::NEG_INFINITY;
        for (index, candidate) in remaining.iter().enumerate() {
            let redundancy = vectors
                .get(&candidate.artifact.id)
                .map(|candidate_vec| {
                    selected
                        .iter()
                        .filter_map(|s| vectors.get(&s.artifact.id))
                        .map(|selected_vec| {
                            f64::from(cosine_similarity(candidate_vec, selected_vec))
                        })
                        .fold(0.0_f64, f64::max)
                })
                .unwrap_or(0.0);
            let value = lambda * candidate.composite - (1.0 - lambda) * redundancy;
            if value > best_value {
                best_value = value;
                best_index = index;
            }
        }
        selected.push(remaining.remove(best_index));
    }
    selected
}

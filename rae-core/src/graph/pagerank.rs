//! PageRank over the tenant knowledge graph.
//!
//! Scores are recomputed on a schedule (or on demand) and written back
//! onto entities; retrieval reads the cached values, never recomputes
//! inline.

use crate::types::GraphTriple;
use std::collections::HashMap;
use uuid::Uuid;

const DAMPING: f64 = 0.85;
const MAX_ITERATIONS: usize = 50;
const CONVERGENCE_EPSILON: f64 = 1e-8;

/// Compute PageRank over the entities touched by a triple set.
///
/// Edges are directional (subject → object) and weighted by confidence;
/// dangling mass is redistributed uniformly. Returns scores summing to
/// ~1.0, sorted by entity id for deterministic iteration.
#[must_use]
pub fn pagerank(triples: &[GraphTriple]) -> Vec<(Uuid, f64)> {
    let mut nodes: Vec<Uuid> = triples
        .iter()
        .flat_map(|t| [t.subject, t.object])
        .collect();
    nodes.sort();
    nodes.dedup();
    if nodes.is_empty() {
        return Vec::new();
    }

    let index: HashMap<Uuid, usize> = nodes
        .iter()
        .enumerate()
        .map(|(i, id)| (*id, i))
        .collect();
    let n = nodes.len();

    // Outgoing weighted edges per node.
    let mut out_edges: Vec<Vec<(usize, f64)>> = vec![Vec::new(); n];
    let mut out_weight: Vec<f64> = vec![0.0; n];
    for triple in triples {
        let from = index[&triple.subject];
        let to = index[&triple.object];
        let weight = f64::from(triple.confidence);
        if weight <= 0.0 {
            continue;
        }
        out_edges[from].push((to, weight));
        out_weight[from] += weight;
    }

    let mut rank = vec![1.0 / n as f64; n];
    for _ in 0..MAX_ITERATIONS {
        let mut next = vec![(1.0 - DAMPING) / n as f64; n];
        let mut dangling = 0.0_f64;

        for (from, edges) in out_edges.iter().enumerate() {
            if edges.is_empty() {
                dangling += rank[from];
                continue;
            }
            for (to, weight) in edges {
                next[*to] += DAMPING * rank[from] * weight / out_weight[from];
            }
        }
        let dangling_share = DAMPING * dangling / n as f64;
        for value in &mut next {
            *value += dangling_share;
        }

        let delta: f64 = rank
            .iter()
            .zip(&next)
            .map(|(old, new)| (old - new).abs())
            .sum();
        rank = next;
        if delta < CONVERGENCE_EPSILON {
            break;
        }
    }

    nodes.into_iter().zip(rank).collect()
}

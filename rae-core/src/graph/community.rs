//! Community detection: single-level Louvain on the confidence-weighted
//! undirected graph. Run on demand for clustering queries, never inside
//! the retrieval path.

use crate::types::GraphTriple;
use std::collections::HashMap;
use uuid::Uuid;

/// Detected communities: each inner vector is one community's entity
/// ids, sorted; communities sorted by their smallest member for
/// deterministic output.
#[must_use]
pub fn louvain_communities(triples: &[GraphTriple]) -> Vec<Vec<Uuid>> {
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

    // Undirected weighted adjacency; parallel edges accumulate.
    let mut weights: HashMap<(usize, usize), f64> = HashMap::new();
    let mut degree = vec![0.0_f64; n];
    let mut total_weight = 0.0_f64;
    for triple in triples {
        let a = index[&triple.subject];
        let b = index[&triple.object];
        let w = f64::from(triple.confidence);
        if w <= 0.0 || a == b {
            continue;
        }
        let key = if a < b { (a, b) } else { (b, a) };
        *weights.entry(key).or_default() += w;
        degree[a] += w;
        degree[b] += w;
        total_weight += w;
    }
    if total_weight == 0.0 {
        return nodes.into_iter().map(|id| vec![id]).collect();
    }

    let mut neighbors: Vec<Vec<(usize, f64)>> = vec![Vec::new(); n];
    for ((a, b), w) in &weights {
        neighbors[*a].push((*b, *w));
        neighbors[*b].push((*a, *w));
    }
    for list in &mut neighbors {
        list.sort_by(|x, y| x.0.cmp(&y.0));
    }

    // One-level modularity optimization: move nodes between communities
    // until no move improves modularity.
    let m2 = 2.0 * total_weight;
    let mut community: Vec<usize> = (0..n).collect();
    let mut community_degree = degree.clone();

    let mut improved = true;
    let mut rounds = 0usize;
    while improved && rounds < 20 {
        improved = false;
        rounds += 1;
        for node in 0..n {
            let current = community[node];
            // Weight from node to each neighboring community.
            let mut links: HashMap<usize, f64> = HashMap::new();
            for (neighbor, w) in &neighbors[node] {
                *links.entry(community[*neighbor]).or_default() += w;
            }

            community_degree[current] -= degree[node];
            let mut best = current;
            let mut best_gain = 0.0_f64;
            let mut candidates: Vec<(usize, f64)> = links.into_iter().collect();
            candidates.sort_by(|a, b| a.0.cmp(&b.0));
            for (candidate, link_weight) in candidates {
                let gain = link_weight - community_degree[candidate] * degree[node] / m2;
                let current_link = neighbors[node]
                    .iter()
                    .filter(|(nb, _)| community[*nb] == current && *nb != node)
                    .map(|(_, w)| w)
                    .sum::<f64>();
                let stay_gain = current_link - community_degree[current] * degree[node] / m2;
                if gain - stay_gain > best_gain + 1e-12 {
                    best_gain = gain - stay_gain;
                    best = candidate;
                }
            }
            community_degree[best] += degree[node];
            if best != current {
                community[node] = best;
                improved = true;
            }
        }
    }

    let mut grouped: HashMap<usize, Vec<Uuid>> = HashMap::new();
    for (node, comm) in community.iter().enumerate() {
        grouped.entry(*comm).or_default().push(nodes[node]);
    }
    let mut result: Vec<Vec<Uuid>> = grouped.into_values().collect();
    for group in &mut result {
        group.sort();
    }
    result.sort_by(|a, b| a[0].cmp(&b[0]));
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn triple(subject: Uuid, object: Uuid, confidence: f32) -> GraphTriple {
        GraphTriple::new("t", subject, "REL", object, confidence, Uuid::new_v4())
    }

    #[test]
    fn test_empty() {
        assert!(louvain_communities(&[]).is_empty());
    }

    #[test]
    fn test_two_cliques_split() {
        // Two dense triangles joined by one weak edge.
        let left: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();
        let right: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();
        let mut triples = Vec::new();
        for group in [&left, &right] {
            for i in 0..group.len() {
                for j in (i + 1)..group.len() {
                    triples.push(triple(group[i], group[j], 0.9));
                }
            }
        }
        triples.push(triple(left[0], right[0], 0.1));

        let communities = louvain_communities(&triples);
        assert_eq!(communities.len(), 2);
        let sizes: Vec<usize> = communities.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![3, 3]);
    }

    #[test]
    fn test_deterministic() {
        let nodes: Vec<Uuid> = (0..6).map(|_| Uuid::new_v4()).collect();
        let triples: Vec<GraphTriple> = nodes
            .windows(2)
            .map(|w| triple(w[0], w[1], 0.8))
            .collect();
        assert_eq!(louvain_communities(&triples), louvain_communities(&triples));
    }
}

//! In-memory traversal primitives over triple sets.
//!
//! Traversal always works on identifiers fetched from the store — the
//! graph is cyclic, so live cross-references between in-memory objects
//! are never held. Every walk is bounded by depth and a node cap.

use crate::types::GraphTriple;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};
use uuid::Uuid;

/// Undirected adjacency built from a triple set. Edges are inserted in
/// both directions so a traversal from the object side finds the
/// subject (bidirectionality invariant).
pub struct Adjacency {
    edges: HashMap<Uuid, Vec<Edge>>,
}

#[derive(Debug, Clone, Copy)]
struct Edge {
    to: Uuid,
    confidence: f32,
    weight: f64,
}

impl Adjacency {
    /// Build from triples at or above a confidence threshold.
    #[must_use]
    pub fn build(triples: &[GraphTriple], min_confidence: f32) -> Self {
        let mut edges: HashMap<Uuid, Vec<Edge>> = HashMap::new();
        for triple in triples {
            if triple.confidence < min_confidence {
                continue;
            }
            let weight = triple.edge_weight();
            edges.entry(triple.subject).or_default().push(Edge {
                to: triple.object,
                confidence: triple.confidence,
                weight,
            });
            edges.entry(triple.object).or_default().push(Edge {
                to: triple.subject,
                confidence: triple.confidence,
                weight,
            });
        }
        // Deterministic neighbor order.
        for list in edges.values_mut() {
            list.sort_by(|a, b| a.to.cmp(&b.to));
        }
        Self { edges }
    }

    /// Node ids present in the adjacency.
    #[must_use]
    pub fn nodes(&self) -> Vec<Uuid> {
        let mut nodes: Vec<Uuid> = self.edges.keys().copied().collect();
        nodes.sort();
        nodes
    }

    fn neighbors(&self, node: Uuid) -> &[Edge] {
        self.edges.get(&node).map_or(&[], Vec::as_slice)
    }
}

/// Breadth-first expansion from a seed set, bounded by hop depth and a
/// node cap. Returns visited nodes with their hop distance, seeds
/// included at distance 0.
#[must_use]
pub fn bfs(
    adjacency: &Adjacency,
    seeds: &[Uuid],
    max_depth: usize,
    max_nodes: usize,
) -> Vec<(Uuid, usize)> {
    let mut visited: HashSet<Uuid> = HashSet::new();
    let mut order: Vec<(Uuid, usize)> = Vec::new();
    let mut queue: VecDeque<(Uuid, usize)> = VecDeque::new();

    for seed in seeds {
        if visited.insert(*seed) {
            queue.push_back((*seed, 0));
            order.push((*seed, 0));
        }
    }

    while let Some((node, depth)) = queue.pop_front() {
        if depth >= max_depth || order.len() >= max_nodes {
            continue;
        }
        for edge in adjacency.neighbors(node) {
            if order.len() >= max_nodes {
                break;
            }
            if visited.insert(edge.to) {
                queue.push_back((edge.to, depth + 1));
                order.push((edge.to, depth + 1));
            }
        }
    }
    order
}

/// Depth-first expansion with the same bounds as [`bfs`].
#[must_use]
pub fn dfs(
    adjacency: &Adjacency,
    seeds: &[Uuid],
    max_depth: usize,
    max_nodes: usize,
) -> Vec<(Uuid, usize)> {
    let mut visited: HashSet<Uuid> = HashSet::new();
    let mut order: Vec<(Uuid, usize)> = Vec::new();
    let mut stack: Vec<(Uuid, usize)> = Vec::new();

    for seed in seeds.iter().rev() {
        stack.push((*seed, 0));
    }

    while let Some((node, depth)) = stack.pop() {
        if order.len() >= max_nodes {
            break;
        }
        if !visited.insert(node) {
            continue;
        }
        order.push((node, depth));
        if depth >= max_depth {
            continue;
        }
        for edge in adjacency.neighbors(node).iter().rev() {
            if !visited.contains(&edge.to) {
                stack.push((edge.to, depth + 1));
            }
        }
    }
    order
}

#[derive(Debug, PartialEq)]
struct HeapEntry {
    cost: f64,
    node: Uuid,
}

impl Eq for HeapEntry {}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Min-heap on cost, id tiebreak for determinism.
        other
            .cost
            .partial_cmp(&self.cost)
            .unwrap_or(Ordering::Equal)
            .then_with(|| other.node.cmp(&self.node))
    }
}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Dijkstra shortest path on 1/confidence edge weights. Returns the
/// node sequence from `from` to `to`, or `None` when unreachable.
#[must_use]
pub fn shortest_path(adjacency: &Adjacency, from: Uuid, to: Uuid) -> Option<Vec<Uuid>> {
    let mut dist: HashMap<Uuid, f64> = HashMap::new();
    let mut prev: HashMap<Uuid, Uuid> = HashMap::new();
    let mut heap = BinaryHeap::new();

    dist.insert(from, 0.0);
    heap.push(HeapEntry {
        cost: 0.0,
        node: from,
    });

    while let Some(HeapEntry { cost, node }) = heap.pop() {
        if node == to {
            let mut path = vec![to];
            let mut current = to;
            while let Some(p) = prev.get(&current) {
                path.push(*p);
                current = *p;
            }
            path.reverse();
            return Some(path);
        }
        if cost > dist.get(&node).copied().unwrap_or(f64::INFINITY) {
            continue;
        }
        for edge in adjacency.neighbors(node) {
            let next_cost = cost + edge.weight;
            if next_cost < dist.get(&edge.to).copied().unwrap_or(f64::INFINITY) {
                dist.insert(edge.to, next_cost);
                prev.insert(edge.to, node);
                heap.push(HeapEntry {
                    cost: next_cost,
                    node: edge.to,
                });
            }
        }
    }
    None
}

/// Extract the subgraph around a node set: all edges among the nodes,
/// plus edges crossing to the immediate boundary.
#[must_use]
pub fn subgraph(triples: &[GraphTriple], nodes: &[Uuid]) -> Vec<GraphTriple> {
    let node_set: HashSet<Uuid> = nodes.iter().copied().collect();
    let mut result: Vec<GraphTriple> = triples
        .iter()
        .filter(|t| node_set.contains(&t.subject) || node_set.contains(&t.object))
        .cloned()
        .collect();
    result.sort_by(|a, b| a.id.cmp(&b.id));
    result
}

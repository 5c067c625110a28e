//! # Knowledge Graph
//!
//! Entity/relation extraction ([`extractor`]), bounded traversal
//! ([`traversal`]), PageRank ([`pagerank`]), and community detection
//! ([`community`]) over the tenant-scoped triple store.
//!
//! The graph is an index over episodic/semantic artifacts, not a memory
//! layer of its own: triples carry the artifact they came from, and
//! artifact deletion cascades into the graph.

pub mod community;
pub mod extractor;
pub mod pagerank;
pub mod traversal;

pub use extractor::{canonicalize, ExtractedTriple, GraphExtractor};
pub use traversal::Adjacency;

use crate::storage::GraphStore;
use crate::types::GraphTriple;
use crate::Result;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, instrument};
use uuid::Uuid;

/// High-level graph operations over a [`GraphStore`].
///
/// Traversal fetches the tenant's triples and works on identifiers in
/// memory; PageRank results are written back onto entities so retrieval
/// reads cached centrality.
#[derive(Clone)]
pub struct GraphService {
    store: Arc<dyn GraphStore>,
}

impl GraphService {
    /// Wrap a graph store.
    #[must_use]
    pub fn new(store: Arc<dyn GraphStore>) -> Self {
        Self { store }
    }

    /// Access the underlying store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn GraphStore> {
        &self.store
    }

    /// Recompute PageRank for a tenant and persist entity importances.
    /// Returns the number of entities updated.
    #[instrument(skip(self))]
    pub async fn recompute_pagerank(&self, tenant: &str) -> Result<usize> {
        let triples = self.store.triples(tenant).await?;
        let scores = pagerank::pagerank(&triples);
        if scores.is_empty() {
            return Ok(0);
        }
        self.store
            .update_entity_importances(tenant, &scores)
            .await?;
        debug!(entities = scores.len(), "pagerank recomputed");
        Ok(scores.len())
    }

    /// Detect communities on demand.
    pub async fn communities(&self, tenant: &str) -> Result<Vec<Vec<Uuid>>> {
        let triples = self.store.triples(tenant).await?;
        Ok(community::louvain_communities(&triples))
    }

    /// Shortest path between two entities on 1/confidence weights.
    pub async fn shortest_path(
        &self,
        tenant: &str,
        from: Uuid,
        to: Uuid,
    ) -> Result<Option<Vec<Uuid>>> {
        let triples = self.store.triples(tenant).await?;
        let adjacency = Adjacency::build(&triples, 0.0);
        Ok(traversal::shortest_path(&adjacency, from, to))
    }

    /// Bounded BFS expansion from seed entities, following edges at or
    /// above `min_confidence`.
    pub async fn expand(
        &self,
        tenant: &str,
        seeds: &[Uuid],
        max_depth: usize,
        min_confidence: f32,
        max_nodes: usize,
    ) -> Result<Vec<(Uuid, usize)>> {
        if seeds.is_empty() || max_depth == 0 || max_nodes == 0 {
            return Ok(Vec::new());
        }
        let triples = self.store.triples(tenant).await?;
        let adjacency = Adjacency::build(&triples, min_confidence);
        Ok(traversal::bfs(&adjacency, seeds, max_depth, max_nodes))
    }

    /// Subgraph around a node set.
    pub async fn subgraph(&self, tenant: &str, nodes: &[Uuid]) -> Result<Vec<GraphTriple>> {
        let triples = self.store.triples(tenant).await?;
        Ok(traversal::subgraph(&triples, nodes))
    }

    /// Normalized centrality per artifact: the mean cached PageRank of
    /// the entities each artifact mentions, divided by the tenant-wide
    /// maximum. Artifacts mentioning nothing (or an empty graph) get
    /// zero.
    pub async fn centrality_for_artifacts(
        &self,
        tenant: &str,
        artifact_ids: &[Uuid],
    ) -> Result<HashMap<Uuid, f64>> {
        let mut centrality = HashMap::with_capacity(artifact_ids.len());
        let entities = self.store.entities(tenant).await?;
        if entities.is_empty() {
            for id in artifact_ids {
                centrality.insert(*id, 0.0);
            }
            return Ok(centrality);
        }
        let by_id: HashMap<Uuid, f64> = entities.iter().map(|e| (e.id, e.importance)).collect();
        let max_importance = entities
            .iter()
            .map(|e| e.importance)
            .fold(0.0_f64, f64::max);

        for artifact_id in artifact_ids {
            let mentioned = self
                .store
                .entities_for_artifact(tenant, *artifact_id)
                .await?;
            let importances: Vec<f64> = mentioned
                .iter()
                .filter_map(|id| by_id.get(id).copied())
                .collect();
            centrality.insert(
                *artifact_id,
                crate::scoring::normalized_centrality(&importances, max_importance),
            );
        }
        Ok(centrality)
    }
}

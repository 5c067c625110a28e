//! Federated query: requester and responder sides.

use super::registry::{PeerRegistry, TrustedPeer};
use super::{FederatedCandidate, FederatedQuery, RankedFederatedCandidate, SemanticAnchor};
use crate::error::Error;
use crate::providers::EmbeddingProvider;
use crate::retrieval::{HybridRetriever, RetrievalOptions};
use crate::storage::memory::cosine_similarity;
use crate::types::{ReflectiveTrace, Scope};
use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

/// Transport seam for peer communication. The HTTP layer lives outside
/// the core; tests plug in loopback transports.
#[async_trait]
pub trait FederationTransport: Send + Sync {
    /// Deliver a query to a peer and collect its candidates. A peer may
    /// refuse without explanation, which surfaces as an error here.
    async fn query(
        &self,
        peer: &TrustedPeer,
        request: &FederatedQuery,
    ) -> Result<Vec<FederatedCandidate>>;
}

/// Requester side: phase (a) send, phase (c) re-embed and re-rank.
pub struct FederationClient {
    registry: Arc<PeerRegistry>,
    transport: Arc<dyn FederationTransport>,
    embedder: Arc<dyn EmbeddingProvider>,
    local_model: String,
    max_peer_candidates: usize,
}

impl FederationClient {
    /// Assemble the client. `local_model` is the requester's own
    /// embedding model used for re-ranking.
    #[must_use]
    pub fn new(
        registry: Arc<PeerRegistry>,
        transport: Arc<dyn FederationTransport>,
        embedder: Arc<dyn EmbeddingProvider>,
        local_model: impl Into<String>,
        max_peer_candidates: usize,
    ) -> Self {
        Self {
            registry,
            transport,
            embedder,
            local_model: local_model.into(),
            max_peer_candidates,
        }
    }

    /// Issue a federated query against one trusted peer and re-rank the
    /// candidates in the local embedding space.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Federation`] for an unknown peer. Peer refusal
    /// and transport failure are reported as errors so the caller can
    /// annotate its result as degraded rather than silently empty.
    #[instrument(skip(self, request), fields(peer_id = %peer_id))]
    pub async fn federated_query(
        &self,
        peer_id: &str,
        request: &FederatedQuery,
    ) -> Result<Vec<RankedFederatedCandidate>> {
        let peer = self
            .registry
            .get(peer_id)
            .ok_or_else(|| Error::Federation(format!("unknown peer '{peer_id}'")))?;

        let mut candidates = self.transport.query(&peer, request).await?;
        candidates.truncate(self.max_peer_candidates);
        debug!(received = candidates.len(), "peer candidates received");
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        // Phase (c): re-embed locally; peer vectors never existed here.
        let query_vec = self
            .embedder
            .embed(&request.query_text, &self.local_model)
            .await?;
        let mut ranked = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            let embed_text = candidate
                .anchor
                .as_ref()
                .map_or_else(|| candidate.snippet.clone(), |a| {
                    format!("{} {}", a.summary, candidate.snippet)
                });
            let local_relevance = match self.embedder.embed(&embed_text, &self.local_model).await {
                Ok(vector) => f64::from(cosine_similarity(&query_vec, &vector)),
                Err(error) => {
                    warn!(%error, "candidate re-embedding failed, ranking at zero relevance");
                    0.0
                }
            };
            ranked.push(RankedFederatedCandidate {
                candidate,
                peer_id: peer.peer_id.clone(),
                local_relevance,
            });
        }
        ranked.sort_by(|a, b| {
            b.local_relevance
                .partial_cmp(&a.local_relevance)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.candidate.artifact_id.cmp(&b.candidate.artifact_id))
        });
        Ok(ranked)
    }
}

/// Responder side: authenticate the bearer, retrieve within the
/// caller's tenant, strip everything the protocol forbids.
pub struct FederationServer {
    registry: Arc<PeerRegistry>,
    retriever: Arc<HybridRetriever>,
    project: String,
}

impl FederationServer {
    /// Assemble the responder. `project` names the project partition
    /// federated queries are answered from.
    #[must_use]
    pub fn new(
        registry: Arc<PeerRegistry>,
        retriever: Arc<HybridRetriever>,
        project: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            retriever,
            project: project.into(),
        }
    }

    /// Serve one federated query.
    ///
    /// The bearer token decides the tenant — a peer can only ever see
    /// the tenant its handshake scoped it to, regardless of what it
    /// asks for.
    #[instrument(skip_all)]
    pub async fn handle_query(
        &self,
        bearer: &str,
        request: &FederatedQuery,
    ) -> Result<Vec<FederatedCandidate>> {
        let Some(peer) = self.registry.authenticate_inbound(bearer) else {
            // Refusal needs no explanation.
            return Err(Error::Federation("refused".into()));
        };
        let scope = Scope::new(peer.tenant.as_str(), self.project.as_str())?;

        let k = request.constraints.max_candidates.unwrap_or(20);
        let mut options = RetrievalOptions::top_k(k);
        options.filter.tags_any = request.constraints.tags_any.clone();

        let result = self
            .retriever
            .retrieve(
                &scope,
                &request.query_text,
                None,
                &options,
                &CancellationToken::new(),
            )
            .await?;

        Ok(result
            .results
            .into_iter()
            .map(|ranked| {
                let artifact = ranked.artifact;
                let outcome = ReflectiveTrace::from_artifact(&artifact).map(|t| t.outcome);
                FederatedCandidate {
                    artifact_id: artifact.id,
                    snippet: artifact.content.clone(),
                    metadata: artifact.metadata.clone(),
                    tags: artifact.tags.clone(),
                    provenance: artifact.provenance.clone(),
                    anchor: Some(SemanticAnchor {
                        summary: summarize_snippet(&artifact.content),
                        intent: request.intent.clone(),
                        outcome,
                    }),
                }
            })
            .collect())
    }
}

/// First-sentence-or-prefix summary for the semantic anchor.
fn summarize_snippet(content: &str) -> String {
    let first_sentence = content.split(['.', '\n']).next().unwrap_or(content).trim();
    let mut summary: String = first_sentence.chars().take(160).collect();
    if summary.len() < first_sentence.len() {
        summary.push('…');
    }
    summary
}

//! # Engine Facade
//!
//! [`RaeEngine`] wires storage adapters, providers, scoring, retrieval,
//! reflection, federation, and workers behind the six inbound
//! operations: `store`, `retrieve`, `assemble_context`, `reflect`,
//! `extract_graph`, and `federate_query`. The CLI/HTTP layers above
//! this are thin shims.

use crate::assembler::{AssembledContext, ContextAssembler};
use crate::clock::{system_clock, SharedClock};
use crate::config::RaeConfig;
use crate::decay::DecayService;
use crate::error::Error;
use crate::federation::{
    FederationClient, FederationServer, FederationTransport, InvitationToken, PeerRegistry,
    RankedFederatedCandidate, TrustedPeer,
};
use crate::graph::{GraphExtractor, GraphService};
use crate::providers::{CallEvent, EmbeddingProvider, HookSet, LlmProvider, ProviderKind};
use crate::reflection::{
    DeterministicEvaluator, EvaluationStrategy, HierarchicalReflector, ReflectionEngine, Reflector,
};
use crate::retrieval::{HybridRetriever, RetrievalOptions, RetrievalResult, RetrieverParts};
use crate::scoring::WeightBandit;
use crate::storage::memory::{InMemoryGraphStore, InMemoryStorage, InMemoryVectorIndex};
use crate::storage::{
    AccessStatsUpdate, AggregateField, AggregateOp, ArtifactFilter, GraphStore, MemoryStorage,
    VectorIndex,
};
use crate::types::{MemoryArtifact, MemoryLayer, Scope, SemanticView, TraceOutcome, TraceRecord};
use crate::worker::BackgroundWorker;
use crate::Result;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Per-tenant headline numbers, computed from storage aggregates.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TenantStats {
    /// Episodic artifact count.
    pub episodic: u64,
    /// Semantic artifact count.
    pub semantic: u64,
    /// Reflective artifact count.
    pub reflective: u64,
    /// Mean importance across the scope.
    pub avg_importance: f64,
    /// Token sum across the scope.
    pub total_tokens: f64,
}

/// Options for [`RaeEngine::assemble_context`].
#[derive(Debug, Clone, Default)]
pub struct AssembleOptions {
    /// Treat the query as complex (pull more context in).
    pub complex_query: bool,
    /// Synthesize an LLM summary of the assembled context. The caller
    /// authorizes the LLM cost by setting this.
    pub summarize: bool,
    /// Retrieval options for the underlying pipeline.
    pub retrieval: RetrievalOptions,
}

/// Builder for [`RaeEngine`]. Everything has a sensible default except
/// what genuinely identifies a deployment.
pub struct RaeEngineBuilder {
    config: RaeConfig,
    storage: Arc<dyn MemoryStorage>,
    vectors: Arc<dyn VectorIndex>,
    graph_store: Arc<dyn GraphStore>,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    llm: Option<Arc<dyn LlmProvider>>,
    clock: SharedClock,
    evaluator: Arc<dyn EvaluationStrategy>,
    transport: Option<Arc<dyn FederationTransport>>,
    federation_secret: Vec<u8>,
    hooks: HookSet,
}

impl Default for RaeEngineBuilder {
    fn default() -> Self {
        Self {
            config: RaeConfig::default(),
            storage: Arc::new(InMemoryStorage::new()),
            vectors: Arc::new(InMemoryVectorIndex::new()),
            graph_store: Arc::new(InMemoryGraphStore::new()),
            embedder: None,
            llm: None,
            clock: system_clock(),
            evaluator: Arc::new(DeterministicEvaluator),
            transport: None,
            federation_secret: Uuid::new_v4().as_bytes().to_vec(),
            hooks: HookSet::new(),
        }
    }
}

impl RaeEngineBuilder {
    /// Fresh builder with in-memory adapters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Engine configuration.
    #[must_use]
    pub fn config(mut self, config: RaeConfig) -> Self {
        self.config = config;
        self
    }

    /// Artifact storage adapter.
    #[must_use]
    pub fn storage(mut self, storage: Arc<dyn MemoryStorage>) -> Self {
        self.storage = storage;
        self
    }

    /// Vector index adapter.
    #[must_use]
    pub fn vectors(mut self, vectors: Arc<dyn VectorIndex>) -> Self {
        self.vectors = vectors;
        self
    }

    /// Graph store adapter.
    #[must_use]
    pub fn graph_store(mut self, graph_store: Arc<dyn GraphStore>) -> Self {
        self.graph_store = graph_store;
        self
    }

    /// Embedding provider (required).
    #[must_use]
    pub fn embedder(mut self, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    /// LLM provider (required).
    #[must_use]
    pub fn llm(mut self, llm: Arc<dyn LlmProvider>) -> Self {
        self.llm = Some(llm);
        self
    }

    /// Time source.
    #[must_use]
    pub fn clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    /// Trace evaluation strategy (default: deterministic rules).
    #[must_use]
    pub fn evaluator(mut self, evaluator: Arc<dyn EvaluationStrategy>) -> Self {
        self.evaluator = evaluator;
        self
    }

    /// Federation transport; without one, `federate_query` reports the
    /// federation stage as unavailable.
    #[must_use]
    pub fn federation_transport(mut self, transport: Arc<dyn FederationTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Secret for signing federation invitations.
    #[must_use]
    pub fn federation_secret(mut self, secret: Vec<u8>) -> Self {
        self.federation_secret = secret;
        self
    }

    /// Cost hooks for provider calls.
    #[must_use]
    pub fn hooks(mut self, hooks: HookSet) -> Self {
        self.hooks = hooks;
        self
    }

    /// Validate configuration and assemble the engine.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for invalid configuration, missing
    /// providers, or embedding models the provider does not serve —
    /// configuration problems fail here, not at first use.
    pub fn build(self) -> Result<RaeEngine> {
        self.config.validate()?;
        let embedder = self
            .embedder
            .ok_or_else(|| Error::Config("an embedding provider is required".into()))?;
        let llm = self
            .llm
            .ok_or_else(|| Error::Config("an LLM provider is required".into()))?;
        for model in [
            &self.config.retrieval.short_embedding_model,
            &self.config.retrieval.long_embedding_model,
        ] {
            if !embedder.supports(model) {
                return Err(Error::Config(format!(
                    "embedding provider does not serve configured model '{model}'"
                )));
            }
        }
        if self.federation_secret.is_empty() {
            return Err(Error::Config("federation secret must not be empty".into()));
        }

        let graph = GraphService::new(self.graph_store);
        let bandit = Arc::new(WeightBandit::new());
        let retriever = Arc::new(HybridRetriever::new(RetrieverParts {
            storage: self.storage.clone(),
            vectors: self.vectors.clone(),
            graph: graph.clone(),
            embedder: embedder.clone(),
            bandit: bandit.clone(),
            clock: self.clock.clone(),
            config: self.config.retrieval.clone(),
            timeouts: self.config.timeouts.clone(),
            decay_base_rate: self.config.decay.base_rate,
            hooks: self.hooks.clone(),
        }));

        let reflector = Reflector::new(llm.clone(), self.hooks.clone(), self.config.reflection.clone());
        let reflection = ReflectionEngine::new(self.evaluator, reflector, self.storage.clone());
        let hierarchical = Arc::new(HierarchicalReflector::new(
            llm.clone(),
            embedder.clone(),
            self.hooks.clone(),
            self.config.reflection.clone(),
            self.config.retrieval.short_embedding_model.clone(),
        ));
        let extractor = GraphExtractor::new(
            llm.clone(),
            self.hooks.clone(),
            self.config.retrieval.graph_confidence_threshold,
        );
        let registry = Arc::new(PeerRegistry::new());
        let federation = self.transport.map(|transport| {
            FederationClient::new(
                registry.clone(),
                transport,
                embedder.clone(),
                self.config.retrieval.long_embedding_model.clone(),
                self.config.federation.max_peer_candidates,
            )
        });
        let decay = DecayService::new(self.clock.clone(), self.config.decay.clone());

        Ok(RaeEngine {
            assembler: ContextAssembler::new(self.config.assembler.clone()),
            config: self.config,
            clock: self.clock,
            storage: self.storage,
            vectors: self.vectors,
            graph,
            retriever,
            reflection,
            hierarchical,
            decay,
            bandit,
            extractor,
            registry,
            federation,
            llm,
            embedder,
            hooks: self.hooks,
            federation_secret: self.federation_secret,
        })
    }
}

/// The assembled retrieval/reflection core.
pub struct RaeEngine {
    config: RaeConfig,
    clock: SharedClock,
    storage: Arc<dyn MemoryStorage>,
    vectors: Arc<dyn VectorIndex>,
    graph: GraphService,
    retriever: Arc<HybridRetriever>,
    reflection: ReflectionEngine,
    hierarchical: Arc<HierarchicalReflector>,
    decay: DecayService,
    assembler: ContextAssembler,
    bandit: Arc<WeightBandit>,
    extractor: GraphExtractor,
    registry: Arc<PeerRegistry>,
    federation: Option<FederationClient>,
    llm: Arc<dyn LlmProvider>,
    embedder: Arc<dyn EmbeddingProvider>,
    hooks: HookSet,
    federation_secret: Vec<u8>,
}

impl RaeEngine {
    /// Insert a new artifact and return its id.
    ///
    /// Working-layer artifacts are per-query state and are refused
    /// here. With deduplication enabled, storing content identical to
    /// an existing artifact in the same scope returns the existing id.
    #[instrument(skip(self, artifact), fields(scope = %artifact.scope, layer = %artifact.layer))]
    pub async fn store(&self, artifact: MemoryArtifact) -> Result<Uuid> {
        if artifact.layer == MemoryLayer::Working {
            return Err(Error::InvalidInput(
                "working-layer artifacts are not persisted".into(),
            ));
        }
        artifact.validate()?;

        if self.config.store.deduplicate {
            if let Some(existing) = self
                .storage
                .find_by_fingerprint(&artifact.scope, &artifact.content_fingerprint())
                .await?
            {
                debug!(existing = %existing.id, "deduplicated store");
                return Ok(existing.id);
            }
        }

        self.storage.insert(&artifact).await?;
        self.retriever.invalidate_cache(&artifact.scope);

        // Warm both vector views, fanning the two independent embedding
        // calls out concurrently; failures degrade retrieval later but
        // never fail the store.
        let short_model = self.config.retrieval.short_embedding_model.clone();
        let long_model = self.config.retrieval.long_embedding_model.clone();
        let (short_vec, long_vec) = futures::join!(
            self.embed_with_hooks(&artifact.content, &short_model),
            self.embed_with_hooks(&artifact.content, &long_model),
        );
        for (model, embedded) in [(short_model, short_vec), (long_model, long_vec)] {
            match embedded {
                Ok(vector) => {
                    let view = SemanticView::new(artifact.id, &model, vector);
                    if let Err(error) = self.vectors.upsert(&artifact.scope, &view).await {
                        warn!(%error, %model, "vector view write failed");
                    }
                }
                Err(error) => warn!(%error, %model, "embedding at store time failed"),
            }
        }

        info!(artifact_id = %artifact.id, "artifact stored");
        Ok(artifact.id)
    }

    /// The main retrieval entry point.
    pub async fn retrieve(
        &self,
        scope: &Scope,
        query_text: &str,
        options: &RetrievalOptions,
    ) -> Result<RetrievalResult> {
        self.retriever
            .retrieve(scope, query_text, None, options, &CancellationToken::new())
            .await
    }

    /// Retrieval with a caller-provided embedding and cancellation
    /// token.
    pub async fn retrieve_with(
        &self,
        scope: &Scope,
        query_text: &str,
        query_embedding: Option<&(String, Vec<f32>)>,
        options: &RetrievalOptions,
        cancel: &CancellationToken,
    ) -> Result<RetrievalResult> {
        self.retriever
            .retrieve(scope, query_text, query_embedding, options, cancel)
            .await
    }

    /// Retrieve then select under a token budget.
    ///
    /// Selected artifacts get their access statistics bumped — this is
    /// the point where memory is actually *used*.
    #[instrument(skip(self, options), fields(scope = %scope))]
    pub async fn assemble_context(
        &self,
        scope: &Scope,
        query_text: &str,
        budget: usize,
        options: &AssembleOptions,
    ) -> Result<AssembledContext> {
        if budget == 0 {
            return Ok(AssembledContext::default());
        }
        let retrieved = self
            .retrieve(scope, query_text, &options.retrieval)
            .await?;
        let mut context = self
            .assembler
            .assemble(&retrieved.results, budget, options.complex_query);

        if !context.artifacts.is_empty() {
            let now = self.clock.now();
            let updates: Vec<AccessStatsUpdate> = context
                .artifacts
                .iter()
                .map(|artifact| AccessStatsUpdate {
                    artifact_id: artifact.id,
                    accessed_at: now,
                })
                .collect();
            self.storage.update_access_stats(scope, &updates).await?;
            self.retriever.invalidate_cache(scope);
        }

        if options.summarize && !context.artifacts.is_empty() {
            context.summary = self.summarize_context(&context).await;
        }
        Ok(context)
    }

    async fn summarize_context(&self, context: &AssembledContext) -> Option<String> {
        let digest = context
            .artifacts
            .iter()
            .map(|a| format!("- {}", a.content))
            .collect::<Vec<_>>()
            .join("\n");
        let prompt =
            format!("Condense the following context into a brief paragraph:\n{digest}");
        let event = CallEvent {
            kind: ProviderKind::Llm,
            model: "context-summarizer".into(),
            prompt_tokens: (prompt.len() / 4) as u64,
            completion_tokens: 0,
        };
        if let Err(error) = self.hooks.invoke_pre(&event) {
            warn!(%error, "context summary vetoed by cost hook");
            return None;
        }
        match self.llm.complete(&prompt, None).await {
            Ok(completion) => {
                self.hooks.invoke_post(&CallEvent {
                    completion_tokens: completion.completion_tokens.unwrap_or(0),
                    ..event
                });
                Some(completion.text.trim().to_string())
            }
            Err(error) => {
                warn!(%error, "context summary failed, returning without one");
                None
            }
        }
    }

    /// Submit a post-operation trace for evaluation and (possibly)
    /// reflection. Success and failure feed the Math-3 reward signal:
    /// the sources of a success reflection were useful retrievals.
    #[instrument(skip(self, trace), fields(trace_id = %trace.id))]
    pub async fn reflect(&self, trace: &TraceRecord) -> Result<Option<MemoryArtifact>> {
        let reflection = self.reflection.process_trace(trace).await?;
        if let Some(artifact) = &reflection {
            let useful = crate::types::ReflectiveTrace::from_artifact(artifact)
                .map(|t| t.outcome == TraceOutcome::Success);
            if let Some(useful) = useful {
                self.bandit.observe_reward(trace.scope.tenant(), useful);
            }
            self.retriever.invalidate_cache(&trace.scope);
        }
        Ok(reflection)
    }

    /// Explicit caller feedback on retrieval usefulness (the other
    /// Math-3 reward channel).
    pub fn record_feedback(&self, tenant: &str, useful: bool) {
        self.bandit.observe_reward(tenant, useful);
    }

    /// Run graph extraction over every artifact matching the filter.
    /// Returns the number of triples offered to the store. PageRank is
    /// refreshed afterwards so centrality is immediately queryable.
    #[instrument(skip(self, filter), fields(scope = %scope))]
    pub async fn extract_graph(&self, scope: &Scope, filter: &ArtifactFilter) -> Result<usize> {
        let artifacts = self.storage.list(scope, filter).await?;
        let mut total = 0usize;
        for artifact in &artifacts {
            total += self
                .extractor
                .extract_for_artifact(artifact, self.graph.store().as_ref())
                .await?;
        }
        if total > 0 {
            self.graph.recompute_pagerank(scope.tenant()).await?;
            self.retriever.invalidate_cache(scope);
        }
        Ok(total)
    }

    /// Issue a federated query against a trusted peer. Candidates come
    /// back content-only and are re-ranked in this instance's own
    /// embedding space.
    pub async fn federate_query(
        &self,
        peer_id: &str,
        query_text: &str,
        intent: &str,
    ) -> Result<Vec<RankedFederatedCandidate>> {
        let Some(federation) = &self.federation else {
            return Err(Error::Config("no federation transport configured".into()));
        };
        let request = crate::federation::FederatedQuery {
            query_text: query_text.to_string(),
            intent: intent.to_string(),
            constraints: crate::federation::FederatedConstraints {
                max_candidates: Some(self.config.federation.max_peer_candidates),
                tags_any: Vec::new(),
            },
        };
        federation.federated_query(peer_id, &request).await
    }

    /// Local retrieval merged with federated candidates from the given
    /// peers.
    ///
    /// Peer candidates materialize as transient working-layer artifacts
    /// ranked by their locally computed relevance; they are never
    /// persisted. An unreachable or refusing peer degrades the result
    /// with a `federation` skip annotation instead of failing it.
    #[instrument(skip(self, options), fields(scope = %scope, peers = peer_ids.len()))]
    pub async fn retrieve_federated(
        &self,
        scope: &Scope,
        query_text: &str,
        options: &RetrievalOptions,
        peer_ids: &[String],
    ) -> Result<RetrievalResult> {
        let mut result = self.retrieve(scope, query_text, options).await?;

        for peer_id in peer_ids {
            match self
                .federate_query(peer_id, query_text, "retrieval")
                .await
            {
                Ok(candidates) => {
                    for ranked in candidates {
                        let mut artifact = MemoryArtifact::new(
                            scope.clone(),
                            MemoryLayer::Working,
                            ranked.candidate.snippet.clone(),
                        );
                        artifact.id = ranked.candidate.artifact_id;
                        artifact.tags = ranked.candidate.tags.clone();
                        artifact.metadata = ranked.candidate.metadata.clone();
                        artifact.provenance = ranked.candidate.provenance.clone();
                        result.results.push(crate::retrieval::RankedArtifact {
                            artifact,
                            composite: ranked.local_relevance,
                            sub_scores: crate::scoring::SubScores {
                                relevance: ranked.local_relevance,
                                ..Default::default()
                            },
                            ranking_provenance: vec![format!("federation:{peer_id}")],
                        });
                    }
                }
                Err(error) => {
                    warn!(%error, peer_id, "federated peer unavailable");
                    result.mark_skipped(crate::retrieval::Stage::Federation, error.to_string());
                }
            }
        }

        result.results.sort_by(|a, b| {
            b.composite
                .partial_cmp(&a.composite)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.artifact.id.cmp(&b.artifact.id))
        });
        result.results.truncate(options.k_final);
        Ok(result)
    }

    /// Issue a short-lived signed invitation for a prospective peer.
    pub fn issue_invitation(&self, tenant: &str) -> Result<InvitationToken> {
        InvitationToken::issue(
            &self.federation_secret,
            &self.config.federation.public_endpoint,
            tenant,
            i64::try_from(self.config.federation.invitation_expiry_secs).unwrap_or(300),
            &self.clock,
        )
    }

    /// Accept a peer's invitation, completing the handshake.
    pub fn accept_invitation(&self, invitation: &InvitationToken) -> Result<TrustedPeer> {
        self.registry
            .complete_handshake(invitation, &self.federation_secret, &self.clock)
    }

    /// Responder half of federation for the transport layer to mount.
    #[must_use]
    pub fn federation_server(&self, project: impl Into<String>) -> FederationServer {
        FederationServer::new(self.registry.clone(), self.retriever.clone(), project)
    }

    /// Aggregate headline numbers for a scope.
    pub async fn tenant_stats(&self, scope: &Scope) -> Result<TenantStats> {
        let count = |layer| async move {
            self.storage
                .count(scope, &ArtifactFilter::layer(layer))
                .await
        };
        let episodic = count(MemoryLayer::Episodic).await?;
        let semantic = count(MemoryLayer::Semantic).await?;
        let reflective = count(MemoryLayer::Reflective).await?;
        let avg_importance = self
            .storage
            .aggregate(
                scope,
                &ArtifactFilter::default(),
                AggregateField::Importance,
                AggregateOp::Avg,
            )
            .await?;
        let total_tokens = self
            .storage
            .aggregate(
                scope,
                &ArtifactFilter::default(),
                AggregateField::TokenCount,
                AggregateOp::Sum,
            )
            .await?;
        Ok(TenantStats {
            episodic,
            semantic,
            reflective,
            avg_importance,
            total_tokens,
        })
    }

    /// Build the background worker for this engine's stores.
    #[must_use]
    pub fn background_worker(&self) -> Arc<BackgroundWorker> {
        Arc::new(BackgroundWorker::new(
            self.storage.clone(),
            self.vectors.clone(),
            self.graph.clone(),
            self.decay.clone(),
            self.hierarchical.clone(),
            self.config.worker.clone(),
            self.clock.clone(),
        ))
    }

    /// One manual decay tick over a scope (the worker normally drives
    /// this).
    pub async fn run_decay(&self, scope: &Scope) -> Result<crate::decay::DecayReport> {
        let report = self.decay.run_tick(self.storage.as_ref(), scope).await?;
        self.retriever.invalidate_cache(scope);
        Ok(report)
    }

    /// One manual hierarchical-reflection pass over a scope.
    pub async fn run_hierarchical_reflection(
        &self,
        scope: &Scope,
    ) -> Result<crate::reflection::HierarchicalReport> {
        let report = self.hierarchical.run(self.storage.as_ref(), scope).await?;
        self.retriever.invalidate_cache(scope);
        Ok(report)
    }

    /// Direct storage access for adapters layered above the engine.
    #[must_use]
    pub fn storage(&self) -> &Arc<dyn MemoryStorage> {
        &self.storage
    }

    async fn embed_with_hooks(&self, text: &str, model: &str) -> Result<Vec<f32>> {
        let event = CallEvent {
            kind: ProviderKind::Embedding,
            model: model.to_string(),
            prompt_tokens: (text.len() / 4) as u64,
            completion_tokens: 0,
        };
        self.hooks.invoke_pre(&event)?;
        let vector = self.embedder.embed(text, model).await?;
        self.hooks.invoke_post(&event);
        Ok(vector)
    }
}

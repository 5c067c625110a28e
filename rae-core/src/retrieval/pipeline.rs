//! The hybrid retrieval cascade.

use super::cache::QueryCache;
use super::{mmr_reorder, RankedArtifact, RetrievalOptions, RetrievalResult, Stage};
use crate::clock::SharedClock;
use crate::config::{RetrievalConfig, TimeoutConfig};
use crate::error::Error;
use crate::graph::GraphService;
use crate::providers::{CallEvent, EmbeddingProvider, HookSet, ProviderKind};
use crate::reflection::szubar;
use crate::retry::{RetryConfig, RetryPolicy};
use crate::scoring::lexical::Bm25Index;
use crate::scoring::{ScoreWeights, ScoringCandidate, ScoringEngine, WeightBandit};
use crate::storage::{ArtifactFilter, MemoryStorage, VectorIndex};
use crate::types::{MemoryArtifact, MemoryLayer, ReflectiveTrace, Scope, SemanticView, TraceOutcome};
use crate::Result;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

/// Everything a [`HybridRetriever`] is wired from.
pub struct RetrieverParts {
    /// Artifact storage.
    pub storage: Arc<dyn MemoryStorage>,
    /// Per-model vector index.
    pub vectors: Arc<dyn VectorIndex>,
    /// Knowledge-graph operations.
    pub graph: GraphService,
    /// Embedding provider.
    pub embedder: Arc<dyn EmbeddingProvider>,
    /// Math-3 adaptive weights.
    pub bandit: Arc<WeightBandit>,
    /// Time source.
    pub clock: SharedClock,
    /// Cascade configuration.
    pub config: RetrievalConfig,
    /// External-call timeouts.
    pub timeouts: TimeoutConfig,
    /// Tenant decay rate feeding the recency factor.
    pub decay_base_rate: f64,
    /// Cost hooks for embedding calls.
    pub hooks: HookSet,
}

/// The hybrid cascade: a straight-line pipeline with no internal
/// parallelism, so rankings over frozen state are reproducible.
pub struct HybridRetriever {
    storage: Arc<dyn MemoryStorage>,
    vectors: Arc<dyn VectorIndex>,
    graph: GraphService,
    embedder: Arc<dyn EmbeddingProvider>,
    bandit: Arc<WeightBandit>,
    scoring: ScoringEngine,
    config: RetrievalConfig,
    timeouts: TimeoutConfig,
    cache: QueryCache,
    hooks: HookSet,
}

impl HybridRetriever {
    /// Assemble the pipeline.
    #[must_use]
    pub fn new(parts: RetrieverParts) -> Self {
        let scoring = ScoringEngine::new(parts.clock, parts.decay_base_rate);
        let cache = QueryCache::new(
            parts.config.cache_capacity,
            std::time::Duration::from_secs(parts.config.cache_ttl_secs),
        );
        Self {
            storage: parts.storage,
            vectors: parts.vectors,
            graph: parts.graph,
            embedder: parts.embedder,
            bandit: parts.bandit,
            scoring,
            config: parts.config,
            timeouts: parts.timeouts,
            cache,
            hooks: parts.hooks,
        }
    }

    /// Invalidate cached rankings for a scope (called on writes).
    pub fn invalidate_cache(&self, scope: &Scope) {
        self.cache.invalidate_scope(scope);
    }

    /// Run the cascade.
    ///
    /// `query_embedding` optionally carries a pre-computed embedding
    /// with its model name; it is used for whichever stage's model it
    /// matches.
    ///
    /// # Errors
    ///
    /// Only input errors and cancellation surface as `Err`; stage
    /// failures degrade the result instead.
    #[instrument(skip_all, fields(scope = %scope, k_final = options.k_final))]
    pub async fn retrieve(
        &self,
        scope: &Scope,
        query_text: &str,
        query_embedding: Option<&(String, Vec<f32>)>,
        options: &RetrievalOptions,
        cancel: &CancellationToken,
    ) -> Result<RetrievalResult> {
        // k_final = 0 returns immediately, before any storage call.
        if options.k_final == 0 {
            return Ok(RetrievalResult::empty());
        }

        let fingerprint =
            QueryCache::fingerprint(query_text, &options.fingerprint_material());
        if let Some(cached) = self.cache.get(scope, &fingerprint) {
            return Ok(cached);
        }

        let weights = self.bandit.weights_for_query(scope.tenant());
        let mut result = RetrievalResult::empty();

        // ---- Stage 1: lexical prefilter (Math-1) --------------------
        let pool = match self
            .storage_op("list candidates", || {
                self.storage.list(scope, &options.filter)
            })
            .await
        {
            Ok(pool) => pool,
            Err(error) => {
                warn!(%error, "candidate listing failed, returning degraded empty result");
                result.mark_skipped(Stage::Lexical, error.to_string());
                return Ok(result);
            }
        };
        if pool.is_empty() {
            // Empty tenant: empty result, no error, no degradation.
            return Ok(result);
        }

        let by_id: HashMap<Uuid, MemoryArtifact> =
            pool.iter().map(|a| (a.id, a.clone())).collect();
        let bm25 = Bm25Index::build(&pool);
        let lexical_hits = bm25.top_k(query_text, self.config.lexical_top_k);
        let mut provenance: HashMap<Uuid, Vec<String>> = HashMap::new();
        for (id, _) in &lexical_hits {
            provenance.entry(*id).or_default().push("lexical".into());
        }
        if lexical_hits.is_empty() {
            // A stage yielding zero candidates empties the pipeline.
            self.cache.insert(scope, &fingerprint, result.clone());
            return Ok(result);
        }
        self.check_cancel(cancel)?;

        // ---- Stage 2: short-vector recall ---------------------------
        let lexical_ids: Vec<Uuid> = lexical_hits.iter().map(|(id, _)| *id).collect();
        let (recalled, query_short) = self
            .short_vector_recall(
                scope,
                query_text,
                query_embedding,
                &lexical_ids,
                options.k_final,
                &mut result,
            )
            .await;
        let survivors = match recalled {
            Some(ids) => {
                for id in &ids {
                    provenance
                        .entry(*id)
                        .or_default()
                        .push("short_vector".into());
                }
                ids
            }
            None => lexical_ids,
        };
        if survivors.is_empty() {
            self.cache.insert(scope, &fingerprint, result.clone());
            return Ok(result);
        }
        self.check_cancel(cancel)?;

        // ---- Stage 3: long-vector rerank (Math-2) -------------------
        let (mut scored, long_views) = self
            .long_rerank(scope, query_text, query_embedding, &survivors, &by_id, &weights, &mut result)
            .await?;
        for candidate in &scored {
            provenance
                .entry(candidate.artifact.id)
                .or_default()
                .push("long_rerank".into());
        }
        self.check_cancel(cancel)?;

        // ---- Stage 4: graph expansion (resonance induction) ---------
        if options.expand_graph {
            self.expand_via_graph(
                scope,
                &survivors,
                &by_id,
                query_short.as_deref(),
                &weights,
                &mut scored,
                &mut provenance,
                &mut result,
            )
            .await;
        }
        self.check_cancel(cancel)?;

        // ---- Stage 5: reflective bonus (Szubar mode) ----------------
        let mut ranked: Vec<RankedArtifact> = scored
            .into_iter()
            .map(|candidate| RankedArtifact {
                ranking_provenance: provenance
                    .get(&candidate.artifact.id)
                    .cloned()
                    .unwrap_or_default(),
                artifact: candidate.artifact,
                composite: candidate.composite,
                sub_scores: candidate.sub_scores,
            })
            .collect();
        self.apply_reflective_bonus(scope, query_text, &mut ranked, &mut result)
            .await;

        // ---- Final ranking ------------------------------------------
        ranked.sort_by(final_ordering);
        if options.apply_mmr {
            ranked = mmr_reorder(ranked, &long_views, self.config.mmr_lambda);
        }
        ranked.truncate(options.k_final);
        result.results = ranked;

        debug!(
            returned = result.results.len(),
            degraded = result.degraded,
            "retrieval complete"
        );
        self.cache.insert(scope, &fingerprint, result.clone());
        Ok(result)
    }

    fn check_cancel(&self, cancel: &CancellationToken) -> Result<()> {
        if cancel.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Storage call with per-call timeout and the single-retry policy.
    async fn storage_op<T, F, Fut>(&self, label: &str, operation: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut policy = RetryPolicy::with_config(RetryConfig::storage());
        let timeout = self.timeouts.storage();
        policy
            .execute(|| async {
                match tokio::time::timeout(timeout, operation()).await {
                    Ok(result) => result,
                    Err(_) => Err(Error::Timeout(format!("storage: {label}"))),
                }
            })
            .await
    }

    /// Embedding call with cost hooks, timeout, and provider retries.
    async fn embed(&self, text: &str, model: &str) -> Result<Vec<f32>> {
        if !self.embedder.supports(model) {
            return Err(Error::Config(format!("unknown embedding model '{model}'")));
        }
        let event = CallEvent {
            kind: ProviderKind::Embedding,
            model: model.to_string(),
            prompt_tokens: (text.len() / 4) as u64,
            completion_tokens: 0,
        };
        self.hooks.invoke_pre(&event)?;
        let timeout = self.timeouts.embedding();
        let mut policy = RetryPolicy::new();
        let embedding = policy
            .execute(|| async {
                match tokio::time::timeout(timeout, self.embedder.embed(text, model)).await {
                    Ok(result) => result,
                    Err(_) => Err(Error::Timeout(format!("embedding: {model}"))),
                }
            })
            .await?;
        self.hooks.invoke_post(&event);
        Ok(embedding)
    }

    /// Stage 2. Returns `(survivors, short query vector)`; a `None`
    /// survivor list means the stage was skipped entirely (annotated on
    /// `result`).
    async fn short_vector_recall(
        &self,
        scope: &Scope,
        query_text: &str,
        query_embedding: Option<&(String, Vec<f32>)>,
        lexical_ids: &[Uuid],
        k_final: usize,
        result: &mut RetrievalResult,
    ) -> (Option<Vec<Uuid>>, Option<Vec<f32>>) {
        let model = self.config.short_embedding_model.clone();
        let query_vec = match query_embedding {
            Some((provided_model, vec)) if provided_model == &model => vec.clone(),
            _ => match self.embed(query_text, &model).await {
                Ok(vec) => vec,
                Err(error) => {
                    result.mark_skipped(Stage::ShortVector, error.to_string());
                    return (None, None);
                }
            },
        };

        let hits = match self
            .storage_op("short-vector search", || {
                self.vectors
                    .search(scope, &model, &query_vec, self.config.short_vector_top_k)
            })
            .await
        {
            Ok(hits) => hits,
            Err(error) => {
                result.mark_skipped(Stage::ShortVector, error.to_string());
                return (None, Some(query_vec));
            }
        };

        let lexical_set: HashSet<Uuid> = lexical_ids.iter().copied().collect();
        let intersection: Vec<Uuid> = hits
            .iter()
            .map(|(id, _)| *id)
            .filter(|id| lexical_set.contains(id))
            .collect();

        let mut survivors = if intersection.len() >= k_final {
            intersection
        } else {
            // Union fallback: vector hits that passed the prefilter, in
            // vector order, then lexical-only candidates.
            let in_union: HashSet<Uuid> = intersection.iter().copied().collect();
            let mut union = intersection;
            union.extend(lexical_ids.iter().filter(|id| !in_union.contains(id)));
            union
        };
        survivors.truncate(self.config.short_vector_top_k);
        (Some(survivors), Some(query_vec))
    }

    /// Stage 3: fetch-or-compute expensive-model views for the
    /// survivors and apply the six-factor composite. Returns scored
    /// candidates (top K₃) plus the long-model vectors for MMR.
    #[allow(clippy::too_many_arguments)]
    async fn long_rerank(
        &self,
        scope: &Scope,
        query_text: &str,
        query_embedding: Option<&(String, Vec<f32>)>,
        survivors: &[Uuid],
        by_id: &HashMap<Uuid, MemoryArtifact>,
        weights: &ScoreWeights,
        result: &mut RetrievalResult,
    ) -> Result<(Vec<crate::scoring::ScoredCandidate>, HashMap<Uuid, Vec<f32>>)> {
        let model = self.config.long_embedding_model.clone();

        let query_vec: Option<Vec<f32>> = match query_embedding {
            Some((provided_model, vec)) if provided_model == &model => Some(vec.clone()),
            _ => match self.embed(query_text, &model).await {
                Ok(vec) => Some(vec),
                Err(error) => {
                    // Degrade to scoring without vector contribution.
                    result.mark_skipped(Stage::LongRerank, error.to_string());
                    None
                }
            },
        };

        let mut views: HashMap<Uuid, Vec<f32>> = HashMap::new();
        let mut candidates: Vec<ScoringCandidate> = Vec::with_capacity(survivors.len());
        let centrality = self
            .graph
            .centrality_for_artifacts(scope.tenant(), survivors)
            .await
            .unwrap_or_default();

        for id in survivors {
            let Some(artifact) = by_id.get(id) else {
                continue;
            };
            let view = if query_vec.is_some() {
                match self.fetch_or_embed_view(scope, artifact, &model).await {
                    Some(view) => {
                        views.insert(*id, view.vector.clone());
                        Some(view)
                    }
                    None => None,
                }
            } else {
                None
            };
            candidates.push(ScoringCandidate {
                artifact: artifact.clone(),
                view,
                centrality: centrality.get(id).copied().unwrap_or(0.0),
            });
        }

        let query = query_vec
            .as_ref()
            .map(|vec| (model.as_str(), vec.as_slice()));
        let mut scored = self.scoring.score_batch(query, &candidates, weights)?;
        scored.truncate(self.config.rerank_top_k);
        Ok((scored, views))
    }

    /// Look up the stored expensive-model view, generating and caching
    /// it on a miss. An artifact present in storage but absent from the
    /// vector index is logged and scored without the vector
    /// contribution.
    async fn fetch_or_embed_view(
        &self,
        scope: &Scope,
        artifact: &MemoryArtifact,
        model: &str,
    ) -> Option<SemanticView> {
        match self.vectors.get(scope, artifact.id, model).await {
            Ok(Some(view)) => return Some(view),
            Ok(None) => {}
            Err(error) => {
                warn!(artifact_id = %artifact.id, %error, "vector index read failed");
                return None;
            }
        }
        match self.embed(&artifact.content, model).await {
            Ok(vector) => {
                let view = SemanticView::new(artifact.id, model, vector);
                if let Err(error) = self.vectors.upsert(scope, &view).await {
                    warn!(artifact_id = %artifact.id, %error, "vector view cache write failed");
                }
                Some(view)
            }
            Err(error) => {
                warn!(
                    artifact_id = %artifact.id,
                    %error,
                    "vector index inconsistency: scoring without vector contribution"
                );
                None
            }
        }
    }

    /// Stage 4: admit graph neighbors whose centrality × relevance
    /// clears the resonance threshold, and synthesize a context string.
    ///
    /// Like every other stage, a graph store that stays unavailable
    /// after the retry degrades the result instead of failing the
    /// retrieval; work already admitted by the time of the failure is
    /// kept, and the skip annotation records the cause.
    #[allow(clippy::too_many_arguments)]
    async fn expand_via_graph(
        &self,
        scope: &Scope,
        survivors: &[Uuid],
        by_id: &HashMap<Uuid, MemoryArtifact>,
        query_short: Option<&[f32]>,
        weights: &ScoreWeights,
        scored: &mut Vec<crate::scoring::ScoredCandidate>,
        provenance: &mut HashMap<Uuid, Vec<String>>,
        result: &mut RetrievalResult,
    ) {
        if let Err(error) = self
            .try_expand_via_graph(
                scope,
                survivors,
                by_id,
                query_short,
                weights,
                scored,
                provenance,
                result,
            )
            .await
        {
            warn!(%error, "graph expansion skipped");
            result.mark_skipped(Stage::GraphExpansion, error.to_string());
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn try_expand_via_graph(
        &self,
        scope: &Scope,
        survivors: &[Uuid],
        by_id: &HashMap<Uuid, MemoryArtifact>,
        query_short: Option<&[f32]>,
        weights: &ScoreWeights,
        scored: &mut Vec<crate::scoring::ScoredCandidate>,
        provenance: &mut HashMap<Uuid, Vec<String>>,
        result: &mut RetrievalResult,
    ) -> Result<()> {
        let tenant = scope.tenant();
        let triples = self
            .storage_op("graph triples", || self.graph.store().triples(tenant))
            .await?;
        if triples.is_empty() {
            // Empty graph: skip silently.
            return Ok(());
        }

        let mut seeds: Vec<Uuid> = Vec::new();
        for id in survivors {
            seeds.extend(
                self.storage_op("graph mentions", || {
                    self.graph.store().entities_for_artifact(tenant, *id)
                })
                .await?,
            );
        }
        seeds.sort();
        seeds.dedup();
        if seeds.is_empty() {
            return Ok(());
        }

        let expanded = self
            .storage_op("graph expand", || {
                self.graph.expand(
                    tenant,
                    &seeds,
                    self.config.graph_depth,
                    self.config.graph_confidence_threshold,
                    self.config.max_graph_nodes,
                )
            })
            .await?;
        let expanded_entities: HashSet<Uuid> = expanded.iter().map(|(id, _)| *id).collect();

        // Artifacts mentioning expanded entities, not already ranked.
        let already: HashSet<Uuid> = scored.iter().map(|s| s.artifact.id).collect();
        let mut neighbor_artifacts: Vec<Uuid> = triples
            .iter()
            .filter(|t| {
                t.confidence >= self.config.graph_confidence_threshold
                    && (expanded_entities.contains(&t.subject)
                        || expanded_entities.contains(&t.object))
            })
            .map(|t| t.source_artifact)
            .filter(|id| !already.contains(id) && by_id.contains_key(id))
            .collect();
        neighbor_artifacts.sort();
        neighbor_artifacts.dedup();

        if !neighbor_artifacts.is_empty() {
            let centrality = self
                .storage_op("graph centrality", || {
                    self.graph
                        .centrality_for_artifacts(tenant, &neighbor_artifacts)
                })
                .await?;
            let short_model = &self.config.short_embedding_model;
            let mut admitted: Vec<ScoringCandidate> = Vec::new();
            for id in &neighbor_artifacts {
                let Some(artifact) = by_id.get(id) else {
                    continue;
                };
                // Relevance for resonance: cosine against the query's
                // short vector when the neighbor has a view, importance
                // as the vector-free fallback.
                let relevance = match (query_short, self.vectors.get(scope, *id, short_model).await)
                {
                    (Some(query_vec), Ok(Some(view))) => f64::from(
                        crate::storage::memory::cosine_similarity(query_vec, &view.vector),
                    ),
                    _ => f64::from(artifact.importance),
                };
                let node_centrality = centrality.get(id).copied().unwrap_or(0.0);
                if node_centrality * relevance >= self.config.resonance_threshold {
                    admitted.push(ScoringCandidate {
                        artifact: artifact.clone(),
                        view: None,
                        centrality: node_centrality,
                    });
                    provenance
                        .entry(*id)
                        .or_default()
                        .push("graph_expansion".into());
                }
            }
            if !admitted.is_empty() {
                let extra = self.scoring.score_batch(None, &admitted, weights)?;
                scored.extend(extra);
            }
        }

        // Synthesized context over the expanded neighborhood.
        let nodes: Vec<Uuid> = expanded_entities.iter().copied().collect();
        let subgraph = self
            .storage_op("graph subgraph", || self.graph.subgraph(tenant, &nodes))
            .await?;
        let mut names: HashMap<Uuid, String> = HashMap::new();
        for entity in self
            .storage_op("graph entities", || self.graph.store().entities(tenant))
            .await?
        {
            names.insert(entity.id, entity.canonical_name);
        }
        let mut lines: Vec<String> = subgraph
            .iter()
            .map(|t| {
                format!(
                    "{} --{}--> {} ({:.2})",
                    names.get(&t.subject).map_or("?", String::as_str),
                    t.predicate,
                    names.get(&t.object).map_or("?", String::as_str),
                    t.confidence
                )
            })
            .collect();
        lines.sort();
        lines.dedup();
        if !lines.is_empty() {
            result.graph_context = Some(lines.join("\n"));
        }
        Ok(())
    }

    /// Stage 5: success reflections boost their sources, failure
    /// reflections demote them, and failure reflections whose stored
    /// fingerprint matches the query are surfaced as negative
    /// exemplars.
    async fn apply_reflective_bonus(
        &self,
        scope: &Scope,
        query_text: &str,
        ranked: &mut Vec<RankedArtifact>,
        result: &mut RetrievalResult,
    ) {
        let reflective_filter = ArtifactFilter::layer(MemoryLayer::Reflective);
        let reflective = match self
            .storage_op("list reflective", || {
                self.storage.list(scope, &reflective_filter)
            })
            .await
        {
            Ok(artifacts) => artifacts,
            Err(error) => {
                result.mark_skipped(Stage::ReflectiveBonus, error.to_string());
                return;
            }
        };
        if reflective.is_empty() {
            return;
        }

        let bonus = f64::from(self.config.reflective_bonus);
        let query_fingerprint = szubar::fingerprint(query_text);
        let ranked_ids: HashSet<Uuid> = ranked.iter().map(|r| r.artifact.id).collect();
        let mut exemplars: Vec<RankedArtifact> = Vec::new();

        for artifact in &reflective {
            let Some(trace) = ReflectiveTrace::from_artifact(artifact) else {
                continue;
            };
            let sources: HashSet<Uuid> = trace.source_ids.iter().copied().collect();
            match trace.outcome {
                TraceOutcome::Success => {
                    for entry in ranked.iter_mut() {
                        if sources.contains(&entry.artifact.id) {
                            entry.composite = (entry.composite + bonus).min(1.0);
                            entry
                                .ranking_provenance
                                .push(format!("reflective_bonus:+{bonus:.2}"));
                        }
                    }
                }
                TraceOutcome::Failure => {
                    for entry in ranked.iter_mut() {
                        if sources.contains(&entry.artifact.id) {
                            entry.composite = (entry.composite - bonus).max(0.0);
                            entry
                                .ranking_provenance
                                .push(format!("reflective_bonus:-{bonus:.2}"));
                        }
                    }
                    // Szubar: a matching failure fingerprint surfaces
                    // the reflection itself near the top.
                    if let Some(stored) = &trace.fingerprint {
                        if szubar::matches(&query_fingerprint, stored)
                            && !ranked_ids.contains(&artifact.id)
                        {
                            // Anchor above the current best regardless
                            // of where it sits pre-sort.
                            let top = ranked
                                .iter()
                                .map(|r| r.composite)
                                .fold(0.5_f64, f64::max);
                            exemplars.push(RankedArtifact {
                                artifact: artifact.clone(),
                                composite: (top + bonus).min(1.0),
                                sub_scores: crate::scoring::SubScores {
                                    importance: f64::from(artifact.importance),
                                    ..Default::default()
                                },
                                ranking_provenance: vec!["szubar_negative_exemplar".into()],
                            });
                        }
                    }
                }
                TraceOutcome::Neutral => {}
            }
        }
        ranked.extend(exemplars);
    }
}

/// Final deterministic ordering over ranked artifacts.
fn final_ordering(a: &RankedArtifact, b: &RankedArtifact) -> std::cmp::Ordering {
    b.composite
        .partial_cmp(&a.composite)
        .unwrap_or(std::cmp::Ordering::Equal)
        .then_with(|| {
            b.artifact
                .importance
                .partial_cmp(&a.artifact.importance)
                .unwrap_or(std::cmp::Ordering::Equal)
        })
        .then_with(|| b.artifact.created_at.cmp(&a.artifact.created_at))
        .then_with(|| a.artifact.id.cmp(&b.artifact.id))
}

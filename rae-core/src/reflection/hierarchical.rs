//! Hierarchical reflection: periodic map-reduce summarization of
//! recent episodic memory.
//!
//! Map phase: cluster recent episodes by semantic similarity into
//! buckets and summarize each with an LLM. Reduce phase: summarize the
//! bucket summaries into one higher-order reflective artifact whose
//! provenance is the union of every episode consumed.

use crate::config::ReflectionConfig;
use crate::providers::{CallEvent, EmbeddingProvider, HookSet, LlmProvider, ProviderKind};
use crate::retry::{RetryConfig, RetryPolicy};
use crate::storage::memory::cosine_similarity;
use crate::storage::{ArtifactFilter, MemoryStorage};
use crate::types::{MemoryArtifact, MemoryLayer, ReflectiveTrace, Scope, TraceOutcome};
use crate::Result;
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

/// Outcome of one hierarchical reflection run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HierarchicalReport {
    /// Episodes consumed.
    pub episodes: usize,
    /// Level-1 (bucket) summaries produced.
    pub level1_summaries: usize,
    /// Level-2 (reduce) summaries produced (0 or 1).
    pub level2_summaries: usize,
}

/// Map-reduce reflector over episodic memory.
pub struct HierarchicalReflector {
    llm: Arc<dyn LlmProvider>,
    embedder: Arc<dyn EmbeddingProvider>,
    hooks: HookSet,
    config: ReflectionConfig,
    clustering_model: String,
}

impl HierarchicalReflector {
    /// Create a reflector; `clustering_model` names the (cheap)
    /// embedding model used for similarity bucketing.
    #[must_use]
    pub fn new(
        llm: Arc<dyn LlmProvider>,
        embedder: Arc<dyn EmbeddingProvider>,
        hooks: HookSet,
        config: ReflectionConfig,
        clustering_model: impl Into<String>,
    ) -> Self {
        Self {
            llm,
            embedder,
            hooks,
            config,
            clustering_model: clustering_model.into(),
        }
    }

    /// Run one map-reduce pass over a scope's unconsolidated episodic
    /// artifacts.
    #[instrument(skip(self, storage), fields(scope = %scope))]
    pub async fn run(
        &self,
        storage: &dyn MemoryStorage,
        scope: &Scope,
    ) -> Result<HierarchicalReport> {
        let filter = ArtifactFilter {
            layers: vec![MemoryLayer::Episodic],
            consolidated: Some(false),
            limit: Some(self.config.max_episodes_per_run),
            ..ArtifactFilter::default()
        };
        let episodes = storage.list(scope, &filter).await?;
        let mut report = HierarchicalReport {
            episodes: episodes.len(),
            ..HierarchicalReport::default()
        };
        if episodes.is_empty() {
            return Ok(report);
        }

        let buckets = self.bucket_by_similarity(&episodes).await;
        debug!(episodes = episodes.len(), buckets = buckets.len(), "map phase");

        // Map: one summary per bucket.
        let mut level1: Vec<(String, Vec<Uuid>)> = Vec::new();
        for bucket in &buckets {
            let digest = bucket
                .iter()
                .map(|a| format!("- {}", a.content))
                .collect::<Vec<_>>()
                .join("\n");
            let prompt = format!(
                "Summarize the common theme of these related episodes in \
                  2-3 sentences, keeping concrete facts:\n{digest}"
            );
            match self.complete(&prompt).await {
                Some(summary) => {
                    level1.push((summary, bucket.iter().map(|a| a.id).collect()));
                }
                None => warn!("bucket summary skipped after LLM retries"),
            }
        }

        // Persist level-1 summaries and mark members consolidated.
        for (summary, member_ids) in &level1 {
            let trace = ReflectiveTrace {
                id: Uuid::new_v4(),
                scope: scope.clone(),
                source_ids: member_ids.clone(),
                insight: summary.clone(),
                importance: 0.6,
                decision_context: "hierarchical reflection: bucket summary".into(),
                outcome: TraceOutcome::Neutral,
                fingerprint: None,
                created_at: Utc::now(),
            };
            storage.insert(&trace.into_artifact()?).await?;
            report.level1_summaries += 1;

            for id in member_ids {
                if let Some(mut episode) = storage.get(scope, *id).await? {
                    episode.consolidated = true;
                    storage.update(&episode).await?;
                }
            }
        }

        // Reduce: one summary of summaries, provenance = every episode.
        if !level1.is_empty() {
            let digest = level1
                .iter()
                .map(|(summary, _)| format!("- {summary}"))
                .collect::<Vec<_>>()
                .join("\n");
            let prompt = format!(
                "These are summaries of recent activity. Produce one \
                 higher-order insight (2-4 sentences) about what this period \
                 was about and what strategies emerged:\n{digest}"
            );
            if let Some(insight) = self.complete(&prompt).await {
                let all_ids: Vec<Uuid> = level1
                    .iter()
                    .flat_map(|(_, ids)| ids.iter().copied())
                    .collect();
                let trace = ReflectiveTrace {
                    id: Uuid::new_v4(),
                    scope: scope.clone(),
                    source_ids: all_ids,
                    insight,
                    importance: 0.7,
                    decision_context: "hierarchical reflection: period summary".into(),
                    outcome: TraceOutcome::Neutral,
                    fingerprint: None,
                    created_at: Utc::now(),
                };
                storage.insert(&trace.into_artifact()?).await?;
                report.level2_summaries = 1;
            }
        }

        Ok(report)
    }

    /// Partition episodes into similarity buckets of at most
    /// `bucket_size`, greedily: seed with the oldest unassigned
    /// episode, fill with its nearest neighbors. Falls back to
    /// time-ordered chunks when embeddings are unavailable.
    async fn bucket_by_similarity(
        &self,
        episodes: &[MemoryArtifact],
    ) -> Vec<Vec<MemoryArtifact>> {
        let bucket_size = self.config.bucket_size.max(1);

        // Oldest first so bucket seeds are stable across runs.
        let mut ordered: Vec<MemoryArtifact> = episodes.to_vec();
        ordered.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));

        let texts: Vec<String> = ordered.iter().map(|a| a.content.clone()).collect();
        let embeddings = match self
            .embedder
            .embed_batch(&texts, &self.clustering_model)
            .await
        {
            Ok(embeddings) => Some(embeddings),
            Err(error) => {
                warn!(%error, "clustering embeddings unavailable, using time-ordered buckets");
                None
            }
        };

        let Some(embeddings) = embeddings else {
            return ordered
                .chunks(bucket_size)
                .map(<[MemoryArtifact]>::to_vec)
                .collect();
        };

        let mut assigned = vec![false; ordered.len()];
        let mut buckets: Vec<Vec<MemoryArtifact>> = Vec::new();
        for seed in 0..ordered.len() {
            if assigned[seed] {
                continue;
            }
            assigned[seed] = true;
            let mut bucket = vec![ordered[seed].clone()];

            // Nearest unassigned neighbors of the seed, most similar
            // first; index tiebreak keeps this deterministic.
            let mut neighbors: Vec<(usize, f32)> = (0..ordered.len())
                .filter(|i| !assigned[*i])
                .map(|i| (i, cosine_similarity(&embeddings[seed], &embeddings[i])))
                .collect();
            neighbors.sort_by(|a, b| {
                b.1.partial_cmp(&a.1)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.0.cmp(&b.0))
            });
            for (index, _) in neighbors.into_iter().take(bucket_size - 1) {
                assigned[index] = true;
                bucket.push(ordered[index].clone());
            }
            buckets.push(bucket);
        }
        buckets
    }

    async fn complete(&self, prompt: &str) -> Option<String> {
        let event = CallEvent {
            kind: ProviderKind::Llm,
            model: "hierarchical-reflector".into(),
            prompt_tokens: (prompt.len() / 4) as u64,
            completion_tokens: 0,
        };
        if let Err(error) = self.hooks.invoke_pre(&event) {
            warn!(%error, "summary vetoed by cost hook");
            return None;
        }
        let mut policy = RetryPolicy::with_config(
            RetryConfig::default().with_max_retries(self.config.llm_max_retries),
        );
        match policy
            .execute(|| async { self.llm.complete(prompt, None).await })
            .await
        {
            Ok(completion) => {
                self.hooks.invoke_post(&CallEvent {
                    completion_tokens: completion.completion_tokens.unwrap_or(0),
                    ..event
                });
                let text = completion.text.trim().to_string();
                (!text.is_empty()).then_some(text)
            }
            Err(error) => {
                warn!(%error, "summary LLM unavailable after retries");
                None
            }
        }
    }
}

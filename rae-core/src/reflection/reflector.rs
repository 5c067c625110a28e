//! The reflector: turns a classified trace into a reflective artifact
//! plus importance proposals for its source artifacts.

use super::szubar;
use crate::config::ReflectionConfig;
use crate::error::Error;
use crate::providers::{CallEvent, Completion, HookSet, LlmProvider, ProviderKind};
use crate::retry::{RetryConfig, RetryPolicy};
use crate::types::{ReflectiveTrace, TraceOutcome, TraceRecord};
use crate::Result;
use std::sync::Arc;
use tracing::{instrument, warn};
use uuid::Uuid;

/// A generated reflection and the importance updates it proposes.
#[derive(Debug, Clone)]
pub struct ReflectionProposal {
    /// The reflective trace to persist.
    pub trace: ReflectiveTrace,
    /// Per-source importance deltas: reinforce on success, mild demote
    /// on failure. Never erases — the storage floor holds regardless.
    pub importance_deltas: Vec<(Uuid, f32)>,
}

/// Generates reflections via an LLM, with success and failure prompt
/// templates.
pub struct Reflector {
    llm: Arc<dyn LlmProvider>,
    hooks: HookSet,
    config: ReflectionConfig,
}

impl Reflector {
    /// Reflector over an LLM provider.
    #[must_use]
    pub fn new(llm: Arc<dyn LlmProvider>, hooks: HookSet, config: ReflectionConfig) -> Self {
        Self { llm, hooks, config }
    }

    fn success_prompt(trace: &TraceRecord) -> String {
        format!(
            "The following operation succeeded. In 2-4 sentences, explain what \
             made it work so the strategy can be reused. Mention the decisive \
             inputs or steps.\n\nOperation: {}\nInput: {}\nOutput: {}",
            trace.operation, trace.input, trace.output
        )
    }

    fn failure_prompt(trace: &TraceRecord) -> String {
        format!(
            "The following operation failed. In 2-4 sentences, explain why it \
             went wrong and what should be done differently next time.\n\n\
             Operation: {}\nInput: {}\nOutput: {}\nError: {}",
            trace.operation,
            trace.input,
            trace.output,
            trace.error.as_deref().unwrap_or("none"),
        )
    }

    /// Generate a reflection for a success/failure verdict.
    ///
    /// Returns `Ok(None)` when the LLM stays unavailable after retries —
    /// the system continues without a reflection.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConstraintViolation`] when the trace cites no
    /// source artifacts (a reflection without provenance is rejected)
    /// and [`Error::InvalidInput`] for a neutral verdict.
    #[instrument(skip(self, trace), fields(trace_id = %trace.id, %outcome))]
    pub async fn reflect(
        &self,
        trace: &TraceRecord,
        outcome: TraceOutcome,
    ) -> Result<Option<ReflectionProposal>> {
        if trace.source_artifact_ids.is_empty() {
            return Err(Error::ConstraintViolation(
                "reflection requires at least one source artifact".into(),
            ));
        }

        // One match fixes the template, the importance delta, and
        // whether a failure fingerprint is recorded.
        let (prompt, delta, fingerprint) = match outcome {
            TraceOutcome::Success => {
                (Self::success_prompt(trace), self.config.reinforce_delta, None)
            }
            TraceOutcome::Failure => (
                Self::failure_prompt(trace),
                -self.config.demote_delta,
                Some(szubar::fingerprint(&trace.input)),
            ),
            TraceOutcome::Neutral => {
                return Err(Error::InvalidInput(
                    "neutral traces are archived, not reflected".into(),
                ));
            }
        };

        let Some(completion) = self.complete_with_retries(&prompt).await else {
            return Ok(None);
        };
        let insight = completion.text.trim().to_string();
        if insight.is_empty() {
            warn!("reflector produced empty insight, skipping");
            return Ok(None);
        }

        let importance_deltas = trace
            .source_artifact_ids
            .iter()
            .map(|id| (*id, delta))
            .collect();

        let reflective = ReflectiveTrace {
            id: Uuid::new_v4(),
            scope: trace.scope.clone(),
            source_ids: trace.source_artifact_ids.clone(),
            insight,
            importance: 0.6,
            decision_context: format!("{} on '{}'", trace.operation, trace.input),
            outcome,
            fingerprint,
            created_at: trace.created_at,
        };

        Ok(Some(ReflectionProposal {
            trace: reflective,
            importance_deltas,
        }))
    }

    async fn complete_with_retries(&self, prompt: &str) -> Option<Completion> {
        let event = CallEvent {
            kind: ProviderKind::Llm,
            model: "reflector".into(),
            prompt_tokens: (prompt.len() / 4) as u64,
            completion_tokens: 0,
        };
        if let Err(error) = self.hooks.invoke_pre(&event) {
            warn!(%error, "reflection vetoed by cost hook");
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
                Some(completion)
            }
            Err(error) => {
                warn!(%error, "reflector LLM unavailable after retries, no reflection");
                None
            }
        }
    }
}

//! Trace evaluation strategies.
//!
//! The evaluator classifies an actor's trace into success, failure, or
//! neutral. Only success and failure proceed to the reflector; neutral
//! traces are archived without reflection.

use crate::providers::{CallEvent, HookSet, LlmProvider, ProviderKind};
use crate::retry::RetryPolicy;
use crate::types::{TraceOutcome, TraceRecord};
use crate::Result;
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use tracing::warn;

/// A pluggable trace classifier.
#[async_trait]
pub trait EvaluationStrategy: Send + Sync {
    /// Classify a trace.
    async fn evaluate(&self, trace: &TraceRecord) -> Result<TraceOutcome>;
}

/// Rule-based evaluation: explicit errors and timeouts are failures,
/// an explicit actor-asserted outcome is taken at face value, anything
/// else is neutral.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeterministicEvaluator;

#[async_trait]
impl EvaluationStrategy for DeterministicEvaluator {
    async fn evaluate(&self, trace: &TraceRecord) -> Result<TraceOutcome> {
        if trace.error.is_some() || trace.timed_out {
            return Ok(TraceOutcome::Failure);
        }
        Ok(trace.explicit_outcome.unwrap_or(TraceOutcome::Neutral))
    }
}

/// Quantitative evaluation against configured thresholds on the
/// trace's quality signal. No signal means neutral.
#[derive(Debug, Clone, Copy)]
pub struct ThresholdEvaluator {
    /// Signal at or above which the trace is a success.
    pub success_threshold: f32,
    /// Signal at or below which the trace is a failure.
    pub failure_threshold: f32,
}

impl ThresholdEvaluator {
    /// Evaluator with the given thresholds.
    #[must_use]
    pub fn new(success_threshold: f32, failure_threshold: f32) -> Self {
        Self {
            success_threshold,
            failure_threshold,
        }
    }
}

#[async_trait]
impl EvaluationStrategy for ThresholdEvaluator {
    async fn evaluate(&self, trace: &TraceRecord) -> Result<TraceOutcome> {
        // Hard failures dominate any quality signal.
        if trace.error.is_some() || trace.timed_out {
            return Ok(TraceOutcome::Failure);
        }
        Ok(match trace.quality_signal {
            Some(signal) if signal >= self.success_threshold => TraceOutcome::Success,
            Some(signal) if signal <= self.failure_threshold => TraceOutcome::Failure,
            _ => TraceOutcome::Neutral,
        })
    }
}

#[derive(Deserialize)]
struct JudgedOutcome {
    outcome: TraceOutcome,
}

/// Meta-LLM judgment. Expensive; intended for the minority of traces
/// the cheaper strategies cannot classify. A provider that keeps
/// failing yields neutral (archive, no reflection) rather than an
/// error.
pub struct LlmEvaluator {
    llm: Arc<dyn LlmProvider>,
    hooks: HookSet,
}

impl LlmEvaluator {
    /// Evaluator over an LLM provider.
    #[must_use]
    pub fn new(llm: Arc<dyn LlmProvider>, hooks: HookSet) -> Self {
        Self { llm, hooks }
    }

    fn prompt_for(trace: &TraceRecord) -> String {
        format!(
            "Classify the outcome of this operation as success, failure, or neutral.\n\
             Respond with JSON: {{\"outcome\": \"success\" | \"failure\" | \"neutral\"}}.\n\n\
             Operation: {}\nInput: {}\nOutput: {}\nLatency: {}ms\nError: {}",
            trace.operation,
            trace.input,
            trace.output,
            trace.latency_ms,
            trace.error.as_deref().unwrap_or("none"),
        )
    }
}

#[async_trait]
impl EvaluationStrategy for LlmEvaluator {
    async fn evaluate(&self, trace: &TraceRecord) -> Result<TraceOutcome> {
        let prompt = Self::prompt_for(trace);
        let schema = serde_json::json!({
            "type": "object",
            "required": ["outcome"],
            "properties": {
                "outcome": {"type": "string", "enum": ["success", "failure", "neutral"]}
            }
        });
        let event = CallEvent {
            kind: ProviderKind::Llm,
            model: "trace-judge".into(),
            prompt_tokens: (prompt.len() / 4) as u64,
            completion_tokens: 0,
        };
        self.hooks.invoke_pre(&event)?;

        let mut policy = RetryPolicy::new();
        let completion = match policy
            .execute(|| async { self.llm.complete(&prompt, Some(&schema)).await })
            .await
        {
            Ok(completion) => completion,
            Err(error) => {
                warn!(%error, "LLM evaluator unavailable, archiving trace as neutral");
                return Ok(TraceOutcome::Neutral);
            }
        };
        self.hooks.invoke_post(&CallEvent {
            completion_tokens: completion.completion_tokens.unwrap_or(0),
            ..event
        });

        match serde_json::from_str::<JudgedOutcome>(completion.text.trim()) {
            Ok(judged) => Ok(judged.outcome),
            Err(error) => {
                warn!(%error, "unparseable judge response, archiving trace as neutral");
                Ok(TraceOutcome::Neutral)
            }
        }
    }
}

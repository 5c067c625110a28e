use crate::Result;
use async_trait::async_trait;

/// Result of an LLM completion.
#[derive(Debug, Clone)]
pub struct Completion {
    /// Generated text. When a schema was supplied, this is the raw JSON
    /// the model produced; callers parse and validate it.
    pub text: String,
    /// Prompt tokens consumed, when the provider reports them.
    pub prompt_tokens: Option<u64>,
    /// Completion tokens produced, when the provider reports them.
    pub completion_tokens: Option<u64>,
}

impl Completion {
    /// Completion carrying only text.
    #[must_use]
    pub fn text_only(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            prompt_tokens: None,
            completion_tokens: None,
        }
    }

    /// Total tokens, when both sides are known.
    #[must_use]
    pub fn total_tokens(&self) -> Option<u64> {
        Some(self.prompt_tokens? + self.completion_tokens?)
    }
}

/// Trait for LLM completion providers.
///
/// Used by the graph extractor, the reflector, and (optionally) the
/// LLM-judged evaluator. Implementations must surface quota, rate-limit,
/// and model errors distinctly via
/// [`ProviderError`](crate::error::ProviderError) so the core can decide
/// between retrying and skipping.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Complete a prompt, optionally constrained to a JSON schema.
    async fn complete(
        &self,
        prompt: &str,
        schema: Option<&serde_json::Value>,
    ) -> Result<Completion>;
}

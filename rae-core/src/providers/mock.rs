//! Deterministic mock providers.
//!
//! The embedding mock projects a bag of tokens into a fixed-dimension
//! space by hashing, so texts sharing vocabulary land near each other
//! and identical inputs always produce identical vectors. The LLM mock
//! replays scripted responses. Both are used by the test suites and by
//! examples that should run without network access.

use super::{Completion, EmbeddingProvider, LlmProvider};
use crate::error::{Error, ProviderError};
use crate::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};

/// Deterministic hashed bag-of-words embedder.
#[derive(Debug)]
pub struct MockEmbeddingProvider {
    dimensions: HashMap<String, usize>,
}

impl MockEmbeddingProvider {
    /// Provider serving the given (model, dimension) pairs.
    #[must_use]
    pub fn new(models: &[(&str, usize)]) -> Self {
        Self {
            dimensions: models
                .iter()
                .map(|(name, dim)| ((*name).to_string(), *dim))
                .collect(),
        }
    }

    /// Provider serving the default short (384-dim) and long (3072-dim)
    /// model names used by [`RetrievalConfig`](crate::config::RetrievalConfig).
    #[must_use]
    pub fn with_default_models() -> Self {
        Self::new(&[
            ("local-minilm-384", 384),
            ("text-embedding-large-3072", 3072),
        ])
    }

    fn project(text: &str, dimension: usize) -> Vec<f32> {
        let mut vector = vec![0.0_f32; dimension];
        for token in crate::scoring::lexical::tokenize(text) {
            let digest = Sha256::digest(token.as_bytes());
            let index = usize::from_le_bytes([
                digest[0], digest[1], digest[2], digest[3], digest[4], digest[5], digest[6],
                digest[7],
            ]) % dimension;
            vector[index] += 1.0;
        }
        let magnitude = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for x in &mut vector {
                *x /= magnitude;
            }
        }
        vector
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbeddingProvider {
    async fn embed(&self, text: &str, model: &str) -> Result<Vec<f32>> {
        let dimension = self
            .dimension(model)
            .ok_or_else(|| Error::Config(format!("unknown embedding model '{model}'")))?;
        Ok(Self::project(text, dimension))
    }

    fn dimension(&self, model: &str) -> Option<usize> {
        self.dimensions.get(model).copied()
    }
}

/// Scripted LLM provider.
///
/// Responses are consumed front-to-back; when the script is exhausted a
/// fixed fallback is returned. `fail_first(n)` makes the first `n` calls
/// rate-limited, which exercises the retry paths.
pub struct MockLlmProvider {
    responses: Mutex<VecDeque<String>>,
    fallback: String,
    failures_remaining: AtomicU32,
    calls: AtomicU32,
}

impl MockLlmProvider {
    /// Provider replaying `responses`, then falling back to `fallback`.
    #[must_use]
    pub fn new(responses: Vec<String>, fallback: impl Into<String>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            fallback: fallback.into(),
            failures_remaining: AtomicU32::new(0),
            calls: AtomicU32::new(0),
        }
    }

    /// Provider that always returns the same text.
    #[must_use]
    pub fn constant(text: impl Into<String>) -> Self {
        Self::new(Vec::new(), text)
    }

    /// Make the first `n` calls fail with a rate-limit error.
    #[must_use]
    pub fn fail_first(self, n: u32) -> Self {
        self.failures_remaining.store(n, Ordering::SeqCst);
        self
    }

    /// Number of completed calls (including failures).
    #[must_use]
    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmProvider for MockLlmProvider {
    async fn complete(
        &self,
        _prompt: &str,
        _schema: Option<&serde_json::Value>,
    ) -> Result<Completion> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let remaining = self.failures_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures_remaining.store(remaining - 1, Ordering::SeqCst);
            return Err(ProviderError::RateLimited("scripted failure".into()).into());
        }
        let text = self
            .responses
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());
        Ok(Completion::text_only(text))
    }
}

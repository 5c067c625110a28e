//! Cost hooks.
//!
//! Budget enforcement is deliberately external to the core. The core
//! emits a pre-call event before every
//! LLM/embedding call and a post-call event after; an external guard can
//! veto the pre-call, which the caller sees as a provider error.

use crate::error::{ProviderError, Result};
use std::sync::Arc;

/// Which provider class a call targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    /// Embedding generation.
    Embedding,
    /// LLM completion.
    Llm,
}

/// A provider call, as seen by cost hooks.
#[derive(Debug, Clone)]
pub struct CallEvent {
    /// Provider class.
    pub kind: ProviderKind,
    /// Model identifier.
    pub model: String,
    /// Estimated prompt tokens (pre-call) or actual (post-call).
    pub prompt_tokens: u64,
    /// Completion tokens; zero pre-call.
    pub completion_tokens: u64,
}

/// External budget guard interface.
pub trait CostHook: Send + Sync {
    /// Called before a provider call. Returning an error rejects the
    /// call; the rejection surfaces as a quota error to the caller.
    fn before_call(&self, event: &CallEvent) -> std::result::Result<(), String>;

    /// Called after a provider call completes (success or failure).
    fn after_call(&self, event: &CallEvent);
}

/// An ordered set of cost hooks. Empty by default — no budget guard, no
/// overhead beyond the event construction.
#[derive(Clone, Default)]
pub struct HookSet {
    hooks: Vec<Arc<dyn CostHook>>,
}

impl HookSet {
    /// Empty hook set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a hook.
    pub fn register(&mut self, hook: Arc<dyn CostHook>) {
        self.hooks.push(hook);
    }

    /// Run pre-call hooks; the first rejection wins.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::QuotaExceeded`] when any hook rejects.
    pub fn invoke_pre(&self, event: &CallEvent) -> Result<()> {
        for hook in &self.hooks {
            if let Err(reason) = hook.before_call(event) {
                return Err(ProviderError::QuotaExceeded(reason).into());
            }
        }
        Ok(())
    }

    /// Run post-call hooks.
    pub fn invoke_post(&self, event: &CallEvent) {
        for hook in &self.hooks {
            hook.after_call(event);
        }
    }
}

impl std::fmt::Debug for HookSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookSet")
            .field("hooks", &self.hooks.len())
            .finish()
    }
}

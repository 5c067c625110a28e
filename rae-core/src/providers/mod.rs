//! External collaborator seams: embedding providers, LLM providers, and
//! the cost-hook surface an external budget guard attaches to.
//!
//! The core never branches on provider identity; all provider-specific
//! behavior lives behind these traits, injected at engine construction.

mod embedding;
mod hooks;
mod llm;
mod mock;

pub use embedding::EmbeddingProvider;
pub use hooks::{CallEvent, CostHook, HookSet, ProviderKind};
pub use llm::{Completion, LlmProvider};
pub use mock::{MockEmbeddingProvider, MockLlmProvider};

//! # Context Assembler (Information Bottleneck)
//!
//! Given a ranked candidate set and a token budget, selects the subset
//! that maximizes relevance while minimizing size — a greedy
//! approximation of the IB Lagrangian `L = I(Z;Y) − β·I(Z;X)`.
//!
//! Per candidate: `objective = relevance − β · compression_cost`, with
//! `compression_cost = (tokens / total_tokens) · layer_penalty`. Raw
//! episodic text is the most expensive to include verbatim; distilled
//! reflective insight the cheapest.

use crate::config::AssemblerConfig;
use crate::retrieval::RankedArtifact;
use crate::types::{MemoryArtifact, MemoryLayer};
use tracing::debug;

/// Per-layer compression penalties.
#[must_use]
pub fn layer_penalty(layer: MemoryLayer) -> f64 {
    match layer {
        MemoryLayer::Reflective => 0.5,
        MemoryLayer::Semantic => 0.7,
        MemoryLayer::Working => 0.9,
        MemoryLayer::Episodic => 1.0,
    }
}

/// The assembled context for an outbound prompt.
#[derive(Debug, Clone, Default)]
pub struct AssembledContext {
    /// Selected artifacts, in selection order (best objective first).
    pub artifacts: Vec<MemoryArtifact>,
    /// Token sum of the selection; always ≤ the budget.
    pub total_tokens: usize,
    /// Optional synthesized summary (filled by the engine when the
    /// caller authorizes the LLM call).
    pub summary: Option<String>,
}

/// Greedy Information-Bottleneck selection.
#[derive(Debug, Clone)]
pub struct ContextAssembler {
    config: AssemblerConfig,
}

impl ContextAssembler {
    /// Assembler with the given preference configuration.
    #[must_use]
    pub fn new(config: AssemblerConfig) -> Self {
        Self { config }
    }

    /// The effective β for the current selection state.
    ///
    /// Starts from the preference base, halves (configurable) for
    /// complex queries, and rises as the remaining budget shrinks to
    /// force compression near the end.
    #[must_use]
    pub fn effective_beta(&self, complex_query: bool, budget: usize, remaining: usize) -> f64 {
        let mut beta = self.config.preference.base_beta();
        if complex_query {
            beta *= self.config.complex_query_beta_factor;
        }
        if budget > 0 {
            let consumed = 1.0 - (remaining as f64 / budget as f64);
            beta *= 1.0 + consumed;
        }
        beta
    }

    /// Select artifacts under a token budget.
    ///
    /// A zero budget returns an empty context without touching the
    /// candidates.
    #[must_use]
    pub fn assemble(
        &self,
        ranked: &[RankedArtifact],
        budget_tokens: usize,
        complex_query: bool,
    ) -> AssembledContext {
        let mut context = AssembledContext::default();
        if budget_tokens == 0 || ranked.is_empty() {
            return context;
        }

        let total_tokens: usize = ranked
            .iter()
            .map(|r| r.artifact.token_count.max(1))
            .sum();
        let mut remaining = budget_tokens;
        let mut available: Vec<&RankedArtifact> = ranked.iter().collect();

        loop {
            let beta = self.effective_beta(complex_query, budget_tokens, remaining);
            let mut best: Option<(usize, f64)> = None;
            for (index, candidate) in available.iter().enumerate() {
                let tokens = candidate.artifact.token_count.max(1);
                if tokens > remaining {
                    continue;
                }
                let compression_cost = (tokens as f64 / total_tokens as f64)
                    * layer_penalty(candidate.artifact.layer);
                let objective = candidate.composite - beta * compression_cost;
                if objective <= 0.0 {
                    continue;
                }
                match best {
                    Some((_, best_objective)) if best_objective >= objective => {}
                    _ => best = Some((index, objective)),
                }
            }
            let Some((index, _)) = best else {
                break;
            };
            let selected = available.remove(index);
            remaining -= selected.artifact.token_count.max(1);
            context.artifacts.push(selected.artifact.clone());
            if remaining == 0 {
                break;
            }
        }

        context.total_tokens = budget_tokens - remaining;
        debug!(
            selected = context.artifacts.len(),
            tokens = context.total_tokens,
            budget = budget_tokens,
            "context assembled"
        );
        context
    }
}

//! LLM-driven entity/relation extraction.
//!
//! The extractor owns prompt construction, strict response parsing,
//! confidence filtering, entity canonicalization, and idempotent
//! insertion. The LLM itself is an external collaborator; a provider
//! that keeps failing after retries produces no triples and a logged
//! event, never an error to the caller.

use crate::error::Error;
use crate::providers::{CallEvent, HookSet, LlmProvider, ProviderKind};
use crate::retry::{RetryConfig, RetryPolicy};
use crate::storage::GraphStore;
use crate::types::{Entity, GraphTriple, MemoryArtifact};
use crate::Result;
use regex::Regex;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// One triple as emitted by the extraction model.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ExtractedTriple {
    /// Subject surface form.
    pub subject: String,
    /// Subject type tag.
    #[serde(default = "default_entity_type")]
    pub subject_type: String,
    /// Relation symbol.
    pub predicate: String,
    /// Object surface form.
    pub object: String,
    /// Object type tag.
    #[serde(default = "default_entity_type")]
    pub object_type: String,
    /// Model-reported confidence in [0, 1].
    pub confidence: f32,
}

fn default_entity_type() -> String {
    "concept".to_string()
}

/// Canonicalize an entity surface form: case-fold, collapse interior
/// whitespace, trim.
#[must_use]
pub fn canonicalize(name: &str) -> String {
    name.to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Entity/relation extractor over an LLM provider.
pub struct GraphExtractor {
    llm: Arc<dyn LlmProvider>,
    hooks: HookSet,
    min_confidence: f32,
    retry: RetryConfig,
    aliases: HashMap<String, String>,
}

impl GraphExtractor {
    /// Create an extractor. `min_confidence` filters model output before
    /// anything reaches the store.
    #[must_use]
    pub fn new(llm: Arc<dyn LlmProvider>, hooks: HookSet, min_confidence: f32) -> Self {
        Self {
            llm,
            hooks,
            min_confidence,
            retry: RetryConfig::default(),
            aliases: HashMap::new(),
        }
    }

    /// Register alias → canonical-name mappings, applied after
    /// case-folding.
    #[must_use]
    pub fn with_aliases(mut self, aliases: HashMap<String, String>) -> Self {
        self.aliases = aliases
            .into_iter()
            .map(|(alias, canonical)| (canonicalize(&alias), canonicalize(&canonical)))
            .collect();
        self
    }

    fn resolve(&self, name: &str) -> String {
        let folded = canonicalize(name);
        self.aliases.get(&folded).cloned().unwrap_or(folded)
    }

    fn prompt_for(content: &str) -> String {
        format!(
            "Extract factual (subject, predicate, object) triples from the text below.\n\
             Respond with a JSON array only. Each element:\n\
             {{\"subject\": str, \"subject_type\": str, \"predicate\": str (SHORT_UPPER_SNAKE),\n\
              \"object\": str, \"object_type\": str, \"confidence\": float in [0,1]}}\n\
             Return [] when nothing factual is present.\n\n\
             Text:\n{content}"
        )
    }

    fn response_schema() -> serde_json::Value {
        serde_json::json!({
            "type": "array",
            "items": {
                "type": "object",
                "required": ["subject", "predicate", "object", "confidence"],
                "properties": {
                    "subject": {"type": "string"},
                    "subject_type": {"type": "string"},
                    "predicate": {"type": "string"},
                    "object": {"type": "string"},
                    "object_type": {"type": "string"},
                    "confidence": {"type": "number", "minimum": 0.0, "maximum": 1.0}
                }
            }
        })
    }

    /// Parse a model response into triples. Accepts a bare JSON array
    /// or one wrapped in a markdown fence; anything else is an error.
    pub fn parse_response(text: &str) -> Result<Vec<ExtractedTriple>> {
        let trimmed = text.trim();
        let candidate = if trimmed.starts_with('[') {
            trimmed.to_string()
        } else {
            // Salvage a fenced or embedded array.
            #[allow(clippy::expect_used)]
            let fence = Regex::new(r"(?s)\[.*\]").expect("static regex");
            fence
                .find(trimmed)
                .map(|m| m.as_str().to_string())
                .ok_or_else(|| {
                    Error::InvalidInput("extractor response contains no JSON array".into())
                })?
        };
        let triples: Vec<ExtractedTriple> = serde_json::from_str(&candidate)?;
        Ok(triples)
    }

    /// Extract triples from one artifact and insert them idempotently.
    /// Returns the number of triples that passed the confidence filter
    /// and were offered to the store.
    #[instrument(skip(self, artifact, graph), fields(artifact_id = %artifact.id))]
    pub async fn extract_for_artifact(
        &self,
        artifact: &MemoryArtifact,
        graph: &dyn GraphStore,
    ) -> Result<usize> {
        let prompt = Self::prompt_for(&artifact.content);
        let schema = Self::response_schema();

        let event = CallEvent {
            kind: ProviderKind::Llm,
            model: "graph-extractor".into(),
            prompt_tokens: (prompt.len() / 4) as u64,
            completion_tokens: 0,
        };
        self.hooks.invoke_pre(&event)?;

        let mut policy = RetryPolicy::with_config(self.retry.clone());
        let completion = match policy
            .execute(|| async { self.llm.complete(&prompt, Some(&schema)).await })
            .await
        {
            Ok(completion) => completion,
            Err(error) => {
                // Persistent provider failure: no extraction, no error.
                warn!(%error, "graph extraction skipped after retries");
                return Ok(0);
            }
        };
        self.hooks.invoke_post(&CallEvent {
            completion_tokens: completion.completion_tokens.unwrap_or(0),
            ..event
        });

        let extracted = match Self::parse_response(&completion.text) {
            Ok(extracted) => extracted,
            Err(error) => {
                warn!(%error, "extractor response unparseable, skipping artifact");
                return Ok(0);
            }
        };

        let tenant = artifact.scope.tenant();
        let mut inserted = 0usize;
        for triple in extracted {
            if triple.confidence < self.min_confidence {
                continue;
            }
            let subject_name = self.resolve(&triple.subject);
            let object_name = self.resolve(&triple.object);
            if subject_name.is_empty() || object_name.is_empty() || subject_name == object_name {
                continue;
            }
            let subject_id = graph
                .upsert_entity(&Entity::new(tenant, &subject_name, &triple.subject_type))
                .await?;
            let object_id = graph
                .upsert_entity(&Entity::new(tenant, &object_name, &triple.object_type))
                .await?;
            graph
                .insert_triple(&GraphTriple::new(
                    tenant,
                    subject_id,
                    triple.predicate.trim().to_uppercase(),
                    object_id,
                    triple.confidence,
                    artifact.id,
                ))
                .await?;
            inserted += 1;
        }
        debug!(inserted, "graph extraction complete");
        Ok(inserted)
    }
}

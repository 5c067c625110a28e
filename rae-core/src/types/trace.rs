use super::artifact::{MemoryArtifact, MemoryLayer};
use super::scope::Scope;
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of operation an actor performed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// A memory retrieval.
    Retrieval,
    /// An external tool invocation.
    ToolCall,
    /// An ingest of new content.
    Ingest,
    /// Anything else, tagged by name.
    Other(String),
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OperationKind::Retrieval => write!(f, "retrieval"),
            OperationKind::ToolCall => write!(f, "tool_call"),
            OperationKind::Ingest => write!(f, "ingest"),
            OperationKind::Other(name) => write!(f, "{name}"),
        }
    }
}

/// Outcome classification assigned by the evaluator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceOutcome {
    /// The operation achieved its goal.
    Success,
    /// The operation failed or regressed.
    Failure,
    /// Neither; archived without reflection.
    Neutral,
}

impl std::fmt::Display for TraceOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TraceOutcome::Success => write!(f, "success"),
            TraceOutcome::Failure => write!(f, "failure"),
            TraceOutcome::Neutral => write!(f, "neutral"),
        }
    }
}

/// Record of an external operation, submitted by an actor to the
/// reflection engine.
///
/// The reflection engine never observes operations directly; actors
/// (query handlers, tool runners, ingest pipelines) emit these records
/// after the fact. Source artifact ids link the trace back to the
/// memories that were in play, which become the provenance of any
/// reflection generated from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceRecord {
    /// Stable identifier.
    pub id: Uuid,
    /// Owning scope.
    pub scope: Scope,
    /// What kind of operation this was.
    pub operation: OperationKind,
    /// Input summary — for retrievals, the query text.
    pub input: String,
    /// Output summary.
    pub output: String,
    /// Artifacts consulted or produced by the operation.
    pub source_artifact_ids: Vec<Uuid>,
    /// Wall-clock latency.
    pub latency_ms: u64,
    /// Token cost of the operation, if known.
    pub token_cost: Option<u64>,
    /// Explicit quality signal in [0, 1] from the caller, if any.
    pub quality_signal: Option<f32>,
    /// Explicit outcome asserted by the actor, if any.
    pub explicit_outcome: Option<TraceOutcome>,
    /// Error message, when the operation failed outright.
    pub error: Option<String>,
    /// Whether the operation hit a timeout.
    pub timed_out: bool,
    /// When the trace was recorded.
    pub created_at: DateTime<Utc>,
}

impl TraceRecord {
    /// Create a minimal trace for an operation.
    #[must_use]
    pub fn new(scope: Scope, operation: OperationKind, input: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            scope,
            operation,
            input: input.into(),
            output: String::new(),
            source_artifact_ids: Vec::new(),
            latency_ms: 0,
            token_cost: None,
            quality_signal: None,
            explicit_outcome: None,
            error: None,
            timed_out: false,
            created_at: Utc::now(),
        }
    }

    /// Builder-style source artifact assignment.
    #[must_use]
    pub fn with_sources(mut self, ids: Vec<Uuid>) -> Self {
        self.source_artifact_ids = ids;
        self
    }

    /// Builder-style quality signal.
    #[must_use]
    pub fn with_quality_signal(mut self, signal: f32) -> Self {
        self.quality_signal = Some(signal.clamp(0.0, 1.0));
        self
    }

    /// Builder-style error assignment.
    #[must_use]
    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.error = Some(message.into());
        self
    }

    /// Builder-style explicit outcome.
    #[must_use]
    pub fn with_outcome(mut self, outcome: TraceOutcome) -> Self {
        self.explicit_outcome = Some(outcome);
        self
    }
}

/// Metadata keys used to embed trace fields in a reflective artifact.
const META_OUTCOME: &str = "reflection.outcome";
const META_DECISION_CONTEXT: &str = "reflection.decision_context";
const META_FINGERPRINT: &str = "reflection.fingerprint";

/// A generated insight with mandatory provenance.
///
/// Stored as a [`MemoryArtifact`] in the reflective layer; this struct
/// is the typed view used by the reflection engine and the retrieval
/// pipeline's reflective-bonus stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReflectiveTrace {
    /// Stable identifier (shared with the backing artifact).
    pub id: Uuid,
    /// Owning scope.
    pub scope: Scope,
    /// Source memory ids — at least one, for auditability.
    pub source_ids: Vec<Uuid>,
    /// Generated insight or strategy text.
    pub insight: String,
    /// Importance assigned at generation time.
    pub importance: f32,
    /// Free-text description of the decision context.
    pub decision_context: String,
    /// Outcome classification of the underlying trace.
    pub outcome: TraceOutcome,
    /// Query fingerprint for Szubar matching (failure reflections).
    pub fingerprint: Option<String>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl ReflectiveTrace {
    /// Materialize the backing reflective-layer artifact.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConstraintViolation`] if `source_ids` is empty —
    /// a reflection without provenance is rejected, not repaired.
    pub fn into_artifact(self) -> Result<MemoryArtifact> {
        if self.source_ids.is_empty() {
            return Err(Error::ConstraintViolation(
                "reflective trace must cite at least one source artifact".into(),
            ));
        }
        let mut artifact = MemoryArtifact::new(self.scope, MemoryLayer::Reflective, self.insight)
            .with_importance(self.importance)
            .with_provenance(self.source_ids)
            .with_metadata(META_OUTCOME, serde_json::json!(self.outcome))
            .with_metadata(
                META_DECISION_CONTEXT,
                serde_json::Value::String(self.decision_context),
            );
        if let Some(fp) = self.fingerprint {
            artifact = artifact.with_metadata(META_FINGERPRINT, serde_json::Value::String(fp));
        }
        artifact.id = self.id;
        artifact.created_at = self.created_at;
        artifact.last_accessed_at = self.created_at;
        Ok(artifact)
    }

    /// Reconstruct the typed view from a reflective-layer artifact.
    ///
    /// Returns `None` for artifacts in other layers or with malformed
    /// reflection metadata.
    #[must_use]
    pub fn from_artifact(artifact: &MemoryArtifact) -> Option<Self> {
        if artifact.layer != MemoryLayer::Reflective || artifact.provenance.is_empty() {
            return None;
        }
        let outcome: TraceOutcome =
            serde_json::from_value(artifact.metadata.get(META_OUTCOME)?.clone()).ok()?;
        let decision_context = artifact
            .metadata
            .get(META_DECISION_CONTEXT)
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        let fingerprint = artifact
            .metadata
            .get(META_FINGERPRINT)
            .and_then(|v| v.as_str())
            .map(ToString::to_string);
        Some(Self {
            id: artifact.id,
            scope: artifact.scope.clone(),
            source_ids: artifact.provenance.clone(),
            insight: artifact.content.clone(),
            importance: artifact.importance,
            decision_context,
            outcome,
            fingerprint,
            created_at: artifact.created_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scope() -> Scope {
        Scope::new("t", "p").unwrap()
    }

    #[test]
    fn test_reflective_trace_round_trips_through_artifact() {
        let trace = ReflectiveTrace {
            id: Uuid::new_v4(),
            scope: scope(),
            source_ids: vec![Uuid::new_v4(), Uuid::new_v4()],
            insight: "Batch the writes before the index rebuild".into(),
            importance: 0.7,
            decision_context: "nightly consolidation".into(),
            outcome: TraceOutcome::Success,
            fingerprint: Some("abc123".into()),
            created_at: Utc::now(),
        };
        let artifact = trace.clone().into_artifact().unwrap();
        assert_eq!(artifact.layer, MemoryLayer::Reflective);
        assert_eq!(artifact.provenance.len(), 2);

        let back = ReflectiveTrace::from_artifact(&artifact).unwrap();
        assert_eq!(back.id, trace.id);
        assert_eq!(back.outcome, TraceOutcome::Success);
        assert_eq!(back.fingerprint.as_deref(), Some("abc123"));
        assert_eq!(back.decision_context, "nightly consolidation");
    }

    #[test]
    fn test_empty_provenance_is_rejected() {
        let trace = ReflectiveTrace {
            id: Uuid::new_v4(),
            scope: scope(),
            source_ids: vec![],
            insight: "orphan".into(),
            importance: 0.5,
            decision_context: String::new(),
            outcome: TraceOutcome::Failure,
            fingerprint: None,
            created_at: Utc::now(),
        };
        assert!(matches!(
            trace.into_artifact(),
            Err(Error::ConstraintViolation(_))
        ));
    }

    #[test]
    fn test_from_artifact_ignores_other_layers() {
        let plain = MemoryArtifact::new(scope(), MemoryLayer::Semantic, "fact".into());
        assert!(ReflectiveTrace::from_artifact(&plain).is_none());
    }

    #[test]
    fn test_trace_record_builders() {
        let trace = TraceRecord::new(scope(), OperationKind::ToolCall, "run tests")
            .with_sources(vec![Uuid::new_v4()])
            .with_quality_signal(1.4)
            .with_error("timeout");
        assert_eq!(trace.source_artifact_ids.len(), 1);
        assert_eq!(trace.quality_signal, Some(1.0));
        assert!(trace.error.is_some());
    }
}

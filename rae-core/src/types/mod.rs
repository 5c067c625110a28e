//! Core data model: scopes, artifacts, semantic views, graph records,
//! and reflection traces.
//!
//! The atom of the system is the [`MemoryArtifact`]. Everything else —
//! embeddings ([`SemanticView`]), the knowledge graph ([`GraphTriple`],
//! [`Entity`]), reflection records ([`ReflectiveTrace`], [`TraceRecord`])
//! — is derived from or indexed over artifacts.

mod artifact;
mod graph;
mod scope;
mod trace;

pub use artifact::{
    MemoryArtifact, MemoryLayer, SemanticView, IMPORTANCE_CEILING, IMPORTANCE_FLOOR,
    MAX_CONTENT_LEN, MAX_METADATA_ENTRIES, MAX_TAG_COUNT, TOKEN_DENSITY_CEILING,
};
pub use graph::{Entity, GraphTriple};
pub use scope::Scope;
pub use trace::{OperationKind, ReflectiveTrace, TraceOutcome, TraceRecord};

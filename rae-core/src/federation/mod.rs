//! # Federation Protocol
//!
//! Cross-instance memory exchange for peers with heterogeneous
//! embedding spaces. The wire format carries content, metadata, and
//! model-agnostic semantic anchors — never embedding vectors,
//! similarity scores, or ranking output. The requester re-embeds
//! candidates locally and ranks them in its own space.

mod client;
mod registry;
mod token;

pub use client::{FederationClient, FederationServer, FederationTransport};
pub use registry::{PeerRegistry, TrustedPeer};
pub use token::{InvitationClaims, InvitationToken, PeerToken, DEFAULT_EXPIRY_SECS};

use crate::types::TraceOutcome;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// A compact, model-agnostic hint attached to a federated candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SemanticAnchor {
    /// Short natural-language summary.
    pub summary: String,
    /// Intent tag (what the memory is for).
    pub intent: String,
    /// Outcome classification, for reflective content.
    pub outcome: Option<TraceOutcome>,
}

/// Constraints a requester places on a federated query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FederatedConstraints {
    /// Maximum candidates the requester will accept.
    pub max_candidates: Option<usize>,
    /// Restrict to candidates carrying at least one of these tags.
    pub tags_any: Vec<String>,
}

/// Phase (a) of a federated exchange: the request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FederatedQuery {
    /// Free-text query.
    pub query_text: String,
    /// Intent tag.
    pub intent: String,
    /// Requester constraints.
    pub constraints: FederatedConstraints,
}

/// Phase (b): one candidate returned by a peer. Note the deliberate
/// absence of any vector field — embeddings never cross the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FederatedCandidate {
    /// The peer-side artifact id (for provenance links).
    pub artifact_id: Uuid,
    /// Content snippet.
    pub snippet: String,
    /// Structured metadata.
    pub metadata: BTreeMap<String, serde_json::Value>,
    /// Tag set.
    pub tags: Vec<String>,
    /// Provenance links on the peer side.
    pub provenance: Vec<Uuid>,
    /// Optional semantic anchor.
    pub anchor: Option<SemanticAnchor>,
}

/// A federated candidate after local re-embedding and re-ranking.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedFederatedCandidate {
    /// The candidate as received.
    pub candidate: FederatedCandidate,
    /// Peer the candidate came from.
    pub peer_id: String,
    /// Locally computed relevance in [0, 1].
    pub local_relevance: f64,
}

//! Federation scenarios: cross-model candidate exchange, local
//! re-ranking, and unreachable-peer degradation.

use async_trait::async_trait;
use rae_core::engine::{RaeEngine, RaeEngineBuilder};
use rae_core::federation::{
    FederatedCandidate, FederatedQuery, FederationServer, FederationTransport, TrustedPeer,
};
use rae_core::providers::{MockEmbeddingProvider, MockLlmProvider};
use rae_core::retrieval::{RetrievalOptions, Stage};
use rae_core::{Error, MemoryArtifact, MemoryLayer, RaeConfig, Result, Scope};
use std::sync::{Arc, RwLock};

/// Bearer slot filled in after the handshake completes.
#[derive(Default)]
struct SharedBearer(RwLock<String>);

impl SharedBearer {
    fn set(&self, bearer: String) {
        *self.0.write().unwrap() = bearer;
    }

    fn get(&self) -> String {
        self.0.read().unwrap().clone()
    }
}

/// In-process transport that talks straight to a peer's responder.
struct Loopback {
    server: Arc<FederationServer>,
    bearer: Arc<SharedBearer>,
}

#[async_trait]
impl FederationTransport for Loopback {
    async fn query(
        &self,
        _peer: &TrustedPeer,
        request: &FederatedQuery,
    ) -> Result<Vec<FederatedCandidate>> {
        self.server.handle_query(&self.bearer.get(), request).await
    }
}

/// Transport standing in for a peer that is down.
struct Unreachable;

#[async_trait]
impl FederationTransport for Unreachable {
    async fn query(
        &self,
        _peer: &TrustedPeer,
        _request: &FederatedQuery,
    ) -> Result<Vec<FederatedCandidate>> {
        Err(Error::Federation("connection refused".into()))
    }
}

const TENANT: &str = "shared-tenant";
const PROJECT: &str = "shared-project";

fn scope() -> Scope {
    Scope::new(TENANT, PROJECT).unwrap()
}

/// Peer X: a 768-dimension embedding space.
fn build_peer_x() -> RaeEngine {
    let mut config = RaeConfig::default();
    config.retrieval.short_embedding_model = "peer-mini-384".into();
    config.retrieval.long_embedding_model = "peer-large-768".into();
    RaeEngineBuilder::new()
        .config(config)
        .embedder(Arc::new(MockEmbeddingProvider::new(&[
            ("peer-mini-384", 384),
            ("peer-large-768", 768),
        ])))
        .llm(Arc::new(MockLlmProvider::constant("peer insight")))
        .build()
        .unwrap()
}

/// Requester Y: the default 384/3072 space.
fn build_requester_y(transport: Arc<dyn FederationTransport>) -> RaeEngine {
    RaeEngineBuilder::new()
        .embedder(Arc::new(MockEmbeddingProvider::with_default_models()))
        .llm(Arc::new(MockLlmProvider::constant("local insight")))
        .federation_transport(transport)
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_cross_model_federated_query() {
    // Peer X holds the artifact, embedded in its own 768-dim space.
    let peer_x = build_peer_x();
    let artifact = MemoryArtifact::new(
        scope(),
        MemoryLayer::Semantic,
        "PostgreSQL stores JSON documents in JSONB columns".into(),
    )
    .with_tags(vec!["db".into()]);
    let artifact_id = artifact.id;
    peer_x.store(artifact).await.unwrap();

    let server = Arc::new(peer_x.federation_server(PROJECT));
    let bearer = Arc::new(SharedBearer::default());
    let requester_y = build_requester_y(Arc::new(Loopback {
        server,
        bearer: bearer.clone(),
    }));

    // Handshake: X issues an invitation, Y posts it back, X registers Y
    // and hands back the inbound credential; Y registers X through the
    // mirror-image exchange.
    let invitation_from_x = peer_x.issue_invitation(TENANT).unwrap();
    let x_side = peer_x.accept_invitation(&invitation_from_x).unwrap();
    bearer.set(x_side.inbound_token.token.clone());

    let invitation_from_y = requester_y.issue_invitation(TENANT).unwrap();
    let y_side = requester_y.accept_invitation(&invitation_from_y).unwrap();

    // Y also holds a local candidate on the same topic.
    requester_y
        .store(MemoryArtifact::new(
            scope(),
            MemoryLayer::Semantic,
            "SQLite has a JSON1 extension for JSON queries".into(),
        ))
        .await
        .unwrap();

    let options = RetrievalOptions::top_k(5);
    let merged = requester_y
        .retrieve_federated(
            &scope(),
            "which databases support JSON documents?",
            &options,
            &[y_side.peer_id.clone()],
        )
        .await
        .unwrap();

    // The peer's artifact arrived as content (no vector crossed the
    // wire) and ranks alongside Y's local candidate.
    assert!(!merged.degraded);
    let federated = merged
        .results
        .iter()
        .find(|r| r.artifact.id == artifact_id)
        .expect("peer candidate merged");
    assert!(federated.artifact.content.contains("JSONB"));
    assert!(federated
        .ranking_provenance
        .iter()
        .any(|p| p.starts_with("federation:")));
    assert!(merged.results.len() >= 2);

    // Deterministic given Y's frozen state.
    let replay = requester_y
        .retrieve_federated(
            &scope(),
            "which databases support JSON documents?",
            &options,
            &[y_side.peer_id],
        )
        .await
        .unwrap();
    let ids_a: Vec<_> = merged.results.iter().map(|r| r.artifact.id).collect();
    let ids_b: Vec<_> = replay.results.iter().map(|r| r.artifact.id).collect();
    assert_eq!(ids_a, ids_b);
}

#[tokio::test]
async fn test_unreachable_peer_degrades_without_blocking() {
    let requester = build_requester_y(Arc::new(Unreachable));
    requester
        .store(MemoryArtifact::new(
            scope(),
            MemoryLayer::Semantic,
            "local json fact".into(),
        ))
        .await
        .unwrap();

    let invitation = requester.issue_invitation(TENANT).unwrap();
    let peer = requester.accept_invitation(&invitation).unwrap();

    let result = requester
        .retrieve_federated(
            &scope(),
            "json fact",
            &RetrievalOptions::top_k(5),
            &[peer.peer_id],
        )
        .await
        .unwrap();

    assert!(result.degraded);
    assert!(result
        .skipped_stages
        .iter()
        .any(|s| s.stage == Stage::Federation));
    // Local results still come back.
    assert!(!result.results.is_empty());
}

#[tokio::test]
async fn test_forged_bearer_is_refused() {
    let peer_x = build_peer_x();
    peer_x
        .store(MemoryArtifact::new(
            scope(),
            MemoryLayer::Semantic,
            "private peer fact".into(),
        ))
        .await
        .unwrap();

    let server = peer_x.federation_server(PROJECT);
    let request = FederatedQuery {
        query_text: "private peer fact".into(),
        intent: "lookup".into(),
        constraints: rae_core::federation::FederatedConstraints::default(),
    };
    assert!(matches!(
        server.handle_query("forged-token", &request).await,
        Err(Error::Federation(_))
    ));
}

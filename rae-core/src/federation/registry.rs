//! Trusted-peer registry.
//!
//! Read-mostly shared state; the write lock is taken only on handshake
//! completion and revocation.

use super::token::{InvitationToken, PeerToken};
use crate::clock::SharedClock;
use crate::error::Error;
use crate::Result;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// A peer this instance trusts after a completed handshake.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrustedPeer {
    /// Peer identifier (assigned at handshake).
    pub peer_id: String,
    /// Peer's public endpoint.
    pub endpoint: String,
    /// Tenant this trust relationship scopes to.
    pub tenant: String,
    /// Credential we present to the peer.
    pub outbound_token: PeerToken,
    /// Credential the peer presents to us.
    pub inbound_token: PeerToken,
}

/// Registry of trusted peers, keyed by peer id.
#[derive(Default)]
pub struct PeerRegistry {
    peers: RwLock<HashMap<String, TrustedPeer>>,
}

impl PeerRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Complete a handshake from a verified invitation: mint both
    /// long-lived tokens, persist the peer, and return the credential
    /// to send back.
    ///
    /// # Errors
    ///
    /// Propagates invitation verification failures; a bad or expired
    /// invitation registers nothing.
    pub fn complete_handshake(
        &self,
        invitation: &InvitationToken,
        secret: &[u8],
        clock: &SharedClock,
    ) -> Result<TrustedPeer> {
        let claims = invitation.verify(secret, clock)?;
        let peer_id = Uuid::new_v4().to_string();
        let peer = TrustedPeer {
            peer_id: peer_id.clone(),
            endpoint: claims.endpoint,
            tenant: claims.tenant.clone(),
            outbound_token: PeerToken::mint(&peer_id, &claims.tenant),
            inbound_token: PeerToken::mint(&peer_id, &claims.tenant),
        };
        self.peers.write().insert(peer_id, peer.clone());
        Ok(peer)
    }

    /// Look up a trusted peer.
    #[must_use]
    pub fn get(&self, peer_id: &str) -> Option<TrustedPeer> {
        self.peers.read().get(peer_id).cloned()
    }

    /// Resolve the tenant an inbound bearer token is scoped to. This is
    /// the authentication step for serving a federated query.
    #[must_use]
    pub fn authenticate_inbound(&self, bearer: &str) -> Option<TrustedPeer> {
        self.peers
            .read()
            .values()
            .find(|peer| peer.inbound_token.token == bearer)
            .cloned()
    }

    /// Drop a peer.
    pub fn revoke(&self, peer_id: &str) -> Result<()> {
        match self.peers.write().remove(peer_id) {
            Some(_) => Ok(()),
            None => Err(Error::Federation(format!("unknown peer '{peer_id}'"))),
        }
    }

    /// Registered peer count.
    #[must_use]
    pub fn len(&self) -> usize {
        self.peers.read().len()
    }

    /// Whether no peers are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.peers.read().is_empty()
    }
}

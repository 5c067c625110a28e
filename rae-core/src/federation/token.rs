//! Signed invitation tokens for the federation handshake.
//!
//! One side issues a short-lived invitation carrying its public
//! endpoint and a nonce, signed with HMAC-SHA256 over its secret. The
//! other side posts a handshake with its own token; both sides persist
//! the peer's long-lived per-scope token.

use crate::clock::SharedClock;
use crate::error::Error;
use crate::Result;
use base64::Engine;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

/// Default invitation lifetime in seconds.
pub const DEFAULT_EXPIRY_SECS: i64 = 300;

/// The signed payload of an invitation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvitationClaims {
    /// Issuer's public endpoint.
    pub endpoint: String,
    /// Tenant the invitation scopes to.
    pub tenant: String,
    /// Single-use nonce.
    pub nonce: String,
    /// Expiry instant.
    pub expires_at: DateTime<Utc>,
}

/// A wire-encodable invitation: base64 claims plus hex signature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvitationToken {
    /// Base64-encoded JSON claims.
    pub claims: String,
    /// Hex-encoded HMAC-SHA256 over the claims.
    pub signature: String,
}

fn sign(secret: &[u8], claims: &str) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret)
        .map_err(|_| Error::Config("federation secret must not be empty".into()))?;
    mac.update(claims.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

impl InvitationToken {
    /// Issue an invitation for `tenant`, valid for `expiry_secs`.
    pub fn issue(
        secret: &[u8],
        endpoint: &str,
        tenant: &str,
        expiry_secs: i64,
        clock: &SharedClock,
    ) -> Result<Self> {
        if tenant.is_empty() {
            return Err(Error::InvalidInput("invitation requires a tenant".into()));
        }
        let claims = InvitationClaims {
            endpoint: endpoint.to_string(),
            tenant: tenant.to_string(),
            nonce: Uuid::new_v4().to_string(),
            expires_at: clock.now() + chrono::Duration::seconds(expiry_secs),
        };
        let encoded =
            base64::engine::general_purpose::STANDARD.encode(serde_json::to_vec(&claims)?);
        let signature = sign(secret, &encoded)?;
        Ok(Self {
            claims: encoded,
            signature,
        })
    }

    /// Verify signature and expiry, returning the claims.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Federation`] for a bad signature, malformed
    /// claims, or an expired invitation.
    pub fn verify(&self, secret: &[u8], clock: &SharedClock) -> Result<InvitationClaims> {
        // Constant-time comparison via the hmac verify API.
        let mut mac = HmacSha256::new_from_slice(secret)
            .map_err(|_| Error::Config("federation secret must not be empty".into()))?;
        mac.update(self.claims.as_bytes());
        let signature_bytes = hex::decode(&self.signature)
            .map_err(|_| Error::Federation("malformed invitation signature".into()))?;
        if mac.verify_slice(&signature_bytes).is_err() {
            return Err(Error::Federation("invitation signature mismatch".into()));
        }

        let raw = base64::engine::general_purpose::STANDARD
            .decode(&self.claims)
            .map_err(|_| Error::Federation("malformed invitation claims".into()))?;
        let claims: InvitationClaims = serde_json::from_slice(&raw)
            .map_err(|_| Error::Federation("malformed invitation claims".into()))?;
        if clock.now() > claims.expires_at {
            return Err(Error::Federation("invitation expired".into()));
        }
        Ok(claims)
    }
}

/// Long-lived per-scope credential persisted after a handshake.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerToken {
    /// Peer identifier.
    pub peer_id: String,
    /// Tenant the credential scopes to.
    pub tenant: String,
    /// Opaque bearer value.
    pub token: String,
}

impl PeerToken {
    /// Mint a fresh credential for a peer/tenant pair.
    #[must_use]
    pub fn mint(peer_id: impl Into<String>, tenant: impl Into<String>) -> Self {
        Self {
            peer_id: peer_id.into(),
            tenant: tenant.into(),
            token: Uuid::new_v4().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{system_clock, Clock};
    use std::sync::Arc;

    struct FixedClock(DateTime<Utc>);
    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.0
        }
    }

    const SECRET: &[u8] = b"test-federation-secret";

    #[test]
    fn test_issue_verify_round_trip() {
        let clock = system_clock();
        let token =
            InvitationToken::issue(SECRET, "https://peer.example", "t1", 300, &clock).unwrap();
        let claims = token.verify(SECRET, &clock).unwrap();
        assert_eq!(claims.endpoint, "https://peer.example");
        assert_eq!(claims.tenant, "t1");
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let clock = system_clock();
        let token = InvitationToken::issue(SECRET, "e", "t1", 300, &clock).unwrap();
        assert!(matches!(
            token.verify(b"other-secret", &clock),
            Err(Error::Federation(_))
        ));
    }

    #[test]
    fn test_tampered_claims_rejected() {
        let clock = system_clock();
        let mut token = InvitationToken::issue(SECRET, "e", "t1", 300, &clock).unwrap();
        token.claims = base64::engine::general_purpose::STANDARD.encode(
            r#"{"endpoint":"evil","tenant":"t1","nonce":"n","expires_at":"2999-01-01T00:00:00Z"}"#,
        );
        assert!(token.verify(SECRET, &clock).is_err());
    }

    #[test]
    fn test_expired_invitation_rejected() {
        let issue_clock = system_clock();
        let token = InvitationToken::issue(SECRET, "e", "t1", 1, &issue_clock).unwrap();
        let later: SharedClock = Arc::new(FixedClock(Utc::now() + chrono::Duration::hours(1)));
        assert!(matches!(
            token.verify(SECRET, &later),
            Err(Error::Federation(_))
        ));
    }

    #[test]
    fn test_nonces_are_unique() {
        let clock = system_clock();
        let a = InvitationToken::issue(SECRET, "e", "t1", 300, &clock).unwrap();
        let b = InvitationToken::issue(SECRET, "e", "t1", 300, &clock).unwrap();
        assert_ne!(a.claims, b.claims);
    }

    #[test]
    fn test_peer_tokens_are_distinct() {
        assert_ne!(PeerToken::mint("p", "t").token, PeerToken::mint("p", "t").token);
    }
}

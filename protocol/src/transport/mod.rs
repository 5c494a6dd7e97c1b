//! # Relay Transport
//!
//! Abstraction over the decentralized relay network that approval traffic
//! rides on. The orchestrator never talks to a socket; it talks to a
//! [`RelayTransport`], which seals payloads at an [`EncryptionTier`] and
//! hands back [`DeliveryReceipt`]s. Inbound traffic arrives as
//! [`InboundEnvelope`]s on a per-recipient subscription channel.
//!
//! The relay is assumed hostile-adjacent: it can observe, delay, duplicate,
//! and drop, but every payload it carries is sealed end-to-end. The layers
//! above (nonce guard, session dedup) handle duplication and replay; this
//! layer handles confidentiality and tier negotiation.

pub mod relay;
pub mod tier;

pub use relay::InMemoryRelay;
pub use tier::{open, seal, EncryptionTier, MessagingKeypair, SealError};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::config;
use crate::crypto::hash::domain_separated_hash;
use crate::crypto::keys::{StewardKeypair, StewardPublicKey, StewardSignature};
use crate::identity::StewardId;

/// Errors produced by relay sends.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The counterparty's client cannot negotiate the requested tier.
    /// This is the ONLY error that triggers a tier downgrade.
    #[error("recipient does not support the requested encryption tier")]
    TierUnsupported,

    /// No route to the recipient on this relay.
    #[error("recipient unknown to the relay")]
    RecipientUnknown,

    /// The recipient's inbox is gone (subscription dropped, shutdown).
    #[error("delivery channel closed")]
    ChannelClosed,

    /// The relay rejected our identity proof.
    #[error("relay authentication failed")]
    AuthenticationFailed,

    #[error(transparent)]
    Seal(#[from] SealError),
}

/// Proof of delivery, including the tier that actually carried the payload
/// after any fallback. The orchestrator surfaces this tier in audit events.
#[derive(Clone, Debug)]
pub struct DeliveryReceipt {
    pub recipient: StewardId,
    pub tier: EncryptionTier,
    pub delivered_at_ms: u64,
}

/// A sealed payload delivered to a subscriber. Opening it is the
/// recipient's job; the relay never holds plaintext.
#[derive(Clone, Debug)]
pub struct InboundEnvelope {
    pub recipient: StewardId,
    pub tier: EncryptionTier,
    pub ciphertext: Vec<u8>,
    pub received_at_ms: u64,
}

/// The seam between the orchestrator and the relay network.
#[async_trait]
pub trait RelayTransport: Send + Sync {
    /// Seal `payload` for `recipient` at `tier` and publish it.
    async fn send_encrypted(
        &self,
        recipient: &StewardId,
        payload: &[u8],
        tier: EncryptionTier,
    ) -> Result<DeliveryReceipt, TransportError>;

    /// Open a cold, restartable stream of envelopes addressed to
    /// `recipient`. Subscribing again replaces the previous stream.
    fn subscribe(&self, recipient: &StewardId) -> mpsc::Receiver<InboundEnvelope>;
}

#[async_trait]
impl<T: RelayTransport + ?Sized> RelayTransport for std::sync::Arc<T> {
    async fn send_encrypted(
        &self,
        recipient: &StewardId,
        payload: &[u8],
        tier: EncryptionTier,
    ) -> Result<DeliveryReceipt, TransportError> {
        (**self).send_encrypted(recipient, payload, tier).await
    }

    fn subscribe(&self, recipient: &StewardId) -> mpsc::Receiver<InboundEnvelope> {
        (**self).subscribe(recipient)
    }
}

// ---------------------------------------------------------------------------
// Relay authentication
// ---------------------------------------------------------------------------

/// Sign a relay-issued challenge with an Ed25519 identity key. The digest
/// is domain-separated so a relay cannot trick a client into signing
/// something that doubles as an approval response.
pub fn relay_auth_proof(keypair: &StewardKeypair, challenge: &[u8; 32]) -> StewardSignature {
    let digest = domain_separated_hash(config::DOMAIN_TAG_RELAY_AUTH, challenge);
    keypair.sign(&digest)
}

/// Relay-side verification of a client's challenge proof.
pub fn verify_relay_auth(
    public_key: &StewardPublicKey,
    challenge: &[u8; 32],
    proof: &StewardSignature,
) -> bool {
    let digest = domain_separated_hash(config::DOMAIN_TAG_RELAY_AUTH, challenge);
    public_key.verify(&digest, proof)
}

// ---------------------------------------------------------------------------
// Tier fallback
// ---------------------------------------------------------------------------

/// Wraps a transport with the sealed-to-legacy downgrade policy.
///
/// Policy: attempt the requested tier. If that was `Sealed` and the send
/// failed with [`TransportError::TierUnsupported`], retry ONCE at `Legacy`.
/// Every other error propagates untouched — a network failure at the sealed
/// tier is a retry at the sealed tier (the orchestrator's backoff handles
/// that), never an excuse to drop an encryption layer.
pub struct TierFallbackTransport<T: RelayTransport> {
    inner: T,
}

impl<T: RelayTransport> TierFallbackTransport<T> {
    pub fn new(inner: T) -> Self {
        Self { inner }
    }

    pub fn into_inner(self) -> T {
        self.inner
    }
}

#[async_trait]
impl<T: RelayTransport> RelayTransport for TierFallbackTransport<T> {
    async fn send_encrypted(
        &self,
        recipient: &StewardId,
        payload: &[u8],
        tier: EncryptionTier,
    ) -> Result<DeliveryReceipt, TransportError> {
        match self.inner.send_encrypted(recipient, payload, tier).await {
            Err(TransportError::TierUnsupported) if tier == EncryptionTier::Sealed => {
                tracing::warn!(
                    recipient = %recipient.short(),
                    "sealed tier unsupported, downgrading to legacy"
                );
                self.inner
                    .send_encrypted(recipient, payload, EncryptionTier::Legacy)
                    .await
            }
            other => other,
        }
    }

    fn subscribe(&self, recipient: &StewardId) -> mpsc::Receiver<InboundEnvelope> {
        self.inner.subscribe(recipient)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relay_auth_roundtrip() {
        let kp = StewardKeypair::generate();
        let challenge = [0x5Au8; 32];
        let proof = relay_auth_proof(&kp, &challenge);
        assert!(verify_relay_auth(&kp.public_key(), &challenge, &proof));
    }

    #[test]
    fn relay_auth_rejects_wrong_challenge() {
        let kp = StewardKeypair::generate();
        let proof = relay_auth_proof(&kp, &[1u8; 32]);
        assert!(!verify_relay_auth(&kp.public_key(), &[2u8; 32], &proof));
    }

    #[test]
    fn relay_auth_rejects_wrong_key() {
        let kp = StewardKeypair::generate();
        let other = StewardKeypair::generate();
        let challenge = [3u8; 32];
        let proof = relay_auth_proof(&kp, &challenge);
        assert!(!verify_relay_auth(&other.public_key(), &challenge, &proof));
    }

    #[tokio::test]
    async fn fallback_downgrades_only_on_tier_unsupported() {
        let relay = InMemoryRelay::new();
        let kp = StewardKeypair::generate();
        let id = StewardId::from_public_key(&kp.public_key());
        let msg_kp = MessagingKeypair::generate();
        // Legacy-only client: sealed sends bounce with TierUnsupported.
        relay.register(id.clone(), msg_kp.public_key(), false);
        let _rx = relay.subscribe(&id);

        let transport = TierFallbackTransport::new(relay);
        let receipt = transport
            .send_encrypted(&id, b"payload", EncryptionTier::Sealed)
            .await
            .unwrap();
        assert_eq!(receipt.tier, EncryptionTier::Legacy);
    }

    #[tokio::test]
    async fn fallback_propagates_other_errors() {
        let relay = InMemoryRelay::new();
        let kp = StewardKeypair::generate();
        let id = StewardId::from_public_key(&kp.public_key());

        let transport = TierFallbackTransport::new(relay);
        let err = transport
            .send_encrypted(&id, b"payload", EncryptionTier::Sealed)
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::RecipientUnknown));
    }

    #[test]
    fn auth_digest_is_domain_separated() {
        // The signed bytes must not be the raw challenge, or a malicious
        // relay could harvest signatures over attacker-chosen 32-byte
        // strings.
        let kp = StewardKeypair::generate();
        let challenge = [9u8; 32];
        let proof = relay_auth_proof(&kp, &challenge);
        assert!(!kp.public_key().verify(&challenge, &proof));
    }
}

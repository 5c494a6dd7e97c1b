//! # In-Memory Relay
//!
//! A complete [`RelayTransport`] over tokio channels, used by the test
//! suite and the node's demo mode. It behaves like a small, slightly
//! untrustworthy relay: per-recipient mailboxes, per-recipient tier
//! capability flags, an optional duplicate-delivery mode for exercising
//! the dedup path, and single-use challenge authentication.
//!
//! Payloads are sealed exactly as they would be for a real relay — the
//! relay stores only ciphertext, so tests can assert the zero-knowledge
//! transit property against what this relay actually carries.

use dashmap::{DashMap, DashSet};
use rand::RngCore;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;
use x25519_dalek::PublicKey as X25519PublicKey;

use super::{
    seal, verify_relay_auth, DeliveryReceipt, EncryptionTier, InboundEnvelope, RelayTransport,
    TransportError,
};
use crate::config;
use crate::crypto::keys::{StewardPublicKey, StewardSignature};
use crate::identity::StewardId;

/// Capacity of each recipient's inbox. Deep enough that a burst of
/// requests to one steward never stalls the orchestrator's send tasks.
const INBOX_CAPACITY: usize = 64;

struct Mailbox {
    messaging_key: X25519PublicKey,
    supports_sealed: bool,
}

/// Channel-backed relay. Cheap to share behind an `Arc`.
pub struct InMemoryRelay {
    mailboxes: DashMap<StewardId, Mailbox>,
    inboxes: DashMap<StewardId, mpsc::Sender<InboundEnvelope>>,
    challenges: DashSet<[u8; 32]>,
    duplicate_delivery: AtomicBool,
}

impl InMemoryRelay {
    pub fn new() -> Self {
        Self {
            mailboxes: DashMap::new(),
            inboxes: DashMap::new(),
            challenges: DashSet::new(),
            duplicate_delivery: AtomicBool::new(false),
        }
    }

    /// Register a recipient's messaging key and tier capability. Must
    /// happen before anyone can send to that identity.
    pub fn register(
        &self,
        recipient: StewardId,
        messaging_key: X25519PublicKey,
        supports_sealed: bool,
    ) {
        self.mailboxes.insert(
            recipient,
            Mailbox {
                messaging_key,
                supports_sealed,
            },
        );
    }

    /// When enabled, every send is delivered twice. The approval pipeline
    /// must count such a response exactly once.
    pub fn set_duplicate_delivery(&self, enabled: bool) {
        self.duplicate_delivery.store(enabled, Ordering::Relaxed);
    }

    /// Issue a random single-use authentication challenge.
    pub fn issue_challenge(&self) -> [u8; 32] {
        let mut challenge = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut challenge);
        self.challenges.insert(challenge);
        challenge
    }

    /// Verify a client's proof over a previously issued challenge. The
    /// challenge is consumed whether or not the proof verifies.
    pub fn authenticate(
        &self,
        client_key: &StewardPublicKey,
        challenge: &[u8; 32],
        proof: &StewardSignature,
    ) -> Result<(), TransportError> {
        if self.challenges.remove(challenge).is_none() {
            return Err(TransportError::AuthenticationFailed);
        }
        if !verify_relay_auth(client_key, challenge, proof) {
            return Err(TransportError::AuthenticationFailed);
        }
        Ok(())
    }
}

impl Default for InMemoryRelay {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl RelayTransport for InMemoryRelay {
    async fn send_encrypted(
        &self,
        recipient: &StewardId,
        payload: &[u8],
        tier: EncryptionTier,
    ) -> Result<DeliveryReceipt, TransportError> {
        // Seal while holding the mailbox ref, then drop it before any await.
        let envelope = {
            let mailbox = self
                .mailboxes
                .get(recipient)
                .ok_or(TransportError::RecipientUnknown)?;
            if tier == EncryptionTier::Sealed && !mailbox.supports_sealed {
                return Err(TransportError::TierUnsupported);
            }
            seal(tier, &mailbox.messaging_key, payload)?
        };

        let inbox = self
            .inboxes
            .get(recipient)
            .map(|entry| entry.value().clone())
            .ok_or(TransportError::ChannelClosed)?;

        let deliveries = if self.duplicate_delivery.load(Ordering::Relaxed) {
            2
        } else {
            1
        };
        for _ in 0..deliveries {
            let inbound = InboundEnvelope {
                recipient: recipient.clone(),
                tier,
                ciphertext: envelope.clone(),
                received_at_ms: config::now_ms(),
            };
            inbox
                .send(inbound)
                .await
                .map_err(|_| TransportError::ChannelClosed)?;
        }

        Ok(DeliveryReceipt {
            recipient: recipient.clone(),
            tier,
            delivered_at_ms: config::now_ms(),
        })
    }

    fn subscribe(&self, recipient: &StewardId) -> mpsc::Receiver<InboundEnvelope> {
        let (tx, rx) = mpsc::channel(INBOX_CAPACITY);
        self.inboxes.insert(recipient.clone(), tx);
        rx
    }
}

//! # Card Credential Adapter
//!
//! The capability interface over a physical NFC signing card, and the
//! envelope a card produces when tapped.
//!
//! A tap is a *suspension point*, not a function call: the card is in
//! someone's wallet, the phone is in their hand, and the two meet whenever
//! the human decides they do. `sign` is therefore async, may take an
//! unbounded amount of real time, and must be cancellable (the caller drops
//! the future; no orchestrator state is corrupted, because nothing is
//! recorded until the envelope comes back and verifies).
//!
//! ## Purpose binding
//!
//! Every card signature covers a purpose tag alongside the payload digest.
//! A signature produced to approve a guardian request can never be replayed
//! as a spend authorization — the signed bytes differ. Cross-purpose reuse
//! is the classic failure mode of "sign this 32-byte blob" hardware, and we
//! close it at the envelope level rather than trusting callers.
//!
//! ## Counters
//!
//! Real cards expose a monotonically increasing signature counter burned
//! into the secure element. Two envelopes with the same counter can only
//! exist if the credential was physically duplicated. The [`super::ledger`]
//! module turns that observation into enforcement.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;

use crate::config;
use crate::crypto::hash::sha256_multi;
use crate::crypto::keys::{StewardKeypair, StewardPublicKey, StewardSignature};

/// Failures surfaced by a physical card interaction.
#[derive(Debug, Error)]
pub enum CardError {
    /// No card in field, reader missing, or the card did not respond.
    #[error("signing device unavailable")]
    DeviceUnavailable,

    /// The human dismissed the tap prompt.
    #[error("user cancelled the signing interaction")]
    UserCancelled,

    /// The card reported state consistent with a duplicated credential.
    #[error("cloning detected: credential disabled")]
    CloningDetected,
}

/// What a card signature is *for*. The tag is mixed into the signed bytes,
/// so an envelope minted for one purpose is cryptographically useless for
/// any other.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SigningPurpose {
    /// Countersigning an approval response as a steward/guardian.
    GuardianApproval,
    /// Authorizing a direct tap-to-spend payment.
    PaymentSpend,
    /// Authorizing a key-custody action.
    CustodySign,
}

impl SigningPurpose {
    /// Stable wire tag. Do not renumber — firmware in the field checks these.
    pub fn wire_tag(&self) -> u8 {
        match self {
            SigningPurpose::GuardianApproval => 0x10,
            SigningPurpose::PaymentSpend => 0x20,
            SigningPurpose::CustodySign => 0x30,
        }
    }
}

impl fmt::Display for SigningPurpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SigningPurpose::GuardianApproval => write!(f, "guardian-approval"),
            SigningPurpose::PaymentSpend => write!(f, "payment-spend"),
            SigningPurpose::CustodySign => write!(f, "custody-sign"),
        }
    }
}

/// The envelope a physical card emits after a tap.
///
/// Self-contained: carries everything a verifier needs except the expected
/// payload digest (which the verifier computes independently — trusting the
/// envelope's own claim about what was signed would defeat the point).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CardSigningOperation {
    /// SHA-256 digest of the payload presented to the card.
    pub payload_hash: [u8; 32],
    /// Purpose the card was told it was signing for.
    pub purpose: SigningPurpose,
    /// Signature counter reported by the secure element. Strictly
    /// increasing per physical card, or somebody has two of them.
    pub counter: u64,
    /// The card's Ed25519 identity key.
    pub card_pubkey: StewardPublicKey,
    /// Ed25519 signature over [`CardSigningOperation::signed_message`].
    pub signature: StewardSignature,
}

impl CardSigningOperation {
    /// The exact bytes the card signs: a SHA-256 digest binding purpose,
    /// counter, and payload together. SHA-256 (not BLAKE3) because that is
    /// what card firmware speaks.
    pub fn signed_message(payload_hash: &[u8; 32], purpose: SigningPurpose, counter: u64) -> [u8; 32] {
        sha256_multi(&[
            config::PROTOCOL_FINGERPRINT.as_bytes(),
            &[purpose.wire_tag()],
            &counter.to_le_bytes(),
            payload_hash,
        ])
    }

    /// Check the Ed25519 signature against the envelope's own public key.
    ///
    /// This is necessary but NOT sufficient — counter monotonicity is
    /// checked by the [`super::CounterLedger`], which is where cloning is
    /// caught. Never accept an envelope on this check alone.
    pub fn signature_valid(&self) -> bool {
        let msg = Self::signed_message(&self.payload_hash, self.purpose, self.counter);
        self.card_pubkey.verify(&msg, &self.signature)
    }
}

/// Capability surface of a physical signing card.
///
/// Implementations wrap the actual NFC/APDU plumbing. The core never talks
/// to hardware directly; it holds one of these behind a reference and
/// awaits taps.
#[async_trait]
pub trait CardCredential: Send + Sync {
    /// Request a signature over a payload digest. Suspends until the card
    /// is physically presented (or the human gives up).
    async fn sign(
        &self,
        payload_hash: [u8; 32],
        purpose: SigningPurpose,
    ) -> Result<CardSigningOperation, CardError>;

    /// Harvest entropy from the card's hardware RNG. Mixed into nonce
    /// generation — never used alone, so a rigged card RNG cannot weaken
    /// nonces below the OS CSPRNG.
    async fn entropy(&self) -> Result<[u8; 32], CardError>;

    /// The card's identity key, for registry lookups.
    fn public_key(&self) -> StewardPublicKey;
}

// ---------------------------------------------------------------------------
// MockCard
// ---------------------------------------------------------------------------

/// Behavior knob for [`MockCard`] failure injection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MockBehavior {
    /// Sign normally, incrementing the counter per tap.
    Normal,
    /// Sign but never advance the counter — what a duplicated card looks
    /// like to a verifier.
    Cloned,
    /// Every tap fails as if no card entered the field.
    Unavailable,
    /// Every tap fails as if the user dismissed the prompt.
    Cancelled,
}

/// A software stand-in for a physical card, for tests and the demo daemon.
///
/// Deterministic Ed25519 key, a real atomic counter, an optional artificial
/// tap delay, and injectable failure modes. Good enough to exercise every
/// path in the orchestrator except actual radio.
pub struct MockCard {
    keypair: StewardKeypair,
    counter: AtomicU64,
    behavior: MockBehavior,
    tap_delay: Duration,
}

impl MockCard {
    /// A well-behaved card with a fresh random key.
    pub fn new() -> Self {
        Self::with_behavior(StewardKeypair::generate(), MockBehavior::Normal)
    }

    /// A card with explicit key material and behavior.
    pub fn with_behavior(keypair: StewardKeypair, behavior: MockBehavior) -> Self {
        Self {
            keypair,
            counter: AtomicU64::new(0),
            behavior,
            tap_delay: Duration::ZERO,
        }
    }

    /// Simulate a human fumbling for their wallet.
    pub fn with_tap_delay(mut self, delay: Duration) -> Self {
        self.tap_delay = delay;
        self
    }

    /// Force the counter to a specific value (for replay scenarios).
    pub fn set_counter(&self, value: u64) {
        self.counter.store(value, Ordering::SeqCst);
    }
}

impl Default for MockCard {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CardCredential for MockCard {
    async fn sign(
        &self,
        payload_hash: [u8; 32],
        purpose: SigningPurpose,
    ) -> Result<CardSigningOperation, CardError> {
        if !self.tap_delay.is_zero() {
            tokio::time::sleep(self.tap_delay).await;
        }

        match self.behavior {
            MockBehavior::Unavailable => return Err(CardError::DeviceUnavailable),
            MockBehavior::Cancelled => return Err(CardError::UserCancelled),
            MockBehavior::Normal | MockBehavior::Cloned => {}
        }

        // A cloned card re-reports its current counter; a healthy one
        // advances past it.
        let counter = match self.behavior {
            MockBehavior::Cloned => self.counter.load(Ordering::SeqCst),
            _ => self.counter.fetch_add(1, Ordering::SeqCst) + 1,
        };

        let msg = CardSigningOperation::signed_message(&payload_hash, purpose, counter);
        Ok(CardSigningOperation {
            payload_hash,
            purpose,
            counter,
            card_pubkey: self.keypair.public_key(),
            signature: self.keypair.sign(&msg),
        })
    }

    async fn entropy(&self) -> Result<[u8; 32], CardError> {
        use rand::RngCore;
        let mut bytes = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Ok(bytes)
    }

    fn public_key(&self) -> StewardPublicKey {
        self.keypair.public_key()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::hash::sha256_array;

    #[tokio::test]
    async fn mock_card_produces_verifiable_envelope() {
        let card = MockCard::new();
        let payload = sha256_array(b"operation digest");
        let op = card
            .sign(payload, SigningPurpose::GuardianApproval)
            .await
            .unwrap();
        assert!(op.signature_valid());
        assert_eq!(op.counter, 1);
    }

    #[tokio::test]
    async fn counter_advances_per_tap() {
        let card = MockCard::new();
        let payload = sha256_array(b"x");
        let a = card.sign(payload, SigningPurpose::PaymentSpend).await.unwrap();
        let b = card.sign(payload, SigningPurpose::PaymentSpend).await.unwrap();
        assert!(b.counter > a.counter);
    }

    #[tokio::test]
    async fn purpose_changes_signed_bytes() {
        // Same payload, same counter, different purpose => different message,
        // so a signature cannot be transplanted across purposes.
        let payload = sha256_array(b"x");
        let m1 = CardSigningOperation::signed_message(&payload, SigningPurpose::GuardianApproval, 7);
        let m2 = CardSigningOperation::signed_message(&payload, SigningPurpose::PaymentSpend, 7);
        assert_ne!(m1, m2);
    }

    #[tokio::test]
    async fn tampered_envelope_fails_signature_check() {
        let card = MockCard::new();
        let payload = sha256_array(b"genuine");
        let mut op = card
            .sign(payload, SigningPurpose::CustodySign)
            .await
            .unwrap();
        op.counter += 1;
        assert!(!op.signature_valid());
    }

    #[tokio::test]
    async fn unavailable_card_errors() {
        let card = MockCard::with_behavior(StewardKeypair::generate(), MockBehavior::Unavailable);
        let payload = sha256_array(b"x");
        assert!(matches!(
            card.sign(payload, SigningPurpose::PaymentSpend).await,
            Err(CardError::DeviceUnavailable)
        ));
    }

    #[tokio::test]
    async fn cancelled_tap_errors() {
        let card = MockCard::with_behavior(StewardKeypair::generate(), MockBehavior::Cancelled);
        let payload = sha256_array(b"x");
        assert!(matches!(
            card.sign(payload, SigningPurpose::PaymentSpend).await,
            Err(CardError::UserCancelled)
        ));
    }

    #[tokio::test]
    async fn cloned_card_repeats_counter() {
        let card = MockCard::with_behavior(StewardKeypair::generate(), MockBehavior::Cloned);
        card.set_counter(5);
        let payload = sha256_array(b"x");
        let a = card.sign(payload, SigningPurpose::GuardianApproval).await.unwrap();
        let b = card.sign(payload, SigningPurpose::GuardianApproval).await.unwrap();
        assert_eq!(a.counter, 5);
        assert_eq!(b.counter, 5);
        // The envelopes are individually well-formed — that's what makes
        // cloning invisible without the ledger.
        assert!(a.signature_valid());
        assert!(b.signature_valid());
    }

    #[tokio::test]
    async fn entropy_is_not_constant() {
        let card = MockCard::new();
        let a = card.entropy().await.unwrap();
        let b = card.entropy().await.unwrap();
        assert_ne!(a, b);
    }
}

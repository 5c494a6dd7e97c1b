//! # Encryption Tiers
//!
//! Two ways a relay payload gets wrapped before it leaves the process:
//!
//! - **Sealed** (primary): the gift-wrap construction. Two nested layers,
//!   each with its own ephemeral X25519 keypair. DH against the recipient's
//!   static messaging key, BLAKE3 `derive_key` to turn the shared secret
//!   into an AES-256-GCM key, then AEAD-seal with the tier bound in as
//!   additional authenticated data. The outer layer hides even the inner
//!   layer's metadata; a relay sees two ephemeral public keys and noise.
//! - **Legacy** (fallback): one layer, same DH-KDF-AEAD pipeline, ephemeral
//!   sender key. Used only when the counterparty's client cannot negotiate
//!   the sealed tier.
//!
//! Every layer is `ephemeral_pub (32) || nonce || ciphertext` on the wire.
//! Ephemeral keys give forward secrecy per message: compromise of a
//! steward's long-term messaging key never decrypts past traffic, because
//! the sender-side ephemeral secrets were dropped at seal time.
//!
//! The AAD binds `PROTOCOL_FINGERPRINT | tier-name | layer`, so a legacy
//! ciphertext cannot be re-presented as the inner layer of a sealed one.

use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use x25519_dalek::{EphemeralSecret, PublicKey as X25519PublicKey, StaticSecret};

use crate::config;
use crate::crypto::encryption::{self, EncryptionError};
use crate::crypto::hash::domain_separated_hash;

/// How a payload is wrapped for relay transit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EncryptionTier {
    /// Two-layer gift wrap. The default; always attempted first.
    Sealed,
    /// Single-layer fallback for counterparties that cannot unwrap gifts.
    Legacy,
}

impl EncryptionTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            EncryptionTier::Sealed => "sealed",
            EncryptionTier::Legacy => "legacy",
        }
    }
}

impl fmt::Display for EncryptionTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors from sealing or opening tier envelopes.
#[derive(Debug, Error)]
pub enum SealError {
    #[error("envelope too short for an ephemeral key")]
    EnvelopeTooShort,

    #[error(transparent)]
    Encryption(#[from] EncryptionError),
}

/// A steward's long-term X25519 messaging keypair, distributed through the
/// federation registry alongside the Ed25519 identity key. Separate keys
/// for signing and encryption; reusing one key for both is how protocols
/// end up on conference slides.
pub struct MessagingKeypair {
    secret: StaticSecret,
}

impl MessagingKeypair {
    pub fn generate() -> Self {
        Self {
            secret: StaticSecret::random_from_rng(OsRng),
        }
    }

    /// Deterministic construction for tests and devnet provisioning.
    pub fn from_seed(seed: [u8; 32]) -> Self {
        Self {
            secret: StaticSecret::from(seed),
        }
    }

    pub fn public_key(&self) -> X25519PublicKey {
        X25519PublicKey::from(&self.secret)
    }

    fn diffie_hellman(&self, their_public: &X25519PublicKey) -> [u8; 32] {
        *self.secret.diffie_hellman(their_public).as_bytes()
    }
}

impl fmt::Debug for MessagingKeypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "MessagingKeypair(pub={})",
            hex::encode(self.public_key().as_bytes())
        )
    }
}

/// Seal `plaintext` for `recipient` at the requested tier.
pub fn seal(
    tier: EncryptionTier,
    recipient: &X25519PublicKey,
    plaintext: &[u8],
) -> Result<Vec<u8>, SealError> {
    match tier {
        EncryptionTier::Sealed => {
            let inner = seal_layer(config::DOMAIN_TAG_SEAL_INNER, tier, recipient, plaintext)?;
            seal_layer(config::DOMAIN_TAG_SEAL_OUTER, tier, recipient, &inner)
        }
        EncryptionTier::Legacy => {
            seal_layer(config::DOMAIN_TAG_SEAL_LEGACY, tier, recipient, plaintext)
        }
    }
}

/// Open an envelope previously produced by [`seal`] at the same tier.
pub fn open(
    tier: EncryptionTier,
    recipient: &MessagingKeypair,
    envelope: &[u8],
) -> Result<Vec<u8>, SealError> {
    match tier {
        EncryptionTier::Sealed => {
            let inner = open_layer(config::DOMAIN_TAG_SEAL_OUTER, tier, recipient, envelope)?;
            open_layer(config::DOMAIN_TAG_SEAL_INNER, tier, recipient, &inner)
        }
        EncryptionTier::Legacy => {
            open_layer(config::DOMAIN_TAG_SEAL_LEGACY, tier, recipient, envelope)
        }
    }
}

/// One DH-KDF-AEAD layer: `ephemeral_pub || nonce || ciphertext`.
fn seal_layer(
    kdf_tag: &str,
    tier: EncryptionTier,
    recipient: &X25519PublicKey,
    plaintext: &[u8],
) -> Result<Vec<u8>, SealError> {
    let ephemeral = EphemeralSecret::random_from_rng(OsRng);
    let ephemeral_pub = X25519PublicKey::from(&ephemeral);
    let shared = ephemeral.diffie_hellman(recipient);
    let key = domain_separated_hash(kdf_tag, shared.as_bytes());

    let sealed = encryption::encrypt_with_aad(&key, plaintext, &layer_aad(tier, kdf_tag))?;

    let mut out = Vec::with_capacity(32 + sealed.len());
    out.extend_from_slice(ephemeral_pub.as_bytes());
    out.extend_from_slice(&sealed);
    Ok(out)
}

fn open_layer(
    kdf_tag: &str,
    tier: EncryptionTier,
    recipient: &MessagingKeypair,
    envelope: &[u8],
) -> Result<Vec<u8>, SealError> {
    if envelope.len() < 32 {
        return Err(SealError::EnvelopeTooShort);
    }
    let (epk_bytes, sealed) = envelope.split_at(32);
    let mut epk = [0u8; 32];
    epk.copy_from_slice(epk_bytes);
    let ephemeral_pub = X25519PublicKey::from(epk);

    let shared = recipient.diffie_hellman(&ephemeral_pub);
    let key = domain_separated_hash(kdf_tag, &shared);

    Ok(encryption::decrypt_with_aad(
        &key,
        sealed,
        &layer_aad(tier, kdf_tag),
    )?)
}

fn layer_aad(tier: EncryptionTier, kdf_tag: &str) -> Vec<u8> {
    format!("{}|{}|{}", config::PROTOCOL_FINGERPRINT, tier.as_str(), kdf_tag).into_bytes()
}

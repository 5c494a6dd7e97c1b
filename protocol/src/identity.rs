//! # Steward Identities
//!
//! A [`StewardId`] is the address-shaped representation of a principal's
//! identity: the Base58 encoding of the BLAKE3 hash of their Ed25519 public
//! key. It is what approval requests are addressed to on the relay network
//! and what the audit layer is allowed to count (but never print in full —
//! see the zero-knowledge policy in the audit module).
//!
//! ```text
//! public_key (32 bytes)
//!     -> BLAKE3(public_key) -> 32 bytes
//!     -> Base58 -> "7hK3...vQ"
//! ```
//!
//! Hashing before encoding gives a layer of indirection: the relay network
//! learns a stable routing handle, not the raw verification key. The key
//! itself travels separately through the federation registry.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::crypto::hash::blake3_hash;
use crate::crypto::keys::StewardPublicKey;

/// Errors from parsing steward addresses.
#[derive(Debug, Error)]
pub enum IdentityError {
    /// The Base58 string could not be decoded.
    #[error("base58 decode error")]
    Base58Decode,

    /// The decoded data has an unexpected length.
    #[error("invalid address length: expected 32 bytes, got {0}")]
    InvalidLength(usize),
}

/// A steward's routing identity on the relay network.
///
/// Internally stores the 32-byte BLAKE3 hash of the public key; the Base58
/// string form is computed on demand. Cheap to clone and hash — it is used
/// as a map key throughout the orchestrator.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StewardId {
    key_hash: [u8; 32],
}

impl StewardId {
    /// Derive a steward ID from a public key.
    pub fn from_public_key(pk: &StewardPublicKey) -> Self {
        Self {
            key_hash: blake3_hash(pk.as_bytes()),
        }
    }

    /// Parse a Base58 address string back into a steward ID.
    pub fn from_address(addr: &str) -> Result<Self, IdentityError> {
        let bytes = bs58::decode(addr)
            .into_vec()
            .map_err(|_| IdentityError::Base58Decode)?;
        if bytes.len() != 32 {
            return Err(IdentityError::InvalidLength(bytes.len()));
        }
        let mut key_hash = [0u8; 32];
        key_hash.copy_from_slice(&bytes);
        Ok(Self { key_hash })
    }

    /// The full Base58 address string.
    pub fn to_address(&self) -> String {
        bs58::encode(self.key_hash).into_string()
    }

    /// A short prefix of the address, safe for logs and audit counts.
    /// Eight characters of Base58 — enough to correlate within a session,
    /// not enough to identify across contexts.
    pub fn short(&self) -> String {
        let addr = self.to_address();
        addr.chars().take(8).collect()
    }

    /// Raw hash bytes, used for canonical message encoding.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.key_hash
    }
}

impl fmt::Display for StewardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_address())
    }
}

impl fmt::Debug for StewardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Debug output is log output somewhere, eventually. Truncate.
        write!(f, "StewardId({}…)", self.short())
    }
}

//! # Cryptographic Primitives for VIGIL
//!
//! Low-level building blocks the rest of the protocol leans on. Don't roll
//! your own — and don't bypass these wrappers to call the underlying crates
//! directly, because these are the single place we audit.
//!
//! - **hash** — BLAKE3 (internal) and SHA-256 (card-facing) digests, with
//!   domain separation for every protocol context.
//! - **keys** — Ed25519 identity keypairs for stewards, requesters, and
//!   signing cards.
//! - **encryption** — AES-256-GCM authenticated encryption for relay
//!   payloads, with AAD binding for the transport tiers.

pub mod encryption;
pub mod hash;
pub mod keys;

pub use encryption::{decrypt, decrypt_with_aad, encrypt, encrypt_with_aad, EncryptionError};
pub use hash::{blake3_hash, blake3_hash_multi, domain_separated_hash, sha256_array, sha256_multi};
pub use keys::{KeyError, StewardKeypair, StewardPublicKey, StewardSignature};

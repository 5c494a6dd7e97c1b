//! # Hashing Utilities
//!
//! Cryptographic hash functions used throughout VIGIL. We support two
//! primary hash functions and refuse to support more without a very good
//! reason:
//!
//! - **BLAKE3** — Our default. Fast on every platform, parallelizable, and
//!   provably secure under standard assumptions. Used for operation hashes,
//!   session keys, and anywhere performance matters.
//!
//! - **SHA-256** — For the hardware credential path. NFC signing cards speak
//!   SHA-256 and nothing else; the 32-byte payload digest a card signs is
//!   always SHA-256 so the same firmware works against Bitcoin-family
//!   tooling. When talking to cards, use what the cards expect.
//!
//! ## Domain separation
//!
//! Operation hashes, response payloads, and relay-auth challenges must never
//! be confusable with each other — or with any other protocol that signs
//! 32-byte digests. `domain_separated_hash` uses BLAKE3's `derive_key` mode
//! with the context tags from [`crate::config`]. Don't try to prepend a tag
//! manually — that's what amateurs do. `derive_key` uses a different internal
//! IV per context string, making cross-context collisions impossible by
//! construction.

use sha2::{Digest, Sha256};

/// Compute the SHA-256 hash and return a fixed-size array.
///
/// This is the digest a physical signing card operates on. For
/// VIGIL-internal hashing, prefer [`blake3_hash`].
pub fn sha256_array(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let result = hasher.finalize();
    let mut output = [0u8; 32];
    output.copy_from_slice(&result);
    output
}

/// Compute the BLAKE3 hash of the input data.
///
/// Returns a 32-byte digest as a fixed-size array. This is the workhorse
/// hash function of VIGIL. Uses the `blake3` crate which automatically takes
/// advantage of SIMD instructions on supported platforms.
pub fn blake3_hash(data: &[u8]) -> [u8; 32] {
    *blake3::hash(data).as_bytes()
}

/// Compute a domain-separated hash using BLAKE3 with a context string.
///
/// Domain separation prevents hash collisions across protocol contexts.
/// `domain_separated_hash("vigil/operation/v1", data)` and
/// `domain_separated_hash("vigil/relay-auth/v1", data)` will never collide
/// even for identical `data`, because the domain tag selects a different
/// internal IV.
pub fn domain_separated_hash(context: &str, data: &[u8]) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new_derive_key(context);
    hasher.update(data);
    *hasher.finalize().as_bytes()
}

/// Hash multiple byte slices together without concatenation overhead.
///
/// Instead of allocating a buffer to concatenate inputs, we feed them
/// sequentially into the hasher. Same result, less allocation. Used for
/// composite payloads like `operation_hash || nonce || decision` without
/// the temporary buffer.
pub fn blake3_hash_multi(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new();
    for part in parts {
        hasher.update(part);
    }
    *hasher.finalize().as_bytes()
}

/// SHA-256 over multiple parts. The card-facing sibling of
/// [`blake3_hash_multi`] — response payload digests go through this because
/// the card firmware only knows SHA-256.
pub fn sha256_multi(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    let result = hasher.finalize();
    let mut output = [0u8; 32];
    output.copy_from_slice(&result);
    output
}

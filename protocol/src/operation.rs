//! # Operations & Canonical Hashing
//!
//! An [`Operation`] is the thing being authorized: a payment, a key-custody
//! action, or a configuration change. Before anything else happens, the
//! operation is reduced to a single 32-byte [`OperationHash`] — the binding
//! key that every approval request, response, and audit entry references.
//!
//! ## Canonical encoding
//!
//! Hashing a struct sounds trivial until two clients serialize the same
//! struct differently and sign different bytes. We avoid the entire class
//! of problem by defining one canonical byte layout, by hand:
//!
//! ```text
//! version (u8) || type (u8) || amount (u64 LE)
//!   || len(recipient) (u32 LE) || recipient
//!   || len(purpose)   (u32 LE) || purpose
//!   || len(actor)     (u32 LE) || actor
//!   || created_at (u64 LE)
//! ```
//!
//! Length prefixes make the encoding injective — `("ab", "c")` and
//! `("a", "bc")` cannot collide. The result feeds BLAKE3 `derive_key` under
//! [`crate::config::DOMAIN_TAG_OPERATION`], so an operation hash can never
//! be confused with any other 32-byte digest this or any other protocol
//! signs.
//!
//! ## Immutability
//!
//! There are no setters. An operation is built once, hashed once; changing
//! any field means constructing a new operation with a new hash. That rule
//! is what lets physically separated parties be certain they approved the
//! same thing.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::config;
use crate::crypto::hash::domain_separated_hash;
use crate::identity::StewardId;

/// Validation failures when constructing or hashing an operation.
///
/// These are rejected locally and never surfaced to approvers — a malformed
/// operation dies at the caller, not on the relay network.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// Amount exceeds the configured ceiling.
    #[error("amount {amount} exceeds maximum {max}")]
    AmountTooLarge {
        /// The offending amount.
        amount: u64,
        /// The configured ceiling.
        max: u64,
    },

    /// The purpose text exceeds the length cap.
    #[error("purpose text too long: {got} bytes (max {max})")]
    PurposeTooLong { got: usize, max: usize },

    /// The recipient identifier exceeds the length cap.
    #[error("recipient identifier too long: {got} bytes (max {max})")]
    RecipientTooLong { got: usize, max: usize },

    /// Recipient must be non-empty for payment operations.
    #[error("payment operation requires a recipient")]
    MissingRecipient,
}

/// The category of a sensitive operation. This is the ONLY operation field
/// that may travel in approval-request metadata or audit events — amounts
/// and recipients never leave the requesting process in the clear.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationType {
    /// Moving funds to a recipient.
    Payment,
    /// A key-custody action (rotation, recovery, share re-issuance).
    CustodyAction,
    /// A change to federation or policy configuration.
    ConfigChange,
}

impl OperationType {
    /// Stable single-byte tag for canonical encoding. Do not renumber.
    fn wire_tag(&self) -> u8 {
        match self {
            OperationType::Payment => 0x01,
            OperationType::CustodyAction => 0x02,
            OperationType::ConfigChange => 0x03,
        }
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationType::Payment => write!(f, "payment"),
            OperationType::CustodyAction => write!(f, "custody-action"),
            OperationType::ConfigChange => write!(f, "config-change"),
        }
    }
}

/// A sensitive action awaiting authorization.
///
/// Lives only in memory on the requesting side. It is never persisted, never
/// logged in full, and never serialized onto the relay network — only its
/// hash travels.
#[derive(Clone, Debug)]
pub struct Operation {
    /// What kind of action this is.
    pub op_type: OperationType,
    /// Amount in the smallest currency unit. Zero for non-monetary actions.
    pub amount: u64,
    /// Opaque recipient identifier (invoice, address, node pubkey...).
    pub recipient: String,
    /// Short human-readable justification.
    pub purpose: String,
    /// The principal initiating the operation.
    pub actor: StewardId,
    /// Unix milliseconds at creation. Part of the hash — retrying the same
    /// payment a minute later is a different operation.
    pub created_at: u64,
}

impl Operation {
    /// Build and validate an operation, timestamped now.
    pub fn new(
        op_type: OperationType,
        amount: u64,
        recipient: impl Into<String>,
        purpose: impl Into<String>,
        actor: StewardId,
    ) -> Result<Self, ValidationError> {
        let op = Self {
            op_type,
            amount,
            recipient: recipient.into(),
            purpose: purpose.into(),
            actor,
            created_at: config::now_ms(),
        };
        op.validate()?;
        Ok(op)
    }

    /// Structural validation. Called by [`Operation::new`] and again by
    /// [`operation_hash`] so a hand-constructed operation can't sneak past.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.amount > config::MAX_OPERATION_AMOUNT {
            return Err(ValidationError::AmountTooLarge {
                amount: self.amount,
                max: config::MAX_OPERATION_AMOUNT,
            });
        }
        if self.purpose.len() > config::MAX_PURPOSE_LENGTH {
            return Err(ValidationError::PurposeTooLong {
                got: self.purpose.len(),
                max: config::MAX_PURPOSE_LENGTH,
            });
        }
        if self.recipient.len() > config::MAX_RECIPIENT_LENGTH {
            return Err(ValidationError::RecipientTooLong {
                got: self.recipient.len(),
                max: config::MAX_RECIPIENT_LENGTH,
            });
        }
        if self.op_type == OperationType::Payment && self.recipient.is_empty() {
            return Err(ValidationError::MissingRecipient);
        }
        Ok(())
    }

    /// The canonical byte representation. Deterministic: field order and
    /// encoding are fixed, so semantically identical operations always
    /// produce identical bytes regardless of how they were constructed.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(
            64 + self.recipient.len() + self.purpose.len(),
        );
        out.push(0x01); // encoding version
        out.push(self.op_type.wire_tag());
        out.extend_from_slice(&self.amount.to_le_bytes());
        push_lv(&mut out, self.recipient.as_bytes());
        push_lv(&mut out, self.purpose.as_bytes());
        push_lv(&mut out, self.actor.as_bytes());
        out.extend_from_slice(&self.created_at.to_le_bytes());
        out
    }
}

/// Length-value encoding: u32 LE length prefix followed by the bytes.
fn push_lv(out: &mut Vec<u8>, bytes: &[u8]) {
    out.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
    out.extend_from_slice(bytes);
}

/// Compute the domain-separated hash of an operation.
///
/// Pure function: no clock reads, no state, no side effects. Identical
/// operations hash identically across calls and across process restarts.
pub fn operation_hash(op: &Operation) -> Result<OperationHash, ValidationError> {
    op.validate()?;
    Ok(OperationHash(domain_separated_hash(
        config::DOMAIN_TAG_OPERATION,
        &op.canonical_bytes(),
    )))
}

// ---------------------------------------------------------------------------
// OperationHash
// ---------------------------------------------------------------------------

/// A 32-byte operation digest — the binding key across the whole protocol.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OperationHash(pub [u8; 32]);

impl OperationHash {
    /// Raw digest bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Full hex encoding — for wire messages, never for logs.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Truncated hex prefix. This is the ONLY form that may appear in logs
    /// and audit events.
    pub fn short(&self) -> String {
        hex::encode(self.0)[..config::HASH_LOG_PREFIX_LENGTH].to_string()
    }
}

impl fmt::Display for OperationHash {
    /// Display renders the truncated prefix, not the full digest — the
    /// habit of `println!("{}", hash)` in debugging sessions stays
    /// privacy-safe by default.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}…", self.short())
    }
}

impl fmt::Debug for OperationHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OperationHash({}…)", self.short())
    }
}

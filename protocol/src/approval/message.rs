//! # Approval Message Codec
//!
//! Wire types for the k-of-n approval conversation, and the policy gate
//! that keeps operation details out of them.
//!
//! ## Zero-knowledge transit
//!
//! An [`ApprovalRequest`] deliberately carries *about* the operation only
//! its hash and the coarse [`OperationType`]. Amount, recipient, and
//! purpose text never leave the requesting process; stewards fetch those
//! out-of-band over a channel the relay never sees. The codec enforces
//! this structurally (the types have no fields for them) AND dynamically:
//! [`TransitPolicy`] scans every encoded buffer for the sensitive byte
//! strings of the operation at hand and refuses to emit a buffer that
//! contains one. Belt, meet suspenders — the scan exists to catch the
//! future refactor that quietly adds a leaky field.
//!
//! ## Response binding
//!
//! A response's card signature covers `operation_hash ∥ nonce ∥ decision`
//! (see [`response_signing_digest`]), so a captured approval for one
//! operation is useless for any other, and an "approve" cannot be flipped
//! to a "reject" in flight.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::card::CardSigningOperation;
use crate::config;
use crate::crypto::hash::sha256_multi;
use crate::identity::StewardId;
use crate::operation::{Operation, OperationHash, OperationType};

/// Needles shorter than this are not scanned: two-byte strings show up in
/// random nonce bytes often enough to fail honest encodes, and leak nothing
/// an observer couldn't guess anyway.
const MIN_SCAN_NEEDLE: usize = 3;

/// Codec failures. `PolicyViolation` is the one that should page someone.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("message serialization failed")]
    Serialize,

    #[error("malformed message bytes")]
    Deserialize,

    #[error("sensitive operation detail ({field}) found in transit bytes")]
    PolicyViolation { field: &'static str },

    #[error("structural validation failed: {0}")]
    Invalid(&'static str),
}

/// A steward's verdict on an operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Decision {
    Approve,
    Reject,
}

impl Decision {
    /// Byte mixed into the card-signed digest. Stable; do not renumber.
    pub fn wire_tag(&self) -> u8 {
        match self {
            Decision::Approve => 0x01,
            Decision::Reject => 0x02,
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decision::Approve => write!(f, "approve"),
            Decision::Reject => write!(f, "reject"),
        }
    }
}

/// What a steward receives when their approval is requested.
///
/// Everything here is safe for a hostile relay to see (it is encrypted
/// anyway, but the design assumes the encryption will someday fail
/// somewhere). The `nonce` is unique per (session, approver) and must be
/// echoed in the response.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub operation_hash: OperationHash,
    pub requester: StewardId,
    pub nonce: [u8; 32],
    /// Unix milliseconds after which a response is pointless.
    pub expires_at: u64,
    pub threshold_required: u32,
    pub eligible_count: u32,
    /// The ONLY operation metadata that travels: its coarse kind.
    pub op_type: OperationType,
}

/// A steward's countersigned verdict.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApprovalResponse {
    pub operation_hash: OperationHash,
    /// Echo of the request nonce issued to this approver.
    pub nonce: [u8; 32],
    pub decision: Decision,
    pub approver: StewardId,
    /// The card envelope. Its `payload_hash` must equal
    /// [`response_signing_digest`] over the fields above.
    pub card_op: CardSigningOperation,
    pub responded_at: u64,
}

/// The digest a steward's card signs when responding: SHA-256 (the hash
/// card firmware speaks) over a domain tag, the operation hash, the issued
/// nonce, and the decision byte.
pub fn response_signing_digest(
    operation_hash: &OperationHash,
    nonce: &[u8; 32],
    decision: Decision,
) -> [u8; 32] {
    sha256_multi(&[
        config::DOMAIN_TAG_APPROVAL_RESPONSE.as_bytes(),
        operation_hash.as_bytes(),
        nonce,
        &[decision.wire_tag()],
    ])
}

// ---------------------------------------------------------------------------
// Transit policy
// ---------------------------------------------------------------------------

/// The forbidden-substring scan applied to every encoded message.
///
/// Built from the operation a session is about; holds the byte strings
/// that must never appear in transit (decimal amount, recipient, purpose).
pub struct TransitPolicy {
    forbidden: Vec<(&'static str, Vec<u8>)>,
}

impl TransitPolicy {
    /// Policy for a specific operation's sessions.
    pub fn for_operation(op: &Operation) -> Self {
        let mut forbidden: Vec<(&'static str, Vec<u8>)> = vec![
            ("amount", op.amount.to_string().into_bytes()),
            ("recipient", op.recipient.clone().into_bytes()),
            ("purpose", op.purpose.clone().into_bytes()),
        ];
        forbidden.retain(|(_, needle)| needle.len() >= MIN_SCAN_NEEDLE);
        Self { forbidden }
    }

    /// No scanning. For messages not tied to any operation (tests, pings).
    pub fn permissive() -> Self {
        Self {
            forbidden: Vec::new(),
        }
    }

    fn scan(&self, bytes: &[u8]) -> Result<(), CodecError> {
        for (field, needle) in &self.forbidden {
            if bytes
                .windows(needle.len())
                .any(|window| window == needle.as_slice())
            {
                return Err(CodecError::PolicyViolation { field });
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Encode / decode
// ---------------------------------------------------------------------------

pub fn encode_request(
    request: &ApprovalRequest,
    policy: &TransitPolicy,
) -> Result<Vec<u8>, CodecError> {
    let bytes = bincode::serialize(request).map_err(|_| CodecError::Serialize)?;
    policy.scan(&bytes)?;
    Ok(bytes)
}

/// Decode and structurally validate a request. No typed value escapes the
/// codec without passing these checks, so downstream code never has to
/// re-ask "could the nonce be zero here".
pub fn decode_request(bytes: &[u8]) -> Result<ApprovalRequest, CodecError> {
    let request: ApprovalRequest =
        bincode::deserialize(bytes).map_err(|_| CodecError::Deserialize)?;
    if request.nonce == [0u8; 32] {
        return Err(CodecError::Invalid("zero nonce"));
    }
    if request.expires_at == 0 {
        return Err(CodecError::Invalid("missing expiry"));
    }
    if request.expires_at > config::now_ms() + config::MAX_EXPIRY_HORIZON.as_millis() as u64 {
        return Err(CodecError::Invalid("expiry beyond plausible horizon"));
    }
    if request.threshold_required == 0 {
        return Err(CodecError::Invalid("zero threshold"));
    }
    if request.eligible_count < request.threshold_required {
        return Err(CodecError::Invalid("threshold exceeds eligible count"));
    }
    Ok(request)
}

pub fn encode_response(
    response: &ApprovalResponse,
    policy: &TransitPolicy,
) -> Result<Vec<u8>, CodecError> {
    let bytes = bincode::serialize(response).map_err(|_| CodecError::Serialize)?;
    policy.scan(&bytes)?;
    Ok(bytes)
}

pub fn decode_response(bytes: &[u8]) -> Result<ApprovalResponse, CodecError> {
    let response: ApprovalResponse =
        bincode::deserialize(bytes).map_err(|_| CodecError::Deserialize)?;
    if response.nonce == [0u8; 32] {
        return Err(CodecError::Invalid("zero nonce"));
    }
    if response.responded_at == 0 {
        return Err(CodecError::Invalid("missing response timestamp"));
    }
    Ok(response)
}

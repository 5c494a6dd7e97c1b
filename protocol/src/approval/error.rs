//! Orchestrator-level error type. Transport and card failures during a
//! running session are handled inside the session (retries, unreachable
//! marks, audit) and never surface here; these are the failures a caller
//! can actually act on.

use thiserror::Error;

use crate::approval::message::CodecError;
use crate::operation::ValidationError;

#[derive(Debug, Error)]
pub enum ApprovalError {
    /// The registry produced nobody who may approve this operation type.
    #[error("no eligible approvers for this operation type")]
    NoEligibleApprovers,

    /// Policy demands more approvals than there are approvers. Never
    /// silently capped: a 3-of-2 config is a mistake, not a 2-of-2.
    #[error("unsatisfiable threshold: {required} required, {eligible} eligible")]
    UnsatisfiableThreshold { required: u32, eligible: u32 },

    /// An identical operation already has a live session.
    #[error("approval session already active for operation {0}")]
    SessionAlreadyActive(String),

    /// No session for that operation hash (cancel of unknown/purged).
    #[error("no approval session for operation {0}")]
    SessionNotFound(String),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Codec(#[from] CodecError),
}

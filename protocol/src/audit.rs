//! # Audit Trail
//!
//! Every security-relevant decision the orchestrator makes lands here as a
//! structured [`AuditEvent`]: session lifecycle transitions, responses
//! accepted or silently discarded, replays, rate-limit trips, bad
//! signatures, cloning detections.
//!
//! Events are **sanitized at construction**. They carry operation hash
//! prefixes, steward identifiers, counts and tier names — never amounts,
//! recipients, or purpose text. There is no constructor that accepts raw
//! operation fields, so a log sink cannot leak what a session was about
//! even if someone ships the audit stream to a third party.
//!
//! Delivery is dual: every event is emitted through `tracing` (so it shows
//! up in the node's normal log pipeline) and fanned out on a tokio
//! broadcast channel for in-process subscribers such as the metrics layer.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::config::{self, HASH_LOG_PREFIX_LENGTH};
use crate::operation::{OperationHash, OperationType};

/// What happened. Names are stable; dashboards key off them.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditKind {
    /// An approval session opened and requests went out.
    SessionStarted,
    /// Threshold reached; the session is terminally approved.
    SessionApproved,
    /// Deadline passed before threshold; terminally expired.
    SessionExpired,
    /// Initiator cancelled before a terminal state was reached.
    SessionCancelled,
    /// A response passed every check and was counted.
    ResponseAccepted,
    /// A rejection was recorded (rejections never veto, only inform).
    ResponseRejected,
    /// A response was dropped without reply. `reason` says why.
    ResponseDiscarded,
    /// A consumed nonce came back around.
    ReplayRejected,
    /// A sender exceeded the per-window response budget.
    RateLimited,
    /// An envelope carried an invalid signature.
    SignatureFailure,
    /// A card counter went backwards; the credential is now disabled.
    CloningDetected,
    /// All delivery attempts to one approver failed.
    ApproverUnreachable,
}

impl AuditKind {
    /// Stable lowercase name for log fields and metrics labels.
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditKind::SessionStarted => "session_started",
            AuditKind::SessionApproved => "session_approved",
            AuditKind::SessionExpired => "session_expired",
            AuditKind::SessionCancelled => "session_cancelled",
            AuditKind::ResponseAccepted => "response_accepted",
            AuditKind::ResponseRejected => "response_rejected",
            AuditKind::ResponseDiscarded => "response_discarded",
            AuditKind::ReplayRejected => "replay_rejected",
            AuditKind::RateLimited => "rate_limited",
            AuditKind::SignatureFailure => "signature_failure",
            AuditKind::CloningDetected => "cloning_detected",
            AuditKind::ApproverUnreachable => "approver_unreachable",
        }
    }

    /// Events that should page someone, not just scroll past.
    pub fn is_security_alert(&self) -> bool {
        matches!(
            self,
            AuditKind::ReplayRejected
                | AuditKind::RateLimited
                | AuditKind::SignatureFailure
                | AuditKind::CloningDetected
        )
    }
}

/// One sanitized audit record.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuditEvent {
    pub kind: AuditKind,
    /// First [`HASH_LOG_PREFIX_LENGTH`] hex chars of the operation hash.
    pub hash_prefix: String,
    pub op_type: Option<OperationType>,
    /// Steward or sender the event is about, when there is one.
    pub subject: Option<String>,
    /// Approvals counted so far / threshold, for session events.
    pub approvals: Option<(u32, u32)>,
    /// Encryption tier name, for transport-related events.
    pub tier: Option<String>,
    /// Free-form reason for discards. Never contains operation fields.
    pub reason: Option<String>,
    pub at_ms: u64,
}

impl AuditEvent {
    pub fn new(kind: AuditKind, hash: &OperationHash) -> Self {
        Self {
            kind,
            hash_prefix: hash.to_hex()[..HASH_LOG_PREFIX_LENGTH].to_string(),
            op_type: None,
            subject: None,
            approvals: None,
            tier: None,
            reason: None,
            at_ms: config::now_ms(),
        }
    }

    pub fn with_op_type(mut self, op_type: OperationType) -> Self {
        self.op_type = Some(op_type);
        self
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    pub fn with_approvals(mut self, counted: u32, threshold: u32) -> Self {
        self.approvals = Some((counted, threshold));
        self
    }

    pub fn with_tier(mut self, tier: impl Into<String>) -> Self {
        self.tier = Some(tier.into());
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

/// Fan-out point for audit events. Cheap to clone.
#[derive(Clone)]
pub struct AuditEmitter {
    tx: broadcast::Sender<AuditEvent>,
}

impl AuditEmitter {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Log the event and fan it out. Lagging or absent subscribers never
    /// block the orchestrator.
    pub fn emit(&self, event: AuditEvent) {
        if event.kind.is_security_alert() {
            tracing::warn!(
                kind = event.kind.as_str(),
                op = %event.hash_prefix,
                subject = event.subject.as_deref().unwrap_or("-"),
                reason = event.reason.as_deref().unwrap_or("-"),
                "audit"
            );
        } else {
            tracing::info!(
                kind = event.kind.as_str(),
                op = %event.hash_prefix,
                subject = event.subject.as_deref().unwrap_or("-"),
                "audit"
            );
        }
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AuditEvent> {
        self.tx.subscribe()
    }
}

impl Default for AuditEmitter {
    fn default() -> Self {
        Self::new(256)
    }
}

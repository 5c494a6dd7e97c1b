//! # Approval Session State Machine
//!
//! One [`ApprovalSession`] per in-flight operation. The machine is small
//! and strict:
//!
//! ```text
//! Pending ──approvals ≥ k──▶ Approved
//!    │ ──cancel──▶ Rejected
//!    └──deadline──▶ Expired
//! ```
//!
//! Terminal states are immutable. Every mutation goes through methods that
//! check terminality first and refuse — there is no way to un-expire a
//! session or add an approval to an approved one, no matter what arrives
//! off the relay afterwards.
//!
//! The session is pure state; it does no I/O and takes no locks of its
//! own. The orchestrator wraps it in a mutex and serializes all access,
//! which is what makes the count-versus-threshold check race-free.

use std::collections::HashMap;

use crate::approval::message::Decision;
use crate::config;
use crate::identity::StewardId;
use crate::operation::{OperationHash, OperationType};

/// Lifecycle of an approval session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum SessionStatus {
    Pending,
    Approved,
    /// Cancelled by the initiator. Stewards' rejections never force this
    /// state; only `cancel` does.
    Rejected,
    Expired,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SessionStatus::Pending)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Pending => "pending",
            SessionStatus::Approved => "approved",
            SessionStatus::Rejected => "rejected",
            SessionStatus::Expired => "expired",
        }
    }
}

/// What happened when a decision was fed into the machine.
#[derive(Debug, PartialEq, Eq)]
pub enum RecordOutcome {
    /// First decision from this approver; it is now on the books.
    Counted,
    /// This approver already decided. First answer stands.
    Duplicate,
    /// The responder was never part of this session.
    NotEligible,
    /// The session had already reached a terminal state.
    Terminal,
}

struct ApproverSlot {
    nonce: [u8; 32],
    decision: Option<Decision>,
    unreachable: bool,
}

/// Sanitized view of a session for status APIs and logs. Carries the hash
/// prefix only, by construction.
#[derive(Clone, Debug, serde::Serialize)]
pub struct SessionSnapshot {
    pub hash_prefix: String,
    pub op_type: OperationType,
    pub status: SessionStatus,
    pub approvals: u32,
    pub rejections: u32,
    pub threshold: u32,
    pub eligible: u32,
    pub unreachable: u32,
    pub created_at: u64,
    pub deadline_at: u64,
}

pub struct ApprovalSession {
    operation_hash: OperationHash,
    op_type: OperationType,
    threshold: u32,
    status: SessionStatus,
    slots: HashMap<StewardId, ApproverSlot>,
    created_at: u64,
    deadline_at: u64,
    /// When a terminal state was entered, for retention sweeps.
    terminal_at: Option<u64>,
}

impl ApprovalSession {
    pub fn new(
        operation_hash: OperationHash,
        op_type: OperationType,
        threshold: u32,
        deadline_at: u64,
        approver_nonces: Vec<(StewardId, [u8; 32])>,
    ) -> Self {
        let slots = approver_nonces
            .into_iter()
            .map(|(id, nonce)| {
                (
                    id,
                    ApproverSlot {
                        nonce,
                        decision: None,
                        unreachable: false,
                    },
                )
            })
            .collect();
        Self {
            operation_hash,
            op_type,
            threshold,
            status: SessionStatus::Pending,
            slots,
            created_at: config::now_ms(),
            deadline_at,
            terminal_at: None,
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn operation_hash(&self) -> &OperationHash {
        &self.operation_hash
    }

    pub fn op_type(&self) -> OperationType {
        self.op_type
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    pub fn deadline_at(&self) -> u64 {
        self.deadline_at
    }

    /// The nonce issued to one approver, if they are part of this session.
    pub fn issued_nonce(&self, approver: &StewardId) -> Option<&[u8; 32]> {
        self.slots.get(approver).map(|slot| &slot.nonce)
    }

    /// Whether this approver already has a decision on the books. Lets the
    /// pipeline drop duplicated deliveries before expensive checks — and
    /// before the counter ledger, which would read a replayed envelope's
    /// repeated counter as a cloned card.
    pub fn has_decided(&self, approver: &StewardId) -> bool {
        self.slots
            .get(approver)
            .map(|slot| slot.decision.is_some())
            .unwrap_or(false)
    }

    /// Record one approver's decision. First answer per approver wins;
    /// everything else is reported, not stored.
    pub fn record_decision(&mut self, approver: &StewardId, decision: Decision) -> RecordOutcome {
        if self.status.is_terminal() {
            return RecordOutcome::Terminal;
        }
        let Some(slot) = self.slots.get_mut(approver) else {
            return RecordOutcome::NotEligible;
        };
        if slot.decision.is_some() {
            return RecordOutcome::Duplicate;
        }
        slot.decision = Some(decision);
        RecordOutcome::Counted
    }

    /// Count approvals. Always scans the full approver set — the cost of
    /// this call must not depend on which stewards have responded.
    pub fn approvals(&self) -> u32 {
        let mut count = 0u32;
        for slot in self.slots.values() {
            count += u32::from(matches!(slot.decision, Some(Decision::Approve)));
        }
        count
    }

    pub fn rejections(&self) -> u32 {
        let mut count = 0u32;
        for slot in self.slots.values() {
            count += u32::from(matches!(slot.decision, Some(Decision::Reject)));
        }
        count
    }

    pub fn threshold_met(&self) -> bool {
        self.approvals() >= self.threshold
    }

    pub fn mark_unreachable(&mut self, approver: &StewardId) {
        if let Some(slot) = self.slots.get_mut(approver) {
            slot.unreachable = true;
        }
    }

    /// Attempt a transition to a terminal state. Returns `false` (and
    /// changes nothing) if the session is already terminal.
    pub fn transition(&mut self, to: SessionStatus) -> bool {
        if self.status.is_terminal() || !to.is_terminal() {
            return false;
        }
        self.status = to;
        self.terminal_at = Some(config::now_ms());
        true
    }

    /// Whether a terminal session has outlived the retention window.
    pub fn retention_elapsed(&self, now_ms: u64) -> bool {
        match self.terminal_at {
            Some(at) => now_ms.saturating_sub(at) > config::SESSION_RETENTION.as_millis() as u64,
            None => false,
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            hash_prefix: self.operation_hash.short(),
            op_type: self.op_type,
            status: self.status,
            approvals: self.approvals(),
            rejections: self.rejections(),
            threshold: self.threshold,
            eligible: self.slots.len() as u32,
            unreachable: self.slots.values().filter(|s| s.unreachable).count() as u32,
            created_at: self.created_at,
            deadline_at: self.deadline_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::keys::StewardKeypair;
    use crate::operation::{operation_hash, Operation};

    fn steward() -> StewardId {
        StewardId::from_public_key(&StewardKeypair::generate().public_key())
    }

    fn session_with(approvers: &[StewardId], threshold: u32) -> ApprovalSession {
        let op = Operation::new(
            OperationType::Payment,
            100,
            "merchant",
            "test",
            steward(),
        )
        .unwrap();
        let nonces = approvers
            .iter()
            .enumerate()
            .map(|(i, id)| (id.clone(), [i as u8 + 1; 32]))
            .collect();
        ApprovalSession::new(
            operation_hash(&op).unwrap(),
            OperationType::Payment,
            threshold,
            config::now_ms() + 120_000,
            nonces,
        )
    }

    #[test]
    fn threshold_reached_after_k_approvals() {
        let ids = [steward(), steward(), steward()];
        let mut session = session_with(&ids, 2);

        assert_eq!(
            session.record_decision(&ids[0], Decision::Approve),
            RecordOutcome::Counted
        );
        assert!(!session.threshold_met());
        assert_eq!(
            session.record_decision(&ids[1], Decision::Approve),
            RecordOutcome::Counted
        );
        assert!(session.threshold_met());
    }

    #[test]
    fn rejections_do_not_veto_or_count() {
        let ids = [steward(), steward(), steward()];
        let mut session = session_with(&ids, 2);

        session.record_decision(&ids[0], Decision::Reject);
        session.record_decision(&ids[1], Decision::Approve);
        session.record_decision(&ids[2], Decision::Approve);

        assert_eq!(session.approvals(), 2);
        assert_eq!(session.rejections(), 1);
        assert!(session.threshold_met());
        assert_eq!(session.status(), SessionStatus::Pending);
    }

    #[test]
    fn first_decision_per_approver_wins() {
        let ids = [steward(), steward()];
        let mut session = session_with(&ids, 2);

        assert_eq!(
            session.record_decision(&ids[0], Decision::Reject),
            RecordOutcome::Counted
        );
        // A change of heart does not change the books.
        assert_eq!(
            session.record_decision(&ids[0], Decision::Approve),
            RecordOutcome::Duplicate
        );
        assert_eq!(session.approvals(), 0);
        assert_eq!(session.rejections(), 1);
    }

    #[test]
    fn outsider_is_not_eligible() {
        let ids = [steward()];
        let mut session = session_with(&ids, 1);
        assert_eq!(
            session.record_decision(&steward(), Decision::Approve),
            RecordOutcome::NotEligible
        );
    }

    #[test]
    fn terminal_states_are_immutable() {
        let ids = [steward(), steward()];
        let mut session = session_with(&ids, 1);

        assert!(session.transition(SessionStatus::Expired));
        assert_eq!(session.status(), SessionStatus::Expired);

        // No transition out, no late decisions in.
        assert!(!session.transition(SessionStatus::Approved));
        assert_eq!(
            session.record_decision(&ids[0], Decision::Approve),
            RecordOutcome::Terminal
        );
        assert_eq!(session.status(), SessionStatus::Expired);
    }

    #[test]
    fn transition_to_pending_is_refused() {
        let ids = [steward()];
        let mut session = session_with(&ids, 1);
        assert!(!session.transition(SessionStatus::Pending));
        assert_eq!(session.status(), SessionStatus::Pending);
    }

    #[test]
    fn issued_nonces_are_per_approver() {
        let ids = [steward(), steward()];
        let session = session_with(&ids, 2);
        let a = session.issued_nonce(&ids[0]).unwrap();
        let b = session.issued_nonce(&ids[1]).unwrap();
        assert_ne!(a, b);
        assert!(session.issued_nonce(&steward()).is_none());
    }

    #[test]
    fn snapshot_is_sanitized_and_accurate() {
        let ids = [steward(), steward(), steward()];
        let mut session = session_with(&ids, 2);
        session.record_decision(&ids[0], Decision::Approve);
        session.mark_unreachable(&ids[2]);

        let snap = session.snapshot();
        assert_eq!(snap.hash_prefix.len(), config::HASH_LOG_PREFIX_LENGTH);
        assert_eq!(snap.approvals, 1);
        assert_eq!(snap.threshold, 2);
        assert_eq!(snap.eligible, 3);
        assert_eq!(snap.unreachable, 1);
        assert_eq!(snap.status, SessionStatus::Pending);
    }

    #[test]
    fn retention_clock_starts_at_terminal() {
        let ids = [steward()];
        let mut session = session_with(&ids, 1);
        let now = config::now_ms();

        // Pending sessions are never retention-swept.
        assert!(!session.retention_elapsed(now + 10 * 3_600_000));

        session.transition(SessionStatus::Expired);
        assert!(!session.retention_elapsed(now));
        assert!(session.retention_elapsed(now + 2 * 3_600_000));
    }
}

//! # Steward Registry
//!
//! The policy seam: who may approve what, and how many of them it takes.
//! The orchestrator asks; it never decides. Embedders supply their own
//! [`StewardRegistry`] backed by whatever governs their federation —
//! config files, a directory service, an on-chain roster. [`StaticRegistry`]
//! covers tests, demos, and small fixed federations.

use std::collections::HashMap;
use x25519_dalek::PublicKey as X25519PublicKey;

use crate::crypto::keys::StewardPublicKey;
use crate::identity::StewardId;
use crate::operation::OperationType;

/// Everything the orchestrator needs to know about one steward: routing
/// identity, identity key, the key of the physical card they countersign
/// with, the messaging key their envelopes are sealed to, and whether
/// their client can unwrap the sealed tier.
#[derive(Clone, Debug)]
pub struct StewardProfile {
    pub id: StewardId,
    pub identity_key: StewardPublicKey,
    /// The Ed25519 key of the steward's physical signing card. Binds a
    /// card envelope to a registry identity — without this, any valid
    /// card could countersign as any steward.
    pub card_key: StewardPublicKey,
    pub messaging_key: X25519PublicKey,
    pub supports_sealed: bool,
}

impl StewardProfile {
    pub fn new(
        identity_key: StewardPublicKey,
        card_key: StewardPublicKey,
        messaging_key: X25519PublicKey,
    ) -> Self {
        Self {
            id: StewardId::from_public_key(&identity_key),
            identity_key,
            card_key,
            messaging_key,
            supports_sealed: true,
        }
    }

    /// Mark this steward's client as unable to unwrap the sealed tier.
    pub fn legacy_only(mut self) -> Self {
        self.supports_sealed = false;
        self
    }
}

/// Who may approve, and how many it takes. Thresholds are per operation
/// type so embedders can demand more hands on custody changes than on
/// routine payments.
pub trait StewardRegistry: Send + Sync {
    fn eligible_approvers(&self, op_type: OperationType) -> Vec<StewardProfile>;
    fn threshold(&self, op_type: OperationType) -> u32;
}

/// Fixed in-memory roster.
pub struct StaticRegistry {
    approvers: HashMap<OperationType, Vec<StewardProfile>>,
    thresholds: HashMap<OperationType, u32>,
    default_threshold: u32,
}

impl StaticRegistry {
    pub fn new(default_threshold: u32) -> Self {
        Self {
            approvers: HashMap::new(),
            thresholds: HashMap::new(),
            default_threshold,
        }
    }

    /// Register a steward as eligible for one operation type.
    pub fn add_approver(mut self, op_type: OperationType, profile: StewardProfile) -> Self {
        self.approvers.entry(op_type).or_default().push(profile);
        self
    }

    /// Register a steward as eligible for every operation type.
    pub fn add_approver_for_all(mut self, profile: StewardProfile) -> Self {
        for op_type in [
            OperationType::Payment,
            OperationType::CustodyAction,
            OperationType::ConfigChange,
        ] {
            self.approvers
                .entry(op_type)
                .or_default()
                .push(profile.clone());
        }
        self
    }

    /// Override the threshold for one operation type.
    pub fn with_threshold(mut self, op_type: OperationType, k: u32) -> Self {
        self.thresholds.insert(op_type, k);
        self
    }
}

impl StewardRegistry for StaticRegistry {
    fn eligible_approvers(&self, op_type: OperationType) -> Vec<StewardProfile> {
        self.approvers.get(&op_type).cloned().unwrap_or_default()
    }

    fn threshold(&self, op_type: OperationType) -> u32 {
        self.thresholds
            .get(&op_type)
            .copied()
            .unwrap_or(self.default_threshold)
    }
}

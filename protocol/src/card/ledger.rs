//! # Counter Ledger — Cloning Detection
//!
//! Tracks the last-seen signature counter per physical card and refuses any
//! envelope whose counter fails to increase. A non-increasing counter has
//! exactly one honest explanation (relay redelivery of an old envelope) and
//! one dishonest one (a duplicated card) — and since the replay guard
//! upstream already filters redelivery, anything that reaches the ledger
//! with a stale counter is treated as a clone.
//!
//! Disabling is terminal and irreversible from inside the protocol. A card
//! flagged as cloned stays dead until an out-of-band re-provisioning step
//! calls [`CounterLedger::reinstate`] — deliberately not reachable from any
//! message-handling path.
//!
//! ## Concurrency
//!
//! The check-then-update on the counter is the one read-modify-write in the
//! verification path that must be atomic. We hold the DashMap entry lock
//! across the comparison and the write, which makes the pair a single
//! logical step even when verifications for different responses run
//! concurrently.

use dashmap::mapref::entry::Entry;
use dashmap::{DashMap, DashSet};
use thiserror::Error;
use tracing::warn;

use super::adapter::CardSigningOperation;

/// Why an envelope was rejected.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum VerifyError {
    /// The Ed25519 signature does not verify. Forged or corrupted.
    #[error("card signature verification failed")]
    BadSignature,

    /// The counter did not increase — duplicated credential.
    #[error("cloning detected: counter {got} <= last seen {last_seen}")]
    CloningDetected { got: u64, last_seen: u64 },

    /// The credential was disabled by an earlier cloning event. Even a
    /// perfectly valid envelope from it is refused.
    #[error("credential is disabled")]
    CredentialDisabled,
}

impl VerifyError {
    /// Whether this rejection is (or stems from) a cloning event — the
    /// orchestrator escalates these to the audit layer differently from
    /// garden-variety bad signatures.
    pub fn is_cloning(&self) -> bool {
        matches!(
            self,
            VerifyError::CloningDetected { .. } | VerifyError::CredentialDisabled
        )
    }
}

/// Per-card monotonic counter state. One instance is shared by every
/// verification site in the process.
#[derive(Default)]
pub struct CounterLedger {
    /// card pubkey bytes -> highest counter observed in a VALID envelope.
    last_seen: DashMap<[u8; 32], u64>,
    /// Cards permanently refused after a cloning event.
    disabled: DashSet<[u8; 32]>,
}

impl CounterLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Verify an envelope: signature first, then counter monotonicity.
    ///
    /// Order matters — an attacker must not be able to burn a victim's
    /// counter slot (or trip the clone detector) with an unsigned garbage
    /// envelope. Only a cryptographically valid envelope may touch the
    /// ledger state.
    pub fn verify(&self, op: &CardSigningOperation) -> Result<(), VerifyError> {
        let key = *op.card_pubkey.as_bytes();

        if self.disabled.contains(&key) {
            return Err(VerifyError::CredentialDisabled);
        }

        if !op.signature_valid() {
            return Err(VerifyError::BadSignature);
        }

        // Atomic check-and-advance: the entry lock spans the comparison and
        // the write.
        match self.last_seen.entry(key) {
            Entry::Occupied(mut entry) => {
                let last = *entry.get();
                if op.counter <= last {
                    drop(entry);
                    self.disabled.insert(key);
                    warn!(
                        card = %op.card_pubkey.to_hex().get(..16).unwrap_or_default(),
                        got = op.counter,
                        last_seen = last,
                        "non-increasing card counter: credential disabled"
                    );
                    return Err(VerifyError::CloningDetected {
                        got: op.counter,
                        last_seen: last,
                    });
                }
                entry.insert(op.counter);
                Ok(())
            }
            Entry::Vacant(entry) => {
                entry.insert(op.counter);
                Ok(())
            }
        }
    }

    /// Whether a card is currently disabled.
    pub fn is_disabled(&self, card_pubkey: &[u8; 32]) -> bool {
        self.disabled.contains(card_pubkey)
    }

    /// Out-of-band re-provisioning hook: clears the disabled flag and the
    /// counter history for a card. Never call this from a message-handling
    /// path — it exists for operator tooling after a physical card swap.
    pub fn reinstate(&self, card_pubkey: &[u8; 32]) {
        self.disabled.remove(card_pubkey);
        self.last_seen.remove(card_pubkey);
    }
}

//! # Card Credential Layer
//!
//! Abstraction over the physical NFC signing card. The card itself — the
//! wireless protocol, the applet, the secure element — is an external
//! collaborator; this module defines the capability surface the rest of
//! VIGIL depends on and the anti-cloning bookkeeping around it.
//!
//! - **adapter** — the [`CardCredential`] trait (tap-to-sign, entropy
//!   harvesting), the [`CardSigningOperation`] envelope, and a mock card
//!   for tests and demos.
//! - **ledger** — the [`CounterLedger`]: per-card signature-counter
//!   monotonicity tracking. A counter that fails to increase means the
//!   credential has been duplicated, and the ledger disables it for good.

pub mod adapter;
pub mod ledger;

pub use adapter::{CardCredential, CardError, CardSigningOperation, MockCard, SigningPurpose};
pub use ledger::{CounterLedger, VerifyError};

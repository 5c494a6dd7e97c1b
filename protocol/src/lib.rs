// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # VIGIL Protocol — Core Library
//!
//! VIGIL is steward-gated authorization: before a sensitive operation —
//! a payment, a custody action, a config change — executes, k of n
//! stewards must countersign it with a physical tap of an NFC signing
//! card. The conversation between requester and stewards rides a
//! decentralized relay network that learns nothing about the operation
//! beyond its hash and coarse kind.
//!
//! The stack is deliberately boring: Ed25519 for signatures (because
//! we're not barbarians), X25519 + AES-256-GCM for the sealed messaging
//! tiers (because NIST and djb both got their halves right), BLAKE3 with
//! keyed domain separation for protocol hashes, and SHA-256 where card
//! firmware gets a vote.
//!
//! ## Architecture
//!
//! The crate is split into modules that mirror the actual concerns of an
//! approval round:
//!
//! - **crypto** — Low-level cryptographic primitives. Don't roll your own.
//! - **identity** — Steward addressing: hash of a key, not the key.
//! - **operation** — Canonical encoding and hashing of what's being authorized.
//! - **card** — The NFC card capability seam, envelopes, and the clone-catching counter ledger.
//! - **approval** — Codec, registry, session state machine, orchestrator. The main event.
//! - **transport** — Encryption tiers and the relay seam.
//! - **guard** — Replay and rate-limit enforcement.
//! - **audit** — Sanitized event trail. Hash prefixes only, ever.
//! - **config** — Protocol constants and timing parameters.
//!
//! ## Design Philosophy
//!
//! 1. The relay is part of the threat model, not the trusted base.
//! 2. Invalid input is a silent no-op plus an audit event — never an error
//!    oracle for whoever sent it.
//! 3. No unsafe code in crypto paths — we sleep at night.
//! 4. If it gates money, it has tests. Plural.

pub mod approval;
pub mod audit;
pub mod card;
pub mod config;
pub mod crypto;
pub mod guard;
pub mod identity;
pub mod operation;
pub mod transport;

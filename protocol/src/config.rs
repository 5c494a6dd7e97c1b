//! # Protocol Configuration & Constants
//!
//! Every magic number in VIGIL lives here. If you're hardcoding a constant
//! somewhere else, you're doing it wrong and you owe the team coffee.
//!
//! These values define the security posture of the approval protocol.
//! Loosening a timeout or a rate limit after deployments exist in the wild
//! is somewhere between "difficult" and "career-ending", so choose wisely
//! during devnet.

use std::time::Duration;

// ---------------------------------------------------------------------------
// Protocol Version
// ---------------------------------------------------------------------------

/// Protocol fingerprint for wire identification. Every approval message
/// envelope carries this string so clients can quickly reject traffic from
/// unrelated protocols without decrypting further.
pub const PROTOCOL_FINGERPRINT: &str = "ALAS-VIGIL-2026";

/// Major version — bump on breaking message-format changes.
pub const PROTOCOL_VERSION_MAJOR: u16 = 0;

/// Minor version — bump on backward-compatible additions.
pub const PROTOCOL_VERSION_MINOR: u16 = 1;

/// The full version string, assembled at compile time so we don't allocate
/// for something this trivial at runtime.
pub const PROTOCOL_VERSION: &str = "0.1.0";

// ---------------------------------------------------------------------------
// Domain Separation Tags
// ---------------------------------------------------------------------------
//
// Each tag feeds BLAKE3's `derive_key` mode, so hashes produced in one
// context can never collide with hashes produced in another — or with any
// unrelated protocol that signs 32-byte digests. Changing a tag is a hard
// fork of the approval protocol.

/// Domain tag for operation hashes. This is the binding key for the entire
/// request/response flow — every approval message references a hash produced
/// under this tag.
pub const DOMAIN_TAG_OPERATION: &str = "vigil/operation/v1";

/// Domain tag for the payload a steward's card countersigns in an approval
/// response (`operation_hash || nonce || decision`).
pub const DOMAIN_TAG_APPROVAL_RESPONSE: &str = "vigil/approval-response/v1";

/// Domain tag for relay authentication challenges.
pub const DOMAIN_TAG_RELAY_AUTH: &str = "vigil/relay-auth/v1";

/// KDF tag for the outer layer of the sealed (gift-wrap) encryption tier.
pub const DOMAIN_TAG_SEAL_OUTER: &str = "vigil/seal/outer/v1";

/// KDF tag for the inner layer of the sealed encryption tier.
pub const DOMAIN_TAG_SEAL_INNER: &str = "vigil/seal/inner/v1";

/// KDF tag for the single-layer legacy encryption tier.
pub const DOMAIN_TAG_SEAL_LEGACY: &str = "vigil/seal/legacy/v1";

// ---------------------------------------------------------------------------
// Cryptographic Parameters
// ---------------------------------------------------------------------------

/// Ed25519 — the only sane choice for signatures in 2024+. Deterministic,
/// compact, and resistant to side-channel attacks when implemented correctly
/// (which ed25519-dalek is).
pub const SIGNING_ALGORITHM: &str = "Ed25519";

/// Ed25519 signature length. Always 64 bytes. If yours isn't, something
/// has gone terribly wrong.
pub const SIGNATURE_LENGTH: usize = 64;

/// Public (verifying) key length in bytes.
pub const VERIFYING_KEY_LENGTH: usize = 32;

/// X25519 for Diffie-Hellman key agreement in the sealed message tiers.
pub const KEY_EXCHANGE_ALGORITHM: &str = "X25519";

/// AES-256-GCM for symmetric encryption of relay payloads. 256-bit keys,
/// 96-bit nonces, 128-bit authentication tags.
pub const SYMMETRIC_ALGORITHM: &str = "AES-256-GCM";

/// AES-256-GCM key length in bytes.
pub const AES_KEY_LENGTH: usize = 32;

/// AES-256-GCM nonce length in bytes. 96 bits is the standard and the only
/// length you should use. 12 bytes. Not 16. Not 8. Twelve.
pub const AES_NONCE_LENGTH: usize = 12;

/// Hash output length in bytes. Both SHA-256 and BLAKE3 produce 32-byte digests.
pub const HASH_OUTPUT_LENGTH: usize = 32;

/// Approval-request nonce length. 32 random bytes per (session, approver)
/// pair. The nonce is single-use: consumed by the first valid response.
pub const REQUEST_NONCE_LENGTH: usize = 32;

/// How many hex characters of an operation hash may appear in logs and
/// audit events. Eight characters = 32 bits — enough to correlate, far too
/// little to reverse.
pub const HASH_LOG_PREFIX_LENGTH: usize = 8;

// ---------------------------------------------------------------------------
// Operation Limits
// ---------------------------------------------------------------------------

/// Maximum operation amount in the smallest currency unit. One hundred
/// million units flowing through a tap-to-spend path deserves a human
/// conversation, not a bigger constant.
pub const MAX_OPERATION_AMOUNT: u64 = 100_000_000;

/// Maximum `purpose` free-text length in bytes. Enough for a short
/// justification, not enough for your novel.
pub const MAX_PURPOSE_LENGTH: usize = 256;

/// Maximum recipient identifier length in bytes.
pub const MAX_RECIPIENT_LENGTH: usize = 512;

// ---------------------------------------------------------------------------
// Timing Constants
// ---------------------------------------------------------------------------

/// Default deadline for an approval session. Stewards are humans with
/// phones in pockets, not validators in a datacenter — give them two
/// minutes before the session is forced to `Expired`.
pub const APPROVAL_DEADLINE: Duration = Duration::from_secs(120);

/// Deadline as milliseconds — because some APIs want a u64, not a Duration.
/// Keep this in sync with APPROVAL_DEADLINE or face the wrath of tests.
pub const APPROVAL_DEADLINE_MS: u64 = 120_000;

/// How far in the future a request's `expires_at` may plausibly be before
/// the codec rejects it as malformed. Guards against garbage timestamps
/// arriving off the wire.
pub const MAX_EXPIRY_HORIZON: Duration = Duration::from_secs(24 * 60 * 60);

/// Retention window for terminal sessions before eviction. Long enough for
/// the audit layer and the caller to consume the outcome, short enough to
/// bound memory.
pub const SESSION_RETENTION: Duration = Duration::from_secs(15 * 60);

/// Retention window for consumed nonces in the replay guard. Must outlive
/// the longest possible session deadline, otherwise a replayed response
/// could slip in after eviction.
pub const NONCE_RETENTION: Duration = Duration::from_secs(30 * 60);

// ---------------------------------------------------------------------------
// Delivery & Retry
// ---------------------------------------------------------------------------

/// Maximum delivery attempts per approver before marking them unreachable.
/// An unreachable approver never blocks the session — the threshold can
/// still be met by the others.
pub const SEND_MAX_ATTEMPTS: u32 = 4;

/// Base delay for exponential backoff between delivery attempts.
/// Attempt n waits `SEND_BACKOFF_BASE * 2^(n-1)`.
pub const SEND_BACKOFF_BASE: Duration = Duration::from_millis(250);

// ---------------------------------------------------------------------------
// Rate Limiting
// ---------------------------------------------------------------------------

/// Sliding-window length for per-approver response rate limiting.
pub const RATE_LIMIT_WINDOW: Duration = Duration::from_secs(60);

/// Maximum responses a single approver may submit per window. A legitimate
/// steward submits one response per session; ten per minute is already
/// generous to flaky relays that redeliver.
pub const RATE_LIMIT_MAX_RESPONSES: u32 = 10;

// ---------------------------------------------------------------------------
// Network Parameters
// ---------------------------------------------------------------------------

/// Default RPC API port for the daemon.
pub const DEFAULT_RPC_PORT: u16 = 9750;

/// Default metrics (Prometheus) port.
pub const DEFAULT_METRICS_PORT: u16 = 9751;

// ---------------------------------------------------------------------------
// Utility
// ---------------------------------------------------------------------------

/// Current wall-clock time as Unix milliseconds. Centralized so every
/// timestamp in the protocol is produced the same way.
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

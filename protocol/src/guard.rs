//! # Replay & Rate-Limit Guard
//!
//! The bouncer in front of the orchestrator. Three jobs:
//!
//! 1. **Sliding-window rate limiting** — per-key (in practice: per approver
//!    identity) counts over a rolling window, so a compromised client can't
//!    firehose responses at every open session.
//! 2. **Consumed-nonce tracking** — a nonce is single-use; once a valid
//!    response spends it, any later message carrying it is a replay.
//! 3. **Timing-safe nonce comparison** — nonce equality checks go through
//!    `subtle`'s constant-time equality so response latency never leaks how
//!    many prefix bytes of a guessed nonce matched.
//!
//! Rejections here are silent by design: the guard reports `false` / replay,
//! the caller audits it, and the sender learns nothing. Sending error
//! details back to someone replaying traffic is just free reconnaissance.
//!
//! Both maps evict on touch and via [`ReplayGuard::purge_expired`], keeping
//! memory bounded no matter how long the process runs.

use dashmap::DashMap;
use std::time::{Duration, Instant};
use subtle::ConstantTimeEq;

use crate::config;

/// Shared sliding-window and nonce state. One instance per orchestrator.
pub struct ReplayGuard {
    /// key -> timestamps of accepted events inside the current window.
    windows: DashMap<String, Vec<Instant>>,
    /// consumed nonce -> when it was spent (for retention-based eviction).
    consumed: DashMap<[u8; 32], Instant>,
    /// How long spent nonces are remembered.
    nonce_retention: Duration,
}

impl ReplayGuard {
    pub fn new() -> Self {
        Self::with_retention(config::NONCE_RETENTION)
    }

    /// Custom retention, for tests that shouldn't wait half an hour.
    pub fn with_retention(nonce_retention: Duration) -> Self {
        Self {
            windows: DashMap::new(),
            consumed: DashMap::new(),
            nonce_retention,
        }
    }

    /// Sliding-window check: record one event for `key` and report whether
    /// it stays within `max_count` events per `window`.
    ///
    /// The entry is pruned and updated under one map lock, so concurrent
    /// calls for the same key can't both sneak under the limit.
    pub fn check_and_record(&self, key: &str, window: Duration, max_count: u32) -> bool {
        let now = Instant::now();
        let mut entry = self.windows.entry(key.to_string()).or_default();
        entry.retain(|t| now.duration_since(*t) < window);
        if entry.len() >= max_count as usize {
            return false;
        }
        entry.push(now);
        true
    }

    /// Spend a nonce. Returns `false` if it was already consumed — i.e. the
    /// caller is looking at a replay.
    pub fn consume_nonce(&self, nonce: &[u8; 32]) -> bool {
        let now = Instant::now();
        match self.consumed.entry(*nonce) {
            dashmap::mapref::entry::Entry::Occupied(mut occupied) => {
                if now.duration_since(*occupied.get()) < self.nonce_retention {
                    return false;
                }
                // Retention elapsed; treat as fresh.
                occupied.insert(now);
                true
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(now);
                true
            }
        }
    }

    /// Constant-time nonce equality. Use this — never `==` — when comparing
    /// an attacker-supplied nonce against an issued one.
    pub fn nonce_matches(a: &[u8; 32], b: &[u8; 32]) -> bool {
        bool::from(a.ct_eq(b))
    }

    /// Drop expired window entries and forgotten nonces. Call periodically
    /// (the orchestrator runs this on its housekeeping tick).
    pub fn purge_expired(&self, window: Duration) {
        let now = Instant::now();
        self.windows.retain(|_, times| {
            times.retain(|t| now.duration_since(*t) < window);
            !times.is_empty()
        });
        self.consumed
            .retain(|_, spent_at| now.duration_since(*spent_at) < self.nonce_retention);
    }

    /// Number of live tracked keys (tests and metrics only).
    pub fn tracked_keys(&self) -> usize {
        self.windows.len()
    }
}

impl Default for ReplayGuard {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_up_to_max_then_blocks() {
        let guard = ReplayGuard::new();
        let window = Duration::from_secs(60);
        for _ in 0..5 {
            assert!(guard.check_and_record("steward-a", window, 5));
        }
        assert!(!guard.check_and_record("steward-a", window, 5));
    }

    #[test]
    fn keys_are_independent() {
        let guard = ReplayGuard::new();
        let window = Duration::from_secs(60);
        for _ in 0..3 {
            assert!(guard.check_and_record("a", window, 3));
        }
        assert!(!guard.check_and_record("a", window, 3));
        assert!(guard.check_and_record("b", window, 3));
    }

    #[test]
    fn window_slides() {
        let guard = ReplayGuard::new();
        let window = Duration::from_millis(20);
        for _ in 0..3 {
            assert!(guard.check_and_record("a", window, 3));
        }
        assert!(!guard.check_and_record("a", window, 3));
        std::thread::sleep(Duration::from_millis(30));
        // Old entries fell out of the window.
        assert!(guard.check_and_record("a", window, 3));
    }

    #[test]
    fn nonce_single_use() {
        let guard = ReplayGuard::new();
        let nonce = [7u8; 32];
        assert!(guard.consume_nonce(&nonce));
        assert!(!guard.consume_nonce(&nonce));
    }

    #[test]
    fn distinct_nonces_unaffected() {
        let guard = ReplayGuard::new();
        assert!(guard.consume_nonce(&[1u8; 32]));
        assert!(guard.consume_nonce(&[2u8; 32]));
    }

    #[test]
    fn nonce_matches_is_exact() {
        let a = [0xAAu8; 32];
        let mut b = a;
        assert!(ReplayGuard::nonce_matches(&a, &b));
        b[31] ^= 0x01;
        assert!(!ReplayGuard::nonce_matches(&a, &b));
    }

    #[test]
    fn purge_bounds_memory() {
        let guard = ReplayGuard::with_retention(Duration::from_millis(10));
        let window = Duration::from_millis(10);
        for i in 0..50 {
            guard.check_and_record(&format!("key-{i}"), window, 10);
            guard.consume_nonce(&[i as u8; 32]);
        }
        assert_eq!(guard.tracked_keys(), 50);
        std::thread::sleep(Duration::from_millis(20));
        guard.purge_expired(window);
        assert_eq!(guard.tracked_keys(), 0);
    }

    #[test]
    fn nonce_forgotten_after_retention_can_be_reused() {
        // Documented trade-off: retention must exceed the session deadline,
        // which config tests enforce. Within the window, replays always lose.
        let guard = ReplayGuard::with_retention(Duration::from_millis(10));
        let nonce = [9u8; 32];
        assert!(guard.consume_nonce(&nonce));
        std::thread::sleep(Duration::from_millis(20));
        assert!(guard.consume_nonce(&nonce));
    }
}

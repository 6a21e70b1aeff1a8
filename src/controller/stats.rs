//! Connection statistics recorder
//!
//! Thread-safe counters about failed connection attempts. The controller only
//! writes; the owner reads snapshots (for example to publish them as
//! telemetry) and may clear the recent-failure flag. Nothing is reset
//! automatically.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Sentinel for "no failed attempt measured yet"
const NO_MIN: u64 = u64::MAX;

/// Accumulating statistics about failed connection attempts
#[derive(Debug)]
pub struct ConnectionStats {
    retries: AtomicU64,
    errors: AtomicU64,
    attempts: AtomicU64,
    current_ms: AtomicU64,
    min_ms: AtomicU64,
    max_ms: AtomicU64,
    had_recent_failure: AtomicBool,
    last_failure_at: Mutex<Option<DateTime<Utc>>>,
}

impl Default for ConnectionStats {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionStats {
    pub fn new() -> Self {
        Self {
            retries: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            attempts: AtomicU64::new(0),
            current_ms: AtomicU64::new(0),
            min_ms: AtomicU64::new(NO_MIN),
            max_ms: AtomicU64::new(0),
            had_recent_failure: AtomicBool::new(false),
            last_failure_at: Mutex::new(None),
        }
    }

    /// Record one failed attempt that took `duration`
    pub fn record_failed_attempt(&self, duration: Duration) {
        let millis = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);

        self.attempts.fetch_add(1, Ordering::Relaxed);
        self.errors.fetch_add(1, Ordering::Relaxed);
        self.current_ms.store(millis, Ordering::Relaxed);
        self.min_ms.fetch_min(millis, Ordering::Relaxed);
        self.max_ms.fetch_max(millis, Ordering::Relaxed);
        self.had_recent_failure.store(true, Ordering::Relaxed);

        if let Ok(mut last) = self.last_failure_at.lock() {
            *last = Some(Utc::now());
        }
    }

    /// Record an escalation: address rotation or restart
    pub fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn had_recent_failure(&self) -> bool {
        self.had_recent_failure.load(Ordering::Relaxed)
    }

    /// Clear the recent-failure flag once the owner has reported it
    pub fn reset_failure_flag(&self) {
        self.had_recent_failure.store(false, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let min_ms = self.min_ms.load(Ordering::Relaxed);
        StatsSnapshot {
            retries: self.retries.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            attempts: self.attempts.load(Ordering::Relaxed),
            current_ms: self.current_ms.load(Ordering::Relaxed),
            min_ms: (min_ms != NO_MIN).then_some(min_ms),
            max_ms: self.max_ms.load(Ordering::Relaxed),
            had_recent_failure: self.had_recent_failure(),
            last_failure_at: self.last_failure_at.lock().ok().and_then(|last| *last),
        }
    }
}

/// Point-in-time copy of [`ConnectionStats`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsSnapshot {
    /// Escalations (address rotations and restarts)
    pub retries: u64,
    pub errors: u64,
    pub attempts: u64,
    /// Duration of the most recent failed attempt
    pub current_ms: u64,
    /// Shortest failed attempt, `None` before the first failure
    pub min_ms: Option<u64>,
    pub max_ms: u64,
    pub had_recent_failure: bool,
    pub last_failure_at: Option<DateTime<Utc>>,
}

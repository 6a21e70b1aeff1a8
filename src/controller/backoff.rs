//! Staged backoff ladder
//!
//! Maps the number of consecutive failed attempts onto a wait period and a
//! stage label. Three thresholds `T1 < T2 < T3` split the failure count into
//! three rungs, each with its own period:
//!
//! ```text
//! fail_count < T1          -> (P1, stage 1)
//! T1 <= fail_count < T2    -> (P2, stage 2)
//! T2 <= fail_count < T3    -> (P3, stage 3)
//! fail_count >= T3         -> ladder exhausted, (P1, stage 1)
//! ```
//!
//! There is no jitter: the period depends only on the failure count, so the
//! controller can be driven deterministically with a simulated clock. `P1`
//! should not be shorter than the transport's connect timeout.

use serde::Serialize;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Rung of the backoff ladder
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Stage {
    First,
    Second,
    Third,
}

impl Stage {
    /// Stage label as reported in logs and telemetry (1..=3)
    pub fn number(self) -> u8 {
        match self {
            Stage::First => 1,
            Stage::Second => 2,
            Stage::Third => 3,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.number())
    }
}

/// Outcome of [`BackoffLadder::stage_for`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageDecision {
    /// Minimum time between the last failed attempt and the next one
    pub period: Duration,
    pub stage: Stage,
    /// The failure count ran past the top threshold; the caller must reset it
    /// and count a completed cycle
    pub exhausted: bool,
}

/// Invalid ladder parameters
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BackoffError {
    #[error("Thresholds must be non-zero and strictly increasing, got {0:?}")]
    InvalidThresholds([u32; 3]),
    #[error("Backoff period of stage {0} must be greater than zero")]
    ZeroPeriod(u8),
}

/// Three-rung backoff ladder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffLadder {
    thresholds: [u32; 3],
    periods: [Duration; 3],
}

impl Default for BackoffLadder {
    fn default() -> Self {
        Self {
            thresholds: [6, 11, 23],
            periods: [
                Duration::from_secs(5),
                Duration::from_secs(60),
                Duration::from_secs(300),
            ],
        }
    }
}

impl BackoffLadder {
    pub fn new(thresholds: [u32; 3], periods: [Duration; 3]) -> Result<Self, BackoffError> {
        let [t1, t2, t3] = thresholds;
        if t1 == 0 || t1 >= t2 || t2 >= t3 {
            return Err(BackoffError::InvalidThresholds(thresholds));
        }
        if let Some(index) = periods.iter().position(Duration::is_zero) {
            return Err(BackoffError::ZeroPeriod(index as u8 + 1));
        }
        Ok(Self {
            thresholds,
            periods,
        })
    }

    pub fn thresholds(&self) -> [u32; 3] {
        self.thresholds
    }

    pub fn periods(&self) -> [Duration; 3] {
        self.periods
    }

    /// Failed attempts that make up one full cycle of the ladder
    pub fn cycle_length(&self) -> u32 {
        self.thresholds[2]
    }

    /// Wait period and stage for the given number of consecutive failures
    pub fn stage_for(&self, fail_count: u32) -> StageDecision {
        let [t1, t2, t3] = self.thresholds;
        let [p1, p2, p3] = self.periods;
        let (period, stage, exhausted) = if fail_count < t1 {
            (p1, Stage::First, false)
        } else if fail_count < t2 {
            (p2, Stage::Second, false)
        } else if fail_count < t3 {
            (p3, Stage::Third, false)
        } else {
            (p1, Stage::First, true)
        };
        StageDecision {
            period,
            stage,
            exhausted,
        }
    }
}

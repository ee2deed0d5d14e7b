//! Bounded exponential backoff with full jitter for connection retries.
//!
//! When the secured transport cannot be opened, retrying immediately tends
//! to make things worse: a broker recovering from an outage gets hammered
//! by every device at once. The policy here waits a randomized, growing
//! amount of time between attempts and gives up after a configured number
//! of them.
//!
//! # Algorithm
//!
//! Each attempt doubles a ceiling, capped at a maximum, then draws the
//! actual delay uniformly from `0..=ceiling` ("full jitter"):
//!
//! ```text
//! ceiling[n] = min(base * 2^n, cap)
//! delay[n]   = uniform(0, ceiling[n])
//! ```
//!
//! The jitter source is seeded once when the policy is created, never per
//! attempt, so a fleet of devices that lost power together does not march
//! in lockstep through identical retry schedules.
//!
//! # Examples
//!
//! ```ignore
//! let mut policy = RetryPolicy::new(Duration::from_millis(500), Duration::from_secs(5), 5);
//!
//! match policy.next_delay() {
//!     Ok(delay) => tokio::time::sleep(delay).await,
//!     Err(exhausted) => return Err(exhausted.into()),
//! }
//! ```

use std::time::Duration;

use rand::{rngs::StdRng, Rng, SeedableRng};
use thiserror::Error;

/// Returned once the retry budget is spent.
///
/// The field carries the configured attempt limit. The establisher treats
/// this as terminal for the current connect cycle; the supervisor treats it
/// as fatal for the process.
#[derive(Debug, Error)]
#[error("maximum number of connection attempts exceeded: {0}")]
pub struct BackoffError(pub u32);

/// Bounded exponential backoff state for one connect cycle.
///
/// A policy is created fresh for every establisher invocation and owns its
/// attempt counter exclusively; it is never shared or reused across
/// cycles.
#[derive(Debug)]
pub struct RetryPolicy {
    /// Base delay, the ceiling for the very first retry.
    base: Duration,

    /// Hard upper bound on any computed delay.
    cap: Duration,

    /// Total connection attempts allowed before [`BackoffError`].
    max_attempts: u32,

    /// Delay computations performed so far.
    attempt: u32,

    /// Jitter source, seeded once from OS entropy at construction.
    rng: StdRng,
}

impl RetryPolicy {
    /// Creates a policy with the given base delay, cap, and attempt limit.
    pub fn new(base: Duration, cap: Duration, max_attempts: u32) -> Self {
        Self {
            base,
            cap,
            max_attempts,
            attempt: 0,
            rng: StdRng::from_entropy(),
        }
    }

    /// Computes the next retry delay, or reports exhaustion.
    ///
    /// Every call counts as one delay computation. The final allowed
    /// computation (`max_attempts`-th) yields `Err`, so a cycle of
    /// `max_attempts` consecutive failures sleeps `max_attempts - 1` times
    /// and then gives up.
    pub fn next_delay(&mut self) -> Result<Duration, BackoffError> {
        self.attempt += 1;
        if self.attempt >= self.max_attempts {
            return Err(BackoffError(self.max_attempts));
        }

        // Ceiling doubles per attempt; the shift is clamped so the
        // multiplication cannot overflow long before the cap applies.
        let exponent = (self.attempt - 1).min(32);
        let base_ms = self.base.as_millis() as u64;
        let cap_ms = self.cap.as_millis() as u64;
        let ceiling = base_ms.saturating_mul(1u64 << exponent).min(cap_ms);

        let jittered = self.rng.gen_range(0..=ceiling);
        Ok(Duration::from_millis(jittered))
    }

    /// Number of delay computations performed so far.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// The configured attempt limit.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// The configured delay cap.
    pub fn cap(&self) -> Duration {
        self.cap
    }

    /// Resets the attempt counter, keeping the timing parameters.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(
            Duration::from_millis(500),
            Duration::from_millis(5000),
            max_attempts,
        )
    }

    #[test]
    fn delays_never_exceed_cap() {
        let mut p = policy(20);
        for _ in 0..19 {
            let delay = p.next_delay().expect("within budget");
            assert!(delay <= p.cap());
        }
    }

    #[test]
    fn exhausts_on_final_computation() {
        let mut p = policy(5);
        for _ in 0..4 {
            assert!(p.next_delay().is_ok());
        }
        let err = p.next_delay().expect_err("budget spent");
        assert_eq!(err.0, 5);
        assert_eq!(p.attempt(), 5);

        // Never recovers without a reset.
        assert!(p.next_delay().is_err());
    }

    #[test]
    fn single_attempt_budget_never_retries() {
        let mut p = policy(1);
        assert!(p.next_delay().is_err());
    }

    #[test]
    fn reset_restores_the_budget() {
        let mut p = policy(2);
        assert!(p.next_delay().is_ok());
        assert!(p.next_delay().is_err());

        p.reset();
        assert_eq!(p.attempt(), 0);
        assert!(p.next_delay().is_ok());
    }

    #[test]
    fn early_ceilings_follow_the_base() {
        // First computation draws from 0..=base regardless of the cap.
        let mut p = RetryPolicy::new(
            Duration::from_millis(100),
            Duration::from_secs(60),
            10,
        );
        let first = p.next_delay().unwrap();
        assert!(first <= Duration::from_millis(100));
    }

    #[test]
    fn huge_attempt_counts_do_not_overflow() {
        let mut p = RetryPolicy::new(
            Duration::from_millis(500),
            Duration::from_millis(5000),
            200,
        );
        for _ in 0..199 {
            let delay = p.next_delay().unwrap();
            assert!(delay <= Duration::from_millis(5000));
        }
    }
}

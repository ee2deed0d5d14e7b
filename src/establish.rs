//! Connection establishment with bounded backoff retry.
//!
//! [`establish`] is the only place transport failures are handled: it
//! keeps opening the secured transport until it succeeds or the retry
//! budget runs out. Transient faults never escape this loop; exhaustion
//! does, as a fatal error, because a device that cannot reach its broker
//! after the full budget has nothing sensible left to do.
//!
//! Each invocation owns a fresh [`RetryPolicy`], so a reconnect cycle
//! always starts with a full budget regardless of how many attempts the
//! previous cycle consumed.

use tracing::{error, info, warn};

use crate::backoff::RetryPolicy;
use crate::config::BackoffConfig;
use crate::error::KernelError;
use crate::transport::TransportConnector;

use std::time::Duration;

/// Opens the secured transport, retrying transient failures under the
/// configured backoff.
///
/// Returns the connected link on success; ownership passes to the caller,
/// which tears it down when the session ends. The backoff delay inside
/// this loop is the system's only voluntary suspension point before a
/// connection exists.
pub async fn establish<C: TransportConnector>(
    connector: &mut C,
    backoff: &BackoffConfig,
) -> Result<C::Link, KernelError> {
    let mut policy = RetryPolicy::new(
        Duration::from_millis(backoff.base_ms),
        Duration::from_millis(backoff.max_delay_ms),
        backoff.max_attempts,
    );

    loop {
        match connector.open().await {
            Ok(link) => {
                info!(attempt = policy.attempt() + 1, "secured transport established");
                return Ok(link);
            }
            Err(cause) => match policy.next_delay() {
                Ok(delay) => {
                    warn!(
                        error = %cause,
                        delay_ms = delay.as_millis() as u64,
                        attempt = policy.attempt(),
                        "transport open failed, retrying after backoff"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(exhausted) => {
                    error!(
                        error = %cause,
                        attempts = policy.max_attempts(),
                        "transport open failed, all attempts exhausted"
                    );
                    return Err(KernelError::RetriesExhausted(exhausted));
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::TransportError;
    use std::io;
    use tokio::time::Instant;

    /// Connector that fails a scripted number of times before succeeding.
    struct ScriptedConnector {
        failures_remaining: u32,
        opens: u32,
    }

    impl ScriptedConnector {
        fn failing(times: u32) -> Self {
            Self {
                failures_remaining: times,
                opens: 0,
            }
        }
    }

    impl TransportConnector for ScriptedConnector {
        type Link = ();

        async fn open(&mut self) -> Result<(), TransportError> {
            self.opens += 1;
            if self.failures_remaining > 0 {
                self.failures_remaining -= 1;
                return Err(TransportError::Io(io::Error::new(
                    io::ErrorKind::ConnectionRefused,
                    "connection refused",
                )));
            }
            Ok(())
        }

        async fn close(&mut self, _link: ()) {}
    }

    fn backoff(max_attempts: u32) -> BackoffConfig {
        BackoffConfig {
            base_ms: 500,
            max_delay_ms: 5000,
            max_attempts,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_first_try_without_delay() {
        let mut connector = ScriptedConnector::failing(0);
        let started = Instant::now();

        establish(&mut connector, &backoff(5)).await.unwrap();

        assert_eq!(connector.opens, 1);
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_through_transient_failures() {
        let mut connector = ScriptedConnector::failing(3);

        establish(&mut connector, &backoff(5)).await.unwrap();

        // Three failures, three backoff delays, success on the fourth open.
        assert_eq!(connector.opens, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn total_wait_stays_under_the_cap_budget() {
        let mut connector = ScriptedConnector::failing(3);
        let cfg = backoff(5);
        let started = Instant::now();

        establish(&mut connector, &cfg).await.unwrap();

        let worst_case = Duration::from_millis(cfg.max_delay_ms) * 3;
        assert!(started.elapsed() <= worst_case);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausts_after_the_configured_attempts() {
        let mut connector = ScriptedConnector::failing(u32::MAX);

        let err = establish(&mut connector, &backoff(5)).await.expect_err("never reachable");

        assert!(matches!(err, KernelError::RetriesExhausted(_)));
        assert!(err.is_fatal());
        // Five failed opens produce five delay computations; the fifth
        // reports exhaustion, so no sixth open happens.
        assert_eq!(connector.opens, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn each_invocation_starts_with_a_fresh_budget() {
        let cfg = backoff(3);

        let mut connector = ScriptedConnector::failing(2);
        establish(&mut connector, &cfg).await.unwrap();
        assert_eq!(connector.opens, 3);

        // Same connector, new cycle: the budget is not carried over.
        connector.failures_remaining = 2;
        establish(&mut connector, &cfg).await.unwrap();
        assert_eq!(connector.opens, 6);
    }
}

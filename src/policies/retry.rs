//! # Bounded retry driver for control-plane calls.
//!
//! [`RetryPolicy`] pairs a [`BackoffPolicy`] curve with a ceiling on total
//! elapsed time. Call sites pass the policy explicitly; there is no ambient
//! retry decoration anywhere in the crate.
//!
//! ## Semantics
//! ```text
//! run(op):
//!   loop {
//!     op() ── Ok  ──► return Ok
//!          └─ Err ──► delay = backoff.next(attempt)
//!                     elapsed + delay > max_elapsed ─► return last Err
//!                     sleep(delay), attempt += 1, continue
//!   }
//! ```
//!
//! The first attempt always runs; the ceiling bounds how long the call site
//! may keep retrying afterwards, never how long a single attempt may take.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

use crate::policies::BackoffPolicy;

/// Retry budget for one retryable call site.
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    /// Delay curve between attempts.
    pub backoff: BackoffPolicy,
    /// Ceiling on total elapsed time across all attempts and sleeps.
    pub max_elapsed: Duration,
}

impl Default for RetryPolicy {
    /// Returns the budget used for scale-in-protection calls:
    /// exponential 1s..10s delays under a 30s total ceiling.
    fn default() -> Self {
        Self {
            backoff: BackoffPolicy::default(),
            max_elapsed: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Runs `op` until it succeeds or the elapsed ceiling is reached.
    ///
    /// Returns the last error once sleeping again would cross
    /// [`RetryPolicy::max_elapsed`]. Each failure is left to the caller to
    /// log; this driver stays silent.
    pub async fn run<T, E, F, Fut>(&self, mut op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let started = Instant::now();
        let mut attempt: u32 = 0;

        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    let delay = self.backoff.next(attempt);
                    attempt += 1;
                    if started.elapsed() + delay > self.max_elapsed {
                        return Err(err);
                    }
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policies::JitterPolicy;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn quick_policy() -> RetryPolicy {
        RetryPolicy {
            backoff: BackoffPolicy {
                first: Duration::from_millis(10),
                max: Duration::from_millis(100),
                factor: 2.0,
                jitter: JitterPolicy::None,
            },
            max_elapsed: Duration::from_secs(1),
        }
    }

    #[tokio::test]
    async fn success_passes_through() {
        let calls = AtomicU32::new(0);
        let res: Result<u32, &str> = quick_policy()
            .run(|| {
                calls.fetch_add(1, Ordering::Relaxed);
                async { Ok(7) }
            })
            .await;
        assert_eq!(res.unwrap(), 7);
        assert_eq!(calls.load(Ordering::Relaxed), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_are_retried() {
        let calls = AtomicU32::new(0);
        let res: Result<&str, &str> = quick_policy()
            .run(|| {
                let n = calls.fetch_add(1, Ordering::Relaxed);
                async move {
                    if n < 2 {
                        Err("rejected")
                    } else {
                        Ok("applied")
                    }
                }
            })
            .await;
        assert_eq!(res.unwrap(), "applied");
        assert_eq!(calls.load(Ordering::Relaxed), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn elapsed_ceiling_returns_last_error() {
        let policy = RetryPolicy {
            backoff: BackoffPolicy {
                first: Duration::from_secs(1),
                max: Duration::from_secs(10),
                factor: 2.0,
                jitter: JitterPolicy::None,
            },
            max_elapsed: Duration::from_secs(30),
        };

        let started = Instant::now();
        let res: Result<(), String> = policy
            .run(|| async { Err("still transitioning".to_string()) })
            .await;

        assert_eq!(res.unwrap_err(), "still transitioning");
        // Total retry time never crosses the configured ceiling.
        assert!(started.elapsed() <= Duration::from_secs(30));
    }
}

//! # Retrying Transport
//!
//! Runs outbound requests through the rate limiter and retries the ones
//! that failed for transient reasons.
//!
//! ## Attempt Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    execute(label, request_fn)                           │
//! │                                                                         │
//! │   ┌──────────────┐    ┌─────────────┐                                  │
//! │   │ RateLimiter  │───►│ request_fn()│                                  │
//! │   │ (token)      │    └──────┬──────┘                                  │
//! │   └──────────────┘           │                                          │
//! │          ▲          ┌────────┼─────────────────┐                        │
//! │          │          ▼        ▼                 ▼                        │
//! │          │        Ok(T)   fatal error     retryable error               │
//! │          │        return  return now      (conn / timeout / 5xx)        │
//! │          │                                     │                        │
//! │          │                     attempts left?  ├── no ─► RetriesExhausted
//! │          │                                     │                        │
//! │          └──────── sleep(backoff) ◄──── yes ───┘                        │
//! │                                                                         │
//! │  BACKOFF STRATEGY (Exponential with Jitter)                            │
//! │  ───────────────────────────────────────────                           │
//! │  Before attempt 2: base_delay      (± jitter)                          │
//! │  Before attempt 3: base_delay * 2  (± jitter)                          │
//! │  Before attempt 4: base_delay * 4  (± jitter)                          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{SyncError, SyncResult};
use crate::limiter::RateLimiter;

// =============================================================================
// Retry Policy
// =============================================================================

/// How many times to try a request and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, first one included. Zero is treated as one.
    pub max_retries: u32,

    /// Wait before the second attempt; doubles for each later one.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    fn attempts(&self) -> u32 {
        self.max_retries.max(1)
    }

    /// Creates the exponential backoff schedule for one request.
    fn backoff(&self) -> ExponentialBackoff {
        let mut backoff = ExponentialBackoff {
            initial_interval: self.base_delay,
            randomization_factor: 0.25,
            multiplier: 2.0,
            max_interval: self.base_delay * 2u32.saturating_pow(self.attempts()),
            max_elapsed_time: None,
            ..Default::default()
        };
        backoff.reset();
        backoff
    }
}

// =============================================================================
// Retrying Transport
// =============================================================================

/// Rate-limited, retrying executor for catalog requests.
///
/// ## Usage
/// ```rust,ignore
/// let transport = RetryingTransport::new(limiter, RetryPolicy::default());
///
/// let page = transport
///     .execute("fetch_records", || api.fetch_records(&token, "BankX_2024.csv", 1, 500))
///     .await?;
/// ```
#[derive(Debug, Clone)]
pub struct RetryingTransport {
    limiter: RateLimiter,
    policy: RetryPolicy,
}

impl RetryingTransport {
    pub fn new(limiter: RateLimiter, policy: RetryPolicy) -> Self {
        RetryingTransport { limiter, policy }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Runs `request` until it succeeds, fails fatally, or runs out of
    /// attempts. Every attempt takes a limiter token first.
    pub async fn execute<T, F, Fut>(&self, label: &str, mut request: F) -> SyncResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = SyncResult<T>>,
    {
        let attempts = self.policy.attempts();
        let mut backoff = self.policy.backoff();
        let mut attempt = 0;

        loop {
            attempt += 1;

            let err = match self.limiter.schedule(request()).await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(label, attempt, "Request succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) => err,
            };

            if !err.is_retryable() {
                debug!(label, attempt, error = %err, "Request failed with fatal error");
                return Err(err);
            }

            if attempt >= attempts {
                warn!(label, attempts = attempt, error = %err, "Retries exhausted");
                return Err(SyncError::RetriesExhausted {
                    attempts: attempt,
                    last_error: Box::new(err),
                });
            }

            let delay = backoff.next_backoff().unwrap_or(self.policy.base_delay);
            warn!(label, attempt, ?delay, error = %err, "Request failed, retrying");
            tokio::time::sleep(delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use tokio::time::Instant;

    fn transport(max_retries: u32) -> RetryingTransport {
        RetryingTransport::new(
            RateLimiter::new(100, Duration::from_millis(10)),
            RetryPolicy {
                max_retries,
                base_delay: Duration::from_millis(100),
            },
        )
    }

    fn server_error() -> SyncError {
        SyncError::Server {
            status: 503,
            message: "unavailable".into(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_transient_errors_then_succeeds() {
        let calls = Arc::new(AtomicU32::new(0));
        let start = Instant::now();

        let result = transport(3)
            .execute("test", || {
                let calls = calls.clone();
                async move {
                    match calls.fetch_add(1, Ordering::SeqCst) {
                        0 => Err(SyncError::Timeout(30)),
                        1 => Err(server_error()),
                        _ => Ok("page"),
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "page");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // 100ms and 200ms waits, each with at most 25% jitter.
        assert!(Instant::now() - start >= Duration::from_millis(225));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_error_is_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));

        let result: SyncResult<()> = transport(3)
            .execute("test", || {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(SyncError::Client {
                        status: 401,
                        message: "expired".into(),
                    })
                }
            })
            .await;

        assert!(matches!(result, Err(SyncError::Client { status: 401, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_reports_attempts_and_cause() {
        let calls = Arc::new(AtomicU32::new(0));

        let result: SyncResult<()> = transport(3)
            .execute("test", || {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(server_error())
                }
            })
            .await;

        match result {
            Err(SyncError::RetriesExhausted {
                attempts,
                last_error,
            }) => {
                assert_eq!(attempts, 3);
                assert!(matches!(*last_error, SyncError::Server { status: 503, .. }));
            }
            other => panic!("expected RetriesExhausted, got {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_every_attempt_passes_through_limiter() {
        let transport = RetryingTransport::new(
            RateLimiter::new(1, Duration::from_secs(1)),
            RetryPolicy {
                max_retries: 2,
                base_delay: Duration::from_millis(1),
            },
        );
        let calls = Arc::new(AtomicU32::new(0));
        let start = Instant::now();

        let _: SyncResult<()> = transport
            .execute("test", || {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(SyncError::Connectivity("refused".into()))
                }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(Instant::now() - start >= Duration::from_secs(1));
    }
}

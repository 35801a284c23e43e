//! # Rate Limiter
//!
//! Token bucket that bounds how fast the engine calls the catalog API.
//!
//! ## Token Bucket
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Token Bucket (capacity C, interval T)                │
//! │                                                                         │
//! │   t=0        t=T        t=2T                                            │
//! │   ●●●●● ───► refill ──► refill       bucket refilled to C each tick    │
//! │                                                                         │
//! │   schedule(op)                                                         │
//! │       │                                                                 │
//! │       ├── token available ──► consume, run op now                      │
//! │       │                                                                 │
//! │       └── bucket empty ─────► wait in FIFO queue for next tick         │
//! │                                                                         │
//! │  The queue is the tokio Mutex wait list: the head waiter sleeps until  │
//! │  the tick while holding the lock, so later callers cannot overtake it. │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::trace;

#[derive(Debug)]
struct Bucket {
    tokens: u32,
    last_refill: Instant,
}

/// Shared token bucket. Clones draw from the same bucket.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    bucket: Arc<Mutex<Bucket>>,
    capacity: u32,
    refill_interval: Duration,
}

impl RateLimiter {
    /// Creates a full bucket. Zero capacity or interval is raised to the
    /// smallest usable value.
    pub fn new(capacity: u32, refill_interval: Duration) -> Self {
        let capacity = capacity.max(1);
        RateLimiter {
            bucket: Arc::new(Mutex::new(Bucket {
                tokens: capacity,
                last_refill: Instant::now(),
            })),
            capacity,
            refill_interval: refill_interval.max(Duration::from_millis(1)),
        }
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn refill_interval(&self) -> Duration {
        self.refill_interval
    }

    /// Waits for a token and consumes it.
    pub async fn acquire(&self) {
        let mut bucket = self.bucket.lock().await;
        self.refill(&mut bucket);

        if bucket.tokens == 0 {
            let next_tick = bucket.last_refill + self.refill_interval;
            let wait = next_tick.saturating_duration_since(Instant::now());
            trace!(wait_ms = wait.as_millis() as u64, "Rate limited");
            tokio::time::sleep_until(next_tick).await;
            self.refill(&mut bucket);
        }

        bucket.tokens = bucket.tokens.saturating_sub(1);
    }

    /// Runs `operation` once a token is available.
    pub async fn schedule<F, T>(&self, operation: F) -> T
    where
        F: Future<Output = T>,
    {
        self.acquire().await;
        operation.await
    }

    /// Refills to capacity if at least one tick has passed, keeping the
    /// tick grid aligned to the original start.
    fn refill(&self, bucket: &mut Bucket) {
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(bucket.last_refill);
        if elapsed < self.refill_interval {
            return;
        }

        let interval_nanos = self.refill_interval.as_nanos();
        let into_tick = (elapsed.as_nanos() % interval_nanos) as u64;
        bucket.last_refill = now - Duration::from_nanos(into_tick);
        bucket.tokens = self.capacity;
    }
}

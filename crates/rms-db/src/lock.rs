//! # Single-Writer Lock
//!
//! Every write to the local store funnels through one [`WriteLock`].
//!
//! ## Write Serialization
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Write Lock Queue (FIFO)                            │
//! │                                                                         │
//! │  Manual sync (UI) ────┐                                                │
//! │                       ├──► WriteLock ──► one transaction at a time     │
//! │  Background timer ────┘        │                                        │
//! │                                ▼                                        │
//! │     acquire ─► BEGIN ─► statements ─► COMMIT ─► release ─► next writer │
//! │                                                                         │
//! │  Reads skip the lock: they may interleave between writes but are not   │
//! │  snapshot-isolated from a writer that is mid-way through a pass.       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The lock is owned by [`crate::Database`] and cloned into every repository,
//! so all handles created from one database share the same queue.

use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::trace;

/// Shared FIFO lock serializing store writes.
#[derive(Debug, Clone, Default)]
pub struct WriteLock {
    inner: Arc<Mutex<()>>,
}

impl WriteLock {
    /// Creates a new, unlocked write lock.
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for exclusive write access.
    ///
    /// `tokio::sync::Mutex` hands the lock to waiters in the order they
    /// queued, so concurrent writers proceed strictly FIFO.
    pub async fn acquire(&self, operation: &'static str) -> WriteGuard {
        let queued_at = Instant::now();
        let guard = self.inner.clone().lock_owned().await;
        trace!(
            operation,
            waited_ms = queued_at.elapsed().as_millis() as u64,
            "Write lock acquired"
        );
        WriteGuard {
            _guard: guard,
            operation,
            acquired_at: Instant::now(),
        }
    }

    /// Returns true if a writer currently holds the lock.
    pub fn is_locked(&self) -> bool {
        self.inner.try_lock().is_err()
    }
}

/// Releases the write lock when dropped.
#[derive(Debug)]
pub struct WriteGuard {
    _guard: OwnedMutexGuard<()>,
    operation: &'static str,
    acquired_at: Instant,
}

impl Drop for WriteGuard {
    fn drop(&mut self) {
        trace!(
            operation = self.operation,
            held_ms = self.acquired_at.elapsed().as_millis() as u64,
            "Write lock released"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_writers_are_serialized_in_order() {
        let lock = WriteLock::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        let first = lock.acquire("first").await;

        let mut handles = Vec::new();
        for i in 0..3 {
            let lock = lock.clone();
            let log = log.clone();
            handles.push(tokio::spawn(async move {
                let _guard = lock.acquire("queued").await;
                log.lock().await.push(i);
            }));
            // Let each task reach the queue before spawning the next.
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert!(lock.is_locked());
        assert!(log.lock().await.is_empty());
        drop(first);

        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(*log.lock().await, vec![0, 1, 2]);
        assert!(!lock.is_locked());
    }
}

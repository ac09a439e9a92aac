//! Bounded fire-and-forget job execution for invalidation deletions.
//!
//! Submission never blocks the caller: jobs are spawned immediately and
//! wait for one of a fixed number of permits before running, so at most
//! `limit` jobs execute concurrently while the rest queue. The invalidation
//! listener stays responsive even when local deletions are slow; the cost
//! is that jobs submitted back-to-back may complete out of order, which
//! idempotent deletions tolerate.
//!
//! Job errors are reported to the monitor sink, never to the submitter;
//! nobody is waiting on background invalidation.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;

use octocache_core::{CacheError, Result};

use crate::Monitor;

/// Bounded concurrent worker pool.
pub struct Dispatcher {
    permits: Arc<Semaphore>,
    monitor: Monitor,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("permits", &self.permits)
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    /// Create a dispatcher running at most `limit` jobs concurrently.
    pub fn new(limit: usize, monitor: Monitor) -> Result<Self> {
        if limit == 0 {
            return Err(CacheError::configuration(
                "dispatcher limit must be greater than zero",
            ));
        }
        Ok(Self {
            permits: Arc::new(Semaphore::new(limit)),
            monitor,
        })
    }

    /// Submit a job without waiting for capacity or completion.
    pub fn submit_async<F>(&self, job: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let permits = Arc::clone(&self.permits);
        let monitor = Arc::clone(&self.monitor);
        tokio::spawn(async move {
            // The semaphore is never closed, so acquisition only ends with
            // a permit.
            let Ok(_permit) = permits.acquire_owned().await else {
                return;
            };
            if let Err(err) = job.await {
                monitor(err);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn null_monitor() -> Monitor {
        Arc::new(|_err| {})
    }

    #[test]
    fn test_zero_limit_rejected() {
        let err = Dispatcher::new(0, null_monitor()).unwrap_err();
        assert!(matches!(err, CacheError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let dispatcher = Dispatcher::new(2, null_monitor()).unwrap();
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let done = Arc::new(AtomicUsize::new(0));

        for _ in 0..8 {
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            let done = Arc::clone(&done);
            dispatcher.submit_async(async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                running.fetch_sub(1, Ordering::SeqCst);
                done.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        }

        // Every job runs eventually, never more than two at once.
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while done.load(Ordering::SeqCst) < 8 {
            assert!(tokio::time::Instant::now() < deadline, "jobs did not drain");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_submission_does_not_block() {
        let dispatcher = Dispatcher::new(1, null_monitor()).unwrap();

        // Saturate the single permit with a slow job.
        dispatcher.submit_async(async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(())
        });

        // Further submissions return immediately even with no capacity.
        let before = tokio::time::Instant::now();
        for _ in 0..4 {
            dispatcher.submit_async(async { Ok(()) });
        }
        assert!(before.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_job_errors_reach_the_monitor_only() {
        let seen: Arc<Mutex<Vec<CacheError>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let monitor: Monitor = Arc::new(move |err| sink.lock().push(err));

        let dispatcher = Dispatcher::new(2, monitor).unwrap();
        dispatcher.submit_async(async { Err(CacheError::local("del", "k", "poisoned")) });

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while seen.lock().is_empty() {
            assert!(
                tokio::time::Instant::now() < deadline,
                "monitor never saw the error"
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(seen.lock()[0], CacheError::local("del", "k", "poisoned"));
    }
}

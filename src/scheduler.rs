//! Cancellation and periodic execution.
//!
//! [`CancelToken`] is a cloneable flag built on a `tokio::sync::watch`
//! channel; long-running passes poll it between items. [`Scheduler`]
//! reruns a job on an interval, backing off exponentially after failures,
//! until its token is cancelled.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{info, warn};

#[derive(Clone)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx: Arc::new(tx),
            rx,
        }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once [`cancel`](Self::cancel) has been called on any clone.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        // The sender lives as long as any clone of the token, so this
        // only returns once the flag is set.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }

    /// Cancel this token when the process receives Ctrl-C.
    pub fn cancel_on_ctrl_c(&self) {
        let token = self.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, stopping after the current item");
                token.cancel();
            }
        });
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs a job every `interval` until cancelled.
pub struct Scheduler {
    interval: Duration,
    max_backoff: Duration,
    cancel: CancelToken,
}

impl Scheduler {
    pub fn new(interval: Duration, cancel: CancelToken) -> Self {
        Self {
            interval,
            max_backoff: interval.saturating_mul(8),
            cancel,
        }
    }

    pub fn with_max_backoff(mut self, max_backoff: Duration) -> Self {
        self.max_backoff = max_backoff.max(self.interval);
        self
    }

    /// Run `job` until the token fires. A failed run doubles the wait
    /// before the next one, up to `max_backoff`; a success resets it.
    ///
    /// Returns the number of runs started.
    pub async fn run<F, Fut, E>(&self, mut job: F) -> u64
    where
        F: FnMut(u64) -> Fut,
        Fut: Future<Output = Result<(), E>>,
        E: std::fmt::Display,
    {
        let mut runs = 0u64;
        let mut delay = self.interval;

        while !self.cancel.is_cancelled() {
            runs += 1;
            match job(runs).await {
                Ok(()) => delay = self.interval,
                Err(e) => {
                    delay = (delay.saturating_mul(2)).min(self.max_backoff);
                    warn!(run = runs, error = %e, retry_in = ?delay, "scheduled run failed");
                }
            }

            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        info!(runs, "scheduler stopped");
        runs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[tokio::test]
    async fn test_token_shared_between_clones() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
        // Already cancelled: must resolve immediately.
        tokio::time::timeout(Duration::from_secs(1), clone.cancelled())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_scheduler_stops_on_cancel() {
        let token = CancelToken::new();
        let scheduler = Scheduler::new(Duration::from_millis(5), token.clone());
        let count = Arc::new(AtomicU64::new(0));

        let counter = Arc::clone(&count);
        let stopper = token.clone();
        let runs = scheduler
            .run(move |run| {
                counter.fetch_add(1, Ordering::SeqCst);
                if run == 3 {
                    stopper.cancel();
                }
                async { Ok::<(), String>(()) }
            })
            .await;

        assert_eq!(runs, 3);
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_scheduler_continues_after_failure() {
        let token = CancelToken::new();
        let scheduler = Scheduler::new(Duration::from_millis(1), token.clone())
            .with_max_backoff(Duration::from_millis(4));
        let stopper = token.clone();
        let runs = scheduler
            .run(move |run| {
                if run == 4 {
                    stopper.cancel();
                }
                async move {
                    if run % 2 == 1 {
                        Err("transient".to_string())
                    } else {
                        Ok(())
                    }
                }
            })
            .await;
        assert_eq!(runs, 4);
    }

    #[tokio::test]
    async fn test_cancelled_before_start_runs_nothing() {
        let token = CancelToken::new();
        token.cancel();
        let runs = Scheduler::new(Duration::from_millis(1), token)
            .run(|_| async { Ok::<(), String>(()) })
            .await;
        assert_eq!(runs, 0);
    }
}

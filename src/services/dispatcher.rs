//! Sliding-window rate-limited dispatcher for provider calls
//!
//! Bounds outbound work two ways: no more than `window_max` task starts
//! within any trailing `window`, and no more than `max_concurrent` tasks
//! executing at once regardless of window slack. Admission is FIFO-fair;
//! completion order is whatever concurrency yields.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Semaphore};
use tokio::time::Instant;
use tracing::trace;

/// Safety margin added when sleeping for the oldest window entry to age out,
/// so a wakeup never lands a hair before the entry actually expires.
const WINDOW_MARGIN: Duration = Duration::from_millis(50);

/// Dispatcher tuning values. These mirror what the provider tolerates and
/// are configuration, not invariants.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Trailing window length
    pub window: Duration,
    /// Max task starts within any trailing window
    pub window_max: usize,
    /// Max concurrently executing tasks
    pub max_concurrent: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(10),
            window_max: 38,
            max_concurrent: 10,
        }
    }
}

/// Shared admission state: timestamps of starts within the trailing window
pub struct RateLimitedDispatcher {
    config: DispatcherConfig,
    window: Mutex<VecDeque<Instant>>,
    concurrency: Arc<Semaphore>,
}

impl RateLimitedDispatcher {
    pub fn new(config: DispatcherConfig) -> Self {
        let concurrency = Arc::new(Semaphore::new(config.max_concurrent.max(1)));
        Self {
            config,
            window: Mutex::new(VecDeque::new()),
            concurrency,
        }
    }

    /// Run `task` once both the concurrency cap and the sliding window admit
    /// it. The task's own outcome passes through untouched; one failing task
    /// never blocks other admitted tasks.
    pub async fn schedule<F, T>(&self, task: F) -> T
    where
        F: Future<Output = T>,
    {
        // Concurrency cap first: window slots are only consumed by tasks
        // that can actually start. Both primitives queue waiters FIFO.
        let _permit = self
            .concurrency
            .clone()
            .acquire_owned()
            .await
            .expect("dispatcher semaphore closed");

        self.admit().await;
        task.await
    }

    /// Block until the trailing window has room, then record this start
    async fn admit(&self) {
        loop {
            let wait = {
                let mut window = self.window.lock().await;
                let now = Instant::now();
                Self::prune(&mut window, now, self.config.window);

                if window.len() < self.config.window_max {
                    window.push_back(now);
                    trace!(in_window = window.len(), "Dispatch admitted");
                    return;
                }

                // Window is full; sleep until the oldest entry ages out
                let oldest = *window.front().expect("full window has a front");
                (oldest + self.config.window + WINDOW_MARGIN).saturating_duration_since(now)
            };

            tokio::time::sleep(wait).await;
        }
    }

    fn prune(window: &mut VecDeque<Instant>, now: Instant, length: Duration) {
        while let Some(&oldest) = window.front() {
            if now.saturating_duration_since(oldest) >= length {
                window.pop_front();
            } else {
                break;
            }
        }
    }
}

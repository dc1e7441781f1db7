//! Durable, crash-recoverable work queue
//!
//! Jobs live in a durable store as two ordered lists per queue: `main`
//! (pending) and `in_flight` (delivered but unacknowledged). Consumption
//! moves a payload between the lists in one indivisible step, so a crash can
//! never lose a delivered-but-unprocessed job; `recover()` drains `in_flight`
//! back to the head of `main` at startup. Delivery is at-least-once —
//! downstream processing must be idempotent.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Which of the two per-queue lists an operation targets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueList {
    Main,
    InFlight,
}

/// Storage primitives the queue needs. Any backend offering these atomically
/// (a relational table, a list-based store, a broker) satisfies the contract.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Append a payload to the tail of the main list
    async fn push_tail(&self, queue: &str, payload: &str) -> Result<()>;

    /// Atomically pop the head of the main list and push it onto the tail of
    /// the in-flight list, waiting up to `timeout` for a payload to appear.
    /// Returns None on empty/timeout. This is the core correctness
    /// primitive: there is no observable state between pop and push.
    async fn move_head_to_inflight(&self, queue: &str, timeout: Duration)
        -> Result<Option<String>>;

    /// Atomically move the tail of the in-flight list back to the head of
    /// the main list (startup recovery). Returns the moved payload.
    async fn move_inflight_back(&self, queue: &str) -> Result<Option<String>>;

    /// Remove the first occurrence of `payload` from a list; false if absent
    async fn remove_first(&self, queue: &str, list: QueueList, payload: &str) -> Result<bool>;

    /// Current length of a list
    async fn len(&self, queue: &str, list: QueueList) -> Result<usize>;
}

/// Durable payload envelope carrying the retry counter
#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    retries: u32,
    job: serde_json::Value,
}

/// Outcome of processing one job, mapped from the error taxonomy
#[derive(Debug)]
pub enum JobOutcome {
    /// Processed; remove from in-flight
    Done,
    /// Transient failure; re-enqueue with backoff until the retry ceiling
    Retry(String),
    /// Terminal for this job (not found, target gone); acked, never retried
    Discard(String),
}

/// Processes the inner job value of one queue payload
#[async_trait]
pub trait JobProcessor: Send + Sync {
    async fn process(&self, job: serde_json::Value) -> JobOutcome;
}

/// Queue tuning values
#[derive(Debug, Clone)]
pub struct JobQueueConfig {
    /// Queue name, shared by all processes consuming the same store
    pub name: String,
    /// Max retries before a job is dropped
    pub max_retries: u32,
    /// Base delay for exponential retry backoff
    pub retry_base: Duration,
    /// Worker pool size
    pub workers: usize,
    /// Bounded wait for one consume attempt
    pub consume_timeout: Duration,
    /// Max items moved back per `recover()` run; prevents unbounded startup
    /// loops on a pathologically large in-flight backlog
    pub recover_cap: usize,
}

impl Default for JobQueueConfig {
    fn default() -> Self {
        Self {
            name: "metadata_fetch".to_string(),
            max_retries: 5,
            retry_base: Duration::from_secs(5),
            workers: 4,
            consume_timeout: Duration::from_secs(5),
            recover_cap: 10_000,
        }
    }
}

/// Durable work queue over a [`QueueStore`]
pub struct JobQueue {
    store: Arc<dyn QueueStore>,
    config: JobQueueConfig,
}

impl JobQueue {
    pub fn new(store: Arc<dyn QueueStore>, config: JobQueueConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &JobQueueConfig {
        &self.config
    }

    /// Pure backoff schedule: `base × 2^(retries-1)` for the nth retry
    pub fn retry_delay(base: Duration, retries: u32) -> Duration {
        base * 2u32.saturating_pow(retries.saturating_sub(1))
    }

    /// Append a job to the tail of the queue with a fresh retry counter
    pub async fn enqueue<T: Serialize>(&self, job: &T) -> Result<()> {
        let envelope = Envelope {
            retries: 0,
            job: serde_json::to_value(job).context("Failed to serialize job payload")?,
        };
        let payload = serde_json::to_string(&envelope)?;
        self.store.push_tail(&self.config.name, &payload).await?;
        debug!(queue = %self.config.name, "Job enqueued");
        Ok(())
    }

    /// Pop one payload into the in-flight list, bounded wait
    pub async fn consume(&self) -> Result<Option<String>> {
        self.store
            .move_head_to_inflight(&self.config.name, self.config.consume_timeout)
            .await
    }

    /// Remove a processed payload from the in-flight list
    pub async fn ack(&self, payload: &str) -> Result<()> {
        let removed = self
            .store
            .remove_first(&self.config.name, QueueList::InFlight, payload)
            .await?;
        if !removed {
            // Another worker's recovery may have raced us; the downstream
            // write is idempotent either way
            warn!(queue = %self.config.name, "Acked payload was no longer in-flight");
        }
        Ok(())
    }

    /// Handle a transient failure: re-enqueue with an incremented retry
    /// counter after a backoff delay, or drop once the ceiling is hit.
    ///
    /// The failed payload stays in the durable in-flight list for the whole
    /// backoff; it is only removed after the delayed replacement has been
    /// durably queued. A crash during the delay therefore re-delivers the
    /// job through `recover()` instead of losing the retry. If the crash
    /// lands between the push and the removal, the job is delivered twice —
    /// at-least-once, as documented.
    pub async fn fail(&self, payload: &str) -> Result<()> {
        let envelope: Envelope = match serde_json::from_str(payload) {
            Ok(env) => env,
            Err(e) => {
                error!(queue = %self.config.name, error = %e, payload = %payload, "Dropping unparseable queue payload");
                self.store
                    .remove_first(&self.config.name, QueueList::InFlight, payload)
                    .await?;
                return Ok(());
            }
        };

        if envelope.retries >= self.config.max_retries {
            error!(
                queue = %self.config.name,
                retries = envelope.retries,
                payload = %payload,
                "Job exceeded retry ceiling, dropping permanently"
            );
            self.store
                .remove_first(&self.config.name, QueueList::InFlight, payload)
                .await?;
            return Ok(());
        }

        let retries = envelope.retries + 1;
        let delay = Self::retry_delay(self.config.retry_base, retries);
        let requeued = serde_json::to_string(&Envelope { retries, job: envelope.job })?;

        info!(
            queue = %self.config.name,
            retries = retries,
            delay_ms = delay.as_millis() as u64,
            "Job failed, scheduling retry"
        );

        let store = self.store.clone();
        let queue = self.config.name.clone();
        let failed = payload.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            match store.push_tail(&queue, &requeued).await {
                Ok(()) => {
                    if let Err(e) =
                        store.remove_first(&queue, QueueList::InFlight, &failed).await
                    {
                        warn!(queue = %queue, error = %e, "Failed to clear retried payload from in-flight");
                    }
                }
                Err(e) => {
                    // Payload is still in-flight; recovery will re-deliver it
                    error!(queue = %queue, error = %e, "Failed to re-enqueue job after backoff");
                }
            }
        });

        Ok(())
    }

    /// Startup recovery: drain delivered-but-unacknowledged payloads back to
    /// the head of the main list so they are re-delivered first
    pub async fn recover(&self) -> Result<usize> {
        let mut moved = 0usize;
        while moved < self.config.recover_cap {
            match self.store.move_inflight_back(&self.config.name).await? {
                Some(_) => moved += 1,
                None => break,
            }
        }
        if moved > 0 {
            info!(queue = %self.config.name, recovered = moved, "Recovered in-flight jobs");
        }
        Ok(moved)
    }

    /// Consume and process one payload. Returns false when the bounded wait
    /// expired with nothing to do.
    pub async fn handle_one(&self, processor: &dyn JobProcessor) -> Result<bool> {
        let Some(payload) = self.consume().await? else {
            return Ok(false);
        };

        let envelope: Envelope = match serde_json::from_str(&payload) {
            Err(e) => {
                // No way to retry a payload that cannot be parsed
                error!(queue = %self.config.name, error = %e, "Removing corrupt payload from in-flight");
                self.store
                    .remove_first(&self.config.name, QueueList::InFlight, &payload)
                    .await?;
                return Ok(true);
            }
            Ok(env) => env,
        };

        match processor.process(envelope.job).await {
            JobOutcome::Done => self.ack(&payload).await?,
            JobOutcome::Discard(reason) => {
                info!(queue = %self.config.name, reason = %reason, "Job discarded without retry");
                self.ack(&payload).await?;
            }
            JobOutcome::Retry(reason) => {
                warn!(queue = %self.config.name, reason = %reason, "Job failed transiently");
                self.fail(&payload).await?;
            }
        }
        Ok(true)
    }

    /// Spawn the fixed worker pool, each looping consume → process →
    /// ack/fail until its handle is aborted
    pub fn start_workers(
        self: &Arc<Self>,
        processor: Arc<dyn JobProcessor>,
    ) -> Vec<JoinHandle<()>> {
        (0..self.config.workers.max(1))
            .map(|worker| {
                let queue = self.clone();
                let processor = processor.clone();
                tokio::spawn(async move {
                    debug!(queue = %queue.config.name, worker = worker, "Queue worker started");
                    loop {
                        if let Err(e) = queue.handle_one(processor.as_ref()).await {
                            error!(queue = %queue.config.name, worker = worker, error = %e, "Queue worker iteration failed");
                            tokio::time::sleep(Duration::from_secs(1)).await;
                        }
                    }
                })
            })
            .collect()
    }

    pub async fn pending(&self) -> Result<usize> {
        self.store.len(&self.config.name, QueueList::Main).await
    }

    pub async fn in_flight(&self) -> Result<usize> {
        self.store.len(&self.config.name, QueueList::InFlight).await
    }
}

/// Decode the inner job value of an envelope payload (for processors that
/// deserialize into a typed job)
pub fn decode_job<T: DeserializeOwned>(job: serde_json::Value) -> Result<T> {
    serde_json::from_value(job).context("Failed to decode job payload")
}

/// In-memory [`QueueStore`]: same list semantics, process-local durability.
/// Used by tests and available for single-process deployments.
#[derive(Default)]
pub struct MemoryQueueStore {
    lists: parking_lot::Mutex<HashMap<String, MemoryLists>>,
    notify: Notify,
}

#[derive(Default)]
struct MemoryLists {
    main: VecDeque<String>,
    in_flight: VecDeque<String>,
}

impl MemoryQueueStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_lists<T>(&self, queue: &str, f: impl FnOnce(&mut MemoryLists) -> T) -> T {
        let mut lists = self.lists.lock();
        f(lists.entry(queue.to_string()).or_default())
    }
}

#[async_trait]
impl QueueStore for MemoryQueueStore {
    async fn push_tail(&self, queue: &str, payload: &str) -> Result<()> {
        self.with_lists(queue, |l| l.main.push_back(payload.to_string()));
        self.notify.notify_waiters();
        Ok(())
    }

    async fn move_head_to_inflight(
        &self,
        queue: &str,
        timeout: Duration,
    ) -> Result<Option<String>> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            // Pop and push happen under one lock acquisition
            let moved = self.with_lists(queue, |l| {
                let payload = l.main.pop_front()?;
                l.in_flight.push_back(payload.clone());
                Some(payload)
            });
            if moved.is_some() {
                return Ok(moved);
            }

            tokio::select! {
                _ = self.notify.notified() => {}
                _ = tokio::time::sleep_until(deadline) => return Ok(None),
            }
        }
    }

    async fn move_inflight_back(&self, queue: &str) -> Result<Option<String>> {
        Ok(self.with_lists(queue, |l| {
            let payload = l.in_flight.pop_back()?;
            l.main.push_front(payload.clone());
            Some(payload)
        }))
    }

    async fn remove_first(&self, queue: &str, list: QueueList, payload: &str) -> Result<bool> {
        Ok(self.with_lists(queue, |l| {
            let target = match list {
                QueueList::Main => &mut l.main,
                QueueList::InFlight => &mut l.in_flight,
            };
            match target.iter().position(|p| p == payload) {
                Some(index) => {
                    target.remove(index);
                    true
                }
                None => false,
            }
        }))
    }

    async fn len(&self, queue: &str, list: QueueList) -> Result<usize> {
        Ok(self.with_lists(queue, |l| match list {
            QueueList::Main => l.main.len(),
            QueueList::InFlight => l.in_flight.len(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn test_queue(max_retries: u32) -> (Arc<MemoryQueueStore>, JobQueue) {
        let store = Arc::new(MemoryQueueStore::new());
        let queue = JobQueue::new(
            store.clone(),
            JobQueueConfig {
                name: "test".to_string(),
                max_retries,
                retry_base: Duration::from_millis(10),
                workers: 1,
                consume_timeout: Duration::from_millis(50),
                recover_cap: 100,
            },
        );
        (store, queue)
    }

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct TestJob {
        id: u32,
    }

    struct AlwaysRetry;

    #[async_trait]
    impl JobProcessor for AlwaysRetry {
        async fn process(&self, _job: serde_json::Value) -> JobOutcome {
            JobOutcome::Retry("simulated transient failure".to_string())
        }
    }

    struct CountingDone(AtomicU32);

    #[async_trait]
    impl JobProcessor for CountingDone {
        async fn process(&self, _job: serde_json::Value) -> JobOutcome {
            self.0.fetch_add(1, Ordering::SeqCst);
            JobOutcome::Done
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_crash_before_ack_recovers_exactly_once() {
        let (_, queue) = test_queue(5);
        queue.enqueue(&TestJob { id: 1 }).await.unwrap();

        // Deliver, then "crash": the payload stays in-flight, never acked
        let delivered = queue.consume().await.unwrap().expect("payload");
        assert_eq!(queue.pending().await.unwrap(), 0);
        assert_eq!(queue.in_flight().await.unwrap(), 1);

        let recovered = queue.recover().await.unwrap();
        assert_eq!(recovered, 1);
        assert_eq!(queue.pending().await.unwrap(), 1);
        assert_eq!(queue.in_flight().await.unwrap(), 0);

        // Exactly once: the same payload, no duplicate
        let redelivered = queue.consume().await.unwrap().expect("payload again");
        assert_eq!(redelivered, delivered);
        assert_eq!(queue.pending().await.unwrap(), 0);
        queue.ack(&redelivered).await.unwrap();
        assert_eq!(queue.in_flight().await.unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_ceiling_drops_job() {
        let (_, queue) = test_queue(2);
        let queue = Arc::new(queue);
        queue.enqueue(&TestJob { id: 7 }).await.unwrap();

        let processor = AlwaysRetry;
        // Initial delivery plus two retries, then the drop
        for _ in 0..3 {
            // Backoff re-enqueue is a spawned sleep; paused clock advances it
            while !queue.handle_one(&processor).await.unwrap() {}
        }

        // Nothing left anywhere: the job was dropped, not re-enqueued
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(queue.pending().await.unwrap(), 0);
        assert_eq!(queue.in_flight().await.unwrap(), 0);
        assert!(queue.consume().await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_survives_crash_during_backoff() {
        let (_, queue) = test_queue(5);
        queue.enqueue(&TestJob { id: 9 }).await.unwrap();

        let delivered = queue.consume().await.unwrap().expect("payload");
        queue.fail(&delivered).await.unwrap();

        // The backoff has not elapsed; a crash now must not lose the retry.
        // The failed payload is still durably in-flight...
        assert_eq!(queue.pending().await.unwrap(), 0);
        assert_eq!(queue.in_flight().await.unwrap(), 1);

        // ...so startup recovery after the crash re-delivers it
        assert_eq!(queue.recover().await.unwrap(), 1);
        assert_eq!(queue.pending().await.unwrap(), 1);
        assert_eq!(queue.in_flight().await.unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_corrupt_payload_removed_without_retry() {
        let (store, queue) = test_queue(5);
        store.push_tail("test", "definitely not json").await.unwrap();

        let processor = CountingDone(AtomicU32::new(0));
        assert!(queue.handle_one(&processor).await.unwrap());

        // Never reached the processor, never retried
        assert_eq!(processor.0.load(Ordering::SeqCst), 0);
        assert_eq!(queue.pending().await.unwrap(), 0);
        assert_eq!(queue.in_flight().await.unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_successful_job_processed_and_acked() {
        let (_, queue) = test_queue(5);
        queue.enqueue(&TestJob { id: 3 }).await.unwrap();

        let processor = CountingDone(AtomicU32::new(0));
        assert!(queue.handle_one(&processor).await.unwrap());
        assert_eq!(processor.0.load(Ordering::SeqCst), 1);
        assert_eq!(queue.pending().await.unwrap(), 0);
        assert_eq!(queue.in_flight().await.unwrap(), 0);

        // Empty queue: bounded wait expires
        assert!(!queue.handle_one(&processor).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovery_preserves_order_to_head() {
        let (_, queue) = test_queue(5);
        queue.enqueue(&TestJob { id: 1 }).await.unwrap();
        queue.enqueue(&TestJob { id: 2 }).await.unwrap();
        queue.enqueue(&TestJob { id: 3 }).await.unwrap();

        let first = queue.consume().await.unwrap().unwrap();
        let second = queue.consume().await.unwrap().unwrap();
        queue.recover().await.unwrap();

        // Recovered jobs come back before untouched ones, oldest first
        assert_eq!(queue.consume().await.unwrap().unwrap(), first);
        assert_eq!(queue.consume().await.unwrap().unwrap(), second);
    }

    #[test]
    fn test_retry_delay_schedule() {
        let base = Duration::from_secs(5);
        assert_eq!(JobQueue::retry_delay(base, 1), Duration::from_secs(5));
        assert_eq!(JobQueue::retry_delay(base, 2), Duration::from_secs(10));
        assert_eq!(JobQueue::retry_delay(base, 3), Duration::from_secs(20));
        assert_eq!(JobQueue::retry_delay(base, 5), Duration::from_secs(80));
    }
}

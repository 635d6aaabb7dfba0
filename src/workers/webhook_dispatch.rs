//! Bounded worker pool for accepted webhook events.
//!
//! The HTTP handler only records the event and enqueues it; workers apply it. When the
//! queue is full, or the process stops before a job runs, the ledger row stays
//! `received` and the retry worker picks it up later.

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::WorkerConfig;
use crate::services::webhook_processor::{WebhookJob, WebhookProcessor};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error("webhook queue is full")]
    QueueFull,
    #[error("webhook workers have stopped")]
    Closed,
}

pub struct WebhookDispatcher {
    sender: mpsc::Sender<WebhookJob>,
    capacity: usize,
}

impl WebhookDispatcher {
    /// Spawns `config.pool_size` workers and returns the dispatcher with their handles.
    pub fn start(
        processor: Arc<WebhookProcessor>,
        config: &WorkerConfig,
        shutdown_rx: watch::Receiver<bool>,
    ) -> (Self, Vec<JoinHandle<()>>) {
        let capacity = config.queue_capacity.max(1);
        let (sender, receiver) = mpsc::channel(capacity);
        let receiver = Arc::new(Mutex::new(receiver));

        let handles = (0..config.pool_size)
            .map(|worker_id| {
                tokio::spawn(run_worker(
                    worker_id,
                    processor.clone(),
                    receiver.clone(),
                    shutdown_rx.clone(),
                    RetryPolicy::from(config),
                ))
            })
            .collect();

        info!(
            pool_size = config.pool_size,
            queue_capacity = capacity,
            "webhook worker pool started"
        );
        (Self { sender, capacity }, handles)
    }

    pub fn enqueue(&self, job: WebhookJob) -> Result<(), DispatchError> {
        match self.sender.try_send(job) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(job)) => {
                warn!(
                    idempotency_key = %job.idempotency_key,
                    "webhook queue full; leaving event for the retry worker"
                );
                Err(DispatchError::QueueFull)
            }
            Err(mpsc::error::TrySendError::Closed(job)) => {
                warn!(
                    idempotency_key = %job.idempotency_key,
                    "webhook workers stopped; leaving event for the retry worker"
                );
                Err(DispatchError::Closed)
            }
        }
    }

    pub fn queue_depth(&self) -> usize {
        self.capacity.saturating_sub(self.sender.capacity())
    }

    pub fn queue_capacity(&self) -> usize {
        self.capacity
    }
}

#[derive(Debug, Clone, Copy)]
struct RetryPolicy {
    max_attempts: u32,
    base_backoff: Duration,
}

impl From<&WorkerConfig> for RetryPolicy {
    fn from(config: &WorkerConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_backoff: Duration::from_millis(config.base_backoff_ms),
        }
    }
}

impl RetryPolicy {
    fn backoff(&self, attempt: u32) -> Duration {
        self.base_backoff
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
    }
}

async fn run_worker(
    worker_id: usize,
    processor: Arc<WebhookProcessor>,
    receiver: Arc<Mutex<mpsc::Receiver<WebhookJob>>>,
    mut shutdown_rx: watch::Receiver<bool>,
    policy: RetryPolicy,
) {
    debug!(worker_id, "webhook worker started");
    loop {
        let job = {
            let mut receiver = receiver.lock().await;
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                    continue;
                }
                job = receiver.recv() => job,
            }
        };

        let Some(job) = job else {
            break;
        };
        handle_job(worker_id, &processor, &job, policy).await;
    }
    info!(worker_id, "webhook worker stopped");
}

async fn handle_job(
    worker_id: usize,
    processor: &WebhookProcessor,
    job: &WebhookJob,
    policy: RetryPolicy,
) {
    if let Err(e) = processor.mark_processing(job).await {
        warn!(
            worker_id,
            idempotency_key = %job.idempotency_key,
            error = %e,
            "could not claim webhook event; retry worker will pick it up"
        );
        return;
    }

    for attempt in 1..=policy.max_attempts {
        match processor.process(job).await {
            Ok(outcome) => {
                debug!(
                    worker_id,
                    idempotency_key = %job.idempotency_key,
                    attempt,
                    outcome = ?outcome,
                    "webhook event handled"
                );
                return;
            }
            Err(e) if e.is_retryable() && attempt < policy.max_attempts => {
                let delay = policy.backoff(attempt);
                warn!(
                    worker_id,
                    idempotency_key = %job.idempotency_key,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "webhook event failed; retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                error!(
                    worker_id,
                    idempotency_key = %job.idempotency_key,
                    attempt,
                    error = %e,
                    "webhook event failed; handing over to the retry worker"
                );
                if let Err(db) = processor.record_failure(job, &e.to_string(), false).await {
                    error!(error = %db, "could not record webhook failure");
                }
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_per_attempt() {
        let policy = RetryPolicy {
            max_attempts: 4,
            base_backoff: Duration::from_millis(100),
        };
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(400));
    }

    #[test]
    fn zero_attempts_still_runs_once() {
        let config = WorkerConfig {
            max_attempts: 0,
            ..WorkerConfig::default()
        };
        assert_eq!(RetryPolicy::from(&config).max_attempts, 1);
    }
}

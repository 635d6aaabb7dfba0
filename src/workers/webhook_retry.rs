use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info};

use crate::config::WorkerConfig;
use crate::services::webhook_processor::{RetrySummary, WebhookProcessor};

const RETRY_BATCH_SIZE: i64 = 50;

/// Replays ledger events that were never finished (queue overflow, crash, failure).
pub struct WebhookRetryWorker {
    processor: Arc<WebhookProcessor>,
    interval: Duration,
    stale_after: chrono::Duration,
    max_attempts: i32,
}

impl WebhookRetryWorker {
    pub fn new(processor: Arc<WebhookProcessor>, config: &WorkerConfig) -> Self {
        Self {
            processor,
            interval: Duration::from_secs(config.retry_interval_secs.max(1)),
            stale_after: chrono::Duration::seconds(config.stale_after_secs as i64),
            max_attempts: config.max_ledger_attempts,
        }
    }

    pub async fn run_once(&self) -> RetrySummary {
        let stale_before = Utc::now() - self.stale_after;
        match self
            .processor
            .retry_pending(stale_before, self.max_attempts, RETRY_BATCH_SIZE)
            .await
        {
            Ok(summary) => {
                if summary.claimed > 0 {
                    info!(
                        claimed = summary.claimed,
                        processed = summary.processed,
                        failed = summary.failed,
                        "Retried pending webhooks"
                    );
                }
                summary
            }
            Err(e) => {
                error!(error = %e, "Failed to retry pending webhooks");
                RetrySummary::default()
            }
        }
    }

    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            interval_secs = self.interval.as_secs(),
            max_attempts = self.max_attempts,
            "Webhook retry worker started"
        );

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    self.run_once().await;
                }
            }
        }

        info!("Webhook retry worker stopped");
    }
}

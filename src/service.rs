use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::time::Instant;

use crate::cache::{sent_message_key, Cache};
use crate::message::Message;
use crate::repository::Repository;
use crate::sms::SmsClient;

/// How long a delivery record lives in the cache.
const CACHE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

const DEFAULT_BATCH_SIZE: usize = 100;
const DEFAULT_MAX_WORKERS: usize = 4;
const DEFAULT_PER_MESSAGE_TIMEOUT: Duration = Duration::from_secs(5);

/// Summary of one batch invocation. Per-message terminal state lives on the
/// rows themselves; message-level failures never fail the batch.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchOutcome {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// The dependency the scheduler drives on every tick.
#[async_trait::async_trait]
pub trait BatchProcessor: Send + Sync {
    /// Processes one batch of pending messages. New per-message work stops
    /// once `deadline` passes; messages already in flight are not aborted.
    async fn process_batch(&self, deadline: Instant) -> Result<BatchOutcome>;
}

/// Drains pending messages in deadline-bound batches with a small worker
/// pool, and serves the read side of the API.
#[derive(Clone)]
pub struct MessageService {
    repo: Arc<dyn Repository>,
    sms: Arc<dyn SmsClient>,
    cache: Arc<dyn Cache>,
    batch_size: usize,
    max_workers: usize,
    per_message_timeout: Duration,
}

impl MessageService {
    pub fn new(
        repo: Arc<dyn Repository>,
        sms: Arc<dyn SmsClient>,
        cache: Arc<dyn Cache>,
        batch_size: usize,
        max_workers: usize,
        per_message_timeout: Duration,
    ) -> Self {
        // Zero values mean "unset" and fall back to the defaults.
        let batch_size = if batch_size == 0 { DEFAULT_BATCH_SIZE } else { batch_size };
        let max_workers = if max_workers == 0 { DEFAULT_MAX_WORKERS } else { max_workers };
        let per_message_timeout = if per_message_timeout.is_zero() {
            DEFAULT_PER_MESSAGE_TIMEOUT
        } else {
            per_message_timeout
        };

        Self {
            repo,
            sms,
            cache,
            batch_size,
            max_workers,
            per_message_timeout,
        }
    }

    pub async fn enqueue(&self, message: &Message) -> Result<()> {
        self.repo.save(message).await
    }

    pub async fn delivered(&self, page: usize, limit: usize) -> Result<(Vec<Message>, i64)> {
        self.repo.fetch_delivered(page, limit).await
    }

    /// Pulls up to `batch_size` pending messages and delivers them with
    /// bounded parallelism. Only the initial fetch can fail the call.
    pub async fn run_batch(&self, deadline: Instant) -> Result<BatchOutcome> {
        let messages = self
            .repo
            .fetch_pending(self.batch_size)
            .await
            .context("failed to fetch pending messages")?;

        if messages.is_empty() {
            tracing::debug!("no pending messages to process");
            return Ok(BatchOutcome::default());
        }

        let attempted = messages.len();
        let worker_count = self.max_workers.min(attempted).max(1);
        tracing::info!(
            count = attempted,
            workers = worker_count,
            "processing batch"
        );

        let mut handles = Vec::with_capacity(worker_count);
        for (worker_id, share) in stride_shares(messages, worker_count)
            .into_iter()
            .enumerate()
        {
            let service = self.clone();
            handles.push(tokio::spawn(async move {
                service.run_worker(worker_id, share, deadline).await
            }));
        }

        let mut outcome = BatchOutcome {
            attempted,
            ..BatchOutcome::default()
        };
        for handle in handles {
            match handle.await {
                Ok((succeeded, failed)) => {
                    outcome.succeeded += succeeded;
                    outcome.failed += failed;
                }
                Err(err) => tracing::error!(error = %err, "batch worker panicked"),
            }
        }

        tracing::info!(
            succeeded = outcome.succeeded,
            failed = outcome.failed,
            "batch worker pool completed"
        );
        Ok(outcome)
    }

    /// Processes one worker's share in order, checking the batch deadline
    /// before each message. Cancellation is cooperative: a message already
    /// handed to the provider runs to its own per-message budget.
    async fn run_worker(
        &self,
        worker_id: usize,
        share: Vec<Message>,
        deadline: Instant,
    ) -> (usize, usize) {
        let mut succeeded = 0;
        let mut failed = 0;

        for message in share {
            let now = Instant::now();
            if now >= deadline {
                tracing::warn!(worker = worker_id, "batch deadline reached, stopping worker");
                break;
            }

            let budget = self.per_message_timeout.min(deadline - now);
            if self.deliver(worker_id, message, budget).await {
                succeeded += 1;
            } else {
                failed += 1;
            }
        }

        (succeeded, failed)
    }

    /// Delivers a single message and records its terminal status. Returns
    /// whether delivery succeeded; persistence and cache problems are
    /// logged, never propagated.
    async fn deliver(&self, worker_id: usize, mut message: Message, budget: Duration) -> bool {
        let id = message.id;

        let sent = tokio::time::timeout(budget, self.sms.send(&message.to, &message.content)).await;

        match sent {
            Ok(Ok(receipt)) => {
                message.mark_sent(receipt.message_id.clone(), receipt.raw_response);
                if let Err(err) = self.repo.update_status(&message).await {
                    tracing::error!(
                        message = %id,
                        error = %err,
                        "failed to persist SUCCESS status"
                    );
                }

                let sent_at = message
                    .sent_at
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_default();
                let key = sent_message_key(&receipt.message_id);
                if let Err(err) = self.cache.set(&key, &sent_at, CACHE_TTL).await {
                    tracing::warn!(
                        message = %id,
                        error = %err,
                        "failed to cache delivery record"
                    );
                }
                true
            }
            Ok(Err(err)) => {
                tracing::warn!(
                    worker = worker_id,
                    message = %id,
                    error = %err,
                    "send failed, marking FAILED"
                );
                let raw = err.raw_response().unwrap_or_default().to_string();
                message.mark_failed(raw);
                if let Err(err) = self.repo.update_status(&message).await {
                    tracing::error!(
                        message = %id,
                        error = %err,
                        "failed to persist FAILED status"
                    );
                }
                false
            }
            Err(_) => {
                tracing::warn!(
                    worker = worker_id,
                    message = %id,
                    timeout = ?budget,
                    "send timed out, marking FAILED"
                );
                message.mark_failed(String::new());
                if let Err(err) = self.repo.update_status(&message).await {
                    tracing::error!(
                        message = %id,
                        error = %err,
                        "failed to persist FAILED status"
                    );
                }
                false
            }
        }
    }
}

#[async_trait::async_trait]
impl BatchProcessor for MessageService {
    async fn process_batch(&self, deadline: Instant) -> Result<BatchOutcome> {
        self.run_batch(deadline).await
    }
}

/// Splits `items` into `worker_count` shares by stride: worker `k` owns
/// original indices k, k+worker_count, k+2*worker_count, ... in increasing
/// order. Every item lands in exactly one share.
fn stride_shares<T>(items: Vec<T>, worker_count: usize) -> Vec<Vec<T>> {
    let mut shares: Vec<Vec<T>> = (0..worker_count).map(|_| Vec::new()).collect();
    for (i, item) in items.into_iter().enumerate() {
        shares[i % worker_count].push(item);
    }
    shares
}

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, MissedTickBehavior};

use crate::service::BatchProcessor;

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(120);
pub const DEFAULT_BATCH_TIMEOUT: Duration = Duration::from_secs(30);

/// How long callers wait for the control loop to accept and acknowledge a
/// command. Independent of batch timing.
const CONTROL_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("scheduler control loop did not respond within {CONTROL_TIMEOUT:?}")]
    ControlUnresponsive,
}

/// A command sent into the control loop, carrying a reply slot the loop
/// fulfills exactly once.
enum Command {
    Start(oneshot::Sender<bool>),
    Stop(oneshot::Sender<bool>),
    Status(oneshot::Sender<bool>),
}

/// Handle to the scheduler's control loop. All mutable scheduling state
/// lives inside the loop task, so no locks are involved anywhere.
#[derive(Clone)]
pub struct Scheduler {
    ctrl: mpsc::Sender<Command>,
}

impl Scheduler {
    /// Spawns the control loop and returns a handle to it. The loop lives
    /// for the lifetime of the process (or until every handle is dropped).
    /// Non-positive durations fall back to the defaults.
    pub fn spawn(
        processor: Arc<dyn BatchProcessor>,
        interval: Duration,
        batch_timeout: Duration,
    ) -> Self {
        let interval = if interval.is_zero() { DEFAULT_INTERVAL } else { interval };
        let batch_timeout = if batch_timeout.is_zero() {
            DEFAULT_BATCH_TIMEOUT
        } else {
            batch_timeout
        };

        let (ctrl, rx) = mpsc::channel(1);
        tokio::spawn(control_loop(processor, interval, batch_timeout, rx));
        Self { ctrl }
    }

    /// Tells the scheduler to begin processing ticks. Idempotent. Blocks
    /// until the loop has acknowledged the state change.
    pub async fn start(&self) -> Result<(), SchedulerError> {
        self.roundtrip(Command::Start).await.map(|_| ())
    }

    /// Tells the scheduler to stop accepting new ticks. If a batch is
    /// currently executing, this waits until it finishes before returning.
    pub async fn stop(&self) -> Result<(), SchedulerError> {
        self.roundtrip(Command::Stop).await.map(|_| ())
    }

    /// Whether the scheduler is accepting ticks. Does not mean a batch is
    /// executing right now.
    pub async fn is_running(&self) -> Result<bool, SchedulerError> {
        self.roundtrip(Command::Status).await
    }

    async fn roundtrip(
        &self,
        command: fn(oneshot::Sender<bool>) -> Command,
    ) -> Result<bool, SchedulerError> {
        let (reply_tx, reply_rx) = oneshot::channel();

        // First make sure the loop accepts the command at all.
        match tokio::time::timeout(CONTROL_TIMEOUT, self.ctrl.send(command(reply_tx))).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) | Err(_) => return Err(SchedulerError::ControlUnresponsive),
        }

        // Then wait for it to acknowledge the state change.
        match tokio::time::timeout(CONTROL_TIMEOUT, reply_rx).await {
            Ok(Ok(answer)) => Ok(answer),
            Ok(Err(_)) | Err(_) => Err(SchedulerError::ControlUnresponsive),
        }
    }
}

/// The control loop owns all mutable scheduler state and reacts to either
/// commands or timer ticks. The triggered batch runs synchronously inside
/// the loop's own turn, so commands arriving mid-batch queue behind it and
/// are serviced once the batch returns.
async fn control_loop(
    processor: Arc<dyn BatchProcessor>,
    interval: Duration,
    batch_timeout: Duration,
    mut ctrl: mpsc::Receiver<Command>,
) {
    let mut ticker = tokio::time::interval(interval);
    // A tick observed while busy is dropped, never queued: a slow batch
    // silently stretches the effective period.
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // interval() fires immediately; swallow that so the first real trigger
    // lands one full period after spawn.
    ticker.tick().await;

    // running: whether ticks are accepted
    // in_batch: whether a batch is currently executing
    let mut running = false;
    let mut in_batch = false;

    // Held stop acknowledgment, fulfilled when the current batch finishes.
    // At most one can be outstanding since commands are serialized.
    let mut pending_stop: Option<oneshot::Sender<bool>> = None;

    loop {
        tokio::select! {
            cmd = ctrl.recv() => {
                let Some(cmd) = cmd else {
                    // every handle dropped; nothing can reach us anymore
                    break;
                };
                match cmd {
                    Command::Start(reply) => {
                        if !running {
                            tracing::info!(?interval, ?batch_timeout, "scheduler started");
                        }
                        running = true;
                        let _ = reply.send(true);
                    }
                    Command::Stop(reply) => {
                        if !running && !in_batch {
                            tracing::info!("stop requested, but already idle");
                            let _ = reply.send(true);
                            continue;
                        }

                        tracing::info!("stop requested, waiting for current batch (if any)");
                        running = false;

                        if in_batch {
                            pending_stop = Some(reply);
                        } else {
                            let _ = reply.send(true);
                        }
                    }
                    Command::Status(reply) => {
                        let _ = reply.send(running);
                    }
                }
            }
            _ = ticker.tick() => {
                if !running || in_batch {
                    continue;
                }

                in_batch = true;
                tracing::debug!("triggering batch");

                let deadline = Instant::now() + batch_timeout;
                match processor.process_batch(deadline).await {
                    Ok(outcome) => tracing::info!(
                        attempted = outcome.attempted,
                        succeeded = outcome.succeeded,
                        failed = outcome.failed,
                        "batch completed"
                    ),
                    Err(err) => tracing::error!(error = %err, "batch failed"),
                }

                in_batch = false;

                if let Some(ack) = pending_stop.take() {
                    let _ = ack.send(true);
                    tracing::info!("scheduler stopped");
                }
            }
        }
    }
}

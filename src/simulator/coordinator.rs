//! Bounded-parallel batch execution.
//!
//! Every batch gets its own task, but a semaphore admits at most
//! `max_parallel` of them at once. Inside a batch, orders run strictly one
//! after another with a pacing pause between creations. A panic while
//! driving one order fails that order only; the rest of its batch and the
//! sibling batches carry on.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use futures::FutureExt;
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::payload::Batch;
use crate::runtime::telemetry::Telemetry;
use crate::simulator::driver::{LifecycleStage, OrderLifecycleDriver, OrderOutcome};
use crate::simulator::wait::sleep_with_cancellation;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResult {
    pub batch_id: usize,
    pub total_orders: usize,
    pub successful_orders: usize,
    pub failed_orders: usize,
    pub interrupted_orders: usize,
    /// Ledger slots of this batch's orders, in execution order.
    pub slots: Vec<usize>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub panic: Option<String>,
}

impl BatchResult {
    fn start(batch_id: usize, total_orders: usize) -> Self {
        let now = Utc::now();
        Self {
            batch_id,
            total_orders,
            successful_orders: 0,
            failed_orders: 0,
            interrupted_orders: 0,
            slots: Vec::with_capacity(total_orders),
            started_at: now,
            finished_at: now,
            duration_ms: 0,
            panic: None,
        }
    }

    fn record(&mut self, outcome: &OrderOutcome) {
        self.slots.push(outcome.slot);
        if outcome.is_success() {
            self.successful_orders += 1;
        } else if outcome.is_interrupted() {
            self.interrupted_orders += 1;
        } else {
            self.failed_orders += 1;
        }
    }

    fn finish(mut self) -> Self {
        self.finished_at = Utc::now();
        self.duration_ms =
            u64::try_from((self.finished_at - self.started_at).num_milliseconds()).unwrap_or(0);
        self
    }

    /// A batch whose task could not be joined. Its orders are counted as
    /// failed.
    fn panicked(batch_id: usize, total_orders: usize, message: String) -> Self {
        let mut result = Self::start(batch_id, total_orders);
        result.failed_orders = total_orders;
        result.panic = Some(message);
        result.finish()
    }
}

/// Totals across all batches plus the per-batch detail.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CoordinatorOutcome {
    pub total_orders: usize,
    pub successful_orders: usize,
    pub failed_orders: usize,
    pub interrupted_orders: usize,
    pub batches: Vec<BatchResult>,
}

impl CoordinatorOutcome {
    fn aggregate(mut batches: Vec<BatchResult>) -> Self {
        batches.sort_by_key(|batch| batch.batch_id);
        Self {
            total_orders: batches.iter().map(|b| b.total_orders).sum(),
            successful_orders: batches.iter().map(|b| b.successful_orders).sum(),
            failed_orders: batches.iter().map(|b| b.failed_orders).sum(),
            interrupted_orders: batches.iter().map(|b| b.interrupted_orders).sum(),
            batches,
        }
    }
}

pub struct BatchCoordinator {
    driver: Arc<OrderLifecycleDriver>,
    between_creates: Duration,
    telemetry: Arc<Telemetry>,
}

impl BatchCoordinator {
    pub fn new(
        driver: Arc<OrderLifecycleDriver>,
        between_creates: Duration,
        telemetry: Arc<Telemetry>,
    ) -> Self {
        Self {
            driver,
            between_creates,
            telemetry,
        }
    }

    /// Runs every batch with at most `max_parallel` in flight and returns
    /// once all of them have finished or been interrupted.
    pub async fn run(&self, batches: Vec<Batch>, max_parallel: usize) -> CoordinatorOutcome {
        let gate = Arc::new(Semaphore::new(max_parallel.max(1)));
        let cancel = self.driver.cancellation().clone();
        tracing::info!(
            batches = batches.len(),
            max_parallel = max_parallel.max(1),
            "starting batch execution"
        );

        let mut handles = Vec::with_capacity(batches.len());
        for batch in batches {
            let batch_id = batch.id;
            let total_orders = batch.len();
            let driver = self.driver.clone();
            let gate = gate.clone();
            let cancel = cancel.clone();
            let telemetry = self.telemetry.clone();
            let between_creates = self.between_creates;

            let handle = tokio::spawn(async move {
                let permit = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => None,
                    permit = gate.acquire_owned() => permit.ok(),
                };
                let Some(_permit) = permit else {
                    return Self::skip_batch(&driver, &batch, LifecycleStage::Admission);
                };

                telemetry.batch_started();
                let result = Self::run_batch(&driver, &batch, between_creates, &cancel).await;
                telemetry.batch_finished();
                result
            });
            handles.push((batch_id, total_orders, handle));
        }

        let (meta, tasks): (Vec<_>, Vec<_>) = handles
            .into_iter()
            .map(|(batch_id, total, handle)| ((batch_id, total), handle))
            .unzip();

        let results = join_all(tasks)
            .await
            .into_iter()
            .zip(meta)
            .map(|(joined, (batch_id, total_orders))| match joined {
                Ok(result) => result,
                Err(err) => {
                    tracing::error!(batch = batch_id, error = %err, "batch task failed to join");
                    BatchResult::panicked(batch_id, total_orders, err.to_string())
                }
            })
            .collect();

        let outcome = CoordinatorOutcome::aggregate(results);
        tracing::info!(
            total = outcome.total_orders,
            succeeded = outcome.successful_orders,
            failed = outcome.failed_orders,
            interrupted = outcome.interrupted_orders,
            "batch execution finished"
        );
        outcome
    }

    async fn run_batch(
        driver: &OrderLifecycleDriver,
        batch: &Batch,
        between_creates: Duration,
        cancel: &CancellationToken,
    ) -> BatchResult {
        let mut result = BatchResult::start(batch.id, batch.len());
        tracing::info!(batch = batch.id, orders = batch.len(), "batch started");

        let last = batch.len().saturating_sub(1);
        for (index, payload) in batch.payloads.iter().enumerate() {
            if cancel.is_cancelled() {
                for skipped in &batch.payloads[index..] {
                    result.record(&driver.skip(batch.id, skipped, LifecycleStage::Admission));
                }
                break;
            }

            let started_at = Utc::now();
            let outcome = match AssertUnwindSafe(driver.drive(batch.id, payload))
                .catch_unwind()
                .await
            {
                Ok(outcome) => outcome,
                Err(panic) => driver.panicked(
                    batch.id,
                    payload,
                    started_at,
                    panic_message(panic.as_ref()),
                ),
            };
            result.record(&outcome);

            if index < last && sleep_with_cancellation(between_creates, cancel).await.is_err() {
                for skipped in &batch.payloads[index + 1..] {
                    result.record(&driver.skip(batch.id, skipped, LifecycleStage::Pacing));
                }
                break;
            }
        }

        let result = result.finish();
        tracing::info!(
            batch = batch.id,
            succeeded = result.successful_orders,
            failed = result.failed_orders,
            interrupted = result.interrupted_orders,
            duration_ms = result.duration_ms,
            "batch finished"
        );
        result
    }

    fn skip_batch(driver: &OrderLifecycleDriver, batch: &Batch, stage: LifecycleStage) -> BatchResult {
        let mut result = BatchResult::start(batch.id, batch.len());
        for payload in &batch.payloads {
            result.record(&driver.skip(batch.id, payload, stage));
        }
        tracing::info!(batch = batch.id, "batch skipped after cancellation");
        result.finish()
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

//! Deferred order termination.
//!
//! Lifecycle drivers hand finished orders to a bounded queue and move on; a
//! single [`TerminationWorker`] consumes the queue in arrival order and
//! applies the end or cancel call. Enqueueing never blocks longer than the
//! configured enqueue timeout: a full queue first waits for capacity, then
//! gives the request back as [`EnqueueError::Saturated`].

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::runtime::telemetry::Telemetry;
use crate::service::RemoteOrderService;
use crate::simulator::ledger::{OrderHandle, OrderLedger};
use crate::simulator::state::{OrderState, TerminationAction};

pub const DEFAULT_QUEUE_CAPACITY: usize = 1_000;
pub const DEFAULT_ENQUEUE_TIMEOUT: Duration = Duration::from_secs(5);

/// Instruction to finish one order. Owns the order's write handle, so once
/// it is queued the lifecycle driver can no longer touch the record.
#[derive(Debug)]
pub struct TerminationRequest {
    remote_id: String,
    action: TerminationAction,
    handle: OrderHandle,
}

impl TerminationRequest {
    pub fn new(remote_id: String, action: TerminationAction, handle: OrderHandle) -> Self {
        Self {
            remote_id,
            action,
            handle,
        }
    }

    pub fn remote_id(&self) -> &str {
        &self.remote_id
    }

    pub fn action(&self) -> TerminationAction {
        self.action
    }

    pub fn slot(&self) -> usize {
        self.handle.slot()
    }

    /// Takes the write handle back, e.g. after a failed enqueue.
    pub fn into_handle(self) -> OrderHandle {
        self.handle
    }
}

/// Why a request could not be queued. The request is always returned.
#[derive(Debug)]
pub enum EnqueueError {
    Saturated(TerminationRequest),
    Closed(TerminationRequest),
    Cancelled(TerminationRequest),
}

impl EnqueueError {
    pub fn into_request(self) -> TerminationRequest {
        match self {
            EnqueueError::Saturated(request)
            | EnqueueError::Closed(request)
            | EnqueueError::Cancelled(request) => request,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TerminationQueue {
    sender: mpsc::Sender<TerminationRequest>,
    enqueue_timeout: Duration,
    telemetry: Arc<Telemetry>,
}

#[derive(Debug)]
pub struct TerminationReceiver {
    receiver: mpsc::Receiver<TerminationRequest>,
}

impl TerminationReceiver {
    /// Takes the next request directly, bypassing the worker.
    pub async fn recv(&mut self) -> Option<TerminationRequest> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<TerminationRequest> {
        self.receiver.try_recv().ok()
    }
}

pub fn termination_channel(
    capacity: usize,
    enqueue_timeout: Duration,
    telemetry: Arc<Telemetry>,
) -> (TerminationQueue, TerminationReceiver) {
    let (sender, receiver) = mpsc::channel(capacity.max(1));
    (
        TerminationQueue {
            sender,
            enqueue_timeout,
            telemetry,
        },
        TerminationReceiver { receiver },
    )
}

impl TerminationQueue {
    pub fn capacity(&self) -> usize {
        self.sender.max_capacity()
    }

    pub fn depth(&self) -> usize {
        self.sender.max_capacity() - self.sender.capacity()
    }

    /// Queues `request`, waiting at most the enqueue timeout for room.
    pub async fn enqueue(
        &self,
        request: TerminationRequest,
        cancel: &CancellationToken,
    ) -> Result<(), EnqueueError> {
        let permit = match self.sender.try_reserve() {
            Ok(permit) => permit,
            Err(TrySendError::Closed(())) => return Err(EnqueueError::Closed(request)),
            Err(TrySendError::Full(())) => {
                self.telemetry.record_enqueue_wait();
                tracing::warn!(
                    remote_id = %request.remote_id,
                    action = %request.action,
                    capacity = self.capacity(),
                    "termination queue full; waiting for capacity"
                );
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(EnqueueError::Cancelled(request)),
                    reserved = timeout(self.enqueue_timeout, self.sender.reserve()) => match reserved {
                        Ok(Ok(permit)) => permit,
                        Ok(Err(_)) => return Err(EnqueueError::Closed(request)),
                        Err(_) => {
                            self.telemetry.record_enqueue_rejection();
                            return Err(EnqueueError::Saturated(request));
                        }
                    },
                }
            }
        };

        tracing::debug!(
            remote_id = %request.remote_id,
            action = %request.action,
            "termination request queued"
        );
        permit.send(request);
        self.telemetry.record_queue_depth(self.depth());
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminationReport {
    pub applied: u64,
    pub failed: u64,
    pub abandoned: u64,
}

/// Single consumer of the termination queue.
///
/// Runs until every sender is dropped and the queue is drained, or until
/// `stop` fires. Requests still queued or in flight at that point are
/// abandoned and their orders stay in a pending-termination state.
pub struct TerminationWorker {
    service: Arc<dyn RemoteOrderService>,
    ledger: Arc<OrderLedger>,
    receiver: mpsc::Receiver<TerminationRequest>,
    stop: CancellationToken,
    telemetry: Arc<Telemetry>,
}

enum Applied {
    Succeeded,
    Failed,
    Abandoned,
}

impl TerminationWorker {
    pub fn new(
        service: Arc<dyn RemoteOrderService>,
        ledger: Arc<OrderLedger>,
        receiver: TerminationReceiver,
        stop: CancellationToken,
        telemetry: Arc<Telemetry>,
    ) -> Self {
        Self {
            service,
            ledger,
            receiver: receiver.receiver,
            stop,
            telemetry,
        }
    }

    pub fn spawn(self) -> JoinHandle<TerminationReport> {
        tokio::spawn(self.run())
    }

    pub async fn run(mut self) -> TerminationReport {
        let mut report = TerminationReport::default();

        loop {
            let request = tokio::select! {
                biased;
                _ = self.stop.cancelled() => break,
                next = self.receiver.recv() => match next {
                    Some(request) => request,
                    None => break,
                },
            };

            match self.apply(request).await {
                Applied::Succeeded => report.applied += 1,
                Applied::Failed => report.failed += 1,
                Applied::Abandoned => report.abandoned += 1,
            }
        }

        self.receiver.close();
        while let Ok(request) = self.receiver.try_recv() {
            tracing::warn!(
                remote_id = %request.remote_id,
                action = %request.action,
                "termination request abandoned"
            );
            report.abandoned += 1;
        }
        self.telemetry.record_terminations_abandoned(report.abandoned);

        tracing::info!(
            applied = report.applied,
            failed = report.failed,
            abandoned = report.abandoned,
            "termination worker stopped"
        );
        report
    }

    async fn apply(&self, request: TerminationRequest) -> Applied {
        let TerminationRequest {
            remote_id,
            action,
            handle,
        } = request;

        let call = match action {
            TerminationAction::End => self.service.finalize(&remote_id),
            TerminationAction::Cancel => self.service.cancel(&remote_id),
        };
        let outcome = tokio::select! {
            biased;
            _ = self.stop.cancelled() => None,
            result = call => Some(result),
        };

        let (terminal, error, applied) = match outcome {
            None => {
                tracing::warn!(%remote_id, %action, "termination call abandoned on shutdown");
                return Applied::Abandoned;
            }
            Some(Ok(())) => {
                self.telemetry.record_termination_applied();
                tracing::debug!(%remote_id, %action, "termination applied");
                (action.completed_state(), None, Applied::Succeeded)
            }
            Some(Err(err)) => {
                self.telemetry.record_termination_failure();
                tracing::warn!(%remote_id, %action, error = %err, "termination call failed");
                (
                    OrderState::Failed,
                    Some(format!("failed to {action} order: {err}")),
                    Applied::Failed,
                )
            }
        };

        if let Err(err) = self
            .ledger
            .update(&handle, |record| record.complete(terminal, error))
        {
            tracing::error!(%remote_id, error = %err, "could not record termination outcome");
        }
        self.telemetry.record_queue_depth(self.receiver.len());
        applied
    }
}

//! Per-order lifecycle: create, wait for readiness, run the type-specific
//! continuation, then hand the order to the termination queue.
//!
//! Activate-flow orders are activated and handed off for finalization.
//! Accept-flow orders are left accepted and handed off for cancellation. The
//! driver never waits for the termination call itself. Every wait observes
//! the run's cancellation token, and a cancelled order ends up
//! `Interrupted`, never `Failed`.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::time::{timeout_at, Instant};
use tokio_util::sync::CancellationToken;

use crate::payload::{OrderPayload, OrderType};
use crate::runtime::operations::OperationsTracker;
use crate::runtime::telemetry::Telemetry;
use crate::service::{RemoteOrderService, RemoteStatus, ServiceError};
use crate::simulator::ledger::{OrderHandle, OrderLedger};
use crate::simulator::state::{OrderResult, OrderState, TerminationAction};
use crate::simulator::termination::{EnqueueError, TerminationQueue, TerminationRequest};
use crate::simulator::wait::{sleep_with_cancellation, PollPolicy};

/// Where in its lifecycle an order was when something happened to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleStage {
    Admission,
    Create,
    AfterCreate,
    Polling,
    BeforeActivate,
    Activate,
    BeforeEnd,
    BeforeCancel,
    Enqueue,
    Pacing,
}

impl fmt::Display for LifecycleStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LifecycleStage::Admission => "batch admission",
            LifecycleStage::Create => "order creation",
            LifecycleStage::AfterCreate => "post-creation wait",
            LifecycleStage::Polling => "readiness polling",
            LifecycleStage::BeforeActivate => "pre-activation wait",
            LifecycleStage::Activate => "activation",
            LifecycleStage::BeforeEnd => "pre-end wait",
            LifecycleStage::BeforeCancel => "pre-cancel wait",
            LifecycleStage::Enqueue => "termination enqueue",
            LifecycleStage::Pacing => "pacing between orders",
        })
    }
}

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("failed to create order {order_number}: {source}")]
    Create {
        order_number: String,
        #[source]
        source: ServiceError,
    },
    #[error("failed to get details for order {remote_id}: {source}")]
    Status {
        remote_id: String,
        #[source]
        source: ServiceError,
    },
    #[error("timed out after {waited:?} waiting for order {remote_id} to be accepted")]
    ReadinessTimeout { remote_id: String, waited: Duration },
    #[error("order {remote_id} failed during processing")]
    RemoteFailed { remote_id: String },
    #[error("failed to activate order {remote_id}: {source}")]
    Activate {
        remote_id: String,
        #[source]
        source: ServiceError,
    },
    #[error("termination queue saturated; could not schedule {action} for order {remote_id}")]
    QueueSaturated {
        remote_id: String,
        action: TerminationAction,
    },
    #[error("termination queue closed before {action} for order {remote_id} was scheduled")]
    QueueClosed {
        remote_id: String,
        action: TerminationAction,
    },
    #[error("cancelled during {stage}")]
    Cancelled { stage: LifecycleStage },
    #[error("order {order_number} panicked: {message}")]
    Panicked {
        order_number: String,
        message: String,
    },
}

impl DriverError {
    pub fn is_cancellation(&self) -> bool {
        matches!(self, DriverError::Cancelled { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, DriverError::ReadinessTimeout { .. })
    }

    fn terminal_state(&self) -> OrderState {
        if self.is_cancellation() {
            OrderState::Interrupted
        } else {
            OrderState::Failed
        }
    }
}

pub const DEFAULT_STEP_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_POLL_DEADLINE: Duration = Duration::from_secs(60);

/// Pauses between lifecycle steps, plus the readiness poll cadence and
/// deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LifecycleIntervals {
    pub after_create: Duration,
    pub poll_interval: Duration,
    pub poll_deadline: Duration,
    pub before_activate: Duration,
    pub before_end: Duration,
    pub before_cancel: Duration,
}

impl Default for LifecycleIntervals {
    fn default() -> Self {
        Self {
            after_create: DEFAULT_STEP_INTERVAL,
            poll_interval: DEFAULT_STEP_INTERVAL,
            poll_deadline: DEFAULT_POLL_DEADLINE,
            before_activate: DEFAULT_STEP_INTERVAL,
            before_end: DEFAULT_STEP_INTERVAL,
            before_cancel: DEFAULT_STEP_INTERVAL,
        }
    }
}

/// What happened to one order. `slot` addresses its record in the ledger.
#[derive(Debug)]
pub struct OrderOutcome {
    pub slot: usize,
    pub result: Result<(), DriverError>,
}

impl OrderOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    pub fn is_interrupted(&self) -> bool {
        matches!(&self.result, Err(err) if err.is_cancellation())
    }
}

pub struct DriverParams {
    pub service: Arc<dyn RemoteOrderService>,
    pub ledger: Arc<OrderLedger>,
    pub queue: TerminationQueue,
    pub intervals: LifecycleIntervals,
    pub poll_policy: PollPolicy,
    pub cancel: CancellationToken,
    pub telemetry: Arc<Telemetry>,
    pub operations: Option<Arc<OperationsTracker>>,
}

pub struct OrderLifecycleDriver {
    service: Arc<dyn RemoteOrderService>,
    ledger: Arc<OrderLedger>,
    queue: TerminationQueue,
    intervals: LifecycleIntervals,
    poll_policy: PollPolicy,
    cancel: CancellationToken,
    telemetry: Arc<Telemetry>,
    operations: Option<Arc<OperationsTracker>>,
}

impl OrderLifecycleDriver {
    pub fn new(params: DriverParams) -> Self {
        Self {
            service: params.service,
            ledger: params.ledger,
            queue: params.queue,
            intervals: params.intervals,
            poll_policy: params.poll_policy,
            cancel: params.cancel,
            telemetry: params.telemetry,
            operations: params.operations,
        }
    }

    pub fn ledger(&self) -> &Arc<OrderLedger> {
        &self.ledger
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Runs one order from creation to hand-off. Failures are recorded in
    /// the ledger and returned, never propagated as a panic or abort.
    pub async fn drive(&self, batch_id: usize, payload: &OrderPayload) -> OrderOutcome {
        let started_at = Utc::now();

        let remote_id = match self.create(payload).await {
            Ok(remote_id) => remote_id,
            Err(err) => {
                self.count_failure(&err);
                tracing::warn!(
                    batch = batch_id,
                    order_number = %payload.order_number,
                    error = %err,
                    "order was not created"
                );
                let handle = self.ledger.register(OrderResult::unsubmitted(
                    payload,
                    batch_id,
                    started_at,
                    err.terminal_state(),
                    err.to_string(),
                ));
                return OrderOutcome {
                    slot: handle.slot(),
                    result: Err(err),
                };
            }
        };

        self.telemetry.record_order_created();
        if let Some(operations) = &self.operations {
            if let Err(err) = operations.record(&remote_id).await {
                tracing::warn!(%remote_id, error = %err, "failed to record operation id");
            }
        }
        tracing::info!(
            batch = batch_id,
            order_number = %payload.order_number,
            %remote_id,
            order_type = %payload.order_type,
            "order created"
        );

        let handle = self.ledger.register(OrderResult::created(
            payload,
            batch_id,
            remote_id.clone(),
            started_at,
        ));
        let slot = handle.slot();
        let result = self.advance(handle, payload.order_type, &remote_id).await;
        if result.is_ok() {
            self.telemetry.record_order_handed_off();
        }
        OrderOutcome { slot, result }
    }

    /// Closes out an order whose [`drive`](Self::drive) call panicked.
    ///
    /// A record left behind by the panic is marked `Failed`; an order that
    /// panicked before registration gets a fresh `Failed` record. An order
    /// already handed off belongs to the termination worker and is reported
    /// as handed off.
    pub fn panicked(
        &self,
        batch_id: usize,
        payload: &OrderPayload,
        started_at: DateTime<Utc>,
        message: String,
    ) -> OrderOutcome {
        let err = DriverError::Panicked {
            order_number: payload.order_number.clone(),
            message,
        };
        tracing::error!(
            batch = batch_id,
            order_number = %payload.order_number,
            error = %err,
            "order task panicked"
        );

        let Some(slot) = self.ledger.find(&payload.order_number) else {
            self.count_failure(&err);
            let handle = self.ledger.register(OrderResult::unsubmitted(
                payload,
                batch_id,
                started_at,
                OrderState::Failed,
                err.to_string(),
            ));
            return OrderOutcome {
                slot: handle.slot(),
                result: Err(err),
            };
        };

        let text = err.to_string();
        match self
            .ledger
            .recover(slot, |record| record.complete(OrderState::Failed, Some(text)))
        {
            None => OrderOutcome { slot, result: Ok(()) },
            Some(closed) => {
                if let Err(lifecycle) = closed {
                    tracing::error!(error = %lifecycle, "could not close out panicked order");
                }
                self.count_failure(&err);
                OrderOutcome {
                    slot,
                    result: Err(err),
                }
            }
        }
    }

    /// Records an order that was never started because the run was
    /// cancelled first.
    pub fn skip(&self, batch_id: usize, payload: &OrderPayload, stage: LifecycleStage) -> OrderOutcome {
        let err = DriverError::Cancelled { stage };
        self.count_failure(&err);
        let handle = self.ledger.register(OrderResult::unsubmitted(
            payload,
            batch_id,
            Utc::now(),
            OrderState::Interrupted,
            err.to_string(),
        ));
        OrderOutcome {
            slot: handle.slot(),
            result: Err(err),
        }
    }

    pub async fn create(&self, payload: &OrderPayload) -> Result<String, DriverError> {
        self.call(LifecycleStage::Create, self.service.create(payload))
            .await?
            .map_err(|source| DriverError::Create {
                order_number: payload.order_number.clone(),
                source,
            })
    }

    /// Waits the post-creation interval, then polls until the order is
    /// accepted, fails remotely, or the poll deadline passes.
    pub async fn await_readiness(&self, remote_id: &str) -> Result<(), DriverError> {
        self.poll_readiness(remote_id, None).await
    }

    async fn advance(
        &self,
        handle: OrderHandle,
        order_type: OrderType,
        remote_id: &str,
    ) -> Result<(), DriverError> {
        if let Err(err) = self.prepare_termination(&handle, order_type, remote_id).await {
            return Err(self.abort(handle, remote_id, err));
        }
        self.hand_off(handle, remote_id, TerminationAction::for_order_type(order_type))
            .await
    }

    async fn prepare_termination(
        &self,
        handle: &OrderHandle,
        order_type: OrderType,
        remote_id: &str,
    ) -> Result<(), DriverError> {
        self.poll_readiness(remote_id, Some(handle)).await?;
        self.transition(handle, OrderState::Accepted);

        match order_type {
            OrderType::Activate => {
                self.pause(self.intervals.before_activate, LifecycleStage::BeforeActivate)
                    .await?;
                self.call(LifecycleStage::Activate, self.service.activate(remote_id))
                    .await?
                    .map_err(|source| DriverError::Activate {
                        remote_id: remote_id.to_owned(),
                        source,
                    })?;
                self.transition(handle, OrderState::Activated);
                tracing::debug!(%remote_id, "order activated");
                self.pause(self.intervals.before_end, LifecycleStage::BeforeEnd)
                    .await
            }
            OrderType::Accept => {
                self.pause(self.intervals.before_cancel, LifecycleStage::BeforeCancel)
                    .await
            }
        }
    }

    /// Marks the order pending and gives its handle to the termination
    /// queue. On a failed enqueue the handle comes back and the order is
    /// closed out here.
    async fn hand_off(
        &self,
        handle: OrderHandle,
        remote_id: &str,
        action: TerminationAction,
    ) -> Result<(), DriverError> {
        self.transition(&handle, action.pending_state());
        let request = TerminationRequest::new(remote_id.to_owned(), action, handle);

        let (err, request) = match self.queue.enqueue(request, &self.cancel).await {
            Ok(()) => return Ok(()),
            Err(EnqueueError::Saturated(request)) => (
                DriverError::QueueSaturated {
                    remote_id: remote_id.to_owned(),
                    action,
                },
                request,
            ),
            Err(EnqueueError::Closed(request)) => (
                DriverError::QueueClosed {
                    remote_id: remote_id.to_owned(),
                    action,
                },
                request,
            ),
            Err(EnqueueError::Cancelled(request)) => (
                DriverError::Cancelled {
                    stage: LifecycleStage::Enqueue,
                },
                request,
            ),
        };
        Err(self.abort(request.into_handle(), remote_id, err))
    }

    async fn poll_readiness(
        &self,
        remote_id: &str,
        handle: Option<&OrderHandle>,
    ) -> Result<(), DriverError> {
        self.pause(self.intervals.after_create, LifecycleStage::AfterCreate)
            .await?;

        let deadline = Instant::now() + self.intervals.poll_deadline;
        match timeout_at(deadline, self.poll_until_ready(remote_id, handle)).await {
            Ok(result) => result,
            Err(_) => Err(DriverError::ReadinessTimeout {
                remote_id: remote_id.to_owned(),
                waited: self.intervals.poll_deadline,
            }),
        }
    }

    async fn poll_until_ready(
        &self,
        remote_id: &str,
        handle: Option<&OrderHandle>,
    ) -> Result<(), DriverError> {
        let base = self.intervals.poll_interval;
        let mut interval = base;

        loop {
            self.pause(interval, LifecycleStage::Polling).await?;

            let status = self
                .call(LifecycleStage::Polling, self.service.status(remote_id))
                .await?
                .map_err(|source| DriverError::Status {
                    remote_id: remote_id.to_owned(),
                    source,
                })?;

            match status {
                RemoteStatus::Ready => return Ok(()),
                RemoteStatus::Failed => {
                    return Err(DriverError::RemoteFailed {
                        remote_id: remote_id.to_owned(),
                    })
                }
                RemoteStatus::Pending => {
                    if let Some(handle) = handle {
                        self.ledger
                            .update(handle, |record| record.retry_count += 1);
                    }
                    interval = self.poll_policy.next_interval(interval, base);
                    tracing::trace!(
                        %remote_id,
                        next_poll_ms = interval.as_millis() as u64,
                        "order not ready yet"
                    );
                }
            }
        }
    }

    async fn pause(&self, delay: Duration, stage: LifecycleStage) -> Result<(), DriverError> {
        sleep_with_cancellation(delay, &self.cancel)
            .await
            .map_err(|_| DriverError::Cancelled { stage })
    }

    /// Races a remote call against cancellation. The outer error is the
    /// cancellation, the inner one the service's answer.
    async fn call<T, F>(
        &self,
        stage: LifecycleStage,
        request: F,
    ) -> Result<Result<T, ServiceError>, DriverError>
    where
        F: Future<Output = Result<T, ServiceError>>,
    {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(DriverError::Cancelled { stage }),
            result = request => Ok(result),
        }
    }

    fn transition(&self, handle: &OrderHandle, next: OrderState) {
        if let Err(err) = self.ledger.update(handle, |record| record.transition(next)) {
            tracing::error!(error = %err, "rejected lifecycle transition");
        }
    }

    fn abort(&self, handle: OrderHandle, remote_id: &str, err: DriverError) -> DriverError {
        self.count_failure(&err);
        let terminal = err.terminal_state();
        let message = err.to_string();
        if let Err(lifecycle) = self
            .ledger
            .update(&handle, |record| record.complete(terminal, Some(message)))
        {
            tracing::error!(error = %lifecycle, "could not close out order");
        }
        tracing::warn!(%remote_id, state = %terminal, error = %err, "order did not reach hand-off");
        err
    }

    fn count_failure(&self, err: &DriverError) {
        if err.is_cancellation() {
            self.telemetry.record_order_interrupted();
        } else {
            self.telemetry.record_order_failed();
        }
    }
}

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::payload::{OrderPayload, OrderType};

/// Lifecycle of a tracked order. Transitions only move forward:
///
/// ```text
/// Created -> Accepted -> Activated -> PendingEnd -> Ended | Failed
///                     \-> PendingCancel -> Cancelled | Failed
/// ```
///
/// Any non-terminal state may also drop to `Failed` or, when the run is
/// cancelled, to `Interrupted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderState {
    Created,
    Accepted,
    Activated,
    PendingEnd,
    PendingCancel,
    Ended,
    Cancelled,
    Failed,
    Interrupted,
}

impl OrderState {
    pub const ALL: [OrderState; 9] = [
        OrderState::Created,
        OrderState::Accepted,
        OrderState::Activated,
        OrderState::PendingEnd,
        OrderState::PendingCancel,
        OrderState::Ended,
        OrderState::Cancelled,
        OrderState::Failed,
        OrderState::Interrupted,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            OrderState::Created => "created",
            OrderState::Accepted => "accepted",
            OrderState::Activated => "activated",
            OrderState::PendingEnd => "pending_end",
            OrderState::PendingCancel => "pending_cancel",
            OrderState::Ended => "ended",
            OrderState::Cancelled => "cancelled",
            OrderState::Failed => "failed",
            OrderState::Interrupted => "interrupted",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OrderState::Ended | OrderState::Cancelled | OrderState::Failed | OrderState::Interrupted
        )
    }

    pub fn is_pending_termination(self) -> bool {
        matches!(self, OrderState::PendingEnd | OrderState::PendingCancel)
    }

    pub fn can_transition_to(self, next: OrderState) -> bool {
        use OrderState::*;
        match (self, next) {
            (from, Failed | Interrupted) => !from.is_terminal(),
            (Created, Accepted) => true,
            (Accepted, Activated | PendingCancel) => true,
            (Activated, PendingEnd) => true,
            (PendingEnd, Ended) => true,
            (PendingCancel, Cancelled) => true,
            _ => false,
        }
    }
}

impl fmt::Display for OrderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The deferred finishing call for an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationAction {
    End,
    Cancel,
}

impl TerminationAction {
    pub fn for_order_type(order_type: OrderType) -> Self {
        match order_type {
            OrderType::Activate => TerminationAction::End,
            OrderType::Accept => TerminationAction::Cancel,
        }
    }

    pub fn pending_state(self) -> OrderState {
        match self {
            TerminationAction::End => OrderState::PendingEnd,
            TerminationAction::Cancel => OrderState::PendingCancel,
        }
    }

    pub fn completed_state(self) -> OrderState {
        match self {
            TerminationAction::End => OrderState::Ended,
            TerminationAction::Cancel => OrderState::Cancelled,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TerminationAction::End => "end",
            TerminationAction::Cancel => "cancel",
        }
    }
}

impl fmt::Display for TerminationAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LifecycleError {
    #[error("order {order_number}: illegal transition {from} -> {to}")]
    IllegalTransition {
        order_number: String,
        from: OrderState,
        to: OrderState,
    },
}

/// Everything known about one order, from submission to its terminal state.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderResult {
    pub order_number: String,
    pub order_type: OrderType,
    pub batch_id: usize,
    pub remote_id: Option<String>,
    pub state: OrderState,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
    pub retry_count: u32,
    pub error: Option<String>,
}

impl OrderResult {
    /// A freshly created remote order.
    pub fn created(
        payload: &OrderPayload,
        batch_id: usize,
        remote_id: String,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            order_number: payload.order_number.clone(),
            order_type: payload.order_type,
            batch_id,
            remote_id: Some(remote_id),
            state: OrderState::Created,
            started_at,
            updated_at: Utc::now(),
            ended_at: None,
            duration_ms: None,
            retry_count: 0,
            error: None,
        }
    }

    /// An order that never obtained a remote id: creation failed or the run
    /// was cancelled first.
    pub fn unsubmitted(
        payload: &OrderPayload,
        batch_id: usize,
        started_at: DateTime<Utc>,
        state: OrderState,
        error: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            order_number: payload.order_number.clone(),
            order_type: payload.order_type,
            batch_id,
            remote_id: None,
            state,
            started_at,
            updated_at: now,
            ended_at: Some(now),
            duration_ms: Some(elapsed_ms(started_at, now)),
            retry_count: 0,
            error: Some(error),
        }
    }

    pub fn transition(&mut self, next: OrderState) -> Result<(), LifecycleError> {
        if !self.state.can_transition_to(next) {
            return Err(LifecycleError::IllegalTransition {
                order_number: self.order_number.clone(),
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Moves to a terminal state and stamps end time and duration.
    pub fn complete(
        &mut self,
        terminal: OrderState,
        error: Option<String>,
    ) -> Result<(), LifecycleError> {
        debug_assert!(terminal.is_terminal());
        self.transition(terminal)?;
        self.ended_at = Some(self.updated_at);
        self.duration_ms = Some(elapsed_ms(self.started_at, self.updated_at));
        if error.is_some() {
            self.error = error;
        }
        Ok(())
    }
}

fn elapsed_ms(start: DateTime<Utc>, end: DateTime<Utc>) -> u64 {
    u64::try_from((end - start).num_milliseconds()).unwrap_or(0)
}

//! Retry context and log templates shared by every order service call, so
//! breaker gating, retries and exhaustion read the same across operations.

use std::time::Duration;

use crate::service::circuit_breaker::CircuitState;
use crate::service::error::{ServiceError, ServiceOperation};

macro_rules! log_with_retry_ctx {
    ($level:ident, $ctx:expr, $($rest:tt)*) => {{
        let operation = $ctx.operation.as_str();
        if let Some(subject) = $ctx.subject {
            tracing::$level!(operation, subject, $($rest)*);
        } else {
            tracing::$level!(operation, $($rest)*);
        }
    }};
}

#[derive(Clone, Copy)]
pub(crate) struct RetryMessages {
    pub(crate) permit: &'static str,
    pub(crate) circuit_open: &'static str,
    pub(crate) retry: &'static str,
    pub(crate) rejected: &'static str,
    pub(crate) exhausted: &'static str,
}

/// Carries the operation and the order it concerns (order number before
/// creation, remote id afterwards) into every retry log line.
#[derive(Clone, Copy)]
pub(crate) struct RetryContext<'a> {
    operation: ServiceOperation,
    subject: Option<&'a str>,
    messages: &'static RetryMessages,
}

impl<'a> RetryContext<'a> {
    pub(crate) fn new(operation: ServiceOperation, subject: Option<&'a str>) -> Self {
        Self {
            operation,
            subject,
            messages: messages_for(operation),
        }
    }

    pub(crate) fn operation(&self) -> ServiceOperation {
        self.operation
    }

    pub(crate) fn log_permit(&self, state: CircuitState) {
        log_with_retry_ctx!(trace, self, breaker_state = ?state, "{}", self.messages.permit);
    }

    pub(crate) fn log_circuit_open(&self) {
        log_with_retry_ctx!(warn, self, "{}", self.messages.circuit_open);
    }

    pub(crate) fn log_success(&self, attempt: usize) {
        log_with_retry_ctx!(debug, self, attempt, "order service call succeeded");
    }

    pub(crate) fn log_retry(&self, attempt: usize, backoff: Duration, err: &ServiceError) {
        let backoff_ms = u64::try_from(backoff.as_millis()).unwrap_or(u64::MAX);
        log_with_retry_ctx!(
            warn,
            self,
            attempt,
            backoff_ms,
            error = %err,
            "{}",
            self.messages.retry
        );
    }

    pub(crate) fn log_rejected(&self, attempt: usize, err: &ServiceError) {
        log_with_retry_ctx!(warn, self, attempt, error = %err, "{}", self.messages.rejected);
    }

    pub(crate) fn log_exhausted(&self, attempt: usize, err: &ServiceError) {
        log_with_retry_ctx!(error, self, attempt, error = %err, "{}", self.messages.exhausted);
    }
}

fn messages_for(operation: ServiceOperation) -> &'static RetryMessages {
    match operation {
        ServiceOperation::Create => &CREATE_RETRY,
        ServiceOperation::Status => &STATUS_RETRY,
        ServiceOperation::Activate => &ACTIVATE_RETRY,
        ServiceOperation::Cancel => &CANCEL_RETRY,
        ServiceOperation::Finalize => &FINALIZE_RETRY,
    }
}

const CREATE_RETRY: RetryMessages = RetryMessages {
    permit: "circuit breaker permit acquired for order creation",
    circuit_open: "order service circuit breaker open; rejecting order creation",
    retry: "order creation failed; retrying",
    rejected: "order creation rejected by service; not retrying",
    exhausted: "order creation exhausted retries",
};

const STATUS_RETRY: RetryMessages = RetryMessages {
    permit: "circuit breaker permit acquired for status poll",
    circuit_open: "order service circuit breaker open; rejecting status poll",
    retry: "order status poll failed; retrying",
    rejected: "order status poll rejected by service; not retrying",
    exhausted: "order status poll exhausted retries",
};

const ACTIVATE_RETRY: RetryMessages = RetryMessages {
    permit: "circuit breaker permit acquired for activation",
    circuit_open: "order service circuit breaker open; rejecting activation",
    retry: "order activation failed; retrying",
    rejected: "order activation rejected by service; not retrying",
    exhausted: "order activation exhausted retries",
};

const CANCEL_RETRY: RetryMessages = RetryMessages {
    permit: "circuit breaker permit acquired for cancellation",
    circuit_open: "order service circuit breaker open; rejecting cancellation",
    retry: "order cancellation failed; retrying",
    rejected: "order cancellation rejected by service; not retrying",
    exhausted: "order cancellation exhausted retries",
};

const FINALIZE_RETRY: RetryMessages = RetryMessages {
    permit: "circuit breaker permit acquired for finalization",
    circuit_open: "order service circuit breaker open; rejecting finalization",
    retry: "order finalization failed; retrying",
    rejected: "order finalization rejected by service; not retrying",
    exhausted: "order finalization exhausted retries",
};

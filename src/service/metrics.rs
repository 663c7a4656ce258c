//! Per-operation request counters for the order service client.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;

use crate::service::circuit_breaker::CircuitState;
use crate::service::error::ServiceOperation;

#[derive(Debug, Default)]
struct OperationCounters {
    total_requests: AtomicU64,
    total_errors: AtomicU64,
    total_timeouts: AtomicU64,
    total_latency_ns: AtomicU64,
}

impl OperationCounters {
    fn record(&self, latency: Duration, error: bool) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        if error {
            self.total_errors.fetch_add(1, Ordering::Relaxed);
        }
        let nanos = u64::try_from(latency.as_nanos()).unwrap_or(u64::MAX);
        self.total_latency_ns.fetch_add(nanos, Ordering::Relaxed);
    }

    fn snapshot(&self, operation: ServiceOperation) -> OperationMetricsSnapshot {
        let total_requests = self.total_requests.load(Ordering::Relaxed);
        let total_errors = self.total_errors.load(Ordering::Relaxed);
        let total_latency_ns = self.total_latency_ns.load(Ordering::Relaxed);

        let (average_latency_ms, error_rate) = if total_requests == 0 {
            (0.0, 0.0)
        } else {
            (
                (total_latency_ns as f64 / total_requests as f64) / 1_000_000.0,
                total_errors as f64 / total_requests as f64,
            )
        };

        OperationMetricsSnapshot {
            operation,
            total_requests,
            total_errors,
            total_timeouts: self.total_timeouts.load(Ordering::Relaxed),
            average_latency_ms,
            error_rate,
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct ServiceMetrics {
    operations: [OperationCounters; ServiceOperation::ALL.len()],
}

impl ServiceMetrics {
    pub(crate) fn record_success(&self, operation: ServiceOperation, latency: Duration) {
        self.operations[operation.index()].record(latency, false);
    }

    pub(crate) fn record_failure(&self, operation: ServiceOperation, latency: Duration) {
        self.operations[operation.index()].record(latency, true);
    }

    pub(crate) fn record_timeout(&self, operation: ServiceOperation, latency: Duration) {
        let counters = &self.operations[operation.index()];
        counters.record(latency, true);
        counters.total_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self, breaker_state: CircuitState) -> ServiceMetricsSnapshot {
        ServiceMetricsSnapshot {
            operations: ServiceOperation::ALL
                .iter()
                .map(|operation| self.operations[operation.index()].snapshot(*operation))
                .collect(),
            breaker_state,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationMetricsSnapshot {
    pub operation: ServiceOperation,
    pub total_requests: u64,
    pub total_errors: u64,
    pub total_timeouts: u64,
    pub average_latency_ms: f64,
    pub error_rate: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceMetricsSnapshot {
    pub operations: Vec<OperationMetricsSnapshot>,
    pub breaker_state: CircuitState,
}

impl ServiceMetricsSnapshot {
    pub fn operation(&self, operation: ServiceOperation) -> Option<&OperationMetricsSnapshot> {
        self.operations
            .iter()
            .find(|snapshot| snapshot.operation == operation)
    }

    pub fn total_requests(&self) -> u64 {
        self.operations.iter().map(|s| s.total_requests).sum()
    }
}

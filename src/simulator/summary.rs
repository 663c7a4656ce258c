use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::runtime::telemetry::TelemetrySnapshot;
use crate::service::ServiceMetricsSnapshot;
use crate::simulator::coordinator::{BatchResult, CoordinatorOutcome};
use crate::simulator::state::{OrderResult, OrderState};
use crate::simulator::termination::TerminationReport;

/// Final view of a run, built once every task has stopped writing.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationSummary {
    pub total_orders: usize,
    /// Orders that reached `Ended` or `Cancelled`.
    pub successful_orders: usize,
    pub failed_orders: usize,
    pub interrupted_orders: usize,
    /// Orders handed off whose termination never ran.
    pub pending_orders: usize,
    pub state_counts: BTreeMap<OrderState, usize>,
    pub average_order_duration_ms: Option<u64>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub batches: Vec<BatchResult>,
    pub terminations: TerminationReport,
    pub telemetry: TelemetrySnapshot,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service: Option<ServiceMetricsSnapshot>,
    pub orders: Vec<OrderResult>,
}

impl SimulationSummary {
    pub fn build(
        orders: Vec<OrderResult>,
        outcome: CoordinatorOutcome,
        terminations: TerminationReport,
        telemetry: TelemetrySnapshot,
        service: Option<ServiceMetricsSnapshot>,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
    ) -> Self {
        let mut state_counts = BTreeMap::new();
        for order in &orders {
            *state_counts.entry(order.state).or_insert(0) += 1;
        }
        let count = |states: &[OrderState]| -> usize {
            states
                .iter()
                .map(|state| state_counts.get(state).copied().unwrap_or(0))
                .sum()
        };

        let successful_orders = count(&[OrderState::Ended, OrderState::Cancelled]);
        let failed_orders = count(&[OrderState::Failed]);
        let interrupted_orders = count(&[OrderState::Interrupted]);
        let pending_orders = count(&[OrderState::PendingEnd, OrderState::PendingCancel]);

        let durations: Vec<u64> = orders.iter().filter_map(|order| order.duration_ms).collect();
        let average_order_duration_ms = if durations.is_empty() {
            None
        } else {
            Some(durations.iter().sum::<u64>() / durations.len() as u64)
        };

        Self {
            total_orders: orders.len().max(outcome.total_orders),
            successful_orders,
            failed_orders,
            interrupted_orders,
            pending_orders,
            state_counts,
            average_order_duration_ms,
            started_at,
            finished_at,
            duration_ms: u64::try_from((finished_at - started_at).num_milliseconds()).unwrap_or(0),
            batches: outcome.batches,
            terminations,
            telemetry,
            service,
            orders,
        }
    }

    pub fn success_rate(&self) -> f64 {
        if self.total_orders == 0 {
            return 0.0;
        }
        self.successful_orders as f64 * 100.0 / self.total_orders as f64
    }

    pub fn failures(&self) -> impl Iterator<Item = &OrderResult> {
        self.orders
            .iter()
            .filter(|order| order.state == OrderState::Failed)
    }
}

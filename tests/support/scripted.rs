use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicU64, Ordering},
        Mutex,
    },
    time::Duration,
};

use futures::future::BoxFuture;
use gameday::service::{ServiceError, ServiceOperation};
use gameday::{OrderPayload, RemoteOrderService, RemoteStatus};

/// In-process order service with per-order-number failure scripting.
#[derive(Default)]
pub struct ScriptedOrderService {
    next_id: AtomicU64,
    pending_polls: u32,
    call_delay: Duration,
    reject_create: HashSet<String>,
    remote_failure: HashSet<String>,
    fail_terminations: bool,
    state: Mutex<ScriptedState>,
}

#[derive(Default)]
struct ScriptedState {
    orders: HashMap<String, (String, u32)>,
    calls: Vec<(ServiceOperation, String)>,
}

impl ScriptedOrderService {
    pub fn new(pending_polls: u32) -> Self {
        Self {
            pending_polls,
            ..Self::default()
        }
    }

    pub fn with_call_delay(mut self, delay: Duration) -> Self {
        self.call_delay = delay;
        self
    }

    pub fn reject_create(mut self, order_number: &str) -> Self {
        self.reject_create.insert(order_number.to_string());
        self
    }

    pub fn remote_failure(mut self, order_number: &str) -> Self {
        self.remote_failure.insert(order_number.to_string());
        self
    }

    pub fn fail_terminations(mut self) -> Self {
        self.fail_terminations = true;
        self
    }

    pub fn calls(&self) -> Vec<(ServiceOperation, String)> {
        self.state.lock().expect("scripted state").calls.clone()
    }

    pub fn count(&self, operation: ServiceOperation) -> usize {
        self.calls()
            .iter()
            .filter(|(op, _)| *op == operation)
            .count()
    }

    fn record(&self, operation: ServiceOperation, subject: &str) {
        self.state
            .lock()
            .expect("scripted state")
            .calls
            .push((operation, subject.to_string()));
    }

    async fn pause(&self) {
        if !self.call_delay.is_zero() {
            tokio::time::sleep(self.call_delay).await;
        }
    }

    fn rejected(operation: ServiceOperation, message: &str) -> ServiceError {
        ServiceError::Http {
            operation,
            status: 422,
            kind: Some("validation".to_string()),
            message: message.to_string(),
        }
    }
}

impl RemoteOrderService for ScriptedOrderService {
    fn create<'a>(&'a self, payload: &'a OrderPayload) -> BoxFuture<'a, Result<String, ServiceError>> {
        Box::pin(async move {
            self.record(ServiceOperation::Create, &payload.order_number);
            self.pause().await;
            if self.reject_create.contains(&payload.order_number) {
                return Err(Self::rejected(ServiceOperation::Create, "invalid geometry"));
            }
            let id = format!("scripted-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
            self.state
                .lock()
                .expect("scripted state")
                .orders
                .insert(id.clone(), (payload.order_number.clone(), self.pending_polls));
            Ok(id)
        })
    }

    fn status<'a>(&'a self, remote_id: &'a str) -> BoxFuture<'a, Result<RemoteStatus, ServiceError>> {
        Box::pin(async move {
            self.record(ServiceOperation::Status, remote_id);
            self.pause().await;
            let mut state = self.state.lock().expect("scripted state");
            let Some((order_number, remaining)) = state.orders.get_mut(remote_id) else {
                return Err(Self::rejected(ServiceOperation::Status, "unknown order"));
            };
            if self.remote_failure.contains(order_number.as_str()) {
                return Ok(RemoteStatus::Failed);
            }
            if *remaining > 0 {
                *remaining -= 1;
                return Ok(RemoteStatus::Pending);
            }
            Ok(RemoteStatus::Ready)
        })
    }

    fn activate<'a>(&'a self, remote_id: &'a str) -> BoxFuture<'a, Result<(), ServiceError>> {
        Box::pin(async move {
            self.record(ServiceOperation::Activate, remote_id);
            self.pause().await;
            Ok(())
        })
    }

    fn cancel<'a>(&'a self, remote_id: &'a str) -> BoxFuture<'a, Result<(), ServiceError>> {
        Box::pin(async move {
            self.record(ServiceOperation::Cancel, remote_id);
            self.pause().await;
            if self.fail_terminations {
                return Err(Self::rejected(ServiceOperation::Cancel, "cannot cancel"));
            }
            Ok(())
        })
    }

    fn finalize<'a>(&'a self, remote_id: &'a str) -> BoxFuture<'a, Result<(), ServiceError>> {
        Box::pin(async move {
            self.record(ServiceOperation::Finalize, remote_id);
            self.pause().await;
            if self.fail_terminations {
                return Err(Self::rejected(ServiceOperation::Finalize, "cannot end"));
            }
            Ok(())
        })
    }
}

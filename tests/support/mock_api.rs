use std::{
    collections::{HashMap, HashSet, VecDeque},
    convert::Infallible,
    sync::{Arc, Mutex},
};

use anyhow::{Context, Result};
use hyper::service::{make_service_fn, service_fn};
use hyper::{body, Body, Method, Request, Response, Server, StatusCode};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// One request as the mock order API saw it.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub method: Method,
    pub path: String,
    pub order_id: Option<String>,
    pub authorization: Option<String>,
    pub body: Value,
}

#[derive(Debug, Clone)]
struct MockOrder {
    order_number: String,
    polls_until_accepted: u32,
    failed: bool,
}

#[derive(Default)]
struct MockApiInner {
    next_id: u64,
    orders: HashMap<String, MockOrder>,
    calls: Vec<RecordedCall>,
    scripted_failures: VecDeque<(String, u16)>,
    rejected_orders: HashSet<String>,
    failing_orders: HashSet<String>,
    tokens_issued: u64,
}

/// In-memory order service speaking the REST contract of the real one.
#[derive(Clone)]
pub struct MockOrderApi {
    inner: Arc<Mutex<MockApiInner>>,
    pending_polls: u32,
}

impl MockOrderApi {
    /// Every new order answers `Pending` to `pending_polls` status checks
    /// before it turns `Accepted`.
    pub fn new(pending_polls: u32) -> Self {
        Self {
            inner: Arc::new(Mutex::new(MockApiInner::default())),
            pending_polls,
        }
    }

    /// The next request to `path` fails with `status`.
    pub fn fail_next(&self, path: &str, status: u16) {
        self.lock()
            .scripted_failures
            .push_back((path.to_string(), status));
    }

    /// Creates for this order number are rejected with 422.
    pub fn reject_order(&self, order_number: &str) {
        self.lock().rejected_orders.insert(order_number.to_string());
    }

    /// This order number is accepted on create but reports `Failed`.
    pub fn fail_order(&self, order_number: &str) {
        self.lock().failing_orders.insert(order_number.to_string());
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.lock().calls.clone()
    }

    pub fn calls_to(&self, path: &str) -> Vec<RecordedCall> {
        self.lock()
            .calls
            .iter()
            .filter(|call| call.path == path)
            .cloned()
            .collect()
    }

    pub fn tokens_issued(&self) -> u64 {
        self.lock().tokens_issued
    }

    pub fn order_number_for(&self, order_id: &str) -> Option<String> {
        self.lock()
            .orders
            .get(order_id)
            .map(|order| order.order_number.clone())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockApiInner> {
        self.inner.lock().expect("mock api poisoned")
    }

    fn handle(
        &self,
        method: Method,
        path: &str,
        query: Option<&str>,
        authorization: Option<String>,
        body: Value,
    ) -> (StatusCode, Value) {
        let mut inner = self.lock();
        let order_id = query
            .and_then(|query| {
                query
                    .split('&')
                    .find_map(|pair| pair.strip_prefix("orderId="))
                    .map(str::to_string)
            })
            .or_else(|| body.get("orderId").and_then(Value::as_str).map(str::to_string));
        inner.calls.push(RecordedCall {
            method: method.clone(),
            path: path.to_string(),
            order_id: order_id.clone(),
            authorization,
            body: body.clone(),
        });

        if let Some(position) = inner
            .scripted_failures
            .iter()
            .position(|(failing, _)| failing == path)
        {
            if let Some((_, status)) = inner.scripted_failures.remove(position) {
                let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
                return (
                    status,
                    json!({"error": "scripted", "message": format!("scripted failure on {path}")}),
                );
            }
        }

        match (method, path) {
            (Method::POST, "/oauth/token") => {
                inner.tokens_issued += 1;
                (
                    StatusCode::OK,
                    json!({"access_token": "test-token", "token_type": "Bearer", "expires_in": 3600}),
                )
            }
            (Method::POST, "/operation/payload") => {
                let order_number = body
                    .get("orderNumber")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                if inner.rejected_orders.contains(&order_number) {
                    return (
                        StatusCode::UNPROCESSABLE_ENTITY,
                        json!({"error": "validation", "message": format!("order {order_number} rejected")}),
                    );
                }
                inner.next_id += 1;
                let id = format!("order-{}", inner.next_id);
                let failed = inner.failing_orders.contains(&order_number);
                inner.orders.insert(
                    id.clone(),
                    MockOrder {
                        order_number,
                        polls_until_accepted: self.pending_polls,
                        failed,
                    },
                );
                (StatusCode::OK, json!({"orderId": id, "status": "Pending"}))
            }
            (Method::GET, "/details") => {
                let Some(order) = order_id.as_ref().and_then(|id| inner.orders.get_mut(id)) else {
                    return (StatusCode::NOT_FOUND, json!({"error": "not_found", "message": "unknown order"}));
                };
                let status = if order.failed {
                    "Failed"
                } else if order.polls_until_accepted > 0 {
                    order.polls_until_accepted -= 1;
                    "Pending"
                } else {
                    "Accepted"
                };
                (StatusCode::OK, json!({"orderId": order_id, "status": status}))
            }
            (Method::POST, "/activate") | (Method::POST, "/cancel") | (Method::POST, "/end") => {
                match order_id.filter(|id| inner.orders.contains_key(id)) {
                    Some(id) => (StatusCode::OK, json!({"orderId": id, "status": "OK"})),
                    None => (StatusCode::NOT_FOUND, json!({"error": "not_found", "message": "unknown order"})),
                }
            }
            _ => (StatusCode::NOT_FOUND, json!({"error": "not_found", "message": "no route"})),
        }
    }
}

pub struct MockApiServer {
    url: String,
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl MockApiServer {
    pub async fn start(api: MockOrderApi) -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .context("failed to bind mock API listener")?;
        let addr = listener
            .local_addr()
            .context("failed to read mock listener address")?;
        let std_listener = listener
            .into_std()
            .context("failed to convert mock listener")?;
        std_listener
            .set_nonblocking(true)
            .context("failed to set mock listener non-blocking")?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let make_service = make_service_fn(move |_| {
            let api = api.clone();
            async move { Ok::<_, Infallible>(service_fn(move |req| serve_request(api.clone(), req))) }
        });

        let server = Server::from_tcp(std_listener)
            .context("failed to build mock HTTP server")?
            .serve(make_service);
        let graceful = server.with_graceful_shutdown(async {
            let _ = shutdown_rx.await;
        });

        let handle = tokio::spawn(async move {
            if let Err(err) = graceful.await {
                eprintln!("mock order API stopped: {err}");
            }
        });

        Ok(Self {
            url: format!("http://{}", addr),
            shutdown: Some(shutdown_tx),
            handle: Some(handle),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

async fn serve_request(api: MockOrderApi, req: Request<Body>) -> Result<Response<Body>, Infallible> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let query = req.uri().query().map(str::to_string);
    let authorization = req
        .headers()
        .get(hyper::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);

    let bytes = match body::to_bytes(req.into_body()).await {
        Ok(bytes) => bytes,
        Err(err) => {
            let mut response = Response::new(Body::from(format!("failed to read body: {err}")));
            *response.status_mut() = StatusCode::BAD_REQUEST;
            return Ok(response);
        }
    };
    // Token requests are form-encoded; everything else is JSON.
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);

    let (status, value) = api.handle(method, &path, query.as_deref(), authorization, body);
    let mut response = Response::new(Body::from(value.to_string()));
    *response.status_mut() = status;
    response.headers_mut().insert(
        hyper::header::CONTENT_TYPE,
        hyper::header::HeaderValue::from_static("application/json"),
    );
    Ok(response)
}

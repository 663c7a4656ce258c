//! REST client for the remote order service and the `RemoteOrderService`
//! trait the lifecycle driver and termination worker are written against.

use std::future::Future;
use std::sync::Arc;

use anyhow::{Context, Result};
use futures::future::BoxFuture;
use reqwest::{Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::time::{sleep, timeout, Instant};

use crate::payload::OrderPayload;
use crate::service::auth::TokenManager;
use crate::service::circuit_breaker::{CircuitBreakerError, ServiceCircuitBreaker};
use crate::service::error::{ServiceError, ServiceOperation};
use crate::service::metrics::{ServiceMetrics, ServiceMetricsSnapshot};
use crate::service::models::{
    CreateOrderResponse, ErrorResponse, OrderActionRequest, OrderActionResponse,
    OrderDetailsResponse, RemoteStatus,
};
use crate::service::options::ServiceClientOptions;
use crate::service::retry::RetryContext;

const CREATE_PATH: &str = "/operation/payload";
const DETAILS_PATH: &str = "/details";
const ACTIVATE_PATH: &str = "/activate";
const CANCEL_PATH: &str = "/cancel";
const FINALIZE_PATH: &str = "/end";

/// The remote order workflow. Implementations handle their own transport
/// retries; callers treat every error they see as final for that call.
pub trait RemoteOrderService: Send + Sync {
    /// Submits a payload and returns the remote order id.
    fn create<'a>(&'a self, payload: &'a OrderPayload) -> BoxFuture<'a, Result<String, ServiceError>>;

    fn status<'a>(&'a self, remote_id: &'a str) -> BoxFuture<'a, Result<RemoteStatus, ServiceError>>;

    fn activate<'a>(&'a self, remote_id: &'a str) -> BoxFuture<'a, Result<(), ServiceError>>;

    fn cancel<'a>(&'a self, remote_id: &'a str) -> BoxFuture<'a, Result<(), ServiceError>>;

    fn finalize<'a>(&'a self, remote_id: &'a str) -> BoxFuture<'a, Result<(), ServiceError>>;

    /// Transport metrics, when the implementation keeps any.
    fn metrics(&self) -> Option<ServiceMetricsSnapshot> {
        None
    }
}

#[derive(Debug, Clone)]
pub struct HttpOrderService {
    base_url: Arc<String>,
    client: reqwest::Client,
    options: ServiceClientOptions,
    auth: Option<Arc<TokenManager>>,
    metrics: Arc<ServiceMetrics>,
    breaker: Arc<ServiceCircuitBreaker>,
}

impl RemoteOrderService for HttpOrderService {
    fn create<'a>(&'a self, payload: &'a OrderPayload) -> BoxFuture<'a, Result<String, ServiceError>> {
        Box::pin(self.create_order(payload))
    }

    fn status<'a>(&'a self, remote_id: &'a str) -> BoxFuture<'a, Result<RemoteStatus, ServiceError>> {
        Box::pin(self.order_status(remote_id))
    }

    fn activate<'a>(&'a self, remote_id: &'a str) -> BoxFuture<'a, Result<(), ServiceError>> {
        Box::pin(self.order_action(ServiceOperation::Activate, ACTIVATE_PATH, remote_id))
    }

    fn cancel<'a>(&'a self, remote_id: &'a str) -> BoxFuture<'a, Result<(), ServiceError>> {
        Box::pin(self.order_action(ServiceOperation::Cancel, CANCEL_PATH, remote_id))
    }

    fn finalize<'a>(&'a self, remote_id: &'a str) -> BoxFuture<'a, Result<(), ServiceError>> {
        Box::pin(self.order_action(ServiceOperation::Finalize, FINALIZE_PATH, remote_id))
    }

    fn metrics(&self) -> Option<ServiceMetricsSnapshot> {
        Some(self.metrics_snapshot())
    }
}

impl HttpOrderService {
    pub fn new(base_url: impl Into<String>, options: ServiceClientOptions) -> Result<Self> {
        let breaker = Arc::new(ServiceCircuitBreaker::new(
            options.breaker_threshold,
            options.breaker_cooldown,
        ));
        Self::with_breaker(base_url, options, breaker)
    }

    pub fn with_breaker(
        base_url: impl Into<String>,
        options: ServiceClientOptions,
        breaker: Arc<ServiceCircuitBreaker>,
    ) -> Result<Self> {
        options.validate()?;
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let client = reqwest::Client::builder()
            .timeout(options.request_timeout)
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            base_url: Arc::new(base_url),
            client,
            options,
            auth: None,
            metrics: Arc::new(ServiceMetrics::default()),
            breaker,
        })
    }

    /// Attaches bearer-token authentication to every request.
    pub fn with_auth(mut self, auth: Arc<TokenManager>) -> Self {
        self.auth = Some(auth);
        self
    }

    /// The underlying HTTP client, for sharing its connection pool.
    pub fn http_client(&self) -> &reqwest::Client {
        &self.client
    }

    pub fn endpoint(&self) -> &str {
        &self.base_url
    }

    pub fn metrics_snapshot(&self) -> ServiceMetricsSnapshot {
        self.metrics.snapshot(self.breaker.snapshot().state)
    }

    pub async fn create_order(&self, payload: &OrderPayload) -> Result<String, ServiceError> {
        let context = RetryContext::new(ServiceOperation::Create, Some(&payload.order_number));
        let response: CreateOrderResponse = self
            .retry_with_breaker(context, || {
                self.send(ServiceOperation::Create, Method::POST, CREATE_PATH, |request| {
                    request.json(payload)
                })
            })
            .await?;

        tracing::debug!(
            order_number = %payload.order_number,
            remote_id = %response.order_id,
            status = response.status.as_deref().unwrap_or_default(),
            "order created"
        );
        Ok(response.order_id)
    }

    pub async fn order_status(&self, remote_id: &str) -> Result<RemoteStatus, ServiceError> {
        let context = RetryContext::new(ServiceOperation::Status, Some(remote_id));
        let response: OrderDetailsResponse = self
            .retry_with_breaker(context, || {
                self.send(ServiceOperation::Status, Method::GET, DETAILS_PATH, |request| {
                    request.query(&[("orderId", remote_id)])
                })
            })
            .await?;
        Ok(RemoteStatus::from_wire(&response.status))
    }

    async fn order_action(
        &self,
        operation: ServiceOperation,
        path: &'static str,
        remote_id: &str,
    ) -> Result<(), ServiceError> {
        let context = RetryContext::new(operation, Some(remote_id));
        let body = OrderActionRequest {
            order_id: remote_id,
        };
        let response: OrderActionResponse = self
            .retry_with_breaker(context, || {
                self.send(operation, Method::POST, path, |request| request.json(&body))
            })
            .await?;

        tracing::debug!(
            operation = operation.as_str(),
            remote_id,
            status = response.status.as_deref().unwrap_or_default(),
            "order action applied"
        );
        Ok(())
    }

    /// Breaker gating, metrics, exponential backoff and retry logging around
    /// a single-attempt operation.
    async fn retry_with_breaker<T, F, Fut>(
        &self,
        context: RetryContext<'_>,
        mut operation: F,
    ) -> Result<T, ServiceError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ServiceError>>,
    {
        let mut attempt = 0;

        loop {
            match self.breaker.before_request() {
                Ok(state) => context.log_permit(state),
                Err(CircuitBreakerError::CircuitOpen) => {
                    context.log_circuit_open();
                    return Err(ServiceError::CircuitOpen);
                }
            }

            attempt += 1;
            let start = Instant::now();

            match operation().await {
                Ok(value) => {
                    self.metrics
                        .record_success(context.operation(), start.elapsed());
                    self.breaker.record_success();
                    context.log_success(attempt);
                    return Ok(value);
                }
                Err(err) => {
                    let elapsed = start.elapsed();
                    if matches!(err, ServiceError::Timeout { .. }) {
                        self.metrics.record_timeout(context.operation(), elapsed);
                    } else {
                        self.metrics.record_failure(context.operation(), elapsed);
                    }

                    if err.counts_against_breaker() {
                        self.breaker.record_failure();
                    } else {
                        self.breaker.record_success();
                    }

                    if !err.is_retryable() {
                        context.log_rejected(attempt, &err);
                        return Err(err);
                    }
                    if attempt >= self.options.max_attempts {
                        context.log_exhausted(attempt, &err);
                        return Err(err);
                    }

                    let backoff = self.options.backoff_delay(attempt);
                    context.log_retry(attempt, backoff, &err);
                    sleep(backoff).await;
                }
            }
        }
    }

    async fn send<T, B>(
        &self,
        operation: ServiceOperation,
        method: Method,
        path: &str,
        build: B,
    ) -> Result<T, ServiceError>
    where
        T: DeserializeOwned,
        B: FnOnce(RequestBuilder) -> RequestBuilder,
    {
        let url = format!("{}{}", self.base_url, path);
        let mut request = build(self.client.request(method, url));
        if let Some(auth) = &self.auth {
            request = request.bearer_auth(auth.token().await?);
        }

        let response = timeout(self.options.request_timeout, request.send())
            .await
            .map_err(|_| ServiceError::Timeout { operation })?
            .map_err(|source| classify_transport(operation, source))?;

        let status = response.status();
        let body = timeout(self.options.request_timeout, response.bytes())
            .await
            .map_err(|_| ServiceError::Timeout { operation })?
            .map_err(|source| classify_transport(operation, source))?;

        if !status.is_success() {
            if status == reqwest::StatusCode::UNAUTHORIZED {
                if let Some(auth) = &self.auth {
                    auth.invalidate().await;
                }
            }
            return Err(http_error(operation, status.as_u16(), &body));
        }

        let body: &[u8] = if body.iter().all(u8::is_ascii_whitespace) {
            b"{}"
        } else {
            &body
        };
        serde_json::from_slice(body).map_err(|err| ServiceError::Decode {
            operation,
            message: err.to_string(),
        })
    }
}

fn classify_transport(operation: ServiceOperation, source: reqwest::Error) -> ServiceError {
    if source.is_timeout() {
        ServiceError::Timeout { operation }
    } else {
        ServiceError::Transport { operation, source }
    }
}

fn http_error(operation: ServiceOperation, status: u16, body: &[u8]) -> ServiceError {
    let parsed: ErrorResponse = serde_json::from_slice(body).unwrap_or_default();
    let message = parsed
        .message
        .or(parsed.error.clone())
        .unwrap_or_else(|| String::from_utf8_lossy(body).trim().to_string());
    ServiceError::Http {
        operation,
        status,
        kind: parsed.error_type.or(parsed.error),
        message,
    }
}

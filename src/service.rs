//! Remote order service boundary. The simulator only sees the
//! [`RemoteOrderService`] trait; [`HttpOrderService`] is the REST
//! implementation with retries, a circuit breaker, per-operation metrics and
//! optional OAuth bearer tokens.

pub mod auth;
pub mod circuit_breaker;
pub mod client;
pub mod error;
pub mod metrics;
pub mod models;
pub mod options;
mod retry;

pub use auth::{OAuthSettings, TokenManager};
pub use circuit_breaker::{CircuitState, ServiceCircuitBreaker};
pub use client::{HttpOrderService, RemoteOrderService};
pub use error::{ServiceError, ServiceOperation};
pub use metrics::{OperationMetricsSnapshot, ServiceMetricsSnapshot};
pub use models::RemoteStatus;
pub use options::ServiceClientOptions;

//! Wire shapes of the order service REST API.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderResponse {
    pub order_id: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderDetailsResponse {
    #[serde(default)]
    pub order_id: Option<String>,
    pub status: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderActionRequest<'a> {
    pub order_id: &'a str,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderActionResponse {
    #[serde(default)]
    pub order_id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub error_type: Option<String>,
}

/// Readiness as reported by the status endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteStatus {
    Pending,
    Ready,
    Failed,
}

impl RemoteStatus {
    /// `Accepted` means ready and `Failed` is terminal. Anything else is
    /// still in progress. Matching ignores case.
    pub fn from_wire(status: &str) -> Self {
        if status.eq_ignore_ascii_case("accepted") {
            RemoteStatus::Ready
        } else if status.eq_ignore_ascii_case("failed") {
            RemoteStatus::Failed
        } else {
            RemoteStatus::Pending
        }
    }
}

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::geometry::LineGeometry;

/// Which continuation an order runs once the remote service accepts it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderType {
    /// Activated, then finalized.
    #[serde(rename = "activate")]
    Activate,
    /// Left accepted, then cancelled.
    #[serde(rename = "accepted")]
    Accept,
}

impl OrderType {
    pub fn as_str(self) -> &'static str {
        match self {
            OrderType::Activate => "activate",
            OrderType::Accept => "accepted",
        }
    }
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One unit of work. Built once by the payload factory and never mutated.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderPayload {
    pub order_number: String,
    #[serde(rename = "type")]
    pub order_type: OrderType,
    pub location: String,
    pub poc_order: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub custom_fields: Map<String, Value>,
    pub geometry: LineGeometry,
}

use std::fmt;

use serde::Serialize;
use thiserror::Error;

/// The five remote calls an order can make.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceOperation {
    Create,
    Status,
    Activate,
    Cancel,
    Finalize,
}

impl ServiceOperation {
    pub const ALL: [ServiceOperation; 5] = [
        ServiceOperation::Create,
        ServiceOperation::Status,
        ServiceOperation::Activate,
        ServiceOperation::Cancel,
        ServiceOperation::Finalize,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ServiceOperation::Create => "create",
            ServiceOperation::Status => "status",
            ServiceOperation::Activate => "activate",
            ServiceOperation::Cancel => "cancel",
            ServiceOperation::Finalize => "finalize",
        }
    }

    pub(crate) fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for ServiceOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{operation} request timed out")]
    Timeout { operation: ServiceOperation },
    #[error("order service circuit breaker is open")]
    CircuitOpen,
    #[error("{operation} returned HTTP {status}: {message}")]
    Http {
        operation: ServiceOperation,
        status: u16,
        kind: Option<String>,
        message: String,
    },
    #[error("{operation} transport failure: {source}")]
    Transport {
        operation: ServiceOperation,
        #[source]
        source: reqwest::Error,
    },
    #[error("{operation} response could not be decoded: {message}")]
    Decode {
        operation: ServiceOperation,
        message: String,
    },
    #[error("authentication failed: {0}")]
    Auth(String),
}

impl ServiceError {
    /// Timeouts, transport failures, throttling and server errors are worth
    /// another attempt. Other client errors are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            ServiceError::Timeout { .. } | ServiceError::Transport { .. } => true,
            ServiceError::Http { status, .. } => *status == 429 || *status >= 500,
            ServiceError::CircuitOpen | ServiceError::Decode { .. } | ServiceError::Auth(_) => {
                false
            }
        }
    }

    /// Whether the failure says something about the health of the service
    /// itself, as opposed to the individual request.
    pub(crate) fn counts_against_breaker(&self) -> bool {
        match self {
            ServiceError::Http { status, .. } => *status >= 500,
            ServiceError::Timeout { .. } | ServiceError::Transport { .. } => true,
            _ => false,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            ServiceError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}

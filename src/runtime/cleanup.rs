use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::runtime::operations::{find_operations_file, read_order_ids};
use crate::service::{RemoteOrderService, RemoteStatus, ServiceError};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Ids left untouched because the cleanup was cancelled.
    pub skipped: usize,
}

/// Terminates every order recorded in an operations log: orders the service
/// reports as accepted are cancelled, everything else is ended.
pub struct Cleaner {
    service: Arc<dyn RemoteOrderService>,
    operations_dir: PathBuf,
    shutdown: CancellationToken,
}

impl Cleaner {
    pub fn new(service: Arc<dyn RemoteOrderService>, operations_dir: impl Into<PathBuf>) -> Self {
        Self {
            service,
            operations_dir: operations_dir.into(),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_cancellation_token(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub async fn cleanup_by_timestamp(&self, timestamp: &str) -> Result<CleanupSummary> {
        let path = find_operations_file(&self.operations_dir, timestamp)
            .await
            .context("failed to find operations file")?;
        let ids = read_order_ids(&path)
            .await
            .context("failed to read order ids")?;
        tracing::info!(path = %path.display(), orders = ids.len(), "starting cleanup");

        let mut summary = CleanupSummary {
            total: ids.len(),
            ..CleanupSummary::default()
        };

        for (index, remote_id) in ids.iter().enumerate() {
            if self.shutdown.is_cancelled() {
                summary.skipped = ids.len() - index;
                tracing::warn!(skipped = summary.skipped, "cleanup cancelled");
                break;
            }

            tracing::info!(
                remote_id = %remote_id,
                progress = %format!("{}/{}", index + 1, ids.len()),
                "processing order"
            );
            match self.cleanup_order(remote_id).await {
                Ok(()) => summary.succeeded += 1,
                Err(err) => {
                    tracing::error!(remote_id = %remote_id, error = %err, "failed to clean up order");
                    summary.failed += 1;
                }
            }
        }

        tracing::info!(
            total = summary.total,
            succeeded = summary.succeeded,
            failed = summary.failed,
            "cleanup complete"
        );
        Ok(summary)
    }

    async fn cleanup_order(&self, remote_id: &str) -> Result<(), ServiceError> {
        let status = self.service.status(remote_id).await?;
        tracing::debug!(remote_id = %remote_id, status = ?status, "order status retrieved");

        if status == RemoteStatus::Ready {
            tracing::info!(remote_id = %remote_id, "cancelling accepted order");
            self.service.cancel(remote_id).await
        } else {
            tracing::info!(remote_id = %remote_id, status = ?status, "ending order");
            self.service.finalize(remote_id).await
        }
    }
}

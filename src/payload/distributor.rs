use std::collections::HashSet;

use serde::Serialize;
use thiserror::Error;

use crate::payload::types::OrderPayload;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DistributionError {
    #[error("no payloads to distribute")]
    Empty,
    #[error("batch_size must be greater than 0")]
    ZeroBatchSize,
    #[error("batch {batch_id} is empty")]
    EmptyBatch { batch_id: usize },
    #[error("batch id {batch_id} appears more than once")]
    DuplicateBatchId { batch_id: usize },
    #[error("order {order_number} appears in more than one batch")]
    DuplicateOrder { order_number: String },
}

/// A non-empty run of payloads processed sequentially by one worker.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub id: usize,
    pub payloads: Vec<OrderPayload>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.payloads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payloads.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchStats {
    pub total_batches: usize,
    pub total_orders: usize,
    pub min_batch_size: usize,
    pub max_batch_size: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct Distributor {
    batch_size: usize,
}

impl Distributor {
    pub fn new(batch_size: usize) -> Result<Self, DistributionError> {
        if batch_size == 0 {
            return Err(DistributionError::ZeroBatchSize);
        }
        Ok(Self { batch_size })
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Splits `payloads` into `ceil(len / batch_size)` batches with ids
    /// starting at 1, preserving order. Only the last batch may be short.
    pub fn distribute(&self, payloads: Vec<OrderPayload>) -> Result<Vec<Batch>, DistributionError> {
        if payloads.is_empty() {
            return Err(DistributionError::Empty);
        }

        let mut batches = Vec::with_capacity(payloads.len().div_ceil(self.batch_size));
        let mut remaining = payloads.into_iter();
        loop {
            let chunk: Vec<OrderPayload> = remaining.by_ref().take(self.batch_size).collect();
            if chunk.is_empty() {
                break;
            }
            batches.push(Batch {
                id: batches.len() + 1,
                payloads: chunk,
            });
        }

        tracing::debug!(
            batches = batches.len(),
            batch_size = self.batch_size,
            "distributed payloads"
        );
        Ok(batches)
    }
}

pub fn stats(batches: &[Batch]) -> BatchStats {
    BatchStats {
        total_batches: batches.len(),
        total_orders: batches.iter().map(Batch::len).sum(),
        min_batch_size: batches.iter().map(Batch::len).min().unwrap_or(0),
        max_batch_size: batches.iter().map(Batch::len).max().unwrap_or(0),
    }
}

/// Checks the partition invariants: unique batch ids, no empty batch, and no
/// order number in two batches.
pub fn validate(batches: &[Batch]) -> Result<(), DistributionError> {
    let mut ids = HashSet::with_capacity(batches.len());
    let mut orders = HashSet::new();
    for batch in batches {
        if !ids.insert(batch.id) {
            return Err(DistributionError::DuplicateBatchId { batch_id: batch.id });
        }
        if batch.is_empty() {
            return Err(DistributionError::EmptyBatch { batch_id: batch.id });
        }
        for payload in &batch.payloads {
            if !orders.insert(payload.order_number.as_str()) {
                return Err(DistributionError::DuplicateOrder {
                    order_number: payload.order_number.clone(),
                });
            }
        }
    }
    Ok(())
}

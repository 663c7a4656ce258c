//! Work-list construction: payload identity and typing, and partitioning into
//! batches.

pub mod distributor;
pub mod factory;
pub mod types;

pub use distributor::{Batch, BatchStats, DistributionError, Distributor};
pub use factory::{PayloadAttributes, PayloadFactory};
pub use types::{OrderPayload, OrderType};

pub mod geometry;
pub mod payload;
pub mod runtime;
pub mod service;
pub mod simulator;

pub use geometry::{
    BoundaryPolygon, Coordinate, CoordinateDelta, GenerationError, LineGeometry, PathGenerator,
};
pub use payload::{Batch, DistributionError, Distributor, OrderPayload, OrderType, PayloadFactory};
pub use runtime::cleanup::{Cleaner, CleanupSummary};
pub use runtime::config::{SimulationConfig, SimulationConfigBuilder, SimulationConfigParams};
pub use runtime::operations::OperationsTracker;
pub use runtime::runner::Runner;
pub use runtime::telemetry::{init_tracing, Telemetry, TelemetrySnapshot, DEFAULT_LOG_DIRECTIVE};
pub use service::{HttpOrderService, RemoteOrderService, RemoteStatus, ServiceError};
pub use simulator::{
    BatchCoordinator, OrderLedger, OrderLifecycleDriver, OrderResult, OrderState,
    SimulationSummary, TerminationWorker,
};

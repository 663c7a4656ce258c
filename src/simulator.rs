//! Order execution: the per-order lifecycle state machine, the shared result
//! ledger, bounded-parallel batch coordination and the single-consumer
//! termination worker.

pub mod coordinator;
pub mod driver;
pub mod ledger;
pub mod state;
pub mod summary;
pub mod termination;
pub mod wait;

pub use coordinator::{BatchCoordinator, BatchResult, CoordinatorOutcome};
pub use driver::{
    DriverError, DriverParams, LifecycleIntervals, LifecycleStage, OrderLifecycleDriver, OrderOutcome,
};
pub use ledger::{OrderHandle, OrderLedger};
pub use state::{LifecycleError, OrderResult, OrderState, TerminationAction};
pub use summary::SimulationSummary;
pub use termination::{
    termination_channel, EnqueueError, TerminationQueue, TerminationReceiver, TerminationReport,
    TerminationRequest, TerminationWorker,
};
pub use wait::PollPolicy;

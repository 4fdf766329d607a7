/// Engine builder.
pub mod builder;
/// Execution engine driving jobs through their lifecycle.
pub mod engine;
/// Unit-of-work seam.
pub mod handler;

pub use builder::EngineBuilder;
pub use engine::{
    CancelOutcome, ExecutionEngine, CANCELLED_BEFORE_EXECUTION_MESSAGE,
    CANCELLED_RUNNING_MESSAGE, CANCELLED_WAITING_MESSAGE,
};
pub use handler::{SimulatedWork, WorkHandler};

/// Builder for assembling a service context from its dependencies.
pub mod builder;
/// Worker pool, housekeeper and per-task processing.
pub mod supervisor;
/// Worker configuration.
pub mod worker;

pub use builder::ServiceContextBuilder;
pub use supervisor::{
    ShutdownToken, TaskOutcome, WorkerRuntime, process_lease, run_sweep,
};
pub use worker::WorkerConfig;

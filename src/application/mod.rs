//! Application layer: the worker pool and the orchestrator built on it.

pub mod events;
pub mod orchestrator;
pub mod worker_pool;

pub use events::{EventSink, OrchestratorEvent};
pub use orchestrator::Orchestrator;
pub use worker_pool::{NoopHooks, RunOutcome, RunSummary, TaskResult, WorkerHooks, WorkerPool};

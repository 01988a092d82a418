//! Port trait definitions (Hexagonal Architecture)
//!
//! - `PlanStorage`: lockable persistence for the plan document
//! - `TaskExecutor` / `TaskVerifier`: the collaborators that do and check a task's work
//! - `HumanResponder`: optional answer source for escalation questions

pub mod plan_storage;
pub mod task_runner;

pub use plan_storage::{PlanStorage, StorageGuard};
pub use task_runner::{ExecutionContext, HumanResponder, TaskExecutor, TaskVerifier};

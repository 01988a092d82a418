//! Domain errors for foreman.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors raised by plan storage and the task store.
///
/// A claim conflict is not an error; operations report it as `Ok(None)` or
/// `Ok(false)`.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Timed out after {waited:?} waiting for plan lock at {path}")]
    LockTimeout { path: String, waited: Duration },

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Plan serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("No plan has been initialized")]
    PlanNotFound,

    #[error("Task not found: {0}")]
    TaskNotFound(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Errors raised by the idea queue.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Queue serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Idea not found: {0}")]
    IdeaNotFound(String),
}

pub type QueueResult<T> = Result<T, QueueError>;

/// Errors that stop an orchestration run.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("Plan failed validation: {}", errors.join("; "))]
    InvalidPlan { errors: Vec<String> },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error("Orchestration was cancelled")]
    Cancelled,
}

pub type DomainResult<T> = Result<T, DomainError>;

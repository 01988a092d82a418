use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::domain::models::{HumanQuestion, PolicyEffect, RecoveryOutcome, Task};

/// Everything a collaborator gets to know about the attempt it is running.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub worker_id: String,
    /// 1-based attempt number for this task
    pub attempt: u32,
    /// Merged effect of the policies that matched this task
    pub policy_effect: Option<PolicyEffect>,
    /// Recovery chosen after the previous failure
    pub recovery: Option<RecoveryOutcome>,
    /// Cancelled when the run is cancelled; collaborators should stop early
    pub cancellation: CancellationToken,
}

impl ExecutionContext {
    pub fn new(worker_id: impl Into<String>, attempt: u32, cancellation: CancellationToken) -> Self {
        Self {
            worker_id: worker_id.into(),
            attempt,
            policy_effect: None,
            recovery: None,
            cancellation,
        }
    }
}

/// Performs a task's actual work.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    async fn execute(&self, task: &Task, ctx: &ExecutionContext) -> anyhow::Result<Value>;
}

/// Checks a task's result against its acceptance criteria.
#[async_trait]
pub trait TaskVerifier: Send + Sync {
    async fn verify(
        &self,
        task: &Task,
        output: &Value,
        ctx: &ExecutionContext,
    ) -> anyhow::Result<bool>;
}

/// Answers escalation questions. Only consulted at the ask-human level.
#[async_trait]
pub trait HumanResponder: Send + Sync {
    async fn answer(&self, question: &HumanQuestion) -> anyhow::Result<String>;
}

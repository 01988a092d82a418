//! Bounded concurrent claim/execute/verify/release loop.
//!
//! The task store lock is only taken for the claim and release that bracket a
//! task. Collaborators run without it, under an optional timeout and the
//! run's cancellation token.

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::events::{EventSink, OrchestratorEvent};
use crate::domain::errors::StoreResult;
use crate::domain::models::{Config, StatusSummary, Task, TaskStatus};
use crate::domain::ports::{ExecutionContext, TaskExecutor, TaskVerifier};
use crate::services::{DependencyResolver, TaskStore};

/// Outcome of one task inside a batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskResult {
    pub task_id: String,
    pub title: String,
    pub passed: bool,
    pub error: Option<String>,
    pub worker_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
}

impl TaskResult {
    fn failed(task: &Task, worker_id: &str, error: impl Into<String>) -> Self {
        Self {
            task_id: task.id.clone(),
            title: task.title.clone(),
            passed: false,
            error: Some(error.into()),
            worker_id: worker_id.to_string(),
            output: None,
        }
    }
}

/// Why a control loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Complete,
    Blocked,
    IterationLimit,
    Cancelled,
}

impl RunOutcome {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Complete => "complete",
            Self::Blocked => "blocked",
            Self::IterationLimit => "iteration_limit",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Aggregate of a `run_until_complete` loop.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub iterations: u32,
    pub total_passed: usize,
    pub total_failed: usize,
    pub outcome: RunOutcome,
    pub final_status: StatusSummary,
}

impl RunSummary {
    pub fn is_complete(&self) -> bool {
        self.outcome == RunOutcome::Complete
    }
}

/// Extension points around each task attempt.
#[async_trait]
pub trait WorkerHooks: Send + Sync {
    /// Called after a successful claim, before the executor runs.
    async fn before_execute(&self, _task: &Task, _ctx: &mut ExecutionContext) {}

    /// Called after the attempt has been released in the store.
    async fn after_release(&self, _task: &Task, _result: &TaskResult) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Hooks that do nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHooks;

impl WorkerHooks for NoopHooks {}

/// Runs batches of tasks on at most `max_workers` concurrent workers.
#[derive(Clone)]
pub struct WorkerPool {
    store: Arc<TaskStore>,
    max_workers: usize,
    task_timeout: Option<Duration>,
    resolver: DependencyResolver,
    hooks: Arc<dyn WorkerHooks>,
    events: EventSink,
    cancellation: CancellationToken,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("max_workers", &self.max_workers)
            .field("task_timeout", &self.task_timeout)
            .finish_non_exhaustive()
    }
}

impl WorkerPool {
    pub fn new(store: Arc<TaskStore>, max_workers: usize) -> Self {
        Self {
            store,
            max_workers: max_workers.max(1),
            task_timeout: None,
            resolver: DependencyResolver::default(),
            hooks: Arc::new(NoopHooks),
            events: EventSink::disabled(),
            cancellation: CancellationToken::new(),
        }
    }

    pub fn from_config(store: Arc<TaskStore>, config: &Config) -> Self {
        Self::new(store, config.max_workers)
            .with_task_timeout(config.execution.task_timeout())
            .with_resolver(DependencyResolver::new(config.dependencies.clone()))
    }

    pub const fn with_task_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.task_timeout = timeout;
        self
    }

    pub fn with_resolver(mut self, resolver: DependencyResolver) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_hooks(mut self, hooks: Arc<dyn WorkerHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    pub const fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Run every task in `tasks` and wait for all of them.
    ///
    /// Results come back in completion order. A failing or panicking task is
    /// released as failed and never affects its siblings.
    pub async fn run_batch(
        &self,
        tasks: Vec<Task>,
        executor: Arc<dyn TaskExecutor>,
        verifier: Arc<dyn TaskVerifier>,
    ) -> Vec<TaskResult> {
        let semaphore = Arc::new(Semaphore::new(self.max_workers));
        let mut join_set = JoinSet::new();
        let mut spawned: HashMap<tokio::task::Id, (Task, String)> = HashMap::new();

        for (index, task) in tasks.into_iter().enumerate() {
            let worker_id = worker_id(index);
            let worker = Worker {
                store: Arc::clone(&self.store),
                executor: Arc::clone(&executor),
                verifier: Arc::clone(&verifier),
                hooks: Arc::clone(&self.hooks),
                events: self.events.clone(),
                cancellation: self.cancellation.clone(),
                task_timeout: self.task_timeout,
            };
            let semaphore = Arc::clone(&semaphore);
            let (job_task, job_worker) = (task.clone(), worker_id.clone());

            let handle = join_set.spawn(async move {
                // Closed only when the batch is dropped
                let _permit = semaphore.acquire_owned().await.ok();
                worker.run(job_task, job_worker).await
            });
            spawned.insert(handle.id(), (task, worker_id));
        }

        let mut results = Vec::with_capacity(spawned.len());
        while let Some(joined) = join_set.join_next_with_id().await {
            match joined {
                Ok((id, result)) => {
                    spawned.remove(&id);
                    results.push(result);
                }
                Err(err) => {
                    let Some((task, worker_id)) = spawned.remove(&err.id()) else {
                        error!(error = %err, "unknown worker terminated abnormally");
                        continue;
                    };
                    error!(task_id = %task.id, %worker_id, error = %err, "worker terminated abnormally");
                    let reason = format!("Worker terminated abnormally: {err}");
                    self.release_orphan(&task, &worker_id, &reason).await;
                    results.push(TaskResult::failed(&task, &worker_id, reason));
                }
            }
        }
        results
    }

    /// Release a claim left behind by a worker that died outside the guarded
    /// collaborator calls.
    async fn release_orphan(&self, task: &Task, worker_id: &str, reason: &str) {
        match self.store.get_task(&task.id).await {
            Ok(Some(current))
                if current.status == TaskStatus::InProgress
                    && current.worker_id.as_deref() == Some(worker_id) =>
            {
                let notes = format!("Error: {reason}");
                if let Err(err) = self.store.release_task(&task.id, false, &notes).await {
                    error!(task_id = %task.id, error = %err, "failed to release orphaned claim");
                }
            }
            Ok(_) => {}
            Err(err) => error!(task_id = %task.id, error = %err, "failed to inspect orphaned claim"),
        }
    }

    /// Ready tasks that also pass the typed dependency check, capped at the
    /// pool size.
    pub async fn next_batch(&self) -> StoreResult<Vec<Task>> {
        let candidates = self.store.get_ready_tasks(usize::MAX).await?;
        if candidates.is_empty() {
            return Ok(candidates);
        }
        let plan = self.store.snapshot().await?;

        let mut batch = Vec::new();
        for task in candidates {
            let (ready, statuses) = self.resolver.check_dependencies_ready(&task, &plan.tasks);
            if !ready {
                debug!(task_id = %task.id, "typed dependencies not yet satisfied");
                continue;
            }
            for warning in self.resolver.warnings(&statuses) {
                warn!(task_id = %task.id, "{warning}");
            }
            batch.push(task);
            if batch.len() == self.max_workers {
                break;
            }
        }
        Ok(batch)
    }

    /// Dispatch batches until the plan is complete, blocked, cancelled or
    /// `max_iterations` batches have run.
    #[instrument(skip(self, executor, verifier), fields(max_workers = self.max_workers))]
    pub async fn run_until_complete(
        &self,
        executor: Arc<dyn TaskExecutor>,
        verifier: Arc<dyn TaskVerifier>,
        max_iterations: u32,
    ) -> StoreResult<RunSummary> {
        let mut iterations = 0;
        let mut total_passed = 0;
        let mut total_failed = 0;

        let outcome = loop {
            if self.cancellation.is_cancelled() {
                break RunOutcome::Cancelled;
            }
            if self.store.is_all_complete().await? {
                break RunOutcome::Complete;
            }
            if self.store.is_blocked().await? {
                break RunOutcome::Blocked;
            }
            if iterations >= max_iterations {
                break RunOutcome::IterationLimit;
            }

            let batch = self.next_batch().await?;
            if batch.is_empty() {
                if self.store.reset_failed_tasks().await? > 0 {
                    continue;
                }
                break RunOutcome::Blocked;
            }

            iterations += 1;
            let task_ids: Vec<String> = batch.iter().map(|t| t.id.clone()).collect();
            info!(iteration = iterations, tasks = ?task_ids, "dispatching batch");
            self.events
                .emit(OrchestratorEvent::BatchStarted {
                    iteration: iterations,
                    task_ids,
                })
                .await;

            let results = self
                .run_batch(batch, Arc::clone(&executor), Arc::clone(&verifier))
                .await;
            let passed = results.iter().filter(|r| r.passed).count();
            let failed = results.len() - passed;
            total_passed += passed;
            total_failed += failed;

            info!(iteration = iterations, passed, failed, "batch finished");
            self.events
                .emit(OrchestratorEvent::BatchCompleted {
                    iteration: iterations,
                    passed,
                    failed,
                })
                .await;
        };

        let final_status = self.store.status_summary().await?;
        info!(
            %outcome,
            iterations,
            total_passed,
            total_failed,
            completion = final_status.completion_percentage,
            "control loop stopped"
        );

        Ok(RunSummary {
            iterations,
            total_passed,
            total_failed,
            outcome,
            final_status,
        })
    }
}

fn worker_id(index: usize) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("W{}-{}", index + 1, &suffix[..8])
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(ToString::to_string)
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

/// Everything one spawned worker needs, detached from the pool.
struct Worker {
    store: Arc<TaskStore>,
    executor: Arc<dyn TaskExecutor>,
    verifier: Arc<dyn TaskVerifier>,
    hooks: Arc<dyn WorkerHooks>,
    events: EventSink,
    cancellation: CancellationToken,
    task_timeout: Option<Duration>,
}

impl Worker {
    async fn run(self, task: Task, worker_id: String) -> TaskResult {
        let claimed = match self.store.claim_task(&task.id, &worker_id).await {
            Ok(Some(claimed)) => claimed,
            Ok(None) => {
                debug!(task_id = %task.id, %worker_id, "claim conflict");
                self.events
                    .emit(OrchestratorEvent::ClaimConflict {
                        task_id: task.id.clone(),
                        worker_id: worker_id.clone(),
                    })
                    .await;
                return TaskResult::failed(&task, &worker_id, "already claimed");
            }
            Err(err) => {
                error!(task_id = %task.id, %worker_id, error = %err, "claim failed");
                return TaskResult::failed(&task, &worker_id, format!("Claim failed: {err}"));
            }
        };

        let attempt = claimed.attempts + 1;
        self.events
            .emit(OrchestratorEvent::TaskClaimed {
                task_id: claimed.id.clone(),
                worker_id: worker_id.clone(),
                attempt,
            })
            .await;

        let mut ctx = ExecutionContext::new(&worker_id, attempt, self.cancellation.child_token());
        self.hooks.before_execute(&claimed, &mut ctx).await;

        let outcome = match self
            .guarded("Execution", self.executor.execute(&claimed, &ctx))
            .await
        {
            Ok(output) => match self
                .guarded("Verification", self.verifier.verify(&claimed, &output, &ctx))
                .await
            {
                Ok(true) => Ok(output),
                Ok(false) => Err((Some(output), "Verification failed".to_string())),
                Err(err) => Err((Some(output), err)),
            },
            Err(err) => Err((None, err)),
        };

        let mut result = match outcome {
            Ok(output) => TaskResult {
                task_id: claimed.id.clone(),
                title: claimed.title.clone(),
                passed: true,
                error: None,
                worker_id: worker_id.clone(),
                output: Some(output),
            },
            Err((output, err)) => TaskResult {
                output,
                ..TaskResult::failed(&claimed, &worker_id, err)
            },
        };

        let notes = match &result.error {
            None => format!("Executed by worker {worker_id}"),
            Some(err) => format!("Error: {err}"),
        };
        match self.store.release_task(&claimed.id, result.passed, &notes).await {
            Ok(true) => {}
            Ok(false) => warn!(task_id = %claimed.id, "task vanished before release"),
            Err(err) => {
                error!(task_id = %claimed.id, error = %err, "release failed");
                result.passed = false;
                result.error = Some(format!("Release failed: {err}"));
            }
        }

        if result.passed {
            info!(task_id = %claimed.id, %worker_id, attempt, "task passed");
        } else {
            warn!(
                task_id = %claimed.id,
                %worker_id,
                attempt,
                error = result.error.as_deref().unwrap_or_default(),
                "task failed"
            );
        }

        self.events
            .emit(OrchestratorEvent::TaskReleased {
                task_id: claimed.id.clone(),
                worker_id: worker_id.clone(),
                passed: result.passed,
                error: result.error.clone(),
            })
            .await;

        if let Err(err) = self.hooks.after_release(&claimed, &result).await {
            warn!(task_id = %claimed.id, error = %err, "post-release hook failed");
        }
        result
    }

    /// Run a collaborator call, turning errors, panics, timeouts and
    /// cancellation into an error message.
    async fn guarded<T>(
        &self,
        label: &str,
        call: impl Future<Output = anyhow::Result<T>> + Send,
    ) -> Result<T, String> {
        let caught = AssertUnwindSafe(call).catch_unwind();
        let bounded = async {
            match self.task_timeout {
                Some(limit) => tokio::time::timeout(limit, caught)
                    .await
                    .map_err(|_| format!("{label} timed out after {}s", limit.as_secs_f64())),
                None => Ok(caught.await),
            }
        };

        tokio::select! {
            () = self.cancellation.cancelled() => Err(format!("{label} cancelled")),
            outcome = bounded => match outcome {
                Err(timed_out) => Err(timed_out),
                Ok(Err(panic)) => Err(format!("{label} panicked: {}", panic_message(panic.as_ref()))),
                Ok(Ok(Err(err))) => Err(format!("{err:#}")),
                Ok(Ok(Ok(value))) => Ok(value),
            },
        }
    }
}

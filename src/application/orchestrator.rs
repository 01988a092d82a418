//! Control loop tying the worker pool to policy evaluation and the
//! escalation ladder.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use super::events::{EventSink, OrchestratorEvent};
use super::worker_pool::{RunOutcome, RunSummary, TaskResult, WorkerHooks, WorkerPool};
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    Config, EscalationSummary, PlanStatus, PolicyContext, RecoveryAction, RecoveryDirective,
    RecoveryOutcome, Task,
};
use crate::domain::ports::{ExecutionContext, HumanResponder, TaskExecutor, TaskVerifier};
use crate::services::{DependencyResolver, EscalationLadder, PolicyEngine, TaskStore, ValidationReport};

/// Runs a plan to completion.
///
/// Owns the per-run escalation history and policy registry; the plan itself
/// is only touched through the [`TaskStore`].
pub struct Orchestrator {
    store: Arc<TaskStore>,
    executor: Arc<dyn TaskExecutor>,
    verifier: Arc<dyn TaskVerifier>,
    config: Config,
    resolver: DependencyResolver,
    policies: Option<Arc<PolicyEngine>>,
    ladder: Arc<Mutex<EscalationLadder>>,
    pending_recovery: Arc<Mutex<HashMap<String, RecoveryOutcome>>>,
    responder: Option<Arc<dyn HumanResponder>>,
    events: EventSink,
    cancellation: CancellationToken,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("store", &self.store)
            .field("max_workers", &self.config.max_workers)
            .field("policies", &self.policies.is_some())
            .field("responder", &self.responder.is_some())
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    pub fn new(
        store: Arc<TaskStore>,
        executor: Arc<dyn TaskExecutor>,
        verifier: Arc<dyn TaskVerifier>,
        config: Config,
    ) -> Self {
        let policies = config
            .execution
            .enable_policies
            .then(|| Arc::new(PolicyEngine::with_defaults()));
        Self {
            store,
            executor,
            verifier,
            resolver: DependencyResolver::new(config.dependencies.clone()),
            config,
            policies,
            ladder: Arc::new(Mutex::new(EscalationLadder::new())),
            pending_recovery: Arc::new(Mutex::new(HashMap::new())),
            responder: None,
            events: EventSink::disabled(),
            cancellation: CancellationToken::new(),
        }
    }

    /// Replace the policy registry. Ignored when policies are disabled.
    pub fn with_policy_engine(mut self, engine: PolicyEngine) -> Self {
        if self.config.execution.enable_policies {
            self.policies = Some(Arc::new(engine));
        }
        self
    }

    pub fn with_human_responder(mut self, responder: Arc<dyn HumanResponder>) -> Self {
        self.responder = Some(responder);
        self
    }

    pub fn with_events(mut self, tx: mpsc::Sender<OrchestratorEvent>) -> Self {
        self.events = EventSink::new(tx);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    pub const fn store(&self) -> &Arc<TaskStore> {
        &self.store
    }

    pub async fn escalation_summary(&self, task_id: &str) -> EscalationSummary {
        self.ladder.lock().await.summary(task_id)
    }

    /// Validate the dependency graph of the stored plan.
    pub async fn validate(&self) -> DomainResult<ValidationReport> {
        let plan = self.store.snapshot().await?;
        Ok(self.resolver.validate(&plan.tasks))
    }

    /// Validate the plan and run it until it completes or halts.
    #[instrument(skip(self), fields(location = %self.store.location()))]
    pub async fn start(&self) -> DomainResult<RunSummary> {
        self.ensure_valid().await?;
        self.run().await
    }

    /// Like [`start`](Self::start), after returning claims left behind by a
    /// crashed run to pending.
    #[instrument(skip(self), fields(location = %self.store.location()))]
    pub async fn resume(&self) -> DomainResult<RunSummary> {
        let released = self.store.release_stale_claims().await?;
        if released > 0 {
            info!(released, "resuming with stale claims released");
        }
        self.ensure_valid().await?;
        self.run().await
    }

    /// Run a single batch of the currently ready tasks.
    pub async fn run_batch(&self) -> DomainResult<Vec<TaskResult>> {
        if self.cancellation.is_cancelled() {
            return Err(DomainError::Cancelled);
        }
        let pool = self.pool();
        let batch = pool.next_batch().await?;
        Ok(pool
            .run_batch(batch, Arc::clone(&self.executor), Arc::clone(&self.verifier))
            .await)
    }

    /// Restart a blocked or failed task from a clean slate.
    pub async fn reset_task(&self, task_id: &str) -> DomainResult<bool> {
        let reset = self.store.reset_task(task_id).await?;
        if reset {
            self.ladder.lock().await.reset(task_id);
            self.pending_recovery.lock().await.remove(task_id);
            info!(task_id, "task reset");
        }
        Ok(reset)
    }

    async fn ensure_valid(&self) -> DomainResult<()> {
        let report = self.validate().await?;
        if report.is_valid {
            return Ok(());
        }
        error!(errors = ?report.errors, "plan failed dependency validation");
        Err(DomainError::InvalidPlan {
            errors: report.errors,
        })
    }

    async fn run(&self) -> DomainResult<RunSummary> {
        if self.cancellation.is_cancelled() {
            return Err(DomainError::Cancelled);
        }
        self.store.set_plan_status(PlanStatus::InProgress).await?;

        let summary = self
            .pool()
            .run_until_complete(
                Arc::clone(&self.executor),
                Arc::clone(&self.verifier),
                self.config.max_iterations,
            )
            .await?;

        let (status, reason) = match summary.outcome {
            RunOutcome::Complete => (PlanStatus::Complete, "all tasks passed".to_string()),
            RunOutcome::Blocked => (
                PlanStatus::Blocked,
                format!("{} task(s) blocked", summary.final_status.blocked),
            ),
            RunOutcome::IterationLimit => (
                PlanStatus::Idle,
                format!("stopped after {} iterations", summary.iterations),
            ),
            RunOutcome::Cancelled => (PlanStatus::Idle, "run cancelled".to_string()),
        };
        self.store.set_plan_status(status).await?;
        self.events
            .emit(OrchestratorEvent::Halted {
                outcome: summary.outcome,
                reason,
            })
            .await;

        if summary.outcome == RunOutcome::Cancelled {
            return Err(DomainError::Cancelled);
        }
        Ok(summary)
    }

    fn pool(&self) -> WorkerPool {
        let hooks = RecoveryHooks {
            store: Arc::clone(&self.store),
            policies: self.policies.clone(),
            ladder: Arc::clone(&self.ladder),
            pending: Arc::clone(&self.pending_recovery),
            responder: self.responder.clone(),
            events: self.events.clone(),
            escalate: self.config.execution.enable_escalation,
        };
        WorkerPool::from_config(Arc::clone(&self.store), &self.config)
            .with_resolver(self.resolver.clone())
            .with_hooks(Arc::new(hooks))
            .with_events(self.events.clone())
            .with_cancellation(self.cancellation.clone())
    }
}

/// Policy context derived from a task.
fn policy_context(task: &Task) -> PolicyContext {
    let description = if task.description.is_empty() {
        task.title.clone()
    } else {
        format!("{}\n{}", task.title, task.description)
    };
    let mut ctx = PolicyContext::new(description).with_retry_count(task.attempts);
    ctx.task_id = Some(task.id.clone());
    ctx.with_extra(
        "acceptance_criteria",
        serde_json::json!(task.acceptance_criteria),
    )
}

fn halt_reason(outcome: &RecoveryOutcome) -> String {
    match &outcome.directive {
        RecoveryDirective::Blocked {
            reason,
            error_history,
        } => format!("{reason}: {}", error_history.join(" | ")),
        RecoveryDirective::AwaitingHuman => {
            let question = outcome
                .human_question
                .as_ref()
                .map_or("no question available", |q| q.question.as_str());
            format!("Awaiting human guidance: {question}")
        }
        other => format!("Recovery halted: {other:?}"),
    }
}

/// Worker hooks that apply policies before an attempt and escalate after a
/// failed one.
struct RecoveryHooks {
    store: Arc<TaskStore>,
    policies: Option<Arc<PolicyEngine>>,
    ladder: Arc<Mutex<EscalationLadder>>,
    pending: Arc<Mutex<HashMap<String, RecoveryOutcome>>>,
    responder: Option<Arc<dyn HumanResponder>>,
    events: EventSink,
    escalate: bool,
}

impl RecoveryHooks {
    async fn escalate(&self, task: &Task, error: String) -> anyhow::Result<()> {
        let (level, question) = {
            let mut ladder = self.ladder.lock().await;
            ladder.record_failure(&task.id, error);
            let level = ladder.current_level(&task.id);
            let question = (RecoveryAction::for_level(level) == RecoveryAction::AskHuman)
                .then(|| ladder.build_human_question(task));
            (level, question)
        };
        let action = RecoveryAction::for_level(level);

        let answer = match (question, &self.responder) {
            (Some(question), Some(responder)) => match responder.answer(&question).await {
                Ok(answer) => Some(answer),
                Err(err) => {
                    warn!(task_id = %task.id, error = %err, "human responder failed");
                    None
                }
            },
            _ => None,
        };

        let outcome = self
            .ladder
            .lock()
            .await
            .execute_recovery(action, task, answer);

        if let RecoveryDirective::ReduceScope {
            reduced_criteria,
            note,
            ..
        } = &outcome.directive
        {
            self.store
                .apply_scope_reduction(&task.id, reduced_criteria.clone(), note)
                .await?;
        }

        self.events
            .emit(OrchestratorEvent::Escalated {
                task_id: task.id.clone(),
                level,
                action,
                continue_execution: outcome.continue_execution,
            })
            .await;

        if outcome.continue_execution {
            self.pending.lock().await.insert(task.id.clone(), outcome);
        } else {
            let reason = halt_reason(&outcome);
            warn!(task_id = %task.id, level, %action, "escalation halted task");
            self.store.mark_blocked(&task.id, &reason).await?;
            self.pending.lock().await.remove(&task.id);
        }
        Ok(())
    }
}

#[async_trait]
impl WorkerHooks for RecoveryHooks {
    async fn before_execute(&self, task: &Task, ctx: &mut ExecutionContext) {
        if let Some(engine) = &self.policies {
            let effect = engine.evaluate(&policy_context(task));
            if !effect.is_empty() {
                info!(task_id = %task.id, policies = ?effect.applied_policies, "policies applied");
                self.events
                    .emit(OrchestratorEvent::PolicyApplied {
                        task_id: task.id.clone(),
                        policies: effect.applied_policies.clone(),
                    })
                    .await;
                ctx.policy_effect = Some(effect);
            }
        }
        ctx.recovery = self.pending.lock().await.remove(&task.id);
    }

    async fn after_release(&self, task: &Task, result: &TaskResult) -> anyhow::Result<()> {
        if result.passed {
            self.ladder.lock().await.reset(&task.id);
            return Ok(());
        }
        // A lost claim is not a failed attempt
        if !self.escalate || result.error.as_deref() == Some("already claimed") {
            return Ok(());
        }
        let error = result
            .error
            .clone()
            .unwrap_or_else(|| "Unknown failure".to_string());
        self.escalate(task, error).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{
        EffectFragment, HumanQuestion, Plan, PolicyKind, RetryConfig, TaskStatus,
    };
    use crate::infrastructure::storage::InMemoryPlanStorage;
    use crate::services::{Action, Condition, Policy};
    use serde_json::Value;
    use std::sync::Mutex as StdMutex;

    /// Fails every attempt until `passes_from` and records each context.
    struct Flaky {
        passes_from: u32,
        seen: StdMutex<Vec<ExecutionContext>>,
    }

    impl Flaky {
        fn new(passes_from: u32) -> Arc<Self> {
            Arc::new(Self {
                passes_from,
                seen: StdMutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl TaskExecutor for Flaky {
        async fn execute(&self, _task: &Task, ctx: &ExecutionContext) -> anyhow::Result<Value> {
            self.seen.lock().unwrap().push(ctx.clone());
            if ctx.attempt >= self.passes_from {
                Ok(Value::Bool(true))
            } else {
                anyhow::bail!("attempt {} failed: connection refused", ctx.attempt)
            }
        }
    }

    struct AcceptAll;

    #[async_trait]
    impl TaskVerifier for AcceptAll {
        async fn verify(&self, _: &Task, _: &Value, _: &ExecutionContext) -> anyhow::Result<bool> {
            Ok(true)
        }
    }

    struct Answer;

    #[async_trait]
    impl HumanResponder for Answer {
        async fn answer(&self, question: &HumanQuestion) -> anyhow::Result<String> {
            Ok(format!("use option: {}", question.options[0]))
        }
    }

    fn config(max_attempts: u32) -> Config {
        let mut config = Config::default();
        config.retry = RetryConfig { max_attempts };
        config.max_workers = 1;
        config
    }

    fn store(plan: Plan, config: &Config) -> Arc<TaskStore> {
        Arc::new(TaskStore::new(
            Arc::new(InMemoryPlanStorage::with_plan(plan)),
            &config.store,
            &config.retry,
        ))
    }

    fn single(task: Task) -> Plan {
        Plan::new("demo", "").with_tasks(vec![task])
    }

    #[tokio::test]
    async fn test_start_rejects_cyclic_plan() {
        let config = config(3);
        let plan = Plan::new("demo", "").with_tasks(vec![
            Task::new("a", "A").with_dependency("b"),
            Task::new("b", "B").with_dependency("a"),
        ]);
        let executor = Flaky::new(1);
        let orchestrator = Orchestrator::new(
            store(plan, &config),
            executor.clone(),
            Arc::new(AcceptAll),
            config,
        );

        let err = orchestrator.start().await.unwrap_err();

        assert!(matches!(err, DomainError::InvalidPlan { ref errors } if !errors.is_empty()));
        assert!(executor.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_start_marks_plan_complete() {
        let config = config(3);
        let store = store(single(Task::new("a", "A")), &config);
        let orchestrator =
            Orchestrator::new(Arc::clone(&store), Flaky::new(1), Arc::new(AcceptAll), config);

        let summary = orchestrator.start().await.unwrap();

        assert!(summary.is_complete());
        assert_eq!(store.snapshot().await.unwrap().status, PlanStatus::Complete);
    }

    #[tokio::test]
    async fn test_failure_attaches_recovery_to_next_attempt() {
        let config = config(5);
        let store = store(single(Task::new("a", "Fix login")), &config);
        let executor = Flaky::new(3);
        let orchestrator =
            Orchestrator::new(Arc::clone(&store), executor.clone(), Arc::new(AcceptAll), config);

        let summary = orchestrator.start().await.unwrap();
        assert!(summary.is_complete());

        let seen = executor.seen.lock().unwrap();
        assert_eq!(seen.len(), 3);
        assert!(seen[0].recovery.is_none());
        assert!(matches!(
            seen[1].recovery.as_ref().map(|r| &r.directive),
            Some(RecoveryDirective::AlternateApproach { prompt }) if prompt.contains("connection refused")
        ));
        assert!(matches!(
            seen[2].recovery.as_ref().map(|r| r.action),
            Some(RecoveryAction::InjectArchitect)
        ));
    }

    #[tokio::test]
    async fn test_ask_human_without_responder_blocks_task() {
        let config = config(10);
        let store = store(single(Task::new("a", "Deploy")), &config);
        let orchestrator =
            Orchestrator::new(Arc::clone(&store), Flaky::new(99), Arc::new(AcceptAll), config);

        let summary = orchestrator.start().await.unwrap();

        assert_eq!(summary.outcome, RunOutcome::Blocked);
        assert_eq!(summary.total_failed, 3);
        let task = store.get_task("a").await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Blocked);
        assert!(task.notes.contains("Awaiting human guidance"));
    }

    #[tokio::test]
    async fn test_ladder_runs_to_mark_blocked_with_responder() {
        let config = config(10);
        let task = Task::new("a", "Deploy").with_criteria(["one", "two", "three", "four", "five"]);
        let store = store(single(task), &config);
        let executor = Flaky::new(99);
        let orchestrator =
            Orchestrator::new(Arc::clone(&store), executor.clone(), Arc::new(AcceptAll), config)
                .with_human_responder(Arc::new(Answer));

        let summary = orchestrator.start().await.unwrap();

        assert_eq!(summary.outcome, RunOutcome::Blocked);
        assert_eq!(executor.seen.lock().unwrap().len(), 5);
        let task = store.get_task("a").await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Blocked);
        assert!(task.scope_reduced);
        assert_eq!(task.acceptance_criteria.len(), 4);
        assert!(task.notes.contains("Exhausted all recovery strategies"));

        let seen = executor.seen.lock().unwrap();
        assert!(matches!(
            seen[3].recovery.as_ref().map(|r| &r.directive),
            Some(RecoveryDirective::HumanGuidance { guidance }) if guidance.starts_with("use option")
        ));
        drop(seen);

        assert_eq!(orchestrator.escalation_summary("a").await.error_count, 5);
        assert!(orchestrator.reset_task("a").await.unwrap());
        assert_eq!(orchestrator.escalation_summary("a").await.error_count, 0);
    }

    #[tokio::test]
    async fn test_policies_reach_executor_and_events() {
        let config = config(3);
        let store = store(
            single(Task::new("a", "Fix auth").with_description("rotate jwt secret")),
            &config,
        );
        let executor = Flaky::new(1);
        let (tx, mut rx) = mpsc::channel(64);
        let mut engine = PolicyEngine::new();
        engine.add_policy(Policy::new(
            "warn_auth",
            PolicyKind::Verification,
            Condition::description_contains_any(&["auth"]),
            Action::Fragment(EffectFragment::default().warn("check tokens")),
        ));
        let orchestrator =
            Orchestrator::new(Arc::clone(&store), executor.clone(), Arc::new(AcceptAll), config)
                .with_policy_engine(engine)
                .with_events(tx);

        orchestrator.start().await.unwrap();
        drop(orchestrator);

        let seen = executor.seen.lock().unwrap();
        let effect = seen[0].policy_effect.as_ref().unwrap();
        assert_eq!(effect.applied_policies, vec!["warn_auth".to_string()]);
        drop(seen);

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        assert!(events
            .iter()
            .any(|e| matches!(e, OrchestratorEvent::PolicyApplied { policies, .. } if policies[0] == "warn_auth")));
        assert!(matches!(
            events.last(),
            Some(OrchestratorEvent::Halted { outcome: RunOutcome::Complete, .. })
        ));
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let config = config(3);
        let token = CancellationToken::new();
        token.cancel();
        let orchestrator = Orchestrator::new(
            store(single(Task::new("a", "A")), &config),
            Flaky::new(1),
            Arc::new(AcceptAll),
            config,
        )
        .with_cancellation(token);

        assert!(matches!(orchestrator.start().await, Err(DomainError::Cancelled)));
    }

    #[tokio::test]
    async fn test_resume_releases_stale_claims() {
        let config = config(3);
        let store = store(single(Task::new("a", "A")), &config);
        store.claim_task("a", "crashed-worker").await.unwrap();
        let orchestrator =
            Orchestrator::new(Arc::clone(&store), Flaky::new(1), Arc::new(AcceptAll), config);

        let summary = orchestrator.resume().await.unwrap();

        assert!(summary.is_complete());
        let task = store.get_task("a").await.unwrap().unwrap();
        assert_eq!(task.attempts, 1);
        assert!(task.notes.contains("crashed-worker"));
    }

    #[test]
    fn test_policy_context_from_task() {
        let mut task = Task::new("a", "Fix auth").with_description("rotate jwt");
        task.attempts = 2;
        let ctx = policy_context(&task);
        assert_eq!(ctx.retry_count, 2);
        assert_eq!(ctx.task_id.as_deref(), Some("a"));
        assert!(ctx.description.contains("auth"));
        assert!(ctx.description.contains("jwt"));
    }
}

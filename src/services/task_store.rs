//! Lockable, persisted CRUD over the plan.
//!
//! Every operation takes the store lock for its whole read-modify-write body
//! and drops it before returning. Nothing here calls out to collaborators, so
//! the lock is only ever held for one load and at most one save.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{Mutex, MutexGuard};
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::domain::errors::{StoreError, StoreResult};
use crate::domain::models::{
    Plan, PlanStatus, RetryConfig, StatusSummary, StoreConfig, Task, TaskStatus,
};
use crate::domain::ports::{PlanStorage, StorageGuard};

/// Single point of truth for a plan's mutable state.
pub struct TaskStore {
    storage: Arc<dyn PlanStorage>,
    local: Mutex<()>,
    max_attempts: u32,
    lock_timeout: Duration,
    poll_interval: Duration,
}

impl std::fmt::Debug for TaskStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskStore")
            .field("location", &self.storage.location())
            .field("max_attempts", &self.max_attempts)
            .field("lock_timeout", &self.lock_timeout)
            .finish_non_exhaustive()
    }
}

impl TaskStore {
    pub fn new(storage: Arc<dyn PlanStorage>, store: &StoreConfig, retry: &RetryConfig) -> Self {
        Self {
            storage,
            local: Mutex::new(()),
            max_attempts: retry.max_attempts.max(1),
            lock_timeout: store.lock_timeout(),
            poll_interval: store.lock_poll_interval(),
        }
    }

    pub const fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn location(&self) -> String {
        self.storage.location()
    }

    /// Run blocking storage work on the blocking pool.
    async fn blocking<T, F>(&self, op: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&dyn PlanStorage) -> StoreResult<T> + Send + 'static,
    {
        let storage = Arc::clone(&self.storage);
        match tokio::task::spawn_blocking(move || op(storage.as_ref())).await {
            Ok(result) => result,
            Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
            Err(err) => Err(StoreError::Io {
                path: PathBuf::from(self.storage.location()),
                source: std::io::Error::other(err),
            }),
        }
    }

    /// Take the in-process mutex, then poll the storage lock until the deadline.
    async fn lock(&self) -> StoreResult<(MutexGuard<'_, ()>, StorageGuard)> {
        let deadline = Instant::now() + self.lock_timeout;
        let timeout = || StoreError::LockTimeout {
            path: self.storage.location(),
            waited: self.lock_timeout,
        };

        let local = tokio::time::timeout_at(deadline, self.local.lock())
            .await
            .map_err(|_| timeout())?;

        loop {
            if let Some(guard) = self.blocking(|storage| storage.try_lock()).await? {
                return Ok((local, guard));
            }
            if Instant::now() >= deadline {
                warn!(location = %self.storage.location(), "plan lock acquisition timed out");
                return Err(timeout());
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn load(&self) -> StoreResult<Plan> {
        self.blocking(|storage| storage.load()?.ok_or(StoreError::PlanNotFound))
            .await
    }

    /// Save while holding `guard`. The guard moves into the blocking write, so
    /// the lock stays held until the write finishes even if the caller is dropped.
    async fn save(&self, plan: Plan, guard: StorageGuard) -> StoreResult<()> {
        self.blocking(move |storage| {
            let _guard = guard;
            storage.save(&plan)
        })
        .await
    }

    async fn read<T>(&self, f: impl FnOnce(&Plan) -> T) -> StoreResult<T> {
        let (_local, _guard) = self.lock().await?;
        let plan = self.load().await?;
        Ok(f(&plan))
    }

    /// Run `f` against a fresh copy of the plan and persist it if `f` reports
    /// a change. On a failed save the stored plan is left as it was.
    async fn mutate<T>(&self, f: impl FnOnce(&mut Plan) -> (T, bool)) -> StoreResult<T> {
        let (_local, guard) = self.lock().await?;
        let mut plan = self.load().await?;
        let (value, changed) = f(&mut plan);
        if changed {
            plan.touch();
            self.save(plan, guard).await?;
        }
        Ok(value)
    }

    /// Persist `plan` as the current plan, replacing any previous one.
    pub async fn initialize(&self, mut plan: Plan) -> StoreResult<()> {
        let (_local, guard) = self.lock().await?;
        plan.touch();
        let project = plan.project_name.clone();
        let tasks = plan.tasks.len();
        self.save(plan, guard).await?;
        info!(
            project = %project,
            tasks,
            location = %self.storage.location(),
            "plan initialized"
        );
        Ok(())
    }

    /// Delete the persisted plan.
    pub async fn reset(&self) -> StoreResult<()> {
        let (_local, guard) = self.lock().await?;
        self.blocking(move |storage| {
            let _guard = guard;
            storage.remove()
        })
        .await
    }

    /// Claim a specific task. `None` when absent, running, blocked, skipped or done.
    #[instrument(skip(self), fields(location = %self.storage.location()))]
    pub async fn claim_task(&self, task_id: &str, worker_id: &str) -> StoreResult<Option<Task>> {
        let claimed = self
            .mutate(|plan| {
                let claimed = claim_in(plan, task_id, worker_id);
                let changed = claimed.is_some();
                (claimed, changed)
            })
            .await?;

        match &claimed {
            Some(task) => debug!(attempts = task.attempts, "task claimed"),
            None => debug!("claim refused"),
        }
        Ok(claimed)
    }

    /// Select and claim the highest-priority ready task in one lock hold.
    pub async fn claim_next_ready(&self, worker_id: &str) -> StoreResult<Option<Task>> {
        self.mutate(|plan| {
            let next = plan.ready_tasks().first().map(|t| t.id.clone());
            let claimed = next.and_then(|id| claim_in(plan, &id, worker_id));
            let changed = claimed.is_some();
            (claimed, changed)
        })
        .await
    }

    /// Claim up to `max_count` ready tasks for one worker in one lock hold.
    pub async fn claim_ready(&self, max_count: usize, worker_id: &str) -> StoreResult<Vec<Task>> {
        self.mutate(|plan| {
            let ids: Vec<String> = plan
                .ready_tasks()
                .into_iter()
                .take(max_count)
                .map(|t| t.id.clone())
                .collect();
            let claimed: Vec<Task> = ids
                .iter()
                .filter_map(|id| claim_in(plan, id, worker_id))
                .collect();
            let changed = !claimed.is_empty();
            (claimed, changed)
        })
        .await
    }

    /// Record the outcome of an attempt. `false` when the task is absent.
    #[instrument(skip(self, notes), fields(location = %self.storage.location()))]
    pub async fn release_task(&self, task_id: &str, passed: bool, notes: &str) -> StoreResult<bool> {
        let max_attempts = self.max_attempts;
        let released = self
            .mutate(|plan| {
                let Some(task) = plan.task_mut(task_id) else {
                    return (None, false);
                };
                task.attempts += 1;
                task.completed_at = Some(Utc::now());
                task.worker_id = None;
                if passed {
                    task.passed = true;
                    task.status = TaskStatus::Completed;
                } else if task.attempts >= max_attempts {
                    task.status = TaskStatus::Blocked;
                } else {
                    task.status = TaskStatus::Failed;
                }

                let note = if notes.is_empty() {
                    let outcome = if passed { "Passed" } else { "Failed" };
                    format!("{outcome} on attempt {}", task.attempts)
                } else {
                    notes.to_string()
                };
                task.append_note(&note);
                (Some((task.status, task.attempts)), true)
            })
            .await?;

        match released {
            Some((status, attempts)) => {
                debug!(%status, attempts, "task released");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Dispatch candidates by ascending priority, at most `max_count`.
    pub async fn get_ready_tasks(&self, max_count: usize) -> StoreResult<Vec<Task>> {
        self.read(|plan| {
            plan.ready_tasks()
                .into_iter()
                .take(max_count)
                .cloned()
                .collect()
        })
        .await
    }

    pub async fn get_task(&self, task_id: &str) -> StoreResult<Option<Task>> {
        self.read(|plan| plan.task(task_id).cloned()).await
    }

    /// Copy of the whole plan.
    pub async fn snapshot(&self) -> StoreResult<Plan> {
        self.read(Clone::clone).await
    }

    pub async fn status_summary(&self) -> StoreResult<StatusSummary> {
        self.read(Plan::summary).await
    }

    pub async fn is_all_complete(&self) -> StoreResult<bool> {
        self.read(Plan::is_all_complete).await
    }

    pub async fn is_blocked(&self) -> StoreResult<bool> {
        self.read(Plan::is_blocked).await
    }

    /// Move failed, unpassed tasks back to pending. Returns how many moved.
    pub async fn reset_failed_tasks(&self) -> StoreResult<usize> {
        let count = self
            .mutate(|plan| {
                let mut count = 0;
                for task in plan
                    .tasks
                    .iter_mut()
                    .filter(|t| t.status == TaskStatus::Failed && !t.passed)
                {
                    task.status = TaskStatus::Pending;
                    count += 1;
                }
                (count, count > 0)
            })
            .await?;
        if count > 0 {
            info!(count, "failed tasks reset to pending");
        }
        Ok(count)
    }

    /// Explicitly restart a blocked or failed task with a clean attempt count.
    pub async fn reset_task(&self, task_id: &str) -> StoreResult<bool> {
        self.mutate(|plan| {
            let Some(task) = plan.task_mut(task_id) else {
                return (false, false);
            };
            if !matches!(task.status, TaskStatus::Blocked | TaskStatus::Failed) {
                return (false, false);
            }
            task.status = TaskStatus::Pending;
            task.attempts = 0;
            task.worker_id = None;
            task.append_note("Reset for retry");
            (true, true)
        })
        .await
    }

    /// Return claims left behind by a dead process to pending without
    /// counting an attempt.
    pub async fn release_stale_claims(&self) -> StoreResult<usize> {
        let count = self
            .mutate(|plan| {
                let mut count = 0;
                for task in plan
                    .tasks
                    .iter_mut()
                    .filter(|t| t.status == TaskStatus::InProgress)
                {
                    let holder = task.worker_id.take().unwrap_or_default();
                    task.status = TaskStatus::Pending;
                    task.append_note(&format!("Released stale claim held by {holder}"));
                    count += 1;
                }
                (count, count > 0)
            })
            .await?;
        if count > 0 {
            warn!(count, "released stale in-progress claims");
        }
        Ok(count)
    }

    /// Halt a task. Passed tasks are left alone.
    pub async fn mark_blocked(&self, task_id: &str, reason: &str) -> StoreResult<bool> {
        self.mutate(|plan| {
            let Some(task) = plan.task_mut(task_id) else {
                return (false, false);
            };
            if task.passed {
                return (false, false);
            }
            task.status = TaskStatus::Blocked;
            task.worker_id = None;
            task.append_note(&format!("Blocked: {reason}"));
            (true, true)
        })
        .await
    }

    /// Replace a task's acceptance criteria with a reduced set.
    pub async fn apply_scope_reduction(
        &self,
        task_id: &str,
        criteria: Vec<String>,
        note: &str,
    ) -> StoreResult<bool> {
        self.mutate(|plan| {
            let Some(task) = plan.task_mut(task_id) else {
                return (false, false);
            };
            task.acceptance_criteria = criteria;
            task.scope_reduced = true;
            task.append_note(note);
            (true, true)
        })
        .await
    }

    pub async fn set_plan_status(&self, status: PlanStatus) -> StoreResult<()> {
        self.mutate(|plan| {
            let changed = plan.status != status;
            plan.status = status;
            ((), changed)
        })
        .await
    }
}

fn claim_in(plan: &mut Plan, task_id: &str, worker_id: &str) -> Option<Task> {
    let task = plan.task_mut(task_id)?;
    if task.passed
        || matches!(
            task.status,
            TaskStatus::InProgress | TaskStatus::Completed | TaskStatus::Blocked | TaskStatus::Skipped
        )
    {
        return None;
    }
    task.status = TaskStatus::InProgress;
    task.worker_id = Some(worker_id.to_string());
    task.started_at = Some(Utc::now());
    Some(task.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::storage::InMemoryPlanStorage;
    use std::thread::{self, ThreadId};

    fn store_over(storage: Arc<dyn PlanStorage>) -> TaskStore {
        TaskStore::new(storage, &StoreConfig::default(), &RetryConfig::default())
    }

    async fn store_with(tasks: Vec<Task>) -> TaskStore {
        let store = store_over(Arc::new(InMemoryPlanStorage::new()));
        store
            .initialize(Plan::new("test", "").with_tasks(tasks))
            .await
            .unwrap();
        store
    }

    fn ids(tasks: &[Task]) -> Vec<&str> {
        tasks.iter().map(|t| t.id.as_str()).collect()
    }

    #[tokio::test]
    async fn test_ready_then_release_unlocks_dependent() {
        let store = store_with(vec![
            Task::new("A", "A"),
            Task::new("D", "D").with_dependency("A"),
        ])
        .await;

        assert_eq!(ids(&store.get_ready_tasks(1).await.unwrap()), vec!["A"]);

        let claimed = store.claim_task("A", "W1-aaaa").await.unwrap().unwrap();
        assert_eq!(claimed.status, TaskStatus::InProgress);
        assert_eq!(claimed.worker_id.as_deref(), Some("W1-aaaa"));
        assert!(claimed.started_at.is_some());

        assert!(store.release_task("A", true, "").await.unwrap());
        assert_eq!(ids(&store.get_ready_tasks(1).await.unwrap()), vec!["D"]);

        let a = store.get_task("A").await.unwrap().unwrap();
        assert!(a.passed);
        assert_eq!(a.status, TaskStatus::Completed);
        assert_eq!(a.attempts, 1);
        assert_eq!(a.notes, "Passed on attempt 1");
        assert!(a.worker_id.is_none());
    }

    #[tokio::test]
    async fn test_claim_refused_for_running_and_completed() {
        let store = store_with(vec![Task::new("A", "A")]).await;
        assert!(store.claim_task("A", "W1").await.unwrap().is_some());
        assert!(store.claim_task("A", "W2").await.unwrap().is_none());

        store.release_task("A", true, "done").await.unwrap();
        assert!(store.claim_task("A", "W3").await.unwrap().is_none());
        assert!(store.claim_task("missing", "W3").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_three_failures_block_task() {
        let store = store_with(vec![Task::new("A", "A")]).await;

        for attempt in 1..=3 {
            assert!(store.claim_task("A", "W1").await.unwrap().is_some());
            store.release_task("A", false, "boom").await.unwrap();
            let task = store.get_task("A").await.unwrap().unwrap();
            assert_eq!(task.attempts, attempt);
            let expected = if attempt < 3 {
                TaskStatus::Failed
            } else {
                TaskStatus::Blocked
            };
            assert_eq!(task.status, expected);
        }

        assert!(store.claim_task("A", "W1").await.unwrap().is_none());
        assert!(store.is_blocked().await.unwrap());
        assert!(!store.is_all_complete().await.unwrap());
        assert_eq!(
            store.get_task("A").await.unwrap().unwrap().notes,
            "boom\nboom\nboom"
        );
    }

    #[tokio::test]
    async fn test_reset_task_allows_claim_again() {
        let store = store_with(vec![Task::new("A", "A")]).await;
        for _ in 0..3 {
            store.claim_task("A", "W1").await.unwrap();
            store.release_task("A", false, "").await.unwrap();
        }
        assert!(store.reset_task("A").await.unwrap());
        let task = store.get_task("A").await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.attempts, 0);
        assert!(store.claim_task("A", "W1").await.unwrap().is_some());
        assert!(!store.reset_task("A").await.unwrap());
    }

    #[tokio::test]
    async fn test_reset_failed_tasks_counts_only_failed() {
        let store = store_with(vec![Task::new("A", "A"), Task::new("B", "B")]).await;
        store.claim_task("A", "W1").await.unwrap();
        store.release_task("A", false, "").await.unwrap();

        assert_eq!(store.reset_failed_tasks().await.unwrap(), 1);
        assert_eq!(
            store.get_task("A").await.unwrap().unwrap().status,
            TaskStatus::Pending
        );
        assert_eq!(store.reset_failed_tasks().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_claim_next_ready_follows_priority() {
        let store = store_with(vec![
            Task::new("low", "Low").with_priority(9),
            Task::new("high", "High").with_priority(1),
        ])
        .await;

        let first = store.claim_next_ready("W1").await.unwrap().unwrap();
        assert_eq!(first.id, "high");
        let second = store.claim_next_ready("W2").await.unwrap().unwrap();
        assert_eq!(second.id, "low");
        assert!(store.claim_next_ready("W3").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_claim_ready_takes_up_to_count() {
        let store = store_with(vec![
            Task::new("a", "A"),
            Task::new("b", "B"),
            Task::new("c", "C"),
        ])
        .await;
        let claimed = store.claim_ready(2, "W1").await.unwrap();
        assert_eq!(ids(&claimed), vec!["a", "b"]);
        assert_eq!(ids(&store.get_ready_tasks(10).await.unwrap()), vec!["c"]);
    }

    #[tokio::test]
    async fn test_release_stale_claims_keeps_attempts() {
        let store = store_with(vec![Task::new("a", "A")]).await;
        store.claim_task("a", "W1-dead").await.unwrap();

        assert_eq!(store.release_stale_claims().await.unwrap(), 1);
        let task = store.get_task("a").await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.attempts, 0);
        assert!(task.notes.contains("W1-dead"));
    }

    #[tokio::test]
    async fn test_summary_and_metadata_follow_mutations() {
        let store = store_with(vec![Task::new("a", "A"), Task::new("b", "B")]).await;
        store.claim_task("a", "W1").await.unwrap();

        let plan = store.snapshot().await.unwrap();
        assert_eq!(plan.metadata.in_progress_tasks, 1);

        store.release_task("a", true, "").await.unwrap();
        let summary = store.status_summary().await.unwrap();
        assert_eq!(summary.completed, 1);
        assert_eq!(summary.pending, 1);
        assert!((summary.completion_percentage - 50.0).abs() < f64::EPSILON);
        assert_eq!(store.snapshot().await.unwrap().metadata.completed_tasks, 1);
    }

    #[tokio::test]
    async fn test_missing_plan_is_an_error() {
        let store = store_over(Arc::new(InMemoryPlanStorage::new()));
        assert!(matches!(
            store.get_ready_tasks(1).await,
            Err(StoreError::PlanNotFound)
        ));
    }

    struct ContendedStorage;

    impl PlanStorage for ContendedStorage {
        fn location(&self) -> String {
            "contended".to_string()
        }
        fn try_lock(&self) -> StoreResult<Option<StorageGuard>> {
            Ok(None)
        }
        fn load(&self) -> StoreResult<Option<Plan>> {
            Ok(None)
        }
        fn save(&self, _plan: &Plan) -> StoreResult<()> {
            Ok(())
        }
        fn remove(&self) -> StoreResult<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_lock_timeout_is_reported() {
        let config = StoreConfig {
            lock_timeout_ms: 60,
            lock_poll_interval_ms: 10,
            ..StoreConfig::default()
        };
        let store = TaskStore::new(Arc::new(ContendedStorage), &config, &RetryConfig::default());
        let err = store.claim_task("a", "W1").await.unwrap_err();
        assert!(matches!(err, StoreError::LockTimeout { .. }));
    }

    struct ReadOnlyStorage(InMemoryPlanStorage);

    impl PlanStorage for ReadOnlyStorage {
        fn location(&self) -> String {
            "read-only".to_string()
        }
        fn try_lock(&self) -> StoreResult<Option<StorageGuard>> {
            self.0.try_lock()
        }
        fn load(&self) -> StoreResult<Option<Plan>> {
            self.0.load()
        }
        fn save(&self, _plan: &Plan) -> StoreResult<()> {
            Err(StoreError::Io {
                path: PathBuf::from("read-only"),
                source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only"),
            })
        }
        fn remove(&self) -> StoreResult<()> {
            self.0.remove()
        }
    }

    #[tokio::test]
    async fn test_failed_save_leaves_plan_unchanged() {
        let inner = InMemoryPlanStorage::new();
        inner
            .save(&Plan::new("test", "").with_tasks(vec![Task::new("a", "A")]))
            .unwrap();
        let store = store_over(Arc::new(ReadOnlyStorage(inner)));

        let err = store.claim_task("a", "W1").await.unwrap_err();
        assert!(matches!(err, StoreError::Io { .. }));

        let task = store.get_task("a").await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        assert!(task.worker_id.is_none());
    }

    /// Records which threads touched the storage.
    struct ThreadTrackingStorage {
        inner: InMemoryPlanStorage,
        threads: std::sync::Mutex<Vec<ThreadId>>,
    }

    impl ThreadTrackingStorage {
        fn note(&self) {
            self.threads.lock().unwrap().push(thread::current().id());
        }
    }

    impl PlanStorage for ThreadTrackingStorage {
        fn location(&self) -> String {
            "tracking".to_string()
        }
        fn try_lock(&self) -> StoreResult<Option<StorageGuard>> {
            self.note();
            self.inner.try_lock()
        }
        fn load(&self) -> StoreResult<Option<Plan>> {
            self.note();
            self.inner.load()
        }
        fn save(&self, plan: &Plan) -> StoreResult<()> {
            self.note();
            self.inner.save(plan)
        }
        fn remove(&self) -> StoreResult<()> {
            self.note();
            self.inner.remove()
        }
    }

    #[tokio::test]
    async fn test_storage_io_runs_off_the_runtime_thread() {
        let storage = Arc::new(ThreadTrackingStorage {
            inner: InMemoryPlanStorage::with_plan(
                Plan::new("test", "").with_tasks(vec![Task::new("a", "A")]),
            ),
            threads: std::sync::Mutex::new(Vec::new()),
        });
        let store = store_over(storage.clone());

        store.claim_task("a", "W1").await.unwrap().unwrap();
        store.release_task("a", true, "").await.unwrap();
        store.reset().await.unwrap();

        let runtime_thread = thread::current().id();
        let threads = storage.threads.lock().unwrap();
        assert!(threads.len() >= 6);
        assert!(threads.iter().all(|id| *id != runtime_thread));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_stores_sharing_memory_storage_claim_once() {
        let storage: Arc<dyn PlanStorage> = Arc::new(InMemoryPlanStorage::with_plan(
            Plan::new("test", "").with_tasks(vec![Task::new("a", "A")]),
        ));

        let mut handles = Vec::new();
        for i in 0..8 {
            let store = store_over(Arc::clone(&storage));
            handles.push(tokio::spawn(async move {
                store.claim_task("a", &format!("W{i}")).await.unwrap()
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap().is_some() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }
}

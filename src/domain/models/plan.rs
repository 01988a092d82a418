//! Plan domain model.
//!
//! A plan is the ordered collection of tasks for one project. While a run is
//! active it is only mutated through the task store; the helpers here are the
//! pure read-modify pieces the store composes under its lock.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

use super::task::{Task, TaskStatus};

/// Lifecycle status of a whole plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    Idle,
    InProgress,
    Complete,
    Blocked,
}

impl Default for PlanStatus {
    fn default() -> Self {
        Self::Idle
    }
}

impl PlanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::InProgress => "in_progress",
            Self::Complete => "complete",
            Self::Blocked => "blocked",
        }
    }
}

impl fmt::Display for PlanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Derived counts, recomputed on every save.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanMetadata {
    #[serde(rename = "totalStories")]
    pub total_tasks: usize,
    #[serde(rename = "completedStories")]
    pub completed_tasks: usize,
    #[serde(rename = "inProgressStories")]
    pub in_progress_tasks: usize,
}

/// The persisted plan document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    pub project_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub status: PlanStatus,
    #[serde(default, rename = "stories")]
    pub tasks: Vec<Task>,
    #[serde(default)]
    pub metadata: PlanMetadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Point-in-time counts over a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSummary {
    pub project_name: String,
    pub status: PlanStatus,
    pub total: usize,
    pub completed: usize,
    pub in_progress: usize,
    pub failed: usize,
    pub blocked: usize,
    pub skipped: usize,
    pub pending: usize,
    pub completion_percentage: f64,
}

impl Plan {
    pub fn new(project_name: impl Into<String>, description: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            project_name: project_name.into(),
            description: description.into(),
            status: PlanStatus::Idle,
            tasks: Vec::new(),
            metadata: PlanMetadata::default(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Build a plan from prepared tasks.
    pub fn with_tasks(mut self, tasks: Vec<Task>) -> Self {
        self.tasks = tasks;
        self.refresh_metadata();
        self
    }

    /// Append a new task with a generated `task-NNN` id and return the id.
    pub fn add_task(
        &mut self,
        title: impl Into<String>,
        description: impl Into<String>,
        acceptance_criteria: Vec<String>,
        priority: i32,
        dependencies: Vec<String>,
    ) -> String {
        let mut n = self.tasks.len() + 1;
        let mut id = format!("task-{n:03}");
        while self.task(&id).is_some() {
            n += 1;
            id = format!("task-{n:03}");
        }

        let mut task = Task::new(id.clone(), title)
            .with_description(description)
            .with_priority(priority)
            .with_criteria(acceptance_criteria);
        task.dependencies = dependencies;
        self.tasks.push(task);
        self.refresh_metadata();
        id
    }

    pub fn task(&self, id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    pub fn task_mut(&mut self, id: &str) -> Option<&mut Task> {
        self.tasks.iter_mut().find(|t| t.id == id)
    }

    /// Recompute derived metadata and bump `updated_at`.
    pub fn touch(&mut self) {
        self.refresh_metadata();
        self.updated_at = Utc::now();
    }

    pub fn refresh_metadata(&mut self) {
        self.metadata = PlanMetadata {
            total_tasks: self.tasks.len(),
            completed_tasks: self.tasks.iter().filter(|t| t.passed).count(),
            in_progress_tasks: self
                .tasks
                .iter()
                .filter(|t| t.status == TaskStatus::InProgress)
                .count(),
        };
    }

    fn passed_ids(&self) -> HashSet<&str> {
        self.tasks
            .iter()
            .filter(|t| t.passed)
            .map(|t| t.id.as_str())
            .collect()
    }

    /// Dispatch candidates: not passed, not skipped, not in progress or
    /// blocked, every hard dependency passed. Sorted by priority (stable).
    pub fn ready_tasks(&self) -> Vec<&Task> {
        let passed = self.passed_ids();
        let mut ready: Vec<&Task> = self
            .tasks
            .iter()
            .filter(|t| {
                !t.passed
                    && !matches!(
                        t.status,
                        TaskStatus::InProgress | TaskStatus::Blocked | TaskStatus::Skipped
                    )
                    && t.hard_dependency_ids().all(|dep| passed.contains(dep))
            })
            .collect();
        ready.sort_by_key(|t| t.priority);
        ready
    }

    /// True when every task has passed or was skipped. Vacuously true.
    pub fn is_all_complete(&self) -> bool {
        self.tasks.iter().all(Task::is_settled)
    }

    /// True iff there is unfinished work and all of it is blocked.
    pub fn is_blocked(&self) -> bool {
        let mut incomplete = self.tasks.iter().filter(|t| !t.is_settled()).peekable();
        incomplete.peek().is_some() && incomplete.all(|t| t.status == TaskStatus::Blocked)
    }

    pub fn summary(&self) -> StatusSummary {
        let total = self.tasks.len();
        let completed = self.tasks.iter().filter(|t| t.passed).count();
        let count = |status: TaskStatus| {
            self.tasks
                .iter()
                .filter(|t| !t.passed && t.status == status)
                .count()
        };
        let in_progress = count(TaskStatus::InProgress);
        let failed = count(TaskStatus::Failed);
        let blocked = count(TaskStatus::Blocked);
        let skipped = count(TaskStatus::Skipped);
        let pending = total.saturating_sub(completed + in_progress + failed + blocked + skipped);

        #[allow(clippy::cast_precision_loss)]
        let completion_percentage = if total == 0 {
            0.0
        } else {
            completed as f64 / total as f64 * 100.0
        };

        StatusSummary {
            project_name: self.project_name.clone(),
            status: self.status,
            total,
            completed,
            in_progress,
            failed,
            blocked,
            skipped,
            pending,
            completion_percentage,
        }
    }
}

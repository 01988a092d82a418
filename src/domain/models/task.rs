//! Task domain model.
//!
//! Tasks are the units of work in a plan. They reference each other through
//! dependency specs of the form `id` or `id:kind`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Status of a task in the execution pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting to be claimed
    Pending,
    /// Claimed by exactly one worker
    InProgress,
    /// Verified and passed
    Completed,
    /// Last attempt failed, eligible for retry
    Failed,
    /// Exhausted retries or halted by escalation
    Blocked,
    /// Deliberately left out of the run
    Skipped,
}

impl Default for TaskStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Blocked => "blocked",
            Self::Skipped => "skipped",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "in_progress" | "in-progress" | "running" => Some(Self::InProgress),
            "completed" | "complete" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "blocked" => Some(Self::Blocked),
            "skipped" => Some(Self::Skipped),
            _ => None,
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a dependency edge is satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyKind {
    /// Target must have passed
    Hard,
    /// Target must be estimated past the soft threshold
    Soft,
    /// Target must have at least started
    Interface,
}

impl Default for DependencyKind {
    fn default() -> Self {
        Self::Hard
    }
}

impl DependencyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hard => "hard",
            Self::Soft => "soft",
            Self::Interface => "interface",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "hard" => Some(Self::Hard),
            "soft" => Some(Self::Soft),
            "interface" => Some(Self::Interface),
            _ => None,
        }
    }
}

/// A parsed dependency spec (`id` or `id:kind`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DependencySpec {
    pub task_id: String,
    pub kind: DependencyKind,
}

impl DependencySpec {
    pub fn new(task_id: impl Into<String>, kind: DependencyKind) -> Self {
        Self {
            task_id: task_id.into(),
            kind,
        }
    }

    /// Parse a raw spec. An unknown kind is rejected.
    pub fn parse(raw: &str) -> Result<Self, String> {
        match raw.split_once(':') {
            Some((id, kind)) => {
                let kind = DependencyKind::from_str(kind).ok_or_else(|| {
                    format!("Invalid dependency spec '{raw}': unknown kind '{kind}'")
                })?;
                Ok(Self::new(id.trim(), kind))
            }
            None => Ok(Self::new(raw.trim(), DependencyKind::Hard)),
        }
    }

    /// Target id of a raw spec, with any kind suffix stripped.
    pub fn target_of(raw: &str) -> &str {
        raw.split_once(':').map_or(raw, |(id, _)| id).trim()
    }
}

impl fmt::Display for DependencySpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            DependencyKind::Hard => f.write_str(&self.task_id),
            kind => write!(f, "{}:{}", self.task_id, kind.as_str()),
        }
    }
}

/// One unit of work inside a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    /// Lower runs sooner
    #[serde(default = "default_priority")]
    pub priority: i32,
    /// Raw dependency specs, in declaration order
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub acceptance_criteria: Vec<String>,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default, rename = "passes")]
    pub passed: bool,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub worker_id: Option<String>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub scope_reduced: bool,
}

const fn default_priority() -> i32 {
    1
}

impl Task {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            description: String::new(),
            priority: default_priority(),
            dependencies: Vec::new(),
            acceptance_criteria: Vec::new(),
            status: TaskStatus::Pending,
            passed: false,
            attempts: 0,
            notes: String::new(),
            worker_id: None,
            started_at: None,
            completed_at: None,
            scope_reduced: false,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub const fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_dependency(mut self, spec: impl Into<String>) -> Self {
        self.dependencies.push(spec.into());
        self
    }

    pub fn with_criteria<I, S>(mut self, criteria: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.acceptance_criteria
            .extend(criteria.into_iter().map(Into::into));
        self
    }

    /// Dependency target ids with kind suffixes stripped.
    pub fn dependency_ids(&self) -> impl Iterator<Item = &str> {
        self.dependencies.iter().map(|d| DependencySpec::target_of(d))
    }

    /// Target ids of hard dependencies only. Unparseable specs count as hard.
    pub fn hard_dependency_ids(&self) -> impl Iterator<Item = &str> {
        self.dependencies.iter().filter_map(|raw| {
            match DependencySpec::parse(raw) {
                Ok(spec) if spec.kind != DependencyKind::Hard => None,
                _ => Some(DependencySpec::target_of(raw)),
            }
        })
    }

    /// Whether the task no longer needs work.
    pub fn is_settled(&self) -> bool {
        self.passed || self.status == TaskStatus::Skipped
    }

    /// Append a note line. Notes are never rewritten.
    pub fn append_note(&mut self, note: &str) {
        if note.is_empty() {
            return;
        }
        if !self.notes.is_empty() {
            self.notes.push('\n');
        }
        self.notes.push_str(note);
    }
}

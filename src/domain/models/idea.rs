//! Queued idea model. Each idea is a description waiting to become a plan.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdeaStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Skipped,
}

impl Default for IdeaStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl IdeaStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }

    /// Finished items are dropped by `clear_completed`.
    pub const fn is_finished(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Skipped)
    }
}

impl fmt::Display for IdeaStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedIdea {
    pub id: String,
    pub description: String,
    #[serde(default)]
    pub status: IdeaStatus,
    /// Lower is processed sooner
    #[serde(default = "default_priority")]
    pub priority: i32,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub plan_path: Option<String>,
    #[serde(default)]
    pub iterations: u32,
    #[serde(default)]
    pub notes: String,
}

pub(crate) const fn default_priority() -> i32 {
    1
}

impl QueuedIdea {
    pub fn new(id: impl Into<String>, description: impl Into<String>, priority: i32) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            status: IdeaStatus::Pending,
            priority,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            error: None,
            plan_path: None,
            iterations: 0,
            notes: String::new(),
        }
    }
}

/// Per-status tallies.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    pub pending: usize,
    pub in_progress: usize,
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub total: usize,
}

//! Escalation ladder data types.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Highest escalation level. Terminal.
pub const MAX_ESCALATION_LEVEL: u32 = 6;

/// Recovery strategy, one per escalation level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryAction {
    SimpleRetry,
    AlternateApproach,
    InjectArchitect,
    AskHuman,
    ReduceScope,
    MarkBlocked,
}

impl RecoveryAction {
    /// Strategy for an attempt number, clamped to `1..=6`.
    pub const fn for_level(level: u32) -> Self {
        match level {
            0 | 1 => Self::SimpleRetry,
            2 => Self::AlternateApproach,
            3 => Self::InjectArchitect,
            4 => Self::AskHuman,
            5 => Self::ReduceScope,
            _ => Self::MarkBlocked,
        }
    }

    pub const fn level(&self) -> u32 {
        match self {
            Self::SimpleRetry => 1,
            Self::AlternateApproach => 2,
            Self::InjectArchitect => 3,
            Self::AskHuman => 4,
            Self::ReduceScope => 5,
            Self::MarkBlocked => 6,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SimpleRetry => "simple_retry",
            Self::AlternateApproach => "alternate_approach",
            Self::InjectArchitect => "inject_architect",
            Self::AskHuman => "ask_human",
            Self::ReduceScope => "reduce_scope",
            Self::MarkBlocked => "mark_blocked",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::SimpleRetry => "Simple retry with same approach",
            Self::AlternateApproach => "Generate alternate implementation strategy",
            Self::InjectArchitect => "Inject architect agent for deeper analysis",
            Self::AskHuman => "Ask human for guidance with specific question",
            Self::ReduceScope => "Reduce scope to 80% of original functionality",
            Self::MarkBlocked => "Mark story as blocked (last resort)",
        }
    }

    pub const fn requires_human(&self) -> bool {
        matches!(self, Self::AskHuman)
    }

    /// Whether reaching this level stops further work on the task by itself.
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::MarkBlocked)
    }
}

impl fmt::Display for RecoveryAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A strategy with its human-readable description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryStrategy {
    pub action: RecoveryAction,
    pub description: String,
    pub requires_human: bool,
}

impl From<RecoveryAction> for RecoveryStrategy {
    fn from(action: RecoveryAction) -> Self {
        Self {
            action,
            description: action.description().to_string(),
            requires_human: action.requires_human(),
        }
    }
}

/// Question put to a human at level 4.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HumanQuestion {
    pub task_id: String,
    pub question: String,
    pub context: String,
    /// At most the last five errors
    pub error_history: Vec<String>,
    /// At most four suggested answers
    pub options: Vec<String>,
}

/// Modifications a recovery strategy asks the next attempt to apply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RecoveryDirective {
    /// Retry unchanged
    Retry,
    /// Try a different approach informed by recent errors
    AlternateApproach { prompt: String },
    /// Run an architectural analysis pass first
    ArchitectAnalysis { prompt: String },
    /// Human answer to fold into the next attempt
    HumanGuidance { guidance: String },
    /// Waiting on a human; no answer callback was available
    AwaitingHuman,
    /// Work on a reduced set of acceptance criteria
    ReduceScope {
        original_count: usize,
        reduced_criteria: Vec<String>,
        note: String,
    },
    /// Stop working on the task
    Blocked {
        reason: String,
        error_history: Vec<String>,
    },
}

/// Result of executing a recovery strategy for one task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryOutcome {
    pub task_id: String,
    pub action: RecoveryAction,
    pub continue_execution: bool,
    pub directive: RecoveryDirective,
    pub human_question: Option<HumanQuestion>,
}

/// Snapshot of a task's escalation state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationSummary {
    pub task_id: String,
    pub error_count: usize,
    pub errors: Vec<String>,
    pub current_level: u32,
    pub next_action: RecoveryAction,
}

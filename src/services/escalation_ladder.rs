//! Per-task failure history and progressive recovery selection.

use std::collections::HashMap;

use tracing::{debug, info};

use crate::domain::models::{
    EscalationSummary, HumanQuestion, RecoveryAction, RecoveryDirective, RecoveryOutcome,
    RecoveryStrategy, Task, MAX_ESCALATION_LEVEL,
};

const ALTERNATE_APPROACH_ERRORS: usize = 3;
const HUMAN_QUESTION_ERRORS: usize = 5;
const HUMAN_QUESTION_OPTIONS: usize = 4;
const SCOPE_REDUCTION_NOTE: &str = "Scope reduced to 80% - focus on core functionality first";
const BLOCKED_REASON: &str = "Exhausted all recovery strategies";

/// Escalation state for one orchestration run, keyed by task id.
#[derive(Debug, Clone, Default)]
pub struct EscalationLadder {
    history: HashMap<String, Vec<String>>,
}

fn last_n(errors: &[String], n: usize) -> &[String] {
    &errors[errors.len().saturating_sub(n)..]
}

/// `ceil(0.8 * n)`, at least one, never more than `n`.
fn reduced_count(n: usize) -> usize {
    ((4 * n).div_ceil(5)).max(1).min(n)
}

impl EscalationLadder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_failure(&mut self, task_id: &str, error: impl Into<String>) {
        let errors = self.history.entry(task_id.to_string()).or_default();
        errors.push(error.into());
        debug!(task_id, failures = errors.len(), "failure recorded");
    }

    /// Forget a task's failures, e.g. after an explicit restart.
    pub fn reset(&mut self, task_id: &str) {
        self.history.remove(task_id);
    }

    pub fn error_history(&self, task_id: &str) -> &[String] {
        self.history.get(task_id).map_or(&[][..], Vec::as_slice)
    }

    /// `min(failures + 1, 6)`
    pub fn current_level(&self, task_id: &str) -> u32 {
        let failures = u32::try_from(self.error_history(task_id).len()).unwrap_or(u32::MAX);
        failures.saturating_add(1).min(MAX_ESCALATION_LEVEL)
    }

    /// Strategy for an attempt number, clamped to `1..=6`.
    pub fn recovery_action(attempt: u32) -> RecoveryStrategy {
        RecoveryAction::for_level(attempt).into()
    }

    pub const fn should_escalate(attempt: u32) -> bool {
        attempt < MAX_ESCALATION_LEVEL
    }

    pub fn summary(&self, task_id: &str) -> EscalationSummary {
        let errors = self.error_history(task_id).to_vec();
        let current_level = self.current_level(task_id);
        EscalationSummary {
            task_id: task_id.to_string(),
            error_count: errors.len(),
            errors,
            current_level,
            next_action: RecoveryAction::for_level(current_level),
        }
    }

    /// Question for a human about a task that keeps failing.
    ///
    /// Suggested options are led by hints matched from the error text.
    pub fn build_human_question(&self, task: &Task) -> HumanQuestion {
        let errors = self.error_history(&task.id);
        let error_text = errors.join(" ").to_lowercase();
        let mentions = |words: &[&str]| words.iter().any(|w| error_text.contains(w));

        let mut options: Vec<String> = Vec::new();
        if mentions(&["timeout", "connection"]) {
            options.push("Check network/service availability".to_string());
        }
        if mentions(&["dependency", "import"]) {
            options.push("Install missing dependencies".to_string());
        }
        if mentions(&["permission", "access"]) {
            options.push("Grant necessary permissions/access".to_string());
        }
        options.extend(
            [
                "Provide specific implementation guidance",
                "Skip this task and continue",
                "Modify the acceptance criteria",
                "Break into smaller sub-tasks",
            ]
            .map(String::from),
        );
        options.truncate(HUMAN_QUESTION_OPTIONS);

        HumanQuestion {
            task_id: task.id.clone(),
            question: format!("How should we handle the failures in '{}'?", task.title),
            context: format!("Task: {}\n\nDescription: {}", task.title, task.description),
            error_history: last_n(errors, HUMAN_QUESTION_ERRORS).to_vec(),
            options,
        }
    }

    /// Produce the effect of `action` for `task`.
    ///
    /// For [`RecoveryAction::AskHuman`], `human_answer` carries the reply if a
    /// responder was consulted; without one the task cannot continue.
    pub fn execute_recovery(
        &self,
        action: RecoveryAction,
        task: &Task,
        human_answer: Option<String>,
    ) -> RecoveryOutcome {
        let errors = self.error_history(&task.id);
        let mut human_question = None;

        let (directive, continue_execution) = match action {
            RecoveryAction::SimpleRetry => (RecoveryDirective::Retry, true),
            RecoveryAction::AlternateApproach => {
                let recent = last_n(errors, ALTERNATE_APPROACH_ERRORS);
                let summary = if recent.is_empty() {
                    "Previous attempts failed".to_string()
                } else {
                    recent.join("; ")
                };
                let prompt = format!(
                    "Previous approaches failed with: {summary}\n\n\
                     Try a fundamentally different approach to '{}'. \
                     Avoid the patterns that caused these failures.",
                    task.title
                );
                (RecoveryDirective::AlternateApproach { prompt }, true)
            }
            RecoveryAction::InjectArchitect => {
                let prompt = format!(
                    "Task '{}' has failed {} times.\n\
                     Analyze the design before another attempt: identify the root cause, \
                     check for missing prerequisites, and propose a step-by-step plan.\n\
                     Description: {}",
                    task.title,
                    errors.len(),
                    task.description
                );
                (RecoveryDirective::ArchitectAnalysis { prompt }, true)
            }
            RecoveryAction::AskHuman => {
                human_question = Some(self.build_human_question(task));
                match human_answer {
                    Some(guidance) => (RecoveryDirective::HumanGuidance { guidance }, true),
                    None => (RecoveryDirective::AwaitingHuman, false),
                }
            }
            RecoveryAction::ReduceScope => {
                let keep = reduced_count(task.acceptance_criteria.len());
                (
                    RecoveryDirective::ReduceScope {
                        original_count: task.acceptance_criteria.len(),
                        reduced_criteria: task.acceptance_criteria[..keep].to_vec(),
                        note: SCOPE_REDUCTION_NOTE.to_string(),
                    },
                    true,
                )
            }
            RecoveryAction::MarkBlocked => (
                RecoveryDirective::Blocked {
                    reason: BLOCKED_REASON.to_string(),
                    error_history: errors.to_vec(),
                },
                false,
            ),
        };

        info!(
            task_id = %task.id,
            action = %action,
            continue_execution,
            "recovery strategy selected"
        );

        RecoveryOutcome {
            task_id: task.id.clone(),
            action,
            continue_execution,
            directive,
            human_question,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failing_task(ladder: &mut EscalationLadder, errors: &[&str]) -> Task {
        let task = Task::new("task-001", "Login flow")
            .with_description("Implement login")
            .with_criteria(["a", "b", "c", "d", "e"]);
        for error in errors {
            ladder.record_failure(&task.id, *error);
        }
        task
    }

    #[test]
    fn test_recovery_action_clamps() {
        assert_eq!(
            EscalationLadder::recovery_action(0).action,
            RecoveryAction::SimpleRetry
        );
        assert_eq!(
            EscalationLadder::recovery_action(1).action,
            RecoveryAction::SimpleRetry
        );
        assert_eq!(
            EscalationLadder::recovery_action(6).action,
            RecoveryAction::MarkBlocked
        );
        assert_eq!(
            EscalationLadder::recovery_action(600).action,
            RecoveryAction::MarkBlocked
        );
        assert_eq!(
            EscalationLadder::recovery_action(2).description,
            "Generate alternate implementation strategy"
        );
    }

    #[test]
    fn test_level_tracks_failures_and_caps() {
        let mut ladder = EscalationLadder::new();
        assert_eq!(ladder.current_level("t"), 1);
        for _ in 0..3 {
            ladder.record_failure("t", "err");
        }
        assert_eq!(ladder.current_level("t"), 4);
        for _ in 0..10 {
            ladder.record_failure("t", "err");
        }
        assert_eq!(ladder.current_level("t"), 6);

        ladder.reset("t");
        assert_eq!(ladder.current_level("t"), 1);
        assert!(ladder.error_history("t").is_empty());
    }

    #[test]
    fn test_should_escalate_below_terminal() {
        assert!(EscalationLadder::should_escalate(5));
        assert!(!EscalationLadder::should_escalate(6));
    }

    #[test]
    fn test_alternate_approach_uses_last_three_errors() {
        let mut ladder = EscalationLadder::new();
        let task = failing_task(&mut ladder, &["e1", "e2", "e3", "e4"]);
        let outcome = ladder.execute_recovery(RecoveryAction::AlternateApproach, &task, None);

        assert!(outcome.continue_execution);
        let RecoveryDirective::AlternateApproach { prompt } = outcome.directive else {
            panic!("expected alternate approach");
        };
        assert!(prompt.contains("e2; e3; e4"));
        assert!(!prompt.contains("e1"));
    }

    #[test]
    fn test_ask_human_halts_without_answer() {
        let mut ladder = EscalationLadder::new();
        let task = failing_task(
            &mut ladder,
            &["permission denied", "connection timeout", "x", "y", "z", "w"],
        );
        let outcome = ladder.execute_recovery(RecoveryAction::AskHuman, &task, None);

        assert!(!outcome.continue_execution);
        assert_eq!(outcome.directive, RecoveryDirective::AwaitingHuman);
        let question = outcome.human_question.unwrap();
        assert_eq!(
            question.question,
            "How should we handle the failures in 'Login flow'?"
        );
        assert_eq!(question.options.len(), 4);
        assert_eq!(question.options[0], "Check network/service availability");
        assert_eq!(question.options[1], "Grant necessary permissions/access");
        assert_eq!(question.options[2], "Provide specific implementation guidance");
        assert_eq!(question.error_history.len(), 5);
        assert_eq!(question.error_history[0], "connection timeout");
    }

    #[test]
    fn test_ask_human_continues_with_answer() {
        let mut ladder = EscalationLadder::new();
        let task = failing_task(&mut ladder, &["a", "b", "c"]);
        let outcome = ladder.execute_recovery(
            RecoveryAction::AskHuman,
            &task,
            Some("use the staging database".into()),
        );
        assert!(outcome.continue_execution);
        assert_eq!(
            outcome.directive,
            RecoveryDirective::HumanGuidance {
                guidance: "use the staging database".into()
            }
        );
        assert!(outcome.human_question.is_some());
    }

    #[test]
    fn test_reduce_scope_keeps_ceil_eighty_percent() {
        assert_eq!(reduced_count(5), 4);
        assert_eq!(reduced_count(3), 3);
        assert_eq!(reduced_count(1), 1);
        assert_eq!(reduced_count(0), 0);
        assert_eq!(reduced_count(10), 8);

        let ladder = EscalationLadder::new();
        let task = Task::new("t", "T").with_criteria(["a", "b", "c", "d", "e"]);
        let outcome = ladder.execute_recovery(RecoveryAction::ReduceScope, &task, None);
        let RecoveryDirective::ReduceScope {
            original_count,
            reduced_criteria,
            ..
        } = outcome.directive
        else {
            panic!("expected reduce scope");
        };
        assert_eq!(original_count, 5);
        assert_eq!(reduced_criteria, vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn test_mark_blocked_carries_full_history() {
        let mut ladder = EscalationLadder::new();
        let task = failing_task(&mut ladder, &["1", "2", "3", "4", "5"]);
        assert_eq!(ladder.current_level(&task.id), 6);

        let outcome = ladder.execute_recovery(RecoveryAction::MarkBlocked, &task, None);
        assert!(!outcome.continue_execution);
        assert_eq!(
            outcome.directive,
            RecoveryDirective::Blocked {
                reason: "Exhausted all recovery strategies".into(),
                error_history: vec!["1", "2", "3", "4", "5"]
                    .into_iter()
                    .map(String::from)
                    .collect(),
            }
        );
    }

    #[test]
    fn test_summary_reports_next_action() {
        let mut ladder = EscalationLadder::new();
        ladder.record_failure("t", "oops");
        let summary = ladder.summary("t");
        assert_eq!(summary.error_count, 1);
        assert_eq!(summary.current_level, 2);
        assert_eq!(summary.next_action, RecoveryAction::AlternateApproach);
    }
}

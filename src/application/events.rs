//! Scheduler events for hosts that want to observe a run.

use serde::Serialize;
use tokio::sync::mpsc;

use super::worker_pool::RunOutcome;
use crate::domain::models::RecoveryAction;

/// Something the scheduler did. Delivered on an optional mpsc channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum OrchestratorEvent {
    BatchStarted {
        iteration: u32,
        task_ids: Vec<String>,
    },
    TaskClaimed {
        task_id: String,
        worker_id: String,
        attempt: u32,
    },
    ClaimConflict {
        task_id: String,
        worker_id: String,
    },
    TaskReleased {
        task_id: String,
        worker_id: String,
        passed: bool,
        error: Option<String>,
    },
    PolicyApplied {
        task_id: String,
        policies: Vec<String>,
    },
    Escalated {
        task_id: String,
        level: u32,
        action: RecoveryAction,
        continue_execution: bool,
    },
    BatchCompleted {
        iteration: u32,
        passed: usize,
        failed: usize,
    },
    Halted {
        outcome: RunOutcome,
        reason: String,
    },
}

/// Optional sender half of the event channel.
///
/// Events are dropped silently when no channel is attached or the receiver
/// is gone. A full channel applies backpressure to the scheduler.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<mpsc::Sender<OrchestratorEvent>>,
}

impl EventSink {
    pub const fn new(tx: mpsc::Sender<OrchestratorEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    pub const fn disabled() -> Self {
        Self { tx: None }
    }

    pub async fn emit(&self, event: OrchestratorEvent) {
        if let Some(tx) = &self.tx {
            // Receiver may have been dropped by the host
            let _ = tx.send(event).await;
        }
    }
}

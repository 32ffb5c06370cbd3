//! Run state of a single timer, as reported to clients

use serde::{Deserialize, Serialize};

use crate::{model::step::StepId, utils::time::format_duration_ms};

/// Where a timer is in its run lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    #[default]
    Idle,
    Running,
    Paused,
}

/// How the last run of a timer ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunOutcome {
    Completed,
    Aborted,
}

/// Snapshot of a timer's run
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunState {
    pub status: RunStatus,
    pub active_step_id: Option<StepId>,
    pub remaining_ms: Option<u64>,
    /// Stopwatch elapsed time
    pub elapsed_ms: u64,
    pub last_outcome: Option<RunOutcome>,
}

impl RunState {
    /// State of a timer that never ran
    pub fn idle() -> Self {
        Self::default()
    }

    pub fn is_running(&self) -> bool {
        self.status == RunStatus::Running
    }

    pub fn is_paused(&self) -> bool {
        self.status == RunStatus::Paused
    }

    /// Remaining time of the active step, if it has one
    pub fn remaining_display(&self) -> Option<String> {
        self.remaining_ms.map(format_duration_ms)
    }
}

/// A run state change of one timer, broadcast to subscribers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunUpdate {
    pub timer_id: String,
    pub state: RunState,
    /// The timer was deleted; no further updates follow
    pub forgotten: bool,
}

impl RunUpdate {
    /// New state of a timer that still exists
    pub fn new(timer_id: &str, state: RunState) -> Self {
        Self {
            timer_id: timer_id.to_string(),
            state,
            forgotten: false,
        }
    }

    /// Sent once after a timer is deleted
    pub fn forgotten(timer_id: &str) -> Self {
        Self {
            forgotten: true,
            ..Self::new(timer_id, RunState::idle())
        }
    }
}

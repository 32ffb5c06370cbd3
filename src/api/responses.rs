//! API request and response structures

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    model::{
        step::StepKind,
        timer::{LogEntry, Timer, TimerMode},
        tree::DropTarget,
    },
    state::RunState,
};

/// A timer together with its current run state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimerView {
    #[serde(flatten)]
    pub timer: Timer,
    pub run: RunState,
}

/// Response of the run control endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunResponse {
    pub timer_id: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub run: RunState,
}

impl RunResponse {
    pub fn new(timer_id: &str, message: impl Into<String>, run: RunState) -> Self {
        Self {
            timer_id: timer_id.to_string(),
            message: message.into(),
            timestamp: Utc::now(),
            run,
        }
    }
}

/// Response of `POST /timers/:id/mark`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarkResponse {
    pub log: LogEntry,
    /// Elapsed time as `1h 02m 03s`
    pub display: String,
}

/// Server status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub timers: usize,
    pub running: usize,
    pub uptime: String,
    pub port: u16,
    pub host: String,
    pub last_action: Option<String>,
    pub last_action_time: Option<DateTime<Utc>>,
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: DateTime<Utc>,
    pub version: String,
}

impl HealthResponse {
    pub fn ok() -> Self {
        Self {
            status: "ok".to_string(),
            timestamp: Utc::now(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateTimerRequest {
    pub name: String,
    #[serde(default)]
    pub mode: TimerMode,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateTimerRequest {
    pub name: Option<String>,
    pub locked: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InsertStepRequest {
    pub target: DropTarget,
    pub step: StepKind,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MoveStepRequest {
    pub target: DropTarget,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NameRequest {
    pub name: Option<String>,
}

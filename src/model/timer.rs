//! Timer definitions and stopwatch log entries

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::step::Step;

/// How a timer is run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimerMode {
    Alarm,
    #[default]
    Sequence,
    Stopwatch,
}

/// A mark recorded while a stopwatch runs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub id: String,
    pub name: String,
    pub elapsed_ms: u64,
    pub logged_at_epoch_ms: i64,
}

impl LogEntry {
    pub fn new(name: String, elapsed_ms: u64, logged_at_epoch_ms: i64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name,
            elapsed_ms,
            logged_at_epoch_ms,
        }
    }
}

/// A named step tree owned by the user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Timer {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub steps: Vec<Step>,
    #[serde(default)]
    pub mode: TimerMode,
    #[serde(default)]
    pub locked: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub logs: Vec<LogEntry>,
}

impl Timer {
    /// Create an empty timer. `name` must already be validated.
    pub fn new(name: String, mode: TimerMode) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name,
            steps: Vec::new(),
            mode,
            locked: false,
            logs: Vec::new(),
        }
    }

    /// Lock or unlock editing. Stopwatch timers stay unlocked.
    pub fn set_locked(&mut self, locked: bool) {
        self.locked = locked && self.mode != TimerMode::Stopwatch;
    }

    pub fn rename_log(&mut self, log_id: &str, name: String) -> bool {
        match self.logs.iter_mut().find(|log| log.id == log_id) {
            Some(log) => {
                log.name = name;
                true
            }
            None => false,
        }
    }

    pub fn delete_log(&mut self, log_id: &str) -> bool {
        let before = self.logs.len();
        self.logs.retain(|log| log.id != log_id);
        self.logs.len() != before
    }
}

/// Trim `requested` and make it unique among `existing` names by appending
/// " 2", " 3", ... Returns `None` for a blank name.
pub fn unique_name<'a>(requested: &str, existing: impl IntoIterator<Item = &'a str>) -> Option<String> {
    let base = requested.trim();
    if base.is_empty() {
        return None;
    }

    let taken: Vec<&str> = existing.into_iter().map(str::trim).collect();
    if !taken.contains(&base) {
        return Some(base.to_string());
    }

    (2..)
        .map(|n| format!("{} {}", base, n))
        .find(|candidate| !taken.contains(&candidate.as_str()))
}

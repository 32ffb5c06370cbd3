//! Main application state: the timer registry and the run supervisor

use std::{
    sync::{Mutex, MutexGuard},
    time::Instant,
};

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::{
    model::{
        step::{Step, StepId, StepKind},
        timer::{unique_name, LogEntry, Timer, TimerMode},
        tree::{with_fresh_ids, DropTarget, StepTree},
    },
    runner::TimerRunner,
    store::{JsonFileStore, StoreError},
    utils::time::format_duration_ms,
};

use super::run_state::RunState;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("timer {0} not found")]
    TimerNotFound(String),
    #[error("step {0} not found")]
    StepNotFound(StepId),
    #[error("log entry {0} not found")]
    LogNotFound(String),
    #[error("timer {0} is locked")]
    Locked(String),
    #[error("stopwatch {0} is not running")]
    NotRunning(String),
    #[error("timer {0} is not a stopwatch")]
    NotStopwatch(String),
    #[error("timer names cannot be blank")]
    InvalidName,
    #[error("a step cannot be placed there")]
    InvalidPlacement,
    #[error(transparent)]
    Storage(#[from] StoreError),
}

/// Shared state behind every request handler
pub struct AppState {
    timers: Mutex<Vec<Timer>>,
    pub runner: TimerRunner,
    store: Option<JsonFileStore>,
    /// Server metadata
    pub start_time: Instant,
    pub port: u16,
    pub host: String,
    /// Last action tracking
    last_action: Mutex<Option<String>>,
    last_action_time: Mutex<Option<DateTime<Utc>>>,
}

impl AppState {
    /// Wrap the loaded timers; without a store nothing is written to disk
    pub fn new(port: u16, host: String, runner: TimerRunner, store: Option<JsonFileStore>, timers: Vec<Timer>) -> Self {
        Self {
            timers: Mutex::new(timers),
            runner,
            store,
            start_time: Instant::now(),
            port,
            host,
            last_action: Mutex::new(None),
            last_action_time: Mutex::new(None),
        }
    }

    /// Copy of every timer, in creation order
    pub fn list_timers(&self) -> Vec<Timer> {
        self.lock_timers().clone()
    }

    /// Look up one timer by id
    pub fn get_timer(&self, id: &str) -> Result<Timer, AppError> {
        self.lock_timers()
            .iter()
            .find(|timer| timer.id == id)
            .cloned()
            .ok_or_else(|| AppError::TimerNotFound(id.to_string()))
    }

    /// Create an empty timer; a taken name gets a numeric suffix
    pub async fn create_timer(&self, name: &str, mode: TimerMode) -> Result<Timer, AppError> {
        let timer = {
            let mut timers = self.lock_timers();
            let name = unique_name(name, timers.iter().map(|t| t.name.as_str())).ok_or(AppError::InvalidName)?;
            let timer = Timer::new(name, mode);
            timers.push(timer.clone());
            timer
        };
        info!("Created {:?} timer {} ({})", timer.mode, timer.name, timer.id);
        self.record_action("create");
        self.persist().await?;
        Ok(timer)
    }

    /// Rename and/or lock a timer
    pub async fn update_timer(&self, id: &str, name: Option<&str>, locked: Option<bool>) -> Result<Timer, AppError> {
        let timer = {
            let mut timers = self.lock_timers();
            let others: Vec<String> = timers.iter().filter(|t| t.id != id).map(|t| t.name.clone()).collect();
            let timer = timers
                .iter_mut()
                .find(|timer| timer.id == id)
                .ok_or_else(|| AppError::TimerNotFound(id.to_string()))?;

            if let Some(name) = name {
                timer.name = unique_name(name, others.iter().map(String::as_str)).ok_or(AppError::InvalidName)?;
            }
            if let Some(locked) = locked {
                timer.set_locked(locked);
            }
            timer.clone()
        };
        self.record_action("update");
        self.persist().await?;
        Ok(timer)
    }

    /// Delete a timer, stopping it first
    pub async fn delete_timer(&self, id: &str) -> Result<(), AppError> {
        {
            let mut timers = self.lock_timers();
            let before = timers.len();
            timers.retain(|timer| timer.id != id);
            if timers.len() == before {
                return Err(AppError::TimerNotFound(id.to_string()));
            }
        }
        self.runner.forget(id);
        info!("Deleted timer {}", id);
        self.record_action("delete");
        self.persist().await
    }

    /// Insert a new step, with fresh ids for it and its children
    pub async fn insert_step(&self, id: &str, target: &DropTarget, kind: StepKind) -> Result<Timer, AppError> {
        let step = with_fresh_ids(Step::new(kind));
        self.edit_steps(id, "insert step", |tree| {
            require_target(tree, target)?;
            let edited = tree.insert_at(target, step);
            if edited.count() == tree.count() {
                return Err(AppError::InvalidPlacement);
            }
            Ok(edited)
        })
        .await
    }

    /// Replace the settings of a step, keeping its id
    pub async fn replace_step(&self, id: &str, step_id: &StepId, kind: StepKind) -> Result<Timer, AppError> {
        self.edit_steps(id, "edit step", |tree| {
            require_step(tree, step_id)?;
            let mut replacement = Step::with_id(step_id.clone(), kind);
            if let Some(children) = replacement.children_mut() {
                *children = std::mem::take(children).into_iter().map(with_fresh_ids).collect();
            }
            Ok(tree.replace(step_id, replacement))
        })
        .await
    }

    /// Remove a step together with its children
    pub async fn delete_step(&self, id: &str, step_id: &StepId) -> Result<Timer, AppError> {
        self.edit_steps(id, "delete step", |tree| {
            require_step(tree, step_id)?;
            Ok(tree.delete(step_id))
        })
        .await
    }

    /// Move a step and its subtree; dropping it into itself is refused
    pub async fn move_step(&self, id: &str, step_id: &StepId, target: &DropTarget) -> Result<Timer, AppError> {
        self.edit_steps(id, "move step", |tree| {
            require_step(tree, step_id)?;
            require_target(tree, target)?;
            if let DropTarget::Relative { target, .. } = target {
                if target == step_id || tree.is_descendant(step_id, target) {
                    return Err(AppError::InvalidPlacement);
                }
            }
            Ok(tree.move_to(step_id, target))
        })
        .await
    }

    /// Copy a step and its children, with fresh ids, right after it
    pub async fn duplicate_step(&self, id: &str, step_id: &StepId) -> Result<Timer, AppError> {
        self.edit_steps(id, "duplicate step", |tree| {
            require_step(tree, step_id)?;
            Ok(tree.duplicate(step_id))
        })
        .await
    }

    /// Start, or resume when paused
    pub fn start(&self, id: &str) -> Result<RunState, AppError> {
        let timer = self.get_timer(id)?;
        self.runner.start(&timer);
        self.record_action("start");
        Ok(self.runner.snapshot(id))
    }

    /// Pause in place; a later start resumes
    pub fn pause(&self, id: &str) -> Result<RunState, AppError> {
        let timer = self.get_timer(id)?;
        self.runner.pause(&timer);
        self.record_action("pause");
        Ok(self.runner.snapshot(id))
    }

    /// Run again from the first step, or from zero for a stopwatch
    pub fn restart(&self, id: &str) -> Result<RunState, AppError> {
        let timer = self.get_timer(id)?;
        self.runner.restart(&timer);
        self.record_action("restart");
        Ok(self.runner.snapshot(id))
    }

    /// Abort the run; the next start begins from the first step
    pub fn stop(&self, id: &str) -> Result<RunState, AppError> {
        self.get_timer(id)?;
        self.runner.stop(id);
        self.record_action("stop");
        Ok(self.runner.snapshot(id))
    }

    /// Current run state of a timer
    pub fn run_state(&self, id: &str) -> Result<RunState, AppError> {
        self.get_timer(id)?;
        Ok(self.runner.snapshot(id))
    }

    /// Log the elapsed time of a running stopwatch, named "Lap N" by default
    pub async fn mark(&self, id: &str, name: Option<&str>) -> Result<LogEntry, AppError> {
        let log_count = self.get_timer(id)?.logs.len();
        let name = name
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("Lap {}", log_count + 1));

        let entry = self
            .runner
            .mark(id, name)
            .ok_or_else(|| AppError::NotRunning(id.to_string()))?;
        info!("Stopwatch {} logged {} at {}", id, entry.name, format_duration_ms(entry.elapsed_ms));

        self.with_timer(id, |timer| {
            timer.logs.push(entry.clone());
            Ok(())
        })?;
        self.record_action("mark");
        self.persist().await?;
        Ok(entry)
    }

    /// Zero a stopwatch and clear its logs. Step timers are refused; they
    /// restart or stop instead.
    pub async fn reset(&self, id: &str) -> Result<Timer, AppError> {
        let timer = self.with_timer(id, |timer| {
            if timer.mode != TimerMode::Stopwatch {
                return Err(AppError::NotStopwatch(timer.id.clone()));
            }
            timer.logs.clear();
            Ok(timer.clone())
        })?;
        self.runner.reset(id);
        self.record_action("reset");
        self.persist().await?;
        Ok(timer)
    }

    /// Rename a stopwatch log entry; blank names are refused
    pub async fn rename_log(&self, id: &str, log_id: &str, name: &str) -> Result<Timer, AppError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(AppError::InvalidName);
        }
        let timer = self.with_timer(id, |timer| {
            if !timer.rename_log(log_id, name.to_string()) {
                return Err(AppError::LogNotFound(log_id.to_string()));
            }
            Ok(timer.clone())
        })?;
        self.persist().await?;
        Ok(timer)
    }

    /// Remove a stopwatch log entry
    pub async fn delete_log(&self, id: &str, log_id: &str) -> Result<Timer, AppError> {
        let timer = self.with_timer(id, |timer| {
            if !timer.delete_log(log_id) {
                return Err(AppError::LogNotFound(log_id.to_string()));
            }
            Ok(timer.clone())
        })?;
        self.persist().await?;
        Ok(timer)
    }

    /// Write every timer to the store, if there is one. The registry is
    /// read once the store is free, so the newest state always lands last.
    pub async fn persist(&self) -> Result<(), AppError> {
        let Some(store) = &self.store else {
            return Ok(());
        };
        store.save_latest(|| self.list_timers()).await.map_err(|e| {
            error!("Failed to save timers: {}", e);
            AppError::from(e)
        })
    }

    /// Calculate server uptime as a formatted string
    pub fn get_uptime(&self) -> String {
        let duration = self.start_time.elapsed();
        let hours = duration.as_secs() / 3600;
        let minutes = (duration.as_secs() % 3600) / 60;
        let seconds = duration.as_secs() % 60;

        if hours > 0 {
            format!("{}h {}m {}s", hours, minutes, seconds)
        } else if minutes > 0 {
            format!("{}m {}s", minutes, seconds)
        } else {
            format!("{}s", seconds)
        }
    }

    /// Get last action information
    pub fn get_last_action(&self) -> (Option<String>, Option<DateTime<Utc>>) {
        let last_action = self.last_action.lock().ok().and_then(|a| a.clone());
        let last_action_time = self.last_action_time.lock().ok().and_then(|t| *t);
        (last_action, last_action_time)
    }

    fn record_action(&self, action: &str) {
        if let Ok(mut last_action) = self.last_action.lock() {
            *last_action = Some(action.to_string());
        }
        if let Ok(mut last_time) = self.last_action_time.lock() {
            *last_time = Some(Utc::now());
        }
    }

    /// Run a tree edit on an unlocked timer and store the result
    async fn edit_steps(
        &self,
        id: &str,
        action: &str,
        edit: impl FnOnce(&StepTree) -> Result<StepTree, AppError>,
    ) -> Result<Timer, AppError> {
        let timer = self.with_timer(id, |timer| {
            if timer.locked {
                return Err(AppError::Locked(timer.id.clone()));
            }
            let tree = StepTree::from_steps(&timer.steps);
            timer.steps = edit(&tree)?.into_steps();
            Ok(timer.clone())
        })?;
        self.record_action(action);
        self.persist().await?;
        Ok(timer)
    }

    fn with_timer<R>(&self, id: &str, f: impl FnOnce(&mut Timer) -> Result<R, AppError>) -> Result<R, AppError> {
        let mut timers = self.lock_timers();
        let timer = timers
            .iter_mut()
            .find(|timer| timer.id == id)
            .ok_or_else(|| AppError::TimerNotFound(id.to_string()))?;
        f(timer)
    }

    fn lock_timers(&self) -> MutexGuard<'_, Vec<Timer>> {
        self.timers.lock().unwrap_or_else(|poisoned| {
            warn!("Timer registry lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }
}

fn require_step(tree: &StepTree, step_id: &StepId) -> Result<(), AppError> {
    if tree.contains(step_id) {
        Ok(())
    } else {
        Err(AppError::StepNotFound(step_id.clone()))
    }
}

fn require_target(tree: &StepTree, target: &DropTarget) -> Result<(), AppError> {
    match target {
        DropTarget::Relative { target, .. } => require_step(tree, target),
        DropTarget::RootStart | DropTarget::RootEnd => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        model::tree::Position,
        services::audio::AudioChannel,
        test_support::{FakeNotifier, FakePlayer, DEFAULT_SOUND},
        utils::time::DurationUnit,
    };
    use std::{sync::Arc, time::Duration};

    fn app() -> AppState {
        let audio = Arc::new(AudioChannel::new(Arc::new(FakePlayer::lasting(Duration::from_millis(10)))));
        let runner = TimerRunner::new(audio, Arc::new(FakeNotifier::granted()), DEFAULT_SOUND);
        AppState::new(20554, "127.0.0.1".to_string(), runner, None, Vec::new())
    }

    fn wait(seconds: f64) -> StepKind {
        StepKind::Wait {
            amount: seconds,
            unit: DurationUnit::Seconds,
        }
    }

    fn empty_loop() -> StepKind {
        StepKind::Loop {
            repeat_count: crate::model::step::RepeatCount::Times(2),
            children: Vec::new(),
        }
    }

    #[tokio::test]
    async fn names_are_trimmed_and_deduplicated() {
        let app = app();
        let first = app.create_timer(" Tea ", TimerMode::Sequence).await.unwrap();
        let second = app.create_timer("Tea", TimerMode::Alarm).await.unwrap();
        assert_eq!(first.name, "Tea");
        assert_eq!(second.name, "Tea 2");
        assert!(matches!(
            app.create_timer("  ", TimerMode::Sequence).await,
            Err(AppError::InvalidName)
        ));

        let renamed = app.update_timer(&second.id, Some("Tea"), None).await.unwrap();
        assert_eq!(renamed.name, "Tea 2");
    }

    #[tokio::test]
    async fn edits_flow_through_the_tree() {
        let app = app();
        let timer = app.create_timer("Bread", TimerMode::Sequence).await.unwrap();

        let timer = app.insert_step(&timer.id, &DropTarget::RootEnd, empty_loop()).await.unwrap();
        let loop_id = timer.steps[0].id.clone();
        let timer = app.insert_step(&timer.id, &DropTarget::RootEnd, wait(5.0)).await.unwrap();
        let wait_id = timer.steps[1].id.clone();

        let inside = DropTarget::Relative {
            target: loop_id.clone(),
            position: Position::Inside,
        };
        let timer = app.move_step(&timer.id, &wait_id, &inside).await.unwrap();
        assert_eq!(timer.steps.len(), 1);
        assert_eq!(timer.steps[0].children()[0].id, wait_id);

        let into_child = DropTarget::Relative {
            target: wait_id.clone(),
            position: Position::After,
        };
        assert!(matches!(
            app.move_step(&timer.id, &loop_id, &into_child).await,
            Err(AppError::InvalidPlacement)
        ));

        let timer = app.duplicate_step(&timer.id, &loop_id).await.unwrap();
        assert_eq!(timer.steps.len(), 2);
        assert_ne!(timer.steps[1].children()[0].id, wait_id);

        let timer = app.delete_step(&timer.id, &loop_id).await.unwrap();
        assert_eq!(timer.steps.len(), 1);
    }

    #[tokio::test]
    async fn inserting_inside_a_leaf_is_refused() {
        let app = app();
        let timer = app.create_timer("Eggs", TimerMode::Sequence).await.unwrap();
        let timer = app.insert_step(&timer.id, &DropTarget::RootStart, wait(1.0)).await.unwrap();
        let leaf = DropTarget::Relative {
            target: timer.steps[0].id.clone(),
            position: Position::Inside,
        };
        assert!(matches!(
            app.insert_step(&timer.id, &leaf, wait(2.0)).await,
            Err(AppError::InvalidPlacement)
        ));

        let missing = StepId::from("missing");
        assert!(matches!(
            app.delete_step(&timer.id, &missing).await,
            Err(AppError::StepNotFound(_))
        ));
    }

    #[tokio::test]
    async fn locked_timers_refuse_edits() {
        let app = app();
        let timer = app.create_timer("Pasta", TimerMode::Alarm).await.unwrap();
        app.update_timer(&timer.id, None, Some(true)).await.unwrap();

        assert!(matches!(
            app.insert_step(&timer.id, &DropTarget::RootEnd, wait(1.0)).await,
            Err(AppError::Locked(_))
        ));

        let watch = app.create_timer("Laps", TimerMode::Stopwatch).await.unwrap();
        let watch = app.update_timer(&watch.id, None, Some(true)).await.unwrap();
        assert!(!watch.locked);
    }

    #[tokio::test(start_paused = true)]
    async fn stopwatch_logs_laps() {
        let app = app();
        let watch = app.create_timer("Run", TimerMode::Stopwatch).await.unwrap();
        assert!(matches!(app.mark(&watch.id, None).await, Err(AppError::NotRunning(_))));

        app.start(&watch.id).unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;
        let lap = app.mark(&watch.id, None).await.unwrap();
        assert_eq!(lap.name, "Lap 1");
        let named = app.mark(&watch.id, Some("Turn")).await.unwrap();
        assert_eq!(named.name, "Turn");

        let timer = app.rename_log(&watch.id, &lap.id, "Start").await.unwrap();
        assert_eq!(timer.logs[0].name, "Start");
        let timer = app.delete_log(&watch.id, &named.id).await.unwrap();
        assert_eq!(timer.logs.len(), 1);
        assert!(matches!(
            app.delete_log(&watch.id, &named.id).await,
            Err(AppError::LogNotFound(_))
        ));

        let timer = app.reset(&watch.id).await.unwrap();
        assert!(timer.logs.is_empty());
        assert_eq!(app.run_state(&watch.id).unwrap().elapsed_ms, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn reset_is_only_for_stopwatches() {
        let app = app();
        let timer = app.create_timer("Soup", TimerMode::Sequence).await.unwrap();
        app.insert_step(&timer.id, &DropTarget::RootEnd, wait(60.0)).await.unwrap();
        app.start(&timer.id).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(matches!(app.reset(&timer.id).await, Err(AppError::NotStopwatch(_))));
        let state = app.run_state(&timer.id).unwrap();
        assert!(app.runner.is_running(&timer.id));
        assert!(state.remaining_ms.is_some());
    }

    #[tokio::test]
    async fn unknown_timers_are_not_found() {
        let app = app();
        assert!(matches!(app.start("nope"), Err(AppError::TimerNotFound(_))));
        assert!(matches!(app.delete_timer("nope").await, Err(AppError::TimerNotFound(_))));
    }
}

//! Per-timer run supervisor: owns the run tokens, spawns runs and tracks
//! what each timer is doing.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use tokio::{sync::broadcast, time::Instant};
use tracing::{debug, info, warn};

use crate::{
    engine::{
        context::{Progress, ProgressFn, RunContext, RunToken},
        interpreter::run_sequence,
    },
    model::{
        step::StepId,
        timer::{LogEntry, Timer, TimerMode},
    },
    services::{audio::AudioChannel, notifier::Notifier},
    state::run_state::{RunOutcome, RunState, RunStatus, RunUpdate},
};

use super::stopwatch::StopwatchClock;

#[derive(Debug, Default)]
struct RunEntry {
    status: RunStatus,
    active_step_id: Option<StepId>,
    remaining_ms: Option<u64>,
    token: Option<RunToken>,
    generation: u64,
    last_outcome: Option<RunOutcome>,
    stopwatch: StopwatchClock,
}

impl RunEntry {
    fn snapshot(&self, now: Instant) -> RunState {
        RunState {
            status: self.status,
            active_step_id: self.active_step_id.clone(),
            remaining_ms: self.remaining_ms,
            elapsed_ms: self.stopwatch.elapsed_ms(now),
            last_outcome: self.last_outcome,
        }
    }

    fn clear_position(&mut self) {
        self.active_step_id = None;
        self.remaining_ms = None;
    }
}

struct Inner {
    entries: Mutex<HashMap<String, RunEntry>>,
    audio: Arc<AudioChannel>,
    notifier: Arc<dyn Notifier>,
    default_sound: Arc<str>,
    updates_tx: broadcast::Sender<RunUpdate>,
}

/// Starts, pauses, restarts and stops timer runs.
///
/// Cloning is cheap and shares the same state.
#[derive(Clone)]
pub struct TimerRunner {
    inner: Arc<Inner>,
}

impl TimerRunner {
    /// Runner sharing one audio channel and notifier across all timers
    pub fn new(audio: Arc<AudioChannel>, notifier: Arc<dyn Notifier>, default_sound: impl Into<Arc<str>>) -> Self {
        let (updates_tx, _) = broadcast::channel(100);
        Self {
            inner: Arc::new(Inner {
                entries: Mutex::new(HashMap::new()),
                audio,
                notifier,
                default_sound: default_sound.into(),
                updates_tx,
            }),
        }
    }

    /// Receive every run state change from now on
    pub fn subscribe(&self) -> broadcast::Receiver<RunUpdate> {
        self.inner.updates_tx.subscribe()
    }

    /// Start a timer, or resume it when paused. A timer that is already
    /// running is left alone.
    pub fn start(&self, timer: &Timer) {
        if timer.mode == TimerMode::Stopwatch {
            self.upsert(&timer.id, |entry| {
                entry.stopwatch.start(Instant::now());
                entry.status = RunStatus::Running;
            });
            info!("Stopwatch {} running", timer.id);
            return;
        }

        let current = self
            .lock_entries()
            .get(&timer.id)
            .map(|entry| (entry.status, entry.token.is_some()))
            .unwrap_or_default();
        match current {
            (RunStatus::Paused, true) => self.resume(&timer.id),
            (RunStatus::Running, _) => debug!("Timer {} is already running", timer.id),
            _ => self.begin_run(timer),
        }
    }

    /// Resume a paused run where it left off
    pub fn resume(&self, id: &str) {
        let resumed = self.update(id, |entry| match (&entry.token, entry.status) {
            (Some(token), RunStatus::Paused) => {
                token.resume();
                entry.status = RunStatus::Running;
                true
            }
            _ => false,
        });
        if resumed == Some(true) {
            info!("Timer {} resumed", id);
        }
    }

    /// Pause a run in place and silence its sound. A stopwatch folds the
    /// running segment into its total.
    pub fn pause(&self, timer: &Timer) {
        if timer.mode == TimerMode::Stopwatch {
            self.update(&timer.id, |entry| {
                entry.stopwatch.pause(Instant::now());
                if entry.status == RunStatus::Running {
                    entry.status = RunStatus::Paused;
                }
            });
            return;
        }

        let paused = self.update(&timer.id, |entry| match (&entry.token, entry.status) {
            (Some(token), RunStatus::Running) => {
                token.pause();
                entry.status = RunStatus::Paused;
                Some(token.run_id())
            }
            _ => None,
        });
        if let Some(run_id) = paused.flatten() {
            self.inner.audio.stop_owned_by(run_id);
            info!("Timer {} paused", timer.id);
        }
    }

    /// Discard the current position and run again from the beginning
    pub fn restart(&self, timer: &Timer) {
        if timer.mode == TimerMode::Stopwatch {
            self.upsert(&timer.id, |entry| {
                entry.stopwatch.restart(Instant::now());
                entry.status = RunStatus::Running;
            });
            return;
        }

        self.stop(&timer.id);
        self.begin_run(timer);
    }

    /// Abort the run of `id` and silence its sound. Stopping an idle or
    /// unknown timer does nothing.
    pub fn stop(&self, id: &str) {
        let stopped = self.update(id, |entry| {
            entry.stopwatch.pause(Instant::now());
            let token = entry.token.take();
            let was_active = entry.status != RunStatus::Idle;
            if let Some(token) = &token {
                token.abort();
            }
            entry.clear_position();
            if was_active {
                entry.last_outcome = Some(RunOutcome::Aborted);
            }
            entry.status = RunStatus::Idle;
            token.map(|token| token.run_id())
        });

        if let Some(run_id) = stopped.flatten() {
            self.inner.audio.stop_owned_by(run_id);
            info!("Timer {} stopped", id);
        }
    }

    /// Zero the clock and leave the timer stopped. A step run still in
    /// progress is stopped first.
    pub fn reset(&self, id: &str) {
        self.stop(id);
        self.update(id, |entry| entry.stopwatch.reset());
    }

    /// Record a lap of a running stopwatch
    pub fn mark(&self, id: &str, name: String) -> Option<LogEntry> {
        let elapsed = self
            .lock_entries()
            .get(id)
            .filter(|entry| entry.stopwatch.is_running())
            .map(|entry| entry.stopwatch.elapsed_ms(Instant::now()))?;
        let now = chrono::Utc::now().timestamp_millis();
        debug!("Stopwatch {} marked {} at {}ms", id, name, elapsed);
        Some(LogEntry::new(name, elapsed, now))
    }

    /// Stop and drop everything known about `id`
    pub fn forget(&self, id: &str) {
        self.stop(id);
        if self.lock_entries().remove(id).is_some() {
            // no receivers is fine
            let _ = self.inner.updates_tx.send(RunUpdate::forgotten(id));
        }
    }

    /// Stop every timer, then silence the channel
    pub fn stop_all(&self) {
        let ids: Vec<String> = self.lock_entries().keys().cloned().collect();
        for id in ids {
            self.stop(&id);
        }
        self.inner.audio.stop();
    }

    /// Whether `id` is running; paused and idle timers are not
    pub fn is_running(&self, id: &str) -> bool {
        self.snapshot(id).is_running()
    }

    /// Whether `id` is paused mid-run
    pub fn is_paused(&self, id: &str) -> bool {
        self.snapshot(id).is_paused()
    }

    /// Step currently executing, if any
    pub fn active_step_id(&self, id: &str) -> Option<StepId> {
        self.snapshot(id).active_step_id
    }

    /// Time left on the active step, if it counts down
    pub fn remaining_ms(&self, id: &str) -> Option<u64> {
        self.snapshot(id).remaining_ms
    }

    /// Stopwatch time, excluding paused periods
    pub fn elapsed_ms(&self, id: &str) -> u64 {
        self.snapshot(id).elapsed_ms
    }

    /// Full run state of `id`; an idle state for unknown ids
    pub fn snapshot(&self, id: &str) -> RunState {
        self.lock_entries()
            .get(id)
            .map(|entry| entry.snapshot(Instant::now()))
            .unwrap_or_default()
    }

    fn begin_run(&self, timer: &Timer) {
        let token = RunToken::new();
        let first_step = timer.steps.first().map(|step| step.id.clone());
        let generation = self.upsert(&timer.id, |entry| {
            if let Some(old) = entry.token.take() {
                old.abort();
            }
            entry.generation += 1;
            entry.token = Some(token.clone());
            entry.status = RunStatus::Running;
            entry.active_step_id = first_step;
            entry.remaining_ms = None;
            entry.generation
        });

        let ctx = RunContext::new(
            token.clone(),
            Arc::clone(&self.inner.audio),
            Arc::clone(&self.inner.notifier),
            Arc::clone(&self.inner.default_sound),
            self.progress_sink(&timer.id, generation, &token),
        );

        info!("Timer {} started ({} steps)", timer.id, timer.steps.len());
        let runner = self.clone();
        let id = timer.id.clone();
        let steps = timer.steps.clone();
        tokio::spawn(async move {
            run_sequence(&steps, &ctx).await;
            runner.finish(&id, generation, &token);
        });
    }

    fn progress_sink(&self, id: &str, generation: u64, token: &RunToken) -> ProgressFn {
        let runner = self.clone();
        let id = id.to_string();
        let token = token.clone();
        Arc::new(move |progress: Progress| {
            if token.is_aborted() {
                return;
            }
            runner.update(&id, |entry| {
                if entry.generation == generation {
                    entry.active_step_id = Some(progress.active_step_id);
                    entry.remaining_ms = progress.remaining_ms;
                }
            });
        })
    }

    fn finish(&self, id: &str, generation: u64, token: &RunToken) {
        if token.is_aborted() {
            debug!("Run {} of timer {} ended after abort", generation, id);
            return;
        }
        let completed = self.update(id, |entry| {
            if entry.generation != generation {
                return false;
            }
            entry.token = None;
            entry.status = RunStatus::Idle;
            entry.clear_position();
            entry.last_outcome = Some(RunOutcome::Completed);
            true
        });
        if completed == Some(true) {
            info!("Timer {} completed", id);
        }
    }

    /// Apply `f` to the entry of `id`, if there is one, and broadcast the
    /// new state
    fn update<R>(&self, id: &str, f: impl FnOnce(&mut RunEntry) -> R) -> Option<R> {
        let (result, state) = {
            let mut entries = self.lock_entries();
            let entry = entries.get_mut(id)?;
            let result = f(entry);
            (result, entry.snapshot(Instant::now()))
        };
        self.broadcast(id, state);
        Some(result)
    }

    /// Like `update`, creating the entry first when needed
    fn upsert<R>(&self, id: &str, f: impl FnOnce(&mut RunEntry) -> R) -> R {
        let (result, state) = {
            let mut entries = self.lock_entries();
            let entry = entries.entry(id.to_string()).or_default();
            let result = f(entry);
            (result, entry.snapshot(Instant::now()))
        };
        self.broadcast(id, state);
        result
    }

    fn broadcast(&self, id: &str, state: RunState) {
        // no receivers is fine
        let _ = self.inner.updates_tx.send(RunUpdate::new(id, state));
    }

    fn lock_entries(&self) -> std::sync::MutexGuard<'_, HashMap<String, RunEntry>> {
        self.inner.entries.lock().unwrap_or_else(|poisoned| {
            warn!("Run state lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }
}

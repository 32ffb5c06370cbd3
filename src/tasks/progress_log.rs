//! Logs timer run transitions as they happen

use std::collections::HashMap;

use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, info, warn};

use crate::state::{RunState, RunStatus, RunUpdate};

/// Background task that follows run updates and logs status changes and
/// step activations. Ends when the runner is dropped.
pub async fn progress_log_task(mut updates: broadcast::Receiver<RunUpdate>) {
    info!("Starting progress log task");
    let mut log = TransitionLog::default();

    loop {
        match updates.recv().await {
            Ok(update) => log.record(update),
            Err(RecvError::Lagged(skipped)) => {
                warn!("Progress log fell behind, skipped {} updates", skipped);
            }
            Err(RecvError::Closed) => break,
        }
    }

    info!("Progress log task stopped");
}

/// Last state seen per timer, so only changes get logged
#[derive(Debug, Default)]
struct TransitionLog {
    last_seen: HashMap<String, RunState>,
}

impl TransitionLog {
    fn record(&mut self, update: RunUpdate) {
        if update.forgotten {
            debug!("Timer {} deleted", update.timer_id);
            self.last_seen.remove(&update.timer_id);
            return;
        }

        let previous = self.last_seen.get(&update.timer_id);
        log_transition(&update, previous);
        self.last_seen.insert(update.timer_id, update.state);
    }
}

fn log_transition(update: &RunUpdate, previous: Option<&RunState>) {
    let state = &update.state;
    let previous_status = previous.map(|p| p.status).unwrap_or_default();

    if state.status != previous_status {
        match (state.status, state.last_outcome) {
            (RunStatus::Idle, Some(outcome)) => {
                info!("Timer {} is idle ({:?})", update.timer_id, outcome)
            }
            (status, _) => info!("Timer {} is {:?}", update.timer_id, status),
        }
    }

    let previous_step = previous.and_then(|p| p.active_step_id.as_ref());
    if let Some(step) = &state.active_step_id {
        if Some(step) != previous_step {
            match state.remaining_display() {
                Some(remaining) => debug!("Timer {} at step {} ({} left)", update.timer_id, step, remaining),
                None => debug!("Timer {} at step {}", update.timer_id, step),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn running(id: &str) -> RunUpdate {
        RunUpdate::new(
            id,
            RunState {
                status: RunStatus::Running,
                ..RunState::idle()
            },
        )
    }

    #[tokio::test]
    async fn ends_when_the_sender_is_dropped() {
        let (tx, rx) = broadcast::channel(8);
        let task = tokio::spawn(progress_log_task(rx));

        tx.send(running("t")).unwrap();
        drop(tx);

        task.await.unwrap();
    }

    #[test]
    fn deleted_timers_are_no_longer_tracked() {
        let mut log = TransitionLog::default();
        log.record(running("a"));
        log.record(running("b"));
        assert_eq!(log.last_seen.len(), 2);

        log.record(RunUpdate::forgotten("a"));
        assert_eq!(log.last_seen.len(), 1);
        assert!(log.last_seen.contains_key("b"));
    }
}

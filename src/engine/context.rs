//! Per-run cancellation token and the context handed to every executor

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    model::step::StepId,
    services::{
        audio::{AudioChannel, PlaybackEnd},
        notifier::{Notification, NotificationHandle, Notifier, Permission},
    },
};

/// How long a plain notify step waits for the backend to take the notification
pub const NOTIFY_GRACE: Duration = Duration::from_secs(2);

static NEXT_RUN_ID: AtomicU64 = AtomicU64::new(1);

/// Abort and pause signals of one run.
///
/// Cloning shares the same signals. Abort is terminal; pause can be toggled
/// any number of times.
#[derive(Debug, Clone)]
pub struct RunToken {
    id: u64,
    abort: CancellationToken,
    paused: Arc<watch::Sender<bool>>,
}

impl RunToken {
    pub fn new() -> Self {
        let (paused, _) = watch::channel(false);
        Self {
            id: NEXT_RUN_ID.fetch_add(1, Ordering::Relaxed),
            abort: CancellationToken::new(),
            paused: Arc::new(paused),
        }
    }

    /// Process-wide unique id of the run; tags the sounds it plays
    pub fn run_id(&self) -> u64 {
        self.id
    }

    /// Request cancellation; releases anyone waiting for resume
    pub fn abort(&self) {
        self.abort.cancel();
    }

    pub fn is_aborted(&self) -> bool {
        self.abort.is_cancelled()
    }

    pub fn pause(&self) {
        self.paused.send_replace(true);
    }

    pub fn resume(&self) {
        self.paused.send_replace(false);
    }

    pub fn is_paused(&self) -> bool {
        *self.paused.borrow()
    }

    /// Resolves once abort has been requested
    pub async fn aborted(&self) {
        self.abort.cancelled().await;
    }

    /// Resolves when the run is not paused, or has been aborted
    pub async fn resumed(&self) {
        let mut rx = self.paused.subscribe();
        tokio::select! {
            _ = rx.wait_for(|paused| !*paused) => {}
            _ = self.abort.cancelled() => {}
        }
    }

    /// Resolves as soon as a pause is requested
    pub async fn pause_requested(&self) {
        let mut rx = self.paused.subscribe();
        if rx.wait_for(|paused| *paused).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

impl Default for RunToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Progress record pushed by the interpreter and executors
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Progress {
    pub active_step_id: StepId,
    pub remaining_ms: Option<u64>,
}

/// Sink for progress reports
pub type ProgressFn = Arc<dyn Fn(Progress) + Send + Sync>;

/// Everything a step executor may touch while running
#[derive(Clone)]
pub struct RunContext {
    token: RunToken,
    audio: Arc<AudioChannel>,
    notifier: Arc<dyn Notifier>,
    default_sound: Arc<str>,
    progress: ProgressFn,
}

impl RunContext {
    pub fn new(
        token: RunToken,
        audio: Arc<AudioChannel>,
        notifier: Arc<dyn Notifier>,
        default_sound: impl Into<Arc<str>>,
        progress: ProgressFn,
    ) -> Self {
        Self {
            token,
            audio,
            notifier,
            default_sound: default_sound.into(),
            progress,
        }
    }

    pub fn token(&self) -> &RunToken {
        &self.token
    }

    pub fn should_abort(&self) -> bool {
        self.token.is_aborted()
    }

    pub fn is_paused(&self) -> bool {
        self.token.is_paused()
    }

    pub async fn await_resume(&self) {
        self.token.resumed().await;
    }

    pub fn report_progress(&self, step_id: &StepId, remaining_ms: Option<u64>) {
        (self.progress)(Progress {
            active_step_id: step_id.clone(),
            remaining_ms,
        });
    }

    pub fn default_sound(&self) -> &str {
        &self.default_sound
    }

    /// Play `url` on the shared channel and wait until it ends, fails, or is
    /// cut off by another sound or `stop_audio`.
    pub async fn play_sound_to_completion(&self, url: &str) -> PlaybackEnd {
        self.audio.play_to_completion(url, self.token.run_id()).await
    }

    /// Silence the sound of this run; another run's sound keeps playing
    pub fn stop_audio(&self) {
        self.audio.stop_owned_by(self.token.run_id());
    }

    /// Ask for permission and show a notification if allowed.
    ///
    /// Returns `None` when notifications are unavailable, denied, or failed
    /// to show.
    pub async fn notify(&self, notification: &Notification, dismissable: bool) -> Option<NotificationHandle> {
        match self.notifier.request_permission().await {
            Permission::Granted => {}
            other => {
                debug!("Skipping notification {:?}: permission {:?}", notification.title, other);
                return None;
            }
        }

        match self.notifier.show(notification, dismissable).await {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!("Failed to show notification: {}", e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resumed_returns_when_not_paused() {
        let token = RunToken::new();
        token.resumed().await;
        assert!(!token.is_paused());
    }

    #[tokio::test(start_paused = true)]
    async fn resumed_waits_for_resume() {
        let token = RunToken::new();
        token.pause();

        let waiter = {
            let token = token.clone();
            tokio::spawn(async move { token.resumed().await })
        };
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(!waiter.is_finished());

        token.resume();
        waiter.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn abort_releases_paused_waiters() {
        let token = RunToken::new();
        token.pause();

        let waiter = {
            let token = token.clone();
            tokio::spawn(async move { token.resumed().await })
        };
        token.abort();
        waiter.await.unwrap();
        assert!(token.is_aborted());
        assert!(token.is_paused());
    }

    #[test]
    fn every_run_gets_its_own_id() {
        let first = RunToken::new();
        let second = RunToken::new();
        assert_ne!(first.run_id(), second.run_id());
        assert_eq!(first.clone().run_id(), first.run_id());
    }

    #[tokio::test]
    async fn pause_requested_fires_on_pause() {
        let token = RunToken::new();
        let watcher = {
            let token = token.clone();
            tokio::spawn(async move { token.pause_requested().await })
        };
        tokio::task::yield_now().await;
        token.pause();
        watcher.await.unwrap();
    }
}

//! Fake backends and helpers shared by unit tests

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::{
    engine::context::{Progress, ProgressFn, RunContext, RunToken},
    model::step::StepId,
    services::{
        audio::{AudioBackend, AudioChannel, AudioError},
        notifier::{Notification, NotificationHandle, Notifier, NotifyError, Permission},
    },
};

pub const DEFAULT_SOUND: &str = "default.oga";

#[derive(Debug, Clone, Copy)]
enum Behaviour {
    Lasting(Duration),
    Endless,
    Failing,
}

/// Player that "plays" by sleeping on the tokio clock
#[derive(Debug)]
pub struct FakePlayer {
    behaviour: Behaviour,
    played: Mutex<Vec<String>>,
}

impl FakePlayer {
    pub fn lasting(duration: Duration) -> Self {
        Self::with(Behaviour::Lasting(duration))
    }

    pub fn endless() -> Self {
        Self::with(Behaviour::Endless)
    }

    pub fn failing() -> Self {
        Self::with(Behaviour::Failing)
    }

    fn with(behaviour: Behaviour) -> Self {
        Self {
            behaviour,
            played: Mutex::new(Vec::new()),
        }
    }

    pub fn played(&self) -> Vec<String> {
        self.played.lock().unwrap().clone()
    }
}

#[async_trait]
impl AudioBackend for FakePlayer {
    async fn play(&self, url: &str) -> Result<(), AudioError> {
        self.played.lock().unwrap().push(url.to_string());
        match self.behaviour {
            Behaviour::Lasting(duration) => {
                tokio::time::sleep(duration).await;
                Ok(())
            }
            Behaviour::Endless => std::future::pending().await,
            Behaviour::Failing => Err(AudioError::NoPlayer),
        }
    }
}

/// Notifier that records what it shows and lets the test dismiss it
#[derive(Debug)]
pub struct FakeNotifier {
    permission: Permission,
    shown: Mutex<Vec<(Notification, CancellationToken)>>,
}

impl FakeNotifier {
    pub fn granted() -> Self {
        Self::with_permission(Permission::Granted)
    }

    pub fn with_permission(permission: Permission) -> Self {
        Self {
            permission,
            shown: Mutex::new(Vec::new()),
        }
    }

    pub fn shown(&self) -> Vec<Notification> {
        self.shown.lock().unwrap().iter().map(|(n, _)| n.clone()).collect()
    }

    /// Simulate the user clicking every notification shown so far
    pub fn dismiss_all(&self) {
        for (_, token) in self.shown.lock().unwrap().iter() {
            token.cancel();
        }
    }
}

#[async_trait]
impl Notifier for FakeNotifier {
    async fn request_permission(&self) -> Permission {
        self.permission
    }

    async fn show(&self, notification: &Notification, _dismissable: bool) -> Result<NotificationHandle, NotifyError> {
        let token = CancellationToken::new();
        self.shown.lock().unwrap().push((notification.clone(), token.clone()));
        Ok(NotificationHandle::new(token))
    }
}

/// Collects progress reports
#[derive(Debug, Clone, Default)]
pub struct ProgressLog(Arc<Mutex<Vec<Progress>>>);

impl ProgressLog {
    pub fn sink(&self) -> ProgressFn {
        let log = Arc::clone(&self.0);
        Arc::new(move |progress| log.lock().unwrap().push(progress))
    }

    pub fn all(&self) -> Vec<Progress> {
        self.0.lock().unwrap().clone()
    }

    /// How many times `id` was reported as newly active. A report without
    /// remaining time that directly follows a countdown of the same step is
    /// the countdown being cleared, not a new activation.
    pub fn activations(&self, id: &str) -> usize {
        let id = StepId::from(id);
        let all = self.all();
        all.iter()
            .enumerate()
            .filter(|(i, p)| {
                p.active_step_id == id
                    && p.remaining_ms.is_none()
                    && !(*i > 0 && all[i - 1].active_step_id == id && all[i - 1].remaining_ms.is_some())
            })
            .count()
    }

    pub fn last(&self) -> Option<Progress> {
        self.0.lock().unwrap().last().cloned()
    }
}

/// Run context wired to fakes
pub struct Harness {
    pub token: RunToken,
    pub player: Arc<FakePlayer>,
    pub audio: Arc<AudioChannel>,
    pub notifier: Arc<FakeNotifier>,
    pub progress: ProgressLog,
    pub ctx: RunContext,
}

impl Harness {
    pub fn new(player: FakePlayer) -> Self {
        Self::with_notifier(player, FakeNotifier::granted())
    }

    pub fn with_notifier(player: FakePlayer, notifier: FakeNotifier) -> Self {
        let token = RunToken::new();
        let player = Arc::new(player);
        let audio = Arc::new(AudioChannel::new(player.clone()));
        let notifier = Arc::new(notifier);
        let progress = ProgressLog::default();
        let ctx = RunContext::new(
            token.clone(),
            Arc::clone(&audio),
            notifier.clone(),
            DEFAULT_SOUND,
            progress.sink(),
        );
        Self {
            token,
            player,
            audio,
            notifier,
            progress,
            ctx,
        }
    }
}

//! Audio playback: player backends and the single shared output channel

use std::{
    process::Stdio,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
};

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum AudioError {
    #[error("failed to launch player {program}: {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("player exited with {0}")]
    Exit(std::process::ExitStatus),
    #[error("no player configured")]
    NoPlayer,
}

/// Something that can play a sound URL to its end
#[async_trait]
pub trait AudioBackend: Send + Sync {
    /// Play `url` once. Dropping the future must stop the sound.
    async fn play(&self, url: &str) -> Result<(), AudioError>;
}

/// Plays sounds through an external command, the URL appended as the last
/// argument (e.g. `ffplay -nodisp -autoexit -loglevel quiet`).
#[derive(Debug, Clone)]
pub struct CommandPlayer {
    program: String,
    args: Vec<String>,
}

impl CommandPlayer {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Split a command line on whitespace
    pub fn from_command_line(command: &str) -> Option<Self> {
        let mut parts = command.split_whitespace().map(str::to_string);
        let program = parts.next()?;
        Some(Self::new(program, parts.collect()))
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Check that the player binary can be launched
    pub async fn check_available(&self) -> Result<(), AudioError> {
        Command::new(&self.program)
            .arg("-version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .output()
            .await
            .map_err(|source| AudioError::Launch {
                program: self.program.clone(),
                source,
            })?;

        info!("Audio player {} is available", self.program);
        Ok(())
    }
}

#[async_trait]
impl AudioBackend for CommandPlayer {
    async fn play(&self, url: &str) -> Result<(), AudioError> {
        debug!("Launching {} for {}", self.program, url);

        let status = Command::new(&self.program)
            .args(&self.args)
            .arg(url)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status()
            .await
            .map_err(|source| AudioError::Launch {
                program: self.program.clone(),
                source,
            })?;

        if !status.success() {
            return Err(AudioError::Exit(status));
        }
        Ok(())
    }
}

/// Backend used when audio is disabled; every sound ends at once
#[derive(Debug, Clone, Default)]
pub struct NullPlayer;

#[async_trait]
impl AudioBackend for NullPlayer {
    async fn play(&self, url: &str) -> Result<(), AudioError> {
        debug!("Audio disabled, skipping {}", url);
        Ok(())
    }
}

/// How a call to [`AudioChannel::play_to_completion`] ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackEnd {
    Finished,
    Failed,
    /// Cut off by `stop` or by a newer sound
    Interrupted,
}

#[derive(Debug)]
struct Playback {
    id: u64,
    /// Run that started the sound
    owner: u64,
    url: String,
    stop: CancellationToken,
}

/// The one audio output shared by every running timer.
///
/// At most one sound is audible: starting a sound cuts off whatever is
/// playing (restarting it when the URL is the same). Each caller waits for
/// its own sound only, and `stop` releases the current caller at once.
/// Every sound is tagged with the run that owns it, so one timer can silence
/// its own sound without cutting off another timer's.
pub struct AudioChannel {
    backend: Arc<dyn AudioBackend>,
    current: Mutex<Option<Playback>>,
    next_id: AtomicU64,
}

impl AudioChannel {
    pub fn new(backend: Arc<dyn AudioBackend>) -> Self {
        Self {
            backend,
            current: Mutex::new(None),
            next_id: AtomicU64::new(1),
        }
    }

    /// Play `url` on behalf of run `owner` and wait until it finishes,
    /// fails, or is cut off. Failures are logged, never propagated.
    pub async fn play_to_completion(&self, url: &str, owner: u64) -> PlaybackEnd {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let stop = CancellationToken::new();

        let previous = self.swap_current(Some(Playback {
            id,
            owner,
            url: url.to_string(),
            stop: stop.clone(),
        }));
        if let Some(previous) = previous {
            if previous.url == url {
                debug!("Restarting sound {}", url);
            } else {
                debug!("Sound {} superseded by {}", previous.url, url);
            }
            previous.stop.cancel();
        }

        let end = tokio::select! {
            result = self.backend.play(url) => match result {
                Ok(()) => PlaybackEnd::Finished,
                Err(e) => {
                    warn!("Sound {} failed, continuing: {}", url, e);
                    PlaybackEnd::Failed
                }
            },
            _ = stop.cancelled() => {
                debug!("Sound {} cut off", url);
                PlaybackEnd::Interrupted
            }
        };

        let mut current = self.lock_current();
        if current.as_ref().is_some_and(|playback| playback.id == id) {
            *current = None;
        }
        end
    }

    /// Silence the current sound, whoever owns it
    pub fn stop(&self) {
        if let Some(playback) = self.swap_current(None) {
            debug!("Stopping sound {}", playback.url);
            playback.stop.cancel();
        }
    }

    /// Silence the current sound only if run `owner` started it
    pub fn stop_owned_by(&self, owner: u64) {
        let mut current = self.lock_current();
        if current.as_ref().is_some_and(|playback| playback.owner == owner) {
            if let Some(playback) = current.take() {
                debug!("Stopping sound {} of run {}", playback.url, owner);
                playback.stop.cancel();
            }
        }
    }

    /// Whether any sound is audible
    pub fn is_playing(&self) -> bool {
        self.lock_current().is_some()
    }

    fn swap_current(&self, next: Option<Playback>) -> Option<Playback> {
        std::mem::replace(&mut *self.lock_current(), next)
    }

    fn lock_current(&self) -> std::sync::MutexGuard<'_, Option<Playback>> {
        self.current.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakePlayer;
    use std::time::Duration;
    use tokio::time::{sleep, Instant};

    #[tokio::test(start_paused = true)]
    async fn waits_for_the_sound_to_end() {
        let player = Arc::new(FakePlayer::lasting(Duration::from_millis(800)));
        let channel = AudioChannel::new(player.clone());

        let start = Instant::now();
        assert_eq!(channel.play_to_completion("bell.oga", 1).await, PlaybackEnd::Finished);
        assert!(start.elapsed() >= Duration::from_millis(800));
        assert!(!channel.is_playing());
        assert_eq!(player.played(), vec!["bell.oga".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn failures_end_playback() {
        let channel = AudioChannel::new(Arc::new(FakePlayer::failing()));
        assert_eq!(channel.play_to_completion("broken.mp3", 1).await, PlaybackEnd::Failed);
        assert!(!channel.is_playing());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_releases_the_waiting_caller() {
        let channel = Arc::new(AudioChannel::new(Arc::new(FakePlayer::endless())));

        let caller = {
            let channel = Arc::clone(&channel);
            tokio::spawn(async move { channel.play_to_completion("alarm.oga", 1).await })
        };
        sleep(Duration::from_millis(100)).await;
        assert!(channel.is_playing());

        channel.stop();
        assert_eq!(caller.await.unwrap(), PlaybackEnd::Interrupted);
        assert!(!channel.is_playing());
    }

    #[tokio::test(start_paused = true)]
    async fn a_new_sound_cuts_off_the_previous_one() {
        let player = Arc::new(FakePlayer::endless());
        let channel = Arc::new(AudioChannel::new(player.clone()));

        let first = {
            let channel = Arc::clone(&channel);
            tokio::spawn(async move { channel.play_to_completion("first.oga", 1).await })
        };
        sleep(Duration::from_millis(100)).await;

        let second = {
            let channel = Arc::clone(&channel);
            tokio::spawn(async move { channel.play_to_completion("second.oga", 2).await })
        };
        assert_eq!(first.await.unwrap(), PlaybackEnd::Interrupted);
        assert!(channel.is_playing());
        assert_eq!(player.played(), vec!["first.oga".to_string(), "second.oga".to_string()]);

        channel.stop();
        second.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn owners_only_silence_their_own_sound() {
        let channel = Arc::new(AudioChannel::new(Arc::new(FakePlayer::endless())));

        let caller = {
            let channel = Arc::clone(&channel);
            tokio::spawn(async move { channel.play_to_completion("alarm.oga", 7).await })
        };
        sleep(Duration::from_millis(100)).await;

        channel.stop_owned_by(8);
        sleep(Duration::from_millis(100)).await;
        assert!(channel.is_playing());
        assert!(!caller.is_finished());

        channel.stop_owned_by(7);
        assert_eq!(caller.await.unwrap(), PlaybackEnd::Interrupted);
        assert!(!channel.is_playing());
    }

    #[test]
    fn parses_player_command_lines() {
        let player = CommandPlayer::from_command_line("ffplay -nodisp -autoexit").unwrap();
        assert_eq!(player.program(), "ffplay");
        assert_eq!(player.args, vec!["-nodisp", "-autoexit"]);
        assert!(CommandPlayer::from_command_line("   ").is_none());
    }
}

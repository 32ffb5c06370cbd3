//! One executor per step kind
//!
//! Executors never fail: bad input falls back to safe values and resource
//! problems (audio, notifications) are logged and treated as done.

use std::time::Duration;

use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{context::RunContext, interpreter::run_sequence};
use crate::{
    model::step::{RepeatCount, SoundSpec, Step, StepId, DEFAULT_NOTIFY_TIMEOUT_MS},
    services::{audio::PlaybackEnd, notifier::Notification},
    utils::time::{
        duration_to_ms, ms_until_clock_time, sanitize_time_input, DurationUnit, Meridiem,
    },
};

/// Longest sleep between two checks of the pause and abort flags
pub const TICK_MS: i64 = 250;

const CLOCK_FALLBACK: &str = "12:00";

/// Pause-aware countdown measured in wall-clock time.
///
/// Time spent paused is never subtracted: the anchor is dropped while paused
/// and taken again on resume.
#[derive(Debug)]
pub(crate) struct Countdown {
    remaining: i64,
    anchor: Option<Instant>,
}

impl Countdown {
    pub(crate) fn new(total_ms: u64) -> Self {
        Self {
            remaining: i64::try_from(total_ms).unwrap_or(i64::MAX),
            anchor: Some(Instant::now()),
        }
    }

    pub(crate) fn remaining_ms(&self) -> u64 {
        self.remaining.max(0) as u64
    }

    pub(crate) fn expired(&self) -> bool {
        self.remaining <= 0
    }

    /// Fold the time since the anchor into `remaining`
    fn settle(&mut self) {
        if let Some(anchor) = self.anchor {
            let now = Instant::now();
            let elapsed = now.duration_since(anchor).as_millis();
            self.remaining = self.remaining.saturating_sub(i64::try_from(elapsed).unwrap_or(i64::MAX));
            self.anchor = Some(now);
        }
    }

    /// Stop the clock until the next `run`
    fn suspend(&mut self) {
        self.settle();
        self.anchor = None;
    }

    /// Count down until `floor` ms remain (never below zero), the run is
    /// aborted, or `dismissed` fires. Progress is reported after every tick
    /// when `report_as` is set.
    pub(crate) async fn run(
        &mut self,
        ctx: &RunContext,
        report_as: Option<&StepId>,
        floor: i64,
        dismissed: Option<&CancellationToken>,
    ) {
        let floor = floor.max(0);
        loop {
            if ctx.should_abort()
                || self.remaining <= floor
                || dismissed.is_some_and(CancellationToken::is_cancelled)
            {
                return;
            }

            if ctx.is_paused() {
                self.suspend();
                tokio::select! {
                    _ = ctx.await_resume() => {}
                    _ = dismissal(dismissed) => {}
                }
                self.anchor = Some(Instant::now());
                continue;
            }
            if self.anchor.is_none() {
                self.anchor = Some(Instant::now());
            }

            let tick = (self.remaining - floor).min(TICK_MS) as u64;
            tokio::select! {
                _ = sleep(Duration::from_millis(tick)) => {}
                _ = ctx.token().pause_requested() => {}
                _ = ctx.token().aborted() => {}
                _ = dismissal(dismissed) => {}
            }

            self.settle();
            if let Some(id) = report_as {
                ctx.report_progress(id, Some(self.remaining_ms()));
            }
        }
    }
}

async fn dismissal(dismissed: Option<&CancellationToken>) {
    match dismissed {
        Some(token) => token.cancelled().await,
        None => std::future::pending().await,
    }
}

/// Sleep for a relative duration
pub async fn wait(id: &StepId, amount: f64, unit: DurationUnit, ctx: &RunContext) {
    let total = duration_to_ms(amount, unit);
    debug!("Step {}: waiting {} ms", id, total);
    count_down(id, total, ctx).await;
}

/// Sleep until the next occurrence of a clock time. The target is resolved
/// once; a pause does not move it.
pub async fn wait_until(id: &StepId, time: &str, meridiem: Meridiem, ctx: &RunContext) {
    let time = sanitize_time_input(time, CLOCK_FALLBACK);
    let total = ms_until_clock_time(&time, meridiem);
    debug!("Step {}: waiting {} ms until {} {:?}", id, total, time, meridiem);
    count_down(id, total, ctx).await;
}

async fn count_down(id: &StepId, total_ms: u64, ctx: &RunContext) {
    let mut countdown = Countdown::new(total_ms);
    ctx.report_progress(id, Some(countdown.remaining_ms()));
    countdown.run(ctx, Some(id), 0, None).await;
    ctx.report_progress(id, None);
}

/// Play one sound to its end.
///
/// Pause is checked before the sound starts. A sound silenced by a pause
/// request is played again from the start once the run resumes.
pub async fn play_sound(id: &StepId, sound: &SoundSpec, ctx: &RunContext) {
    let url = sound.effective_url(ctx.default_sound());
    loop {
        if ctx.is_paused() {
            ctx.await_resume().await;
        }
        if ctx.should_abort() {
            return;
        }

        debug!("Step {}: playing {}", id, url);
        let end = ctx.play_sound_to_completion(url).await;
        if end == PlaybackEnd::Interrupted && ctx.is_paused() && !ctx.should_abort() {
            debug!("Step {}: sound cut by pause, replaying on resume", id);
            continue;
        }
        return;
    }
}

/// Fire one notification without waiting for the user
pub async fn notify(id: &StepId, title: &str, body: Option<&str>, ctx: &RunContext) {
    let notification = Notification::new(title, body);
    debug!("Step {}: notifying {:?}", id, notification.title);
    if tokio::time::timeout(super::context::NOTIFY_GRACE, ctx.notify(&notification, false))
        .await
        .is_err()
    {
        debug!("Step {}: notification backend did not answer in time", id);
    }
}

/// Settings of a notify-until step
#[derive(Debug, Clone, Copy)]
pub struct NotifyUntil<'a> {
    pub title: &'a str,
    pub body: Option<&'a str>,
    pub sound: &'a SoundSpec,
    pub timeout_ms: Option<u64>,
    pub interval_seconds: f64,
    pub children: &'a [Step],
}

/// Alert repeatedly until the notification is dismissed or the timeout
/// (excluding paused time) runs out.
///
/// Each cycle runs the children once, or plays the sound when there are no
/// children, and is cut short when the timeout expires or the user
/// dismisses. Between cycles the step idles for `interval_seconds`; that
/// idle time also counts against the timeout.
pub async fn notify_until(id: &StepId, step: NotifyUntil<'_>, ctx: &RunContext) {
    let timeout = step.timeout_ms.unwrap_or(DEFAULT_NOTIFY_TIMEOUT_MS);
    let interval = duration_to_ms(step.interval_seconds, DurationUnit::Seconds);
    let mut countdown = Countdown::new(timeout);
    ctx.report_progress(id, Some(timeout));

    let notification = Notification::new(step.title, step.body);
    // the handle keeps the notification alive until the step ends
    let handle = ctx.notify(&notification, true).await.unwrap_or_default();
    let dismissed = handle.dismissed_token().clone();

    let url = step.sound.effective_url(ctx.default_sound());
    let mut cycles = 0u32;

    while !ctx.should_abort() && !dismissed.is_cancelled() && !countdown.expired() {
        if ctx.is_paused() {
            countdown.suspend();
            tokio::select! {
                _ = ctx.await_resume() => {}
                _ = dismissed.cancelled() => {}
            }
            continue;
        }

        cycles += 1;
        debug!("Step {}: alert cycle {}", id, cycles);
        let report_as = step.children.is_empty().then_some(id);
        let cycle = async {
            if step.children.is_empty() {
                ctx.play_sound_to_completion(url).await;
            } else {
                run_sequence(step.children, ctx).await;
            }
        };

        tokio::select! {
            _ = cycle => {}
            _ = countdown.run(ctx, report_as, 0, Some(&dismissed)) => {
                // timed out, dismissed or aborted in the middle of a cycle
                ctx.stop_audio();
            }
        }
        countdown.settle();

        if !step.children.is_empty() {
            ctx.report_progress(id, Some(countdown.remaining_ms()));
        }
        if interval > 0 && !countdown.expired() {
            let floor = countdown.remaining - i64::try_from(interval).unwrap_or(i64::MAX);
            countdown.run(ctx, Some(id), floor, Some(&dismissed)).await;
        }
    }

    if dismissed.is_cancelled() {
        info!("Step {}: dismissed after {} cycle(s)", id, cycles);
    } else if countdown.expired() {
        info!("Step {}: timed out after {} cycle(s)", id, cycles);
    }
    ctx.stop_audio();
    ctx.report_progress(id, None);
}

/// Run the children `repeat` times, or until aborted for an infinite loop
pub async fn repeat(id: &StepId, repeat: RepeatCount, children: &[Step], ctx: &RunContext) {
    if children.is_empty() {
        if repeat == RepeatCount::Infinite {
            debug!("Step {}: infinite loop without children, idling until stopped", id);
            ctx.token().aborted().await;
        }
        return;
    }

    let mut pass: u64 = 0;
    loop {
        if ctx.should_abort() {
            return;
        }
        match repeat {
            RepeatCount::Times(total) if pass >= u64::from(total) => return,
            RepeatCount::Times(total) => debug!("Step {}: pass {}/{}", id, pass + 1, total),
            RepeatCount::Infinite => debug!("Step {}: pass {}", id, pass + 1),
        }

        run_sequence(children, ctx).await;
        pass += 1;
        tokio::task::yield_now().await;
    }
}

//! Recursive walk over a step sequence

use futures::future::{BoxFuture, FutureExt};
use tracing::debug;

use super::{
    context::RunContext,
    executors::{self, NotifyUntil},
};
use crate::model::step::{Step, StepKind};

/// Run `steps` in order until the end or until the run is aborted.
///
/// Pause is honoured before each step; containers recurse, so nesting depth
/// is unbounded.
pub fn run_sequence<'a>(steps: &'a [Step], ctx: &'a RunContext) -> BoxFuture<'a, ()> {
    async move {
        for step in steps {
            if ctx.should_abort() {
                return;
            }
            if ctx.is_paused() {
                ctx.await_resume().await;
                if ctx.should_abort() {
                    return;
                }
            }

            ctx.report_progress(&step.id, None);
            run_step(step, ctx).await;
        }
    }
    .boxed()
}

async fn run_step(step: &Step, ctx: &RunContext) {
    debug!("Running step {} ({})", step.id, step.kind.name());
    let id = &step.id;

    match &step.kind {
        StepKind::Wait { amount, unit } => executors::wait(id, *amount, *unit, ctx).await,
        StepKind::WaitUntil { time, meridiem } => executors::wait_until(id, time, *meridiem, ctx).await,
        StepKind::PlaySound(sound) | StepKind::PlaySoundUntil(sound) => {
            executors::play_sound(id, sound, ctx).await
        }
        StepKind::Notify { title, body } => executors::notify(id, title, body.as_deref(), ctx).await,
        StepKind::NotifyUntil {
            title,
            body,
            sound,
            timeout_ms,
            interval_seconds,
            children,
        } => {
            let settings = NotifyUntil {
                title,
                body: body.as_deref(),
                sound,
                timeout_ms: *timeout_ms,
                interval_seconds: *interval_seconds,
                children,
            };
            executors::notify_until(id, settings, ctx).await
        }
        StepKind::Loop { repeat_count, children } => {
            executors::repeat(id, *repeat_count, children, ctx).await
        }
        StepKind::Unknown => debug!("Skipping step {} of unknown type", id),
    }
}

//! Timer data model: steps, timers and the step tree algebra

pub mod step;
pub mod timer;
pub mod tree;

pub use step::{RepeatCount, SoundSource, SoundSpec, Step, StepId, StepKind};
pub use timer::{LogEntry, Timer, TimerMode};
pub use tree::{DropTarget, Position, StepTree};

//! Timer run control
//!
//! The supervisor owns one run entry per timer; the stopwatch clock backs
//! timers in stopwatch mode.

pub mod stopwatch;
pub mod supervisor;

pub use stopwatch::StopwatchClock;
pub use supervisor::TimerRunner;

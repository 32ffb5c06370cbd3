//! Step execution engine
//!
//! `interpreter` walks a step list and hands each step to its executor in
//! `executors`; both only touch the outside world through a `RunContext`.

pub mod context;
pub mod executors;
pub mod interpreter;

pub use context::{Progress, ProgressFn, RunContext, RunToken};
pub use interpreter::run_sequence;

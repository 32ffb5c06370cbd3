//! State management module
//!
//! The timer registry shared by the HTTP handlers, and the run state
//! reported for each timer.

pub mod app_state;
pub mod run_state;

// Re-export main types
pub use app_state::{AppError, AppState};
pub use run_state::{RunOutcome, RunState, RunStatus, RunUpdate};

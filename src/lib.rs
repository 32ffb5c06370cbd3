//! blocktimer - block-based timers served over HTTP
//!
//! Timers are trees of steps (waits, sounds, notifications and loops) that
//! run on a tokio task each, with pause, restart and stop control. A
//! stopwatch mode records laps.

pub mod api;
pub mod config;
pub mod engine;
pub mod model;
pub mod runner;
pub mod services;
pub mod state;
pub mod store;
pub mod tasks;
pub mod utils;

#[cfg(test)]
mod test_support;

// Re-export commonly used types
pub use api::create_router;
pub use config::Config;
pub use runner::TimerRunner;
pub use state::AppState;
pub use utils::signals::shutdown_signal;

//! Background tasks module
//!
//! This module contains background tasks that run alongside the HTTP server.

pub mod progress_log;

// Re-export main functions
pub use progress_log::progress_log_task;

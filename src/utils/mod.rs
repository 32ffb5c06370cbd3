//! Utility functions module
//!
//! Time arithmetic shared by the executors, and shutdown signal handling.

pub mod signals;
pub mod time;

// Re-export main functions
pub use signals::shutdown_signal;

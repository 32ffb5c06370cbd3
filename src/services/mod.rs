//! External service module
//!
//! Sound playback through an external player and desktop notifications,
//! each behind a trait so runs can be driven by fakes.

pub mod audio;
pub mod notifier;

pub use audio::{AudioBackend, AudioChannel, CommandPlayer, NullPlayer, PlaybackEnd};
pub use notifier::{DesktopNotifier, Notification, Notifier, NullNotifier, Permission};

//! Sidecar Platform - Playback Fallbacks Outside the Engine
//!
//! This crate provides the two backends that don't run through the
//! in-process decode+DSP engine:
//! - A streaming subprocess player for URLs the engine can't handle
//! - The System player seam, plus a command-based default per OS
//!
//! # Platform Support
//!
//! | Platform | Streaming player | System player            | Pause      |
//! |----------|------------------|--------------------------|------------|
//! | Linux    | mpv / ffplay     | gst-play-1.0 / paplay    | SIGSTOP    |
//! | macOS    | mpv / ffplay     | afplay                   | SIGSTOP    |
//! | Windows  | mpv / ffplay     | host-supplied only       | No         |
//!
//! Availability is probed with a PATH lookup; nothing here panics when a
//! tool is missing.

mod error;
mod process;
mod subprocess;
mod system;
mod traits;

pub use error::{PlatformError, PlatformResult};
pub use process::{find_executable, find_executable_in, ExitCallback, ManagedProcess, PlayerCommand};
pub use subprocess::{default_stream_commands, StreamPlayer};
pub use system::{default_system_commands, OsPlayer};
pub use traits::SystemPlayer;

/// Get the default System player for the current OS
pub fn default_system_player() -> Box<dyn SystemPlayer> {
    Box::new(OsPlayer::detect())
}

//! Message Types for Thread Communication
//!
//! Events flow from the playback thread, subprocess monitors and the
//! router back to whoever owns the [`crate::Router`].

use std::fmt;

use serde::{Deserialize, Serialize};

/// Which backend is currently responsible for playback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Backend {
    #[default]
    Idle,
    /// In-process decode+DSP path with live EQ
    Engine,
    /// External streaming player, no EQ/seek/volume
    Subprocess,
    /// OS/toolkit multimedia fallback, no EQ
    System,
}

impl Backend {
    pub fn supports_eq(self) -> bool {
        matches!(self, Backend::Engine)
    }

    pub fn supports_seek(self) -> bool {
        matches!(self, Backend::Engine | Backend::System)
    }

    pub fn supports_volume(self) -> bool {
        matches!(self, Backend::Engine | Backend::System)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Backend::Idle => "idle",
            Backend::Engine => "engine",
            Backend::Subprocess => "subprocess",
            Backend::System => "system",
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Events sent back to the router's owner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum Event {
    /// Playback position after the chunk just handed to the device
    Position { ms: u64 },

    /// Duration of the freshly loaded buffer
    Duration { ms: u64 },

    /// Playback reached the end on its own. Not sent for `stop()`.
    Finished,

    /// Error occurred
    Error { message: String },

    /// The router switched backends
    BackendChanged { backend: Backend },

    /// Current state snapshot
    StateUpdate {
        backend: Backend,
        is_playing: bool,
        is_paused: bool,
    },
}

impl Event {
    /// Create an error event from any error type
    pub fn error<E: fmt::Display>(err: E) -> Self {
        Event::Error {
            message: err.to_string(),
        }
    }
}

/// Snapshot returned by [`crate::Router::state`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlayerState {
    pub backend: Backend,
    pub is_playing: bool,
    pub is_paused: bool,
    pub position_ms: u64,
    pub duration_ms: u64,
    /// Filters in the live cascade (0 unless the Engine is active)
    pub eq_active_bands: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization() {
        let event = Event::Position { ms: 1500 };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("Position"));

        let deserialized: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized, Event::Position { ms: 1500 });
    }

    #[test]
    fn test_error_event() {
        let event = Event::error("Test error message");
        if let Event::Error { message } = event {
            assert_eq!(message, "Test error message");
        } else {
            panic!("Should be Error variant");
        }
    }

    #[test]
    fn test_state_update_serialization() {
        let event = Event::StateUpdate {
            backend: Backend::Subprocess,
            is_playing: true,
            is_paused: false,
        };

        let json = serde_json::to_string(&event).unwrap();
        let deserialized: Event = serde_json::from_str(&json).unwrap();

        if let Event::StateUpdate { backend, is_playing, .. } = deserialized {
            assert_eq!(backend, Backend::Subprocess);
            assert!(is_playing);
        } else {
            panic!("Wrong variant");
        }
    }

    #[test]
    fn test_backend_capabilities() {
        assert!(Backend::Engine.supports_eq());
        assert!(!Backend::Subprocess.supports_eq());
        assert!(!Backend::System.supports_eq());
        assert!(!Backend::Subprocess.supports_seek());
        assert!(!Backend::Subprocess.supports_volume());
        assert!(!Backend::Idle.supports_volume());
        assert_eq!(Backend::default(), Backend::Idle);
        assert_eq!(Backend::System.to_string(), "system");
    }

    #[test]
    fn test_player_state_default() {
        let state = PlayerState::default();
        assert_eq!(state.backend, Backend::Idle);
        assert!(!state.is_playing);
        assert_eq!(state.eq_active_bands, 0);
    }
}

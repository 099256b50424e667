//! System Player Trait
//!
//! The System backend is whatever multimedia facility the host OS or UI
//! toolkit provides. Hosts plug their own implementation in here; the crate
//! ships a command-based default ([`crate::OsPlayer`]).

use crate::error::{PlatformError, PlatformResult};
use crate::process::ExitCallback;

/// Last-resort playback delegate. It never applies EQ.
///
/// Only `play`, `stop` and the state queries are mandatory. The other
/// controls default to [`PlatformError::FeatureNotAvailable`], which the
/// router logs and otherwise ignores.
pub trait SystemPlayer: Send {
    /// Name of this backend (e.g., "afplay", "QtMultimedia")
    fn name(&self) -> &str;

    /// Whether this player can be used at all on this machine
    fn is_available(&self) -> bool;

    /// Start playing a local path or URL at `volume` (0.0 - 1.0)
    ///
    /// `on_exit` fires once if playback ends without `stop()` being called.
    fn play(
        &mut self,
        locator: &str,
        volume: f32,
        on_exit: Option<ExitCallback>,
    ) -> PlatformResult<()>;

    /// Stop playback and release the player. Never fails.
    fn stop(&mut self);

    fn is_playing(&self) -> bool;

    fn is_paused(&self) -> bool;

    fn pause(&mut self) -> PlatformResult<()> {
        Err(PlatformError::unsupported("pause"))
    }

    fn resume(&mut self) -> PlatformResult<()> {
        Err(PlatformError::unsupported("resume"))
    }

    fn seek(&mut self, _position_ms: u64) -> PlatformResult<()> {
        Err(PlatformError::unsupported("seek"))
    }

    fn set_volume(&mut self, _volume: f32) -> PlatformResult<()> {
        Err(PlatformError::unsupported("volume"))
    }

    fn position_ms(&self) -> Option<u64> {
        None
    }

    fn duration_ms(&self) -> Option<u64> {
        None
    }
}

//! Command-based OS Player
//!
//! Default [`SystemPlayer`]: the player command that ships with the OS.
//!
//! | Platform | Command                  | Volume at launch |
//! |----------|--------------------------|------------------|
//! | macOS    | `afplay`                 | `-v`             |
//! | Linux    | `gst-play-1.0`, `paplay` | no               |
//! | Windows  | none                     | -                |

use std::path::PathBuf;

use tracing::info;

use crate::error::{PlatformError, PlatformResult};
use crate::process::{ExitCallback, ManagedProcess, PlayerCommand};
use crate::traits::SystemPlayer;

/// OS player commands tried in order on this platform
pub fn default_system_commands() -> Vec<PlayerCommand> {
    #[cfg(target_os = "macos")]
    {
        vec![PlayerCommand::new("afplay", &[])]
    }
    #[cfg(target_os = "linux")]
    {
        vec![
            PlayerCommand::new("gst-play-1.0", &["--quiet"]),
            PlayerCommand::new("paplay", &[]),
        ]
    }
    #[cfg(not(any(target_os = "macos", target_os = "linux")))]
    {
        Vec::new()
    }
}

/// System player that spawns the OS's command-line player
pub struct OsPlayer {
    command: Option<(PathBuf, PlayerCommand)>,
    process: Option<ManagedProcess>,
}

impl OsPlayer {
    /// Probe the platform defaults
    pub fn detect() -> Self {
        Self::from_candidates(&default_system_commands())
    }

    /// Probe an explicit candidate list; the first one on PATH wins
    pub fn from_candidates(candidates: &[PlayerCommand]) -> Self {
        let command = candidates
            .iter()
            .find_map(|c| c.resolve().map(|path| (path, c.clone())));

        match &command {
            Some((path, _)) => info!("System player available: {}", path.display()),
            None => info!("No system player command found"),
        }

        Self {
            command,
            process: None,
        }
    }

    fn launch_args(command: &PlayerCommand, volume: f32) -> Vec<String> {
        let mut args = command.args.clone();
        if command.program == "afplay" {
            args.push("-v".to_string());
            args.push(format!("{:.2}", volume.clamp(0.0, 1.0)));
        }
        args
    }
}

impl SystemPlayer for OsPlayer {
    fn name(&self) -> &str {
        self.command
            .as_ref()
            .map(|(_, c)| c.program.as_str())
            .unwrap_or("none")
    }

    fn is_available(&self) -> bool {
        self.command.is_some()
    }

    fn play(
        &mut self,
        locator: &str,
        volume: f32,
        on_exit: Option<ExitCallback>,
    ) -> PlatformResult<()> {
        self.stop();
        let (path, command) = self
            .command
            .as_ref()
            .ok_or(PlatformError::UnsupportedPlatform)?;
        let args = Self::launch_args(command, volume);
        self.process = Some(ManagedProcess::spawn(path, &args, locator, on_exit)?);
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(mut process) = self.process.take() {
            process.stop();
        }
    }

    fn is_playing(&self) -> bool {
        self.process
            .as_ref()
            .map(|p| p.is_running() && !p.is_paused())
            .unwrap_or(false)
    }

    fn is_paused(&self) -> bool {
        self.process.as_ref().map(|p| p.is_paused()).unwrap_or(false)
    }

    fn pause(&mut self) -> PlatformResult<()> {
        self.process
            .as_mut()
            .ok_or(PlatformError::NotRunning)?
            .pause()
    }

    fn resume(&mut self) -> PlatformResult<()> {
        self.process
            .as_mut()
            .ok_or(PlatformError::NotRunning)?
            .resume()
    }
}

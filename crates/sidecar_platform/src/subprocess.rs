//! Streaming Subprocess Player
//!
//! Hands a URL to an external media player (mpv, ffplay, ...) when the
//! in-process engine can't take it. The child owns decoding and output, so
//! there is no EQ, seek or volume control; pause/resume use job-control
//! signals where the OS has them.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{PlatformError, PlatformResult};
use crate::process::{ExitCallback, ManagedProcess, PlayerCommand};

/// Streaming executables tried in order when none is configured
pub fn default_stream_commands() -> Vec<PlayerCommand> {
    vec![
        PlayerCommand::new("mpv", &["--no-video", "--really-quiet"]),
        PlayerCommand::new("ffplay", &["-nodisp", "-autoexit", "-loglevel", "quiet"]),
    ]
}

/// External streaming player bound to one resolved executable
pub struct StreamPlayer {
    program: PathBuf,
    args: Vec<String>,
    process: Option<ManagedProcess>,
}

impl StreamPlayer {
    pub fn new(program: PathBuf, args: Vec<String>) -> Self {
        Self {
            program,
            args,
            process: None,
        }
    }

    /// Resolve the first candidate found on PATH
    pub fn probe(candidates: &[PlayerCommand]) -> Option<Self> {
        for candidate in candidates {
            if let Some(program) = candidate.resolve() {
                info!("Streaming player available: {}", program.display());
                return Some(Self::new(program, candidate.args.clone()));
            }
            debug!("Streaming player '{}' not on PATH", candidate.program);
        }
        None
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Stop whatever is playing, then spawn the player for `url`
    pub fn play(&mut self, url: &str, on_exit: Option<ExitCallback>) -> PlatformResult<()> {
        self.stop();
        let process = ManagedProcess::spawn(&self.program, &self.args, url, on_exit)?;
        self.process = Some(process);
        Ok(())
    }

    pub fn pause(&mut self) -> PlatformResult<()> {
        self.process
            .as_mut()
            .ok_or(PlatformError::NotRunning)?
            .pause()
    }

    pub fn resume(&mut self) -> PlatformResult<()> {
        self.process
            .as_mut()
            .ok_or(PlatformError::NotRunning)?
            .resume()
    }

    pub fn stop(&mut self) {
        if let Some(mut process) = self.process.take() {
            process.stop();
        }
    }

    pub fn is_playing(&self) -> bool {
        self.process
            .as_ref()
            .map(|p| p.is_running() && !p.is_paused())
            .unwrap_or(false)
    }

    pub fn is_paused(&self) -> bool {
        self.process.as_ref().map(|p| p.is_paused()).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_commands() {
        let commands = default_stream_commands();
        assert_eq!(commands[0].program, "mpv");
        assert_eq!(commands[1].program, "ffplay");
        assert!(commands[1].args.contains(&"-autoexit".to_string()));
    }

    #[test]
    fn test_probe_with_no_candidates_found() {
        let candidates = vec![PlayerCommand::new("no-such-streamer-xyz", &[])];
        assert!(StreamPlayer::probe(&candidates).is_none());
        assert!(StreamPlayer::probe(&[]).is_none());
    }

    #[test]
    fn test_controls_without_process() {
        let mut player = StreamPlayer::new(PathBuf::from("/nonexistent/mpv"), Vec::new());
        assert!(!player.is_playing());
        assert!(!player.is_paused());
        assert!(matches!(player.pause(), Err(PlatformError::NotRunning)));
        player.stop();
    }

    #[cfg(unix)]
    #[test]
    fn test_play_and_stop_with_stand_in_player() {
        // `sleep` stands in for a streaming player: it takes one argument
        let Some(sleep) = crate::find_executable("sleep") else {
            return;
        };

        let mut player = StreamPlayer::new(sleep, Vec::new());
        player.play("30", None).unwrap();
        assert!(player.is_playing());

        player.pause().unwrap();
        assert!(player.is_paused());
        assert!(!player.is_playing());

        player.stop();
        assert!(!player.is_playing());
    }
}

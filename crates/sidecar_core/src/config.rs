//! Engine, Cache and Router Configuration
//!
//! Everything is optional on disk: missing fields fall back to defaults.
//!
//! # Storage Locations
//! - Linux: `~/.config/sidecar/config.json`
//! - Windows: `%APPDATA%\sidecar\config\config.json`
//! - macOS: `~/Library/Application Support/com.sidecar.sidecar/config.json`

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use sidecar_platform::{default_stream_commands, default_system_commands, PlayerCommand};

use crate::error::{EngineError, EngineResult};

/// Decode+DSP engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Frames processed per playback-loop iteration
    pub chunk_frames: usize,

    /// Sleep between checks while paused
    pub pause_poll_ms: u64,

    /// How long `stop()` waits for the playback thread before abandoning it
    pub stop_timeout_ms: u64,

    /// Ring buffer capacity between the playback thread and the device callback
    pub ring_buffer_frames: usize,

    /// Output device name (None = system default)
    pub output_device: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            chunk_frames: 2048,
            pause_poll_ms: 10,
            stop_timeout_ms: 1000,
            // 2 chunks in flight, ~93ms at 44.1kHz
            ring_buffer_frames: 2048 * 2,
            output_device: None,
        }
    }
}

impl EngineConfig {
    pub fn pause_poll(&self) -> Duration {
        Duration::from_millis(self.pause_poll_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.chunk_frames < 64 || self.chunk_frames > 16384 {
            return Err(format!("Invalid chunk size: {}", self.chunk_frames));
        }
        if self.pause_poll_ms == 0 || self.pause_poll_ms > 1000 {
            return Err(format!("Invalid pause poll interval: {}ms", self.pause_poll_ms));
        }
        if self.ring_buffer_frames < self.chunk_frames * 2 {
            return Err(format!(
                "Ring buffer ({} frames) must hold at least two chunks ({} frames)",
                self.ring_buffer_frames,
                self.chunk_frames * 2
            ));
        }
        Ok(())
    }
}

/// Stream cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub dir: PathBuf,

    /// Byte budget enforced after every download
    pub max_size_bytes: u64,

    /// Whole-request HTTP timeout
    pub timeout_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: std::env::temp_dir().join("sidecar_eq_cache"),
            max_size_bytes: 500 * 1024 * 1024,
            timeout_secs: 30,
        }
    }
}

impl CacheConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.max_size_bytes == 0 {
            return Err("Cache budget must be greater than zero".to_string());
        }
        if self.timeout_secs == 0 {
            return Err("Download timeout must be greater than zero".to_string());
        }
        if self.dir.as_os_str().is_empty() {
            return Err("Cache directory is empty".to_string());
        }
        Ok(())
    }
}

/// External player candidates, tried in order
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SubprocessConfig {
    /// Streaming players for URLs the engine can't take
    pub stream_commands: Vec<PlayerCommand>,

    /// OS player commands behind the System backend; empty uses the platform defaults
    pub system_commands: Vec<PlayerCommand>,
}

impl Default for SubprocessConfig {
    fn default() -> Self {
        Self {
            stream_commands: default_stream_commands(),
            system_commands: default_system_commands(),
        }
    }
}

/// Root configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SidecarConfig {
    pub engine: EngineConfig,
    pub cache: CacheConfig,
    pub players: SubprocessConfig,
}

impl SidecarConfig {
    /// Load from the platform config dir, or return default if missing/corrupt
    pub fn load() -> Self {
        if let Some(path) = Self::default_path() {
            if path.exists() {
                match Self::load_from(&path) {
                    Ok(config) => return config,
                    Err(e) => error!("Failed to load config from {:?}: {}", path, e),
                }
            }
        }

        info!("Using default configuration");
        Self::default()
    }

    /// Load and validate an explicit config file
    pub fn load_from(path: &Path) -> EngineResult<Self> {
        let file = fs::File::open(path)?;
        let config: Self = serde_json::from_reader(file)
            .map_err(|e| EngineError::ConfigError(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        info!("Configuration loaded from {:?}", path);
        Ok(config)
    }

    /// Save to `path`, creating parent directories
    pub fn save_to(&self, path: &Path) -> EngineResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = fs::File::create(path)?;
        serde_json::to_writer_pretty(file, self)
            .map_err(|e| EngineError::ConfigError(e.to_string()))?;
        info!("Configuration saved to {:?}", path);
        Ok(())
    }

    pub fn validate(&self) -> EngineResult<()> {
        self.engine.validate().map_err(EngineError::ConfigError)?;
        self.cache.validate().map_err(EngineError::ConfigError)?;
        Ok(())
    }

    /// Platform-specific config file path
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("com", "sidecar", "sidecar")
            .map(|proj| proj.config_dir().join("config.json"))
    }
}

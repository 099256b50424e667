//! Backend Router
//!
//! One control surface over three mutually exclusive backends. Every
//! `play()` stops all of them, then walks the fallback chain:
//!
//! ```text
//! local path ─► Engine ──────────────────────────────► System
//! remote URL ─► Cache download ─► Engine ─► Subprocess ─► System
//!                                              (if on PATH)
//! ```
//!
//! If the last resort fails too, the router settles in `Idle` and emits an
//! error event. Nothing below this layer raises to the caller.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, Sender};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use sidecar_dsp::NUM_BANDS;
use sidecar_platform::{default_system_player, ExitCallback, OsPlayer, PlayerCommand, StreamPlayer, SystemPlayer};

use crate::cache::StreamCache;
use crate::config::{EngineConfig, SidecarConfig};
use crate::engine::Engine;
use crate::message::{Backend, Event, PlayerState};
use crate::output::{CpalOutput, OutputDevice};

/// A playable reference as given by the caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Locator {
    Local(PathBuf),
    Remote(String),
}

impl Locator {
    /// `http(s)://` (any case) is remote, `file://` and everything else local
    pub fn parse(input: &str) -> Self {
        let input = input.trim();
        if has_scheme(input, "http://") || has_scheme(input, "https://") {
            return Locator::Remote(input.to_string());
        }
        if has_scheme(input, "file://") {
            let path = reqwest::Url::parse(input)
                .ok()
                .and_then(|url| url.to_file_path().ok())
                .unwrap_or_else(|| PathBuf::from(&input["file://".len()..]));
            return Locator::Local(path);
        }
        Locator::Local(PathBuf::from(input))
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, Locator::Remote(_))
    }
}

impl std::fmt::Display for Locator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Locator::Local(path) => write!(f, "{}", path.display()),
            Locator::Remote(url) => f.write_str(url),
        }
    }
}

fn has_scheme(input: &str, scheme: &str) -> bool {
    input
        .get(..scheme.len())
        .map_or(false, |prefix| prefix.eq_ignore_ascii_case(scheme))
}

/// Map 0-1 or 0-100 onto 0.0 - 1.0
pub fn normalize_volume(volume: f32) -> f32 {
    if !volume.is_finite() {
        return 1.0;
    }
    let volume = if volume > 1.0 { volume / 100.0 } else { volume };
    volume.clamp(0.0, 1.0)
}

/// OS player from `commands`; an empty list means the platform defaults
fn system_player(commands: &[PlayerCommand]) -> Box<dyn SystemPlayer> {
    if commands.is_empty() {
        default_system_player()
    } else {
        Box::new(OsPlayer::from_candidates(commands))
    }
}

/// What this machine can do, probed once at construction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    /// An output device was present
    pub engine: bool,
    /// A streaming executable was found on PATH
    pub subprocess: bool,
    /// The System player reported itself usable
    pub system: bool,
}

/// Assembles a [`Router`] from explicit parts
pub struct RouterBuilder {
    engine_config: EngineConfig,
    output: Option<Arc<dyn OutputDevice>>,
    subprocess: Option<StreamPlayer>,
    system: Option<Box<dyn SystemPlayer>>,
    cache: Option<StreamCache>,
}

impl Default for RouterBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RouterBuilder {
    /// Nothing available: no engine, no subprocess, no cache
    pub fn new() -> Self {
        Self {
            engine_config: EngineConfig::default(),
            output: None,
            subprocess: None,
            system: None,
            cache: None,
        }
    }

    pub fn engine_config(mut self, config: EngineConfig) -> Self {
        self.engine_config = config;
        self
    }

    /// Enable the Engine on `output`
    pub fn output(mut self, output: Arc<dyn OutputDevice>) -> Self {
        self.output = Some(output);
        self
    }

    pub fn subprocess(mut self, player: StreamPlayer) -> Self {
        self.subprocess = Some(player);
        self
    }

    pub fn system(mut self, player: Box<dyn SystemPlayer>) -> Self {
        self.system = Some(player);
        self
    }

    pub fn cache(mut self, cache: StreamCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn build(self) -> Router {
        let (event_sender, event_receiver) = unbounded();

        let engine = self
            .output
            .map(|output| Engine::new(self.engine_config, output, event_sender.clone()));
        let system = self
            .system
            .unwrap_or_else(|| Box::new(OsPlayer::from_candidates(&[])));

        let capabilities = Capabilities {
            engine: engine.is_some(),
            subprocess: self.subprocess.is_some(),
            system: system.is_available(),
        };
        info!(
            "Backends: engine={} subprocess={} system={} ({})",
            capabilities.engine,
            capabilities.subprocess,
            capabilities.system,
            system.name()
        );

        Router {
            backend: Backend::Idle,
            engine,
            subprocess: self.subprocess,
            system,
            cache: self.cache,
            capabilities,
            volume: 1.0,
            current: None,
            event_sender,
            event_receiver,
        }
    }
}

/// Single entry point for playback
pub struct Router {
    backend: Backend,
    engine: Option<Engine>,
    subprocess: Option<StreamPlayer>,
    system: Box<dyn SystemPlayer>,
    cache: Option<StreamCache>,
    capabilities: Capabilities,
    volume: f32,
    current: Option<Locator>,
    event_sender: Sender<Event>,
    event_receiver: Receiver<Event>,
}

impl Router {
    /// Probe the machine and wire up whatever is available
    pub fn new(config: &SidecarConfig) -> Self {
        let mut builder = RouterBuilder::new();

        let engine_config = match config.engine.validate() {
            Ok(()) => config.engine.clone(),
            Err(e) => {
                warn!("Invalid engine config ({}), using defaults", e);
                EngineConfig::default()
            }
        };
        let output = CpalOutput::new(engine_config.output_device.clone(), engine_config.ring_buffer_frames);
        if output.is_available() {
            builder = builder.output(Arc::new(output));
        } else {
            info!("No output device; engine backend disabled");
        }
        builder = builder.engine_config(engine_config);

        if let Some(player) = StreamPlayer::probe(&config.players.stream_commands) {
            builder = builder.subprocess(player);
        }
        builder = builder.system(system_player(&config.players.system_commands));

        match StreamCache::new(&config.cache) {
            Ok(cache) => builder = builder.cache(cache),
            Err(e) => warn!("Stream cache unavailable: {}", e),
        }

        builder.build()
    }

    /// Play `locator`, returning the backend that took it
    pub fn play(&mut self, locator: &str) -> Backend {
        let locator = Locator::parse(locator);
        self.stop_all();
        info!("Play {}", locator);

        let backend = match &locator {
            Locator::Local(path) => {
                if self.try_engine(path) {
                    Backend::Engine
                } else {
                    self.try_system(&locator.to_string())
                }
            }
            Locator::Remote(url) => self.play_remote(url),
        };

        self.current = (backend != Backend::Idle).then_some(locator);
        self.set_backend(backend);
        backend
    }

    fn play_remote(&mut self, url: &str) -> Backend {
        let cached = if self.engine.is_some() {
            self.cache.as_ref().and_then(|c| c.download_and_cache(url))
        } else {
            None
        };
        if let Some(path) = cached {
            if self.try_engine(&path) {
                return Backend::Engine;
            }
        }

        if self.try_subprocess(url) {
            return Backend::Subprocess;
        }
        self.try_system(url)
    }

    fn try_engine(&mut self, path: &Path) -> bool {
        let Some(engine) = self.engine.as_ref() else {
            return false;
        };
        if !engine.load(path) {
            warn!("Engine could not load {}", path.display());
            return false;
        }
        engine.set_volume(self.volume);
        engine.play();
        true
    }

    fn try_subprocess(&mut self, url: &str) -> bool {
        let on_exit = self.exit_callback(Backend::Subprocess);
        let Some(player) = self.subprocess.as_mut() else {
            return false;
        };
        match player.play(url, Some(on_exit)) {
            Ok(()) => true,
            Err(e) => {
                warn!("Streaming player failed: {}", e);
                false
            }
        }
    }

    fn try_system(&mut self, locator: &str) -> Backend {
        if !self.system.is_available() {
            warn!("No backend could play {}", locator);
            self.emit(Event::error(format!("no backend could play {}", locator)));
            return Backend::Idle;
        }

        let on_exit = self.exit_callback(Backend::System);
        match self.system.play(locator, self.volume, Some(on_exit)) {
            Ok(()) => Backend::System,
            Err(e) => {
                warn!("System player failed on {}: {}", locator, e);
                self.emit(Event::error(e));
                Backend::Idle
            }
        }
    }

    pub fn pause(&mut self) {
        match self.backend {
            Backend::Engine => self.with_engine(|e| e.pause()),
            Backend::Subprocess => {
                if let Some(Err(e)) = self.subprocess.as_mut().map(|p| p.pause()) {
                    debug!("Pause ignored: {}", e);
                }
            }
            Backend::System => {
                if let Err(e) = self.system.pause() {
                    debug!("Pause ignored: {}", e);
                }
            }
            Backend::Idle => debug!("pause() while idle"),
        }
        self.emit_state();
    }

    pub fn resume(&mut self) {
        match self.backend {
            Backend::Engine => self.with_engine(|e| e.play()),
            Backend::Subprocess => {
                if let Some(Err(e)) = self.subprocess.as_mut().map(|p| p.resume()) {
                    debug!("Resume ignored: {}", e);
                }
            }
            Backend::System => {
                if let Err(e) = self.system.resume() {
                    debug!("Resume ignored: {}", e);
                }
            }
            Backend::Idle => debug!("resume() while idle"),
        }
        self.emit_state();
    }

    /// Stop the active backend. The selection is kept for `resume()`.
    pub fn stop(&mut self) {
        match self.backend {
            Backend::Engine => self.with_engine(|e| e.stop()),
            Backend::Subprocess => {
                if let Some(player) = self.subprocess.as_mut() {
                    player.stop();
                }
            }
            Backend::System => self.system.stop(),
            Backend::Idle => {}
        }
        self.emit_state();
    }

    pub fn seek(&mut self, position_ms: i64) {
        match self.backend {
            Backend::Engine => self.with_engine(|e| e.seek(position_ms)),
            Backend::System => {
                if let Err(e) = self.system.seek(position_ms.max(0) as u64) {
                    debug!("Seek ignored: {}", e);
                }
            }
            Backend::Subprocess | Backend::Idle => {
                debug!("Seek not supported by {} backend", self.backend)
            }
        }
    }

    /// Accepts 0.0 - 1.0 or 0 - 100
    pub fn set_volume(&mut self, volume: f32) {
        self.volume = normalize_volume(volume);

        // Remembered by the engine even when another backend is active
        if let Some(engine) = &self.engine {
            engine.set_volume(self.volume);
        }
        match self.backend {
            Backend::System => {
                if let Err(e) = self.system.set_volume(self.volume) {
                    debug!("Volume ignored: {}", e);
                }
            }
            Backend::Subprocess => debug!("Volume not supported by subprocess backend"),
            Backend::Engine | Backend::Idle => {}
        }
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    /// Set one EQ band. Audible only while the Engine is active.
    pub fn set_eq_band(&mut self, index: usize, gain_db: f32) {
        let Some(engine) = &self.engine else {
            debug!("EQ unavailable without the engine backend");
            return;
        };
        if let Err(e) = engine.set_eq_band(index, gain_db) {
            warn!("EQ band {} not set: {}", index, e);
            return;
        }
        if !self.backend.supports_eq() {
            debug!("EQ stored; {} backend plays without it", self.backend);
        }
    }

    /// Set all seven gains at once
    pub fn set_eq_gains(&mut self, gains: [f32; NUM_BANDS]) {
        match &self.engine {
            Some(engine) => engine.set_eq_gains(gains),
            None => debug!("EQ unavailable without the engine backend"),
        }
    }

    /// Current EQ gains, if the engine exists
    pub fn eq_gains(&self) -> Option<[f32; NUM_BANDS]> {
        self.engine.as_ref().map(|e| e.eq_gains().as_array())
    }

    /// Filters in the engine's live cascade
    pub fn cascade_len(&self) -> usize {
        self.engine.as_ref().map(|e| e.cascade_len()).unwrap_or(0)
    }

    pub fn backend(&self) -> Backend {
        self.backend
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    pub fn current_locator(&self) -> Option<&Locator> {
        self.current.as_ref()
    }

    pub fn engine(&self) -> Option<&Engine> {
        self.engine.as_ref()
    }

    pub fn cache(&self) -> Option<&StreamCache> {
        self.cache.as_ref()
    }

    /// Backends that currently report playback
    pub fn active_backends(&self) -> Vec<Backend> {
        let mut active = Vec::new();
        if self.engine.as_ref().map(|e| e.is_playing()).unwrap_or(false) {
            active.push(Backend::Engine);
        }
        if self
            .subprocess
            .as_ref()
            .map(|p| p.is_playing() || p.is_paused())
            .unwrap_or(false)
        {
            active.push(Backend::Subprocess);
        }
        if self.system.is_playing() || self.system.is_paused() {
            active.push(Backend::System);
        }
        active
    }

    pub fn state(&self) -> PlayerState {
        let mut state = PlayerState {
            backend: self.backend,
            ..PlayerState::default()
        };

        match self.backend {
            Backend::Engine => {
                if let Some(engine) = &self.engine {
                    state.is_playing = engine.is_playing();
                    state.is_paused = engine.is_paused();
                    state.position_ms = engine.get_position();
                    state.duration_ms = engine.get_duration();
                    state.eq_active_bands = engine.cascade_len();
                }
            }
            Backend::Subprocess => {
                if let Some(player) = &self.subprocess {
                    state.is_paused = player.is_paused();
                    state.is_playing = player.is_playing() || state.is_paused;
                }
            }
            Backend::System => {
                state.is_paused = self.system.is_paused();
                state.is_playing = self.system.is_playing() || state.is_paused;
                state.position_ms = self.system.position_ms().unwrap_or(0);
                state.duration_ms = self.system.duration_ms().unwrap_or(0);
            }
            Backend::Idle => {}
        }
        state
    }

    /// Next pending event, if any
    pub fn poll_event(&self) -> Option<Event> {
        self.event_receiver.try_recv().ok()
    }

    /// Wait up to `timeout` for the next event
    pub fn wait_event(&self, timeout: Duration) -> Option<Event> {
        self.event_receiver.recv_timeout(timeout).ok()
    }

    /// Another handle on the event stream
    pub fn events(&self) -> Receiver<Event> {
        self.event_receiver.clone()
    }

    fn stop_all(&mut self) {
        if let Some(engine) = &self.engine {
            engine.stop();
        }
        if let Some(player) = self.subprocess.as_mut() {
            player.stop();
        }
        self.system.stop();
    }

    fn set_backend(&mut self, backend: Backend) {
        if self.backend != backend {
            info!("Backend {} -> {}", self.backend, backend);
            self.backend = backend;
            self.emit(Event::BackendChanged { backend });
        }
        self.emit_state();
    }

    fn with_engine(&self, f: impl FnOnce(&Engine)) {
        if let Some(engine) = &self.engine {
            f(engine);
        }
    }

    fn exit_callback(&self, backend: Backend) -> ExitCallback {
        let sender = self.event_sender.clone();
        Box::new(move |success| {
            if !success {
                let _ = sender.send(Event::error(format!("{} player exited with an error", backend)));
            }
            let _ = sender.send(Event::Finished);
        })
    }

    fn emit_state(&self) {
        let state = self.state();
        self.emit(Event::StateUpdate {
            backend: state.backend,
            is_playing: state.is_playing,
            is_paused: state.is_paused,
        });
    }

    fn emit(&self, event: Event) {
        let _ = self.event_sender.send(event);
    }
}

impl Drop for Router {
    fn drop(&mut self) {
        self.stop_all();
    }
}

//! Decode+DSP Engine
//!
//! Plays one fully decoded file through the EQ cascade.
//!
//! # Threading
//!
//! ```text
//! caller thread                         playback thread (one per session)
//! ─────────────                         ─────────────────────────────────
//! load / play / pause / seek  ──state lock──►  slice chunk, advance position
//! set_eq_band: build cascade  ──cascade lock─► filter chunk
//! set_volume                  ──atomic─────►  scale, clip, write to device
//! ```
//!
//! The two locks are independent and held briefly; a cascade rebuild never
//! stalls position updates. Device writes happen with no lock held.
//!
//! Reported position is the frame being heard: frames still queued in the
//! output stream are subtracted from the next frame to write.

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::Sender;
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use sidecar_dsp::{apply_gain_and_clip, Band, EqGains, FilterCascade, NUM_BANDS};

use crate::config::EngineConfig;
use crate::decoder::{self, AudioBuffer};
use crate::error::{EngineError, EngineResult};
use crate::message::Event;
use crate::output::{CpalOutput, OutputDevice};

/// Format the cascade is built for before anything is loaded
const DEFAULT_FORMAT: (u32, u16) = (44100, 2);

/// Playback position and flags, guarded by the state lock
#[derive(Debug, Default)]
struct PlaybackState {
    buffer: Option<Arc<AudioBuffer>>,
    /// Next frame to hand to the output
    position: usize,
    /// Frames the output holds that haven't been heard yet
    queued: usize,
    is_playing: bool,
    is_paused: bool,
    /// Bumped on every play/stop; a thread with a stale id exits
    session: u64,
}

impl PlaybackState {
    fn move_to(&mut self, frame: usize) {
        self.position = frame;
        self.queued = 0;
    }

    /// Frame currently audible
    fn heard(&self) -> usize {
        self.position.saturating_sub(self.queued)
    }
}

/// Gains plus the format the cascade must match
struct EqState {
    gains: EqGains,
    sample_rate: u32,
    channels: u16,
}

/// State shared with the playback thread
struct Shared {
    state: Mutex<PlaybackState>,
    cascade: Mutex<FilterCascade>,
    /// Serialises gain edits and rebuilds; never touched by the playback thread
    eq: Mutex<EqState>,
    /// Stored as f32 bits
    volume_bits: AtomicU32,
}

impl Shared {
    fn volume(&self) -> f32 {
        f32::from_bits(self.volume_bits.load(Ordering::Relaxed))
    }

    /// Clear the flags if `session` is still current
    fn mark_stopped(&self, session: u64) {
        let mut state = self.state.lock();
        if state.session == session {
            state.is_playing = false;
            state.is_paused = false;
        }
    }
}

struct PlaybackThread {
    handle: JoinHandle<()>,
    stop: Arc<AtomicBool>,
}

/// In-process player with a live 7-band EQ
pub struct Engine {
    shared: Arc<Shared>,
    output: Arc<dyn OutputDevice>,
    config: EngineConfig,
    event_sender: Sender<Event>,
    thread: Mutex<Option<PlaybackThread>>,
}

impl Engine {
    pub fn new(config: EngineConfig, output: Arc<dyn OutputDevice>, event_sender: Sender<Event>) -> Self {
        let (sample_rate, channels) = DEFAULT_FORMAT;
        let cascade = FilterCascade::empty(sample_rate as f32, channels as usize);

        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(PlaybackState::default()),
                cascade: Mutex::new(cascade),
                eq: Mutex::new(EqState {
                    gains: EqGains::flat(),
                    sample_rate,
                    channels,
                }),
                volume_bits: AtomicU32::new(1.0_f32.to_bits()),
            }),
            output,
            config,
            event_sender,
            thread: Mutex::new(None),
        }
    }

    /// Engine on the system output device; fails if there is none
    pub fn with_default_output(config: EngineConfig, event_sender: Sender<Event>) -> EngineResult<Self> {
        config.validate().map_err(EngineError::ConfigError)?;

        let output = CpalOutput::new(config.output_device.clone(), config.ring_buffer_frames);
        if !output.is_available() {
            return Err(match &config.output_device {
                Some(name) => EngineError::DeviceNotFound(name.clone()),
                None => EngineError::NoDevicesFound,
            });
        }
        Ok(Self::new(config, Arc::new(output), event_sender))
    }

    pub fn output_name(&self) -> String {
        self.output.name()
    }

    /// Decode `path` into memory, replacing whatever was loaded
    ///
    /// Returns false if the file can't be read or decoded; nothing is
    /// loaded afterwards in that case.
    pub fn load(&self, path: &Path) -> bool {
        self.stop();
        {
            let mut state = self.shared.state.lock();
            state.buffer = None;
            state.move_to(0);
        }

        let buffer = match decoder::decode_file(path) {
            Ok(buffer) => buffer,
            Err(e) => {
                warn!("Failed to load {}: {}", path.display(), e);
                return false;
            }
        };

        self.apply_format(buffer.sample_rate(), buffer.channels());
        let duration_ms = buffer.duration_ms();
        {
            let mut state = self.shared.state.lock();
            state.buffer = Some(Arc::new(buffer));
            state.move_to(0);
        }

        info!("Loaded {} ({}ms)", path.display(), duration_ms);
        self.emit(Event::Duration { ms: duration_ms });
        true
    }

    /// Start, or resume if paused. No-op if nothing is loaded.
    pub fn play(&self) {
        let mut slot = self.thread.lock();

        let session = {
            let mut state = self.shared.state.lock();
            let Some(frames) = state.buffer.as_ref().map(|b| b.frames()) else {
                debug!("play() with nothing loaded");
                return;
            };
            if state.is_playing {
                if state.is_paused {
                    state.is_paused = false;
                    info!("Playback resumed");
                }
                return;
            }
            if state.position >= frames {
                state.move_to(0);
            }
            state.is_playing = true;
            state.is_paused = false;
            state.session += 1;
            state.session
        };

        // A previous session that ended on its own; reap it if it's gone
        if let Some(old) = slot.take() {
            old.stop.store(true, Ordering::Release);
            if old.handle.is_finished() {
                let _ = old.handle.join();
            }
        }

        let stop = Arc::new(AtomicBool::new(false));
        let session_ctx = Session {
            shared: Arc::clone(&self.shared),
            output: Arc::clone(&self.output),
            events: self.event_sender.clone(),
            stop: Arc::clone(&stop),
            id: session,
            chunk_frames: self.config.chunk_frames,
            pause_poll: self.config.pause_poll(),
        };

        match thread::Builder::new()
            .name("sidecar-playback".into())
            .spawn(move || session_ctx.run())
        {
            Ok(handle) => {
                *slot = Some(PlaybackThread { handle, stop });
                info!("Playback started (session {})", session);
            }
            Err(e) => {
                error!("Failed to spawn playback thread: {}", e);
                self.shared.mark_stopped(session);
                self.emit(Event::error(e));
            }
        }
    }

    /// Hold position without releasing the device
    pub fn pause(&self) {
        let mut state = self.shared.state.lock();
        if state.is_playing && !state.is_paused {
            state.is_paused = true;
            info!("Playback paused");
        }
    }

    /// Tear down the playback thread and rewind to the start
    pub fn stop(&self) {
        let thread = self.thread.lock().take();
        {
            let mut state = self.shared.state.lock();
            state.is_playing = false;
            state.is_paused = false;
            state.move_to(0);
            state.session += 1;
        }

        if let Some(thread) = thread {
            thread.stop.store(true, Ordering::Release);
            join_with_timeout(thread.handle, self.config.stop_timeout());
        }
    }

    /// Move to `position_ms`, clamped into the buffer
    pub fn seek(&self, position_ms: i64) {
        let mut state = self.shared.state.lock();
        let Some((frames, requested)) = state
            .buffer
            .as_ref()
            .map(|b| (b.frames(), b.ms_to_frames(position_ms.max(0) as u64)))
        else {
            return;
        };
        if frames == 0 {
            return;
        }

        let target = requested.min(frames - 1);
        state.move_to(target);
        debug!("Seek to {}ms (frame {})", position_ms, target);
    }

    /// Set output volume, clamped to 0.0 - 1.0
    pub fn set_volume(&self, volume: f32) {
        if !volume.is_finite() {
            warn!("Ignoring non-finite volume");
            return;
        }
        self.shared
            .volume_bits
            .store(volume.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
    }

    pub fn volume(&self) -> f32 {
        self.shared.volume()
    }

    /// Set one band's gain; the new cascade applies from the next chunk
    pub fn set_eq_band(&self, index: usize, gain_db: f32) -> EngineResult<()> {
        let mut eq = self.shared.eq.lock();
        eq.gains.set(index, gain_db)?;
        self.rebuild_cascade(&eq);
        debug!("EQ band {} = {:.1}dB", index, eq.gains.get(index).unwrap_or(0.0));
        Ok(())
    }

    /// Replace all seven gains with a single rebuild
    pub fn set_eq_gains(&self, gains: [f32; NUM_BANDS]) {
        let mut eq = self.shared.eq.lock();
        eq.gains = EqGains::from_array(gains);
        self.rebuild_cascade(&eq);
    }

    pub fn eq_gains(&self) -> EqGains {
        self.shared.eq.lock().gains
    }

    /// Filters in the live cascade
    pub fn cascade_len(&self) -> usize {
        self.shared.cascade.lock().len()
    }

    /// Bands compiled into the live cascade
    pub fn cascade_bands(&self) -> Vec<Band> {
        self.shared.cascade.lock().bands().to_vec()
    }

    pub fn get_position(&self) -> u64 {
        let state = self.shared.state.lock();
        state
            .buffer
            .as_ref()
            .map(|b| b.frames_to_ms(state.heard()))
            .unwrap_or(0)
    }

    pub fn get_duration(&self) -> u64 {
        self.shared
            .state
            .lock()
            .buffer
            .as_ref()
            .map(|b| b.duration_ms())
            .unwrap_or(0)
    }

    pub fn is_loaded(&self) -> bool {
        self.shared.state.lock().buffer.is_some()
    }

    pub fn is_playing(&self) -> bool {
        self.shared.state.lock().is_playing
    }

    pub fn is_paused(&self) -> bool {
        self.shared.state.lock().is_paused
    }

    /// Retarget the cascade at a new buffer format
    fn apply_format(&self, sample_rate: u32, channels: u16) {
        let mut eq = self.shared.eq.lock();
        if eq.sample_rate != sample_rate || eq.channels != channels {
            eq.sample_rate = sample_rate;
            eq.channels = channels;
            self.rebuild_cascade(&eq);
        } else {
            self.shared.cascade.lock().reset();
        }
    }

    /// Build off-lock, then swap under the cascade lock
    fn rebuild_cascade(&self, eq: &EqState) {
        let cascade = match FilterCascade::build(&eq.gains, eq.sample_rate as f32, eq.channels as usize) {
            Ok(cascade) => cascade,
            Err(e) => {
                warn!("Keeping previous EQ cascade: {}", e);
                return;
            }
        };
        let len = cascade.len();
        let old = std::mem::replace(&mut *self.shared.cascade.lock(), cascade);
        drop(old);
        debug!("EQ cascade rebuilt: {} active filters", len);
    }

    fn emit(&self, event: Event) {
        let _ = self.event_sender.try_send(event);
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Everything one playback thread needs
struct Session {
    shared: Arc<Shared>,
    output: Arc<dyn OutputDevice>,
    events: Sender<Event>,
    stop: Arc<AtomicBool>,
    id: u64,
    chunk_frames: usize,
    pause_poll: Duration,
}

impl Session {
    fn run(self) {
        let format = {
            let state = self.shared.state.lock();
            state.buffer.as_ref().map(|b| (b.sample_rate(), b.channels()))
        };
        let Some((sample_rate, channels)) = format else {
            self.shared.mark_stopped(self.id);
            return;
        };

        let mut stream = match self.output.open(sample_rate, channels) {
            Ok(stream) => stream,
            Err(e) => {
                self.fail(e);
                return;
            }
        };

        let mut chunk: Vec<f32> = Vec::with_capacity(self.chunk_frames * channels as usize);
        let mut reached_end = false;

        while !self.stop.load(Ordering::Acquire) {
            let buffer = {
                let mut state = self.shared.state.lock();
                if state.session != self.id {
                    break;
                }
                if state.is_paused {
                    drop(state);
                    thread::sleep(self.pause_poll);
                    continue;
                }
                let Some(buffer) = state.buffer.clone() else {
                    break;
                };

                let frames = buffer.frames();
                if state.position >= frames {
                    state.is_playing = false;
                    state.is_paused = false;
                    reached_end = true;
                    break;
                }

                let start = state.position;
                let end = (start + self.chunk_frames).min(frames);
                state.position = end;

                chunk.clear();
                chunk.extend_from_slice(buffer.frame_slice(start, end));
                buffer
            };

            self.shared.cascade.lock().process_interleaved(&mut chunk);
            apply_gain_and_clip(&mut chunk, self.shared.volume());

            if let Err(e) = stream.write(&chunk) {
                self.fail(e);
                return;
            }

            let position_ms = {
                let mut state = self.shared.state.lock();
                if state.session != self.id {
                    break;
                }
                state.queued = stream.queued_frames();
                buffer.frames_to_ms(state.heard())
            };
            let _ = self.events.try_send(Event::Position { ms: position_ms });
        }

        if reached_end {
            if let Err(e) = stream.drain() {
                warn!("Output drain failed: {}", e);
            }
            {
                let mut state = self.shared.state.lock();
                if state.session == self.id {
                    state.queued = 0;
                }
            }
            info!("Playback finished (session {})", self.id);
            let _ = self.events.try_send(Event::Finished);
        }
    }

    fn fail(&self, err: EngineError) {
        error!("Playback aborted: {}", err);
        self.shared.mark_stopped(self.id);
        let _ = self.events.try_send(Event::error(err));
    }
}

/// Join, or abandon the thread after `timeout`
fn join_with_timeout(handle: JoinHandle<()>, timeout: Duration) {
    let deadline = Instant::now() + timeout;
    while !handle.is_finished() {
        if Instant::now() >= deadline {
            warn!("Playback thread did not stop within {:?}; abandoning it", timeout);
            return;
        }
        thread::sleep(Duration::from_millis(2));
    }
    if handle.join().is_err() {
        error!("Playback thread panicked");
    }
}

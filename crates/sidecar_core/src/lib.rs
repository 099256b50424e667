//! Sidecar Core - Playback Engine, Stream Cache and Backend Router
//!
//! This crate provides the playback core for Sidecar EQ, including:
//! - Whole-file decoding (via symphonia) into an in-memory buffer
//! - A playback thread running a live 7-band EQ cascade (via sidecar_dsp)
//! - Output through cpal, or a paced null device for headless hosts
//! - A disk cache that turns remote URLs into seekable local files
//! - A router that picks Engine, Subprocess or System playback per locator
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Caller Thread                          │
//! │   Router::play ──▶ StreamCache ──▶ Engine / Subprocess /    │
//! │        ▲                              System                │
//! │        └────────── events (crossbeam-channel) ◀──────┐      │
//! └─────────────────────────────────────────────────────────────┘
//!                              │ state lock / cascade lock
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Playback Thread                          │
//! │   AudioBuffer ──▶ FilterCascade ──▶ volume+clip ──rtrb──▶   │
//! │                                              cpal callback  │
//! └─────────────────────────────────────────────────────────────┘
//! ```

mod cache;
mod config;
mod decoder;
mod device;
mod engine;
mod error;
mod message;
mod output;
mod router;

#[cfg(test)]
mod test_support;

pub use cache::{cache_file_name, url_hash, CacheEntry, EvictionReport, StreamCache};
pub use config::{CacheConfig, EngineConfig, SidecarConfig, SubprocessConfig};
pub use decoder::{decode_file, AudioBuffer};
pub use device::{find_output_device, has_output_device, OutputDeviceInfo};
pub use engine::Engine;
pub use error::{EngineError, EngineResult};
pub use message::{Backend, Event, PlayerState};
pub use output::{CpalOutput, NullOutput, OutputDevice, OutputStream};
pub use router::{normalize_volume, Capabilities, Locator, Router, RouterBuilder};

// Re-export DSP types for convenience
pub use sidecar_dsp::{band_label, EqGains, EQ_BANDS, MAX_GAIN_DB, MIN_GAIN_DB, NUM_BANDS};

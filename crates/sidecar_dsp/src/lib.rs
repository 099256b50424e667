//! Sidecar DSP - Digital Signal Processing Module
//!
//! This crate provides the signal path used by the playback engine:
//! - 7 fixed EQ bands (60 Hz .. 15 kHz) with clamped gains
//! - A peaking-filter cascade compiled from a gain vector
//! - Hard clipping to keep boosted output inside [-1, 1]
//!
//! # Architecture
//!
//! A [`FilterCascade`] is never edited in place. Changing a gain means
//! building a new cascade from an [`EqGains`] snapshot and swapping it in
//! between chunks, so the processing path never sees a half-built chain.
//! Bands whose gain is within [`ACTIVE_GAIN_THRESHOLD_DB`] of 0 dB are left
//! out of the cascade entirely.

mod cascade;
mod clip;
mod eq;
mod error;

pub use cascade::FilterCascade;
pub use clip::apply_gain_and_clip;
pub use eq::{
    band_label, Band, EqGains, ACTIVE_GAIN_THRESHOLD_DB, BAND_Q, EQ_BANDS, MAX_GAIN_DB,
    MIN_GAIN_DB, NUM_BANDS,
};
pub use error::DspError;

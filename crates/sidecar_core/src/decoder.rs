//! Whole-file Decoding
//!
//! The engine decodes a file completely before playback starts so that seek
//! is an index assignment and the playback loop never touches the codec.

use std::fs::File;
use std::path::Path;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::{debug, info};

use crate::error::{EngineError, EngineResult};

/// Decoded PCM, interleaved `f32`, immutable after construction
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    samples: Vec<f32>,
    channels: u16,
    sample_rate: u32,
}

impl AudioBuffer {
    pub fn new(samples: Vec<f32>, channels: u16, sample_rate: u32) -> EngineResult<Self> {
        if channels == 0 {
            return Err(EngineError::DecodeError("zero channels".to_string()));
        }
        if sample_rate == 0 {
            return Err(EngineError::DecodeError("zero sample rate".to_string()));
        }
        if samples.len() % channels as usize != 0 {
            return Err(EngineError::DecodeError(format!(
                "{} samples do not divide into {} channels",
                samples.len(),
                channels
            )));
        }
        Ok(Self {
            samples,
            channels,
            sample_rate,
        })
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Number of frames (samples per channel)
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels as usize
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Interleaved samples for frames `start..end`
    pub fn frame_slice(&self, start: usize, end: usize) -> &[f32] {
        let ch = self.channels as usize;
        let end = end.min(self.frames());
        let start = start.min(end);
        &self.samples[start * ch..end * ch]
    }

    pub fn duration_ms(&self) -> u64 {
        self.frames_to_ms(self.frames())
    }

    pub fn frames_to_ms(&self, frames: usize) -> u64 {
        (frames as u128 * 1000 / self.sample_rate as u128) as u64
    }

    /// Frame index for `ms`, not clamped to the buffer
    pub fn ms_to_frames(&self, ms: u64) -> usize {
        let frames = ms as u128 * self.sample_rate as u128 / 1000;
        usize::try_from(frames).unwrap_or(usize::MAX)
    }
}

/// Decode the first audio track of `path` into memory
pub fn decode_file(path: &Path) -> EngineResult<AudioBuffer> {
    let file = File::open(path)?;
    let file_len = file.metadata().map(|m| m.len()).unwrap_or(0);
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| EngineError::DecodeError(format!("unrecognised format: {}", e)))?;
    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| EngineError::DecodeError("no audio track".to_string()))?;

    let track_id = track.id;
    let mut sample_rate = track.codec_params.sample_rate;
    let mut channels = track.codec_params.channels.map(|c| c.count());

    let mut samples: Vec<f32> = Vec::new();
    if let (Some(frames), Some(ch)) = (track.codec_params.n_frames, channels) {
        // Header counts are untrusted; no sample takes less than a byte on disk
        let hint = frames.saturating_mul(ch as u64).min(file_len);
        if samples.try_reserve(hint as usize).is_err() {
            debug!("Could not pre-allocate {} samples", hint);
        }
    }

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| EngineError::DecodeError(format!("unsupported codec: {}", e)))?;

    let mut sample_buf: Option<SampleBuffer<f32>> = None;

    loop {
        let packet = match format.next_packet() {
            Ok(p) => p,
            Err(SymphoniaError::IoError(ref e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break;
            }
            Err(SymphoniaError::ResetRequired) => {
                decoder.reset();
                continue;
            }
            Err(e) => return Err(EngineError::DecodeError(format!("read failed: {}", e))),
        };

        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(decoded) => {
                let spec = *decoded.spec();
                sample_rate.get_or_insert(spec.rate);
                channels.get_or_insert(spec.channels.count());

                let needed = decoded.capacity() * spec.channels.count();
                if sample_buf.as_ref().map_or(true, |b| b.capacity() < needed) {
                    sample_buf = Some(SampleBuffer::new(decoded.capacity() as u64, spec));
                }
                if let Some(buf) = sample_buf.as_mut() {
                    buf.copy_interleaved_ref(decoded);
                    samples.extend_from_slice(buf.samples());
                }
            }
            Err(SymphoniaError::DecodeError(e)) => {
                debug!("Skipping undecodable packet: {}", e);
                continue;
            }
            Err(e) => return Err(EngineError::DecodeError(format!("decode failed: {}", e))),
        }
    }

    let channels = channels.ok_or_else(|| EngineError::DecodeError("unknown channel layout".into()))?;
    let sample_rate = sample_rate.ok_or_else(|| EngineError::DecodeError("unknown sample rate".into()))?;
    if samples.is_empty() {
        return Err(EngineError::DecodeError("no audio frames".to_string()));
    }

    let channels = u16::try_from(channels)
        .map_err(|_| EngineError::DecodeError(format!("{} channels", channels)))?;
    let buffer = AudioBuffer::new(samples, channels, sample_rate)?;

    info!(
        "Decoded {:?}: {} frames, {}ch @ {}Hz ({}ms)",
        path.file_name().unwrap_or_default(),
        buffer.frames(),
        buffer.channels(),
        buffer.sample_rate(),
        buffer.duration_ms()
    );
    Ok(buffer)
}

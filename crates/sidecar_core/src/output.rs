//! Audio Output
//!
//! The playback thread hands processed chunks to an [`OutputStream`] opened
//! from an [`OutputDevice`]. `write` is the only place the playback loop
//! blocks.
//!
//! ```text
//! playback thread ──write──► rtrb ring ──► cpal callback ──► speakers
//!                  (blocks while full)   (silence on underrun)
//! ```
//!
//! [`NullOutput`] discards audio at real-time pace, for headless hosts and
//! tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, StreamTrait};
use rtrb::{Producer, RingBuffer};
use rubato::{FftFixedIn, Resampler};
use tracing::{debug, error, info, warn};

use crate::device;
use crate::error::{EngineError, EngineResult};

/// How long the device may stop consuming before a write fails
const WRITE_STALL_TIMEOUT: Duration = Duration::from_secs(2);

/// Input frames per resampler block
const RESAMPLE_CHUNK: usize = 1024;

/// A sink that playback sessions open streams on
pub trait OutputDevice: Send + Sync {
    fn name(&self) -> String;

    /// Open a stream accepting interleaved `f32` at the buffer's own format
    fn open(&self, sample_rate: u32, channels: u16) -> EngineResult<Box<dyn OutputStream>>;
}

/// One open stream, owned by a single playback thread
pub trait OutputStream {
    /// Queue interleaved samples, blocking while the device catches up
    fn write(&mut self, samples: &[f32]) -> EngineResult<()>;

    /// Block until queued audio has been played
    fn drain(&mut self) -> EngineResult<()> {
        Ok(())
    }

    /// Frames accepted by `write` but not played yet, at the stream's input rate
    fn queued_frames(&self) -> usize {
        0
    }
}

/// Output through the host audio API (cpal)
#[derive(Debug, Clone)]
pub struct CpalOutput {
    device_name: Option<String>,
    ring_buffer_frames: usize,
}

impl CpalOutput {
    pub fn new(device_name: Option<String>, ring_buffer_frames: usize) -> Self {
        Self {
            device_name,
            ring_buffer_frames: ring_buffer_frames.max(RESAMPLE_CHUNK * 2),
        }
    }

    /// Whether the configured device is present right now
    pub fn is_available(&self) -> bool {
        device::has_output_device(self.device_name.as_deref())
    }
}

impl OutputDevice for CpalOutput {
    fn name(&self) -> String {
        self.device_name.clone().unwrap_or_else(|| "default".to_string())
    }

    fn open(&self, sample_rate: u32, channels: u16) -> EngineResult<Box<dyn OutputStream>> {
        let device = device::find_output_device(self.device_name.as_deref())?;
        let supported = choose_config(&device, sample_rate, channels)?;
        let sample_format = supported.sample_format();
        let config: cpal::StreamConfig = supported.config();

        let converter = if config.sample_rate.0 != sample_rate || config.channels != channels {
            info!(
                "Device runs at {}ch @ {}Hz, converting from {}ch @ {}Hz",
                config.channels, config.sample_rate.0, channels, sample_rate
            );
            Some(FormatConverter::new(
                sample_rate,
                channels,
                config.sample_rate.0,
                config.channels,
            )?)
        } else {
            None
        };

        let capacity = self.ring_buffer_frames * config.channels as usize;
        let (producer, consumer) = RingBuffer::<f32>::new(capacity);
        let failed = Arc::new(AtomicBool::new(false));

        let stream = match sample_format {
            cpal::SampleFormat::F32 => build_stream::<f32>(&device, &config, consumer, &failed)?,
            cpal::SampleFormat::I16 => build_stream::<i16>(&device, &config, consumer, &failed)?,
            cpal::SampleFormat::U16 => build_stream::<u16>(&device, &config, consumer, &failed)?,
            format => {
                return Err(EngineError::StreamBuildError(format!(
                    "unsupported sample format: {:?}",
                    format
                )))
            }
        };

        stream
            .play()
            .map_err(|e| EngineError::StreamPlayError(e.to_string()))?;

        debug!("Output stream open on '{}'", self.name());
        Ok(Box::new(CpalStream {
            _stream: stream,
            ring: RingWriter {
                producer,
                capacity,
                failed,
                frame_duration: Duration::from_secs_f64(1.0 / config.sample_rate.0 as f64),
                channels: config.channels as usize,
            },
            converter,
            scratch: Vec::new(),
        }))
    }
}

/// Prefer a config at the buffer's own rate and channel count, f32 first
fn choose_config(
    device: &cpal::Device,
    sample_rate: u32,
    channels: u16,
) -> EngineResult<cpal::SupportedStreamConfig> {
    if let Ok(ranges) = device.supported_output_configs() {
        let mut matching: Vec<_> = ranges
            .filter(|r| {
                r.channels() == channels
                    && r.min_sample_rate().0 <= sample_rate
                    && sample_rate <= r.max_sample_rate().0
            })
            .collect();
        matching.sort_by_key(|r| r.sample_format() != cpal::SampleFormat::F32);
        if let Some(range) = matching.into_iter().next() {
            return Ok(range.with_sample_rate(cpal::SampleRate(sample_rate)));
        }
    }

    device
        .default_output_config()
        .map_err(|e| EngineError::StreamBuildError(e.to_string()))
}

fn build_stream<T: cpal::SizedSample + cpal::FromSample<f32>>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut consumer: rtrb::Consumer<f32>,
    failed: &Arc<AtomicBool>,
) -> EngineResult<cpal::Stream> {
    let failed = Arc::clone(failed);

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                let to_read = data.len().min(consumer.slots());
                if let Ok(chunk) = consumer.read_chunk(to_read) {
                    let (first, second) = chunk.as_slices();
                    for (dst, src) in data.iter_mut().zip(first.iter().chain(second)) {
                        *dst = T::from_sample(*src);
                    }
                    chunk.commit_all();
                }
                // Underrun: pad with silence
                for dst in &mut data[to_read..] {
                    *dst = T::EQUILIBRIUM;
                }
            },
            move |err| {
                error!("Output stream error: {}", err);
                failed.store(true, Ordering::Release);
            },
            None,
        )
        .map_err(|e| EngineError::StreamBuildError(e.to_string()))
}

/// Producer half of the ring plus the device-failure flag
struct RingWriter {
    producer: Producer<f32>,
    capacity: usize,
    failed: Arc<AtomicBool>,
    frame_duration: Duration,
    channels: usize,
}

impl RingWriter {
    fn check_failed(&self) -> EngineResult<()> {
        if self.failed.load(Ordering::Acquire) {
            return Err(EngineError::DeviceWriteError("device reported an error".into()));
        }
        Ok(())
    }

    fn push_blocking(&mut self, samples: &[f32]) -> EngineResult<()> {
        let mut remaining = samples;
        let mut last_progress = Instant::now();

        while !remaining.is_empty() {
            self.check_failed()?;

            let n = self.producer.slots().min(remaining.len());
            if n == 0 {
                if last_progress.elapsed() > WRITE_STALL_TIMEOUT {
                    return Err(EngineError::DeviceWriteError("device stopped consuming".into()));
                }
                thread::sleep(Duration::from_millis(1));
                continue;
            }

            if let Ok(mut chunk) = self.producer.write_chunk(n) {
                let (first, second) = chunk.as_mut_slices();
                let split = first.len();
                first.copy_from_slice(&remaining[..split]);
                second.copy_from_slice(&remaining[split..n]);
                chunk.commit_all();
            }
            remaining = &remaining[n..];
            last_progress = Instant::now();
        }
        Ok(())
    }

    /// Wait for the callback to consume everything queued
    /// Device frames waiting in the ring
    fn queued_frames(&self) -> usize {
        (self.capacity - self.producer.slots()) / self.channels.max(1)
    }

    fn wait_empty(&self) -> EngineResult<()> {
        let queued_frames = self.queued_frames();
        let deadline = Instant::now() + self.frame_duration * queued_frames as u32 + WRITE_STALL_TIMEOUT;

        while self.producer.slots() < self.capacity {
            self.check_failed()?;
            if Instant::now() > deadline {
                warn!("Output did not drain before the deadline");
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }
        Ok(())
    }
}

struct CpalStream {
    _stream: cpal::Stream,
    ring: RingWriter,
    converter: Option<FormatConverter>,
    scratch: Vec<f32>,
}

impl OutputStream for CpalStream {
    fn write(&mut self, samples: &[f32]) -> EngineResult<()> {
        let Some(converter) = self.converter.as_mut() else {
            return self.ring.push_blocking(samples);
        };

        let mut converted = std::mem::take(&mut self.scratch);
        converter.process(samples, &mut converted)?;
        let result = self.ring.push_blocking(&converted);
        self.scratch = converted;
        result
    }

    fn drain(&mut self) -> EngineResult<()> {
        if let Some(converter) = self.converter.as_mut() {
            let mut tail = std::mem::take(&mut self.scratch);
            converter.flush(&mut tail)?;
            self.ring.push_blocking(&tail)?;
            self.scratch = tail;
        }
        self.ring.wait_empty()
    }

    fn queued_frames(&self) -> usize {
        let ring = self.ring.queued_frames();
        match &self.converter {
            Some(converter) => converter.pending_frames() + converter.to_input_frames(ring),
            None => ring,
        }
    }
}

/// Rate and channel conversion for devices that can't run at the file's format
struct FormatConverter {
    in_rate: u32,
    out_rate: u32,
    in_channels: usize,
    out_channels: usize,
    resampler: Option<FftFixedIn<f32>>,
    /// Deinterleaved input waiting for a full resampler block
    pending: Vec<Vec<f32>>,
}

impl FormatConverter {
    fn new(in_rate: u32, in_channels: u16, out_rate: u32, out_channels: u16) -> EngineResult<Self> {
        let in_channels = in_channels as usize;
        let resampler = if in_rate != out_rate {
            let resampler = FftFixedIn::<f32>::new(
                in_rate as usize,
                out_rate as usize,
                RESAMPLE_CHUNK,
                2,
                in_channels,
            )
            .map_err(|e| EngineError::ResampleError(e.to_string()))?;
            Some(resampler)
        } else {
            None
        };

        Ok(Self {
            in_rate,
            out_rate,
            in_channels,
            out_channels: out_channels as usize,
            resampler,
            pending: vec![Vec::with_capacity(RESAMPLE_CHUNK * 2); in_channels],
        })
    }

    fn process(&mut self, input: &[f32], out: &mut Vec<f32>) -> EngineResult<()> {
        out.clear();

        let Some(resampler) = self.resampler.as_mut() else {
            for frame in input.chunks_exact(self.in_channels) {
                push_mapped(out, self.in_channels, self.out_channels, |c| frame[c]);
            }
            return Ok(());
        };

        for frame in input.chunks_exact(self.in_channels) {
            for (plane, sample) in self.pending.iter_mut().zip(frame) {
                plane.push(*sample);
            }
        }

        loop {
            let needed = resampler.input_frames_next();
            if self.pending[0].len() < needed {
                break;
            }
            let block: Vec<Vec<f32>> = self
                .pending
                .iter_mut()
                .map(|plane| plane.drain(..needed).collect())
                .collect();
            let resampled = resampler
                .process(&block, None)
                .map_err(|e| EngineError::ResampleError(e.to_string()))?;
            interleave_planes(out, &resampled, self.in_channels, self.out_channels);
        }
        Ok(())
    }

    /// Input frames buffered for the next resampler block
    fn pending_frames(&self) -> usize {
        self.pending.first().map(Vec::len).unwrap_or(0)
    }

    /// Convert a count of output frames back to the input rate
    fn to_input_frames(&self, output_frames: usize) -> usize {
        (output_frames as u64 * self.in_rate as u64 / self.out_rate.max(1) as u64) as usize
    }

    /// Push whatever is still pending through the resampler
    fn flush(&mut self, out: &mut Vec<f32>) -> EngineResult<()> {
        out.clear();
        let Some(resampler) = self.resampler.as_mut() else {
            return Ok(());
        };
        if self.pending[0].is_empty() {
            return Ok(());
        }

        let resampled = resampler
            .process_partial(Some(self.pending.as_slice()), None)
            .map_err(|e| EngineError::ResampleError(e.to_string()))?;
        interleave_planes(out, &resampled, self.in_channels, self.out_channels);
        for plane in &mut self.pending {
            plane.clear();
        }
        Ok(())
    }
}

fn interleave_planes(out: &mut Vec<f32>, planes: &[Vec<f32>], in_channels: usize, out_channels: usize) {
    let frames = planes.first().map(Vec::len).unwrap_or(0);
    out.reserve(frames * out_channels);
    for i in 0..frames {
        push_mapped(out, in_channels, out_channels, |c| planes[c][i]);
    }
}

/// Map one frame: mono fans out, multichannel to mono averages,
/// otherwise channels line up and extras are silent.
fn push_mapped(out: &mut Vec<f32>, in_channels: usize, out_channels: usize, sample: impl Fn(usize) -> f32) {
    if in_channels == 1 {
        let s = sample(0);
        out.extend(std::iter::repeat(s).take(out_channels));
    } else if out_channels == 1 {
        let sum: f32 = (0..in_channels).map(&sample).sum();
        out.push(sum / in_channels as f32);
    } else {
        for c in 0..out_channels {
            out.push(if c < in_channels { sample(c) } else { 0.0 });
        }
    }
}

/// Output that discards audio
///
/// Paced mode sleeps so writes take as long as the audio would to play,
/// which keeps position reporting realistic without hardware.
#[derive(Debug, Clone, Copy)]
pub struct NullOutput {
    paced: bool,
}

impl NullOutput {
    pub fn realtime() -> Self {
        Self { paced: true }
    }

    /// Accept writes as fast as they come
    pub fn unpaced() -> Self {
        Self { paced: false }
    }
}

impl Default for NullOutput {
    fn default() -> Self {
        Self::realtime()
    }
}

impl OutputDevice for NullOutput {
    fn name(&self) -> String {
        "null".to_string()
    }

    fn open(&self, sample_rate: u32, channels: u16) -> EngineResult<Box<dyn OutputStream>> {
        if sample_rate == 0 || channels == 0 {
            return Err(EngineError::StreamBuildError(format!(
                "invalid format {}ch @ {}Hz",
                channels, sample_rate
            )));
        }
        Ok(Box::new(NullStream {
            sample_rate,
            channels: channels as usize,
            paced: self.paced,
            started: Instant::now(),
            frames_written: 0,
        }))
    }
}

struct NullStream {
    sample_rate: u32,
    channels: usize,
    paced: bool,
    started: Instant,
    frames_written: u64,
}

impl OutputStream for NullStream {
    fn write(&mut self, samples: &[f32]) -> EngineResult<()> {
        self.frames_written += (samples.len() / self.channels) as u64;
        if self.paced {
            let due = self.started
                + Duration::from_secs_f64(self.frames_written as f64 / self.sample_rate as f64);
            let now = Instant::now();
            if due > now {
                thread::sleep(due - now);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_output_paces_writes() {
        let mut stream = NullOutput::realtime().open(10_000, 1).unwrap();
        let start = Instant::now();
        // 0.2s of audio in four writes
        for _ in 0..4 {
            stream.write(&[0.0; 500]).unwrap();
        }
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(190), "{:?}", elapsed);
        assert!(elapsed < Duration::from_millis(600), "{:?}", elapsed);
    }

    #[test]
    fn test_null_output_unpaced() {
        let mut stream = NullOutput::unpaced().open(44100, 2).unwrap();
        let start = Instant::now();
        for _ in 0..100 {
            stream.write(&[0.0; 4096]).unwrap();
        }
        stream.drain().unwrap();
        assert!(start.elapsed() < Duration::from_millis(500));
    }

    #[test]
    fn test_null_output_rejects_bad_format() {
        assert!(NullOutput::unpaced().open(0, 2).is_err());
        assert!(NullOutput::unpaced().open(44100, 0).is_err());
    }

    #[test]
    fn test_channel_mapping() {
        let mut out = Vec::new();
        push_mapped(&mut out, 1, 2, |_| 0.5);
        assert_eq!(out, vec![0.5, 0.5]);

        out.clear();
        let frame = [0.2, 0.4];
        push_mapped(&mut out, 2, 1, |c| frame[c]);
        assert!((out[0] - 0.3).abs() < 1e-6);

        out.clear();
        push_mapped(&mut out, 2, 4, |c| frame[c]);
        assert_eq!(out, vec![0.2, 0.4, 0.0, 0.0]);
    }

    #[test]
    fn test_converter_channels_only() {
        let mut converter = FormatConverter::new(44100, 1, 44100, 2).unwrap();
        let mut out = Vec::new();
        converter.process(&[0.1, 0.2, 0.3], &mut out).unwrap();
        assert_eq!(out, vec![0.1, 0.1, 0.2, 0.2, 0.3, 0.3]);
    }

    #[test]
    fn test_converter_resamples_rate() {
        let mut converter = FormatConverter::new(44100, 2, 48000, 2).unwrap();
        let input = vec![0.25f32; 44100 * 2];
        let mut total = Vec::new();
        let mut out = Vec::new();

        for chunk in input.chunks(2048 * 2) {
            converter.process(chunk, &mut out).unwrap();
            total.extend_from_slice(&out);
        }
        converter.flush(&mut out).unwrap();
        total.extend_from_slice(&out);

        // One second in, roughly one second out (resampler delay aside)
        let frames = total.len() / 2;
        assert!(frames > 46000 && frames < 50000, "{} frames", frames);
    }

    #[test]
    fn test_converter_reports_input_frames() {
        let mut converter = FormatConverter::new(44100, 1, 88200, 2).unwrap();
        assert_eq!(converter.to_input_frames(8820), 4410);

        let mut out = Vec::new();
        converter.process(&[0.0; 100], &mut out).unwrap();
        // Less than one resampler block: held back, not emitted
        assert_eq!(converter.pending_frames(), 100);
        assert!(out.is_empty());
    }

    #[test]
    fn test_null_output_queues_nothing() {
        let mut stream = NullOutput::unpaced().open(44100, 2).unwrap();
        stream.write(&[0.0; 4096]).unwrap();
        assert_eq!(stream.queued_frames(), 0);
    }

    #[test]
    #[ignore = "requires audio hardware"]
    fn test_cpal_output_plays_silence() {
        let output = CpalOutput::new(None, 8192);
        let mut stream = output.open(44100, 2).unwrap();
        stream.write(&vec![0.0; 4410 * 2]).unwrap();
        stream.drain().unwrap();
    }
}

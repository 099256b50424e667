//! Shared fixtures for unit tests

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use sidecar_platform::{ExitCallback, PlatformError, PlatformResult, SystemPlayer};

use crate::error::{EngineError, EngineResult};
use crate::output::{OutputDevice, OutputStream};

/// Write a 16-bit PCM sine wave
pub fn write_sine_wav(path: &Path, seconds: f32, sample_rate: u32, channels: u16, freq: f32) {
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    let frames = (seconds * sample_rate as f32).round() as u32;
    for i in 0..frames {
        let t = i as f32 / sample_rate as f32;
        let sample = (2.0 * std::f32::consts::PI * freq * t).sin() * 0.5;
        let value = (sample * i16::MAX as f32) as i16;
        for _ in 0..channels {
            writer.write_sample(value).unwrap();
        }
    }
    writer.finalize().unwrap();
}

/// Output whose writes start failing after `fail_after` chunks
pub struct FailingOutput {
    pub fail_after: usize,
}

impl OutputDevice for FailingOutput {
    fn name(&self) -> String {
        "failing".to_string()
    }

    fn open(&self, _sample_rate: u32, _channels: u16) -> EngineResult<Box<dyn OutputStream>> {
        Ok(Box::new(FailingStream {
            remaining: self.fail_after,
        }))
    }
}

struct FailingStream {
    remaining: usize,
}

impl OutputStream for FailingStream {
    fn write(&mut self, _samples: &[f32]) -> EngineResult<()> {
        if self.remaining == 0 {
            return Err(EngineError::DeviceWriteError("device unplugged".into()));
        }
        self.remaining -= 1;
        thread::sleep(Duration::from_millis(5));
        Ok(())
    }
}

/// Device stand-in with a fixed-size buffer drained at real-time pace
///
/// Writes return as soon as there is room, like a ring in front of a
/// sound card, so the writer runs `buffer_frames` ahead of what is heard.
pub struct BufferedOutput {
    pub buffer_frames: u64,
}

impl OutputDevice for BufferedOutput {
    fn name(&self) -> String {
        "buffered".to_string()
    }

    fn open(&self, sample_rate: u32, channels: u16) -> EngineResult<Box<dyn OutputStream>> {
        Ok(Box::new(BufferedStream {
            sample_rate,
            channels: channels as usize,
            buffer_frames: self.buffer_frames,
            started: None,
            written: 0,
        }))
    }
}

struct BufferedStream {
    sample_rate: u32,
    channels: usize,
    buffer_frames: u64,
    started: Option<Instant>,
    written: u64,
}

impl BufferedStream {
    fn played(&self) -> u64 {
        let elapsed = self.started.map(|s| s.elapsed().as_secs_f64()).unwrap_or(0.0);
        ((elapsed * self.sample_rate as f64) as u64).min(self.written)
    }
}

impl OutputStream for BufferedStream {
    fn write(&mut self, samples: &[f32]) -> EngineResult<()> {
        self.started.get_or_insert_with(Instant::now);
        self.written += (samples.len() / self.channels) as u64;
        while self.written - self.played() > self.buffer_frames {
            thread::sleep(Duration::from_millis(1));
        }
        Ok(())
    }

    fn queued_frames(&self) -> usize {
        (self.written - self.played()) as usize
    }
}

/// One canned HTTP response
#[derive(Clone)]
pub struct Route {
    path: String,
    body: Vec<u8>,
    declared_len: usize,
}

impl Route {
    pub fn ok(path: &str, body: Vec<u8>) -> Self {
        let declared_len = body.len();
        Self {
            path: path.to_string(),
            body,
            declared_len,
        }
    }

    /// Advertise `declared_len` bytes but hang up after `body`
    pub fn truncated(path: &str, body: Vec<u8>, declared_len: usize) -> Self {
        Self {
            path: path.to_string(),
            body,
            declared_len,
        }
    }
}

/// Minimal HTTP/1.1 server on 127.0.0.1 that counts requests
pub struct HttpFixture {
    addr: SocketAddr,
    hits: Arc<AtomicUsize>,
    delay: Arc<Mutex<Duration>>,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl HttpFixture {
    pub fn serve(routes: Vec<Route>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.set_nonblocking(true).unwrap();
        let addr = listener.local_addr().unwrap();

        let hits = Arc::new(AtomicUsize::new(0));
        let delay = Arc::new(Mutex::new(Duration::ZERO));
        let stop = Arc::new(AtomicBool::new(false));

        let handle = {
            let hits = Arc::clone(&hits);
            let delay = Arc::clone(&delay);
            let stop = Arc::clone(&stop);
            thread::spawn(move || {
                while !stop.load(Ordering::Acquire) {
                    match listener.accept() {
                        Ok((stream, _)) => {
                            let delay = *delay.lock();
                            Self::handle(stream, &routes, &hits, delay);
                        }
                        Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                            thread::sleep(Duration::from_millis(2));
                        }
                        Err(_) => break,
                    }
                }
            })
        };

        Self {
            addr,
            hits,
            delay,
            stop,
            handle: Some(handle),
        }
    }

    /// Hold every response for `delay`
    pub fn with_delay(self, delay: Duration) -> Self {
        *self.delay.lock() = delay;
        self
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Requests served so far
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    fn handle(mut stream: TcpStream, routes: &[Route], hits: &AtomicUsize, delay: Duration) {
        let _ = stream.set_nonblocking(false);
        let _ = stream.set_read_timeout(Some(Duration::from_secs(2)));

        let mut request = Vec::new();
        let mut buf = [0u8; 1024];
        while !request.windows(4).any(|w| w == b"\r\n\r\n") {
            match stream.read(&mut buf) {
                Ok(0) | Err(_) => return,
                Ok(n) => request.extend_from_slice(&buf[..n]),
            }
        }
        hits.fetch_add(1, Ordering::SeqCst);

        let request = String::from_utf8_lossy(&request);
        let target = request.split_whitespace().nth(1).unwrap_or("/");
        let path = target.split('?').next().unwrap_or(target);

        if !delay.is_zero() {
            thread::sleep(delay);
        }

        let response = match routes.iter().find(|r| r.path == path) {
            Some(route) => {
                let mut bytes = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: application/octet-stream\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    route.declared_len
                )
                .into_bytes();
                bytes.extend_from_slice(&route.body);
                bytes
            }
            None => b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n".to_vec(),
        };
        let _ = stream.write_all(&response);
        let _ = stream.flush();
    }
}

impl Drop for HttpFixture {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// What a [`MockSystemPlayer`] was asked to do
#[derive(Debug, Default)]
pub struct MockLog {
    pub played: Vec<String>,
    pub stops: usize,
    pub playing: bool,
}

/// Scriptable System backend
pub struct MockSystemPlayer {
    pub available: bool,
    pub log: Arc<Mutex<MockLog>>,
}

impl MockSystemPlayer {
    pub fn new(available: bool) -> (Self, Arc<Mutex<MockLog>>) {
        let log = Arc::new(Mutex::new(MockLog::default()));
        (
            Self {
                available,
                log: Arc::clone(&log),
            },
            log,
        )
    }
}

impl SystemPlayer for MockSystemPlayer {
    fn name(&self) -> &str {
        "mock"
    }

    fn is_available(&self) -> bool {
        self.available
    }

    fn play(&mut self, locator: &str, _volume: f32, _on_exit: Option<ExitCallback>) -> PlatformResult<()> {
        if !self.available {
            return Err(PlatformError::UnsupportedPlatform);
        }
        let mut log = self.log.lock();
        log.played.push(locator.to_string());
        log.playing = true;
        Ok(())
    }

    fn stop(&mut self) {
        let mut log = self.log.lock();
        log.stops += 1;
        log.playing = false;
    }

    fn is_playing(&self) -> bool {
        self.log.lock().playing
    }

    fn is_paused(&self) -> bool {
        false
    }
}

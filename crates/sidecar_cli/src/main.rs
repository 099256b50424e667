//! Sidecar command-line host
//!
//! Wires config, logging and the router together:
//!
//! ```text
//! sidecar play ~/Music/track.flac --eq 6,3,0,0,0,-2,0 --volume 80
//! sidecar play "https://plex.local/library/parts/1/file.mp3?X-Plex-Token=..."
//! sidecar devices
//! sidecar cache list
//! ```

use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use sidecar_core::{
    band_label, Backend, Event, NullOutput, OutputDeviceInfo, Router, RouterBuilder, SidecarConfig,
    StreamCache, NUM_BANDS,
};

#[derive(Parser, Debug)]
#[command(name = "sidecar", version, about = "Real-time playback with a live 7-band EQ")]
struct Cli {
    /// Config file (defaults to the platform config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Play a local file or http(s) URL until it finishes
    Play {
        locator: String,

        /// Seven comma-separated gains in dB (60 Hz .. 15 kHz)
        #[arg(long, value_parser = parse_gains)]
        eq: Option<[f32; NUM_BANDS]>,

        /// 0.0 - 1.0 or 0 - 100
        #[arg(long)]
        volume: Option<f32>,

        /// Start position in milliseconds
        #[arg(long)]
        seek: Option<i64>,

        /// Discard audio at real-time pace instead of opening a device
        #[arg(long)]
        null_output: bool,
    },

    /// List output devices
    Devices,

    /// Inspect or prune the stream cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },

    /// Print the effective configuration as JSON
    Config,
}

#[derive(Subcommand, Debug)]
enum CacheAction {
    /// List cached entries, oldest first
    List,
    /// Enforce the configured size budget
    Evict,
    /// Remove every cached entry
    Clear,
}

fn parse_gains(input: &str) -> Result<[f32; NUM_BANDS], String> {
    let values: Vec<f32> = input
        .split(',')
        .map(|v| v.trim().parse::<f32>().map_err(|e| format!("'{}': {}", v.trim(), e)))
        .collect::<Result<_, _>>()?;

    if values.len() > NUM_BANDS {
        return Err(format!("expected at most {} gains, got {}", NUM_BANDS, values.len()));
    }
    let mut gains = [0.0; NUM_BANDS];
    gains[..values.len()].copy_from_slice(&values);
    Ok(gains)
}

fn load_config(path: Option<&PathBuf>) -> Result<SidecarConfig> {
    match path {
        Some(path) => SidecarConfig::load_from(path)
            .with_context(|| format!("loading config from {}", path.display())),
        None => Ok(SidecarConfig::load()),
    }
}

fn build_router(config: &SidecarConfig, null_output: bool) -> Router {
    if !null_output {
        return Router::new(config);
    }

    let mut builder = RouterBuilder::new()
        .engine_config(config.engine.clone())
        .output(std::sync::Arc::new(NullOutput::realtime()));
    match StreamCache::new(&config.cache) {
        Ok(cache) => builder = builder.cache(cache),
        Err(e) => warn!("Stream cache unavailable: {}", e),
    }
    builder.build()
}

fn play(
    config: &SidecarConfig,
    locator: &str,
    eq: Option<[f32; NUM_BANDS]>,
    volume: Option<f32>,
    seek: Option<i64>,
    null_output: bool,
) -> Result<()> {
    let mut router = build_router(config, null_output);
    let caps = router.capabilities();
    info!(
        "Capabilities: engine={} subprocess={} system={}",
        caps.engine, caps.subprocess, caps.system
    );

    if let Some(gains) = eq {
        router.set_eq_gains(gains);
        for (index, gain) in gains.iter().enumerate() {
            if gain.abs() > 0.0 {
                info!("{}: {:+.1} dB", band_label(index).unwrap_or("?"), gain);
            }
        }
    }
    if let Some(volume) = volume {
        router.set_volume(volume);
    }

    let backend = router.play(locator);
    if backend == Backend::Idle {
        bail!("no backend could play {}", locator);
    }
    println!("Playing {} via {} backend", locator, backend);

    if let Some(position) = seek {
        router.seek(position);
    }

    let mut last_report = Instant::now();
    loop {
        match router.wait_event(Duration::from_millis(250)) {
            Some(Event::Finished) => {
                println!("Finished");
                return Ok(());
            }
            Some(Event::Error { message }) => eprintln!("error: {}", message),
            Some(Event::Duration { ms }) => println!("Duration {}", format_ms(ms)),
            Some(Event::Position { ms }) if last_report.elapsed() >= Duration::from_secs(1) => {
                println!("  {}", format_ms(ms));
                last_report = Instant::now();
            }
            Some(_) => {}
            None => {
                let state = router.state();
                if state.backend == Backend::Idle || (!state.is_playing && backend == Backend::Engine) {
                    return Ok(());
                }
            }
        }
    }
}

fn format_ms(ms: u64) -> String {
    let secs = ms / 1000;
    format!("{}:{:02}.{:01}", secs / 60, secs % 60, (ms % 1000) / 100)
}

fn cache_command(config: &SidecarConfig, action: CacheAction) -> Result<()> {
    let cache = StreamCache::new(&config.cache).context("opening stream cache")?;
    match action {
        CacheAction::List => {
            let mut entries = cache.entries();
            entries.sort_by(|a, b| a.modified.cmp(&b.modified));
            for entry in &entries {
                println!(
                    "{}  {:>10}  {}",
                    entry.modified.format("%Y-%m-%d %H:%M:%S"),
                    entry.size,
                    entry.path.display()
                );
            }
            println!(
                "{} entries, {} of {} bytes",
                entries.len(),
                cache.total_size(),
                cache.max_size_bytes()
            );
        }
        CacheAction::Evict => {
            let report = cache.evict();
            println!(
                "Removed {} entries ({} bytes), {} bytes remain",
                report.removed.len(),
                report.freed_bytes,
                report.remaining_bytes
            );
        }
        CacheAction::Clear => println!("Removed {} entries", cache.clear()),
    }
    Ok(())
}

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("sidecar=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref())?;

    match cli.command {
        Command::Play {
            locator,
            eq,
            volume,
            seek,
            null_output,
        } => play(&config, &locator, eq, volume, seek, null_output),
        Command::Devices => {
            for device in OutputDeviceInfo::enumerate().context("enumerating output devices")? {
                println!(
                    "{}{}  ({} ch, {:?} Hz)",
                    if device.is_default { "* " } else { "  " },
                    device.name,
                    device.max_channels,
                    device.sample_rates
                );
            }
            Ok(())
        }
        Command::Cache { action } => cache_command(&config, action),
        Command::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            if let Some(path) = SidecarConfig::default_path() {
                println!("# default location: {}", path.display());
            }
            Ok(())
        }
    }
}

//! Stream Cache
//!
//! Turns remote URLs into local files the engine can decode and seek.
//!
//! Files are named by the first 16 hex chars of SHA-256(url) plus the URL's
//! extension, so lookups need no index: the directory is the store.
//! Downloads land in a `.tmp` file and are renamed into place only when
//! complete. Entries age by last use (a cache hit refreshes the mtime) and
//! are evicted oldest-first once the byte budget is exceeded.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::config::CacheConfig;
use crate::error::{EngineError, EngineResult};

const TEMP_PREFIX: &str = ".download-";
const TEMP_SUFFIX: &str = ".tmp";
const FALLBACK_EXT: &str = ".cache";
/// Longest kept extension, dot included
const MAX_EXT_LEN: usize = 5;

/// One completed download on disk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub url_hash: String,
    pub path: PathBuf,
    pub size: u64,
    pub modified: DateTime<Utc>,
}

/// What an eviction pass did
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvictionReport {
    pub removed: Vec<PathBuf>,
    pub freed_bytes: u64,
    pub remaining_bytes: u64,
}

/// Disk-backed URL cache
pub struct StreamCache {
    dir: PathBuf,
    max_size_bytes: u64,
    client: reqwest::blocking::Client,
    /// Per-URL locks so one process downloads a URL once
    in_flight: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    transfers: AtomicU64,
}

impl StreamCache {
    pub fn new(config: &CacheConfig) -> EngineResult<Self> {
        config.validate().map_err(EngineError::ConfigError)?;
        fs::create_dir_all(&config.dir)?;

        let client = reqwest::blocking::Client::builder()
            .timeout(config.timeout())
            .user_agent(concat!("sidecar/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| EngineError::DownloadError(e.to_string()))?;

        info!(
            "Stream cache at {:?} (budget {} MiB)",
            config.dir,
            config.max_size_bytes / (1024 * 1024)
        );

        Ok(Self {
            dir: config.dir.clone(),
            max_size_bytes: config.max_size_bytes,
            client,
            in_flight: Mutex::new(HashMap::new()),
            transfers: AtomicU64::new(0),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn max_size_bytes(&self) -> u64 {
        self.max_size_bytes
    }

    /// Network transfers started by this instance
    pub fn transfer_count(&self) -> u64 {
        self.transfers.load(Ordering::Relaxed)
    }

    /// Where `url` lives (or would live) in the cache
    pub fn cache_path(&self, url: &str) -> PathBuf {
        self.dir.join(cache_file_name(url))
    }

    /// Cached copy of `url`, if any. Touches neither network nor disk state.
    pub fn get_cached_path(&self, url: &str) -> Option<PathBuf> {
        let path = self.cache_path(url);
        path.is_file().then_some(path)
    }

    /// Local copy of `url`, downloading it on a miss. None on any failure.
    pub fn download_and_cache(&self, url: &str) -> Option<PathBuf> {
        self.download_with_progress(url, |_, _| {})
    }

    /// Like [`Self::download_and_cache`], reporting `(bytes_done, total)`
    pub fn download_with_progress<F>(&self, url: &str, mut progress: F) -> Option<PathBuf>
    where
        F: FnMut(u64, Option<u64>),
    {
        if let Some(hit) = self.cache_hit(url) {
            return Some(hit);
        }

        let lock = self.in_flight_lock(url);
        let result = {
            let _guard = lock.lock();
            // Another caller may have finished while we waited
            match self.cache_hit(url) {
                Some(hit) => Ok(hit),
                None => self.fetch(url, &mut progress),
            }
        };
        self.release_in_flight(url, &lock);

        match result {
            Ok(path) => {
                self.evict_around(self.max_size_bytes, Some(&path));
                path.is_file().then_some(path)
            }
            Err(e) => {
                warn!("Download of {} failed: {}", url, e);
                None
            }
        }
    }

    /// All completed entries; in-progress downloads are skipped
    pub fn entries(&self) -> Vec<CacheEntry> {
        let Ok(dir) = fs::read_dir(&self.dir) else {
            return Vec::new();
        };

        dir.filter_map(Result::ok)
            .filter_map(|entry| {
                let name = entry.file_name().to_string_lossy().into_owned();
                if is_temp_name(&name) {
                    return None;
                }
                let meta = entry.metadata().ok()?;
                if !meta.is_file() {
                    return None;
                }
                let modified = meta.modified().ok()?;
                Some(CacheEntry {
                    url_hash: name.split('.').next().unwrap_or_default().to_string(),
                    path: entry.path(),
                    size: meta.len(),
                    modified: DateTime::<Utc>::from(modified),
                })
            })
            .collect()
    }

    /// Bytes used by completed entries
    pub fn total_size(&self) -> u64 {
        self.entries().iter().map(|e| e.size).sum()
    }

    /// Enforce the configured budget
    pub fn evict(&self) -> EvictionReport {
        self.evict_to(self.max_size_bytes)
    }

    /// Delete oldest entries until the total is at most `budget`
    pub fn evict_to(&self, budget: u64) -> EvictionReport {
        self.evict_around(budget, None)
    }

    /// Evict as [`Self::evict_to`], never removing `keep`
    fn evict_around(&self, budget: u64, keep: Option<&Path>) -> EvictionReport {
        let mut entries = self.entries();
        let mut total: u64 = entries.iter().map(|e| e.size).sum();
        let mut report = EvictionReport::default();

        if total > budget {
            info!("Cache size {} bytes exceeds {} bytes, evicting", total, budget);
            entries.sort_by(|a, b| a.modified.cmp(&b.modified).then_with(|| a.path.cmp(&b.path)));

            for entry in entries {
                if total <= budget {
                    break;
                }
                if keep == Some(entry.path.as_path()) {
                    continue;
                }
                match fs::remove_file(&entry.path) {
                    Ok(()) => {
                        debug!("Evicted {:?} ({} bytes)", entry.path, entry.size);
                        total -= entry.size;
                        report.freed_bytes += entry.size;
                        report.removed.push(entry.path);
                    }
                    Err(e) => warn!("Failed to evict {:?}: {}", entry.path, e),
                }
            }
        }

        if total > budget {
            warn!("Cache still holds {} bytes, over its {} byte budget", total, budget);
        }
        report.remaining_bytes = total;
        report
    }

    /// Remove every completed entry, returning how many went
    pub fn clear(&self) -> usize {
        let mut count = 0;
        for entry in self.entries() {
            match fs::remove_file(&entry.path) {
                Ok(()) => count += 1,
                Err(e) => warn!("Failed to remove {:?}: {}", entry.path, e),
            }
        }
        info!("Cleared {} cached files", count);
        count
    }

    fn cache_hit(&self, url: &str) -> Option<PathBuf> {
        let path = self.get_cached_path(url)?;
        touch(&path);
        debug!("Cache hit: {:?}", path.file_name().unwrap_or_default());
        Some(path)
    }

    fn fetch(&self, url: &str, progress: &mut dyn FnMut(u64, Option<u64>)) -> EngineResult<PathBuf> {
        self.transfers.fetch_add(1, Ordering::Relaxed);
        info!("Downloading {}", url);

        let mut response = self
            .client
            .get(url)
            .send()
            .and_then(|r| r.error_for_status())
            .map_err(|e| EngineError::DownloadError(e.to_string()))?;
        let total = response.content_length();

        // Removed on drop unless persisted
        let mut temp = tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .suffix(TEMP_SUFFIX)
            .tempfile_in(&self.dir)?;

        let mut buf = vec![0u8; 64 * 1024];
        let mut done: u64 = 0;
        loop {
            let n = response
                .read(&mut buf)
                .map_err(|e| EngineError::DownloadError(e.to_string()))?;
            if n == 0 {
                break;
            }
            temp.write_all(&buf[..n])?;
            done += n as u64;
            progress(done, total);
        }

        if let Some(expected) = total {
            if done != expected {
                return Err(EngineError::DownloadError(format!(
                    "truncated body: {} of {} bytes",
                    done, expected
                )));
            }
        }
        temp.as_file().sync_all()?;

        let path = self.cache_path(url);
        temp.persist(&path).map_err(|e| EngineError::Io(e.error))?;

        info!("Cached {} bytes as {:?}", done, path.file_name().unwrap_or_default());
        Ok(path)
    }

    fn in_flight_lock(&self, url: &str) -> Arc<Mutex<()>> {
        Arc::clone(
            self.in_flight
                .lock()
                .entry(url.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        )
    }

    fn release_in_flight(&self, url: &str, lock: &Arc<Mutex<()>>) {
        let mut map = self.in_flight.lock();
        // Only the map and this caller still hold it
        if Arc::strong_count(lock) <= 2 {
            map.remove(url);
        }
    }
}

/// First 16 hex chars of SHA-256(url)
pub fn url_hash(url: &str) -> String {
    let digest = Sha256::digest(url.as_bytes());
    let mut hash = hex::encode(digest);
    hash.truncate(16);
    hash
}

/// Cache file name for `url`: hash plus the URL path's extension
pub fn cache_file_name(url: &str) -> String {
    format!("{}{}", url_hash(url), url_extension(url).unwrap_or(FALLBACK_EXT))
}

fn url_extension(url: &str) -> Option<&str> {
    let without_query = url.split(['?', '#']).next().unwrap_or(url);
    let path = without_query
        .split_once("://")
        .map(|(_, rest)| rest.find('/').map(|i| &rest[i..]).unwrap_or(""))
        .unwrap_or(without_query);

    let name = path.rsplit('/').next()?;
    let dot = name.rfind('.').filter(|&i| i > 0)?;
    let ext = &name[dot..];

    let valid = ext.len() > 1
        && ext.len() <= MAX_EXT_LEN
        && ext[1..].chars().all(|c| c.is_ascii_alphanumeric());
    valid.then_some(ext)
}

fn is_temp_name(name: &str) -> bool {
    name.starts_with(TEMP_PREFIX) || name.ends_with(TEMP_SUFFIX)
}

/// Mark an entry as just used
fn touch(path: &Path) {
    let result = File::options()
        .write(true)
        .open(path)
        .and_then(|f| f.set_modified(SystemTime::now()));
    if let Err(e) = result {
        debug!("Could not refresh mtime of {:?}: {}", path, e);
    }
}

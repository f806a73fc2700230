//! Disk-based rendition cache for persistence across sessions.
//!
//! Files are named by the SHA-256 of the cache key and hold the last
//! written downsampled rendition. Writes go through a temporary file and a
//! rename, so readers see either a complete file or no file.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::SystemTime;

use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, trace, warn};

use crate::domain::entities::CacheKey;
use crate::domain::errors::{CacheError, CacheResult};

/// Maximum disk cache size in bytes (200 MB default).
pub const DEFAULT_MAX_CACHE_SIZE: u64 = 200 * 1024 * 1024;

const ENTRY_EXTENSION: &str = "img";
const TEMP_EXTENSION: &str = "tmp";

/// Eviction frees down to `max_size - max_size / EVICTION_HEADROOM_DIVISOR`.
const EVICTION_HEADROOM_DIVISOR: u64 = 10;

/// Outcome of an eviction sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvictionReport {
    /// Files deleted.
    pub removed: usize,
    /// Bytes freed.
    pub freed_bytes: u64,
}

/// Disk-based cache of encoded, downsampled renditions.
pub struct DiskRenditionCache {
    cache_dir: PathBuf,
    max_size: u64,
    current_size: AtomicU64,
    item_count: AtomicUsize,
}

impl std::fmt::Debug for DiskRenditionCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskRenditionCache")
            .field("cache_dir", &self.cache_dir)
            .field("max_size", &self.max_size)
            .field("current_size", &self.current_size.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

fn has_extension(path: &Path, ext: &str) -> bool {
    path.extension().is_some_and(|e| e == ext)
}

/// Later of access and modification time; reads refresh both.
fn last_access(meta: &std::fs::Metadata) -> SystemTime {
    let accessed = meta.accessed().unwrap_or(SystemTime::UNIX_EPOCH);
    let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
    accessed.max(modified)
}

impl DiskRenditionCache {
    /// Creates a new disk cache in the specified directory.
    ///
    /// Leftover temporary files from interrupted writes are removed.
    ///
    /// # Errors
    /// Returns error if cache directory cannot be created or read.
    pub async fn new(cache_dir: PathBuf, max_size: u64) -> CacheResult<Self> {
        fs::create_dir_all(&cache_dir)
            .await
            .map_err(|e| CacheError::IoError(format!("Failed to create cache dir: {e}")))?;
        let mut total_size = 0u64;
        let mut count = 0usize;

        let mut entries = fs::read_dir(&cache_dir)
            .await
            .map_err(|e| CacheError::IoError(format!("Failed to read cache dir: {e}")))?;

        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if has_extension(&path, TEMP_EXTENSION) {
                if let Err(e) = fs::remove_file(&path).await {
                    warn!(path = %path.display(), error = %e, "Failed to remove stale temp file");
                }
            } else if has_extension(&path, ENTRY_EXTENSION)
                && let Ok(meta) = entry.metadata().await
            {
                total_size += meta.len();
                count += 1;
            }
        }

        let cache = Self {
            cache_dir,
            max_size,
            current_size: AtomicU64::new(total_size),
            item_count: AtomicUsize::new(count),
        };

        cache.evict_if_over_budget().await;

        Ok(cache)
    }

    /// Creates a cache in the default location (e.g. `~/.cache/clipthumb/renditions/`).
    ///
    /// # Errors
    /// Returns error if cache directory cannot be created.
    pub async fn default_location(max_size: u64) -> CacheResult<Self> {
        Self::new(default_cache_dir(), max_size).await
    }

    /// Directory holding the cache files.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Configured budget in bytes.
    #[must_use]
    pub const fn max_size(&self) -> u64 {
        self.max_size
    }

    /// Returns the path for a cached rendition.
    fn cache_path(&self, key: &CacheKey) -> PathBuf {
        self.cache_dir
            .join(format!("{}.{ENTRY_EXTENSION}", key.disk_file_stem()))
    }

    fn temp_path(&self, key: &CacheKey) -> PathBuf {
        self.cache_dir.join(format!(
            "{}.{}.{TEMP_EXTENSION}",
            key.disk_file_stem(),
            uuid::Uuid::new_v4().simple()
        ))
    }

    /// Reads the encoded rendition stored for `key`.
    ///
    /// Any I/O failure, including the file vanishing under a concurrent
    /// eviction, is a miss.
    pub async fn read(&self, key: &CacheKey) -> Option<Vec<u8>> {
        let path = self.cache_path(key);
        match fs::read(&path).await {
            Ok(bytes) => {
                trace!(key = %key, path = %path.display(), "Disk cache hit");
                touch(path).await;
                Some(bytes)
            }
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(key = %key, error = %e, "Failed to read disk cache entry");
                }
                trace!(key = %key, "Disk cache miss");
                None
            }
        }
    }

    /// Stores an encoded rendition, replacing any previous one for `key`.
    ///
    /// # Errors
    /// Returns error if the temporary file cannot be written or renamed.
    pub async fn write(&self, key: &CacheKey, bytes: &[u8]) -> CacheResult<()> {
        let path = self.cache_path(key);
        let temp = self.temp_path(key);

        if let Err(e) = write_file(&temp, bytes).await {
            let _ = fs::remove_file(&temp).await;
            return Err(e);
        }

        let old_size = fs::metadata(&path).await.map(|m| m.len()).ok();

        if let Err(e) = fs::rename(&temp, &path).await {
            let _ = fs::remove_file(&temp).await;
            return Err(CacheError::IoError(format!("Failed to move cache file into place: {e}")));
        }

        let new_size = bytes.len() as u64;
        if let Some(old) = old_size {
            if new_size > old {
                self.current_size
                    .fetch_add(new_size - old, Ordering::Relaxed);
            } else {
                self.saturating_sub_size(old - new_size);
            }
        } else {
            self.current_size.fetch_add(new_size, Ordering::Relaxed);
            self.item_count.fetch_add(1, Ordering::Relaxed);
        }

        debug!(key = %key, path = %path.display(), size = bytes.len(), "Stored rendition in disk cache");

        self.evict_if_over_budget().await;

        Ok(())
    }

    /// Removes the rendition stored for `key`.
    pub async fn remove(&self, key: &CacheKey) {
        let path = self.cache_path(key);
        let size = fs::metadata(&path).await.map(|m| m.len()).ok();
        if let Err(e) = fs::remove_file(&path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(key = %key, error = %e, "Failed to remove from disk cache");
            }
        } else if let Some(s) = size {
            self.saturating_sub_size(s);
            self.saturating_sub_count(1);
            debug!(key = %key, "Removed from disk cache");
        }
    }

    /// Clears the entire disk cache.
    ///
    /// # Errors
    /// Returns error if cache directory cannot be read.
    pub async fn clear(&self) -> CacheResult<()> {
        let mut entries = fs::read_dir(&self.cache_dir)
            .await
            .map_err(|e| CacheError::IoError(format!("Failed to read cache dir: {e}")))?;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| CacheError::IoError(format!("Failed to read entry: {e}")))?
        {
            let path = entry.path();
            if has_extension(&path, ENTRY_EXTENSION)
                && let Err(e) = fs::remove_file(&path).await
                && e.kind() != std::io::ErrorKind::NotFound
            {
                warn!(path = %path.display(), error = %e, "Failed to remove cache file");
            }
        }
        self.current_size.store(0, Ordering::Relaxed);
        self.item_count.store(0, Ordering::Relaxed);
        debug!("Cleared disk cache");
        Ok(())
    }

    /// Returns the tracked cache size in bytes.
    #[must_use]
    pub fn current_size(&self) -> u64 {
        self.current_size.load(Ordering::Relaxed)
    }

    /// Returns the number of cached files.
    #[must_use]
    pub fn len(&self) -> usize {
        self.item_count.load(Ordering::Relaxed)
    }

    /// Returns true if the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Checks if a rendition is cached.
    pub async fn contains(&self, key: &CacheKey) -> bool {
        let path = self.cache_path(key);
        fs::try_exists(&path).await.unwrap_or(false)
    }

    /// Deletes least recently accessed files while over budget.
    ///
    /// Safe to run alongside reads and writes: files that disappear during
    /// the sweep are skipped, and the tracked size is resynchronised with
    /// what the directory scan found.
    pub async fn evict_if_over_budget(&self) -> EvictionReport {
        let current_size = self.current_size();
        if current_size <= self.max_size {
            return EvictionReport::default();
        }

        debug!(
            current_size = current_size,
            max_size = self.max_size,
            "Disk cache over limit, cleaning up"
        );

        let Ok(mut entries) = fs::read_dir(&self.cache_dir).await else {
            return EvictionReport::default();
        };

        let mut files: Vec<(PathBuf, SystemTime, u64)> = Vec::new();
        let mut scanned_size = 0u64;

        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if !has_extension(&path, ENTRY_EXTENSION) {
                continue;
            }

            if let Ok(meta) = entry.metadata().await {
                scanned_size += meta.len();
                files.push((path, last_access(&meta), meta.len()));
            }
        }

        files.sort_by_key(|(_, time, _)| *time);

        let low_water = self.max_size - self.max_size / EVICTION_HEADROOM_DIVISOR;
        let scanned_count = files.len();
        let mut report = EvictionReport::default();

        for (path, _, size) in files {
            if scanned_size - report.freed_bytes <= low_water {
                break;
            }

            match fs::remove_file(&path).await {
                Ok(()) => {
                    trace!(path = %path.display(), "Removed old cache file");
                    report.freed_bytes += size;
                    report.removed += 1;
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    report.freed_bytes += size;
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Failed to remove old cache file");
                }
            }
        }

        self.current_size
            .store(scanned_size - report.freed_bytes, Ordering::Relaxed);
        self.item_count
            .store(scanned_count.saturating_sub(report.removed), Ordering::Relaxed);

        debug!(
            freed_size = report.freed_bytes,
            freed_count = report.removed,
            "Disk cache cleanup complete"
        );
        report
    }

    fn saturating_sub_size(&self, amount: u64) {
        let _ = self
            .current_size
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| {
                Some(v.saturating_sub(amount))
            });
    }

    fn saturating_sub_count(&self, amount: usize) {
        let _ = self
            .item_count
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| {
                Some(v.saturating_sub(amount))
            });
    }
}

async fn write_file(path: &Path, bytes: &[u8]) -> CacheResult<()> {
    let mut file = fs::File::create(path)
        .await
        .map_err(|e| CacheError::IoError(format!("Failed to create cache file: {e}")))?;

    file.write_all(bytes)
        .await
        .map_err(|e| CacheError::IoError(format!("Failed to write cache file: {e}")))?;

    file.flush()
        .await
        .map_err(|e| CacheError::IoError(format!("Failed to flush cache file: {e}")))?;

    file.sync_all()
        .await
        .map_err(|e| CacheError::IoError(format!("Failed to sync cache file: {e}")))
}

/// Marks a file as just used. Explicit timestamps work on `noatime` mounts.
async fn touch(path: PathBuf) {
    let result = tokio::task::spawn_blocking(move || {
        let now = SystemTime::now();
        std::fs::File::options()
            .write(true)
            .open(&path)?
            .set_times(std::fs::FileTimes::new().set_accessed(now).set_modified(now))
    })
    .await;

    if let Ok(Err(e)) = result {
        trace!(error = %e, "Failed to refresh disk cache access time");
    }
}

/// Returns the default cache directory path.
#[must_use]
pub fn default_cache_dir() -> PathBuf {
    directories::ProjectDirs::from("dev", "clipthumb", "clipthumb").map_or_else(
        || {
            std::env::temp_dir()
                .join("clipthumb")
                .join("cache")
                .join("renditions")
        },
        |dirs| dirs.cache_dir().join("renditions"),
    )
}

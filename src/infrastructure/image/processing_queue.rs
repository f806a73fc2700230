//! Rendition loading orchestrator.
//!
//! Memory -> in-flight pool -> disk -> byte provider + downsample, with the
//! result written back to both caches and fanned out to every coalesced
//! caller.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, trace, warn};

use crate::domain::entities::{
    ImageRequest, RenditionRecord, RenditionSource, RequestKey, SourceRef,
};
use crate::domain::errors::{CacheError, CacheResult};
use crate::domain::ports::{ByteProviderPort, RenditionCachePort};
use crate::domain::services::{DEFAULT_INVALIDATION_MARGIN_POINTS, InvalidationPolicy};

use super::disk_cache::{DEFAULT_MAX_CACHE_SIZE, DiskRenditionCache};
use super::downsampler::Downsampler;
use super::memory_cache::{CacheStats, DEFAULT_MEMORY_BUDGET, MemoryRenditionCache};
use super::request_pool::{Completion, DecodeTicket, ObserverToken, RequestPool};

/// Delivered to the caller once per `load`.
#[derive(Debug, Clone)]
pub struct ImageLoadedEvent {
    /// The request as issued by this caller.
    pub request: ImageRequest,
    /// The rendition, or `None` if none could be produced.
    pub rendition: Option<RenditionRecord>,
}

/// Configuration for the processing queue.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Memory cache budget in bytes.
    pub memory_budget: u64,
    /// Disk cache budget in bytes.
    pub disk_budget: u64,
    /// Size growth, in points, tolerated before regenerating a disk rendition.
    pub invalidation_margin_points: f64,
    /// Maximum decode pipelines running at once.
    pub max_concurrent_decodes: usize,
    /// Disk cache directory; the platform cache dir when unset.
    pub cache_dir: Option<PathBuf>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            memory_budget: DEFAULT_MEMORY_BUDGET,
            disk_budget: DEFAULT_MAX_CACHE_SIZE,
            invalidation_margin_points: DEFAULT_INVALIDATION_MARGIN_POINTS,
            max_concurrent_decodes: 4,
            cache_dir: None,
        }
    }
}

/// Returned by [`ImageProcessingQueue::load`]; hand it back to
/// [`ImageProcessingQueue::cancel`] to stop receiving the result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CancelHandle {
    token: Option<ObserverToken>,
}

impl CancelHandle {
    const fn inert() -> Self {
        Self { token: None }
    }

    /// False if the load already completed synchronously.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.token.is_some()
    }

    /// Key this handle waits on, if still active.
    #[must_use]
    pub fn key(&self) -> Option<&RequestKey> {
        self.token.as_ref().map(ObserverToken::key)
    }
}

/// Snapshot of queue state.
#[derive(Debug, Clone, Serialize)]
pub struct QueueStats {
    /// Memory cache statistics.
    pub memory: CacheStats,
    /// Bytes stored on disk.
    pub disk_bytes: u64,
    /// Files stored on disk.
    pub disk_files: usize,
    /// Disk budget in bytes.
    pub disk_budget: u64,
    /// Decodes currently in flight.
    pub in_flight: usize,
    /// Originals fetched and downsampled since start.
    pub source_decodes: u64,
    /// Disk renditions decoded since start.
    pub disk_decodes: u64,
}

enum Outcome {
    Abandoned,
    Finished(Option<RenditionRecord>),
}

struct QueueInner {
    memory_cache: Arc<MemoryRenditionCache>,
    disk_cache: Arc<DiskRenditionCache>,
    pool: RequestPool,
    provider: Arc<dyn ByteProviderPort>,
    downsampler: Downsampler,
    policy: InvalidationPolicy,
    permits: Semaphore,
    runtime: Handle,
    source_decodes: AtomicU64,
    disk_decodes: AtomicU64,
}

/// Single entry point for rendition loads. Cheap to clone; clones share
/// caches and in-flight state.
#[derive(Clone)]
pub struct ImageProcessingQueue {
    inner: Arc<QueueInner>,
}

impl std::fmt::Debug for ImageProcessingQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageProcessingQueue")
            .field("disk_cache", &self.inner.disk_cache)
            .field("pool", &self.inner.pool)
            .field("policy", &self.inner.policy)
            .finish_non_exhaustive()
    }
}

impl ImageProcessingQueue {
    /// Creates a queue with its own caches.
    ///
    /// Must be called from within a tokio runtime; decode work is spawned
    /// onto that runtime.
    ///
    /// # Errors
    /// Returns error if the disk cache directory cannot be prepared.
    pub async fn new(config: QueueConfig, provider: Arc<dyn ByteProviderPort>) -> CacheResult<Self> {
        let disk_cache = match &config.cache_dir {
            Some(dir) => DiskRenditionCache::new(dir.clone(), config.disk_budget).await?,
            None => DiskRenditionCache::default_location(config.disk_budget).await?,
        };
        let memory_cache = MemoryRenditionCache::new(config.memory_budget);

        Self::with_caches(&config, provider, Arc::new(memory_cache), Arc::new(disk_cache))
    }

    /// Creates a queue around existing caches.
    ///
    /// # Errors
    /// Returns error if called outside a tokio runtime.
    pub fn with_caches(
        config: &QueueConfig,
        provider: Arc<dyn ByteProviderPort>,
        memory_cache: Arc<MemoryRenditionCache>,
        disk_cache: Arc<DiskRenditionCache>,
    ) -> CacheResult<Self> {
        let runtime = Handle::try_current()
            .map_err(|e| CacheError::Runtime(format!("No tokio runtime: {e}")))?;

        debug!(
            memory_budget = memory_cache.budget(),
            disk_budget = disk_cache.max_size(),
            margin = config.invalidation_margin_points,
            workers = config.max_concurrent_decodes,
            "Image processing queue ready"
        );

        Ok(Self {
            inner: Arc::new(QueueInner {
                memory_cache,
                disk_cache,
                pool: RequestPool::new(),
                provider,
                downsampler: Downsampler::default(),
                policy: InvalidationPolicy::new(config.invalidation_margin_points),
                permits: Semaphore::new(config.max_concurrent_decodes.max(1)),
                runtime,
                source_decodes: AtomicU64::new(0),
                disk_decodes: AtomicU64::new(0),
            }),
        })
    }

    /// Loads a rendition for `request`; `completion` is called exactly once
    /// unless the returned handle is cancelled first.
    ///
    /// Never blocks. A memory cache hit calls `completion` before this
    /// returns; everything else happens on the runtime.
    pub fn load<F>(&self, request: ImageRequest, completion: F) -> CancelHandle
    where
        F: FnOnce(ImageLoadedEvent) + Send + 'static,
    {
        if let Some(record) = self.inner.memory_cache.get(&request.key) {
            completion(ImageLoadedEvent {
                request,
                rendition: Some(record),
            });
            return CancelHandle::inert();
        }

        let key = request.key.clone();
        let source = request.source.clone();
        let observer: Completion =
            Box::new(move |rendition| completion(ImageLoadedEvent { request, rendition }));

        let enqueued = self.inner.pool.enqueue(key, observer);
        if let Some(ticket) = enqueued.ticket {
            let inner = Arc::clone(&self.inner);
            self.inner.runtime.spawn(async move {
                inner.run_decode(ticket, source).await;
            });
        }

        CancelHandle {
            token: Some(enqueued.token),
        }
    }

    /// Loads a rendition into the caches without anyone waiting on it.
    pub fn prefetch(&self, request: ImageRequest) {
        let _ = self.load(request, |_| {});
    }

    /// Stops delivery to the caller that received `handle`. Returns false
    /// if the result was already delivered or the handle was inert.
    ///
    /// Advisory: the decode may keep running to fill the caches.
    pub fn cancel(&self, handle: &CancelHandle) -> bool {
        handle
            .token
            .as_ref()
            .is_some_and(|token| self.inner.pool.cancel(token))
    }

    /// Drops every in-memory rendition.
    pub fn clear_memory_cache(&self) {
        self.inner.memory_cache.clear();
        info!("Cleared memory rendition cache");
    }

    /// Deletes every on-disk rendition.
    ///
    /// # Errors
    /// Returns error if the cache directory cannot be read.
    pub async fn clear_disk_cache(&self) -> CacheResult<()> {
        self.inner.disk_cache.clear().await?;
        info!("Cleared disk rendition cache");
        Ok(())
    }

    /// Returns a snapshot of cache and pool state.
    #[must_use]
    pub fn stats(&self) -> QueueStats {
        QueueStats {
            memory: self.inner.memory_cache.stats(),
            disk_bytes: self.inner.disk_cache.current_size(),
            disk_files: self.inner.disk_cache.len(),
            disk_budget: self.inner.disk_cache.max_size(),
            in_flight: self.inner.pool.in_flight(),
            source_decodes: self.inner.source_decodes.load(Ordering::Relaxed),
            disk_decodes: self.inner.disk_decodes.load(Ordering::Relaxed),
        }
    }

    /// The memory cache.
    #[must_use]
    pub fn memory_cache(&self) -> &Arc<MemoryRenditionCache> {
        &self.inner.memory_cache
    }

    /// The disk cache.
    #[must_use]
    pub fn disk_cache(&self) -> &Arc<DiskRenditionCache> {
        &self.inner.disk_cache
    }

    /// The in-flight request pool.
    #[must_use]
    pub fn pool(&self) -> &RequestPool {
        &self.inner.pool
    }

    /// Number of decodes in flight.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.inner.pool.in_flight()
    }
}

impl QueueInner {
    async fn run_decode(self: Arc<Self>, ticket: DecodeTicket, source: SourceRef) {
        match self.produce(&ticket, &source).await {
            Outcome::Abandoned => {
                debug!(key = %ticket.key(), "Decode abandoned, no observers left");
            }
            Outcome::Finished(rendition) => {
                if let Some(record) = &rendition {
                    debug!(key = %ticket.key(), source = %record.source, size = %record.size, "Rendition ready");
                }
                self.pool.complete(&ticket, rendition);
            }
        }
    }

    async fn produce(&self, ticket: &DecodeTicket, source: &SourceRef) -> Outcome {
        let key = ticket.key();
        let Ok(_permit) = self.permits.acquire().await else {
            return Outcome::Finished(None);
        };

        // Another decode may have filled the cache while this one queued.
        if let Some(record) = self.memory_cache.peek(key) {
            return Outcome::Finished(Some(record));
        }

        if !self.pool.checkpoint(ticket) {
            return Outcome::Abandoned;
        }
        if let Some(record) = self.load_from_disk(key).await {
            return Outcome::Finished(Some(record));
        }

        if !self.pool.checkpoint(ticket) {
            return Outcome::Abandoned;
        }
        let bytes = match self.provider.fetch(source.as_str()).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(key = %key, source = %source, error = %e, "Source unavailable");
                return Outcome::Finished(None);
            }
        };

        if !self.pool.checkpoint(ticket) {
            return Outcome::Abandoned;
        }
        let target = key.required_pixels();
        let downsampler = self.downsampler;
        self.source_decodes.fetch_add(1, Ordering::Relaxed);
        let processed = tokio::task::spawn_blocking(move || {
            let native = Downsampler::read_dimensions(&bytes)
                .ok_or_else(|| CacheError::DecodeError("Unrecognised image header".to_string()))?;
            let image = downsampler.downsample(&bytes, target)?;
            let encoded = Downsampler::encode_for_disk(&image, native);
            Ok::<_, CacheError>((image, encoded))
        })
        .await;

        let (image, encoded) = match processed {
            Ok(Ok(done)) => done,
            Ok(Err(e)) => {
                warn!(key = %key, source = %source, error = %e, "Source bytes could not be decoded");
                return Outcome::Finished(None);
            }
            Err(e) => {
                error!(key = %key, error = %e, "Decode task panicked");
                return Outcome::Finished(None);
            }
        };

        match encoded {
            Ok(encoded) => {
                if let Err(e) = self.disk_cache.write(&key.cache_key, &encoded).await {
                    warn!(key = %key, error = %e, "Failed to cache rendition to disk");
                }
            }
            Err(e) => warn!(key = %key, error = %e, "Rendition not written to disk"),
        }

        let record = RenditionRecord::new(Arc::new(image), RenditionSource::Processed);
        self.memory_cache.put(key.clone(), record.clone());
        Outcome::Finished(Some(record))
    }

    /// Serves `key` from the disk rendition when it is large enough.
    async fn load_from_disk(&self, key: &RequestKey) -> Option<RenditionRecord> {
        let bytes = self.disk_cache.read(&key.cache_key).await?;

        let Some(stored) = Downsampler::read_stored(&bytes) else {
            debug!(key = %key, "Unreadable disk rendition, refetching");
            return None;
        };
        // A native-size rendition is as large as this source gets.
        if !stored.is_native()
            && self
                .policy
                .should_invalidate(stored.size, key.point_size, key.scale)
        {
            debug!(key = %key, stored = %stored.size, "Disk rendition too small, regenerating");
            return None;
        }

        let target = key.required_pixels();
        let downsampler = self.downsampler;
        self.disk_decodes.fetch_add(1, Ordering::Relaxed);
        let decoded = tokio::task::spawn_blocking(move || downsampler.downsample(&bytes, target)).await;
        let image = match decoded {
            Ok(Ok(image)) => image,
            Ok(Err(e)) => {
                debug!(key = %key, error = %e, "Disk rendition failed to decode, refetching");
                return None;
            }
            Err(e) => {
                error!(key = %key, error = %e, "Decode task panicked");
                return None;
            }
        };

        trace!(key = %key, stored = %stored.size, "Serving rendition from disk");
        let record = RenditionRecord::new(Arc::new(image), RenditionSource::Disk);
        self.memory_cache.put(key.clone(), record.clone());
        Some(record)
    }
}

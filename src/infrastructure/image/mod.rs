//! Image handling infrastructure.
//!
//! This module provides:
//! - Memory caching with cost-bounded LRU eviction
//! - Disk caching for persistence across runs
//! - Reduced-resolution decoding
//! - Request coalescing and the async loading pipeline
//! - Byte providers for local files and HTTP

pub mod disk_cache;
pub mod downsampler;
pub mod memory_cache;
pub mod processing_queue;
pub mod providers;
pub mod request_pool;

pub use disk_cache::{DiskRenditionCache, EvictionReport, default_cache_dir};
pub use downsampler::Downsampler;
pub use memory_cache::{CacheStats, MemoryRenditionCache};
pub use processing_queue::{
    CancelHandle, ImageLoadedEvent, ImageProcessingQueue, QueueConfig, QueueStats,
};
pub use providers::{FileByteProvider, HttpByteProvider, RoutingByteProvider};
pub use request_pool::RequestPool;

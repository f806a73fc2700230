//! Infrastructure layer with caches, decoders and source adapters.

/// Application configuration.
pub mod config;
/// Image handling (caching, decoding, loading).
pub mod image;

pub use config::{AppConfig, CliArgs, Command, ConfigError, EngineConfig, LogLevel, StorageManager};
pub use image::{
    CacheStats, CancelHandle, DiskRenditionCache, Downsampler, FileByteProvider, HttpByteProvider,
    ImageLoadedEvent, ImageProcessingQueue, MemoryRenditionCache, QueueConfig, QueueStats,
    RoutingByteProvider,
};

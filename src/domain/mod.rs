//! Domain layer with core value types, ports and pure policies.

/// Entity definitions.
pub mod entities;
/// Error types.
pub mod errors;
/// Port definitions.
pub mod ports;
/// Pure sizing and invalidation rules.
pub mod services;

pub use entities::{CacheKey, ImageRequest, PixelSize, PointSize, RenditionRecord, RequestKey};
pub use errors::{CacheError, CacheResult};
pub use ports::{ByteProviderPort, RenditionCachePort};

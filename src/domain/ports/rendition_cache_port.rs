//! Port definition for rendition caching.

use crate::domain::entities::{RenditionRecord, RequestKey};

/// Port for in-process rendition caches.
/// Implementations must be thread-safe and must not block on I/O.
pub trait RenditionCachePort: Send + Sync {
    /// Returns the cached rendition and marks it most recently used.
    fn get(&self, key: &RequestKey) -> Option<RenditionRecord>;

    /// Stores a rendition. Returns false if the cache refused it.
    fn put(&self, key: RequestKey, record: RenditionRecord) -> bool;

    /// Removes one rendition.
    fn evict(&self, key: &RequestKey);

    /// Returns the current number of cached renditions.
    fn len(&self) -> usize;

    /// Returns true if the cache is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every rendition.
    fn clear(&self);
}

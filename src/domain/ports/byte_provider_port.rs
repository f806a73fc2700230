//! Port for fetching original encoded image bytes.

use async_trait::async_trait;
use bytes::Bytes;

use crate::domain::errors::CacheResult;

/// Source of original (full resolution, encoded) image bytes.
///
/// Retry policy, if any, lives behind this port; the processing queue
/// treats every error as a miss for the current attempt.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ByteProviderPort: Send + Sync {
    /// Fetches the encoded bytes for `identifier`.
    async fn fetch(&self, identifier: &str) -> CacheResult<Bytes>;
}

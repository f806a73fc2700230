//! Port definitions.

mod byte_provider_port;
mod rendition_cache_port;

pub use byte_provider_port::ByteProviderPort;
pub use rendition_cache_port::RenditionCachePort;

#[cfg(test)]
pub use byte_provider_port::MockByteProviderPort;

#[cfg(test)]
pub mod mocks {
    pub use super::byte_provider_port::mock::{CountingByteProvider, jpeg_bytes, png_bytes};
}

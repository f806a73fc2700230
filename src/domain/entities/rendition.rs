//! Image requests and the renditions produced for them.

use std::sync::Arc;

use super::keys::{CacheKey, DisplayScale, PixelSize, PointSize, RequestKey};

/// Identifier handed to the byte provider to fetch the original image.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceRef(String);

impl SourceRef {
    /// Creates a source reference.
    #[must_use]
    pub fn new(identifier: impl Into<String>) -> Self {
        Self(identifier.into())
    }

    /// Returns the identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SourceRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A single call's worth of "load this image at this size".
#[derive(Debug, Clone, PartialEq)]
pub struct ImageRequest {
    /// Where the original bytes come from.
    pub source: SourceRef,
    /// What to load and at what size.
    pub key: RequestKey,
    /// Opaque caller data echoed back with the result.
    pub user_info: Option<String>,
}

impl ImageRequest {
    /// Creates a request whose cache key is derived from the source identifier.
    #[must_use]
    pub fn new(source: impl Into<String>, point_size: PointSize, scale: DisplayScale) -> Self {
        let source = SourceRef::new(source);
        let cache_key = CacheKey::for_source(source.as_str());
        Self {
            source,
            key: RequestKey::new(cache_key, point_size, scale),
            user_info: None,
        }
    }

    /// Attaches caller data.
    #[must_use]
    pub fn with_user_info(mut self, user_info: impl Into<String>) -> Self {
        self.user_info = Some(user_info.into());
        self
    }

    /// Logical image identity.
    #[must_use]
    pub const fn cache_key(&self) -> &CacheKey {
        &self.key.cache_key
    }
}

/// Where a rendition was served from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenditionSource {
    /// In-memory LRU cache.
    Memory,
    /// On-disk rendition cache.
    Disk,
    /// Freshly fetched and downsampled.
    Processed,
}

impl std::fmt::Display for RenditionSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Memory => write!(f, "memory"),
            Self::Disk => write!(f, "disk"),
            Self::Processed => write!(f, "processed"),
        }
    }
}

/// A decoded bitmap plus where it came from.
#[derive(Debug, Clone)]
pub struct RenditionRecord {
    /// The decoded bitmap.
    pub image: Arc<image::DynamicImage>,
    /// Pixel dimensions of `image`.
    pub size: PixelSize,
    /// Origin tag.
    pub source: RenditionSource,
}

impl RenditionRecord {
    /// Wraps a decoded bitmap.
    #[must_use]
    pub fn new(image: Arc<image::DynamicImage>, source: RenditionSource) -> Self {
        let size = PixelSize::new(image.width(), image.height());
        Self {
            image,
            size,
            source,
        }
    }

    /// Same bitmap with a different origin tag.
    #[must_use]
    pub fn with_source(&self, source: RenditionSource) -> Self {
        Self {
            image: Arc::clone(&self.image),
            size: self.size,
            source,
        }
    }

    /// Memory cost in bytes: pixel area times bytes per pixel.
    #[must_use]
    pub fn cost(&self) -> u64 {
        self.size.area() * u64::from(self.image.color().bytes_per_pixel())
    }

    /// Returns true if both records share the same bitmap allocation.
    #[must_use]
    pub fn same_bitmap(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.image, &other.image)
    }
}

/// Status of a display slot in the loading pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ImageStatus {
    /// Nothing requested yet.
    #[default]
    NotStarted,
    /// A request is outstanding.
    Loading,
    /// A rendition is available.
    Ready,
    /// The last request produced no image.
    Failed,
}

impl ImageStatus {
    /// Returns true if the image is ready for rendering.
    #[must_use]
    pub const fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }

    /// Returns true if a request is outstanding.
    #[must_use]
    pub const fn is_loading(&self) -> bool {
        matches!(self, Self::Loading)
    }

    /// Returns true if loading failed.
    #[must_use]
    pub const fn is_failed(&self) -> bool {
        matches!(self, Self::Failed)
    }
}

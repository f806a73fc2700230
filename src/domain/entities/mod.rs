//! Domain entity definitions.

mod keys;
mod rendition;

pub(crate) use keys::points_to_pixels;
pub use keys::{CacheKey, DisplayScale, PixelSize, PointSize, RequestKey};
pub use rendition::{ImageRequest, ImageStatus, RenditionRecord, RenditionSource, SourceRef};

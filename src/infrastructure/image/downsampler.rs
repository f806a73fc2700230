//! Encoded bytes to a decoded bitmap at (about) the size it will be shown.
//!
//! | Input | Strategy |
//! |---|---|
//! | JPEG | `jpeg-decoder` DCT scaling (1/8 .. 8/8) so the native-resolution bitmap is never built, then an exact Lanczos3 resize |
//! | PNG, WebP | `image::ImageReader` under an allocation limit, then Lanczos3 resize |
//!
//! Output dimensions come from [`fit_covering`]: the smallest aspect-preserving
//! size covering the target, never larger than the source.
//!
//! Disk renditions are PNG with one `tEXt` chunk recording the native size of
//! the source they were made from.

use std::borrow::Cow;
use std::io::Cursor;

use image::imageops::FilterType;
use image::{DynamicImage, GrayImage, ImageFormat, ImageReader, RgbImage};
use tracing::{debug, trace};

use crate::domain::entities::PixelSize;
use crate::domain::errors::{CacheError, CacheResult};
use crate::domain::services::fit_covering;

/// Default cap on a single decode allocation (512 MB).
pub const DEFAULT_MAX_DECODE_ALLOC: u64 = 512 * 1024 * 1024;

const NATIVE_SIZE_KEYWORD: &str = "clipthumb:native-size";

/// Header facts about a stored disk rendition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoredRendition {
    /// Pixel size of the stored bitmap.
    pub size: PixelSize,
    /// Pixel size of the original it was made from, when recorded.
    pub native: Option<PixelSize>,
}

impl StoredRendition {
    /// True when the stored bitmap holds every pixel of its original, so no
    /// larger rendition can ever be produced.
    #[must_use]
    pub fn is_native(&self) -> bool {
        self.native == Some(self.size)
    }
}

/// Decodes and downsizes images. Blocking; run it off the async executor.
#[derive(Debug, Clone, Copy)]
pub struct Downsampler {
    max_alloc: u64,
}

impl Default for Downsampler {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_DECODE_ALLOC)
    }
}

impl Downsampler {
    /// Creates a downsampler refusing decodes that would allocate more than
    /// `max_alloc` bytes.
    #[must_use]
    pub const fn new(max_alloc: u64) -> Self {
        Self { max_alloc }
    }

    /// Reads the pixel dimensions from the image header.
    #[must_use]
    pub fn read_dimensions(bytes: &[u8]) -> Option<PixelSize> {
        let reader = ImageReader::new(Cursor::new(bytes))
            .with_guessed_format()
            .ok()?;
        let (width, height) = reader.into_dimensions().ok()?;
        Some(PixelSize::new(width, height))
    }

    /// Reads size and recorded native size from a disk rendition header.
    ///
    /// Files without the native-size chunk report `native: None`.
    #[must_use]
    pub fn read_stored(bytes: &[u8]) -> Option<StoredRendition> {
        let Ok(reader) = png::Decoder::new(Cursor::new(bytes)).read_info() else {
            return Self::read_dimensions(bytes).map(|size| StoredRendition { size, native: None });
        };
        let info = reader.info();
        let native = info
            .uncompressed_latin1_text
            .iter()
            .find(|chunk| chunk.keyword == NATIVE_SIZE_KEYWORD)
            .and_then(|chunk| parse_size(&chunk.text));

        Some(StoredRendition {
            size: PixelSize::new(info.width, info.height),
            native,
        })
    }

    /// Decodes `bytes` at the smallest size covering `target`.
    ///
    /// # Errors
    /// Returns [`CacheError::DecodeError`] for malformed or unsupported input
    /// and for decodes over the allocation limit.
    pub fn downsample(&self, bytes: &[u8], target: PixelSize) -> CacheResult<DynamicImage> {
        let format = image::guess_format(bytes)
            .map_err(|e| CacheError::DecodeError(format!("Unrecognised image format: {e}")))?;

        let decoded = match format {
            ImageFormat::Jpeg => match Self::decode_jpeg_scaled(bytes, target) {
                Some(image) => image,
                None => self.decode_full(bytes, target)?,
            },
            _ => self.decode_full(bytes, target)?,
        };

        trace!(
            width = decoded.width(),
            height = decoded.height(),
            target = %target,
            "Downsampled image"
        );
        Ok(decoded)
    }

    /// JPEG path: lets the decoder drop DCT coefficients so only a reduced
    /// bitmap is materialised. Returns `None` when the colour model is not
    /// handled here, so the caller can fall back to a full decode.
    fn decode_jpeg_scaled(bytes: &[u8], target: PixelSize) -> Option<DynamicImage> {
        let mut decoder = jpeg_decoder::Decoder::new(Cursor::new(bytes));
        decoder.read_info().ok()?;
        let info = decoder.info()?;

        let native = PixelSize::new(u32::from(info.width), u32::from(info.height));
        let wanted = fit_covering(native, target);

        let (width, height) = if wanted == native {
            (info.width, info.height)
        } else {
            #[allow(clippy::cast_possible_truncation)]
            let requested = (wanted.width as u16, wanted.height as u16);
            decoder.scale(requested.0, requested.1).ok()?
        };

        let pixels = match decoder.decode() {
            Ok(pixels) => pixels,
            Err(e) => {
                debug!(error = %e, "Scaled JPEG decode failed, falling back");
                return None;
            }
        };

        let (width, height) = (u32::from(width), u32::from(height));
        let reduced = match info.pixel_format {
            jpeg_decoder::PixelFormat::L8 => {
                DynamicImage::ImageLuma8(GrayImage::from_raw(width, height, pixels)?)
            }
            jpeg_decoder::PixelFormat::RGB24 => {
                DynamicImage::ImageRgb8(RgbImage::from_raw(width, height, pixels)?)
            }
            _ => return None,
        };

        Some(resize_to(reduced, wanted))
    }

    /// Generic path for formats without reduced-resolution decoding.
    fn decode_full(&self, bytes: &[u8], target: PixelSize) -> CacheResult<DynamicImage> {
        let mut reader = ImageReader::new(Cursor::new(bytes))
            .with_guessed_format()
            .map_err(|e| CacheError::DecodeError(format!("Failed to read image header: {e}")))?;
        let mut limits = image::Limits::default();
        limits.max_alloc = Some(self.max_alloc);
        reader.limits(limits);

        let decoded = reader
            .decode()
            .map_err(|e| CacheError::DecodeError(format!("Image decode failed: {e}")))?;

        let native = PixelSize::new(decoded.width(), decoded.height());
        Ok(resize_to(decoded, fit_covering(native, target)))
    }

    /// Encodes a rendition for the disk cache: lossless 8-bit PNG tagged with
    /// the native size of its original.
    ///
    /// # Errors
    /// Returns [`CacheError::DecodeError`] if PNG encoding fails.
    pub fn encode_for_disk(image: &DynamicImage, native: PixelSize) -> CacheResult<Vec<u8>> {
        let (color, data): (png::ColorType, Cow<'_, [u8]>) = match image {
            DynamicImage::ImageLuma8(buf) => (png::ColorType::Grayscale, Cow::Borrowed(buf.as_raw())),
            DynamicImage::ImageLumaA8(buf) => {
                (png::ColorType::GrayscaleAlpha, Cow::Borrowed(buf.as_raw()))
            }
            DynamicImage::ImageRgb8(buf) => (png::ColorType::Rgb, Cow::Borrowed(buf.as_raw())),
            DynamicImage::ImageRgba8(buf) => (png::ColorType::Rgba, Cow::Borrowed(buf.as_raw())),
            other => (png::ColorType::Rgba, Cow::Owned(other.to_rgba8().into_raw())),
        };

        let encode_err =
            |e: png::EncodingError| CacheError::DecodeError(format!("Failed to encode rendition: {e}"));

        let mut out = Vec::new();
        let mut encoder = png::Encoder::new(&mut out, image.width(), image.height());
        encoder.set_color(color);
        encoder.set_depth(png::BitDepth::Eight);
        encoder
            .add_text_chunk(
                NATIVE_SIZE_KEYWORD.to_string(),
                format!("{}x{}", native.width, native.height),
            )
            .map_err(encode_err)?;
        let mut writer = encoder.write_header().map_err(encode_err)?;
        writer.write_image_data(&data).map_err(encode_err)?;
        writer.finish().map_err(encode_err)?;

        Ok(out)
    }
}

/// Parses the `WxH` text of the native-size chunk.
fn parse_size(text: &str) -> Option<PixelSize> {
    let (width, height) = text.split_once('x')?;
    Some(PixelSize::new(width.trim().parse().ok()?, height.trim().parse().ok()?))
}

fn resize_to(image: DynamicImage, size: PixelSize) -> DynamicImage {
    if image.width() == size.width && image.height() == size.height {
        image
    } else {
        image.resize_exact(size.width, size.height, FilterType::Lanczos3)
    }
}

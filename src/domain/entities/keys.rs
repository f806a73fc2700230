//! Cache and request keys.

use std::hash::{Hash, Hasher};

use sha2::{Digest, Sha256};

/// Stable identity of an image's logical content, independent of size.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    /// Wraps an identity verbatim.
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Derives the key for a source identifier.
    ///
    /// Surrounding whitespace is not part of the identity, so every call
    /// site that resolves the same source ends up with an equal key.
    #[must_use]
    pub fn for_source(identifier: &str) -> Self {
        Self(identifier.trim().to_string())
    }

    /// Returns the inner string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Hex-encoded SHA-256 of the key, used as the disk cache file stem.
    #[must_use]
    pub fn disk_file_stem(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.0.as_bytes());
        hex::encode(hasher.finalize())
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for CacheKey {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for CacheKey {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

/// Folds `-0.0` into `0.0` and NaN into a single bit pattern.
fn canonical_bits(value: f64) -> u64 {
    if value == 0.0 {
        0.0_f64.to_bits()
    } else if value.is_nan() {
        f64::NAN.to_bits()
    } else {
        value.to_bits()
    }
}

/// On-screen size in points.
#[derive(Debug, Clone, Copy, Default)]
pub struct PointSize {
    /// Width in points.
    pub width: f64,
    /// Height in points.
    pub height: f64,
}

impl PointSize {
    /// Creates a point size.
    #[must_use]
    pub const fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }
}

impl PartialEq for PointSize {
    fn eq(&self, other: &Self) -> bool {
        canonical_bits(self.width) == canonical_bits(other.width)
            && canonical_bits(self.height) == canonical_bits(other.height)
    }
}

impl Eq for PointSize {}

impl Hash for PointSize {
    fn hash<H: Hasher>(&self, state: &mut H) {
        canonical_bits(self.width).hash(state);
        canonical_bits(self.height).hash(state);
    }
}

impl std::fmt::Display for PointSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}pt", self.width, self.height)
    }
}

/// Size of a bitmap in pixels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct PixelSize {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl PixelSize {
    /// Creates a pixel size.
    #[must_use]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Returns true if this size is at least `other` on both axes.
    #[must_use]
    pub const fn covers(&self, other: Self) -> bool {
        self.width >= other.width && self.height >= other.height
    }

    /// Number of pixels.
    #[must_use]
    pub const fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

impl std::fmt::Display for PixelSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}px", self.width, self.height)
    }
}

/// Display scale factor (pixels per point).
#[derive(Debug, Clone, Copy)]
pub struct DisplayScale(f64);

impl DisplayScale {
    /// Scale of a standard-density display.
    pub const ONE: Self = Self(1.0);

    /// Creates a scale, clamping non-finite or non-positive values to `1.0`.
    #[must_use]
    pub fn new(scale: f64) -> Self {
        if scale.is_finite() && scale > 0.0 {
            Self(scale)
        } else {
            Self::ONE
        }
    }

    /// Returns the raw factor.
    #[must_use]
    pub const fn get(self) -> f64 {
        self.0
    }
}

impl Default for DisplayScale {
    fn default() -> Self {
        Self::ONE
    }
}

impl PartialEq for DisplayScale {
    fn eq(&self, other: &Self) -> bool {
        canonical_bits(self.0) == canonical_bits(other.0)
    }
}

impl Eq for DisplayScale {}

impl Hash for DisplayScale {
    fn hash<H: Hasher>(&self, state: &mut H) {
        canonical_bits(self.0).hash(state);
    }
}

impl std::fmt::Display for DisplayScale {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "@{}x", self.0)
    }
}

/// Converts a point extent to whole pixels, rounding up.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub(crate) fn points_to_pixels(points: f64, scale: DisplayScale) -> u32 {
    let pixels = (points * scale.get()).ceil();
    if pixels.is_nan() || pixels <= 0.0 {
        0
    } else if pixels >= f64::from(u32::MAX) {
        u32::MAX
    } else {
        pixels as u32
    }
}

/// Memory cache and request pool key: what image, at what size.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestKey {
    /// Logical image identity.
    pub cache_key: CacheKey,
    /// Requested on-screen size.
    pub point_size: PointSize,
    /// Display scale of the requesting surface.
    pub scale: DisplayScale,
}

impl RequestKey {
    /// Creates a request key.
    #[must_use]
    pub const fn new(cache_key: CacheKey, point_size: PointSize, scale: DisplayScale) -> Self {
        Self {
            cache_key,
            point_size,
            scale,
        }
    }

    /// Pixel size the request needs: points times scale, rounded up.
    #[must_use]
    pub fn required_pixels(&self) -> PixelSize {
        PixelSize::new(
            points_to_pixels(self.point_size.width, self.scale),
            points_to_pixels(self.point_size.height, self.scale),
        )
    }
}

impl std::fmt::Display for RequestKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}[{}{}]", self.cache_key, self.point_size, self.scale)
    }
}

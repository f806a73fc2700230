//! Decides whether a cached rendition can serve a new request.

use crate::domain::entities::{DisplayScale, PixelSize, PointSize, points_to_pixels};

/// Growth, in points, tolerated before a cached rendition is regenerated.
pub const DEFAULT_INVALIDATION_MARGIN_POINTS: f64 = 30.0;

/// Size-based staleness rule for cached renditions.
///
/// A rendition that covers the requested pixel size is always kept. A
/// smaller one is kept while the shortfall on each axis stays within the
/// margin, so layout jitter does not trigger a refetch, and regenerated
/// once a meaningfully larger size is needed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InvalidationPolicy {
    margin_points: f64,
}

impl InvalidationPolicy {
    /// Creates a policy with the given margin. Negative or non-finite
    /// margins fall back to zero tolerance.
    #[must_use]
    pub fn new(margin_points: f64) -> Self {
        let margin_points = if margin_points.is_finite() && margin_points > 0.0 {
            margin_points
        } else {
            0.0
        };
        Self { margin_points }
    }

    /// Tolerance margin in points.
    #[must_use]
    pub const fn margin_points(&self) -> f64 {
        self.margin_points
    }

    /// Returns true if `cached` is too small for the request and must be
    /// regenerated.
    #[must_use]
    pub fn should_invalidate(
        &self,
        cached: PixelSize,
        requested: PointSize,
        scale: DisplayScale,
    ) -> bool {
        let required = PixelSize::new(
            points_to_pixels(requested.width, scale),
            points_to_pixels(requested.height, scale),
        );
        if cached.covers(required) {
            return false;
        }

        let deficit_width = f64::from(required.width.saturating_sub(cached.width)) / scale.get();
        let deficit_height =
            f64::from(required.height.saturating_sub(cached.height)) / scale.get();

        deficit_width > self.margin_points || deficit_height > self.margin_points
    }
}

impl Default for InvalidationPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_INVALIDATION_MARGIN_POINTS)
    }
}

/// [`InvalidationPolicy::should_invalidate`] with the default margin.
#[must_use]
pub fn should_invalidate(cached: PixelSize, requested: PointSize, scale: DisplayScale) -> bool {
    InvalidationPolicy::default().should_invalidate(cached, requested, scale)
}

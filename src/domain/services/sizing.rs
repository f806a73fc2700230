//! Pure calculation functions for rendition dimensions.
//!
//! Integer arithmetic only, so results never drift by a pixel from
//! floating point rounding.

use crate::domain::entities::PixelSize;

/// Smallest aspect-preserving size that covers `target` on both axes,
/// never larger than `source`.
///
/// When the source is already smaller than the target on the axis that
/// decides the scale, the source size is returned unchanged (no upsampling).
/// Degenerate inputs are clamped to at least 1x1.
///
/// ```
/// # use clipthumb::domain::services::fit_covering;
/// # use clipthumb::domain::entities::PixelSize;
/// // 4000x3000 into a 200x200 cell: height decides, width overflows.
/// assert_eq!(
///     fit_covering(PixelSize::new(4000, 3000), PixelSize::new(200, 200)),
///     PixelSize::new(267, 200),
/// );
/// // Never upsample.
/// assert_eq!(
///     fit_covering(PixelSize::new(50, 40), PixelSize::new(200, 200)),
///     PixelSize::new(50, 40),
/// );
/// ```
#[must_use]
pub fn fit_covering(source: PixelSize, target: PixelSize) -> PixelSize {
    if source.width == 0 || source.height == 0 {
        return source;
    }

    let (sw, sh) = (u64::from(source.width), u64::from(source.height));
    let (tw, th) = (u64::from(target.width), u64::from(target.height));

    // tw/sw >= th/sh: width needs the larger scale factor.
    let (width, height) = if tw * sh >= th * sw {
        if tw >= sw {
            return source;
        }
        (tw, (sh * tw).div_ceil(sw))
    } else {
        if th >= sh {
            return source;
        }
        ((sw * th).div_ceil(sh), th)
    };

    PixelSize::new(clamp_axis(width, source.width), clamp_axis(height, source.height))
}

#[allow(clippy::cast_possible_truncation)]
fn clamp_axis(value: u64, max: u32) -> u32 {
    value.clamp(1, u64::from(max)) as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case((4000, 3000), (200, 200), (267, 200) ; "landscape_into_square")]
    #[test_case((3000, 4000), (200, 200), (200, 267) ; "portrait_into_square")]
    #[test_case((1000, 1000), (100, 100), (100, 100) ; "exact_square")]
    #[test_case((1000, 500), (300, 100), (300, 150) ; "width_dominant")]
    #[test_case((640, 480), (1280, 960), (640, 480) ; "no_upsampling")]
    #[test_case((640, 480), (640, 100), (640, 480) ; "one_axis_at_native")]
    #[test_case((1000, 10), (100, 100), (1000, 10) ; "thin_strip_needs_native")]
    #[test_case((1000, 800), (0, 0), (1, 1) ; "degenerate_target")]
    #[test_case((0, 10), (5, 5), (0, 10) ; "empty_source")]
    fn test_fit_covering(source: (u32, u32), target: (u32, u32), expected: (u32, u32)) {
        let result = fit_covering(
            PixelSize::new(source.0, source.1),
            PixelSize::new(target.0, target.1),
        );
        assert_eq!(result, PixelSize::new(expected.0, expected.1));
    }

    #[test]
    fn test_result_covers_target_when_downscaling() {
        let source = PixelSize::new(3024, 4032);
        for edge in [10, 57, 99, 180, 333, 1000] {
            let target = PixelSize::new(edge, edge);
            let fitted = fit_covering(source, target);
            assert!(fitted.covers(target), "{fitted} should cover {target}");
            assert!(source.covers(fitted));
        }
    }
}

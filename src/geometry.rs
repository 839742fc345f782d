//! Coordinate-space mapping between a resized inference frame and the original frame.

use serde::{Deserialize, Serialize};

use crate::frame::Dims;

/// Integer pixel box in the coordinate space of the ORIGINAL frame.
/// `x1 < x2`, `y1 < y2`, all coordinates within `[0, width) x [0, height)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl BoundingBox {
    pub const fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> i32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> i32 {
        self.y2 - self.y1
    }
}

/// Independent x/y scale factors from resized space back to original space.
///
/// Returns `None` when either space is degenerate; callers fall back to identity.
pub fn scale_factors(original: Dims, resized: Dims) -> Option<(f64, f64)> {
    if original.is_degenerate() || resized.is_degenerate() {
        return None;
    }
    Some((
        f64::from(original.width) / f64::from(resized.width),
        f64::from(original.height) / f64::from(resized.height),
    ))
}

/// Map a detector box (`[x1, y1, x2, y2]`, resized-space pixels) into original space.
///
/// Each coordinate is multiplied by its axis scale, truncated, then clamped into
/// `[0, original_width) x [0, original_height)`. A degenerate `resized` falls back
/// to the identity mapping. Returns `None` when the clamped box has no area.
pub fn rescale_box(raw: [f32; 4], original: Dims, resized: Dims) -> Option<BoundingBox> {
    let (sx, sy) = match scale_factors(original, resized) {
        Some(factors) => factors,
        None => {
            log::warn!(
                "degenerate geometry (original {}, resized {}); using identity mapping",
                original,
                resized
            );
            (1.0, 1.0)
        }
    };
    let max_x = i64::from(original.width.saturating_sub(1));
    let max_y = i64::from(original.height.saturating_sub(1));
    let map = |value: f32, scale: f64, max: i64| -> i32 {
        // Truncate first: detector output is truncated to pixels before scaling.
        let scaled = (value.trunc() as f64 * scale).trunc();
        let scaled = if scaled.is_finite() { scaled as i64 } else { 0 };
        scaled.clamp(0, max) as i32
    };
    let bbox = BoundingBox {
        x1: map(raw[0], sx, max_x),
        y1: map(raw[1], sy, max_y),
        x2: map(raw[2], sx, max_x),
        y2: map(raw[3], sy, max_y),
    };
    if bbox.x1 < bbox.x2 && bbox.y1 < bbox.y2 {
        Some(bbox)
    } else {
        None
    }
}

/// Identity variant used when no resize was applied: truncate and clamp only.
pub fn clamp_box(raw: [f32; 4], frame: Dims) -> Option<BoundingBox> {
    rescale_box(raw, frame, frame)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_when_dims_match() {
        let dims = Dims::new(640, 480);
        let raw = [10.0, 20.0, 300.0, 400.0];
        assert_eq!(
            clamp_box(raw, dims),
            Some(BoundingBox::new(10, 20, 300, 400))
        );
    }

    #[test]
    fn rescales_with_independent_axes() {
        let bbox = rescale_box(
            [100.0, 100.0, 200.0, 200.0],
            Dims::new(1280, 720),
            Dims::new(640, 480),
        );
        assert_eq!(bbox, Some(BoundingBox::new(200, 150, 400, 300)));
    }

    #[test]
    fn clamps_into_original_bounds() {
        let original = Dims::new(1280, 720);
        let resized = Dims::new(320, 240);
        for raw in [
            [-5.0, -5.0, 320.0, 240.0],
            [319.9, 239.9, 1000.0, 1000.0],
            [0.0, 0.0, f32::MAX, f32::MAX],
            [310.0, 230.0, 319.999, 239.999],
        ] {
            if let Some(bbox) = rescale_box(raw, original, resized) {
                assert!(bbox.x1 >= 0 && bbox.y1 >= 0);
                assert!(bbox.x2 < original.width as i32);
                assert!(bbox.y2 < original.height as i32);
                assert!(bbox.x1 < bbox.x2 && bbox.y1 < bbox.y2);
            }
        }
    }

    #[test]
    fn box_outside_frame_collapses() {
        let dims = Dims::new(100, 100);
        assert_eq!(clamp_box([150.0, 150.0, 200.0, 200.0], dims), None);
    }

    #[test]
    fn degenerate_resize_falls_back_to_identity() {
        let bbox = rescale_box(
            [10.0, 10.0, 50.0, 50.0],
            Dims::new(100, 100),
            Dims::new(0, 240),
        );
        assert_eq!(bbox, Some(BoundingBox::new(10, 10, 50, 50)));
    }

    #[test]
    fn no_scale_factors_for_zero_dims() {
        assert!(scale_factors(Dims::new(100, 100), Dims::new(0, 0)).is_none());
        assert_eq!(
            scale_factors(Dims::new(1280, 720), Dims::new(640, 480)),
            Some((2.0, 1.5))
        );
    }
}

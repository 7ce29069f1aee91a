//! Frame geometry: normalized points, pixel boxes, and the crossing predicate.
//!
//! Detection boxes arrive in pixel space. Everything the counter compares
//! (line position, zone split, track centers) lives in normalized `[0,1]`
//! space, so centers are normalized once, right after they are computed.

use serde::{Deserialize, Serialize};

/// Point in normalized frame coordinates (`x` of width, `y` of height).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// Axis-aligned box in pixel coordinates, as emitted by the tracker.
///
/// Serialized as `[x1, y1, x2, y2]`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f32; 4]", into = "[f32; 4]")]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub const fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// Midpoint of the box, still in pixels.
    pub fn center_px(&self) -> (f32, f32) {
        ((self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0)
    }

    /// Midpoint of the box normalized against the frame it was detected in.
    pub fn normalized_center(&self, dims: FrameDims) -> Point {
        let (cx, cy) = self.center_px();
        dims.normalize(cx, cy)
    }

    pub fn width(&self) -> f32 {
        (self.x2 - self.x1).abs()
    }

    pub fn height(&self) -> f32 {
        (self.y2 - self.y1).abs()
    }
}

impl From<[f32; 4]> for BoundingBox {
    fn from(v: [f32; 4]) -> Self {
        Self::new(v[0], v[1], v[2], v[3])
    }
}

impl From<BoundingBox> for [f32; 4] {
    fn from(b: BoundingBox) -> Self {
        [b.x1, b.y1, b.x2, b.y2]
    }
}

/// Pixel dimensions of the frame a detection batch belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameDims {
    pub width: u32,
    pub height: u32,
}

impl FrameDims {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Maps a pixel coordinate into `[0,1]` space. Zero-sized frames map to the origin.
    pub fn normalize(&self, x_px: f32, y_px: f32) -> Point {
        let x = if self.width == 0 {
            0.0
        } else {
            x_px / self.width as f32
        };
        let y = if self.height == 0 {
            0.0
        } else {
            y_px / self.height as f32
        };
        Point::new(x, y)
    }
}

/// True when the move from `prev` to `current` reaches or passes the vertical line at `line_x`.
///
/// Strict on the departure side, inclusive on the arrival side, in both directions.
/// A track resting exactly on the line does not cross by leaving it.
pub fn crosses_vertical_line(prev: Point, current: Point, line_x: f32) -> bool {
    (prev.x < line_x && current.x >= line_x) || (prev.x > line_x && current.x <= line_x)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn center_is_box_midpoint_normalized() {
        let bbox = BoundingBox::new(100.0, 50.0, 300.0, 150.0);
        let center = bbox.normalized_center(FrameDims::new(1000, 500));
        assert!((center.x - 0.2).abs() < 1e-6);
        assert!((center.y - 0.2).abs() < 1e-6);
    }

    #[test]
    fn crossing_left_to_right() {
        assert!(crosses_vertical_line(
            Point::new(0.4, 0.5),
            Point::new(0.6, 0.5),
            0.5
        ));
    }

    #[test]
    fn crossing_right_to_left() {
        assert!(crosses_vertical_line(
            Point::new(0.6, 0.5),
            Point::new(0.4, 0.5),
            0.5
        ));
    }

    #[test]
    fn no_crossing_without_movement() {
        assert!(!crosses_vertical_line(
            Point::new(0.6, 0.5),
            Point::new(0.6, 0.5),
            0.5
        ));
    }

    #[test]
    fn reaching_the_line_counts_leaving_it_does_not() {
        assert!(crosses_vertical_line(
            Point::new(0.4, 0.5),
            Point::new(0.5, 0.5),
            0.5
        ));
        assert!(!crosses_vertical_line(
            Point::new(0.5, 0.5),
            Point::new(0.7, 0.5),
            0.5
        ));
    }

    #[test]
    fn zero_sized_frame_normalizes_to_origin() {
        let p = FrameDims::new(0, 0).normalize(12.0, 7.0);
        assert_eq!(p, Point::new(0.0, 0.0));
    }
}

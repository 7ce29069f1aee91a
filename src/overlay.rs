//! Annotation overlay drawn onto output frames.
//!
//! Draws the counting line, the zone separator, the running counts and one
//! box per tracked detection. Text needs a TrueType font; without one the
//! detection labels are drawn as plain colored bars and zone labels are
//! omitted.

use ab_glyph::{FontVec, PxScale};
use anyhow::{anyhow, Context, Result};
use image::{Rgb, RgbImage};
use imageproc::drawing::{
    draw_filled_rect_mut, draw_hollow_rect_mut, draw_line_segment_mut, draw_text_mut,
};
use imageproc::rect::Rect;
use std::path::Path;

use crate::counter::{Counts, LineConfig};
use crate::detect::Detection;

const LINE_COLOR: Rgb<u8> = Rgb([255, 255, 0]);
const SEPARATOR_COLOR: Rgb<u8> = Rgb([255, 255, 255]);
const ZONE_TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);
const OK_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const NOK_COLOR: Rgb<u8> = Rgb([255, 0, 0]);

/// Gap between a box and its label.
const LABEL_OFFSET: i32 = 10;
const LABEL_HEIGHT: u32 = 12;
const ZONE_TEXT_X: i32 = 10;

pub struct Overlay {
    font: Option<FontVec>,
    text_scale: f32,
}

impl Default for Overlay {
    fn default() -> Self {
        Self::new()
    }
}

impl Overlay {
    /// Overlay without a font.
    pub fn new() -> Self {
        Self {
            font: None,
            text_scale: 18.0,
        }
    }

    pub fn with_font(font: FontVec) -> Self {
        Self {
            font: Some(font),
            ..Self::new()
        }
    }

    /// Overlay using the font at `path`, or none when `path` is `None`.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Ok(Self::with_font(load_font(path)?)),
            None => Ok(Self::new()),
        }
    }

    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    pub fn render(
        &self,
        frame: &mut RgbImage,
        detections: &[Detection],
        line: &LineConfig,
        counts: Counts,
    ) {
        let (width, height) = frame.dimensions();
        if width == 0 || height == 0 {
            return;
        }

        for detection in detections {
            let Some((track_id, class_name, bbox)) = detection.complete() else {
                continue;
            };
            let color = class_color(class_name);
            let x = bbox.x1.min(bbox.x2).round() as i32;
            let y = bbox.y1.min(bbox.y2).round() as i32;
            let w = (bbox.width().round() as u32).max(1);
            let h = (bbox.height().round() as u32).max(1);
            draw_hollow_rect_mut(frame, Rect::at(x, y).of_size(w, h), color);

            let label_top = y - LABEL_OFFSET - LABEL_HEIGHT as i32;
            match &self.font {
                Some(font) => {
                    let label = format!("{} - {}", track_id, class_name);
                    draw_text_mut(
                        frame,
                        color,
                        x,
                        label_top,
                        PxScale::from(self.text_scale),
                        font,
                        &label,
                    );
                }
                None => {
                    draw_filled_rect_mut(
                        frame,
                        Rect::at(x, label_top).of_size(w, LABEL_HEIGHT),
                        color,
                    );
                }
            }
        }

        let line_x = (line.line_x * width as f32).round();
        let split_y = (line.zone_split_y * height as f32).round();
        let bottom = (height - 1) as f32;
        let right = (width - 1) as f32;
        for offset in [0.0, 1.0] {
            draw_line_segment_mut(frame, (line_x + offset, 0.0), (line_x + offset, bottom), LINE_COLOR);
            draw_line_segment_mut(
                frame,
                (0.0, split_y + offset),
                (right, split_y + offset),
                SEPARATOR_COLOR,
            );
        }

        if let Some(font) = &self.font {
            let scale = PxScale::from(self.text_scale);
            let line1 = format!("Line 1: {}", counts.line1);
            let line2 = format!("Line 2: {}", counts.line2);
            draw_text_mut(
                frame,
                ZONE_TEXT_COLOR,
                ZONE_TEXT_X,
                (height / 4) as i32,
                scale,
                font,
                &line1,
            );
            draw_text_mut(
                frame,
                ZONE_TEXT_COLOR,
                ZONE_TEXT_X,
                (height * 3 / 4) as i32,
                scale,
                font,
                &line2,
            );
        }
    }
}

pub fn load_font(path: &Path) -> Result<FontVec> {
    let bytes =
        std::fs::read(path).with_context(|| format!("read font {}", path.display()))?;
    FontVec::try_from_vec(bytes).map_err(|_| anyhow!("invalid font file {}", path.display()))
}

fn class_color(class_name: &str) -> Rgb<u8> {
    if class_name.ends_with("_OK") {
        OK_COLOR
    } else {
        NOK_COLOR
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::BoundingBox;

    fn blank() -> RgbImage {
        RgbImage::new(100, 100)
    }

    fn render(detections: &[Detection]) -> RgbImage {
        let mut image = blank();
        Overlay::new().render(
            &mut image,
            detections,
            &LineConfig::default(),
            Counts::default(),
        );
        image
    }

    #[test]
    fn draws_counting_line_and_separator() {
        let image = render(&[]);
        assert_eq!(image.get_pixel(50, 10), &LINE_COLOR);
        assert_eq!(image.get_pixel(51, 90), &LINE_COLOR);
        assert_eq!(image.get_pixel(10, 50), &SEPARATOR_COLOR);
        assert_eq!(image.get_pixel(10, 51), &SEPARATOR_COLOR);
        assert_eq!(image.get_pixel(10, 10), &Rgb([0, 0, 0]));
    }

    #[test]
    fn ok_parts_are_green_and_others_red() {
        let bbox = BoundingBox::new(20.0, 60.0, 40.0, 80.0);
        let ok = render(&[Detection::new(1, "bracket_OK", bbox)]);
        assert_eq!(ok.get_pixel(20, 70), &OK_COLOR);

        let nok = render(&[Detection::new(1, "bracket_NOK", bbox)]);
        assert_eq!(nok.get_pixel(20, 70), &NOK_COLOR);
        assert_eq!(nok.get_pixel(30, 70), &Rgb([0, 0, 0]));
    }

    #[test]
    fn label_bar_sits_above_box_without_font() {
        let bbox = BoundingBox::new(20.0, 60.0, 40.0, 80.0);
        let image = render(&[Detection::new(3, "bracket_OK", bbox)]);
        assert_eq!(image.get_pixel(25, 45), &OK_COLOR);
        assert_eq!(image.get_pixel(25, 55), &Rgb([0, 0, 0]));
    }

    #[test]
    fn incomplete_detections_are_not_drawn() {
        let detection = Detection {
            bbox: Some(BoundingBox::new(20.0, 60.0, 40.0, 80.0)),
            ..Detection::default()
        };
        let image = render(&[detection]);
        assert_eq!(image.get_pixel(20, 70), &Rgb([0, 0, 0]));
    }

    #[test]
    fn missing_font_file_is_an_error() {
        assert!(Overlay::load(Some(Path::new("/nonexistent/font.ttf"))).is_err());
        assert!(!Overlay::load(None).map(|o| o.has_font()).unwrap_or(true));
    }
}

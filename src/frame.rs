//! Decoded video frames.
//!
//! - `Frame`: an owned RGB image plus its position in the source it came from.
//! - `letterbox`: aspect-preserving resize onto a fixed output canvas.

use anyhow::{anyhow, Result};
use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};

use crate::geometry::FrameDims;

/// One decoded RGB frame.
///
/// `index` is the zero-based position of the frame within its source. Replay
/// sources restart it at zero when they loop.
#[derive(Clone, Debug, PartialEq)]
pub struct Frame {
    image: RgbImage,
    index: u64,
}

impl Frame {
    pub fn new(image: RgbImage, index: u64) -> Self {
        Self { image, index }
    }

    /// Wraps a tightly packed RGB24 buffer.
    pub fn from_rgb(pixels: Vec<u8>, width: u32, height: u32, index: u64) -> Result<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(3))
            .ok_or_else(|| anyhow!("RGB frame dimensions overflow"))?;
        if pixels.len() != expected {
            return Err(anyhow!(
                "RGB frame length mismatch: expected {}, got {}",
                expected,
                pixels.len()
            ));
        }
        let image = RgbImage::from_raw(width, height, pixels)
            .ok_or_else(|| anyhow!("RGB buffer does not fit {}x{}", width, height))?;
        Ok(Self { image, index })
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn dims(&self) -> FrameDims {
        FrameDims::new(self.image.width(), self.image.height())
    }

    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    pub fn into_image(self) -> RgbImage {
        self.image
    }

    pub fn pixels(&self) -> &[u8] {
        self.image.as_raw()
    }
}

/// Resizes `image` to fit `target_width` x `target_height` without distortion,
/// centering it on a black canvas.
pub fn letterbox(image: &RgbImage, target_width: u32, target_height: u32) -> RgbImage {
    let mut canvas = RgbImage::from_pixel(target_width, target_height, Rgb([0, 0, 0]));
    if image.width() == 0 || image.height() == 0 || target_width == 0 || target_height == 0 {
        return canvas;
    }
    if image.width() == target_width && image.height() == target_height {
        return image.clone();
    }

    let source_ratio = image.width() as f64 / image.height() as f64;
    let target_ratio = target_width as f64 / target_height as f64;
    let (new_width, new_height) = if source_ratio > target_ratio {
        let h = (target_width as f64 / source_ratio) as u32;
        (target_width, h.clamp(1, target_height))
    } else {
        let w = (target_height as f64 * source_ratio) as u32;
        (w.clamp(1, target_width), target_height)
    };

    let resized = imageops::resize(image, new_width, new_height, FilterType::Triangle);
    let left = (target_width - new_width) / 2;
    let top = (target_height - new_height) / 2;
    imageops::replace(&mut canvas, &resized, left as i64, top as i64);
    canvas
}

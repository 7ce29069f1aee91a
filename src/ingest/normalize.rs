#![cfg_attr(not(feature = "ingest-v4l2"), allow(dead_code))]

use anyhow::{anyhow, Context, Result};

use crate::frame::Frame;

/// Capture formats a device may hand back, in order of preference.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum PixelFormat {
    Mjpeg,
    Yuyv,
    Rgb24,
}

impl PixelFormat {
    pub(crate) fn from_fourcc(fourcc: &[u8; 4]) -> Option<Self> {
        match fourcc {
            b"MJPG" => Some(Self::Mjpeg),
            b"YUYV" => Some(Self::Yuyv),
            b"RGB3" => Some(Self::Rgb24),
            _ => None,
        }
    }
}

/// Converts one captured buffer into an RGB frame.
pub(crate) fn normalize_to_frame(
    buf: &[u8],
    width: u32,
    height: u32,
    format: PixelFormat,
    index: u64,
) -> Result<Frame> {
    match format {
        PixelFormat::Mjpeg => {
            let decoded = image::load_from_memory_with_format(buf, image::ImageFormat::Jpeg)
                .context("decode mjpeg frame")?;
            Ok(Frame::new(decoded.to_rgb8(), index))
        }
        PixelFormat::Yuyv => Frame::from_rgb(yuyv_to_rgb(buf, width, height)?, width, height, index),
        PixelFormat::Rgb24 => Frame::from_rgb(buf.to_vec(), width, height, index),
    }
}

fn yuyv_to_rgb(pixels: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
    let w = width as usize;
    let h = height as usize;
    let expected = w
        .checked_mul(h)
        .and_then(|v| v.checked_mul(2))
        .ok_or_else(|| anyhow!("YUYV frame dimensions overflow"))?;
    if pixels.len() < expected || w % 2 != 0 {
        return Err(anyhow!(
            "YUYV frame length mismatch: expected {} for {}x{}, got {}",
            expected,
            width,
            height,
            pixels.len()
        ));
    }

    let mut rgb = Vec::with_capacity(w * h * 3);
    for chunk in pixels[..expected].chunks_exact(4) {
        let u = chunk[1] as f32 - 128.0;
        let v = chunk[3] as f32 - 128.0;
        for y in [chunk[0] as f32, chunk[2] as f32] {
            rgb.push(clamp_to_u8(y + 1.402_f32 * v));
            rgb.push(clamp_to_u8(y - 0.344_136_f32 * u - 0.714_136_f32 * v));
            rgb.push(clamp_to_u8(y + 1.772_f32 * u));
        }
    }
    Ok(rgb)
}

fn clamp_to_u8(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}

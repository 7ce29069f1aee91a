//! Frame sources.
//!
//! Two kinds of source feed the frame pacer:
//! - Live capture devices (`LiveSource`; V4L2 behind feature `ingest-v4l2`)
//! - Replay files that loop on exhaustion (`ReplaySource`; FFmpeg behind
//!   feature `ingest-file-ffmpeg`)
//!
//! Both accept `stub://` locations, which produce deterministic synthetic
//! frames for tests and demos. Sources decode to RGB `Frame`s and do no
//! pacing of their own; cadence is owned by `FramePacer`.

pub mod live;
mod normalize;
pub mod replay;
#[cfg(feature = "ingest-file-ffmpeg")]
pub(crate) mod replay_ffmpeg;

pub use live::{LiveConfig, LiveSource};
pub use replay::{ReplayConfig, ReplaySource};

use crate::frame::Frame;

pub(crate) const STUB_SCHEME: &str = "stub://";

/// Synthetic RGB frame whose pixels depend only on size and `index`.
pub(crate) fn synthetic_frame(width: u32, height: u32, index: u64) -> Frame {
    let pixel_count = (width as usize) * (height as usize) * 3;
    let mut pixels = vec![0u8; pixel_count];
    let shift = index.wrapping_mul(7);
    for (i, pixel) in pixels.iter_mut().enumerate() {
        *pixel = ((i as u64).wrapping_add(shift) % 256) as u8;
    }
    let image = image::RgbImage::from_raw(width, height, pixels)
        .unwrap_or_else(|| image::RgbImage::new(width, height));
    Frame::new(image, index)
}

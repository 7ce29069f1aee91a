//! Replay (file-backed) frame source.
//!
//! `ReplaySource` reads a finite local video and can be rewound to its first
//! frame. Looping policy lives in the frame pacer; the source only reports
//! end of stream by returning `None`.

use anyhow::{anyhow, Result};

use super::{synthetic_frame, STUB_SCHEME};
#[cfg(feature = "ingest-file-ffmpeg")]
use super::replay_ffmpeg::FfmpegReplaySource;
use crate::frame::Frame;

/// Configuration for a replay source.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReplayConfig {
    /// Local file path, or `stub://<name>` for a synthetic clip.
    pub path: String,
    /// Length of the synthetic clip in frames (`stub://` only).
    pub synthetic_frames: u64,
    /// Synthetic frame width (`stub://` only).
    pub width: u32,
    /// Synthetic frame height (`stub://` only).
    pub height: u32,
}

impl ReplayConfig {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            path: String::new(),
            synthetic_frames: 250,
            width: 640,
            height: 360,
        }
    }
}

pub struct ReplaySource {
    backend: ReplayBackend,
}

enum ReplayBackend {
    Synthetic(SyntheticReplaySource),
    #[cfg(feature = "ingest-file-ffmpeg")]
    Ffmpeg(FfmpegReplaySource),
}

impl ReplaySource {
    pub fn new(config: ReplayConfig) -> Result<Self> {
        if !is_local_file_path(&config.path) {
            return Err(anyhow!(
                "replay only supports local paths (no URL schemes), got '{}'",
                config.path
            ));
        }
        if config.path.starts_with(STUB_SCHEME) {
            Ok(Self {
                backend: ReplayBackend::Synthetic(SyntheticReplaySource::new(config)),
            })
        } else {
            #[cfg(feature = "ingest-file-ffmpeg")]
            {
                Ok(Self {
                    backend: ReplayBackend::Ffmpeg(FfmpegReplaySource::new(config)?),
                })
            }
            #[cfg(not(feature = "ingest-file-ffmpeg"))]
            {
                Err(anyhow!(
                    "file replay requires the ingest-file-ffmpeg feature"
                ))
            }
        }
    }

    /// Open a replay source ready to read.
    pub fn open(config: ReplayConfig) -> Result<Self> {
        let mut source = Self::new(config)?;
        source.connect()?;
        Ok(source)
    }

    pub fn connect(&mut self) -> Result<()> {
        match &mut self.backend {
            ReplayBackend::Synthetic(source) => source.connect(),
            #[cfg(feature = "ingest-file-ffmpeg")]
            ReplayBackend::Ffmpeg(source) => source.connect(),
        }
    }

    /// Read the next frame, or `None` at end of stream.
    pub fn read(&mut self) -> Result<Option<Frame>> {
        match &mut self.backend {
            ReplayBackend::Synthetic(source) => Ok(source.read()),
            #[cfg(feature = "ingest-file-ffmpeg")]
            ReplayBackend::Ffmpeg(source) => source.read(),
        }
    }

    /// Seek back to the first frame.
    pub fn rewind(&mut self) -> Result<()> {
        match &mut self.backend {
            ReplayBackend::Synthetic(source) => {
                source.rewind();
                Ok(())
            }
            #[cfg(feature = "ingest-file-ffmpeg")]
            ReplayBackend::Ffmpeg(source) => source.rewind(),
        }
    }

    /// Close the source. Never fails.
    pub fn release(self) {
        let stats = self.stats();
        log::info!(
            "ReplaySource: released {} after {} frames ({} loops)",
            stats.path,
            stats.frames_read,
            stats.loops
        );
    }

    pub fn stats(&self) -> ReplayStats {
        match &self.backend {
            ReplayBackend::Synthetic(source) => source.stats(),
            #[cfg(feature = "ingest-file-ffmpeg")]
            ReplayBackend::Ffmpeg(source) => source.stats(),
        }
    }
}

/// Statistics for a replay source.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReplayStats {
    pub frames_read: u64,
    pub loops: u64,
    pub path: String,
}

// ----------------------------------------------------------------------------
// Synthetic source (stub://) for tests
// ----------------------------------------------------------------------------

struct SyntheticReplaySource {
    config: ReplayConfig,
    position: u64,
    frames_read: u64,
    loops: u64,
}

impl SyntheticReplaySource {
    fn new(config: ReplayConfig) -> Self {
        Self {
            config,
            position: 0,
            frames_read: 0,
            loops: 0,
        }
    }

    fn connect(&mut self) -> Result<()> {
        log::info!(
            "ReplaySource: opened {} (synthetic, {} frames)",
            self.config.path,
            self.config.synthetic_frames
        );
        Ok(())
    }

    fn read(&mut self) -> Option<Frame> {
        if self.position >= self.config.synthetic_frames {
            return None;
        }
        let frame = synthetic_frame(self.config.width, self.config.height, self.position);
        self.position += 1;
        self.frames_read += 1;
        Some(frame)
    }

    fn rewind(&mut self) {
        self.position = 0;
        self.loops += 1;
    }

    fn stats(&self) -> ReplayStats {
        ReplayStats {
            frames_read: self.frames_read,
            loops: self.loops,
            path: self.config.path.clone(),
        }
    }
}

fn is_local_file_path(path: &str) -> bool {
    if path.trim().is_empty() {
        return false;
    }
    if path.starts_with(STUB_SCHEME) {
        return true;
    }
    !path.contains("://")
}

//! Live capture source.
//!
//! `LiveSource` reads frames from a local capture device. Real devices go
//! through V4L2 (feature `ingest-v4l2`); `stub://` devices produce an endless
//! synthetic feed.

use anyhow::{anyhow, Result};
#[cfg(feature = "ingest-v4l2")]
use anyhow::Context;
#[cfg(feature = "ingest-v4l2")]
use ouroboros::self_referencing;
#[cfg(feature = "ingest-v4l2")]
use std::time::{Duration, Instant};

#[cfg(feature = "ingest-v4l2")]
use super::normalize::{normalize_to_frame, PixelFormat};
use super::{synthetic_frame, STUB_SCHEME};
use crate::frame::Frame;

/// Configuration for a live capture source.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LiveConfig {
    /// Device path (e.g., "/dev/video0"), or `stub://<name>`.
    pub device: String,
    /// Frame rate requested from the device. Best effort.
    pub target_fps: u32,
    /// Preferred frame width.
    pub width: u32,
    /// Preferred frame height.
    pub height: u32,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            device: "/dev/video0".to_string(),
            target_fps: 25,
            width: 640,
            height: 480,
        }
    }
}

pub struct LiveSource {
    backend: LiveBackend,
}

enum LiveBackend {
    Synthetic(SyntheticLiveSource),
    #[cfg(feature = "ingest-v4l2")]
    Device(DeviceLiveSource),
}

impl LiveSource {
    pub fn new(config: LiveConfig) -> Result<Self> {
        if config.device.starts_with(STUB_SCHEME) {
            return Ok(Self {
                backend: LiveBackend::Synthetic(SyntheticLiveSource::new(config)),
            });
        }
        #[cfg(feature = "ingest-v4l2")]
        {
            Ok(Self {
                backend: LiveBackend::Device(DeviceLiveSource::new(config)),
            })
        }
        #[cfg(not(feature = "ingest-v4l2"))]
        {
            Err(anyhow!(
                "live capture of '{}' requires the ingest-v4l2 feature",
                config.device
            ))
        }
    }

    /// Create and connect in one step.
    pub fn open(config: LiveConfig) -> Result<Self> {
        let mut source = Self::new(config)?;
        source.connect()?;
        Ok(source)
    }

    pub fn connect(&mut self) -> Result<()> {
        match &mut self.backend {
            LiveBackend::Synthetic(source) => source.connect(),
            #[cfg(feature = "ingest-v4l2")]
            LiveBackend::Device(source) => source.connect(),
        }
    }

    /// Capture the next frame.
    pub fn read(&mut self) -> Result<Frame> {
        match &mut self.backend {
            LiveBackend::Synthetic(source) => source.read(),
            #[cfg(feature = "ingest-v4l2")]
            LiveBackend::Device(source) => source.read(),
        }
    }

    /// Close the device. Never fails.
    pub fn release(self) {
        let stats = self.stats();
        log::info!(
            "LiveSource: released {} after {} frames",
            stats.device,
            stats.frames_captured
        );
    }

    pub fn is_healthy(&self) -> bool {
        match &self.backend {
            LiveBackend::Synthetic(_) => true,
            #[cfg(feature = "ingest-v4l2")]
            LiveBackend::Device(source) => source.is_healthy(),
        }
    }

    pub fn stats(&self) -> LiveStats {
        match &self.backend {
            LiveBackend::Synthetic(source) => source.stats(),
            #[cfg(feature = "ingest-v4l2")]
            LiveBackend::Device(source) => source.stats(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LiveStats {
    pub frames_captured: u64,
    pub device: String,
}

// ----------------------------------------------------------------------------
// Synthetic source (stub://)
// ----------------------------------------------------------------------------

struct SyntheticLiveSource {
    config: LiveConfig,
    connected: bool,
    frame_count: u64,
}

impl SyntheticLiveSource {
    fn new(config: LiveConfig) -> Self {
        Self {
            config,
            connected: false,
            frame_count: 0,
        }
    }

    fn connect(&mut self) -> Result<()> {
        self.connected = true;
        log::info!("LiveSource: connected to {} (synthetic)", self.config.device);
        Ok(())
    }

    fn read(&mut self) -> Result<Frame> {
        if !self.connected {
            return Err(anyhow!("live source {} not connected", self.config.device));
        }
        let frame = synthetic_frame(self.config.width, self.config.height, self.frame_count);
        self.frame_count += 1;
        Ok(frame)
    }

    fn stats(&self) -> LiveStats {
        LiveStats {
            frames_captured: self.frame_count,
            device: self.config.device.clone(),
        }
    }
}

// ----------------------------------------------------------------------------
// V4L2 device source
// ----------------------------------------------------------------------------

#[cfg(feature = "ingest-v4l2")]
struct DeviceLiveSource {
    config: LiveConfig,
    state: Option<DeviceState>,
    format: PixelFormat,
    frame_count: u64,
    last_frame_at: Option<Instant>,
    last_error: Option<String>,
    active_width: u32,
    active_height: u32,
}

#[cfg(feature = "ingest-v4l2")]
#[self_referencing]
struct DeviceState {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

#[cfg(feature = "ingest-v4l2")]
impl DeviceLiveSource {
    fn new(config: LiveConfig) -> Self {
        Self {
            active_width: config.width,
            active_height: config.height,
            config,
            state: None,
            format: PixelFormat::Mjpeg,
            frame_count: 0,
            last_frame_at: None,
            last_error: None,
        }
    }

    fn connect(&mut self) -> Result<()> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let mut device = v4l::Device::with_path(&self.config.device)
            .with_context(|| format!("open v4l2 device {}", self.config.device))?;
        let mut format = device.format().context("read v4l2 format")?;
        format.width = self.config.width;
        format.height = self.config.height;
        format.fourcc = v4l::FourCC::new(b"MJPG");

        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!(
                    "LiveSource: failed to set MJPG format on {}: {}",
                    self.config.device,
                    err
                );
                device
                    .format()
                    .context("read v4l2 format after set failure")?
            }
        };

        self.format = PixelFormat::from_fourcc(&format.fourcc.repr).ok_or_else(|| {
            anyhow!(
                "unsupported v4l2 pixel format {} on {}",
                format.fourcc,
                self.config.device
            )
        })?;

        if self.config.target_fps > 0 {
            let params = v4l::video::capture::Parameters::with_fps(self.config.target_fps);
            if let Err(err) = device.set_params(&params) {
                log::warn!(
                    "LiveSource: failed to set fps on {}: {}",
                    self.config.device,
                    err
                );
            }
        }

        self.active_width = format.width;
        self.active_height = format.height;
        self.last_error = None;

        let state = DeviceStateBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, 4)
                    .map_err(|err| anyhow::Error::new(err).context("create v4l2 buffer stream"))
            },
        }
        .try_build()
        .map_err(|err| {
            self.last_error = Some(err.to_string());
            err
        })?;
        self.state = Some(state);

        log::info!(
            "LiveSource: connected to {} ({}x{}, {:?})",
            self.config.device,
            self.active_width,
            self.active_height,
            self.format
        );
        Ok(())
    }

    fn read(&mut self) -> Result<Frame> {
        use v4l::io::traits::CaptureStream;

        let state = self.state.as_mut().context("v4l2 device not connected")?;
        let buf = state
            .with_mut(|fields| fields.stream.next().map(|(buf, _meta)| buf.to_vec()))
            .map_err(|err| {
                self.last_error = Some(err.to_string());
                anyhow::Error::new(err).context("capture v4l2 frame")
            })?;

        let frame = normalize_to_frame(
            &buf,
            self.active_width,
            self.active_height,
            self.format,
            self.frame_count,
        )?;
        self.frame_count += 1;
        self.last_frame_at = Some(Instant::now());
        Ok(frame)
    }

    fn is_healthy(&self) -> bool {
        if self.last_error.is_some() {
            return false;
        }
        let Some(last_frame_at) = self.last_frame_at else {
            return true;
        };
        last_frame_at.elapsed() <= self.health_grace()
    }

    fn stats(&self) -> LiveStats {
        LiveStats {
            frames_captured: self.frame_count,
            device: self.config.device.clone(),
        }
    }

    fn health_grace(&self) -> Duration {
        let base_ms = if self.config.target_fps == 0 {
            2_000
        } else {
            (1000 / self.config.target_fps).saturating_mul(6)
        };
        Duration::from_millis(base_ms.max(2_000) as u64)
    }
}

use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::counter::{CounterSettings, LineConfig, DEFAULT_LINE_X, DEFAULT_ZONE_SPLIT_Y};
use crate::detect::TrackerKind;
use crate::ingest::{LiveConfig, ReplayConfig};
use crate::pacer::PacerConfig;
use crate::pipeline::OutputSettings;

const DEFAULT_API_ADDR: &str = "127.0.0.1:8080";
const DEFAULT_UPLOAD_PATH: &str = "/tmp/part_counter_upload.mp4";
const DEFAULT_MAX_UPLOAD_BYTES: u64 = 512 * 1024 * 1024;
const DEFAULT_LIVE_DEVICE: &str = "/dev/video0";
const DEFAULT_LIVE_WIDTH: u32 = 640;
const DEFAULT_LIVE_HEIGHT: u32 = 480;
const DEFAULT_TARGET_FPS: u32 = 25;
const DEFAULT_OUTPUT_WIDTH: u32 = 1020;
const DEFAULT_OUTPUT_HEIGHT: u32 = 600;
const DEFAULT_JPEG_QUALITY: u8 = 85;
const DEFAULT_SYNTHETIC_FRAMES: u64 = 250;
const DEFAULT_MAX_IDLE_FRAMES: u64 = 250;
const DEFAULT_TRACKER_CLASSES: [&str; 2] = ["part_OK", "part_NOK"];

#[derive(Debug, Deserialize, Default)]
struct CounterConfigFile {
    api: Option<ApiConfigFile>,
    line: Option<LineConfigFile>,
    live: Option<LiveConfigFile>,
    pacing: Option<PacingConfigFile>,
    output: Option<OutputConfigFile>,
    replay: Option<ReplayConfigFile>,
    bom: Option<BomConfigFile>,
    tracking: Option<TrackingConfigFile>,
    overlay: Option<OverlayConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct ApiConfigFile {
    addr: Option<String>,
    upload_path: Option<PathBuf>,
    max_upload_bytes: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct LineConfigFile {
    x: Option<f32>,
    zone_split_y: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct LiveConfigFile {
    device: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct PacingConfigFile {
    target_fps: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct OutputConfigFile {
    width: Option<u32>,
    height: Option<u32>,
    jpeg_quality: Option<u8>,
}

#[derive(Debug, Deserialize, Default)]
struct ReplayConfigFile {
    path: Option<String>,
    synthetic_frames: Option<u64>,
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct BomConfigFile {
    path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
struct TrackingConfigFile {
    backend: Option<String>,
    classes: Option<Vec<String>>,
    script_path: Option<PathBuf>,
    max_idle_frames: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct OverlayConfigFile {
    font_path: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct CounterConfig {
    pub api: ApiSettings,
    pub line: LineConfig,
    pub live: LiveConfig,
    pub target_fps: u32,
    pub output: OutputSettings,
    pub replay: ReplaySettings,
    pub bom_path: Option<PathBuf>,
    pub tracking: TrackingSettings,
    pub font_path: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct ApiSettings {
    pub addr: String,
    pub upload_path: PathBuf,
    pub max_upload_bytes: u64,
}

/// Replay started at boot, and sizing for synthetic (`stub://`) clips.
#[derive(Debug, Clone)]
pub struct ReplaySettings {
    pub initial_path: Option<String>,
    pub synthetic_frames: u64,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone)]
pub struct TrackingSettings {
    pub kind: TrackerKind,
    pub max_idle_frames: u64,
}

impl CounterConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("PART_COUNTER_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(Path::new(path))?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: CounterConfigFile) -> Result<Self> {
        let api = ApiSettings {
            addr: file
                .api
                .as_ref()
                .and_then(|api| api.addr.clone())
                .unwrap_or_else(|| DEFAULT_API_ADDR.to_string()),
            upload_path: file
                .api
                .as_ref()
                .and_then(|api| api.upload_path.clone())
                .unwrap_or_else(|| PathBuf::from(DEFAULT_UPLOAD_PATH)),
            max_upload_bytes: file
                .api
                .and_then(|api| api.max_upload_bytes)
                .unwrap_or(DEFAULT_MAX_UPLOAD_BYTES),
        };
        let line = LineConfig {
            line_x: file
                .line
                .as_ref()
                .and_then(|line| line.x)
                .unwrap_or(DEFAULT_LINE_X),
            zone_split_y: file
                .line
                .and_then(|line| line.zone_split_y)
                .unwrap_or(DEFAULT_ZONE_SPLIT_Y),
        };
        let target_fps = file
            .pacing
            .and_then(|pacing| pacing.target_fps)
            .unwrap_or(DEFAULT_TARGET_FPS);
        let live = LiveConfig {
            device: file
                .live
                .as_ref()
                .and_then(|live| live.device.clone())
                .unwrap_or_else(|| DEFAULT_LIVE_DEVICE.to_string()),
            target_fps,
            width: file
                .live
                .as_ref()
                .and_then(|live| live.width)
                .unwrap_or(DEFAULT_LIVE_WIDTH),
            height: file
                .live
                .and_then(|live| live.height)
                .unwrap_or(DEFAULT_LIVE_HEIGHT),
        };
        let output = OutputSettings {
            width: file
                .output
                .as_ref()
                .and_then(|output| output.width)
                .unwrap_or(DEFAULT_OUTPUT_WIDTH),
            height: file
                .output
                .as_ref()
                .and_then(|output| output.height)
                .unwrap_or(DEFAULT_OUTPUT_HEIGHT),
            jpeg_quality: file
                .output
                .and_then(|output| output.jpeg_quality)
                .unwrap_or(DEFAULT_JPEG_QUALITY),
        };
        let replay = ReplaySettings {
            initial_path: file.replay.as_ref().and_then(|replay| replay.path.clone()),
            synthetic_frames: file
                .replay
                .as_ref()
                .and_then(|replay| replay.synthetic_frames)
                .unwrap_or(DEFAULT_SYNTHETIC_FRAMES),
            width: file
                .replay
                .as_ref()
                .and_then(|replay| replay.width)
                .unwrap_or(DEFAULT_LIVE_WIDTH),
            height: file
                .replay
                .and_then(|replay| replay.height)
                .unwrap_or(DEFAULT_LIVE_HEIGHT),
        };
        let bom_path = file.bom.and_then(|bom| bom.path);
        let tracking = tracking_from_file(file.tracking.unwrap_or_default())?;
        let font_path = file.overlay.and_then(|overlay| overlay.font_path);

        Ok(Self {
            api,
            line,
            live,
            target_fps,
            output,
            replay,
            bom_path,
            tracking,
            font_path,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(addr) = std::env::var("PART_COUNTER_API_ADDR") {
            if !addr.trim().is_empty() {
                self.api.addr = addr;
            }
        }
        if let Ok(device) = std::env::var("PART_COUNTER_LIVE_DEVICE") {
            if !device.trim().is_empty() {
                self.live.device = device;
            }
        }
        if let Ok(path) = std::env::var("PART_COUNTER_BOM_PATH") {
            if !path.trim().is_empty() {
                self.bom_path = Some(PathBuf::from(path));
            }
        }
        if let Ok(path) = std::env::var("PART_COUNTER_UPLOAD_PATH") {
            if !path.trim().is_empty() {
                self.api.upload_path = PathBuf::from(path);
            }
        }
        if let Ok(path) = std::env::var("PART_COUNTER_FONT_PATH") {
            if !path.trim().is_empty() {
                self.font_path = Some(PathBuf::from(path));
            }
        }
        if let Ok(fps) = std::env::var("PART_COUNTER_TARGET_FPS") {
            let fps: u32 = fps
                .trim()
                .parse()
                .map_err(|_| anyhow!("PART_COUNTER_TARGET_FPS must be a non-negative integer"))?;
            self.target_fps = fps;
            self.live.target_fps = fps;
        }
        if let Ok(classes) = std::env::var("PART_COUNTER_TRACKER_CLASSES") {
            let parsed = split_csv(&classes);
            if !parsed.is_empty() {
                if let TrackerKind::Stub { classes } = &mut self.tracking.kind {
                    *classes = parsed;
                }
            }
        }
        if let Ok(x) = std::env::var("PART_COUNTER_LINE_X") {
            self.line.line_x = parse_fraction("PART_COUNTER_LINE_X", &x)?;
        }
        if let Ok(y) = std::env::var("PART_COUNTER_ZONE_SPLIT_Y") {
            self.line.zone_split_y = parse_fraction("PART_COUNTER_ZONE_SPLIT_Y", &y)?;
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        self.line.validate()?;
        if self.api.addr.trim().is_empty() {
            return Err(anyhow!("api addr must not be empty"));
        }
        if self.api.max_upload_bytes == 0 {
            return Err(anyhow!("max_upload_bytes must be greater than zero"));
        }
        if self.output.width == 0 || self.output.height == 0 {
            return Err(anyhow!("output size must be non-zero"));
        }
        if !(1..=100).contains(&self.output.jpeg_quality) {
            return Err(anyhow!("jpeg_quality must be between 1 and 100"));
        }
        if self.live.device.trim().is_empty() {
            return Err(anyhow!("live device must not be empty"));
        }
        if let TrackerKind::Stub { classes } = &self.tracking.kind {
            for class in classes {
                crate::bom::validate_class_label(class)?;
            }
        }
        Ok(())
    }

    pub fn pacer_config(&self) -> PacerConfig {
        PacerConfig {
            target_fps: self.target_fps,
            live: self.live.clone(),
        }
    }

    /// Replay settings for `path`, sized from the `replay` section.
    pub fn replay_config(&self, path: impl Into<String>) -> ReplayConfig {
        ReplayConfig {
            path: path.into(),
            synthetic_frames: self.replay.synthetic_frames,
            width: self.replay.width,
            height: self.replay.height,
        }
    }

    pub fn counter_settings(&self) -> CounterSettings {
        CounterSettings {
            max_idle_frames: self.tracking.max_idle_frames,
        }
    }
}

fn tracking_from_file(file: TrackingConfigFile) -> Result<TrackingSettings> {
    let max_idle_frames = file.max_idle_frames.unwrap_or(DEFAULT_MAX_IDLE_FRAMES);
    let kind = match file.backend.as_deref().unwrap_or("stub") {
        "stub" => TrackerKind::Stub {
            classes: file.classes.unwrap_or_else(|| {
                DEFAULT_TRACKER_CLASSES
                    .iter()
                    .map(|class| class.to_string())
                    .collect()
            }),
        },
        "scripted" => TrackerKind::Scripted {
            path: file
                .script_path
                .ok_or_else(|| anyhow!("tracking.script_path is required for the scripted backend"))?,
        },
        other => return Err(anyhow!("unknown tracking backend '{}'", other)),
    };
    Ok(TrackingSettings {
        kind,
        max_idle_frames,
    })
}

fn read_config_file(path: &Path) -> Result<CounterConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

fn parse_fraction(name: &str, value: &str) -> Result<f32> {
    value
        .trim()
        .parse::<f32>()
        .map_err(|_| anyhow!("{} must be a number between 0 and 1", name))
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.to_string())
        .collect()
}

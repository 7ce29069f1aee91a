//! Line-crossing counter.
//!
//! `LineCounter` consumes one detection batch per processed frame and counts
//! each track at most once when its center reaches or passes the vertical
//! counting line. Crossings above the horizontal zone split go to `line1`,
//! everything else to `line2`.
//!
//! Per detection the order is fixed: check the crossing against the stored
//! position from the previous frame, then overwrite the stored position.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::bom::PartCatalog;
use crate::detect::Detection;
use crate::geometry::{crosses_vertical_line, FrameDims, Point};
use crate::report::CrossingSink;
use crate::tracking::TrackHistory;

pub const DEFAULT_LINE_X: f32 = 0.5;
pub const DEFAULT_ZONE_SPLIT_Y: f32 = 0.5;

/// Position of the counting line and the zone split, as fractions of the frame.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct LineConfig {
    /// Vertical counting line, fraction of frame width.
    pub line_x: f32,
    /// Horizontal zone separator, fraction of frame height.
    pub zone_split_y: f32,
}

impl LineConfig {
    pub fn new(line_x: f32, zone_split_y: f32) -> Result<Self> {
        let cfg = Self {
            line_x,
            zone_split_y,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.line_x) {
            return Err(anyhow!("line_x must be within [0, 1], got {}", self.line_x));
        }
        if !(0.0..=1.0).contains(&self.zone_split_y) {
            return Err(anyhow!(
                "zone_split_y must be within [0, 1], got {}",
                self.zone_split_y
            ));
        }
        Ok(())
    }

    pub fn zone_for(&self, position: Point) -> Zone {
        if position.y < self.zone_split_y {
            Zone::Line1
        } else {
            Zone::Line2
        }
    }
}

impl Default for LineConfig {
    fn default() -> Self {
        Self {
            line_x: DEFAULT_LINE_X,
            zone_split_y: DEFAULT_ZONE_SPLIT_Y,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Zone {
    Line1,
    Line2,
}

impl Zone {
    pub fn as_str(&self) -> &'static str {
        match self {
            Zone::Line1 => "line1",
            Zone::Line2 => "line2",
        }
    }
}

/// Snapshot of both zone counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counts {
    pub line1: u64,
    pub line2: u64,
}

impl Counts {
    pub fn total(&self) -> u64 {
        self.line1 + self.line2
    }

    pub fn get(&self, zone: Zone) -> u64 {
        match zone {
            Zone::Line1 => self.line1,
            Zone::Line2 => self.line2,
        }
    }

    fn increment(&mut self, zone: Zone) {
        match zone {
            Zone::Line1 => self.line1 += 1,
            Zone::Line2 => self.line2 += 1,
        }
    }
}

/// A counted crossing, handed to the reporting sink.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CrossingEvent {
    pub track_id: u64,
    pub class_name: String,
    pub zone: Zone,
    pub position: Point,
    pub frame_index: u64,
}

/// Counter settings beyond the line geometry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CounterSettings {
    /// Drop history for tracks unseen for this many processed frames. `0` keeps everything.
    pub max_idle_frames: u64,
}

impl Default for CounterSettings {
    fn default() -> Self {
        Self {
            max_idle_frames: 250,
        }
    }
}

pub struct LineCounter {
    config: LineConfig,
    settings: CounterSettings,
    catalog: PartCatalog,
    sink: Box<dyn CrossingSink>,
    history: TrackHistory,
    counted: HashSet<u64>,
    counts: Counts,
    frames_processed: u64,
}

impl LineCounter {
    pub fn new(config: LineConfig, catalog: PartCatalog, sink: Box<dyn CrossingSink>) -> Self {
        Self {
            config,
            settings: CounterSettings::default(),
            catalog,
            sink,
            history: TrackHistory::new(),
            counted: HashSet::new(),
            counts: Counts::default(),
            frames_processed: 0,
        }
    }

    pub fn with_settings(mut self, settings: CounterSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Applies one frame's detections and returns the resulting counts.
    ///
    /// Incomplete detections and classes outside the catalog leave no trace.
    pub fn update(&mut self, detections: &[Detection], dims: FrameDims) -> Counts {
        let frame_index = self.frames_processed;
        for detection in detections {
            let Some((track_id, class_name, bbox)) = detection.complete() else {
                log::debug!("skipping incomplete detection {:?}", detection);
                continue;
            };
            if !self.catalog.is_eligible(class_name) {
                log::debug!("skipping track {} with class '{}'", track_id, class_name);
                continue;
            }

            let current = bbox.normalized_center(dims);
            if let Some(previous) = self.history.position(track_id) {
                if crosses_vertical_line(previous, current, self.config.line_x) {
                    self.record_crossing(track_id, class_name, current, frame_index);
                }
            }
            self.history.set_position(track_id, current, frame_index);
        }

        let evicted = self
            .history
            .evict_idle(frame_index, self.settings.max_idle_frames);
        if evicted > 0 {
            log::debug!("evicted {} idle tracks from history", evicted);
        }
        self.frames_processed += 1;
        self.counts
    }

    fn record_crossing(&mut self, track_id: u64, class_name: &str, position: Point, frame_index: u64) {
        if !self.counted.insert(track_id) {
            return;
        }
        let zone = self.config.zone_for(position);
        self.counts.increment(zone);
        log::info!(
            "track {} ({}) crossed into {}; line1={} line2={}",
            track_id,
            class_name,
            zone.as_str(),
            self.counts.line1,
            self.counts.line2
        );

        let event = CrossingEvent {
            track_id,
            class_name: class_name.to_string(),
            zone,
            position,
            frame_index,
        };
        if let Err(err) = self.sink.record(&event) {
            log::warn!("crossing report failed for track {}: {}", track_id, err);
        }
    }

    pub fn counts(&self) -> Counts {
        self.counts
    }

    /// Zeroes both counts and forgets every track.
    pub fn reset(&mut self) {
        self.counted.clear();
        self.history.reset();
        self.counts = Counts::default();
        log::info!("counter reset");
    }

    pub fn config(&self) -> LineConfig {
        self.config
    }

    pub fn catalog(&self) -> &PartCatalog {
        &self.catalog
    }

    pub fn history(&self) -> &TrackHistory {
        &self.history
    }

    pub fn counted_len(&self) -> usize {
        self.counted.len()
    }

    pub fn frames_processed(&self) -> u64 {
        self.frames_processed
    }
}

/// Counter shared between the frame pipeline and request handlers.
pub type SharedCounter = Arc<Mutex<LineCounter>>;

pub fn shared(counter: LineCounter) -> SharedCounter {
    Arc::new(Mutex::new(counter))
}

pub fn lock_counter(counter: &SharedCounter) -> Result<MutexGuard<'_, LineCounter>> {
    counter
        .lock()
        .map_err(|_| anyhow!("line counter lock poisoned"))
}

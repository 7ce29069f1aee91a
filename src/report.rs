//! Crossing reporting.
//!
//! The counter hands every counted crossing to a `CrossingSink`. Reporting is
//! best effort: a sink error is logged by the counter and never undoes a count.
//!
//! `CrossingLog` is the in-memory sink behind the production view. It keeps
//! per-zone, per-class tallies and a bounded list of recent crossings.

use anyhow::{anyhow, Result};
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::bom::PartCatalog;
use crate::counter::{CrossingEvent, Zone};

/// Maximum number of crossings kept for the recent-activity list.
pub const MAX_RECENT_CROSSINGS: usize = 100;

/// Rates are computed over at least this much session time.
const MIN_RATE_WINDOW: Duration = Duration::from_secs(60);

pub trait CrossingSink: Send {
    fn record(&mut self, event: &CrossingEvent) -> Result<()>;
}

/// Sink that drops every event.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullSink;

impl CrossingSink for NullSink {
    fn record(&mut self, _event: &CrossingEvent) -> Result<()> {
        Ok(())
    }
}

/// Sink that writes every crossing to the log at `info`.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogSink;

impl CrossingSink for LogSink {
    fn record(&mut self, event: &CrossingEvent) -> Result<()> {
        log::info!(
            "crossing: track={} class={} zone={} x={:.3} y={:.3} frame={}",
            event.track_id,
            event.class_name,
            event.zone.as_str(),
            event.position.x,
            event.position.y,
            event.frame_index
        );
        Ok(())
    }
}

#[derive(Debug)]
struct LogState {
    session_started: Instant,
    tallies: BTreeMap<(Zone, String), u64>,
    recent: VecDeque<CrossingEvent>,
}

impl LogState {
    fn new() -> Self {
        Self {
            session_started: Instant::now(),
            tallies: BTreeMap::new(),
            recent: VecDeque::new(),
        }
    }
}

/// In-memory crossing log. Clones share state.
#[derive(Clone, Debug)]
pub struct CrossingLog {
    state: Arc<Mutex<LogState>>,
    catalog: PartCatalog,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PartTally {
    pub class_name: String,
    pub part_number: Option<String>,
    pub part_name: Option<String>,
    pub quantity: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ZoneSummary {
    pub quantity: u64,
    pub parts_per_hour: f64,
    pub parts: Vec<PartTally>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ProductionSummary {
    pub session_seconds: u64,
    pub line1: ZoneSummary,
    pub line2: ZoneSummary,
    pub recent: Vec<CrossingEvent>,
}

impl CrossingLog {
    /// `catalog` supplies part numbers and names for the summary.
    pub fn new(catalog: PartCatalog) -> Self {
        Self {
            state: Arc::new(Mutex::new(LogState::new())),
            catalog,
        }
    }

    pub fn events(&self) -> Vec<CrossingEvent> {
        match self.state.lock() {
            Ok(state) => state.recent.iter().cloned().collect(),
            Err(_) => Vec::new(),
        }
    }

    /// Clears all tallies and restarts the session clock.
    pub fn reset(&self) {
        let mut state = match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        *state = LogState::new();
    }

    pub fn summary(&self) -> Result<ProductionSummary> {
        self.summary_at(Instant::now())
    }

    pub fn summary_at(&self, now: Instant) -> Result<ProductionSummary> {
        let state = self
            .state
            .lock()
            .map_err(|_| anyhow!("crossing log lock poisoned"))?;
        let elapsed = now.saturating_duration_since(state.session_started);
        let rate_window = elapsed.max(MIN_RATE_WINDOW);

        let mut line1 = ZoneSummary::default();
        let mut line2 = ZoneSummary::default();
        for ((zone, class_name), quantity) in &state.tallies {
            let part = self.catalog.part_for(class_name);
            let summary = match zone {
                Zone::Line1 => &mut line1,
                Zone::Line2 => &mut line2,
            };
            summary.quantity += quantity;
            summary.parts.push(PartTally {
                class_name: class_name.clone(),
                part_number: part.as_ref().map(|p| p.number.clone()),
                part_name: part.map(|p| p.name),
                quantity: *quantity,
            });
        }
        for summary in [&mut line1, &mut line2] {
            summary.parts_per_hour = summary.quantity as f64 * 3600.0 / rate_window.as_secs_f64();
        }

        Ok(ProductionSummary {
            session_seconds: elapsed.as_secs(),
            line1,
            line2,
            recent: state.recent.iter().cloned().collect(),
        })
    }
}

impl CrossingSink for CrossingLog {
    fn record(&mut self, event: &CrossingEvent) -> Result<()> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| anyhow!("crossing log lock poisoned"))?;
        *state
            .tallies
            .entry((event.zone, event.class_name.clone()))
            .or_insert(0) += 1;
        if state.recent.len() == MAX_RECENT_CROSSINGS {
            state.recent.pop_front();
        }
        state.recent.push_back(event.clone());
        Ok(())
    }
}

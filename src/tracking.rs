//! Per-track position history.
//!
//! Holds the last normalized center seen for each tracker identity, together
//! with the frame index it was seen on so that long-running sessions can drop
//! tracks that have left the scene.

use std::collections::HashMap;

use crate::geometry::Point;

#[derive(Clone, Copy, Debug)]
struct TrackEntry {
    position: Point,
    last_seen_frame: u64,
}

/// Last known position for every track id seen this session.
#[derive(Clone, Debug, Default)]
pub struct TrackHistory {
    positions: HashMap<u64, TrackEntry>,
}

impl TrackHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_position(&self, track_id: u64) -> bool {
        self.positions.contains_key(&track_id)
    }

    pub fn position(&self, track_id: u64) -> Option<Point> {
        self.positions.get(&track_id).map(|entry| entry.position)
    }

    /// Inserts or overwrites the position for `track_id`.
    pub fn set_position(&mut self, track_id: u64, position: Point, frame_index: u64) {
        self.positions.insert(
            track_id,
            TrackEntry {
                position,
                last_seen_frame: frame_index,
            },
        );
    }

    pub fn reset(&mut self) {
        self.positions.clear();
    }

    /// Drops tracks not seen for more than `max_idle_frames` frames.
    ///
    /// `max_idle_frames == 0` disables eviction. Returns the number of entries removed.
    pub fn evict_idle(&mut self, current_frame: u64, max_idle_frames: u64) -> usize {
        if max_idle_frames == 0 {
            return 0;
        }
        let before = self.positions.len();
        self.positions.retain(|_, entry| {
            current_frame.saturating_sub(entry.last_seen_frame) <= max_idle_frames
        });
        before - self.positions.len()
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}

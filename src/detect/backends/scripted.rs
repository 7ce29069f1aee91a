use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::path::Path;

use crate::detect::backend::TrackerBackend;
use crate::detect::result::Detection;
use crate::frame::Frame;

#[derive(Debug, Deserialize)]
struct ScriptFile {
    frames: Vec<Vec<Detection>>,
}

/// Tracker that replays recorded detections keyed by frame index.
///
/// Script format: `{"frames": [[{"track_id": 1, "class_name": "x_OK", "box": [x1, y1, x2, y2]}], ...]}`.
/// Frame `n` of the source receives `frames[n]`; frames past the end receive nothing.
/// Replay sources restart at index zero when they loop, so the script loops with them.
pub struct ScriptedTracker {
    frames: Vec<Vec<Detection>>,
}

impl ScriptedTracker {
    pub fn new(frames: Vec<Vec<Detection>>) -> Self {
        Self { frames }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read detection script {}", path.display()))?;
        Self::from_json(&raw)
            .map_err(|e| anyhow!("invalid detection script {}: {}", path.display(), e))
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let script: ScriptFile = serde_json::from_str(raw)?;
        Ok(Self::new(script.frames))
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

impl TrackerBackend for ScriptedTracker {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn track(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        let index = usize::try_from(frame.index()).unwrap_or(usize::MAX);
        Ok(self.frames.get(index).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;

    #[test]
    fn replays_detections_by_frame_index() -> Result<()> {
        let mut tracker = ScriptedTracker::from_json(
            r#"{"frames": [
                [{"track_id": 1, "class_name": "a_OK", "box": [0, 0, 10, 10]}],
                [],
                [{"track_id": 1, "class_name": "a_OK", "box": [5, 0, 15, 10]},
                 {"class_name": "noise", "box": [0, 0, 1, 1]}]
            ]}"#,
        )?;
        assert_eq!(tracker.len(), 3);

        let at = |i| Frame::new(RgbImage::new(20, 20), i);
        assert_eq!(tracker.track(&at(0))?.len(), 1);
        assert!(tracker.track(&at(1))?.is_empty());
        assert_eq!(tracker.track(&at(2))?.len(), 2);
        assert!(tracker.track(&at(3))?.is_empty());
        assert_eq!(tracker.track(&at(0))?.len(), 1);
        Ok(())
    }

    #[test]
    fn rejects_malformed_script() {
        assert!(ScriptedTracker::from_json(r#"{"frames": [[{"box": [1, 2]}]]}"#).is_err());
        assert!(ScriptedTracker::from_json("not json").is_err());
    }
}

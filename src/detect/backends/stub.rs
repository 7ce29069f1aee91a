use anyhow::Result;

use crate::detect::backend::TrackerBackend;
use crate::detect::result::Detection;
use crate::frame::Frame;
use crate::geometry::BoundingBox;

/// Synthetic tracker for demos and tests.
///
/// Spawns one part every `spawn_every` calls and slides it left to right
/// across the frame. Parts alternate between the upper and lower half and
/// cycle through `classes`.
pub struct StubTracker {
    classes: Vec<String>,
    spawn_every: u64,
    travel_frames: u64,
    calls: u64,
}

impl StubTracker {
    pub fn new(classes: Vec<String>) -> Self {
        Self {
            classes,
            spawn_every: 40,
            travel_frames: 100,
            calls: 0,
        }
    }

    /// A part appears every `spawn_every` frames and needs `travel_frames` to cross.
    pub fn with_timing(mut self, spawn_every: u64, travel_frames: u64) -> Self {
        self.spawn_every = spawn_every.max(1);
        self.travel_frames = travel_frames.max(2);
        self
    }

    fn parts_at(&self, call: u64, width: f32, height: f32) -> Vec<Detection> {
        if self.classes.is_empty() {
            return Vec::new();
        }
        let box_w = (width * 0.1).max(1.0);
        let box_h = (height * 0.1).max(1.0);
        let mut detections = Vec::new();
        let first = call.saturating_sub(self.travel_frames - 1) / self.spawn_every;
        let last = call / self.spawn_every;
        for part in first..=last {
            let spawned_at = part * self.spawn_every;
            let age = call - spawned_at;
            if age >= self.travel_frames {
                continue;
            }
            let progress = age as f32 / (self.travel_frames - 1) as f32;
            let cx = progress * width;
            let cy = if part % 2 == 0 {
                height * 0.25
            } else {
                height * 0.75
            };
            let class = &self.classes[(part as usize) % self.classes.len()];
            let bbox = BoundingBox::new(
                cx - box_w / 2.0,
                cy - box_h / 2.0,
                cx + box_w / 2.0,
                cy + box_h / 2.0,
            );
            detections.push(Detection::new(part + 1, class, bbox).with_confidence(0.9));
        }
        detections
    }
}

impl Default for StubTracker {
    fn default() -> Self {
        Self::new(vec!["part_OK".to_string(), "part_NOK".to_string()])
    }
}

impl TrackerBackend for StubTracker {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn track(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        let detections = self.parts_at(self.calls, frame.width() as f32, frame.height() as f32);
        self.calls += 1;
        Ok(detections)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;

    #[test]
    fn parts_travel_left_to_right_with_stable_ids() -> Result<()> {
        let mut tracker = StubTracker::default().with_timing(1000, 11);
        let frame = Frame::new(RgbImage::new(100, 100), 0);

        let mut xs = Vec::new();
        for _ in 0..11 {
            let detections = tracker.track(&frame)?;
            assert_eq!(detections.len(), 1);
            let (id, class, bbox) = detections[0].complete().expect("complete detection");
            assert_eq!(id, 1);
            assert_eq!(class, "part_OK");
            xs.push(bbox.center_px().0);
        }

        assert!(xs.windows(2).all(|w| w[1] > w[0]));
        assert!(xs[0] <= 0.0 + f32::EPSILON);
        assert!((xs[10] - 100.0).abs() < 1e-3);
        assert!(tracker.track(&frame)?.is_empty());
        Ok(())
    }

    #[test]
    fn alternates_lanes_and_classes() -> Result<()> {
        let mut tracker = StubTracker::default().with_timing(2, 10);
        let frame = Frame::new(RgbImage::new(200, 100), 0);
        tracker.track(&frame)?;
        tracker.track(&frame)?;
        let detections = tracker.track(&frame)?;

        assert_eq!(detections.len(), 2);
        let upper = detections[0].bbox.expect("bbox").center_px().1;
        let lower = detections[1].bbox.expect("bbox").center_px().1;
        assert!(upper < 50.0);
        assert!(lower > 50.0);
        assert_eq!(detections[1].class_name.as_deref(), Some("part_NOK"));
        Ok(())
    }
}

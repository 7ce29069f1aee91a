use anyhow::Result;

use crate::detect::result::Detection;
use crate::frame::Frame;

/// Detector + tracker seam.
///
/// Implementations run object detection on a frame and associate boxes with
/// identities across calls. The counter assumes, but does not verify, that a
/// physical object keeps the same `track_id` for as long as it stays tracked.
pub trait TrackerBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Detect and track objects in `frame`.
    ///
    /// Boxes are reported in the pixel space of `frame`.
    fn track(&mut self, frame: &Frame) -> Result<Vec<Detection>>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}

//! Detector/tracker seam.
//!
//! The object-detection model is an external collaborator. The counter only
//! sees `Detection` records produced through `TrackerBackend`. Two in-tree
//! backends exist: a synthetic `StubTracker` and a `ScriptedTracker` that
//! replays recorded detections.

mod backend;
mod backends;
mod result;

use anyhow::Result;
use std::path::PathBuf;

pub use backend::TrackerBackend;
pub use backends::{ScriptedTracker, StubTracker};
pub use result::Detection;

/// Which in-tree tracker backend to run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TrackerKind {
    Stub { classes: Vec<String> },
    Scripted { path: PathBuf },
}

impl Default for TrackerKind {
    fn default() -> Self {
        TrackerKind::Stub {
            classes: vec!["part_OK".to_string(), "part_NOK".to_string()],
        }
    }
}

pub fn build_tracker(kind: &TrackerKind) -> Result<Box<dyn TrackerBackend>> {
    let mut backend: Box<dyn TrackerBackend> = match kind {
        TrackerKind::Stub { classes } => Box::new(StubTracker::new(classes.clone())),
        TrackerKind::Scripted { path } => Box::new(ScriptedTracker::load(path)?),
    };
    backend.warm_up()?;
    log::info!("tracker backend ready: {}", backend.name());
    Ok(backend)
}

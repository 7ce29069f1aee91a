//! Part Counter
//!
//! Counts parts on a conveyor by watching tracked detections cross a vertical
//! counting line in a video feed.
//!
//! # Architecture
//!
//! Frames flow through a single pipeline:
//!
//! 1. **Acquire**: `FramePacer` pulls from a live device or a looping replay
//!    file and caps the delivered frame rate.
//! 2. **Track**: a `TrackerBackend` turns each frame into tracked detections.
//! 3. **Count**: `LineCounter` keeps the last center of every track and counts
//!    each track at most once when it reaches or passes the line. A horizontal
//!    split assigns the crossing to `line1` or `line2`. Only classes listed in
//!    the BOM (`PartCatalog`) are considered.
//! 4. **Render**: `Overlay` annotates the frame, which is encoded as JPEG and
//!    streamed as `multipart/x-mixed-replace`.
//!
//! # Module Structure
//!
//! - `geometry`, `tracking`, `counter`: the crossing engine
//! - `bom`: class eligibility from the bill of materials
//! - `report`: crossing sinks and the production summary
//! - `frame`, `ingest`, `pacer`: frame sources and pacing
//! - `detect`: tracker seam and in-tree backends
//! - `overlay`, `mjpeg`, `pipeline`: rendering and output
//! - `api`, `config`: HTTP control surface and daemon configuration

pub mod api;
pub mod bom;
pub mod config;
pub mod counter;
pub mod detect;
pub mod frame;
pub mod geometry;
pub mod ingest;
pub mod mjpeg;
pub mod overlay;
pub mod pacer;
pub mod pipeline;
pub mod report;
pub mod tracking;

pub use bom::{PartCatalog, PartInfo};
pub use counter::{Counts, CrossingEvent, LineConfig, LineCounter, SharedCounter, Zone};
pub use detect::{Detection, TrackerBackend};
pub use frame::Frame;
pub use geometry::{BoundingBox, FrameDims, Point};
pub use ingest::{LiveConfig, LiveSource, ReplayConfig, ReplaySource};
pub use overlay::Overlay;
pub use pacer::{FramePacer, PacedFrame, PacerConfig, SharedPacer, SourceMode};
pub use pipeline::{FrameProcessor, OutputSettings, Pipeline, ProcessedFrame};
pub use report::{CrossingLog, CrossingSink, LogSink, NullSink};
pub use tracking::TrackHistory;

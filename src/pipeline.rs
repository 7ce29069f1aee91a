//! Per-frame processing loop.
//!
//! One step: take a paced frame, letterbox it to the output size, run the
//! tracker, feed the counter, draw the overlay. Repeated frames from the
//! pacer are not reprocessed.

use anyhow::{anyhow, Result};
use image::RgbImage;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::counter::{lock_counter, Counts, SharedCounter};
use crate::detect::{Detection, TrackerBackend};
use crate::frame::{letterbox, Frame};
use crate::mjpeg::{self, DEFAULT_JPEG_QUALITY};
use crate::overlay::Overlay;
use crate::pacer::{lock_pacer, SharedPacer};

/// Tracker shared between pipeline runs.
pub type SharedTracker = Arc<Mutex<Box<dyn TrackerBackend>>>;

pub fn shared_tracker(tracker: Box<dyn TrackerBackend>) -> SharedTracker {
    Arc::new(Mutex::new(tracker))
}

/// Poll delay used while pacing is disabled and a repeat is reported.
const IDLE_POLL: Duration = Duration::from_millis(1);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OutputSettings {
    pub width: u32,
    pub height: u32,
    pub jpeg_quality: u8,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            width: 1020,
            height: 600,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
        }
    }
}

/// Result of processing one fresh frame.
#[derive(Clone, Debug)]
pub struct ProcessedFrame {
    pub index: u64,
    pub image: RgbImage,
    pub detections: Vec<Detection>,
    pub counts: Counts,
}

/// Letterboxes, tracks, counts and renders frames handed to it directly.
///
/// Holds no frame source; `Pipeline` pairs it with a pacer.
pub struct FrameProcessor {
    tracker: SharedTracker,
    counter: SharedCounter,
    overlay: Arc<Overlay>,
    output: OutputSettings,
}

impl FrameProcessor {
    pub fn new(
        tracker: SharedTracker,
        counter: SharedCounter,
        overlay: Arc<Overlay>,
        output: OutputSettings,
    ) -> Self {
        Self {
            tracker,
            counter,
            overlay,
            output,
        }
    }

    pub fn output(&self) -> OutputSettings {
        self.output
    }

    pub fn process(&self, source: &Frame) -> Result<ProcessedFrame> {
        let index = source.index();
        let resized = letterbox(source.image(), self.output.width, self.output.height);
        let frame = Frame::new(resized, index);

        let detections = {
            let mut tracker = self
                .tracker
                .lock()
                .map_err(|_| anyhow!("tracker lock poisoned"))?;
            match tracker.track(&frame) {
                Ok(detections) => detections,
                Err(err) => {
                    log::warn!(
                        "tracker {} failed on frame {}: {:#}",
                        tracker.name(),
                        index,
                        err
                    );
                    Vec::new()
                }
            }
        };

        let dims = frame.dims();
        let (counts, line) = {
            let mut counter = lock_counter(&self.counter)?;
            let counts = counter.update(&detections, dims);
            (counts, counter.config())
        };

        let mut image = frame.into_image();
        self.overlay.render(&mut image, &detections, &line, counts);

        Ok(ProcessedFrame {
            index,
            image,
            detections,
            counts,
        })
    }
}

pub struct Pipeline {
    pacer: SharedPacer,
    processor: FrameProcessor,
}

impl Pipeline {
    pub fn new(
        pacer: SharedPacer,
        tracker: SharedTracker,
        counter: SharedCounter,
        overlay: Arc<Overlay>,
        output: OutputSettings,
    ) -> Self {
        Self {
            pacer,
            processor: FrameProcessor::new(tracker, counter, overlay, output),
        }
    }

    pub fn output(&self) -> OutputSettings {
        self.processor.output()
    }

    /// Processes the next fresh frame. Returns `None` when the pacer served a repeat.
    ///
    /// Errors come from the frame source and are terminal for a run.
    pub fn process_next(&self) -> Result<Option<ProcessedFrame>> {
        let paced = lock_pacer(&self.pacer)?.next_frame()?;
        if paced.repeated {
            return Ok(None);
        }
        self.processor.process(&paced.frame).map(Some)
    }

    /// Runs until `stop` is set, the source fails, or `emit` fails.
    ///
    /// `emit` receives each rendered frame as JPEG. Returns the number of
    /// frames emitted.
    pub fn run<F>(&self, stop: &AtomicBool, mut emit: F) -> u64
    where
        F: FnMut(&[u8]) -> Result<()>,
    {
        let mut emitted = 0u64;
        while !stop.load(Ordering::SeqCst) {
            let processed = match self.process_next() {
                Ok(Some(processed)) => processed,
                Ok(None) => {
                    std::thread::sleep(self.repeat_backoff());
                    continue;
                }
                Err(err) => {
                    log::warn!("pipeline: frame source stopped: {:#}", err);
                    break;
                }
            };

            let jpeg = match mjpeg::encode_jpeg(&processed.image, self.output().jpeg_quality) {
                Ok(jpeg) => jpeg,
                Err(err) => {
                    log::warn!("pipeline: dropping frame {}: {:#}", processed.index, err);
                    continue;
                }
            };
            if let Err(err) = emit(&jpeg) {
                log::info!("pipeline: output closed: {:#}", err);
                break;
            }
            emitted += 1;
        }
        emitted
    }

    fn repeat_backoff(&self) -> Duration {
        let interval = match lock_pacer(&self.pacer) {
            Ok(pacer) => pacer.interval(),
            Err(_) => None,
        };
        interval.map(|i| i / 4).unwrap_or(IDLE_POLL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bom::{PartCatalog, PartInfo};
    use crate::counter::{self, LineConfig, LineCounter};
    use crate::detect::ScriptedTracker;
    use crate::geometry::BoundingBox;
    use crate::ingest::{LiveConfig, ReplayConfig};
    use crate::pacer::{self, FramePacer, PacerConfig};
    use crate::report::NullSink;

    fn catalog() -> PartCatalog {
        PartCatalog::from_parts([(
            PartInfo {
                number: "100".to_string(),
                name: "Clip".to_string(),
            },
            vec!["clip_OK".to_string()],
        )])
        .expect("catalog")
    }

    fn pipeline(script: Vec<Vec<Detection>>, frames: u64) -> Result<(Pipeline, SharedCounter)> {
        let mut pacer = FramePacer::new(PacerConfig {
            target_fps: 0,
            live: LiveConfig::default(),
        });
        pacer.switch_to_replay(ReplayConfig {
            path: "stub://clip".to_string(),
            synthetic_frames: frames,
            width: 200,
            height: 100,
        })?;
        let counter = counter::shared(LineCounter::new(
            LineConfig::default(),
            catalog(),
            Box::new(NullSink),
        ));
        let pipeline = Pipeline::new(
            pacer::shared(pacer),
            shared_tracker(Box::new(ScriptedTracker::new(script))),
            counter.clone(),
            Arc::new(Overlay::new()),
            OutputSettings {
                width: 100,
                height: 50,
                jpeg_quality: 80,
            },
        );
        Ok((pipeline, counter))
    }

    #[test]
    fn counts_scripted_crossing_in_output_space() -> Result<()> {
        let script = vec![
            vec![Detection::new(7, "clip_OK", BoundingBox::new(30.0, 5.0, 40.0, 15.0))],
            vec![Detection::new(7, "clip_OK", BoundingBox::new(55.0, 5.0, 65.0, 15.0))],
        ];
        let (pipeline, counter) = pipeline(script, 3)?;

        let first = pipeline.process_next()?.expect("fresh frame");
        assert_eq!((first.image.width(), first.image.height()), (100, 50));
        assert_eq!(first.counts.total(), 0);

        let second = pipeline.process_next()?.expect("fresh frame");
        assert_eq!(second.counts.line1, 1);
        assert_eq!(lock_counter(&counter)?.counts().line1, 1);
        Ok(())
    }

    #[test]
    fn run_emits_jpegs_until_stopped() -> Result<()> {
        let (pipeline, _counter) = pipeline(Vec::new(), 4)?;
        let stop = AtomicBool::new(false);
        let mut frames = Vec::new();
        let emitted = pipeline.run(&stop, |jpeg| {
            frames.push(jpeg.to_vec());
            if frames.len() == 3 {
                stop.store(true, Ordering::SeqCst);
            }
            Ok(())
        });
        assert_eq!(emitted, 3);
        assert!(frames.iter().all(|jpeg| jpeg.starts_with(&[0xFF, 0xD8])));
        Ok(())
    }

    #[test]
    fn run_ends_when_output_closes() -> Result<()> {
        let (pipeline, _counter) = pipeline(Vec::new(), 4)?;
        let stop = AtomicBool::new(false);
        let emitted = pipeline.run(&stop, |_| Err(anyhow!("client gone")));
        assert_eq!(emitted, 0);
        Ok(())
    }

    #[test]
    fn run_ends_on_source_error() -> Result<()> {
        let (pipeline, _counter) = pipeline(Vec::new(), 0)?;
        let stop = AtomicBool::new(false);
        assert_eq!(pipeline.run(&stop, |_| Ok(())), 0);
        Ok(())
    }

    #[test]
    fn processor_counts_frames_without_a_source() -> Result<()> {
        let counter = counter::shared(LineCounter::new(
            LineConfig::default(),
            catalog(),
            Box::new(NullSink),
        ));
        let script = vec![
            vec![Detection::new(3, "clip_OK", BoundingBox::new(10.0, 30.0, 20.0, 40.0))],
            vec![Detection::new(3, "clip_OK", BoundingBox::new(60.0, 30.0, 70.0, 40.0))],
        ];
        let processor = FrameProcessor::new(
            shared_tracker(Box::new(ScriptedTracker::new(script))),
            counter.clone(),
            Arc::new(Overlay::new()),
            OutputSettings {
                width: 100,
                height: 50,
                jpeg_quality: 80,
            },
        );

        let blank = RgbImage::new(100, 50);
        processor.process(&Frame::new(blank.clone(), 0))?;
        let second = processor.process(&Frame::new(blank, 1))?;
        assert_eq!(second.index, 1);
        assert_eq!(second.counts.line2, 1);
        assert_eq!(lock_counter(&counter)?.counts().total(), 1);
        Ok(())
    }
}

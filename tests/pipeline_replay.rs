use anyhow::Result;
use std::sync::Arc;

use part_counter::detect::ScriptedTracker;
use part_counter::pipeline::shared_tracker;
use part_counter::{
    counter, pacer, CrossingLog, FramePacer, LineConfig, LineCounter, OutputSettings, Overlay,
    PacerConfig, PartCatalog, Pipeline, ReplayConfig, Zone,
};

const BOM: &str = r#"
[[parts]]
number = "A-100"
name = "Hinge"
classes = ["hinge_OK", "hinge_NOK"]
"#;

const SCRIPT: &str = r#"{
  "frames": [
    [
      {"track_id": 1, "class_name": "hinge_OK", "box": [100, 50, 140, 90]},
      {"track_id": 2, "class_name": "hinge_NOK", "box": [600, 400, 640, 440]},
      {"track_id": 3, "class_name": "washer_OK", "box": [100, 100, 140, 140]}
    ],
    [
      {"track_id": 1, "class_name": "hinge_OK", "box": [500, 50, 540, 90]},
      {"track_id": 2, "class_name": "hinge_NOK", "box": [400, 400, 440, 440]},
      {"track_id": 3, "class_name": "washer_OK", "box": [600, 100, 640, 140]}
    ],
    [
      {"track_id": 1, "class_name": "hinge_OK", "box": [100, 50, 140, 90]},
      {"class_name": "hinge_OK", "box": [100, 300, 140, 340]}
    ]
  ]
}"#;

fn build(frames: u64) -> Result<(Pipeline, part_counter::SharedCounter, CrossingLog)> {
    let dir = tempfile::tempdir()?;
    let bom_path = dir.path().join("bom.toml");
    std::fs::write(&bom_path, BOM)?;
    let catalog = PartCatalog::load(&bom_path)?;

    let crossings = CrossingLog::new(catalog.clone());
    let counter = counter::shared(LineCounter::new(
        LineConfig::default(),
        catalog,
        Box::new(crossings.clone()),
    ));

    let mut frame_pacer = FramePacer::new(PacerConfig {
        target_fps: 0,
        ..PacerConfig::default()
    });
    frame_pacer.switch_to_replay(ReplayConfig {
        path: "stub://line".to_string(),
        synthetic_frames: frames,
        width: 1020,
        height: 600,
    })?;

    let pipeline = Pipeline::new(
        pacer::shared(frame_pacer),
        shared_tracker(Box::new(ScriptedTracker::from_json(SCRIPT)?)),
        counter.clone(),
        Arc::new(Overlay::new()),
        OutputSettings::default(),
    );
    Ok((pipeline, counter, crossings))
}

#[test]
fn counts_each_eligible_track_once_per_zone() -> Result<()> {
    let (pipeline, shared_counter, crossings) = build(3)?;
    for _ in 0..3 {
        pipeline.process_next()?;
    }

    let counts = counter::lock_counter(&shared_counter)?.counts();
    assert_eq!(counts.line1, 1);
    assert_eq!(counts.line2, 1);

    let events = crossings.events();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].track_id, 1);
    assert_eq!(events[0].zone, Zone::Line1);
    assert_eq!(events[1].track_id, 2);
    assert_eq!(events[1].zone, Zone::Line2);

    let summary = crossings.summary()?;
    assert_eq!(summary.line1.parts[0].part_number.as_deref(), Some("A-100"));
    Ok(())
}

#[test]
fn looping_replay_does_not_recount_tracks() -> Result<()> {
    let (pipeline, shared_counter, _crossings) = build(3)?;
    for _ in 0..9 {
        pipeline.process_next()?;
    }
    let counts = counter::lock_counter(&shared_counter)?.counts();
    assert_eq!(counts.total(), 2);
    Ok(())
}

#[test]
fn reset_allows_counting_again() -> Result<()> {
    let (pipeline, shared_counter, crossings) = build(3)?;
    for _ in 0..3 {
        pipeline.process_next()?;
    }
    counter::lock_counter(&shared_counter)?.reset();
    crossings.reset();

    for _ in 0..3 {
        pipeline.process_next()?;
    }
    let counts = counter::lock_counter(&shared_counter)?.counts();
    assert_eq!((counts.line1, counts.line2), (1, 1));
    assert_eq!(crossings.summary()?.line1.quantity, 1);
    Ok(())
}

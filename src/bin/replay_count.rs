//! replay_count - count parts in a recorded video without serving it
//!
//! Makes a single pass over a replay source, prints the final counts and
//! production summary as JSON, and optionally writes annotated frames.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use part_counter::detect::{build_tracker, TrackerKind};
use part_counter::mjpeg::encode_jpeg;
use part_counter::pipeline::shared_tracker;
use part_counter::{
    counter, CrossingLog, FrameProcessor, LineConfig, LineCounter, OutputSettings, Overlay,
    PartCatalog, ReplayConfig, ReplaySource,
};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Video file, or stub://<name> for a synthetic clip.
    #[arg(long)]
    video: String,
    /// BOM file listing eligible classes.
    #[arg(long, env = "PART_COUNTER_BOM_PATH")]
    bom: PathBuf,
    /// Recorded detection script; the synthetic tracker is used when absent.
    #[arg(long)]
    script: Option<PathBuf>,
    /// Classes emitted by the synthetic tracker.
    #[arg(long, value_delimiter = ',', default_value = "part_OK,part_NOK")]
    classes: Vec<String>,
    /// Counting line position as a fraction of frame width.
    #[arg(long, default_value_t = 0.5)]
    line_x: f32,
    /// Zone split position as a fraction of frame height.
    #[arg(long, default_value_t = 0.5)]
    zone_split_y: f32,
    /// Frames in a synthetic clip.
    #[arg(long, default_value_t = 250)]
    synthetic_frames: u64,
    /// Stop after this many frames.
    #[arg(long)]
    max_frames: Option<u64>,
    /// Write annotated JPEG frames into this directory.
    #[arg(long)]
    out: Option<PathBuf>,
    /// TrueType font for overlay text.
    #[arg(long, env = "PART_COUNTER_FONT_PATH")]
    font: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let line = LineConfig::new(args.line_x, args.zone_split_y)?;
    let catalog = PartCatalog::load(&args.bom)?;
    if catalog.is_empty() {
        return Err(anyhow!("BOM {} lists no classes", args.bom.display()));
    }
    let crossings = CrossingLog::new(catalog.clone());
    let counter = counter::shared(LineCounter::new(
        line,
        catalog,
        Box::new(crossings.clone()),
    ));

    let kind = match &args.script {
        Some(path) => TrackerKind::Scripted { path: path.clone() },
        None => TrackerKind::Stub {
            classes: args.classes.clone(),
        },
    };
    let tracker = shared_tracker(build_tracker(&kind)?);
    let overlay = Arc::new(Overlay::load(args.font.as_deref())?);
    let output = OutputSettings::default();
    let processor = FrameProcessor::new(tracker, counter.clone(), overlay, output);

    if let Some(dir) = &args.out {
        fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
    }

    let mut source = ReplaySource::open(ReplayConfig {
        synthetic_frames: args.synthetic_frames,
        ..ReplayConfig::new(args.video.clone())
    })?;
    let mut processed = 0u64;
    while let Some(frame) = source.read()? {
        if args.max_frames.is_some_and(|max| processed >= max) {
            break;
        }
        let result = processor.process(&frame)?;
        if let Some(dir) = &args.out {
            let jpeg = encode_jpeg(&result.image, output.jpeg_quality)?;
            let path = dir.join(format!("frame_{:06}.jpg", result.index));
            fs::write(&path, jpeg).with_context(|| format!("write {}", path.display()))?;
        }
        processed += 1;
    }
    source.release();

    let counts = counter::lock_counter(&counter)?.counts();
    let report = serde_json::json!({
        "video": args.video,
        "frames": processed,
        "counts": counts,
        "production": crossings.summary()?,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

//! counterd - part counting daemon
//!
//! This daemon:
//! 1. Loads configuration and the BOM
//! 2. Builds the frame pacer, tracker, counter and overlay
//! 3. Serves the HTTP API, including the annotated video feed
//! 4. Releases capture resources on Ctrl-C or `POST /shutdown`

use anyhow::Result;
use std::sync::{mpsc, Arc};

use part_counter::api::{ApiConfig, ApiContext, ApiServer};
use part_counter::config::CounterConfig;
use part_counter::detect::build_tracker;
use part_counter::pipeline::shared_tracker;
use part_counter::{
    counter, pacer, CrossingLog, FramePacer, LineCounter, Overlay, PartCatalog, Pipeline,
};

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = CounterConfig::load()?;

    let catalog = match &config.bom_path {
        Some(path) => PartCatalog::load(path)?,
        None => {
            log::warn!("no BOM configured; no part class is eligible for counting");
            PartCatalog::empty()
        }
    };
    log::info!("BOM lists {} class labels", catalog.len());

    let crossings = CrossingLog::new(catalog.clone());
    let counter = counter::shared(
        LineCounter::new(config.line, catalog.clone(), Box::new(crossings.clone()))
            .with_settings(config.counter_settings()),
    );

    let tracker = shared_tracker(build_tracker(&config.tracking.kind)?);
    let overlay = Arc::new(Overlay::load(config.font_path.as_deref())?);
    if !overlay.has_font() {
        log::warn!("no overlay font configured; labels are drawn without text");
    }

    let mut frame_pacer = FramePacer::new(config.pacer_config());
    if let Some(path) = &config.replay.initial_path {
        frame_pacer.switch_to_replay(config.replay_config(path.clone()))?;
    }
    let frame_pacer = pacer::shared(frame_pacer);

    let pipeline = Arc::new(Pipeline::new(
        frame_pacer.clone(),
        tracker,
        counter.clone(),
        overlay,
        config.output,
    ));

    let (tx, rx) = mpsc::channel();
    let api_config = ApiConfig {
        addr: config.api.addr.clone(),
        upload_path: config.api.upload_path.clone(),
        max_upload_bytes: config.api.max_upload_bytes,
    };
    let ctx = ApiContext {
        counter,
        crossings,
        catalog,
        pacer: frame_pacer.clone(),
        pipeline,
        replay: config.replay_config(String::new()),
        shutdown_tx: Some(tx.clone()),
    };
    let api_handle = ApiServer::new(api_config, ctx).spawn()?;
    log::info!(
        "counterd running. line_x={} zone_split_y={} target_fps={}",
        config.line.line_x,
        config.line.zone_split_y,
        config.target_fps
    );

    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .expect("error setting Ctrl-C handler");

    log::info!("counterd waiting for shutdown signal (Ctrl-C or POST /shutdown)...");
    let _ = rx.recv();
    log::info!("shutdown signal received, stopping API server and releasing capture...");
    api_handle.stop()?;
    pacer::release_shared(&frame_pacer);

    Ok(())
}

//! Frame pacing and source switching.
//!
//! `FramePacer` owns the active frame source and hands out frames no faster
//! than the configured rate. Inside the minimum interval it repeats the last
//! frame instead of reading a new one. Replay sources loop: at end of stream
//! they are rewound once and the frame counter restarts.

use anyhow::{anyhow, bail, Result};
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::frame::Frame;
use crate::ingest::live::LiveStats;
use crate::ingest::replay::ReplayStats;
use crate::ingest::{LiveConfig, LiveSource, ReplayConfig, ReplaySource};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PacerConfig {
    /// Upper bound on delivered frames per second. `0` disables pacing.
    pub target_fps: u32,
    /// Device opened on first use in live mode.
    pub live: LiveConfig,
}

impl Default for PacerConfig {
    fn default() -> Self {
        Self {
            target_fps: 25,
            live: LiveConfig::default(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceMode {
    Live,
    Replay,
}

/// A frame handed out by the pacer.
#[derive(Clone, Debug)]
pub struct PacedFrame {
    pub frame: Frame,
    /// True when this is a copy of the previous frame, served because the
    /// minimum interval had not elapsed yet.
    pub repeated: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PacerStats {
    pub mode: SourceMode,
    pub frame_count: u64,
    pub frames_produced: u64,
    pub frames_repeated: u64,
    pub live_device: Option<String>,
    pub live_frames: Option<u64>,
    pub replay_path: Option<String>,
    pub replay_loops: Option<u64>,
}

pub struct FramePacer {
    config: PacerConfig,
    mode: SourceMode,
    live: Option<LiveSource>,
    live_error: Option<String>,
    replay: Option<ReplaySource>,
    /// Set by `release`; blocks lazy reopening until the next replay switch.
    released: bool,
    frame_count: u64,
    frames_produced: u64,
    frames_repeated: u64,
    last_frame: Option<Frame>,
    last_produced_at: Option<Instant>,
    baseline: Instant,
}

impl FramePacer {
    /// Starts in live mode. The device is not opened until the first frame is requested.
    pub fn new(config: PacerConfig) -> Self {
        Self {
            config,
            mode: SourceMode::Live,
            live: None,
            live_error: None,
            replay: None,
            released: false,
            frame_count: 0,
            frames_produced: 0,
            frames_repeated: 0,
            last_frame: None,
            last_produced_at: None,
            baseline: Instant::now(),
        }
    }

    pub fn mode(&self) -> SourceMode {
        self.mode
    }

    /// Frames produced since the last switch or replay rewind.
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Minimum time between produced frames, `None` when pacing is disabled.
    pub fn interval(&self) -> Option<Duration> {
        if self.config.target_fps == 0 {
            None
        } else {
            Some(Duration::from_secs_f64(1.0 / self.config.target_fps as f64))
        }
    }

    /// Switches to looping playback of `config.path`.
    ///
    /// The new source is opened before the old one is released, so a failed
    /// switch leaves the pacer as it was.
    pub fn switch_to_replay(&mut self, config: ReplayConfig) -> Result<()> {
        let path = config.path.clone();
        let source = ReplaySource::open(config)?;
        if let Some(previous) = self.replay.replace(source) {
            previous.release();
        }
        if let Some(live) = self.live.take() {
            live.release();
        }
        self.mode = SourceMode::Replay;
        self.released = false;
        self.frame_count = 0;
        self.last_frame = None;
        self.last_produced_at = None;
        self.baseline = Instant::now();
        log::info!("FramePacer: switched to replay of {}", path);
        Ok(())
    }

    /// Returns the next frame, repeating the previous one inside the pacing interval.
    pub fn next_frame(&mut self) -> Result<PacedFrame> {
        if self.released {
            bail!("frame pacer has been released");
        }
        if let Some(interval) = self.interval() {
            let since = self.last_produced_at.unwrap_or(self.baseline);
            let elapsed = since.elapsed();
            if elapsed < interval {
                if let Some(frame) = &self.last_frame {
                    self.frames_repeated += 1;
                    return Ok(PacedFrame {
                        frame: frame.clone(),
                        repeated: true,
                    });
                }
                std::thread::sleep(interval - elapsed);
            }
        }

        let frame = match self.mode {
            SourceMode::Live => self.read_live()?,
            SourceMode::Replay => self.read_replay()?,
        };
        self.frame_count += 1;
        self.frames_produced += 1;
        self.last_produced_at = Some(Instant::now());
        self.last_frame = Some(frame.clone());
        Ok(PacedFrame {
            frame,
            repeated: false,
        })
    }

    /// Drops every open source. Safe to call more than once.
    ///
    /// Later `next_frame` calls fail instead of reopening the live device;
    /// `switch_to_replay` makes the pacer usable again.
    pub fn release(&mut self) {
        self.released = true;
        if let Some(live) = self.live.take() {
            live.release();
        }
        if let Some(replay) = self.replay.take() {
            replay.release();
        }
        self.last_frame = None;
        self.last_produced_at = None;
    }

    pub fn stats(&self) -> PacerStats {
        let live = self.live.as_ref().map(LiveSource::stats);
        let replay = self.replay.as_ref().map(ReplaySource::stats);
        PacerStats {
            mode: self.mode,
            frame_count: self.frame_count,
            frames_produced: self.frames_produced,
            frames_repeated: self.frames_repeated,
            live_device: live.as_ref().map(|s: &LiveStats| s.device.clone()),
            live_frames: live.map(|s| s.frames_captured),
            replay_path: replay.as_ref().map(|s: &ReplayStats| s.path.clone()),
            replay_loops: replay.map(|s| s.loops),
        }
    }

    fn read_live(&mut self) -> Result<Frame> {
        if let Some(err) = &self.live_error {
            bail!("live source unavailable: {}", err);
        }
        if self.live.is_none() {
            match LiveSource::open(self.config.live.clone()) {
                Ok(source) => self.live = Some(source),
                Err(err) => {
                    let message = format!("{:#}", err);
                    log::warn!(
                        "FramePacer: failed to open {}: {}",
                        self.config.live.device,
                        message
                    );
                    self.live_error = Some(message);
                    return Err(err);
                }
            }
        }
        match self.live.as_mut() {
            Some(source) => source.read(),
            None => Err(anyhow!("live source not open")),
        }
    }

    fn read_replay(&mut self) -> Result<Frame> {
        let source = self
            .replay
            .as_mut()
            .ok_or_else(|| anyhow!("no replay source is open"))?;
        if let Some(frame) = source.read()? {
            return Ok(frame);
        }
        source.rewind()?;
        self.frame_count = 0;
        log::debug!("FramePacer: replay reached end of stream, rewound");
        source
            .read()?
            .ok_or_else(|| anyhow!("replay source produced no frames after rewind"))
    }
}

pub type SharedPacer = Arc<Mutex<FramePacer>>;

pub fn shared(pacer: FramePacer) -> SharedPacer {
    Arc::new(Mutex::new(pacer))
}

pub fn lock_pacer(pacer: &SharedPacer) -> Result<MutexGuard<'_, FramePacer>> {
    pacer
        .lock()
        .map_err(|_| anyhow!("frame pacer lock poisoned"))
}

/// Releases the sources of a shared pacer, recovering a poisoned lock.
pub fn release_shared(pacer: &SharedPacer) {
    let mut guard = match pacer.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    guard.release();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unpaced() -> FramePacer {
        FramePacer::new(PacerConfig {
            target_fps: 0,
            live: LiveConfig {
                device: "stub://cam".to_string(),
                ..LiveConfig::default()
            },
        })
    }

    fn clip(frames: u64) -> ReplayConfig {
        ReplayConfig {
            path: "stub://clip".to_string(),
            synthetic_frames: frames,
            width: 8,
            height: 8,
        }
    }

    #[test]
    fn replay_rewinds_at_end_of_stream() -> Result<()> {
        let mut pacer = unpaced();
        pacer.switch_to_replay(clip(2))?;
        assert_eq!(pacer.mode(), SourceMode::Replay);

        assert_eq!(pacer.next_frame()?.frame.index(), 0);
        assert_eq!(pacer.next_frame()?.frame.index(), 1);
        assert_eq!(pacer.frame_count(), 2);

        let looped = pacer.next_frame()?;
        assert_eq!(looped.frame.index(), 0);
        assert!(!looped.repeated);
        assert_eq!(pacer.frame_count(), 1);
        assert_eq!(pacer.stats().replay_loops, Some(1));
        Ok(())
    }

    #[test]
    fn empty_replay_is_an_error() -> Result<()> {
        let mut pacer = unpaced();
        pacer.switch_to_replay(clip(0))?;
        assert!(pacer.next_frame().is_err());
        Ok(())
    }

    #[test]
    fn repeats_last_frame_inside_interval() -> Result<()> {
        let mut pacer = FramePacer::new(PacerConfig {
            target_fps: 5,
            live: LiveConfig::default(),
        });
        pacer.switch_to_replay(clip(10))?;

        let first = pacer.next_frame()?;
        let second = pacer.next_frame()?;
        assert!(!first.repeated);
        assert!(second.repeated);
        assert_eq!(first.frame, second.frame);
        assert_eq!(pacer.frame_count(), 1);
        Ok(())
    }

    #[test]
    fn live_stub_produces_frames() -> Result<()> {
        let mut pacer = unpaced();
        assert_eq!(pacer.mode(), SourceMode::Live);
        let frame = pacer.next_frame()?;
        assert_eq!(frame.frame.index(), 0);
        assert_eq!(pacer.stats().live_frames, Some(1));
        Ok(())
    }

    #[test]
    fn live_open_failure_is_remembered() {
        let mut pacer = FramePacer::new(PacerConfig {
            target_fps: 0,
            live: LiveConfig {
                device: "/dev/part-counter-missing-device".to_string(),
                ..LiveConfig::default()
            },
        });
        assert!(pacer.next_frame().is_err());
        let again = pacer.next_frame().err().map(|err| err.to_string());
        assert!(again
            .unwrap_or_default()
            .starts_with("live source unavailable"));
    }

    #[test]
    fn switch_clears_last_frame_and_counter() -> Result<()> {
        let mut pacer = unpaced();
        pacer.switch_to_replay(clip(5))?;
        pacer.next_frame()?;
        pacer.next_frame()?;

        pacer.switch_to_replay(clip(5))?;
        assert_eq!(pacer.frame_count(), 0);
        assert_eq!(pacer.next_frame()?.frame.index(), 0);
        Ok(())
    }

    #[test]
    fn failed_switch_keeps_current_source() -> Result<()> {
        let mut pacer = unpaced();
        pacer.switch_to_replay(clip(5))?;
        pacer.next_frame()?;
        assert!(pacer
            .switch_to_replay(ReplayConfig::new("rtsp://camera/stream"))
            .is_err());
        assert_eq!(pacer.next_frame()?.frame.index(), 1);
        Ok(())
    }

    #[test]
    fn release_is_idempotent() -> Result<()> {
        let pacer = shared(unpaced());
        lock_pacer(&pacer)?.switch_to_replay(clip(3))?;
        release_shared(&pacer);
        release_shared(&pacer);
        assert!(lock_pacer(&pacer)?.next_frame().is_err());
        Ok(())
    }

    #[test]
    fn released_live_pacer_does_not_reopen_device() -> Result<()> {
        let mut pacer = unpaced();
        pacer.next_frame()?;
        assert_eq!(pacer.stats().live_device.as_deref(), Some("stub://cam"));

        pacer.release();
        let err = pacer.next_frame().err().map(|err| err.to_string());
        assert_eq!(err.as_deref(), Some("frame pacer has been released"));
        assert_eq!(pacer.stats().live_device, None);
        assert_eq!(pacer.mode(), SourceMode::Live);
        Ok(())
    }

    #[test]
    fn switch_after_release_resumes_delivery() -> Result<()> {
        let mut pacer = unpaced();
        pacer.release();
        pacer.switch_to_replay(clip(2))?;
        assert_eq!(pacer.next_frame()?.frame.index(), 0);
        Ok(())
    }

    #[test]
    fn first_frame_waits_out_the_interval() -> Result<()> {
        let mut pacer = FramePacer::new(PacerConfig {
            target_fps: 20,
            live: LiveConfig::default(),
        });
        let interval = pacer.interval().expect("pacing enabled");
        let started = Instant::now();
        pacer.switch_to_replay(clip(3))?;

        let first = pacer.next_frame()?;
        assert!(started.elapsed() >= interval);
        assert!(!first.repeated);
        assert_eq!(first.frame.index(), 0);
        Ok(())
    }
}

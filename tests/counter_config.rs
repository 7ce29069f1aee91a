use std::path::PathBuf;
use std::sync::Mutex;

use tempfile::NamedTempFile;

use part_counter::config::CounterConfig;
use part_counter::detect::TrackerKind;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "PART_COUNTER_CONFIG",
        "PART_COUNTER_API_ADDR",
        "PART_COUNTER_LIVE_DEVICE",
        "PART_COUNTER_BOM_PATH",
        "PART_COUNTER_TARGET_FPS",
        "PART_COUNTER_LINE_X",
        "PART_COUNTER_ZONE_SPLIT_Y",
        "PART_COUNTER_UPLOAD_PATH",
        "PART_COUNTER_FONT_PATH",
        "PART_COUNTER_TRACKER_CLASSES",
    ] {
        std::env::remove_var(key);
    }
}

fn write_config(json: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("temp config");
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");
    file
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = write_config(
        r#"{
            "api": { "addr": "0.0.0.0:9000", "upload_path": "/var/tmp/upload.mp4" },
            "line": { "x": 0.4, "zone_split_y": 0.6 },
            "live": { "device": "/dev/video2", "width": 1280, "height": 720 },
            "pacing": { "target_fps": 15 },
            "output": { "width": 800, "height": 450, "jpeg_quality": 70 },
            "replay": { "path": "stub://warmup", "synthetic_frames": 40 },
            "bom": { "path": "/etc/part-counter/bom.toml" },
            "tracking": { "backend": "stub", "classes": ["gear_OK", "gear_NOK"], "max_idle_frames": 90 },
            "overlay": { "font_path": "/usr/share/fonts/DejaVuSans.ttf" }
        }"#,
    );

    std::env::set_var("PART_COUNTER_CONFIG", file.path());
    std::env::set_var("PART_COUNTER_LINE_X", "0.55");
    std::env::set_var("PART_COUNTER_TARGET_FPS", "30");
    std::env::set_var("PART_COUNTER_LIVE_DEVICE", "stub://bench");

    let cfg = CounterConfig::load().expect("load config");

    assert_eq!(cfg.api.addr, "0.0.0.0:9000");
    assert_eq!(cfg.api.upload_path, PathBuf::from("/var/tmp/upload.mp4"));
    assert_eq!(cfg.api.max_upload_bytes, 512 * 1024 * 1024);
    assert!((cfg.line.line_x - 0.55).abs() < 1e-6);
    assert!((cfg.line.zone_split_y - 0.6).abs() < 1e-6);
    assert_eq!(cfg.live.device, "stub://bench");
    assert_eq!((cfg.live.width, cfg.live.height), (1280, 720));
    assert_eq!(cfg.target_fps, 30);
    assert_eq!(cfg.live.target_fps, 30);
    assert_eq!((cfg.output.width, cfg.output.height), (800, 450));
    assert_eq!(cfg.output.jpeg_quality, 70);
    assert_eq!(cfg.replay.initial_path.as_deref(), Some("stub://warmup"));
    assert_eq!(cfg.replay_config("stub://x").synthetic_frames, 40);
    assert_eq!(cfg.bom_path, Some(PathBuf::from("/etc/part-counter/bom.toml")));
    assert_eq!(
        cfg.tracking.kind,
        TrackerKind::Stub {
            classes: vec!["gear_OK".to_string(), "gear_NOK".to_string()]
        }
    );
    assert_eq!(cfg.counter_settings().max_idle_frames, 90);
    assert_eq!(
        cfg.font_path,
        Some(PathBuf::from("/usr/share/fonts/DejaVuSans.ttf"))
    );
    assert_eq!(cfg.pacer_config().target_fps, 30);

    clear_env();
}

#[test]
fn defaults_apply_without_config_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = CounterConfig::load().expect("load defaults");
    assert_eq!(cfg.api.addr, "127.0.0.1:8080");
    assert_eq!(cfg.target_fps, 25);
    assert_eq!((cfg.output.width, cfg.output.height), (1020, 600));
    assert_eq!(cfg.output.jpeg_quality, 85);
    assert!((cfg.line.line_x - 0.5).abs() < 1e-6);
    assert!(cfg.bom_path.is_none());
    assert!(cfg.replay.initial_path.is_none());
    assert_eq!(cfg.counter_settings().max_idle_frames, 250);

    clear_env();
}

#[test]
fn tracker_classes_env_override() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("PART_COUNTER_TRACKER_CLASSES", "bolt_OK, bolt_NOK,");
    let cfg = CounterConfig::load().expect("load config");
    assert_eq!(
        cfg.tracking.kind,
        TrackerKind::Stub {
            classes: vec!["bolt_OK".to_string(), "bolt_NOK".to_string()]
        }
    );

    clear_env();
}

#[test]
fn rejects_out_of_range_line_and_bad_numbers() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("PART_COUNTER_LINE_X", "1.5");
    assert!(CounterConfig::load().is_err());
    clear_env();

    std::env::set_var("PART_COUNTER_TARGET_FPS", "fast");
    assert!(CounterConfig::load().is_err());
    clear_env();
}

#[test]
fn scripted_backend_requires_script_path() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = write_config(r#"{ "tracking": { "backend": "scripted" } }"#);
    std::env::set_var("PART_COUNTER_CONFIG", file.path());
    assert!(CounterConfig::load().is_err());

    let file = write_config(r#"{ "tracking": { "backend": "yolo" } }"#);
    std::env::set_var("PART_COUNTER_CONFIG", file.path());
    assert!(CounterConfig::load().is_err());

    clear_env();
}

//! Configuration and trace file loading

use sightline_core::{ActionKind, EngineError, SightlineConfig, Trace};
use std::io::Write;
use tempfile::{Builder, NamedTempFile};

fn write_temp(suffix: &str, content: &str) -> NamedTempFile {
    let mut file = Builder::new().suffix(suffix).tempfile().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

const TOML_CONFIG: &str = r#"
[engine]
dwell_duration_secs = 1.5
movement_timeout_secs = 20.0

[[actions.labels.statue]]
kind = "show_panorama"
media = "statue.jpg"

[[actions.labels.statue]]
kind = "play_video"
media = "statue.mp4"
duration_secs = 30.0

[[actions.spot]]
kind = "play_video"
media = "intro.mp4"
"#;

#[test]
fn test_load_toml_file() {
    let file = write_temp(".toml", TOML_CONFIG);
    let config = SightlineConfig::from_file(file.path()).unwrap();
    assert_eq!(config.engine.dwell_duration_secs, 1.5);
    assert_eq!(config.engine.movement_timeout_secs, 20.0);
    assert_eq!(config.engine.no_detection_timeout_secs, 30.0);

    let statue = config.actions.actions_for("statue").unwrap();
    assert_eq!(statue.len(), 2);
    assert_eq!(statue[1].kind, ActionKind::PlayVideo);
    assert_eq!(statue[1].duration_secs, Some(30.0));
    assert_eq!(config.actions.spot().map(|s| s.len()), Some(1));
}

#[test]
fn test_load_json_and_yaml_files() {
    let json = r#"{"actions": {"labels": {"mural": [{"kind": "show_panorama", "media": "mural.jpg"}]}}}"#;
    let file = write_temp(".json", json);
    let config = SightlineConfig::from_file(file.path()).unwrap();
    assert!(config.actions.actions_for("mural").is_some());

    let yaml = "engine:\n  confidence_threshold: 0.7\nactions:\n  labels:\n    mural:\n      - kind: play_video\n        media: mural.mp4\n";
    let file = write_temp(".yml", yaml);
    let config = SightlineConfig::from_file(file.path()).unwrap();
    assert_eq!(config.engine.confidence_threshold, 0.7);
}

#[test]
fn test_unknown_extension_sniffs_format() {
    let file = write_temp(".conf", TOML_CONFIG);
    let config = SightlineConfig::from_file(file.path()).unwrap();
    assert_eq!(config.engine.dwell_duration_secs, 1.5);
}

#[test]
fn test_invalid_values_rejected() {
    let file = write_temp(".toml", "[engine]\nconfidence_threshold = 1.5\n");
    let result = SightlineConfig::from_file(file.path());
    assert!(matches!(result, Err(EngineError::Config(_))));

    let file = write_temp(".json", r#"{"actions": {"labels": {"statue": []}}}"#);
    assert!(matches!(SightlineConfig::from_file(file.path()), Err(EngineError::Config(_))));
}

#[test]
fn test_malformed_file_reports_parser_error() {
    let file = write_temp(".json", "{\"engine\": ");
    assert!(matches!(SightlineConfig::from_file(file.path()), Err(EngineError::Json(_))));

    let file = write_temp(".toml", "[engine\n");
    assert!(matches!(SightlineConfig::from_file(file.path()), Err(EngineError::Toml(_))));
}

#[test]
fn test_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let result = SightlineConfig::from_file(dir.path().join("absent.toml"));
    assert!(matches!(result, Err(EngineError::Io(_))));
}

#[test]
fn test_defaults_roundtrip_through_toml() {
    let rendered = toml::to_string(&SightlineConfig::default()).unwrap();
    let file = write_temp(".toml", &rendered);
    let config = SightlineConfig::from_file(file.path()).unwrap();
    assert_eq!(config, SightlineConfig::default());
}

#[test]
fn test_trace_file_loading() {
    let yaml = "steps:\n  - at: 0\n    type: frame_run\n    until: 2.0\n    every: 0.5\n    observations:\n      - label: statue\n        confidence: 0.9\n  - at: 5\n    type: viewer_closed\n    kind: show_panorama\n    label: statue\nuntil: 10\n";
    let file = write_temp(".yaml", yaml);
    let trace = Trace::from_file(file.path()).unwrap();
    assert_eq!(trace.steps.len(), 2);
    assert_eq!(trace.inputs().len(), 6);
    assert_eq!(trace.end(), 10.0);
}

#[test]
fn test_trace_validation_on_load() {
    let json = r#"{"steps": [{"at": -1.0, "type": "appear"}]}"#;
    let file = write_temp(".json", json);
    assert!(matches!(Trace::from_file(file.path()), Err(EngineError::Replay(_))));
}

#[test]
fn test_trace_times_beyond_limit_rejected_on_load() {
    let json = r#"{"steps": [{"at": 1e20, "type": "appear"}], "start_hidden": true}"#;
    let file = write_temp(".json", json);
    assert!(matches!(Trace::from_file(file.path()), Err(EngineError::Replay(_))));

    let yaml = "steps:\n  - at: 0\n    type: appear\nuntil: 1.0e12\n";
    let file = write_temp(".yaml", yaml);
    assert!(matches!(Trace::from_file(file.path()), Err(EngineError::Replay(_))));
}

#[test]
fn test_oversized_video_length_rejected_on_load() {
    let toml_src = "[[actions.labels.statue]]\nkind = \"play_video\"\nmedia = \"s.mp4\"\nduration_secs = 1e20\n";
    let file = write_temp(".toml", toml_src);
    assert!(matches!(SightlineConfig::from_file(file.path()), Err(EngineError::Config(_))));
}

//! Configuration for sightline-core

use crate::error::EngineError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

/// Longest duration accepted anywhere in the configuration (one day)
pub const MAX_DURATION_SECS: f64 = 86_400.0;

/// Engine timing and threshold options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Seconds a candidate must persist before it is confirmed
    pub dwell_duration_secs: f64,
    /// Seconds of candidate absence tolerated before the dwell resets
    pub candidate_grace_interval_secs: f64,
    /// Observations must be strictly above this confidence to be eligible
    pub confidence_threshold: f32,
    /// Seconds without any candidate before the help affordance is shown
    pub no_detection_timeout_secs: f64,
    /// Seconds without device motion before the move-camera alert is shown
    pub movement_timeout_secs: f64,
    /// Acceleration (g) any axis must exceed to count as movement
    pub movement_magnitude_threshold: f32,
    /// Bounded queue for motion samples into the controller
    pub motion_queue_size: usize,
    /// Broadcast buffer for engine events
    pub event_buffer_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            dwell_duration_secs: 2.0,
            candidate_grace_interval_secs: 0.5,
            confidence_threshold: 0.5,
            no_detection_timeout_secs: 30.0,
            movement_timeout_secs: 15.0,
            movement_magnitude_threshold: 0.05,
            motion_queue_size: 32,
            event_buffer_size: 1024,
        }
    }
}

impl EngineConfig {
    pub fn dwell_duration(&self) -> Duration {
        Duration::from_secs_f64(self.dwell_duration_secs)
    }

    pub fn candidate_grace_interval(&self) -> Duration {
        Duration::from_secs_f64(self.candidate_grace_interval_secs)
    }

    pub fn no_detection_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.no_detection_timeout_secs)
    }

    pub fn movement_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.movement_timeout_secs)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        let durations = [
            ("dwell_duration_secs", self.dwell_duration_secs),
            ("candidate_grace_interval_secs", self.candidate_grace_interval_secs),
            ("no_detection_timeout_secs", self.no_detection_timeout_secs),
            ("movement_timeout_secs", self.movement_timeout_secs),
        ];
        for (name, value) in durations {
            // Duration::from_secs_f64 panics on negative, NaN or overflowing input
            if !value.is_finite() || value <= 0.0 {
                return Err(format!("{} must be a positive number of seconds", name));
            }
            if value > MAX_DURATION_SECS {
                return Err(format!("{} must not exceed one day", name));
            }
        }

        if !(0.0..1.0).contains(&self.confidence_threshold) {
            return Err("confidence_threshold must be in [0.0, 1.0)".to_string());
        }

        if !self.movement_magnitude_threshold.is_finite() || self.movement_magnitude_threshold < 0.0 {
            return Err("movement_magnitude_threshold must be a non-negative number".to_string());
        }

        if self.motion_queue_size == 0 {
            return Err("motion_queue_size must be > 0".to_string());
        }

        if self.event_buffer_size == 0 {
            return Err("event_buffer_size must be > 0".to_string());
        }

        Ok(())
    }
}

/// Kind of viewer an action opens
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    /// Panorama image viewer, complete on user dismissal
    ShowPanorama,
    /// Video player, complete on end of playback
    PlayVideo,
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActionKind::ShowPanorama => write!(f, "show_panorama"),
            ActionKind::PlayVideo => write!(f, "play_video"),
        }
    }
}

/// One follow-up presentation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub kind: ActionKind,
    /// Opaque reference to the image or video resource
    pub media: String,
    /// Known playback length; arms the video-end timer when set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<f64>,
}

impl Action {
    pub fn panorama(media: impl Into<String>) -> Self {
        Self {
            kind: ActionKind::ShowPanorama,
            media: media.into(),
            duration_secs: None,
        }
    }

    pub fn video(media: impl Into<String>) -> Self {
        Self {
            kind: ActionKind::PlayVideo,
            media: media.into(),
            duration_secs: None,
        }
    }

    pub fn with_duration(mut self, secs: f64) -> Self {
        self.duration_secs = Some(secs);
        self
    }

    /// Video-end timeout, only for videos with a known length
    pub fn video_end_after(&self) -> Option<Duration> {
        match (self.kind, self.duration_secs) {
            (ActionKind::PlayVideo, Some(secs)) => Duration::try_from_secs_f64(secs).ok(),
            _ => None,
        }
    }
}

/// Action lists keyed by recognizable label, plus the optional spot list
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionCatalog {
    #[serde(default)]
    pub labels: HashMap<String, Vec<Action>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spot: Option<Vec<Action>>,
}

impl ActionCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_label(mut self, label: impl Into<String>, actions: Vec<Action>) -> Self {
        self.labels.insert(label.into(), actions);
        self
    }

    pub fn with_spot(mut self, actions: Vec<Action>) -> Self {
        self.spot = Some(actions);
        self
    }

    pub fn actions_for(&self, label: &str) -> Option<&[Action]> {
        self.labels.get(label).map(Vec::as_slice)
    }

    pub fn spot(&self) -> Option<&[Action]> {
        self.spot.as_deref()
    }

    /// Validate catalog entries
    pub fn validate(&self) -> Result<(), String> {
        for (label, actions) in &self.labels {
            if label.trim().is_empty() {
                return Err("action list label must not be empty".to_string());
            }
            validate_actions(label, actions)?;
        }
        if let Some(spot) = &self.spot {
            validate_actions("spot", spot)?;
        }
        Ok(())
    }
}

fn validate_actions(owner: &str, actions: &[Action]) -> Result<(), String> {
    if actions.is_empty() {
        return Err(format!("action list '{}' is empty", owner));
    }
    for (index, action) in actions.iter().enumerate() {
        if action.media.trim().is_empty() {
            return Err(format!("action {} of '{}' has no media reference", index, owner));
        }
        if let Some(secs) = action.duration_secs {
            if action.kind != ActionKind::PlayVideo {
                return Err(format!("action {} of '{}': duration_secs only applies to videos", index, owner));
            }
            if !secs.is_finite() || secs <= 0.0 {
                return Err(format!("action {} of '{}': duration_secs must be positive", index, owner));
            }
            if secs > MAX_DURATION_SECS {
                return Err(format!("action {} of '{}': duration_secs must not exceed one day", index, owner));
            }
        }
    }
    Ok(())
}

/// Top-level file layout: engine options plus the action catalog
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SightlineConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub actions: ActionCatalog,
}

impl SightlineConfig {
    /// Load configuration from a JSON, TOML or YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());

        let config: Self = match extension.as_deref() {
            Some("json") => serde_json::from_str(&content)?,
            Some("toml") => toml::from_str(&content)?,
            Some("yaml") | Some("yml") => serde_yaml::from_str(&content)?,
            _ => content.parse()?,
        };
        config.validate().map_err(EngineError::Config)?;
        debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), String> {
        self.engine.validate()?;
        self.actions.validate()
    }
}

impl FromStr for SightlineConfig {
    type Err = EngineError;

    /// Try JSON, then TOML, then YAML
    fn from_str(content: &str) -> Result<Self, Self::Err> {
        if let Ok(config) = serde_json::from_str::<SightlineConfig>(content) {
            return Ok(config);
        }

        if let Ok(config) = toml::from_str::<SightlineConfig>(content) {
            return Ok(config);
        }

        serde_yaml::from_str::<SightlineConfig>(content)
            .map_err(|e| EngineError::Config(format!("Unknown configuration format: {}", e)))
    }
}

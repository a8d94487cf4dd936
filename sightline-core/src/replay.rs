//! Deterministic trace replay
//!
//! A trace is a list of timestamped inputs. The driver runs them through a
//! [`RecognitionEngine`] on a virtual clock: before each input it fires every
//! timer due by then at the timer's own deadline, so the recorded timeline
//! shows when things happen rather than when the next input arrived.

use crate::config::{ActionKind, SightlineConfig};
use crate::engine::RecognitionEngine;
use crate::error::EngineError;
use crate::event::EngineEvent;
use crate::observation::{MotionSample, Observation};
use crate::sequencer::ViewerReport;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

/// Upper bound on frames a single `frame_run` step may expand into
const MAX_RUN_FRAMES: usize = 1_000_000;

/// Latest time a trace may reference (one week)
pub const MAX_TRACE_SECS: f64 = 604_800.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TraceInput {
    /// One frame's classifier output
    Frame {
        #[serde(default)]
        observations: Vec<Observation>,
    },
    /// The same frame repeated every `every` seconds up to `until` (inclusive)
    FrameRun {
        until: f64,
        every: f64,
        #[serde(default)]
        observations: Vec<Observation>,
    },
    Motion {
        x: f32,
        y: f32,
        z: f32,
    },
    ViewerClosed {
        kind: ActionKind,
        label: String,
        #[serde(default)]
        index: Option<usize>,
    },
    Trigger {
        label: String,
    },
    TriggerSpot,
    Appear,
    Disappear,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceStep {
    /// Seconds since the start of the trace
    pub at: f64,
    #[serde(flatten)]
    pub input: TraceInput,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Trace {
    #[serde(default)]
    pub steps: Vec<TraceStep>,
    /// Keep firing timers up to this time after the last input
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub until: Option<f64>,
    /// Do not make the view visible at t=0
    #[serde(default)]
    pub start_hidden: bool,
}

impl Trace {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let trace: Self = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str(&content)?,
            Some("toml") => toml::from_str(&content)?,
            Some("yaml") | Some("yml") => serde_yaml::from_str(&content)?,
            _ => content.parse()?,
        };
        trace.validate().map_err(EngineError::Replay)?;
        Ok(trace)
    }

    pub fn validate(&self) -> Result<(), String> {
        for (index, step) in self.steps.iter().enumerate() {
            if !step.at.is_finite() || step.at < 0.0 {
                return Err(format!("step {}: 'at' must be a non-negative number", index));
            }
            if step.at > MAX_TRACE_SECS {
                return Err(format!("step {}: 'at' is past the {} s trace limit", index, MAX_TRACE_SECS));
            }
            if let TraceInput::FrameRun { until, every, .. } = &step.input {
                if !every.is_finite() || *every <= 0.0 {
                    return Err(format!("step {}: 'every' must be positive", index));
                }
                if !until.is_finite() || *until < step.at {
                    return Err(format!("step {}: 'until' must not precede 'at'", index));
                }
                if *until > MAX_TRACE_SECS {
                    return Err(format!("step {}: 'until' is past the {} s trace limit", index, MAX_TRACE_SECS));
                }
                if (until - step.at) / every > MAX_RUN_FRAMES as f64 {
                    return Err(format!("step {}: frame run too long", index));
                }
            }
        }
        if let Some(until) = self.until {
            if !until.is_finite() || until < 0.0 {
                return Err("'until' must be a non-negative number".to_string());
            }
            if until > MAX_TRACE_SECS {
                return Err(format!("'until' is past the {} s trace limit", MAX_TRACE_SECS));
            }
        }
        Ok(())
    }

    /// Steps with frame runs expanded, stably ordered by time
    pub fn inputs(&self) -> Vec<(f64, TraceInput)> {
        let mut inputs = Vec::with_capacity(self.steps.len());
        for step in &self.steps {
            match &step.input {
                TraceInput::FrameRun {
                    until,
                    every,
                    observations,
                } => {
                    let mut k = 0u32;
                    loop {
                        let at = step.at + f64::from(k) * every;
                        // Tolerate float drift on the inclusive end
                        if at > until + 1e-9 {
                            break;
                        }
                        inputs.push((
                            at,
                            TraceInput::Frame {
                                observations: observations.clone(),
                            },
                        ));
                        k += 1;
                    }
                }
                input => inputs.push((step.at, input.clone())),
            }
        }
        inputs.sort_by(|a, b| a.0.total_cmp(&b.0));
        inputs
    }

    /// Time of the last input, or `until` when later
    pub fn end(&self) -> f64 {
        let last = self
            .inputs()
            .last()
            .map(|(at, _)| *at)
            .unwrap_or(0.0);
        self.until.map_or(last, |until| until.max(last))
    }
}

impl FromStr for Trace {
    type Err = EngineError;

    /// Try JSON, then TOML, then YAML
    fn from_str(content: &str) -> Result<Self, Self::Err> {
        if let Ok(trace) = serde_json::from_str::<Trace>(content) {
            return Ok(trace);
        }

        if let Ok(trace) = toml::from_str::<Trace>(content) {
            return Ok(trace);
        }

        serde_yaml::from_str::<Trace>(content)
            .map_err(|e| EngineError::Replay(format!("Unknown trace format: {}", e)))
    }
}

/// Engine event stamped with its virtual time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimedEvent {
    pub at_secs: f64,
    #[serde(flatten)]
    pub event: EngineEvent,
}

pub struct ReplayDriver {
    engine: RecognitionEngine,
    origin: Instant,
    timeline: Vec<TimedEvent>,
}

impl ReplayDriver {
    pub fn new(config: &SightlineConfig) -> Result<Self, EngineError> {
        Ok(Self {
            engine: RecognitionEngine::new(config.engine.clone(), config.actions.clone())?,
            origin: Instant::now(),
            timeline: Vec::new(),
        })
    }

    pub fn engine(&self) -> &RecognitionEngine {
        &self.engine
    }

    /// Run every input of `trace` and return the recorded timeline
    pub fn run(mut self, trace: &Trace) -> Result<Vec<TimedEvent>, EngineError> {
        trace.validate().map_err(EngineError::Replay)?;
        let inputs = trace.inputs();
        info!("Replaying {} inputs", inputs.len());

        if !trace.start_hidden {
            let events = self.engine.appear(self.origin);
            self.record(self.origin, events);
        }

        for (at, input) in inputs {
            let now = self.instant(at)?;
            self.advance_to(now);
            let events = self.apply(input, now)?;
            self.record(now, events);
        }

        let end = self.instant(trace.end())?;
        self.advance_to(end);
        debug!("Replay finished with {} events", self.timeline.len());
        Ok(self.timeline)
    }

    fn apply(&mut self, input: TraceInput, now: Instant) -> Result<Vec<EngineEvent>, EngineError> {
        let events = match input {
            TraceInput::Frame { observations } => self.engine.on_frame(&observations, now),
            TraceInput::FrameRun { .. } => {
                return Err(EngineError::Replay("frame runs must be expanded before replay".to_string()))
            }
            TraceInput::Motion { x, y, z } => self.engine.on_motion(MotionSample::new(x, y, z), now),
            TraceInput::ViewerClosed { kind, label, index } => {
                let mut report = ViewerReport::new(kind, label);
                report.index = index;
                self.engine.report_viewer_closed(&report, now)
            }
            TraceInput::Trigger { label } => self.engine.trigger(&label, now),
            TraceInput::TriggerSpot => self.engine.trigger_spot(now),
            TraceInput::Appear => self.engine.appear(now),
            TraceInput::Disappear => self.engine.disappear(),
        };
        Ok(events)
    }

    /// Fire every timer due by `now`, each at its own deadline
    fn advance_to(&mut self, now: Instant) {
        while let Some(deadline) = self.engine.next_deadline().filter(|d| *d <= now) {
            let events = self.engine.poll_timers(deadline);
            self.record(deadline, events);
        }
    }

    fn instant(&self, secs: f64) -> Result<Instant, EngineError> {
        Duration::try_from_secs_f64(secs)
            .ok()
            .and_then(|offset| self.origin.checked_add(offset))
            .ok_or_else(|| EngineError::Replay(format!("trace time {} s is out of range", secs)))
    }

    fn record(&mut self, at: Instant, events: Vec<EngineEvent>) {
        let at_secs = at.duration_since(self.origin).as_secs_f64();
        self.timeline
            .extend(events.into_iter().map(|event| TimedEvent { at_secs, event }));
    }
}

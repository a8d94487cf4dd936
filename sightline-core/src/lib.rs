//! sightline-core: Detection-to-action orchestration engine
//!
//! Turns a noisy per-frame stream of classifier observations into debounced
//! recognition events and drives the follow-up action list tied to each
//! confirmed label.
//!
//! - `processing`: observation filter, dwell confirmation timer, watchdogs
//! - `sequencer`: resumable action list traversal
//! - `engine`: the synchronous core owning all state and timers
//! - `controller`: async session running the engine on its own task
//! - `capture`: producer side (frame source + classifier on a blocking worker)
//! - `replay`: deterministic trace driver on a virtual clock

pub mod capture;
pub mod config;
pub mod controller;
pub mod engine;
pub mod error;
pub mod event;
pub mod observation;
pub mod processing;
pub mod replay;
pub mod sequencer;
pub mod session;

pub use capture::{CapturePipeline, CapturedFrame, Classifier, FrameSink, FrameSource};
pub use config::{Action, ActionCatalog, ActionKind, EngineConfig, SightlineConfig};
pub use controller::RecognitionSession;
pub use engine::RecognitionEngine;
pub use error::EngineError;
pub use event::{EngineEvent, EventEnvelope};
pub use observation::{BoundingBox, Candidate, MotionSample, Observation};
pub use replay::{ReplayDriver, TimedEvent, Trace};
pub use sequencer::{SequenceCheckpoint, SequenceOrigin, ViewerReport};

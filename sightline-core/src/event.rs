//! Events published to the UI layer

use crate::config::Action;
use crate::observation::Candidate;
use crate::sequencer::SequenceOrigin;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    /// Overlay should follow this candidate, or hide
    CandidateChanged { candidate: Option<Candidate> },
    /// A candidate started dwelling; show the info affordance
    TrackingStarted { label: String },
    /// Candidate lost past the grace interval; clear the info affordance
    TrackingCleared { label: String },
    Confirmed { label: String },
    ShowHelpAffordance,
    ShowMovementAlert,
    SequenceStarted {
        label: String,
        origin: SequenceOrigin,
        actions: usize,
    },
    /// Present this action and report back when its viewer closes
    ActionRequested {
        label: String,
        index: usize,
        action: Action,
    },
    SequenceFinished { label: String },
    DetectionSuspended { label: String },
    DetectionResumed,
}

impl std::fmt::Display for EngineEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineEvent::CandidateChanged { candidate: Some(c) } => {
                write!(f, "candidate {} ({:.2})", c.label, c.confidence)
            }
            EngineEvent::CandidateChanged { candidate: None } => write!(f, "candidate none"),
            EngineEvent::TrackingStarted { label } => write!(f, "tracking {}", label),
            EngineEvent::TrackingCleared { label } => write!(f, "lost {}", label),
            EngineEvent::Confirmed { label } => write!(f, "confirmed {}", label),
            EngineEvent::ShowHelpAffordance => write!(f, "show help affordance"),
            EngineEvent::ShowMovementAlert => write!(f, "show movement alert"),
            EngineEvent::SequenceStarted { label, origin, actions } => {
                write!(f, "sequence {} started ({:?}, {} actions)", label, origin, actions)
            }
            EngineEvent::ActionRequested { label, index, action } => {
                write!(f, "action {}#{} {} {}", label, index, action.kind, action.media)
            }
            EngineEvent::SequenceFinished { label } => write!(f, "sequence {} finished", label),
            EngineEvent::DetectionSuspended { label } => write!(f, "detection suspended for {}", label),
            EngineEvent::DetectionResumed => write!(f, "detection resumed"),
        }
    }
}

/// Event as delivered to subscribers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub session_id: Uuid,
    pub emitted_at: DateTime<Utc>,
    pub event: EngineEvent,
}

impl EventEnvelope {
    pub fn new(session_id: Uuid, event: EngineEvent) -> Self {
        Self {
            session_id,
            emitted_at: Utc::now(),
            event,
        }
    }
}

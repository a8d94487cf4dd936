//! Action sequencing
//!
//! Walks an action list one step at a time. A step is complete only when its
//! viewer reports closure (or, for videos with a known length, when the
//! video-end timer elapses). The sequencer keeps label, cursor and origin so
//! a bare "closed" report from an independent viewer is enough to advance.

use crate::config::{Action, ActionKind};
use crate::error::EngineError;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info};

/// How a sequence came to be started
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SequenceOrigin {
    AutoDetected,
    Manual,
    ResumedFromVideo,
}

/// Closure report from a viewer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewerReport {
    pub kind: ActionKind,
    pub label: String,
    /// Action index when the viewer knows it; pins the report to one step
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<usize>,
}

impl ViewerReport {
    /// Report without a step index. It matches whatever step is on screen
    /// when it arrives, so a duplicate close can advance past a following
    /// action of the same kind; pin it with [`ViewerReport::at_index`] when
    /// neighbouring actions share a kind.
    pub fn new(kind: ActionKind, label: impl Into<String>) -> Self {
        Self {
            kind,
            label: label.into(),
            index: None,
        }
    }

    pub fn at_index(mut self, index: usize) -> Self {
        self.index = Some(index);
        self
    }
}

/// Serializable position of an in-flight sequence
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceCheckpoint {
    pub label: String,
    pub cursor: usize,
    pub kind: ActionKind,
    pub origin: SequenceOrigin,
}

/// Instruction to present one action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionDispatch {
    pub label: String,
    pub index: usize,
    pub action: Action,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StartOutcome {
    Dispatched(ActionDispatch),
    /// Another sequence is in flight
    Rejected { in_flight: String },
    /// Nothing to run
    Empty,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Advance {
    Dispatched(ActionDispatch),
    Finished { label: String },
}

#[derive(Debug, Clone)]
struct SequencerState {
    label: String,
    actions: Vec<Action>,
    cursor: usize,
    origin: SequenceOrigin,
    video_deadline: Option<Instant>,
}

impl SequencerState {
    fn current(&self) -> Option<&Action> {
        self.actions.get(self.cursor)
    }
}

/// At most one sequence in flight
#[derive(Debug, Default)]
pub struct ActionSequencer {
    state: Option<SequencerState>,
}

impl ActionSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.state.is_some()
    }

    pub fn label(&self) -> Option<&str> {
        self.state.as_ref().map(|s| s.label.as_str())
    }

    pub fn cursor(&self) -> Option<usize> {
        self.state.as_ref().map(|s| s.cursor)
    }

    pub fn origin(&self) -> Option<SequenceOrigin> {
        self.state.as_ref().map(|s| s.origin)
    }

    pub fn start(&mut self, label: &str, actions: &[Action], origin: SequenceOrigin, now: Instant) -> StartOutcome {
        if let Some(active) = &self.state {
            debug!("Sequence '{}' in flight, ignoring start for '{}'", active.label, label);
            return StartOutcome::Rejected {
                in_flight: active.label.clone(),
            };
        }
        if actions.is_empty() {
            return StartOutcome::Empty;
        }

        info!("Starting {} action(s) for '{}' ({:?})", actions.len(), label, origin);
        self.state = Some(SequencerState {
            label: label.to_string(),
            actions: actions.to_vec(),
            cursor: 0,
            origin,
            video_deadline: None,
        });
        match self.dispatch_current(now) {
            Some(dispatch) => StartOutcome::Dispatched(dispatch),
            None => StartOutcome::Empty,
        }
    }

    /// Move past the current action
    pub fn advance(&mut self, now: Instant) -> Option<Advance> {
        let state = self.state.as_mut()?;
        state.cursor += 1;
        state.video_deadline = None;

        if state.cursor >= state.actions.len() {
            let label = state.label.clone();
            info!("Sequence '{}' finished", label);
            self.state = None;
            return Some(Advance::Finished { label });
        }

        self.dispatch_current(now).map(Advance::Dispatched)
    }

    /// Advance if the report matches the action on screen; mismatches and
    /// duplicates are ignored
    pub fn report_viewer_closed(&mut self, report: &ViewerReport, now: Instant) -> Option<Advance> {
        let Some(state) = &self.state else {
            debug!("Viewer '{}' closed for '{}' with no sequence in flight", report.kind, report.label);
            return None;
        };

        let kind_matches = state.current().map(|a| a.kind) == Some(report.kind);
        let index_matches = report.index.map_or(true, |i| i == state.cursor);
        if state.label != report.label || !kind_matches || !index_matches {
            debug!(
                "Ignoring {} close for '{}' (index {:?}); sequence '{}' is at step {}",
                report.kind, report.label, report.index, state.label, state.cursor
            );
            return None;
        }

        self.advance(now)
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.state.as_ref().and_then(|s| s.video_deadline)
    }

    /// Complete the current video if its end timer is due
    pub fn poll(&mut self, now: Instant) -> Option<Advance> {
        let deadline = self.next_deadline().filter(|d| *d <= now)?;
        if let Some(state) = &self.state {
            info!("Video-end timer elapsed for '{}' step {}", state.label, state.cursor);
        }
        self.advance(deadline)
    }

    pub fn checkpoint(&self) -> Option<SequenceCheckpoint> {
        let state = self.state.as_ref()?;
        let action = state.current()?;
        Some(SequenceCheckpoint {
            label: state.label.clone(),
            cursor: state.cursor,
            kind: action.kind,
            origin: state.origin,
        })
    }

    /// Rebuild a sequence from a checkpoint whose viewer has since closed,
    /// and advance past that step
    pub fn resume(
        &mut self,
        checkpoint: &SequenceCheckpoint,
        actions: &[Action],
        now: Instant,
    ) -> Result<Advance, EngineError> {
        if let Some(active) = &self.state {
            return Err(EngineError::Sequence(format!(
                "cannot resume '{}' while '{}' is in flight",
                checkpoint.label, active.label
            )));
        }
        let action = actions.get(checkpoint.cursor).ok_or_else(|| {
            EngineError::Sequence(format!(
                "checkpoint step {} is out of range for '{}' ({} actions)",
                checkpoint.cursor,
                checkpoint.label,
                actions.len()
            ))
        })?;
        if action.kind != checkpoint.kind {
            return Err(EngineError::Sequence(format!(
                "checkpoint step {} of '{}' is {}, configuration has {}",
                checkpoint.cursor, checkpoint.label, checkpoint.kind, action.kind
            )));
        }

        info!("Resuming '{}' after step {}", checkpoint.label, checkpoint.cursor);
        self.state = Some(SequencerState {
            label: checkpoint.label.clone(),
            actions: actions.to_vec(),
            cursor: checkpoint.cursor,
            origin: SequenceOrigin::ResumedFromVideo,
            video_deadline: None,
        });
        self.advance(now)
            .ok_or_else(|| EngineError::Sequence("resumed sequence vanished".to_string()))
    }

    /// Drop the sequence without completing it
    pub fn clear(&mut self) -> Option<String> {
        self.state.take().map(|s| s.label)
    }

    fn dispatch_current(&mut self, now: Instant) -> Option<ActionDispatch> {
        let state = self.state.as_mut()?;
        let action = state.current()?.clone();
        state.video_deadline = action.video_end_after().and_then(|after| now.checked_add(after));
        debug!("Dispatching {} '{}' for '{}' step {}", action.kind, action.media, state.label, state.cursor);
        Some(ActionDispatch {
            label: state.label.clone(),
            index: state.cursor,
            action,
        })
    }
}

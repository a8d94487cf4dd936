//! Dwell confirmation timer
//!
//! A candidate has to stay on screen for the dwell duration before it is
//! confirmed. Two deadlines drive the machine:
//! - the confirm deadline (`started_at + dwell`) while tracking
//! - the grace deadline (`last_seen + grace`), pushed out by every sighting
//!
//! A candidate seen again before the grace deadline keeps the dwell clock
//! running from when tracking began, so single-frame classifier flicker
//! neither resets nor delays confirmation. Frames that stop arriving count
//! as absence.

use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DwellState {
    /// No candidate tracked
    Empty,
    /// A candidate is being watched
    Tracking { label: String, started_at: Instant },
    /// Dwell elapsed for this label; terminal until the next reset
    Confirmed { label: String },
}

impl DwellState {
    pub fn label(&self) -> Option<&str> {
        match self {
            DwellState::Empty => None,
            DwellState::Tracking { label, .. } | DwellState::Confirmed { label } => Some(label.as_str()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DwellTransition {
    /// Empty -> Tracking
    Started { label: String },
    /// Tracking restarted for a different label
    Restarted { from: String, to: String },
    /// Tracking -> Confirmed
    Confirmed { label: String },
    /// Grace elapsed, back to Empty
    Cleared { label: String },
}

/// Dwell/grace state machine
#[derive(Debug, Clone)]
pub struct DwellTimer {
    dwell: Duration,
    grace: Duration,
    state: DwellState,
    last_seen: Option<Instant>,
    // Latest frame had no candidate
    missing: bool,
    // Set on confirmation, cleared only by reset()
    latched: bool,
}

impl DwellTimer {
    pub fn new(dwell: Duration, grace: Duration) -> Self {
        Self {
            dwell,
            grace,
            state: DwellState::Empty,
            last_seen: None,
            missing: false,
            latched: false,
        }
    }

    pub fn state(&self) -> &DwellState {
        &self.state
    }

    /// Whether a confirmation already happened in this view session
    pub fn is_latched(&self) -> bool {
        self.latched
    }

    /// Whether the latest frame lacked the tracked candidate
    pub fn is_suspecting_loss(&self) -> bool {
        self.missing && self.state != DwellState::Empty
    }

    /// When the tracked candidate was last seen
    pub fn last_seen(&self) -> Option<Instant> {
        self.last_seen
    }

    fn grace_deadline(&self) -> Option<Instant> {
        match self.state {
            DwellState::Empty => None,
            _ => self.last_seen.map(|seen| seen + self.grace),
        }
    }

    fn confirm_deadline(&self) -> Option<Instant> {
        match &self.state {
            DwellState::Tracking { started_at, .. } if !self.latched => Some(*started_at + self.dwell),
            _ => None,
        }
    }

    /// Earliest pending deadline, if any
    pub fn next_deadline(&self) -> Option<Instant> {
        match (self.confirm_deadline(), self.grace_deadline()) {
            (Some(confirm), Some(grace)) => Some(confirm.min(grace)),
            (confirm, grace) => confirm.or(grace),
        }
    }

    /// Apply every deadline that is due at `now`, in chronological order.
    /// A grace deadline wins a tie with the confirm deadline.
    pub fn poll(&mut self, now: Instant) -> Vec<DwellTransition> {
        let mut transitions = Vec::new();
        loop {
            let grace_due = self.grace_deadline().filter(|d| *d <= now);
            let confirm_due = self.confirm_deadline().filter(|d| *d <= now);
            match (grace_due, confirm_due) {
                (Some(grace), Some(confirm)) if confirm < grace => self.confirm(&mut transitions),
                (Some(_), _) => self.clear(&mut transitions),
                (None, Some(_)) => self.confirm(&mut transitions),
                (None, None) => break,
            }
        }
        transitions
    }

    /// Feed the frame's candidate label (or its absence)
    pub fn observe(&mut self, candidate: Option<&str>, now: Instant) -> Vec<DwellTransition> {
        let mut transitions = self.poll(now);

        match candidate {
            Some(label) => {
                if std::mem::take(&mut self.missing) && self.state != DwellState::Empty {
                    debug!("Candidate '{}' back before grace elapsed", label);
                }
                self.last_seen = Some(now);
                match &self.state {
                    DwellState::Empty => {
                        debug!("Tracking '{}'", label);
                        self.state = DwellState::Tracking {
                            label: label.to_string(),
                            started_at: now,
                        };
                        transitions.push(DwellTransition::Started {
                            label: label.to_string(),
                        });
                    }
                    DwellState::Tracking { label: current, .. } if current != label => {
                        debug!("Candidate changed '{}' -> '{}', restarting dwell", current, label);
                        transitions.push(DwellTransition::Restarted {
                            from: current.clone(),
                            to: label.to_string(),
                        });
                        self.state = DwellState::Tracking {
                            label: label.to_string(),
                            started_at: now,
                        };
                    }
                    _ => {}
                }
            }
            None => self.missing = true,
        }

        transitions
    }

    /// Back to Empty and release the confirmation latch
    pub fn reset(&mut self) {
        self.state = DwellState::Empty;
        self.last_seen = None;
        self.missing = false;
        self.latched = false;
    }

    fn confirm(&mut self, transitions: &mut Vec<DwellTransition>) {
        if let DwellState::Tracking { label, .. } = &self.state {
            let label = label.clone();
            debug!("Dwell elapsed for '{}'", label);
            self.latched = true;
            self.state = DwellState::Confirmed { label: label.clone() };
            transitions.push(DwellTransition::Confirmed { label });
        }
    }

    fn clear(&mut self, transitions: &mut Vec<DwellTransition>) {
        self.last_seen = None;
        self.missing = false;
        let previous = std::mem::replace(&mut self.state, DwellState::Empty);
        if let Some(label) = previous.label() {
            debug!("Candidate '{}' lost", label);
            transitions.push(DwellTransition::Cleared {
                label: label.to_string(),
            });
        }
    }
}

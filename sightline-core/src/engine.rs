//! Synchronous recognition engine
//!
//! Owns every piece of mutable state: dwell timer, watchdogs, sequencer and
//! the detection gate. All inputs carry the instant they happened at; before
//! an input is applied, every timer due by then is fired in deadline order.
//! The engine never sleeps or spawns, so the async controller and the replay
//! driver share it unchanged.

use crate::config::{ActionCatalog, EngineConfig};
use crate::error::EngineError;
use crate::event::EngineEvent;
use crate::observation::{Candidate, MotionSample, Observation};
use crate::processing::{DwellState, DwellTimer, DwellTransition, ObservationFilter, Watchdog, WatchdogKind};
use crate::sequencer::{ActionDispatch, ActionSequencer, Advance, SequenceCheckpoint, SequenceOrigin, StartOutcome, ViewerReport};
use crate::session::SessionGate;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimerSource {
    Dwell,
    Watchdog(WatchdogKind),
    VideoEnd,
}

pub struct RecognitionEngine {
    config: EngineConfig,
    catalog: ActionCatalog,
    filter: ObservationFilter,
    dwell: DwellTimer,
    no_detection: Watchdog,
    movement: Watchdog,
    sequencer: ActionSequencer,
    gate: SessionGate,
    last_candidate: Option<Candidate>,
}

impl RecognitionEngine {
    /// Create a new engine; the view starts hidden until `appear`
    pub fn new(config: EngineConfig, catalog: ActionCatalog) -> Result<Self, EngineError> {
        config.validate().map_err(EngineError::Config)?;
        catalog.validate().map_err(EngineError::Config)?;

        Ok(Self {
            filter: ObservationFilter::new(config.confidence_threshold),
            dwell: DwellTimer::new(config.dwell_duration(), config.candidate_grace_interval()),
            no_detection: Watchdog::new(WatchdogKind::NoDetection, config.no_detection_timeout()),
            movement: Watchdog::new(WatchdogKind::Movement, config.movement_timeout()),
            sequencer: ActionSequencer::new(),
            gate: SessionGate::new(),
            last_candidate: None,
            config,
            catalog,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn catalog(&self) -> &ActionCatalog {
        &self.catalog
    }

    pub fn dwell_state(&self) -> &DwellState {
        self.dwell.state()
    }

    pub fn is_detection_enabled(&self) -> bool {
        self.gate.is_enabled()
    }

    pub fn is_visible(&self) -> bool {
        self.gate.is_visible()
    }

    pub fn sequence_label(&self) -> Option<&str> {
        self.sequencer.label()
    }

    pub fn sequence_cursor(&self) -> Option<usize> {
        self.sequencer.cursor()
    }

    pub fn sequence_origin(&self) -> Option<SequenceOrigin> {
        self.sequencer.origin()
    }

    pub fn checkpoint(&self) -> Option<SequenceCheckpoint> {
        self.sequencer.checkpoint()
    }

    /// View became visible: start a fresh session from Empty
    pub fn appear(&mut self, now: Instant) -> Vec<EngineEvent> {
        let mut events = Vec::new();
        if let Some(label) = self.sequencer.clear() {
            debug!("Dropping sequence '{}' on appear", label);
        }
        self.gate.release();
        self.gate.set_visible(true);
        self.dwell.reset();
        self.no_detection.reset(now);
        self.movement.reset(now);
        self.set_candidate(None, &mut events);
        info!("Recognition view active");
        events
    }

    /// View dismissed: cancel every timer and drop the sequence
    pub fn disappear(&mut self) -> Vec<EngineEvent> {
        let mut events = Vec::new();
        if let Some(label) = self.sequencer.clear() {
            info!("Sequence '{}' cancelled by dismissal", label);
        }
        self.gate.release();
        self.gate.set_visible(false);
        self.dwell.reset();
        self.no_detection.cancel();
        self.movement.cancel();
        self.set_candidate(None, &mut events);
        info!("Recognition view dismissed");
        events
    }

    /// Earliest pending timer across all components
    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers().into_iter().map(|(deadline, _)| deadline).min()
    }

    /// Fire every timer due at `now`, earliest first
    pub fn poll_timers(&mut self, now: Instant) -> Vec<EngineEvent> {
        let mut events = Vec::new();
        while let Some((deadline, source)) = self.timers().into_iter().filter(|(d, _)| *d <= now).min_by_key(|(d, _)| *d) {
            match source {
                TimerSource::Dwell => {
                    let transitions = self.dwell.poll(deadline);
                    self.apply_dwell(transitions, deadline, &mut events);
                }
                TimerSource::Watchdog(WatchdogKind::NoDetection) => {
                    if self.no_detection.poll(deadline) {
                        info!(
                            "No detection for {:?}, showing help (#{})",
                            self.config.no_detection_timeout(),
                            self.no_detection.fire_count()
                        );
                        events.push(EngineEvent::ShowHelpAffordance);
                    }
                }
                TimerSource::Watchdog(WatchdogKind::Movement) => {
                    if self.movement.poll(deadline) {
                        info!(
                            "No movement for {:?}, showing alert (#{})",
                            self.config.movement_timeout(),
                            self.movement.fire_count()
                        );
                        events.push(EngineEvent::ShowMovementAlert);
                    }
                }
                TimerSource::VideoEnd => {
                    if let Some(advance) = self.sequencer.poll(deadline) {
                        self.apply_advance(advance, deadline, &mut events);
                    }
                }
            }
        }
        events
    }

    /// One frame's classifier output
    pub fn on_frame(&mut self, observations: &[Observation], now: Instant) -> Vec<EngineEvent> {
        let mut events = self.poll_timers(now);
        if !self.gate.is_enabled() {
            trace!("Detection gated, dropping frame with {} observations", observations.len());
            return events;
        }

        let candidate = self.filter.best(observations).cloned();
        if candidate.is_some() {
            self.no_detection.reset(now);
        }
        let label = candidate.as_ref().map(|c| c.label.clone());
        self.set_candidate(candidate, &mut events);

        let transitions = self.dwell.observe(label.as_deref(), now);
        self.apply_dwell(transitions, now, &mut events);
        events
    }

    /// One accelerometer sample
    pub fn on_motion(&mut self, sample: MotionSample, now: Instant) -> Vec<EngineEvent> {
        let events = self.poll_timers(now);
        if self.gate.is_enabled() && sample.exceeds(self.config.movement_magnitude_threshold) {
            trace!("Movement {:?}", sample);
            self.movement.reset(now);
        }
        events
    }

    /// Viewer closure; advances the sequence when it matches the step on screen
    pub fn report_viewer_closed(&mut self, report: &ViewerReport, now: Instant) -> Vec<EngineEvent> {
        let mut events = self.poll_timers(now);
        if let Some(advance) = self.sequencer.report_viewer_closed(report, now) {
            self.apply_advance(advance, now, &mut events);
        }
        events
    }

    /// Start the action list for `label` without a visual detection
    pub fn trigger(&mut self, label: &str, now: Instant) -> Vec<EngineEvent> {
        let mut events = self.poll_timers(now);
        if !self.gate.is_visible() {
            warn!("Ignoring trigger for '{}' while the view is hidden", label);
            return events;
        }
        self.start_sequence(label, SequenceOrigin::Manual, now, &mut events);
        events
    }

    /// Start the default spot list
    pub fn trigger_spot(&mut self, now: Instant) -> Vec<EngineEvent> {
        let mut events = self.poll_timers(now);
        if !self.gate.is_visible() {
            warn!("Ignoring spot trigger while the view is hidden");
            return events;
        }
        let Some(actions) = self.catalog.spot().map(<[_]>::to_vec) else {
            warn!("No spot action list configured");
            return events;
        };
        if let StartOutcome::Dispatched(dispatch) = self.sequencer.start("spot", &actions, SequenceOrigin::Manual, now) {
            self.on_sequence_started(dispatch, SequenceOrigin::Manual, actions.len(), &mut events);
        }
        events
    }

    /// Rebuild the sequence a checkpoint was taken from after its viewer closed
    pub fn resume_after_viewer(&mut self, checkpoint: &SequenceCheckpoint, now: Instant) -> Result<Vec<EngineEvent>, EngineError> {
        let mut events = self.poll_timers(now);
        let actions = match checkpoint.label.as_str() {
            "spot" if self.catalog.actions_for("spot").is_none() => self.catalog.spot(),
            label => self.catalog.actions_for(label),
        }
        .map(<[_]>::to_vec)
        .ok_or_else(|| EngineError::Sequence(format!("no action list registered for '{}'", checkpoint.label)))?;

        let advance = self.sequencer.resume(checkpoint, &actions, now)?;
        if matches!(advance, Advance::Dispatched(_)) {
            self.gate.suspend(&checkpoint.label);
            self.no_detection.cancel();
            self.movement.cancel();
            self.set_candidate(None, &mut events);
            events.push(EngineEvent::DetectionSuspended {
                label: checkpoint.label.clone(),
            });
        }
        self.apply_advance(advance, now, &mut events);
        Ok(events)
    }

    fn timers(&self) -> Vec<(Instant, TimerSource)> {
        let mut timers = Vec::with_capacity(4);
        if self.gate.is_enabled() {
            if let Some(deadline) = self.dwell.next_deadline() {
                timers.push((deadline, TimerSource::Dwell));
            }
            if let Some(deadline) = self.no_detection.deadline() {
                timers.push((deadline, TimerSource::Watchdog(WatchdogKind::NoDetection)));
            }
            if let Some(deadline) = self.movement.deadline() {
                timers.push((deadline, TimerSource::Watchdog(WatchdogKind::Movement)));
            }
        }
        if let Some(deadline) = self.sequencer.next_deadline() {
            timers.push((deadline, TimerSource::VideoEnd));
        }
        timers
    }

    fn set_candidate(&mut self, candidate: Option<Candidate>, events: &mut Vec<EngineEvent>) {
        if self.last_candidate != candidate {
            self.last_candidate = candidate.clone();
            events.push(EngineEvent::CandidateChanged { candidate });
        }
    }

    fn apply_dwell(&mut self, transitions: Vec<DwellTransition>, now: Instant, events: &mut Vec<EngineEvent>) {
        for transition in transitions {
            match transition {
                DwellTransition::Started { label } => {
                    events.push(EngineEvent::TrackingStarted { label });
                }
                DwellTransition::Restarted { to, .. } => {
                    events.push(EngineEvent::TrackingStarted { label: to });
                }
                DwellTransition::Cleared { label } => {
                    events.push(EngineEvent::TrackingCleared { label });
                }
                DwellTransition::Confirmed { label } => {
                    info!("Confirmed '{}'", label);
                    events.push(EngineEvent::Confirmed { label: label.clone() });
                    self.start_sequence(&label, SequenceOrigin::AutoDetected, now, events);
                }
            }
        }
    }

    fn start_sequence(&mut self, label: &str, origin: SequenceOrigin, now: Instant, events: &mut Vec<EngineEvent>) {
        let Some(actions) = self.catalog.actions_for(label).map(<[_]>::to_vec) else {
            warn!("No action list registered for '{}', confirmation discarded", label);
            return;
        };

        match self.sequencer.start(label, &actions, origin, now) {
            StartOutcome::Dispatched(dispatch) => {
                self.on_sequence_started(dispatch, origin, actions.len(), events);
            }
            StartOutcome::Rejected { in_flight } => {
                debug!("'{}' not started, '{}' already in flight", label, in_flight);
            }
            StartOutcome::Empty => {
                warn!("Action list for '{}' is empty", label);
            }
        }
    }

    fn on_sequence_started(&mut self, dispatch: ActionDispatch, origin: SequenceOrigin, actions: usize, events: &mut Vec<EngineEvent>) {
        self.gate.suspend(&dispatch.label);
        self.no_detection.cancel();
        self.movement.cancel();
        self.set_candidate(None, events);
        events.push(EngineEvent::SequenceStarted {
            label: dispatch.label.clone(),
            origin,
            actions,
        });
        events.push(EngineEvent::DetectionSuspended {
            label: dispatch.label.clone(),
        });
        events.push(EngineEvent::ActionRequested {
            label: dispatch.label,
            index: dispatch.index,
            action: dispatch.action,
        });
    }

    fn apply_advance(&mut self, advance: Advance, now: Instant, events: &mut Vec<EngineEvent>) {
        match advance {
            Advance::Dispatched(dispatch) => {
                events.push(EngineEvent::ActionRequested {
                    label: dispatch.label,
                    index: dispatch.index,
                    action: dispatch.action,
                });
            }
            Advance::Finished { label } => {
                events.push(EngineEvent::SequenceFinished { label });
                self.gate.release();
                // The recognition view is back on screen: new session cycle
                self.dwell.reset();
                if self.gate.is_enabled() {
                    self.no_detection.reset(now);
                    self.movement.reset(now);
                    events.push(EngineEvent::DetectionResumed);
                }
            }
        }
    }
}

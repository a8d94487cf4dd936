//! Async recognition session
//!
//! Runs a [`RecognitionEngine`] on a dedicated task that is the only mutator
//! of engine state. Frames arrive through the latest-wins [`FrameSink`],
//! motion samples through a bounded queue, viewer reports and triggers as
//! commands. Timer deadlines are slept on inside the same `select!`, so
//! firing never blocks input handling.

use crate::capture::{FrameReceiver, FrameSink};
use crate::config::SightlineConfig;
use crate::engine::RecognitionEngine;
use crate::error::EngineError;
use crate::event::{EngineEvent, EventEnvelope};
use crate::observation::MotionSample;
use crate::sequencer::{SequenceCheckpoint, ViewerReport};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, info_span, trace, warn, Instrument};
use uuid::Uuid;

const COMMAND_BUFFER_SIZE: usize = 16;
const STOP_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug)]
enum Command {
    ViewerClosed(ViewerReport),
    Trigger(String),
    TriggerSpot,
    SetVisible(bool),
    Checkpoint(oneshot::Sender<Option<SequenceCheckpoint>>),
    Resume(SequenceCheckpoint, oneshot::Sender<Result<(), EngineError>>),
}

/// Handle to one recognition view session
pub struct RecognitionSession {
    session_id: Uuid,
    config: Arc<SightlineConfig>,
    event_sender: broadcast::Sender<EventEnvelope>,
    command_sender: Arc<RwLock<Option<mpsc::Sender<Command>>>>,
    motion_sender: Arc<RwLock<Option<mpsc::Sender<MotionSample>>>>,
    is_running: Arc<RwLock<bool>>,
    task_handle: Arc<RwLock<Option<JoinHandle<()>>>>,
}

impl RecognitionSession {
    /// Create a new session
    pub fn new(config: SightlineConfig) -> Result<Self, EngineError> {
        config
            .validate()
            .map_err(|e| EngineError::Config(format!("Invalid session config: {}", e)))?;

        let (event_sender, _) = broadcast::channel(config.engine.event_buffer_size);
        Ok(Self {
            session_id: Uuid::new_v4(),
            config: Arc::new(config),
            event_sender,
            command_sender: Arc::new(RwLock::new(None)),
            motion_sender: Arc::new(RwLock::new(None)),
            is_running: Arc::new(RwLock::new(false)),
            task_handle: Arc::new(RwLock::new(None)),
        })
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn config(&self) -> &SightlineConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        *self.is_running.read()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<EventEnvelope> {
        self.event_sender.subscribe()
    }

    /// Spawn the controller task with the view visible. Returns the sink the
    /// capture side publishes frames into.
    pub fn start(&self) -> Result<FrameSink, EngineError> {
        {
            let mut is_running = self.is_running.write();
            if *is_running {
                return Err(EngineError::Channel("Recognition session already running".to_string()));
            }
            *is_running = true;
        }

        let engine = match RecognitionEngine::new(self.config.engine.clone(), self.config.actions.clone()) {
            Ok(engine) => engine,
            Err(e) => {
                *self.is_running.write() = false;
                return Err(e);
            }
        };

        let (sink, frames) = FrameSink::channel();
        let (command_tx, commands) = mpsc::channel(COMMAND_BUFFER_SIZE);
        let (motion_tx, motion) = mpsc::channel(self.config.engine.motion_queue_size);
        *self.command_sender.write() = Some(command_tx);
        *self.motion_sender.write() = Some(motion_tx);

        let controller = Controller {
            session_id: self.session_id,
            engine,
            events: self.event_sender.clone(),
        };
        let span = info_span!("recognition_session", session = %self.session_id);
        let handle = tokio::spawn(controller.run(commands, motion, frames).instrument(span));
        *self.task_handle.write() = Some(handle);

        info!("Recognition session {} started", self.session_id);
        Ok(sink)
    }

    /// Dismiss the view and stop the controller task
    pub async fn stop(&self) -> Result<(), EngineError> {
        {
            let mut is_running = self.is_running.write();
            if !*is_running {
                return Ok(());
            }
            *is_running = false;
        }

        // Closing the command channel ends the controller loop
        self.command_sender.write().take();
        self.motion_sender.write().take();

        let handle = self.task_handle.write().take();
        if let Some(mut handle) = handle {
            if tokio::time::timeout(STOP_TIMEOUT, &mut handle).await.is_err() {
                warn!("Controller task did not stop in time, aborting");
                handle.abort();
            }
        }

        info!("Recognition session {} stopped", self.session_id);
        Ok(())
    }

    /// Queue an accelerometer sample; dropped with a warning when the queue is full
    pub fn on_motion(&self, sample: MotionSample) -> Result<(), EngineError> {
        let guard = self.motion_sender.read();
        let sender = guard
            .as_ref()
            .ok_or_else(|| EngineError::Channel("Recognition session not running".to_string()))?;

        match sender.try_send(sample) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("Motion queue full, dropping sample");
                Ok(())
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                Err(EngineError::Channel("Motion queue closed".to_string()))
            }
        }
    }

    pub async fn report_viewer_closed(&self, report: ViewerReport) -> Result<(), EngineError> {
        self.send(Command::ViewerClosed(report)).await
    }

    pub async fn trigger(&self, label: impl Into<String>) -> Result<(), EngineError> {
        self.send(Command::Trigger(label.into())).await
    }

    pub async fn trigger_spot(&self) -> Result<(), EngineError> {
        self.send(Command::TriggerSpot).await
    }

    /// View visibility, the gate's second writer
    pub async fn set_visible(&self, visible: bool) -> Result<(), EngineError> {
        self.send(Command::SetVisible(visible)).await
    }

    pub async fn checkpoint(&self) -> Result<Option<SequenceCheckpoint>, EngineError> {
        let (reply, response) = oneshot::channel();
        self.send(Command::Checkpoint(reply)).await?;
        response
            .await
            .map_err(|_| EngineError::Channel("Controller dropped checkpoint request".to_string()))
    }

    pub async fn resume_after_viewer(&self, checkpoint: SequenceCheckpoint) -> Result<(), EngineError> {
        let (reply, response) = oneshot::channel();
        self.send(Command::Resume(checkpoint, reply)).await?;
        response
            .await
            .map_err(|_| EngineError::Channel("Controller dropped resume request".to_string()))?
    }

    async fn send(&self, command: Command) -> Result<(), EngineError> {
        let sender = self
            .command_sender
            .read()
            .clone()
            .ok_or_else(|| EngineError::Channel("Recognition session not running".to_string()))?;
        sender
            .send(command)
            .await
            .map_err(|_| EngineError::Channel("Controller task stopped".to_string()))
    }
}

struct Controller {
    session_id: Uuid,
    engine: RecognitionEngine,
    events: broadcast::Sender<EventEnvelope>,
}

impl Controller {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut motion: mpsc::Receiver<MotionSample>,
        mut frames: FrameReceiver,
    ) {
        let appeared = self.engine.appear(Instant::now());
        self.emit(appeared);

        let mut frames_open = true;
        let mut motion_open = true;

        loop {
            let deadline = self.engine.next_deadline();

            tokio::select! {
                biased;

                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },

                changed = frames.changed(), if frames_open => match changed {
                    Ok(()) => {
                        let frame = frames.borrow_and_update().clone();
                        if let Some(frame) = frame {
                            trace!("Frame {} with {} observations", frame.sequence, frame.observations.len());
                            let events = self.engine.on_frame(&frame.observations, Instant::now());
                            self.emit(events);
                        }
                    }
                    Err(_) => {
                        debug!("Frame sink dropped");
                        frames_open = false;
                    }
                },

                sample = motion.recv(), if motion_open => match sample {
                    Some(sample) => {
                        let events = self.engine.on_motion(sample, Instant::now());
                        self.emit(events);
                    }
                    None => motion_open = false,
                },

                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    let events = self.engine.poll_timers(Instant::now());
                    self.emit(events);
                }
            }
        }

        let dismissed = self.engine.disappear();
        self.emit(dismissed);
        debug!("Controller task finished");
    }

    fn handle_command(&mut self, command: Command) {
        let now = Instant::now();
        let events = match command {
            Command::ViewerClosed(report) => self.engine.report_viewer_closed(&report, now),
            Command::Trigger(label) => self.engine.trigger(&label, now),
            Command::TriggerSpot => self.engine.trigger_spot(now),
            Command::SetVisible(true) if !self.engine.is_visible() => self.engine.appear(now),
            Command::SetVisible(false) if self.engine.is_visible() => self.engine.disappear(),
            Command::SetVisible(visible) => {
                debug!("View already {}", if visible { "visible" } else { "hidden" });
                self.engine.poll_timers(now)
            }
            Command::Checkpoint(reply) => {
                if reply.send(self.engine.checkpoint()).is_err() {
                    debug!("Checkpoint requester went away");
                }
                Vec::new()
            }
            Command::Resume(checkpoint, reply) => {
                // Flush due timers first so a failed resume does not swallow them
                let mut events = self.engine.poll_timers(now);
                let result = match self.engine.resume_after_viewer(&checkpoint, now) {
                    Ok(resumed) => {
                        events.extend(resumed);
                        Ok(())
                    }
                    Err(e) => {
                        error!("Failed to resume '{}': {}", checkpoint.label, e);
                        Err(e)
                    }
                };
                if reply.send(result).is_err() {
                    debug!("Resume requester went away");
                }
                events
            }
        };
        self.emit(events);
    }

    fn emit(&self, events: Vec<EngineEvent>) {
        for event in events {
            debug!("Event: {}", event);
            // No subscribers is not an error
            let _ = self.events.send(EventEnvelope::new(self.session_id, event));
        }
    }
}

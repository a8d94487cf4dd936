//! Producer side: frame capture and classification
//!
//! The capture run-loop blocks, so it runs on tokio's blocking pool and hands
//! each frame's observations to the controller through a latest-value
//! channel. A slow controller only ever sees the newest frame.

use crate::error::EngineError;
use crate::observation::Observation;
use bytes::Bytes;
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Raw frame as delivered by the camera
#[derive(Debug, Clone, PartialEq)]
pub struct CapturedFrame {
    pub sequence: u64,
    pub width: u32,
    pub height: u32,
    pub data: Bytes,
}

impl CapturedFrame {
    pub fn new(sequence: u64, width: u32, height: u32, data: impl Into<Bytes>) -> Self {
        Self {
            sequence,
            width,
            height,
            data: data.into(),
        }
    }
}

/// Classifier output for one frame
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FrameObservations {
    pub sequence: u64,
    pub observations: Vec<Observation>,
}

pub type FrameReceiver = watch::Receiver<Option<FrameObservations>>;

/// Writer half of the latest-wins frame handoff
#[derive(Debug)]
pub struct FrameSink {
    sender: watch::Sender<Option<FrameObservations>>,
    next_sequence: u64,
}

impl FrameSink {
    pub fn channel() -> (Self, FrameReceiver) {
        let (sender, receiver) = watch::channel(None);
        (
            Self {
                sender,
                next_sequence: 0,
            },
            receiver,
        )
    }

    /// Publish a frame's observations, replacing any frame not yet consumed
    pub fn on_frame(&mut self, observations: Vec<Observation>) -> Result<(), EngineError> {
        self.next_sequence += 1;
        let frame = FrameObservations {
            sequence: self.next_sequence,
            observations,
        };
        self.sender
            .send(Some(frame))
            .map_err(|_| EngineError::Channel("frame receiver dropped".to_string()))
    }

    /// Number of frames published so far
    pub fn published(&self) -> u64 {
        self.next_sequence
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

/// Camera abstraction. All calls happen on a blocking worker.
pub trait FrameSource: Send + 'static {
    fn start_running(&mut self) -> Result<(), EngineError>;

    /// Next frame, or `None` when the stream has ended
    fn next_frame(&mut self) -> Result<Option<CapturedFrame>, EngineError>;

    fn stop_running(&mut self);
}

/// Per-frame synchronous classifier
pub trait Classifier: Send + 'static {
    fn classify(&mut self, frame: &CapturedFrame) -> Result<Vec<Observation>, EngineError>;
}

/// Shared stop flag for a running pipeline
#[derive(Debug, Clone, Default)]
pub struct StopHandle {
    is_running: Arc<RwLock<bool>>,
}

impl StopHandle {
    pub fn is_running(&self) -> bool {
        *self.is_running.read()
    }

    pub fn stop(&self) {
        *self.is_running.write() = false;
    }
}

/// Frame source + classifier driven on a blocking worker
pub struct CapturePipeline<S, C> {
    source: S,
    classifier: C,
    handle: StopHandle,
}

impl<S: FrameSource, C: Classifier> CapturePipeline<S, C> {
    pub fn new(source: S, classifier: C) -> Self {
        Self {
            source,
            classifier,
            handle: StopHandle::default(),
        }
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.handle.clone()
    }

    /// Run the capture loop until the source ends, the sink's receiver is
    /// dropped, or `stop()` is called. Resolves to the number of frames
    /// delivered.
    pub fn spawn(self, sink: FrameSink) -> JoinHandle<Result<u64, EngineError>> {
        *self.handle.is_running.write() = true;
        tokio::task::spawn_blocking(move || self.run(sink))
    }

    fn run(mut self, mut sink: FrameSink) -> Result<u64, EngineError> {
        if let Err(e) = self.source.start_running() {
            self.handle.stop();
            return Err(EngineError::Capture(format!("Failed to start frame source: {}", e)));
        }
        info!("Capture pipeline started");

        let mut delivered = 0u64;
        let result = loop {
            if !self.handle.is_running() {
                break Ok(delivered);
            }

            let frame = match self.source.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    debug!("Frame source ended after {} frames", delivered);
                    break Ok(delivered);
                }
                Err(e) => {
                    error!("Frame source error: {}", e);
                    break Err(EngineError::Capture(e.to_string()));
                }
            };

            let observations = self.classifier.classify(&frame).unwrap_or_else(|e| {
                warn!("Classifier failed on frame {}: {}", frame.sequence, e);
                Vec::new()
            });

            if sink.on_frame(observations).is_err() {
                warn!("Frame receiver dropped, stopping capture");
                break Ok(delivered);
            }
            delivered += 1;
        };

        self.source.stop_running();
        self.handle.stop();
        info!("Capture pipeline stopped");
        result
    }
}

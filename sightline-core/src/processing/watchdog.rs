//! Rearming timeout monitors

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchdogKind {
    /// No candidate seen for the timeout
    NoDetection,
    /// Device held still for the timeout
    Movement,
}

impl std::fmt::Display for WatchdogKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WatchdogKind::NoDetection => write!(f, "no_detection"),
            WatchdogKind::Movement => write!(f, "movement"),
        }
    }
}

/// Timeout monitor. Fires once per cycle and starts the next cycle at the
/// firing instant, so the signal repeats while the stimulus stays absent.
#[derive(Debug, Clone)]
pub struct Watchdog {
    kind: WatchdogKind,
    timeout: Duration,
    last_reset_at: Option<Instant>,
    fire_count: u64,
}

impl Watchdog {
    pub fn new(kind: WatchdogKind, timeout: Duration) -> Self {
        Self {
            kind,
            timeout,
            last_reset_at: None,
            fire_count: 0,
        }
    }

    pub fn kind(&self) -> WatchdogKind {
        self.kind
    }

    pub fn is_armed(&self) -> bool {
        self.last_reset_at.is_some()
    }

    /// Times fired since creation
    pub fn fire_count(&self) -> u64 {
        self.fire_count
    }

    /// Start a fresh cycle at `now`
    pub fn reset(&mut self, now: Instant) {
        self.last_reset_at = Some(now);
    }

    pub fn cancel(&mut self) {
        self.last_reset_at = None;
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.last_reset_at.map(|at| at + self.timeout)
    }

    /// Fire if the deadline is due. Handles a single cycle per call so the
    /// caller can interleave it with other timers in deadline order.
    pub fn poll(&mut self, now: Instant) -> bool {
        let deadline = match self.deadline() {
            Some(deadline) if deadline <= now => deadline,
            _ => return false,
        };

        self.fire_count += 1;
        debug!("{} watchdog fired (#{})", self.kind, self.fire_count);
        self.last_reset_at = Some(deadline);
        true
    }
}

//! Detection gate

use tracing::debug;

/// Gate deciding whether frame results reach the dwell logic.
///
/// Two writers: the view's visibility and the action sequencer. Frames are
/// processed only while the view is visible and no sequence holds the gate.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionGate {
    visible: bool,
    suspended_for: Option<String>,
}

impl SessionGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_enabled(&self) -> bool {
        self.visible && self.suspended_for.is_none()
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    /// Label of the sequence holding the gate, if any
    pub fn suspended_for(&self) -> Option<&str> {
        self.suspended_for.as_deref()
    }

    /// Returns true if visibility changed
    pub fn set_visible(&mut self, visible: bool) -> bool {
        if self.visible == visible {
            return false;
        }
        debug!("View {}", if visible { "appeared" } else { "disappeared" });
        self.visible = visible;
        true
    }

    pub fn suspend(&mut self, label: &str) {
        debug!("Detection suspended for sequence '{}'", label);
        self.suspended_for = Some(label.to_string());
    }

    /// Returns the label that held the gate
    pub fn release(&mut self) -> Option<String> {
        let label = self.suspended_for.take();
        if let Some(label) = &label {
            debug!("Detection resumed after sequence '{}'", label);
        }
        label
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gate_starts_disabled() {
        let gate = SessionGate::new();
        assert!(!gate.is_enabled());
        assert!(!gate.is_visible());
    }

    #[test]
    fn test_visibility_writer() {
        let mut gate = SessionGate::new();
        assert!(gate.set_visible(true));
        assert!(!gate.set_visible(true));
        assert!(gate.is_enabled());
        assert!(gate.set_visible(false));
        assert!(!gate.is_enabled());
    }

    #[test]
    fn test_sequencer_writer() {
        let mut gate = SessionGate::new();
        gate.set_visible(true);
        gate.suspend("statue");
        assert!(!gate.is_enabled());
        assert_eq!(gate.suspended_for(), Some("statue"));
        assert_eq!(gate.release(), Some("statue".to_string()));
        assert!(gate.is_enabled());
        assert_eq!(gate.release(), None);
    }

    #[test]
    fn test_release_while_hidden_stays_disabled() {
        let mut gate = SessionGate::new();
        gate.set_visible(true);
        gate.suspend("statue");
        gate.set_visible(false);
        gate.release();
        assert!(!gate.is_enabled());
    }
}

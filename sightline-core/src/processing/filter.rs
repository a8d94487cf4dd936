//! Best-candidate selection

use crate::observation::Observation;
use tracing::trace;

/// Reduces a frame's observations to at most one candidate
#[derive(Debug, Clone, Copy)]
pub struct ObservationFilter {
    threshold: f32,
}

impl ObservationFilter {
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Highest-confidence observation strictly above the threshold.
    /// Ties keep the first one encountered.
    pub fn best<'a>(&self, observations: &'a [Observation]) -> Option<&'a Observation> {
        let mut best: Option<&Observation> = None;
        for observation in observations {
            if !observation.confidence.is_finite() || observation.confidence <= self.threshold {
                continue;
            }
            match best {
                Some(current) if current.confidence >= observation.confidence => {}
                _ => best = Some(observation),
            }
        }
        trace!(
            "Filtered {} observations -> {:?}",
            observations.len(),
            best.map(|o| o.label.as_str())
        );
        best
    }
}

impl Default for ObservationFilter {
    fn default() -> Self {
        Self::new(0.5)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observation::BoundingBox;

    fn obs(label: &str, confidence: f32) -> Observation {
        Observation::new(label, confidence, BoundingBox::new(0.1, 0.1, 0.2, 0.2))
    }

    #[test]
    fn test_empty_frame() {
        let filter = ObservationFilter::default();
        assert!(filter.best(&[]).is_none());
    }

    #[test]
    fn test_all_below_threshold() {
        let filter = ObservationFilter::default();
        let frame = vec![obs("statue", 0.3), obs("mural", 0.49)];
        assert!(filter.best(&frame).is_none());
    }

    #[test]
    fn test_threshold_is_exclusive() {
        let filter = ObservationFilter::default();
        assert!(filter.best(&[obs("statue", 0.5)]).is_none());
        assert_eq!(filter.best(&[obs("statue", 0.51)]).map(|o| o.label.as_str()), Some("statue"));
    }

    #[test]
    fn test_picks_highest_confidence() {
        let filter = ObservationFilter::default();
        let frame = vec![obs("statue", 0.6), obs("mural", 0.9), obs("fountain", 0.7)];
        assert_eq!(filter.best(&frame).map(|o| o.label.as_str()), Some("mural"));
    }

    #[test]
    fn test_ties_keep_first() {
        let filter = ObservationFilter::default();
        let frame = vec![obs("statue", 0.8), obs("mural", 0.8)];
        assert_eq!(filter.best(&frame).map(|o| o.label.as_str()), Some("statue"));
    }

    #[test]
    fn test_skips_nan_confidence() {
        let filter = ObservationFilter::default();
        let frame = vec![obs("statue", f32::NAN), obs("mural", 0.7)];
        assert_eq!(filter.best(&frame).map(|o| o.label.as_str()), Some("mural"));
    }
}

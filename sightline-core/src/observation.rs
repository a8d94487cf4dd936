//! Classifier observations and motion samples

use serde::{Deserialize, Serialize};

/// Bounding box in normalized image coordinates (origin, width, height in 0..=1)
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self { x, y, width, height }
    }

    /// Center point of the box
    pub fn center(&self) -> (f32, f32) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    /// Whether the box lies inside the unit square
    pub fn is_normalized(&self) -> bool {
        let coords = [self.x, self.y, self.width, self.height];
        if coords.iter().any(|c| !c.is_finite() || *c < 0.0) {
            return false;
        }
        self.x + self.width <= 1.0 && self.y + self.height <= 1.0
    }
}

/// One ranked classifier result for a frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub label: String,
    pub confidence: f32,
    #[serde(default, alias = "bbox")]
    pub bounding_box: BoundingBox,
}

impl Observation {
    pub fn new(label: impl Into<String>, confidence: f32, bounding_box: BoundingBox) -> Self {
        Self {
            label: label.into(),
            confidence,
            bounding_box,
        }
    }
}

/// Best-of-frame observation that passed the confidence threshold
pub type Candidate = Observation;

/// Device acceleration sample in g, per axis
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MotionSample {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl MotionSample {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    /// True if any axis magnitude is strictly above `threshold`
    pub fn exceeds(&self, threshold: f32) -> bool {
        [self.x, self.y, self.z]
            .iter()
            .any(|a| a.is_finite() && a.abs() > threshold)
    }
}

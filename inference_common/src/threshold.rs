use std::fmt;
use std::ops::RangeInclusive;

use serde::Serialize;

use crate::error::PipelineError;

/// Bounds accepted by the batch processor.
pub const FULL_RANGE: RangeInclusive<f32> = 0.0..=1.0;
/// Bounds of the web UI slider.
pub const SLIDER_RANGE: RangeInclusive<f32> = 0.1..=1.0;

pub const DEFAULT_CONFIDENCE: f32 = 0.5;

/// Inclusive lower bound on detection confidence, validated on construction.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize)]
pub struct Threshold(f32);

impl Threshold {
    pub fn new(value: f32) -> Result<Self, PipelineError> {
        Self::within(value, FULL_RANGE)
    }

    pub fn within(value: f32, bounds: RangeInclusive<f32>) -> Result<Self, PipelineError> {
        // NaN fails `contains`, too.
        if bounds.contains(&value) {
            Ok(Self(value))
        } else {
            Err(PipelineError::InvalidThreshold {
                value,
                min: *bounds.start(),
                max: *bounds.end(),
            })
        }
    }

    pub fn value(self) -> f32 {
        self.0
    }

    /// Whether a detection with `confidence` passes this threshold.
    pub fn admits(self, confidence: f32) -> bool {
        confidence >= self.0
    }
}

impl Default for Threshold {
    fn default() -> Self {
        Self(DEFAULT_CONFIDENCE)
    }
}

impl fmt::Display for Threshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounds_are_inclusive() {
        assert!(Threshold::new(0.0).is_ok());
        assert!(Threshold::new(1.0).is_ok());
        assert!(Threshold::new(0.5).is_ok());
    }

    #[test]
    fn test_out_of_range_rejected() {
        assert!(matches!(
            Threshold::new(-0.1),
            Err(PipelineError::InvalidThreshold { value, .. }) if value == -0.1
        ));
        assert!(matches!(
            Threshold::new(1.1),
            Err(PipelineError::InvalidThreshold { .. })
        ));
        assert!(Threshold::new(f32::NAN).is_err());
    }

    #[test]
    fn test_slider_range() {
        assert!(Threshold::within(0.05, SLIDER_RANGE).is_err());
        assert!(Threshold::within(0.1, SLIDER_RANGE).is_ok());
        assert!(Threshold::within(1.0, SLIDER_RANGE).is_ok());
    }

    #[test]
    fn test_admits_is_inclusive() {
        let t = Threshold::new(0.5).unwrap();
        assert!(t.admits(0.5));
        assert!(t.admits(0.9));
        assert!(!t.admits(0.49));
    }
}

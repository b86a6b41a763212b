use std::fmt;

use serde::Serialize;

/// How far a run has come. `total` is `None` when the source could not tell.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Progress {
    pub processed: u64,
    pub total: Option<u64>,
}

impl Progress {
    pub fn new(processed: u64, total: Option<u64>) -> Self {
        Self { processed, total }
    }

    /// Percentage done, `None` when the total is unknown or zero.
    /// Frame counts from containers are estimates, so this never exceeds 100.
    pub fn percent(&self) -> Option<f64> {
        match self.total {
            Some(total) if total > 0 => {
                Some((self.processed as f64 / total as f64 * 100.0).min(100.0))
            }
            _ => None,
        }
    }
}

impl fmt::Display for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.percent(), self.total) {
            (Some(pct), Some(total)) => {
                write!(f, "{pct:.1}% ({}/{total} frames)", self.processed)
            }
            _ => write!(f, "{} frames", self.processed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percent_with_known_total() {
        let p = Progress::new(30, Some(120));
        assert_eq!(p.percent(), Some(25.0));
        assert_eq!(p.to_string(), "25.0% (30/120 frames)");
    }

    #[test]
    fn test_zero_or_unknown_total_has_no_percent() {
        assert_eq!(Progress::new(30, Some(0)).percent(), None);
        assert_eq!(Progress::new(30, None).percent(), None);
        assert_eq!(Progress::new(30, Some(0)).to_string(), "30 frames");
    }

    #[test]
    fn test_underestimated_total_is_clamped() {
        assert_eq!(Progress::new(150, Some(100)).percent(), Some(100.0));
    }
}

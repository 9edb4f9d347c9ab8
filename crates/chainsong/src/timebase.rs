//! Musical time base: tempo plus step resolution.

use serde::{Deserialize, Serialize};

use crate::error::{ChainError, Result};

/// Quarter notes in one 4/4 bar.
pub const QUARTERS_PER_BAR: u64 = 4;

/// Tempo (quarter notes per minute) and quantization (steps per quarter note).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeBase {
    pub qpm: f64,
    pub steps_per_quarter: u32,
}

impl TimeBase {
    /// Validated constructor.
    pub fn new(qpm: f64, steps_per_quarter: u32) -> Result<Self> {
        seconds_per_step(qpm, steps_per_quarter)?;
        Ok(Self {
            qpm,
            steps_per_quarter,
        })
    }

    pub fn seconds_per_step(&self) -> Result<f64> {
        seconds_per_step(self.qpm, self.steps_per_quarter)
    }

    /// Same step resolution at a different tempo.
    pub fn with_qpm(self, qpm: f64) -> Result<Self> {
        Self::new(qpm, self.steps_per_quarter)
    }

    /// Steps in `bars` bars of 4/4, or `None` if that does not fit in a `u64`.
    pub fn steps_for_bars(&self, bars: u64) -> Option<u64> {
        bars.checked_mul(QUARTERS_PER_BAR)?
            .checked_mul(self.steps_per_quarter as u64)
    }
}

/// Seconds covered by a single step: `60 / (qpm * steps_per_quarter)`.
pub fn seconds_per_step(qpm: f64, steps_per_quarter: u32) -> Result<f64> {
    if !(qpm.is_finite() && qpm > 0.0) || steps_per_quarter == 0 {
        return Err(ChainError::InvalidTimeBase {
            qpm,
            steps_per_quarter,
        });
    }
    Ok(60.0 / (qpm * steps_per_quarter as f64))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seconds_per_step_at_120_qpm() {
        assert_eq!(seconds_per_step(120.0, 4).unwrap(), 0.125);
        assert_eq!(seconds_per_step(120.0, 1).unwrap(), 0.5);
        assert_eq!(seconds_per_step(60.0, 16).unwrap(), 0.0625);
    }

    #[test]
    fn test_seconds_per_step_matches_formula() {
        for qpm in [1.0, 57.5, 90.0, 120.0, 233.3] {
            for spq in [1u32, 2, 3, 4, 6, 16, 32] {
                let sps = seconds_per_step(qpm, spq).unwrap();
                assert_eq!(sps, 60.0 / (qpm * spq as f64));
                assert!(sps > 0.0);
            }
        }
    }

    #[test]
    fn test_rejects_non_positive_inputs() {
        for (qpm, spq) in [(0.0, 4), (-120.0, 4), (120.0, 0), (f64::NAN, 4), (f64::INFINITY, 4)] {
            let err = seconds_per_step(qpm, spq).unwrap_err();
            assert!(matches!(err, ChainError::InvalidTimeBase { .. }), "{qpm} {spq}");
        }
    }

    #[test]
    fn test_steps_for_bars() {
        let tb = TimeBase::new(120.0, 4).unwrap();
        assert_eq!(tb.steps_for_bars(12), Some(192));
        let tb = TimeBase::new(120.0, 32).unwrap();
        assert_eq!(tb.steps_for_bars(28), Some(3584));
        assert_eq!(tb.steps_for_bars(u64::MAX / 4), None);
    }

    #[test]
    fn test_with_qpm_keeps_resolution() {
        let tb = TimeBase::new(120.0, 16).unwrap().with_qpm(80.0).unwrap();
        assert_eq!(tb.steps_per_quarter, 16);
        assert_eq!(tb.qpm, 80.0);
        assert!(TimeBase::new(120.0, 16).unwrap().with_qpm(0.0).is_err());
    }
}

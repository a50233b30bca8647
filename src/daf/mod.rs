//! # Deterministic Annealing Filter
//!
//! The DAF turns a draft candidate (hard hit assignment) into a soft-weighted, smoothed
//! trajectory. At each temperature `T` of an [`AnnealingSchedule`] the
//! [`DafFitter`](fitter::DafFitter):
//!
//! 1. runs a forward Kalman filter over the planes in increasing z,
//! 2. runs a backward Kalman filter in decreasing z,
//! 3. combines both into a smoothed estimate at every plane,
//! 4. recomputes every hit weight from its residual chi2 against the smoothed estimate
//!    ([`weights::responsibilities`]).
//!
//! The schedule decreases geometrically by default (`81, 27, 9, 3, 1`); the last, coldest
//! temperature fixes the weights used for the reported chi2.
pub mod fitter;
pub mod weights;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::trackfit_errors::TrackFitError;

/// Descending list of annealing temperatures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AnnealingSchedule {
    temperatures: Vec<f64>,
}

impl Default for AnnealingSchedule {
    fn default() -> Self {
        AnnealingSchedule {
            temperatures: vec![81.0, 27.0, 9.0, 3.0, 1.0],
        }
    }
}

impl AnnealingSchedule {
    /// Geometric schedule from `start` to `end` in `steps` temperatures (both ends included).
    ///
    /// Arguments
    /// -----------------
    /// * `start` – hottest temperature.
    /// * `end` – coldest temperature, `0 < end ≤ start`.
    /// * `steps` – number of temperatures, at least one. With one step only `end` is used.
    ///
    /// Return
    /// ----------
    /// * The schedule, or [`TrackFitError::InvalidParameter`] on inconsistent bounds.
    pub fn geometric(start: f64, end: f64, steps: usize) -> Result<Self, TrackFitError> {
        if steps == 0 {
            return Err(TrackFitError::InvalidParameter(
                "annealing schedule needs at least one step".into(),
            ));
        }
        if !(end > 0.0 && start >= end && start.is_finite()) {
            return Err(TrackFitError::InvalidParameter(
                "annealing schedule requires 0 < end <= start".into(),
            ));
        }
        if steps == 1 {
            return Ok(AnnealingSchedule {
                temperatures: vec![end],
            });
        }
        let ratio = (end / start).powf(1.0 / (steps - 1) as f64);
        let mut temperatures: Vec<f64> = (0..steps)
            .map(|i| start * ratio.powi(i as i32))
            .collect();
        // Land exactly on the coldest temperature
        if let Some(last) = temperatures.last_mut() {
            *last = end;
        }
        Ok(AnnealingSchedule { temperatures })
    }

    /// Explicit schedule; validated like every other parameter.
    pub fn from_temperatures(temperatures: Vec<f64>) -> Result<Self, TrackFitError> {
        let schedule = AnnealingSchedule { temperatures };
        schedule.validate()?;
        Ok(schedule)
    }

    pub(crate) fn validate(&self) -> Result<(), TrackFitError> {
        if self.temperatures.is_empty() {
            return Err(TrackFitError::InvalidParameter(
                "annealing schedule is empty".into(),
            ));
        }
        if !self
            .temperatures
            .iter()
            .all(|t| t.is_finite() && *t > 0.0)
        {
            return Err(TrackFitError::InvalidParameter(
                "annealing temperatures must be finite and > 0".into(),
            ));
        }
        if self.temperatures.windows(2).any(|w| w[1] > w[0]) {
            return Err(TrackFitError::InvalidParameter(
                "annealing temperatures must be non-increasing".into(),
            ));
        }
        Ok(())
    }

    pub fn temperatures(&self) -> &[f64] {
        &self.temperatures
    }

    /// Coldest (final) temperature.
    pub fn final_temperature(&self) -> f64 {
        self.temperatures.last().copied().unwrap_or(1.0)
    }

    pub fn len(&self) -> usize {
        self.temperatures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.temperatures.is_empty()
    }
}

impl fmt::Display for AnnealingSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.temperatures.iter().map(|t| format!("{t:.3}")).collect();
        write!(f, "[{}]", parts.join(" → "))
    }
}

#[cfg(test)]
mod test_schedule {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_default_schedule() {
        let s = AnnealingSchedule::default();
        assert_eq!(s.temperatures(), &[81.0, 27.0, 9.0, 3.0, 1.0]);
        assert_eq!(s.final_temperature(), 1.0);
        assert!(s.validate().is_ok());
    }

    #[test]
    fn test_geometric_matches_default() {
        let s = AnnealingSchedule::geometric(81.0, 1.0, 5).unwrap();
        for (a, b) in s.temperatures().iter().zip([81.0, 27.0, 9.0, 3.0, 1.0]) {
            assert_relative_eq!(*a, b, max_relative = 1e-12);
        }
        assert_eq!(s.final_temperature(), 1.0);
    }

    #[test]
    fn test_single_step() {
        let s = AnnealingSchedule::geometric(50.0, 2.0, 1).unwrap();
        assert_eq!(s.temperatures(), &[2.0]);
    }

    #[test]
    fn test_invalid_schedules() {
        assert!(AnnealingSchedule::geometric(1.0, 2.0, 3).is_err());
        assert!(AnnealingSchedule::geometric(10.0, 0.0, 3).is_err());
        assert!(AnnealingSchedule::geometric(10.0, 1.0, 0).is_err());
        assert!(AnnealingSchedule::from_temperatures(vec![]).is_err());
        assert!(AnnealingSchedule::from_temperatures(vec![1.0, 4.0]).is_err());
        assert!(AnnealingSchedule::from_temperatures(vec![4.0, f64::NAN]).is_err());
        assert!(AnnealingSchedule::from_temperatures(vec![4.0, 4.0, 1.0]).is_ok());
    }
}

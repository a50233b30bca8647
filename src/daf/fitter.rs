//! # DAF fit engine
//!
//! [`DafFitter::fit`] refines one [`TrackCandidate`] in place. Every annealing step is a
//! full forward/backward pass over **all** registered planes:
//!
//! * included planes update the state with their weight-combined measurement
//!   ([`effective_measurement`]); a plane whose summed weight vanishes acts as a hole,
//! * every plane (excluded ones too) adds its scattering variance to the slopes,
//! * the smoothed estimate at each plane provides the residual chi2 of every hit of that
//!   plane, from which the new weights follow ([`responsibilities`]).
//!
//! After the coldest temperature the candidate holds the final smoothed estimates and
//! weights, and
//!
//! ```text
//! chi2 = Σ_planes Σ_hits  w · χ²
//! ndof = 4·N − 4 − 2·s,    s = Σ_planes (1 − min(1, Σ_hits w))
//! ```
//!
//! with `N` the number of included planes. Both are computed from the same weights and
//! residuals as the last annealing step.
//!
//! A hit whose residual is not finite gets weight 0 and never enters the combined
//! measurement. A singular covariance at any step aborts the fit: chi2 and ndof are set to
//! NaN and the quality gate turns the candidate down.
use log::debug;
use nalgebra::{Matrix2, Vector2};

use crate::{
    constants::{MIN_PLANE_WEIGHT, SEED_POSITION_VARIANCE, SEED_SLOPE_VARIANCE},
    geometry::PlaneRegistry,
    measurements::event::EventHits,
    params::TrackFitParams,
    track::{
        kalman::{
            add_scattering, effective_measurement, propagate, residual_chi2, seed_covariance,
            smooth, update,
        },
        FitStatus, TrackCandidate, TrackEstimate,
    },
};

use super::{weights::responsibilities, AnnealingSchedule};

/// Deterministic annealing filter over a fixed plane registry.
#[derive(Debug, Clone)]
pub struct DafFitter {
    schedule: AnnealingSchedule,
    chi2_cutoff: f64,
}

impl DafFitter {
    pub fn new(schedule: AnnealingSchedule, chi2_cutoff: f64) -> Self {
        DafFitter {
            schedule,
            chi2_cutoff,
        }
    }

    pub fn from_params(params: &TrackFitParams) -> Self {
        Self::new(params.annealing.clone(), params.chi2_cutoff)
    }

    pub fn schedule(&self) -> &AnnealingSchedule {
        &self.schedule
    }

    /// Anneal `candidate` through the whole schedule.
    ///
    /// Arguments
    /// -----------------
    /// * `registry` – detector geometry the candidate was built on.
    /// * `event` – measurements of the current event.
    /// * `candidate` – seeded candidate; estimates, weights, chi2, ndof and status are
    ///   overwritten.
    ///
    /// Return
    /// ----------
    /// * `true` if the fit converged with finite chi2 and ndof, `false` on numerical failure.
    pub fn fit(
        &self,
        registry: &PlaneRegistry,
        event: &EventHits,
        candidate: &mut TrackCandidate,
    ) -> bool {
        candidate.status = FitStatus::Annealing;
        let mut chi2_table: Vec<Vec<f64>> = Vec::new();

        for &temperature in self.schedule.temperatures() {
            let Some(smoothed) = self.smooth_pass(registry, event, candidate) else {
                return Self::fail(candidate, temperature, "singular covariance");
            };
            let table = Self::hit_chi2(registry, event, &smoothed);
            candidate.weights = table
                .iter()
                .map(|row| responsibilities(row, temperature, self.chi2_cutoff))
                .collect();
            candidate.estimates = smoothed;
            chi2_table = table;
        }

        candidate.chi2 = candidate
            .weights
            .iter()
            .zip(&chi2_table)
            .flat_map(|(w, c)| {
                w.iter()
                    .zip(c)
                    .filter(|&(&w, _)| w > 0.0)
                    .map(|(w, c)| w * c)
            })
            .sum();
        candidate.ndof = Self::ndof(registry, candidate);
        candidate.status = FitStatus::Converged;

        debug!("DAF converged: {candidate}");
        candidate.chi2.is_finite() && candidate.ndof.is_finite()
    }

    fn fail(candidate: &mut TrackCandidate, temperature: f64, what: &str) -> bool {
        debug!("DAF failed at T = {temperature}: {what}");
        candidate.chi2 = f64::NAN;
        candidate.ndof = f64::NAN;
        candidate.status = FitStatus::Converged;
        false
    }

    /// Effective ndof with fractional plane inclusion.
    fn ndof(registry: &PlaneRegistry, candidate: &TrackCandidate) -> f64 {
        let mut n_included = 0.0;
        let mut skips = 0.0;
        for (i, plane) in registry.planes().iter().enumerate() {
            if plane.is_excluded() {
                continue;
            }
            n_included += 1.0;
            skips += 1.0 - candidate.plane_weight(i).min(1.0);
        }
        4.0 * n_included - 4.0 - 2.0 * skips
    }

    fn measurement_covariance(registry: &PlaneRegistry, plane: usize) -> Matrix2<f64> {
        let (vx, vy) = registry.planes()[plane].variances();
        Matrix2::from_diagonal(&Vector2::new(vx, vy))
    }

    /// Weight-combined measurement of `plane`, if it carries weight.
    fn plane_measurement(
        registry: &PlaneRegistry,
        event: &EventHits,
        weights: &[Vec<f64>],
        plane: usize,
    ) -> Option<(Vector2<f64>, Matrix2<f64>)> {
        if registry.planes()[plane].is_excluded() {
            return None;
        }
        let row = weights.get(plane)?;
        let hits = event.on_plane(plane);
        effective_measurement(
            hits.iter()
                .zip(row)
                .filter(|&(m, &w)| w > 0.0 && m.position.iter().all(|v| v.is_finite()))
                .map(|(m, &w)| (&m.position, w)),
            &Self::measurement_covariance(registry, plane),
            MIN_PLANE_WEIGHT,
        )
    }

    fn seed(estimate: &TrackEstimate) -> TrackEstimate {
        TrackEstimate::new(
            estimate.z,
            estimate.state,
            seed_covariance(SEED_POSITION_VARIANCE, SEED_SLOPE_VARIANCE),
        )
    }

    /// One forward/backward pass, returning the smoothed estimate at every plane.
    fn smooth_pass(
        &self,
        registry: &PlaneRegistry,
        event: &EventHits,
        candidate: &TrackCandidate,
    ) -> Option<Vec<TrackEstimate>> {
        let planes = registry.planes();
        let n = planes.len();
        if n == 0 || candidate.estimates.len() != n {
            return None;
        }
        let measurement =
            |i: usize| Self::plane_measurement(registry, event, &candidate.weights, i);

        // Forward: filtered estimates, measurement of the plane included.
        let mut forward: Vec<TrackEstimate> = Vec::with_capacity(n);
        for (i, plane) in planes.iter().enumerate() {
            let mut predicted = match forward.last() {
                Some(prev) => propagate(prev, plane.z()),
                None => Self::seed(&candidate.estimates[0]),
            };
            add_scattering(&mut predicted, plane.scatter_variance());
            let filtered = match measurement(i) {
                Some((m, v)) => update(&predicted, &m, &v)?,
                None => predicted,
            };
            forward.push(filtered);
        }

        // Backward: predicted estimates, measurement of the plane excluded.
        let mut backward: Vec<TrackEstimate> = Vec::with_capacity(n);
        let mut filtered_next: Option<TrackEstimate> = None;
        for i in (0..n).rev() {
            let predicted = match filtered_next.take() {
                Some(mut next) => {
                    add_scattering(&mut next, planes[i + 1].scatter_variance());
                    propagate(&next, planes[i].z())
                }
                None => Self::seed(&candidate.estimates[n - 1]),
            };
            filtered_next = Some(match measurement(i) {
                Some((m, v)) => update(&predicted, &m, &v)?,
                None => predicted.clone(),
            });
            backward.push(predicted);
        }
        backward.reverse();

        forward
            .iter()
            .zip(&backward)
            .map(|(f, b)| smooth(f, b).filter(TrackEstimate::is_finite))
            .collect()
    }

    /// Residual chi2 of every hit of every included plane against `smoothed`.
    ///
    /// A non-finite residual is reported as infinite chi2, which yields weight 0.
    fn hit_chi2(
        registry: &PlaneRegistry,
        event: &EventHits,
        smoothed: &[TrackEstimate],
    ) -> Vec<Vec<f64>> {
        registry
            .planes()
            .iter()
            .enumerate()
            .map(|(i, plane)| {
                if plane.is_excluded() {
                    return Vec::new();
                }
                let v = Self::measurement_covariance(registry, i);
                event
                    .on_plane(i)
                    .iter()
                    .map(|m| {
                        residual_chi2(&smoothed[i], &m.position, &v)
                            .filter(|c| c.is_finite())
                            .unwrap_or(f64::INFINITY)
                    })
                    .collect()
            })
            .collect()
    }
}

#[cfg(test)]
mod test_fitter {
    use super::*;
    use crate::finder::build_candidate;
    use crate::geometry::PlaneSpec;
    use crate::measurements::{HitInput, Measurement};
    use approx::assert_relative_eq;

    const SLOPE: (f64, f64) = (0.001, 0.0005);

    fn telescope() -> PlaneRegistry {
        let mut r = PlaneRegistry::new();
        for i in 0..6 {
            r.add_plane(PlaneSpec::new(i, 100.0 * i as f64, 0.005, 0.005))
                .unwrap();
        }
        r
    }

    fn event_with_decoy(r: &PlaneRegistry) -> EventHits {
        let mut event = EventHits::new(r);
        for (i, p) in r.planes().iter().enumerate() {
            let z = p.z();
            event.add_hit(r, &HitInput::new(SLOPE.0 * z, SLOPE.1 * z, z, i as u64));
        }
        event.add_hit(r, &HitInput::new(0.3 + 0.5, 0.15, 300.0, 100));
        event
    }

    #[test]
    fn test_decoy_suppressed() {
        let r = telescope();
        let event = event_with_decoy(&r);
        let hits: Vec<_> = (0..6).map(|p| (p, 0)).collect();
        let mut cand = build_candidate(&r, &event, &hits).unwrap();
        // Hard assignment on the decoy as well
        cand.weights[3][1] = 1.0;

        let fitter = DafFitter::from_params(&TrackFitParams::default());
        assert!(fitter.fit(&r, &event, &mut cand));
        assert_eq!(cand.status, FitStatus::Converged);
        assert!(cand.weights[3][0] > 0.99);
        assert!(cand.weights[3][1] < 0.01);
        assert!(cand.chi2_ndof() < 1.0);
        assert_relative_eq!(cand.estimates[0].state[2], SLOPE.0, epsilon = 1e-7);
        assert_relative_eq!(cand.estimates[5].state[3], SLOPE.1, epsilon = 1e-7);
        for i in 0..6 {
            let total = cand.plane_weight(i);
            assert!(total <= 1.0 && total > 0.99);
        }
    }

    #[test]
    fn test_ndof_counts_fractional_skips() {
        let r = telescope();
        let event = event_with_decoy(&r);
        let hits: Vec<_> = (0..6).map(|p| (p, 0)).collect();
        let mut cand = build_candidate(&r, &event, &hits).unwrap();
        DafFitter::from_params(&TrackFitParams::default()).fit(&r, &event, &mut cand);
        assert!(cand.ndof < 20.0 && cand.ndof > 19.5);
    }

    #[test]
    fn test_excluded_plane_weights_stay_empty() {
        let mut r = PlaneRegistry::new();
        for i in 0..6 {
            let spec = PlaneSpec::new(i, 100.0 * i as f64, 0.005, 0.005)
                .with_scatter_variance(1e-8)
                .excluded(i == 2);
            r.add_plane(spec).unwrap();
        }
        let mut event = EventHits::new(&r);
        for p in r.planes() {
            let z = p.z();
            event.add_hit(&r, &HitInput::new(SLOPE.0 * z, SLOPE.1 * z, z, 0));
        }
        // Garbage on the excluded plane
        event.add_hit(&r, &HitInput::new(5.0, 5.0, 200.0, 1));

        let hits = [(0, 0), (1, 0), (3, 0), (4, 0), (5, 0)];
        let mut cand = build_candidate(&r, &event, &hits).unwrap();
        assert!(cand.weights[2].is_empty());
        let fitter = DafFitter::from_params(&TrackFitParams::default());
        assert!(fitter.fit(&r, &event, &mut cand));
        assert!(cand.weights[2].is_empty());
        assert_relative_eq!(cand.estimates[2].state[0], SLOPE.0 * 200.0, epsilon = 1e-4);
        // 5 included planes, no skip
        assert!(cand.ndof > 15.9 && cand.ndof <= 16.0);
    }

    #[test]
    fn test_fit_is_deterministic() {
        let r = telescope();
        let event = event_with_decoy(&r);
        let hits: Vec<_> = (0..6).map(|p| (p, 0)).collect();
        let seed = build_candidate(&r, &event, &hits).unwrap();
        let fitter = DafFitter::from_params(&TrackFitParams::default());
        let (mut a, mut b) = (seed.clone(), seed);
        fitter.fit(&r, &event, &mut a);
        fitter.fit(&r, &event, &mut b);
        assert_eq!(a, b);
    }

    #[test]
    fn test_non_finite_hit_gets_zero_weight() {
        let r = telescope();
        let mut event = event_with_decoy(&r);
        event
            .push(3, Measurement::new(f64::NAN, 0.15, 300.0, 101))
            .unwrap();
        let hits: Vec<_> = (0..6).map(|p| (p, 0)).collect();
        let mut cand = build_candidate(&r, &event, &hits).unwrap();
        cand.weights[3][2] = 0.5;

        let fitter = DafFitter::from_params(&TrackFitParams::default());
        assert!(fitter.fit(&r, &event, &mut cand));
        assert_eq!(cand.weights[3][2], 0.0);
        assert!(cand.weights[3][0] > 0.99);
        assert!(cand.chi2.is_finite());
        assert!(cand.chi2_ndof() < 1.0);
    }

    #[test]
    fn test_missing_estimates_fail() {
        let r = telescope();
        let event = event_with_decoy(&r);
        let hits: Vec<_> = (0..6).map(|p| (p, 0)).collect();
        let mut cand = build_candidate(&r, &event, &hits).unwrap();
        cand.estimates.pop();
        let fitter = DafFitter::from_params(&TrackFitParams::default());
        assert!(!fitter.fit(&r, &event, &mut cand));
        assert!(cand.chi2.is_nan());
        assert!(cand.ndof.is_nan());
    }
}

//! # Track estimates and candidates
//!
//! - [`TrackEstimate`] – state `(x, y, dx/dz, dy/dz)` and its covariance at one plane.
//! - [`TrackCandidate`] – one estimate per registered plane, the per-plane/per-measurement
//!   soft assignment weights, the global chi2 and ndof, and the [`FitStatus`].
//!
//! ## Candidate lifecycle
//!
//! ```text
//! Seeded ──► Annealing ──► Converged ──► Accepted
//!                                   └──► Rejected(reason)
//! ```
//!
//! * The finders create candidates in the `Seeded` state with hard (0/1) weights and a
//!   straight-line estimate at every plane.
//! * The [`DafFitter`](crate::daf::fitter::DafFitter) refines weights and estimates in place.
//! * The [`QualityGate`](crate::quality::QualityGate) moves the candidate to `Accepted` or
//!   `Rejected`.
//!
//! The `weights` matrix is indexed like the event measurements: `weights[plane][hit]`.
//! Excluded planes always carry an empty row. For every finalized candidate, the hit
//! weights of a plane plus its implicit no-hit weight sum to one.
pub mod kalman;

use std::fmt;

use nalgebra::{Matrix4, RealField, Scalar, Vector2, Vector4};

use crate::constants::{HitRef, STATE_DIM};

/// Track state and covariance at one plane.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackEstimate<T: Scalar = f64> {
    pub z: T,
    pub state: Vector4<T>,
    pub covariance: Matrix4<T>,
}

impl<T: RealField + Copy> TrackEstimate<T> {
    pub fn new(z: T, state: Vector4<T>, covariance: Matrix4<T>) -> Self {
        TrackEstimate {
            z,
            state,
            covariance,
        }
    }

    pub fn position(&self) -> Vector2<T> {
        Vector2::new(self.state[0], self.state[1])
    }

    pub fn slope(&self) -> Vector2<T> {
        Vector2::new(self.state[2], self.state[3])
    }

    /// 1-σ uncertainties of the four state components.
    pub fn sigmas(&self) -> Vector4<T> {
        Vector4::from_fn(|i, _| self.covariance[(i, i)].sqrt())
    }

    /// `true` if state and covariance are free of NaN/∞.
    pub fn is_finite(&self) -> bool {
        self.state.iter().all(|v| v.is_finite()) && self.covariance.iter().all(|v| v.is_finite())
    }
}

/// Reason a candidate was turned down by the quality gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    NdofBelowFloor,
    Chi2NdofAboveCeiling,
    NotFinite,
    NotInTime,
}

/// Position of a candidate in the fit state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FitStatus {
    Seeded,
    Annealing,
    Converged,
    Accepted,
    Rejected(RejectReason),
}

/// A track candidate: one estimate per plane plus soft hit assignment.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackCandidate {
    pub estimates: Vec<TrackEstimate>,
    pub weights: Vec<Vec<f64>>,
    pub chi2: f64,
    pub ndof: f64,
    pub status: FitStatus,
}

impl TrackCandidate {
    /// Build a seeded candidate from per-plane estimates and hard hit assignments.
    ///
    /// Arguments
    /// -----------------
    /// * `estimates` – one estimate per registered plane (z order).
    /// * `hits_per_plane` – number of measurements stored on each plane for this event
    ///   (`0` for excluded planes).
    /// * `assigned` – `(plane, hit)` references receiving weight 1.
    pub fn seeded(
        estimates: Vec<TrackEstimate>,
        hits_per_plane: &[usize],
        assigned: &[HitRef],
    ) -> Self {
        let mut weights: Vec<Vec<f64>> = hits_per_plane.iter().map(|&n| vec![0.0; n]).collect();
        for &(plane, hit) in assigned {
            if let Some(w) = weights.get_mut(plane).and_then(|row| row.get_mut(hit)) {
                *w = 1.0;
            }
        }
        TrackCandidate {
            estimates,
            weights,
            chi2: f64::NAN,
            ndof: f64::NAN,
            status: FitStatus::Seeded,
        }
    }

    pub fn n_planes(&self) -> usize {
        self.estimates.len()
    }

    pub fn chi2_ndof(&self) -> f64 {
        self.chi2 / self.ndof
    }

    /// Summed hit weight of a plane (0 for unknown planes).
    pub fn plane_weight(&self, plane: usize) -> f64 {
        self.weights
            .get(plane)
            .map(|row| row.iter().sum())
            .unwrap_or(0.0)
    }

    /// Weight of the implicit no-hit hypothesis of a plane.
    pub fn no_hit_weight(&self, plane: usize) -> f64 {
        1.0 - self.plane_weight(plane)
    }

    /// Highest-weight hit of a plane, as `(hit index, weight)`.
    pub fn best_hit(&self, plane: usize) -> Option<(usize, f64)> {
        self.weights.get(plane)?.iter().copied().enumerate().fold(
            None,
            |best: Option<(usize, f64)>, (i, w)| match best {
                Some((_, bw)) if bw >= w => best,
                _ => Some((i, w)),
            },
        )
    }

    /// Hits whose weight exceeds `threshold`.
    pub fn hits_above(&self, threshold: f64) -> Vec<HitRef> {
        self.weights
            .iter()
            .enumerate()
            .flat_map(|(p, row)| {
                row.iter()
                    .enumerate()
                    .filter(move |(_, &w)| w > threshold)
                    .map(move |(h, _)| (p, h))
            })
            .collect()
    }

    /// Smoothed state at the first plane.
    pub fn first_state(&self) -> Option<&Vector4<f64>> {
        self.estimates.first().map(|e| &e.state)
    }

    pub fn is_accepted(&self) -> bool {
        self.status == FitStatus::Accepted
    }
}

impl fmt::Display for TrackCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = match self.status {
            FitStatus::Seeded => "seeded".to_string(),
            FitStatus::Annealing => "annealing".to_string(),
            FitStatus::Converged => "converged".to_string(),
            FitStatus::Accepted => "accepted".to_string(),
            FitStatus::Rejected(r) => format!("rejected ({r:?})"),
        };
        if f.alternate() {
            writeln!(f, "Track candidate [{status}]")?;
            writeln!(f, "chi2 = {:.4}, ndof = {:.2}", self.chi2, self.ndof)?;
            for (i, e) in self.estimates.iter().enumerate() {
                let s = e.sigmas();
                writeln!(
                    f,
                    "  plane {i:>2}  z={:>9.3}  x={:>10.5}±{:.1e}  y={:>10.5}±{:.1e}  tx={:>9.2e}  ty={:>9.2e}  w={:.3}",
                    e.z,
                    e.state[0],
                    s[0],
                    e.state[1],
                    s[1],
                    e.state[2],
                    e.state[3],
                    self.plane_weight(i)
                )?;
            }
            Ok(())
        } else {
            write!(
                f,
                "TrackCandidate({status}, planes={}, chi2={:.3}, ndof={:.2})",
                self.estimates.len(),
                self.chi2,
                self.ndof
            )
        }
    }
}

/// Row-major flattening of a state covariance, for output records.
pub(crate) fn flatten_covariance(c: &Matrix4<f64>) -> [f64; STATE_DIM * STATE_DIM] {
    let mut out = [0.0; STATE_DIM * STATE_DIM];
    for i in 0..STATE_DIM {
        for j in 0..STATE_DIM {
            out[i * STATE_DIM + j] = c[(i, j)];
        }
    }
    out
}

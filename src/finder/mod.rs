//! # Track finding
//!
//! Finders turn the measurements of one event into draft [`TrackCandidate`]s: a hard
//! assignment of hits (weight 1) and a straight-line estimate at every registered plane.
//! The DAF fitter refines them afterwards, so both finders only need to be good enough to
//! put the candidate in the right basin.
//!
//! Two interchangeable strategies implement [`TrackFinder`]:
//!
//! * [`ClusterFinder`](cluster::ClusterFinder) – projects every hit to a reference z along
//!   the nominal beam slope and groups them with single-linkage clustering.
//! * [`CombinatorialFinder`](combinatorial::CombinatorialFinder) – seeds on hit pairs of
//!   two planes and follows every branch with a light per-axis Kalman filter, then prunes
//!   overlapping candidates.
//!
//! Which one runs is chosen at configuration time with [`FinderKind`]; callers only see
//! the trait ([`finder_for`]).
//!
//! Excluded planes are never read. Candidates are emitted in a deterministic order that
//! depends only on the event content and the parameters.
pub mod cluster;
pub mod combinatorial;

use std::fmt;
use std::str::FromStr;

use nalgebra::{Vector2, Vector4};
use serde::{Deserialize, Serialize};

use crate::{
    constants::{HitRef, Millimeter, EPS, SEED_POSITION_VARIANCE, SEED_SLOPE_VARIANCE},
    geometry::PlaneRegistry,
    measurements::event::EventHits,
    params::TrackFitParams,
    track::{kalman::seed_covariance, TrackCandidate, TrackEstimate},
    trackfit_errors::TrackFitError,
};
use cluster::ClusterFinder;
use combinatorial::CombinatorialFinder;

/// Track finding strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FinderKind {
    Cluster,
    Combinatorial,
}

impl fmt::Display for FinderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FinderKind::Cluster => write!(f, "cluster"),
            FinderKind::Combinatorial => write!(f, "combinatorial"),
        }
    }
}

impl FromStr for FinderKind {
    type Err = TrackFitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cluster" => Ok(FinderKind::Cluster),
            "combinatorial" | "combinatorics" => Ok(FinderKind::Combinatorial),
            other => Err(TrackFitError::InvalidParameter(format!(
                "unknown finder '{other}'"
            ))),
        }
    }
}

/// How the cluster finder assigns hits of a plane to a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HitAssignment {
    /// Only the hit closest to the fitted line, per plane.
    Closest,
    /// Every clustered hit of a plane within `cluster_radius` of the fitted line.
    AllWithinRadius,
}

/// A track finding strategy.
pub trait TrackFinder: Send + Sync {
    /// Draft candidates for the current event.
    ///
    /// Arguments
    /// -----------------
    /// * `registry` – detector geometry (read only).
    /// * `event` – measurements of the current event, indexed like `registry`.
    ///
    /// Return
    /// ----------
    /// * Seeded candidates with one estimate per registered plane and hard weights.
    fn find_candidates(&self, registry: &PlaneRegistry, event: &EventHits) -> Vec<TrackCandidate>;

    fn kind(&self) -> FinderKind;
}

/// Instantiate the finder selected in `params`.
pub fn finder_for(params: &TrackFitParams) -> Box<dyn TrackFinder> {
    match params.finder {
        FinderKind::Cluster => Box::new(ClusterFinder::from_params(params)),
        FinderKind::Combinatorial => Box::new(CombinatorialFinder::from_params(params)),
    }
}

/// Straight line `p(z) = origin + slope · (z − z0)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LineFit {
    pub z0: Millimeter,
    pub origin: Vector2<f64>,
    pub slope: Vector2<f64>,
}

impl LineFit {
    pub fn at(&self, z: Millimeter) -> Vector2<f64> {
        self.origin + self.slope * (z - self.z0)
    }

    /// Weighted least-squares fit of points `(z, position)` with per-axis variances.
    ///
    /// z is centred on its weighted mean so that intercept and slope decouple.
    /// Returns `None` when fewer than two distinct z values carry weight.
    pub fn fit<I>(points: I) -> Option<Self>
    where
        I: IntoIterator<Item = (Millimeter, Vector2<f64>, (f64, f64))>,
    {
        let pts: Vec<_> = points.into_iter().collect();
        let mut fits = [(0.0, 0.0, 0.0); 2];
        for (axis, fit) in fits.iter_mut().enumerate() {
            let weight = |var: (f64, f64)| 1.0 / if axis == 0 { var.0 } else { var.1 };
            let sw: f64 = pts.iter().map(|(_, _, v)| weight(*v)).sum();
            if !(sw > 0.0) {
                return None;
            }
            let z0 = pts.iter().map(|(z, _, v)| weight(*v) * z).sum::<f64>() / sw;
            let u0 = pts.iter().map(|(_, p, v)| weight(*v) * p[axis]).sum::<f64>() / sw;
            let (szz, szu) = pts.iter().fold((0.0, 0.0), |(szz, szu), (z, p, v)| {
                let w = weight(*v);
                let dz = z - z0;
                (szz + w * dz * dz, szu + w * dz * (p[axis] - u0))
            });
            if !(szz > EPS * sw) {
                return None;
            }
            *fit = (z0, u0, szu / szz);
        }
        // Axis weights may differ, so each axis has its own z0; express y at the x z0.
        let z0 = fits[0].0;
        let y0 = fits[1].1 + fits[1].2 * (z0 - fits[1].0);
        Some(LineFit {
            z0,
            origin: Vector2::new(fits[0].1, y0),
            slope: Vector2::new(fits[0].2, fits[1].2),
        })
    }
}

/// Fit a straight line through `hits`, evaluated at every registered plane.
pub(crate) fn fit_hits(
    registry: &PlaneRegistry,
    event: &EventHits,
    hits: &[HitRef],
) -> Option<LineFit> {
    LineFit::fit(hits.iter().filter_map(|&hit| {
        let m = event.measurement(hit)?;
        let plane = registry.planes().get(hit.0)?;
        Some((plane.z(), m.position, plane.variances()))
    }))
}

/// Build a seeded candidate from a hard hit assignment.
///
/// The straight line through the assigned hits provides the estimate at every plane,
/// with the wide seed covariance so that the fitter is not biased by the draft.
pub(crate) fn build_candidate(
    registry: &PlaneRegistry,
    event: &EventHits,
    hits: &[HitRef],
) -> Option<TrackCandidate> {
    let line = fit_hits(registry, event, hits)?;
    let covariance = seed_covariance(SEED_POSITION_VARIANCE, SEED_SLOPE_VARIANCE);
    let estimates = registry
        .planes()
        .iter()
        .map(|p| {
            let pos = line.at(p.z());
            TrackEstimate::new(
                p.z(),
                Vector4::new(pos.x, pos.y, line.slope.x, line.slope.y),
                covariance,
            )
        })
        .collect();
    let hits_per_plane: Vec<usize> = registry
        .planes()
        .iter()
        .enumerate()
        .map(|(i, p)| {
            if p.is_included() {
                event.on_plane(i).len()
            } else {
                0
            }
        })
        .collect();
    Some(TrackCandidate::seeded(estimates, &hits_per_plane, hits))
}

#[cfg(test)]
mod test_finder {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_finder_kind_parse() {
        assert_eq!("Cluster".parse::<FinderKind>(), Ok(FinderKind::Cluster));
        assert_eq!(
            " combinatorial ".parse::<FinderKind>(),
            Ok(FinderKind::Combinatorial)
        );
        assert!("hough".parse::<FinderKind>().is_err());
        assert_eq!(FinderKind::Combinatorial.to_string(), "combinatorial");
    }

    #[test]
    fn test_line_fit_exact() {
        let var = (1e-4, 1e-4);
        let pts = (0..4).map(|i| {
            let z = 100.0 * i as f64;
            (z, Vector2::new(0.1 + 0.001 * z, -0.2 + 0.0005 * z), var)
        });
        let line = LineFit::fit(pts).unwrap();
        assert_relative_eq!(line.slope.x, 0.001, epsilon = 1e-12);
        assert_relative_eq!(line.slope.y, 0.0005, epsilon = 1e-12);
        let p = line.at(0.0);
        assert_relative_eq!(p.x, 0.1, epsilon = 1e-10);
        assert_relative_eq!(p.y, -0.2, epsilon = 1e-10);
    }

    #[test]
    fn test_line_fit_needs_two_z() {
        let var = (1.0, 1.0);
        assert!(LineFit::fit([(5.0, Vector2::new(0.0, 0.0), var)]).is_none());
        assert!(LineFit::fit([
            (5.0, Vector2::new(0.0, 0.0), var),
            (5.0, Vector2::new(1.0, 0.0), var)
        ])
        .is_none());
    }
}

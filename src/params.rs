//! # Track finding and fitting parameters
//!
//! [`TrackFitParams`] gathers every tunable of the pipeline: finder selection and finder
//! cuts, annealing schedule, DAF chi2 cutoff and quality gate thresholds. Values are set
//! once per run, either through the fluent [`TrackFitParamsBuilder`] or from a JSON
//! document ([`TrackFitParams::from_json_str`], [`TrackFitParams::from_json_file`]).
//! Both paths go through the same validation.
//!
//! ## JSON layout
//!
//! Every field is optional and falls back to its default:
//!
//! ```json
//! {
//!   "finder": "combinatorial",
//!   "slope_deviation": 0.02,
//!   "annealing": [81.0, 27.0, 9.0, 3.0, 1.0],
//!   "max_skips": 1,
//!   "min_in_time": 1
//! }
//! ```
use std::cmp::Ordering::{Equal, Greater};
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{
    constants::{Millimeter, NDOF_TOLERANCE},
    daf::AnnealingSchedule,
    finder::{FinderKind, HitAssignment},
    trackfit_errors::TrackFitError,
};

/// Configuration of the track finder, the DAF fitter and the quality gate.
///
/// Defaults
/// -----------------
/// * `finder`: [`FinderKind::Cluster`]
/// * `cluster_radius`: 0.5 mm
/// * `reference_z`: `None` (first included plane)
/// * `hit_assignment`: [`HitAssignment::Closest`]
/// * `nominal_slope`: `(0, 0)`
/// * `slope_deviation`: 0.01 rad
/// * `finder_chi2_cut`: 25
/// * `max_branches`: 10 000
/// * `max_shared_hits`: 0
/// * `chi2_cutoff`: 20
/// * `annealing`: `81 → 27 → 9 → 3 → 1`
/// * `max_skips`: 0
/// * `min_ndof`: `None` (derived from the geometry)
/// * `max_chi2_ndof`: 10
/// * `min_in_time`: 0
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackFitParams {
    // --- Finder selection ---
    pub finder: FinderKind,

    // --- Cluster finder ---
    /// Transverse clustering distance (mm) at the reference z.
    pub cluster_radius: Millimeter,
    /// Reference z (mm) of the cluster projection.
    pub reference_z: Option<Millimeter>,
    pub hit_assignment: HitAssignment,

    // --- Shared finder cuts ---
    /// Expected `(dx/dz, dy/dz)` of beam tracks.
    pub nominal_slope: [f64; 2],
    /// Maximal deviation of a seed slope from the nominal slope, per axis.
    pub slope_deviation: f64,

    // --- Combinatorial finder ---
    /// Per-hit chi2 cut when extending a branch.
    pub finder_chi2_cut: f64,
    /// Maximum number of live branches per seed pair.
    pub max_branches: usize,
    /// Maximum number of hits a candidate may share with an already accepted one.
    pub max_shared_hits: usize,

    // --- DAF ---
    /// Chi2 at which a hit is as likely as the no-hit hypothesis.
    pub chi2_cutoff: f64,
    pub annealing: AnnealingSchedule,

    // --- Quality gate ---
    /// Number of included planes a track may miss.
    pub max_skips: usize,
    /// Explicit ndof floor; derived from the geometry when `None`.
    pub min_ndof: Option<f64>,
    pub max_chi2_ndof: f64,
    /// Minimum number of optional planes with an in-time hit.
    pub min_in_time: usize,
}

impl Default for TrackFitParams {
    fn default() -> Self {
        TrackFitParams {
            finder: FinderKind::Cluster,
            cluster_radius: 0.5,
            reference_z: None,
            hit_assignment: HitAssignment::Closest,
            nominal_slope: [0.0, 0.0],
            slope_deviation: 0.01,
            finder_chi2_cut: 25.0,
            max_branches: 10_000,
            max_shared_hits: 0,
            chi2_cutoff: 20.0,
            annealing: AnnealingSchedule::default(),
            max_skips: 0,
            min_ndof: None,
            max_chi2_ndof: 10.0,
            min_in_time: 0,
        }
    }
}

impl TrackFitParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fluent builder starting from the defaults.
    ///
    /// # Example
    ///
    /// ```rust
    /// use trackfit::params::TrackFitParams;
    /// use trackfit::finder::FinderKind;
    ///
    /// let params = TrackFitParams::builder()
    ///     .finder(FinderKind::Combinatorial)
    ///     .max_skips(1)
    ///     .build()
    ///     .unwrap();
    /// assert_eq!(params.max_skips, 1);
    /// ```
    pub fn builder() -> TrackFitParamsBuilder {
        TrackFitParamsBuilder::new()
    }

    /// Parse and validate parameters from a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self, TrackFitError> {
        let params: TrackFitParams = serde_json::from_str(json)?;
        TrackFitParamsBuilder { params }.build()
    }

    /// Read, parse and validate parameters from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, TrackFitError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    pub fn to_json_string(&self) -> Result<String, TrackFitError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Lower bound on the ndof of an acceptable track with `n_included` measuring planes.
    ///
    /// The explicit `min_ndof` wins when set. Otherwise the floor is the ndof of a track
    /// missing exactly `max_skips` planes (`4N − 4 − 2·max_skips`) minus
    /// [`NDOF_TOLERANCE`], so that soft weights slightly below one do not fail the cut.
    pub fn ndof_floor(&self, n_included: usize) -> f64 {
        self.min_ndof.unwrap_or_else(|| {
            4.0 * n_included as f64 - 4.0 - 2.0 * self.max_skips as f64 - NDOF_TOLERANCE
        })
    }
}

/// Builder for [`TrackFitParams`], with validation.
#[derive(Debug, Clone, Default)]
pub struct TrackFitParamsBuilder {
    params: TrackFitParams,
}

impl TrackFitParamsBuilder {
    pub fn new() -> Self {
        Self {
            params: TrackFitParams::default(),
        }
    }

    pub fn finder(mut self, v: FinderKind) -> Self {
        self.params.finder = v;
        self
    }

    // --- Cluster finder ---
    pub fn cluster_radius(mut self, v: Millimeter) -> Self {
        self.params.cluster_radius = v;
        self
    }
    pub fn reference_z(mut self, v: Millimeter) -> Self {
        self.params.reference_z = Some(v);
        self
    }
    pub fn hit_assignment(mut self, v: HitAssignment) -> Self {
        self.params.hit_assignment = v;
        self
    }

    // --- Finder cuts ---
    pub fn nominal_slope(mut self, tx: f64, ty: f64) -> Self {
        self.params.nominal_slope = [tx, ty];
        self
    }
    pub fn slope_deviation(mut self, v: f64) -> Self {
        self.params.slope_deviation = v;
        self
    }
    pub fn finder_chi2_cut(mut self, v: f64) -> Self {
        self.params.finder_chi2_cut = v;
        self
    }
    pub fn max_branches(mut self, v: usize) -> Self {
        self.params.max_branches = v;
        self
    }
    pub fn max_shared_hits(mut self, v: usize) -> Self {
        self.params.max_shared_hits = v;
        self
    }

    // --- DAF ---
    pub fn chi2_cutoff(mut self, v: f64) -> Self {
        self.params.chi2_cutoff = v;
        self
    }
    pub fn annealing(mut self, v: AnnealingSchedule) -> Self {
        self.params.annealing = v;
        self
    }

    // --- Quality gate ---
    pub fn max_skips(mut self, v: usize) -> Self {
        self.params.max_skips = v;
        self
    }
    pub fn min_ndof(mut self, v: f64) -> Self {
        self.params.min_ndof = Some(v);
        self
    }
    pub fn max_chi2_ndof(mut self, v: f64) -> Self {
        self.params.max_chi2_ndof = v;
        self
    }
    pub fn min_in_time(mut self, v: usize) -> Self {
        self.params.min_in_time = v;
        self
    }

    /// Return true iff x > 0.0 and comparable (i.e., not NaN).
    #[inline]
    fn gt0(x: f64) -> bool {
        x.partial_cmp(&0.0) == Some(Greater)
    }

    /// Return true iff x >= 0.0 and comparable (i.e., not NaN).
    #[inline]
    fn ge0(x: f64) -> bool {
        matches!(x.partial_cmp(&0.0), Some(Greater) | Some(Equal))
    }

    /// Finalize the builder.
    ///
    /// Validation rules
    /// -----------------
    /// * `cluster_radius > 0`, `slope_deviation > 0`, `finder_chi2_cut > 0`.
    /// * `chi2_cutoff > 0`, `max_chi2_ndof > 0`.
    /// * `max_branches ≥ 1`.
    /// * `nominal_slope` and `reference_z` (when set) are finite.
    /// * `min_ndof` (when set) is finite and `≥ 0`.
    /// * the annealing schedule is non-empty, strictly positive and non-increasing.
    ///
    /// Constraints that depend on the geometry (enough active planes for the ndof floor)
    /// are checked when the parameters meet a registry, in
    /// [`TrackFit::new`](crate::trackfit::TrackFit::new).
    pub fn build(self) -> Result<TrackFitParams, TrackFitError> {
        let p = &self.params;

        if !Self::gt0(p.cluster_radius) {
            return Err(TrackFitError::InvalidParameter(
                "cluster_radius must be > 0".into(),
            ));
        }
        if !Self::gt0(p.slope_deviation) {
            return Err(TrackFitError::InvalidParameter(
                "slope_deviation must be > 0".into(),
            ));
        }
        if !Self::gt0(p.finder_chi2_cut) {
            return Err(TrackFitError::InvalidParameter(
                "finder_chi2_cut must be > 0".into(),
            ));
        }
        if !Self::gt0(p.chi2_cutoff) {
            return Err(TrackFitError::InvalidParameter(
                "chi2_cutoff must be > 0".into(),
            ));
        }
        if !Self::gt0(p.max_chi2_ndof) {
            return Err(TrackFitError::InvalidParameter(
                "max_chi2_ndof must be > 0".into(),
            ));
        }
        if p.max_branches == 0 {
            return Err(TrackFitError::InvalidParameter(
                "max_branches must be >= 1".into(),
            ));
        }
        if !p.nominal_slope.iter().all(|s| s.is_finite()) {
            return Err(TrackFitError::InvalidParameter(
                "nominal_slope must be finite".into(),
            ));
        }
        if p.reference_z.is_some_and(|z| !z.is_finite()) {
            return Err(TrackFitError::InvalidParameter(
                "reference_z must be finite".into(),
            ));
        }
        if p
            .min_ndof
            .is_some_and(|n| !(Self::ge0(n) && n.is_finite()))
        {
            return Err(TrackFitError::InvalidParameter(
                "min_ndof must be finite and >= 0".into(),
            ));
        }
        p.annealing.validate()?;

        Ok(self.params)
    }
}

impl fmt::Display for TrackFitParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if f.alternate() {
            writeln!(f, "TrackFitParams")?;
            writeln!(f, "  finder            : {}", self.finder)?;
            writeln!(f, "  cluster_radius    : {:.4} mm", self.cluster_radius)?;
            match self.reference_z {
                Some(z) => writeln!(f, "  reference_z       : {z:.3} mm")?,
                None => writeln!(f, "  reference_z       : first included plane")?,
            }
            writeln!(f, "  hit_assignment    : {:?}", self.hit_assignment)?;
            writeln!(
                f,
                "  nominal_slope     : ({:.3e}, {:.3e})",
                self.nominal_slope[0], self.nominal_slope[1]
            )?;
            writeln!(f, "  slope_deviation   : {:.3e}", self.slope_deviation)?;
            writeln!(f, "  finder_chi2_cut   : {:.2}", self.finder_chi2_cut)?;
            writeln!(f, "  max_branches      : {}", self.max_branches)?;
            writeln!(f, "  max_shared_hits   : {}", self.max_shared_hits)?;
            writeln!(f, "  chi2_cutoff       : {:.2}", self.chi2_cutoff)?;
            writeln!(f, "  annealing         : {}", self.annealing)?;
            writeln!(f, "  max_skips         : {}", self.max_skips)?;
            match self.min_ndof {
                Some(n) => writeln!(f, "  min_ndof          : {n:.2}")?,
                None => writeln!(f, "  min_ndof          : derived")?,
            }
            writeln!(f, "  max_chi2_ndof     : {:.2}", self.max_chi2_ndof)?;
            write!(f, "  min_in_time       : {}", self.min_in_time)
        } else {
            write!(
                f,
                "TrackFitParams(finder={}, max_skips={}, chi2_cutoff={:.1}, max_chi2_ndof={:.1}, T={})",
                self.finder, self.max_skips, self.chi2_cutoff, self.max_chi2_ndof, self.annealing
            )
        }
    }
}

#[cfg(test)]
mod test_params {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let p = TrackFitParams::builder().build().unwrap();
        assert_eq!(p, TrackFitParams::default());
        assert_eq!(p.finder, FinderKind::Cluster);
        assert_eq!(p.annealing.final_temperature(), 1.0);
    }

    #[test]
    fn test_builder_rejects_nan_and_non_positive() {
        let err = TrackFitParams::builder()
            .chi2_cutoff(f64::NAN)
            .build()
            .unwrap_err();
        assert_eq!(
            err,
            TrackFitError::InvalidParameter("chi2_cutoff must be > 0".into())
        );
        assert!(TrackFitParams::builder().cluster_radius(0.0).build().is_err());
        assert!(TrackFitParams::builder().max_branches(0).build().is_err());
        assert!(TrackFitParams::builder().min_ndof(-1.0).build().is_err());
        assert!(TrackFitParams::builder()
            .nominal_slope(f64::INFINITY, 0.0)
            .build()
            .is_err());
    }

    #[test]
    fn test_ndof_floor() {
        let p = TrackFitParams::builder().max_skips(1).build().unwrap();
        assert_eq!(p.ndof_floor(6), 24.0 - 4.0 - 2.0 - 0.5);
        let p = TrackFitParams::builder().min_ndof(3.0).build().unwrap();
        assert_eq!(p.ndof_floor(6), 3.0);
    }

    #[test]
    fn test_json_partial_document() {
        let p = TrackFitParams::from_json_str(
            r#"{ "finder": "combinatorial", "max_skips": 1, "annealing": [9.0, 1.0] }"#,
        )
        .unwrap();
        assert_eq!(p.finder, FinderKind::Combinatorial);
        assert_eq!(p.max_skips, 1);
        assert_eq!(p.annealing.temperatures(), &[9.0, 1.0]);
        assert_eq!(p.chi2_cutoff, 20.0);
    }

    #[test]
    fn test_json_is_validated() {
        let err = TrackFitParams::from_json_str(r#"{ "annealing": [1.0, 9.0] }"#).unwrap_err();
        assert!(matches!(err, TrackFitError::InvalidParameter(_)));
        let err = TrackFitParams::from_json_str("{ not json").unwrap_err();
        assert!(matches!(err, TrackFitError::ConfigParse(_)));
    }

    #[test]
    fn test_json_round_trip() {
        let p = TrackFitParams::builder()
            .finder(FinderKind::Combinatorial)
            .reference_z(12.5)
            .hit_assignment(HitAssignment::AllWithinRadius)
            .build()
            .unwrap();
        let json = p.to_json_string().unwrap();
        assert_eq!(TrackFitParams::from_json_str(&json).unwrap(), p);
    }

    #[test]
    fn test_display() {
        let p = TrackFitParams::default();
        assert!(format!("{p}").starts_with("TrackFitParams(finder=cluster"));
        assert!(format!("{p:#}").contains("min_ndof          : derived"));
    }
}

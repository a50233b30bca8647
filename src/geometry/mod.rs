//! # Plane geometry registry
//!
//! This module defines the detector description used by every other component:
//!
//! - [`PlaneSpec`] – the geometry record handed over by the external geometry/alignment
//!   collaborator (sensor id, nominal z, intrinsic resolution, material, role, reference points).
//! - [`Plane`] – the registered, immutable plane: aligned reference points, unit normal,
//!   aligned z position, resolution and scattering variance.
//! - [`PlaneRegistry`] – the ordered collection of planes (non-decreasing z), with lookup by
//!   sensor id and by z within a tolerance.
//!
//! ## Lifecycle
//!
//! Planes are registered once per run with [`PlaneRegistry::add_plane`] (or
//! [`PlaneRegistry::add_plane_with`] to provide an alignment model and a normal estimator).
//! Registration is idempotent per sensor id. Once the registry is handed to
//! [`TrackFit`](crate::trackfit::TrackFit) it is only ever read.
//!
//! Measurements are **not** stored in the planes: they live in the per-event scope
//! ([`EventHits`](crate::measurements::event::EventHits)) indexed by plane position, so
//! nothing from one event can survive into the next.
//!
//! ## Plane roles
//!
//! * `excluded` planes take part in the fit only through their scattering variance; their
//!   measurements are never read by the finders nor by the fitter.
//! * `mandatory` planes form the telescope stack; non-mandatory (optional) planes are
//!   fitted like the others but are the ones counted by
//!   [`QualityGate::in_time_count`](crate::quality::QualityGate::in_time_count).
pub mod alignment;
pub mod material;

use std::collections::HashMap;

use ahash::RandomState;
use log::debug;
use nalgebra::Vector3;

use crate::{
    constants::{GeV, Millimeter, RadianSquared, SensorId, DEFAULT_Z_TOLERANCE},
    trackfit_errors::TrackFitError,
};
use alignment::{AlignmentCorrection, CrossProductNormal, NoAlignment, NormalEstimator};
use material::highland_variance;

/// Geometry record of one sensor plane, as provided by the geometry collaborator.
///
/// Fields
/// -----------------
/// * `sensor_id` – unique sensor identifier.
/// * `z` – nominal z position (mm) used when no reference points are given.
/// * `sigma_x`, `sigma_y` – intrinsic resolution (mm).
/// * `scatter_variance` – angular variance (rad²) added as process noise at this plane.
/// * `excluded` – if `true`, the plane contributes scattering only.
/// * `mandatory` – `false` for optional planes (e.g. devices under test).
/// * `reference_points` – three points defining the plane position and normal, before alignment.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaneSpec {
    pub sensor_id: SensorId,
    pub z: Millimeter,
    pub sigma_x: Millimeter,
    pub sigma_y: Millimeter,
    pub scatter_variance: RadianSquared,
    pub excluded: bool,
    pub mandatory: bool,
    pub reference_points: Option<[Vector3<f64>; 3]>,
}

impl PlaneSpec {
    /// Create a mandatory, included plane without material.
    pub fn new(sensor_id: SensorId, z: Millimeter, sigma_x: Millimeter, sigma_y: Millimeter) -> Self {
        PlaneSpec {
            sensor_id,
            z,
            sigma_x,
            sigma_y,
            scatter_variance: 0.0,
            excluded: false,
            mandatory: true,
            reference_points: None,
        }
    }

    pub fn with_scatter_variance(mut self, variance: RadianSquared) -> Self {
        self.scatter_variance = variance;
        self
    }

    /// Derive the scattering variance from a material budget with the Highland formula.
    ///
    /// Arguments
    /// -----------------
    /// * `x_over_x0` – plane thickness in radiation lengths.
    /// * `momentum` – beam momentum (GeV/c).
    pub fn with_material(mut self, x_over_x0: f64, momentum: GeV) -> Self {
        self.scatter_variance = highland_variance(x_over_x0, momentum);
        self
    }

    pub fn excluded(mut self, excluded: bool) -> Self {
        self.excluded = excluded;
        self
    }

    /// Mark the plane as optional (outside the mandatory telescope stack).
    pub fn optional(mut self) -> Self {
        self.mandatory = false;
        self
    }

    pub fn with_reference_points(mut self, points: [Vector3<f64>; 3]) -> Self {
        self.reference_points = Some(points);
        self
    }

    /// Reference points, defaulting to an un-tilted unit triangle at the nominal z.
    fn points(&self) -> [Vector3<f64>; 3] {
        self.reference_points.unwrap_or([
            Vector3::new(0.0, 0.0, self.z),
            Vector3::new(1.0, 0.0, self.z),
            Vector3::new(0.0, 1.0, self.z),
        ])
    }

    fn validate(&self) -> Result<(), TrackFitError> {
        let id = self.sensor_id;
        if !self.z.is_finite() {
            return Err(TrackFitError::InvalidPlaneGeometry(format!(
                "sensor {id}: z must be finite"
            )));
        }
        if !(self.sigma_x > 0.0 && self.sigma_y > 0.0) {
            return Err(TrackFitError::InvalidPlaneGeometry(format!(
                "sensor {id}: resolution must be > 0"
            )));
        }
        if !(self.scatter_variance >= 0.0) || !self.scatter_variance.is_finite() {
            return Err(TrackFitError::InvalidPlaneGeometry(format!(
                "sensor {id}: scatter variance must be finite and >= 0"
            )));
        }
        Ok(())
    }
}

/// A registered sensor plane. Geometry is immutable once registered.
#[derive(Debug, Clone, PartialEq)]
pub struct Plane {
    sensor_id: SensorId,
    z: Millimeter,
    sigma_x: Millimeter,
    sigma_y: Millimeter,
    scatter_variance: RadianSquared,
    excluded: bool,
    mandatory: bool,
    reference_points: [Vector3<f64>; 3],
    normal: Vector3<f64>,
}

impl Plane {
    pub fn sensor_id(&self) -> SensorId {
        self.sensor_id
    }

    /// Aligned z position (mm).
    pub fn z(&self) -> Millimeter {
        self.z
    }

    pub fn sigma_x(&self) -> Millimeter {
        self.sigma_x
    }

    pub fn sigma_y(&self) -> Millimeter {
        self.sigma_y
    }

    pub fn scatter_variance(&self) -> RadianSquared {
        self.scatter_variance
    }

    pub fn is_excluded(&self) -> bool {
        self.excluded
    }

    /// Included planes provide measurements to the finders and the fitter.
    pub fn is_included(&self) -> bool {
        !self.excluded
    }

    pub fn is_mandatory(&self) -> bool {
        self.mandatory
    }

    pub fn reference_points(&self) -> &[Vector3<f64>; 3] {
        &self.reference_points
    }

    pub fn normal(&self) -> &Vector3<f64> {
        &self.normal
    }

    /// Measurement variances `(σx², σy²)`.
    pub fn variances(&self) -> (f64, f64) {
        (self.sigma_x * self.sigma_x, self.sigma_y * self.sigma_y)
    }
}

/// Ordered registry of sensor planes (non-decreasing z).
#[derive(Debug, Clone)]
pub struct PlaneRegistry {
    planes: Vec<Plane>,
    by_sensor: HashMap<SensorId, usize, RandomState>,
    z_tolerance: Millimeter,
}

impl Default for PlaneRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PlaneRegistry {
    pub fn new() -> Self {
        PlaneRegistry {
            planes: Vec::new(),
            by_sensor: HashMap::default(),
            z_tolerance: DEFAULT_Z_TOLERANCE,
        }
    }

    /// Set the tolerance (mm) used to bind a hit z to a plane.
    pub fn with_z_tolerance(mut self, tolerance: Millimeter) -> Self {
        self.z_tolerance = tolerance;
        self
    }

    pub fn z_tolerance(&self) -> Millimeter {
        self.z_tolerance
    }

    /// Register a plane without alignment correction, using the cross-product normal.
    ///
    /// See [`add_plane_with`](PlaneRegistry::add_plane_with).
    pub fn add_plane(&mut self, spec: PlaneSpec) -> Result<usize, TrackFitError> {
        self.add_plane_with(spec, &NoAlignment, &CrossProductNormal)
    }

    /// Register a plane, applying `alignment` to its reference points before computing the
    /// normal with `normals`.
    ///
    /// The plane is inserted so that the registry stays sorted by non-decreasing z (planes at
    /// equal z keep their registration order). Registration is idempotent: a sensor id that
    /// is already registered is left untouched and its current index is returned.
    ///
    /// Arguments
    /// -----------------
    /// * `spec` – geometry record of the plane.
    /// * `alignment` – correction applied to the reference points.
    /// * `normals` – plane normal estimator.
    ///
    /// Return
    /// ----------
    /// * The index of the plane in z order, or [`TrackFitError::InvalidPlaneGeometry`] for
    ///   non-finite positions, non-positive resolutions or degenerate reference points.
    pub fn add_plane_with(
        &mut self,
        spec: PlaneSpec,
        alignment: &dyn AlignmentCorrection,
        normals: &dyn NormalEstimator,
    ) -> Result<usize, TrackFitError> {
        if let Some(&idx) = self.by_sensor.get(&spec.sensor_id) {
            debug!(
                "Sensor {} already registered at index {idx}, ignoring",
                spec.sensor_id
            );
            return Ok(idx);
        }
        spec.validate()?;

        let reference_points = alignment.correct(spec.sensor_id, &spec.points());
        let normal = normals.normal(&reference_points).ok_or_else(|| {
            TrackFitError::InvalidPlaneGeometry(format!(
                "sensor {}: degenerate reference points",
                spec.sensor_id
            ))
        })?;
        let z = reference_points[0].z;
        if !z.is_finite() {
            return Err(TrackFitError::InvalidPlaneGeometry(format!(
                "sensor {}: aligned z is not finite",
                spec.sensor_id
            )));
        }

        let plane = Plane {
            sensor_id: spec.sensor_id,
            z,
            sigma_x: spec.sigma_x,
            sigma_y: spec.sigma_y,
            scatter_variance: spec.scatter_variance,
            excluded: spec.excluded,
            mandatory: spec.mandatory,
            reference_points,
            normal,
        };

        let idx = self.planes.partition_point(|p| p.z <= z);
        self.planes.insert(idx, plane);
        self.reindex();
        Ok(idx)
    }

    fn reindex(&mut self) {
        self.by_sensor.clear();
        for (i, p) in self.planes.iter().enumerate() {
            self.by_sensor.insert(p.sensor_id, i);
        }
    }

    pub fn planes(&self) -> &[Plane] {
        &self.planes
    }

    pub fn len(&self) -> usize {
        self.planes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.planes.is_empty()
    }

    pub fn plane(&self, index: usize) -> Result<&Plane, TrackFitError> {
        self.planes
            .get(index)
            .ok_or(TrackFitError::PlaneIndexOutOfRange(index))
    }

    pub fn index_of(&self, sensor_id: SensorId) -> Option<usize> {
        self.by_sensor.get(&sensor_id).copied()
    }

    pub fn plane_by_sensor(&self, sensor_id: SensorId) -> Result<&Plane, TrackFitError> {
        self.index_of(sensor_id)
            .and_then(|i| self.planes.get(i))
            .ok_or(TrackFitError::UnknownSensor(sensor_id))
    }

    /// Index of the plane whose z is closest to `z`, if within the registry tolerance.
    pub fn plane_at_z(&self, z: Millimeter) -> Option<usize> {
        self.planes
            .iter()
            .enumerate()
            .map(|(i, p)| (i, (p.z - z).abs()))
            .filter(|(_, dz)| *dz <= self.z_tolerance)
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(i, _)| i)
    }

    /// Indices (in z order) of the planes that provide measurements.
    pub fn included_indices(&self) -> Vec<usize> {
        self.planes
            .iter()
            .enumerate()
            .filter(|(_, p)| p.is_included())
            .map(|(i, _)| i)
            .collect()
    }

    pub fn n_included(&self) -> usize {
        self.planes.iter().filter(|p| p.is_included()).count()
    }
}

#[cfg(test)]
mod test_geometry {
    use super::*;
    use alignment::{AlignmentConstants, RigidAlignment};

    fn telescope() -> PlaneRegistry {
        let mut registry = PlaneRegistry::new();
        // Registered out of order on purpose
        for (id, z) in [(2, 200.0), (0, 0.0), (1, 100.0)] {
            registry
                .add_plane(PlaneSpec::new(id, z, 0.005, 0.005))
                .unwrap();
        }
        registry
    }

    #[test]
    fn test_planes_sorted_by_z() {
        let registry = telescope();
        let z: Vec<f64> = registry.planes().iter().map(|p| p.z()).collect();
        assert_eq!(z, vec![0.0, 100.0, 200.0]);
        assert_eq!(registry.index_of(2), Some(2));
        assert_eq!(registry.index_of(0), Some(0));
        assert_eq!(registry.plane_by_sensor(1).unwrap().z(), 100.0);
        assert_eq!(
            registry.plane_by_sensor(42).unwrap_err(),
            TrackFitError::UnknownSensor(42)
        );
    }

    #[test]
    fn test_add_plane_idempotent() {
        let mut registry = telescope();
        let idx = registry
            .add_plane(PlaneSpec::new(1, 999.0, 1.0, 1.0))
            .unwrap();
        assert_eq!(idx, 1);
        assert_eq!(registry.len(), 3);
        assert_eq!(registry.plane(1).unwrap().z(), 100.0);
    }

    #[test]
    fn test_plane_at_z() {
        let registry = telescope();
        assert_eq!(registry.plane_at_z(100.2), Some(1));
        assert_eq!(registry.plane_at_z(-0.4), Some(0));
        assert_eq!(registry.plane_at_z(150.0), None);
    }

    #[test]
    fn test_invalid_geometry() {
        let mut registry = PlaneRegistry::new();
        let err = registry
            .add_plane(PlaneSpec::new(0, 0.0, 0.0, 0.005))
            .unwrap_err();
        assert!(matches!(err, TrackFitError::InvalidPlaneGeometry(_)));

        let err = registry
            .add_plane(PlaneSpec::new(1, f64::NAN, 0.005, 0.005))
            .unwrap_err();
        assert!(matches!(err, TrackFitError::InvalidPlaneGeometry(_)));

        let p = Vector3::new(0.0, 0.0, 10.0);
        let err = registry
            .add_plane(PlaneSpec::new(2, 10.0, 0.005, 0.005).with_reference_points([p, p, p]))
            .unwrap_err();
        assert!(matches!(err, TrackFitError::InvalidPlaneGeometry(_)));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_alignment_shifts_plane_z() {
        let mut align = RigidAlignment::new();
        align.insert(
            5,
            AlignmentConstants::translation(Vector3::new(0.0, 0.0, 2.0)),
        );
        let mut registry = PlaneRegistry::new();
        registry
            .add_plane_with(
                PlaneSpec::new(5, 50.0, 0.005, 0.005),
                &align,
                &CrossProductNormal,
            )
            .unwrap();
        assert_eq!(registry.plane(0).unwrap().z(), 52.0);
    }

    #[test]
    fn test_included_indices() {
        let mut registry = telescope();
        registry
            .add_plane(PlaneSpec::new(9, 150.0, 0.005, 0.005).excluded(true))
            .unwrap();
        assert_eq!(registry.included_indices(), vec![0, 1, 3]);
        assert_eq!(registry.n_included(), 3);
    }

    #[test]
    fn test_material_scatter() {
        let spec = PlaneSpec::new(0, 0.0, 0.005, 0.005).with_material(1e-3, 5.0);
        assert!(spec.scatter_variance > 0.0);
    }
}

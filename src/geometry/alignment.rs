//! # Alignment correction and plane-normal estimation
//!
//! Reference points of a sensor plane are first corrected by an [`AlignmentCorrection`]
//! and then handed to a [`NormalEstimator`] to obtain the plane normal. Both steps are
//! traits so a caller can swap the alignment model (e.g. a survey-based or a track-based
//! alignment) and the way the normal is derived without touching the registry.
//!
//! ## Rigid alignment model
//!
//! [`RigidAlignment`] applies, per sensor, a small rigid-body correction:
//!
//! ```text
//! p' = R(α, β, γ) · (p − c) + c + Δ
//! ```
//!
//! where `c` is the centroid of the three reference points, `Δ` the offset vector and
//! `R` the rotation built from the angles about x (α), y (β) and z (γ). Sensors without
//! alignment constants are left untouched.
use std::collections::HashMap;

use ahash::RandomState;
use nalgebra::{Rotation3, Vector3};

use crate::constants::{SensorId, EPS};

/// Correction applied to the three reference points of a plane before its normal is computed.
pub trait AlignmentCorrection {
    /// Return the aligned reference points of `sensor_id`.
    fn correct(&self, sensor_id: SensorId, points: &[Vector3<f64>; 3]) -> [Vector3<f64>; 3];
}

/// Strategy computing a unit plane normal from three (aligned) reference points.
pub trait NormalEstimator {
    /// Unit normal of the plane, or `None` if the points are degenerate (collinear or coincident).
    fn normal(&self, points: &[Vector3<f64>; 3]) -> Option<Vector3<f64>>;
}

/// Identity alignment: reference points are used as given.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoAlignment;

impl AlignmentCorrection for NoAlignment {
    fn correct(&self, _sensor_id: SensorId, points: &[Vector3<f64>; 3]) -> [Vector3<f64>; 3] {
        *points
    }
}

/// Rigid-body alignment constants of one sensor.
///
/// Fields
/// -----------------
/// * `offset` – translation `(Δx, Δy, Δz)` in mm.
/// * `alpha`, `beta`, `gamma` – rotation angles (rad) about the x, y and z axes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AlignmentConstants {
    pub offset: Vector3<f64>,
    pub alpha: f64,
    pub beta: f64,
    pub gamma: f64,
}

impl AlignmentConstants {
    pub fn translation(offset: Vector3<f64>) -> Self {
        AlignmentConstants {
            offset,
            alpha: 0.0,
            beta: 0.0,
            gamma: 0.0,
        }
    }
}

/// Per-sensor rigid alignment, looked up by sensor id.
#[derive(Debug, Clone, Default)]
pub struct RigidAlignment {
    constants: HashMap<SensorId, AlignmentConstants, RandomState>,
}

impl RigidAlignment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the constants of a sensor.
    pub fn insert(&mut self, sensor_id: SensorId, constants: AlignmentConstants) {
        self.constants.insert(sensor_id, constants);
    }

    pub fn get(&self, sensor_id: SensorId) -> Option<&AlignmentConstants> {
        self.constants.get(&sensor_id)
    }
}

impl AlignmentCorrection for RigidAlignment {
    fn correct(&self, sensor_id: SensorId, points: &[Vector3<f64>; 3]) -> [Vector3<f64>; 3] {
        let Some(c) = self.constants.get(&sensor_id) else {
            return *points;
        };

        let centroid = (points[0] + points[1] + points[2]) / 3.0;
        let rotation = Rotation3::from_euler_angles(c.alpha, c.beta, c.gamma);

        points.map(|p| rotation * (p - centroid) + centroid + c.offset)
    }
}

/// Normal from the cross product `(p1 − p0) × (p2 − p0)`, oriented along +z.
#[derive(Debug, Clone, Copy, Default)]
pub struct CrossProductNormal;

impl NormalEstimator for CrossProductNormal {
    fn normal(&self, points: &[Vector3<f64>; 3]) -> Option<Vector3<f64>> {
        let n = (points[1] - points[0]).cross(&(points[2] - points[0]));
        let norm = n.norm();
        if !norm.is_finite() || norm < EPS {
            return None;
        }
        let n = n / norm;
        // Beam travels along +z
        Some(if n.z < 0.0 { -n } else { n })
    }
}

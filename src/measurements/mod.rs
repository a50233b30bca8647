//! # Hit measurements
//!
//! A [`Measurement`] is a 2D hit position in the local frame of one plane, together with
//! the identifier of the hit it was built from and an optional time/level index.
//! It is generic over the scalar type so that hit producers working in single precision
//! can hand their data over without an intermediate representation; the fitting engine
//! itself works in `f64`.
//!
//! [`HitInput`] is the record consumed from the external hit-collection collaborator: a
//! global position whose z identifies the plane.
pub mod event;

use nalgebra::{Scalar, Vector2};
use serde::{Deserialize, Serialize};

use crate::constants::{HitId, Millimeter};

/// A 2D hit measurement owned by one plane for the duration of one event.
#[derive(Debug, Clone, PartialEq)]
pub struct Measurement<T: Scalar = f64> {
    pub position: Vector2<T>,
    pub z: T,
    pub origin: HitId,
    pub time: Option<u32>,
}

impl<T: Scalar + Copy> Measurement<T> {
    pub fn new(x: T, y: T, z: T, origin: HitId) -> Self {
        Measurement {
            position: Vector2::new(x, y),
            z,
            origin,
            time: None,
        }
    }

    pub fn with_time(mut self, time: u32) -> Self {
        self.time = Some(time);
        self
    }

    pub fn x(&self) -> T {
        self.position.x
    }

    pub fn y(&self) -> T {
        self.position.y
    }
}

impl From<Measurement<f32>> for Measurement<f64> {
    fn from(m: Measurement<f32>) -> Self {
        Measurement {
            position: m.position.cast::<f64>(),
            z: f64::from(m.z),
            origin: m.origin,
            time: m.time,
        }
    }
}

/// Hit record delivered by the hit-collection collaborator for one event.
///
/// The plane is resolved from `z` against the registry tolerance.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HitInput {
    pub x: Millimeter,
    pub y: Millimeter,
    pub z: Millimeter,
    pub origin: HitId,
    #[serde(default)]
    pub time: Option<u32>,
}

impl HitInput {
    pub fn new(x: Millimeter, y: Millimeter, z: Millimeter, origin: HitId) -> Self {
        HitInput {
            x,
            y,
            z,
            origin,
            time: None,
        }
    }
}

impl From<&HitInput> for Measurement<f64> {
    fn from(hit: &HitInput) -> Self {
        Measurement {
            position: Vector2::new(hit.x, hit.y),
            z: hit.z,
            origin: hit.origin,
            time: hit.time,
        }
    }
}

//! # Constants and type definitions for trackfit
//!
//! This module centralizes the **numerical constants**, **unit conventions**, and **common type
//! definitions** shared by the geometry registry, the track finders and the DAF engine.
//!
//! ## Units
//!
//! - Positions and z coordinates are expressed in **millimetres**.
//! - Slopes (`dx/dz`, `dy/dz`) are dimensionless.
//! - Scattering variances are expressed in **rad²** (angular variance of the slope kick).
//! - Beam momenta are expressed in **GeV/c**.

use smallvec::SmallVec;

// -------------------------------------------------------------------------------------------------
// Unit conversions
// -------------------------------------------------------------------------------------------------

/// Micrometres → millimetres
pub const UM: f64 = 1.0e-3;

/// Numerical epsilon used for floating-point comparisons
pub const EPS: f64 = 1e-9;

/// Default tolerance (mm) used to bind a hit z to a registered plane
pub const DEFAULT_Z_TOLERANCE: f64 = 0.5;

// -------------------------------------------------------------------------------------------------
// Fit dimensions
// -------------------------------------------------------------------------------------------------

/// Number of track parameters: (x, y, dx/dz, dy/dz)
pub const STATE_DIM: usize = 4;

/// Smallest number of active planes for which a straight-line fit keeps residual freedom
pub const MIN_ACTIVE_PLANES: usize = 3;

/// Tolerance subtracted from the ndof floor to accept softly-weighted plane inclusion
pub const NDOF_TOLERANCE: f64 = 0.5;

/// Initial position variance (mm²) used to seed the Kalman passes
pub const SEED_POSITION_VARIANCE: f64 = 1.0e2;

/// Initial slope variance (rad²) used to seed the Kalman passes
pub const SEED_SLOPE_VARIANCE: f64 = 1.0e-2;

/// Below this summed weight a plane does not contribute a measurement update
pub const MIN_PLANE_WEIGHT: f64 = 1.0e-9;

// -------------------------------------------------------------------------------------------------
// Type aliases
// -------------------------------------------------------------------------------------------------

/// Length in millimetres
pub type Millimeter = f64;
/// Angular variance in rad²
pub type RadianSquared = f64;
/// Momentum in GeV/c
pub type GeV = f64;

/// Identifier of a sensor plane, as provided by the geometry description
pub type SensorId = u32;

/// Identifier of the hit a measurement originates from
pub type HitId = u64;

/// Reference to a measurement inside an event: `(plane index, measurement index)`
pub type HitRef = (usize, usize);

/// Hits assigned to a branch or a draft candidate (stack allocated for typical telescopes)
pub type HitRefs = SmallVec<[HitRef; 8]>;

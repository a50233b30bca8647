//! # Kalman primitives for straight-line tracks
//!
//! State vector `(x, y, dx/dz, dy/dz)` at a plane, measurement `(x, y)`. All functions are
//! generic over the scalar (`nalgebra::RealField`) and return `None` when a covariance
//! cannot be inverted, leaving it to the caller to flag the candidate.
//!
//! ## Conventions
//!
//! * The state at a plane is the **outgoing** state, i.e. after the scattering kick of that
//!   plane. Forward propagation therefore transports first and then adds the destination
//!   plane's scattering variance; backward propagation adds the origin plane's variance and
//!   then transports.
//! * Scattering only inflates the slope variances (thin-scatterer approximation).
//!
//! ## Smoothing
//!
//! The two-filter smoother combines a forward **filtered** estimate (including the plane's
//! measurement) with a backward **predicted** estimate (excluding it) in information form:
//!
//! ```text
//! C = (Cf⁻¹ + Cb⁻¹)⁻¹
//! x = C · (Cf⁻¹ xf + Cb⁻¹ xb)
//! ```
use nalgebra::{convert, Cholesky, Matrix2, Matrix2x4, Matrix4, RealField, Vector2, Vector4};

use super::TrackEstimate;

/// Projection of the state onto the measured coordinates.
#[inline]
pub fn projection<T: RealField + Copy>() -> Matrix2x4<T> {
    let (o, z) = (T::one(), T::zero());
    Matrix2x4::new(o, z, z, z, z, o, z, z)
}

/// Straight-line transport matrix over `dz`.
#[inline]
pub fn transport<T: RealField + Copy>(dz: T) -> Matrix4<T> {
    let mut f = Matrix4::identity();
    f[(0, 2)] = dz;
    f[(1, 3)] = dz;
    f
}

/// Transport an estimate to `z_to` without process noise.
pub fn propagate<T: RealField + Copy>(estimate: &TrackEstimate<T>, z_to: T) -> TrackEstimate<T> {
    let f = transport(z_to - estimate.z);
    TrackEstimate {
        z: z_to,
        state: f * estimate.state,
        covariance: f * estimate.covariance * f.transpose(),
    }
}

/// Add a scattering kick of angular variance `variance` to the slope components.
pub fn add_scattering<T: RealField + Copy>(estimate: &mut TrackEstimate<T>, variance: T) {
    estimate.covariance[(2, 2)] += variance;
    estimate.covariance[(3, 3)] += variance;
}

/// Measurement update with position `m` and covariance `v`.
pub fn update<T: RealField + Copy>(
    estimate: &TrackEstimate<T>,
    m: &Vector2<T>,
    v: &Matrix2<T>,
) -> Option<TrackEstimate<T>> {
    let h = projection::<T>();
    let p = &estimate.covariance;
    let s = h * p * h.transpose() + v;
    let s_inv = s.try_inverse()?;
    let gain = p * h.transpose() * s_inv;
    let residual = m - h * estimate.state;

    let state = estimate.state + gain * residual;
    let covariance = symmetrize((Matrix4::identity() - gain * h) * p);
    Some(TrackEstimate {
        z: estimate.z,
        state,
        covariance,
    })
}

/// Information-form combination of a forward and a backward estimate at the same plane.
pub fn smooth<T: RealField + Copy>(
    forward: &TrackEstimate<T>,
    backward: &TrackEstimate<T>,
) -> Option<TrackEstimate<T>> {
    let wf = spd_inverse(&forward.covariance)?;
    let wb = spd_inverse(&backward.covariance)?;
    let covariance = symmetrize(spd_inverse(&(wf + wb))?);
    let state = covariance * (wf * forward.state + wb * backward.state);
    Some(TrackEstimate {
        z: forward.z,
        state,
        covariance,
    })
}

/// Normalized squared residual `rᵀ V⁻¹ r` of a measurement against an estimate.
pub fn residual_chi2<T: RealField + Copy>(
    estimate: &TrackEstimate<T>,
    m: &Vector2<T>,
    v: &Matrix2<T>,
) -> Option<T> {
    let r = m - projection::<T>() * estimate.state;
    let v_inv = v.try_inverse()?;
    Some((r.transpose() * v_inv * r)[(0, 0)])
}

/// Weight-combined measurement of one plane.
///
/// Each hit `i` enters with information `wᵢ V⁻¹`; the effective measurement is
///
/// ```text
/// W = Σ wᵢ V⁻¹,   m = W⁻¹ Σ wᵢ V⁻¹ mᵢ
/// ```
///
/// Returns `None` when the summed weight is not above `min_weight` (the plane then does
/// not update the state).
pub fn effective_measurement<'a, T, I>(
    hits: I,
    v: &Matrix2<T>,
    min_weight: T,
) -> Option<(Vector2<T>, Matrix2<T>)>
where
    T: RealField + Copy,
    I: IntoIterator<Item = (&'a Vector2<T>, T)>,
{
    let mut sum_w = T::zero();
    let mut sum_wm = Vector2::zeros();
    for (m, w) in hits {
        sum_w += w;
        sum_wm += m * w;
    }
    if !(sum_w > min_weight) {
        return None;
    }
    // All hits of a plane share V, so W⁻¹ = V / Σw and m is the weighted mean.
    Some((sum_wm / sum_w, v / sum_w))
}

/// Inverse of a symmetric positive-definite matrix, with a general fallback.
fn spd_inverse<T: RealField + Copy>(m: &Matrix4<T>) -> Option<Matrix4<T>> {
    match Cholesky::new(*m) {
        Some(chol) => Some(chol.inverse()),
        None => m.try_inverse(),
    }
}

#[inline]
fn symmetrize<T: RealField + Copy>(m: Matrix4<T>) -> Matrix4<T> {
    (m + m.transpose()) * convert::<f64, T>(0.5)
}

/// Diagonal seed covariance with the given position and slope variances.
pub fn seed_covariance<T: RealField + Copy>(position_var: T, slope_var: T) -> Matrix4<T> {
    Matrix4::from_diagonal(&Vector4::new(
        position_var,
        position_var,
        slope_var,
        slope_var,
    ))
}

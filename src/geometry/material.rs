//! Material budget → multiple-scattering variance.
//!
//! The projected angular spread of a singly-charged, ultra-relativistic particle
//! crossing a layer of thickness `x` (in units of radiation length `X0`) follows the
//! Highland parametrisation:
//!
//! ```text
//! θ0 = 13.6 MeV / p · sqrt(x/X0) · (1 + 0.038 · ln(x/X0))
//! ```
//!
//! The Kalman process noise uses the variance `θ0²` on each slope component.
use crate::constants::{GeV, RadianSquared};

/// Highland constant expressed in GeV
const HIGHLAND_SCALE_GEV: f64 = 13.6e-3;

/// Logarithmic correction coefficient of the Highland formula
const HIGHLAND_LOG_COEFF: f64 = 0.038;

/// Projected scattering angle variance (rad²) for a layer of `x_over_x0` radiation
/// lengths crossed at momentum `momentum` (GeV/c).
///
/// Returns `0.0` for non-positive thickness. The logarithmic term is clamped so the
/// result never becomes negative for extremely thin layers.
pub fn highland_variance(x_over_x0: f64, momentum: GeV) -> RadianSquared {
    if x_over_x0 <= 0.0 || momentum <= 0.0 {
        return 0.0;
    }
    let log_term = (1.0 + HIGHLAND_LOG_COEFF * x_over_x0.ln()).max(0.0);
    let theta0 = HIGHLAND_SCALE_GEV / momentum * x_over_x0.sqrt() * log_term;
    theta0 * theta0
}

#[cfg(test)]
mod test_material {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_highland_reference_value() {
        // 50 µm silicon ≈ 5.3e-4 X0, at 5 GeV
        let x: f64 = 5.3e-4;
        let theta0 = HIGHLAND_SCALE_GEV / 5.0 * x.sqrt() * (1.0 + 0.038 * x.ln());
        assert_relative_eq!(highland_variance(x, 5.0), theta0 * theta0);
        assert!(highland_variance(x, 5.0) > 0.0);
    }

    #[test]
    fn test_highland_scales_with_momentum() {
        let low = highland_variance(1e-3, 1.0);
        let high = highland_variance(1e-3, 2.0);
        assert_relative_eq!(low / high, 4.0, max_relative = 1e-12);
    }

    #[test]
    fn test_highland_degenerate_inputs() {
        assert_eq!(highland_variance(0.0, 5.0), 0.0);
        assert_eq!(highland_variance(1e-3, 0.0), 0.0);
        assert_eq!(highland_variance(1e-300, 5.0), 0.0);
    }
}

//! Hit responsibilities at a given annealing temperature.
//!
//! For the hits of one plane with residual chi2 values `χ²ᵢ`, the weights follow a
//! Gaussian mixture competing with a constant no-hit hypothesis placed at the chi2 cutoff:
//!
//! ```text
//! φᵢ   = exp(−χ²ᵢ / 2T)
//! φcut = exp(−χ²cut / 2T)
//! wᵢ   = φᵢ / (Σⱼ φⱼ + φcut)
//! ```
//!
//! so that `Σ wᵢ + w_no-hit = 1`. The exponentials are evaluated relative to the largest
//! exponent to stay finite for large residuals.

/// Responsibilities of the hits of one plane.
///
/// Arguments
/// -----------------
/// * `chi2` – residual chi2 of each hit against the smoothed estimate.
/// * `temperature` – annealing temperature, `> 0`.
/// * `chi2_cutoff` – chi2 at which a hit is as likely as the no-hit hypothesis.
///
/// Return
/// ----------
/// * One weight per hit, in `[0, 1]`. A NaN chi2 propagates NaN to the whole plane.
pub fn responsibilities(chi2: &[f64], temperature: f64, chi2_cutoff: f64) -> Vec<f64> {
    if chi2.is_empty() {
        return Vec::new();
    }
    let scale = -0.5 / temperature;
    let cut = chi2_cutoff * scale;
    let shift = chi2
        .iter()
        .map(|c| c * scale)
        .fold(cut, |acc, e| if e > acc { e } else { acc });

    let phi: Vec<f64> = chi2.iter().map(|c| (c * scale - shift).exp()).collect();
    let norm: f64 = phi.iter().sum::<f64>() + (cut - shift).exp();
    phi.into_iter().map(|p| p / norm).collect()
}

#[cfg(test)]
mod test_weights {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_weights_sum_with_no_hit() {
        let chi2 = [0.5, 3.0, 12.0];
        for t in [81.0, 9.0, 1.0] {
            let w = responsibilities(&chi2, t, 20.0);
            let no_hit = 1.0 / (chi2.iter().map(|c| (-(c - 20.0) / (2.0 * t)).exp()).sum::<f64>() + 1.0);
            assert_relative_eq!(w.iter().sum::<f64>() + no_hit, 1.0, epsilon = 1e-12);
            assert!(w.windows(2).all(|p| p[0] >= p[1]));
        }
    }

    #[test]
    fn test_perfect_hit_at_cold_temperature() {
        let w = responsibilities(&[0.0], 1.0, 20.0);
        assert_relative_eq!(w[0], 1.0 / (1.0 + (-10.0f64).exp()));
        assert!(w[0] > 0.9999);
    }

    #[test]
    fn test_far_outlier_is_suppressed() {
        let w = responsibilities(&[0.0, 1.0e4], 1.0, 20.0);
        assert!(w[0] > 0.99);
        assert!(w[1] < 1e-100);
        assert!(w.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_hot_temperature_flattens() {
        let cold = responsibilities(&[0.0, 8.0], 1.0, 20.0);
        let hot = responsibilities(&[0.0, 8.0], 81.0, 20.0);
        assert!(hot[1] > cold[1]);
    }

    #[test]
    fn test_nan_propagates() {
        let w = responsibilities(&[f64::NAN, 1.0], 1.0, 20.0);
        assert!(w.iter().any(|v| v.is_nan()));
    }

    #[test]
    fn test_empty_plane() {
        assert!(responsibilities(&[], 1.0, 20.0).is_empty());
    }
}

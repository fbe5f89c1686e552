use std::f64::consts::LN_2;

/// `sqrt(4 ln 2)`: converts a FWHM-scaled offset into the Gaussian exponent
/// argument.
pub const MU_FACTOR: f64 = 1.665_109_222_315_395_5;

/// Bound on the exponent argument `mu` before squaring.
pub const MU_CONSTRAINT: f64 = 10.0;

/// `pi / (4 ln 2)`, the squared factor turning `fwhm * height` into a peak area.
pub fn area_factor_squared() -> f64 {
    std::f64::consts::PI / (4.0 * LN_2)
}

/// One constrained Gaussian component.
///
/// The exponent argument is clamped to `[-MU_CONSTRAINT, MU_CONSTRAINT]` for
/// the value as well as the Jacobian terms built from it.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PeakModel {
    pub height: f64,
    pub centroid: f64,
    pub fwhm: f64,
}

impl PeakModel {
    pub fn new(height: f64, centroid: f64, fwhm: f64) -> Self {
        PeakModel { height, centroid, fwhm }
    }

    /// Unclamped exponent argument at `x`; zero when the width is zero.
    ///
    /// # Example
    ///
    /// ```rust
    /// # use gammacore::fit::gaussian::{PeakModel, MU_FACTOR};
    /// let peak = PeakModel::new(100.0, 50.0, 5.0);
    /// assert!((peak.mu(55.0) - MU_FACTOR).abs() < 1e-12);
    /// assert_eq!(PeakModel::new(100.0, 50.0, 0.0).mu(55.0), 0.0);
    /// ```
    pub fn mu(&self, x: f64) -> f64 {
        if self.fwhm == 0.0 {
            0.0
        } else {
            (x - self.centroid) * MU_FACTOR / self.fwhm
        }
    }

    /// `mu` clamped to the stability bound.
    pub fn clamped_mu(&self, x: f64) -> f64 {
        self.mu(x).clamp(-MU_CONSTRAINT, MU_CONSTRAINT)
    }

    /// `exp(-clamp(mu)^2)`, the derivative of the value with respect to height.
    pub fn shape(&self, x: f64) -> f64 {
        let m = self.clamped_mu(x);
        (-m * m).exp()
    }

    /// Model counts contributed at `x`.
    pub fn value(&self, x: f64) -> f64 {
        self.height * self.shape(x)
    }

    /// `d value / d fwhm`: `2 * value * mu^2 / fwhm`, zero at zero width.
    pub fn width_derivative(&self, x: f64) -> f64 {
        if self.fwhm == 0.0 {
            return 0.0;
        }
        let mu = self.mu(x);
        2.0 * self.value(x) * mu * mu / self.fwhm
    }

    /// `d value / d centroid`: `2 * value * mu * MU_FACTOR / fwhm`.
    ///
    /// The `mu` factor is unclamped while the exponential inside `value` is
    /// clamped.
    pub fn centroid_derivative(&self, x: f64) -> f64 {
        if self.fwhm == 0.0 {
            return 0.0;
        }
        2.0 * self.value(x) * self.mu(x) * MU_FACTOR / self.fwhm
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mu_factor_constant() {
        assert!((MU_FACTOR - (4.0 * LN_2).sqrt()).abs() < 1e-15);
    }

    #[test]
    fn test_half_maximum_at_half_fwhm() {
        let peak = PeakModel::new(1000.0, 50.0, 5.0);
        assert!((peak.value(50.0) - 1000.0).abs() < 1e-9);
        assert!((peak.value(52.5) - 500.0).abs() < 1e-9);
        assert!((peak.value(47.5) - 500.0).abs() < 1e-9);
    }

    #[test]
    fn test_value_clamped_far_from_peak() {
        let peak = PeakModel::new(1000.0, 50.0, 1.0);
        let floor = 1000.0 * (-MU_CONSTRAINT * MU_CONSTRAINT).exp();
        assert_eq!(peak.value(80.0), floor);
        assert_eq!(peak.value(20.0), floor);
        assert!(peak.value(80.0) > 0.0);
    }

    #[test]
    fn test_centroid_derivative_uses_unclamped_mu() {
        let peak = PeakModel::new(1000.0, 50.0, 1.0);
        let far = peak.centroid_derivative(80.0);
        let farther = peak.centroid_derivative(90.0);
        // the exponential is pinned at the clamp, so the derivative grows with mu
        assert!(farther > far);
    }

    #[test]
    fn test_derivatives_match_finite_differences_near_peak() {
        let peak = PeakModel::new(800.0, 40.0, 4.0);
        let x = 42.3;
        let h = 1e-6;

        let dc = (PeakModel::new(800.0, 40.0 + h, 4.0).value(x)
            - PeakModel::new(800.0, 40.0 - h, 4.0).value(x))
            / (2.0 * h);
        assert!((dc - peak.centroid_derivative(x)).abs() < 1e-4);

        let dw = (PeakModel::new(800.0, 40.0, 4.0 + h).value(x)
            - PeakModel::new(800.0, 40.0, 4.0 - h).value(x))
            / (2.0 * h);
        assert!((dw - peak.width_derivative(x)).abs() < 1e-4);
    }

    #[test]
    fn test_area_factor() {
        assert!((area_factor_squared().sqrt() - 1.064_467_019_431_226).abs() < 1e-12);
    }
}

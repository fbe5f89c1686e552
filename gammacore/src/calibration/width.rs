use std::fmt::{self, Display, Formatter};
use serde::{Deserialize, Serialize};

use crate::calibration::estimate::Estimate;
use crate::error::CalibrationError;

/// Form of the width equation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum WidthMode {
    /// w(x) = alpha + beta*x
    Linear,
    /// w(x) = sqrt(alpha + beta*x)
    SquareRoot,
}

/// Peak width (FWHM, channels) calibration.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct WidthEquation {
    pub alpha: f64,
    pub beta: f64,
    pub chi_sq: f64,
    pub mode: WidthMode,
}

impl WidthEquation {
    pub fn new(alpha: f64, beta: f64, chi_sq: f64, mode: WidthMode) -> Self {
        WidthEquation { alpha, beta, chi_sq, mode }
    }

    pub fn linear(alpha: f64, beta: f64) -> Self {
        WidthEquation::new(alpha, beta, 0.0, WidthMode::Linear)
    }

    pub fn square_root(alpha: f64, beta: f64) -> Self {
        WidthEquation::new(alpha, beta, 0.0, WidthMode::SquareRoot)
    }

    /// FWHM in channels at `channel`.
    ///
    /// Fails with [`CalibrationError::InvalidWidth`] when `alpha + beta*x` is
    /// negative.
    pub fn fwhm_at(&self, channel: f64) -> Result<f64, CalibrationError> {
        let width = self.alpha + self.beta * channel;
        if width < 0.0 {
            return Err(CalibrationError::InvalidWidth { channel });
        }
        Ok(match self.mode {
            WidthMode::Linear => width,
            WidthMode::SquareRoot => width.sqrt(),
        })
    }

    /// FWHM at `channel`, or `default` when the equation is undefined there.
    ///
    /// # Example
    ///
    /// ```rust
    /// # use gammacore::calibration::width::WidthEquation;
    /// let wx = WidthEquation::linear(-10.0, 0.01);
    /// let est = wx.fwhm_or(50.0, 1.0);
    /// assert!(est.is_fallback());
    /// assert_eq!(est.value(), 1.0);
    /// ```
    pub fn fwhm_or(&self, channel: f64, default: f64) -> Estimate<f64> {
        Estimate::from_result(self.fwhm_at(channel), default)
    }
}

impl Display for WidthEquation {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self.mode {
            WidthMode::Linear => write!(
                f,
                "w(x) = {} + {}X (chisq = {})",
                self.alpha, self.beta, self.chi_sq
            ),
            WidthMode::SquareRoot => write!(
                f,
                "w(x) = sqrt({} + {}X)   (chisq = {})",
                self.alpha, self.beta, self.chi_sq
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_width() {
        let wx = WidthEquation::linear(2.0, 0.01);
        assert!((wx.fwhm_at(300.0).unwrap() - 5.0).abs() < 1e-12);
    }

    #[test]
    fn test_square_root_width() {
        let wx = WidthEquation::square_root(1.0, 0.08);
        assert!((wx.fwhm_at(300.0).unwrap() - 5.0).abs() < 1e-12);
    }

    #[test]
    fn test_negative_width_is_invalid() {
        let wx = WidthEquation::square_root(-1.0, 0.0);
        assert_eq!(
            wx.fwhm_at(3.0),
            Err(CalibrationError::InvalidWidth { channel: 3.0 })
        );
    }
}

use std::fmt::{self, Display, Formatter};
use serde::{Deserialize, Serialize};

use crate::error::CalibrationError;

/// Form of the energy equation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EnergyMode {
    /// e(x) = a + b*x
    Linear,
    /// e(x) = a + b*x + c*x^2
    Quadratic,
}

impl EnergyMode {
    pub fn label(&self) -> &'static str {
        match self {
            EnergyMode::Linear => "linear",
            EnergyMode::Quadratic => "quadratic",
        }
    }
}

/// Energy calibration `e(x) = a + b*x (+ c*x^2)` and the chi squared of the
/// calibration fit that produced it.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct EnergyEquation {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub chi_sq: f64,
    pub mode: EnergyMode,
}

impl EnergyEquation {
    pub fn new(a: f64, b: f64, c: f64, chi_sq: f64, mode: EnergyMode) -> Self {
        EnergyEquation { a, b, c, chi_sq, mode }
    }

    /// Linear calibration with no quadratic term.
    pub fn linear(a: f64, b: f64) -> Self {
        EnergyEquation::new(a, b, 0.0, 0.0, EnergyMode::Linear)
    }

    pub fn quadratic(a: f64, b: f64, c: f64) -> Self {
        EnergyEquation::new(a, b, c, 0.0, EnergyMode::Quadratic)
    }

    /// Energy at a (fractional) channel.
    ///
    /// # Example
    ///
    /// ```rust
    /// # use gammacore::calibration::energy::EnergyEquation;
    /// let ex = EnergyEquation::quadratic(1.0, 0.5, 0.001);
    /// assert!((ex.energy_of(100.0) - 61.0).abs() < 1e-12);
    /// ```
    pub fn energy_of(&self, channel: f64) -> f64 {
        let energy = self.a + self.b * channel;
        match self.mode {
            EnergyMode::Quadratic => energy + self.c * channel * channel,
            EnergyMode::Linear => energy,
        }
    }

    /// Channel at which the calibration yields `energy`.
    ///
    /// The quadratic branch takes the `+` root and never returns a negative
    /// channel.
    pub fn channel_of(&self, energy: f64) -> Result<f64, CalibrationError> {
        if self.mode == EnergyMode::Linear || self.c == 0.0 {
            if self.b == 0.0 {
                return Err(CalibrationError::ConstantCalibration);
            }
            return Ok((energy - self.a) / self.b);
        }

        let discriminant = self.b * self.b - 4.0 * self.c * (self.a - energy);
        if discriminant < 0.0 {
            return Err(CalibrationError::NegativeDiscriminant { energy });
        }
        let channel = (discriminant.sqrt() - self.b) / (2.0 * self.c);
        Ok(channel.max(0.0))
    }

    pub fn linear_coefficient(&self) -> f64 {
        self.b
    }

    pub fn quadratic_coefficient(&self) -> f64 {
        self.c
    }
}

impl Display for EnergyEquation {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "e(x) = {} + {}X + {}X2 (mode = {}; chisq = {})",
            self.a,
            self.b,
            self.c,
            self.mode.label(),
            self.chi_sq
        )
    }
}

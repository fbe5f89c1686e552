//! Region fit settings and the solver tolerance table they select.

use std::fmt::{self, Display, Formatter};
use serde::{Deserialize, Serialize};

use crate::error::FitError;

/// Whether the shared average peak width is a free parameter.
///
/// With `Varies`, the average width varies when at least one centroid is
/// free, and a 511 keV peak's extra width varies only when it is not the
/// only peak. With `Fixed`, the average width is held and a 511 keV peak's
/// extra width always varies.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PeakWidthMode {
    Varies,
    Fixed,
}

/// Convergence criteria type; together with [`PeakWidthMode`] it picks the
/// solver tolerances.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConvergenceCriteria {
    Larger,
    Smaller,
    LargerInc,
}

impl ConvergenceCriteria {
    pub fn display_label(&self) -> &'static str {
        match self {
            ConvergenceCriteria::Larger => "Large",
            ConvergenceCriteria::Smaller => "Small",
            ConvergenceCriteria::LargerInc => "Large(increase allowed)",
        }
    }
}

/// Relative tolerances handed to the least squares solver.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SolverTolerances {
    /// relative reduction of the sum of squares
    pub ftol: f64,
    /// relative change of the parameter vector
    pub xtol: f64,
}

const FTOL_TABLE: [f64; 4] = [1.0e-6, 1.0e-5, 1.0e-5, 1.0e-4];
const XTOL_TABLE: [f64; 4] = [1.0e-6, 1.0e-5, 3.0e-5, 1.0e-4];

impl SolverTolerances {
    /// Looks up the tolerances for a criteria / width mode pair.
    ///
    /// Entry 0 is the tightest setting and is not selected by any pair.
    pub fn lookup(criteria: ConvergenceCriteria, mode: PeakWidthMode) -> Self {
        let index = match (criteria, mode) {
            (ConvergenceCriteria::Larger, PeakWidthMode::Varies) => 2,
            (ConvergenceCriteria::Larger, PeakWidthMode::Fixed) => 3,
            (ConvergenceCriteria::Smaller, _) => 1,
            (ConvergenceCriteria::LargerInc, _) => 2,
        };
        SolverTolerances {
            ftol: FTOL_TABLE[index],
            xtol: XTOL_TABLE[index],
        }
    }
}

/// Settings for one region fit.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FitParameters {
    /// Maximum number of fit cycles (default: 10)
    pub max_cycles: usize,
    /// Maximum number of fits returned, best first (default: 1)
    pub max_output_fits: usize,
    /// Maximum number of peaks in the model (default: 10)
    pub max_peaks: usize,
    /// Residual a channel must reach before a peak is added there (default: 20)
    pub max_residual_threshold: f64,
    pub peak_width_mode: PeakWidthMode,
    pub convergence_criteria: ConvergenceCriteria,
}

impl Default for FitParameters {
    fn default() -> Self {
        FitParameters {
            max_cycles: 10,
            max_output_fits: 1,
            max_peaks: 10,
            max_residual_threshold: 20.0,
            peak_width_mode: PeakWidthMode::Varies,
            convergence_criteria: ConvergenceCriteria::Larger,
        }
    }
}

impl FitParameters {
    /// A single optimisation of the candidate peaks, no model search.
    pub fn single_cycle() -> Self {
        FitParameters {
            max_cycles: 1,
            ..FitParameters::default()
        }
    }

    /// Width pinned to the calibration, tighter tolerances, more candidates kept.
    pub fn fixed_width() -> Self {
        FitParameters {
            max_output_fits: 3,
            peak_width_mode: PeakWidthMode::Fixed,
            convergence_criteria: ConvergenceCriteria::Smaller,
            ..FitParameters::default()
        }
    }

    pub fn tolerances(&self) -> SolverTolerances {
        SolverTolerances::lookup(self.convergence_criteria, self.peak_width_mode)
    }

    /// Rejects settings the cycle loop cannot run with.
    pub fn validate(&self) -> Result<(), FitError> {
        if self.max_cycles == 0 {
            return Err(FitError::InvalidParameters("max_cycles must be at least 1".into()));
        }
        if self.max_output_fits == 0 {
            return Err(FitError::InvalidParameters("max_output_fits must be at least 1".into()));
        }
        if self.max_peaks == 0 {
            return Err(FitError::InvalidParameters("max_peaks must be at least 1".into()));
        }
        if !self.max_residual_threshold.is_finite() {
            return Err(FitError::InvalidParameters("max_residual_threshold must be finite".into()));
        }
        Ok(())
    }
}

impl Display for FitParameters {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Max Cycles={}; Max Fits Returned={}; Max Npeaks={}; Max Residual={}",
            self.max_cycles, self.max_output_fits, self.max_peaks, self.max_residual_threshold
        )?;
        let pw = match self.peak_width_mode {
            PeakWidthMode::Varies => "VARIES",
            PeakWidthMode::Fixed => "FIXED",
        };
        write!(
            f,
            "Peak Width={}; Convergence Criteria={}",
            pw,
            self.convergence_criteria.display_label()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tolerance_table() {
        let t = SolverTolerances::lookup(ConvergenceCriteria::Larger, PeakWidthMode::Varies);
        assert_eq!(t, SolverTolerances { ftol: 1.0e-5, xtol: 3.0e-5 });

        let t = SolverTolerances::lookup(ConvergenceCriteria::Larger, PeakWidthMode::Fixed);
        assert_eq!(t, SolverTolerances { ftol: 1.0e-4, xtol: 1.0e-4 });

        let t = SolverTolerances::lookup(ConvergenceCriteria::Smaller, PeakWidthMode::Fixed);
        assert_eq!(t, SolverTolerances { ftol: 1.0e-5, xtol: 1.0e-5 });

        let t = SolverTolerances::lookup(ConvergenceCriteria::LargerInc, PeakWidthMode::Fixed);
        assert_eq!(t, SolverTolerances { ftol: 1.0e-5, xtol: 3.0e-5 });
    }

    #[test]
    fn test_default_parameters() {
        let parms = FitParameters::default();
        assert_eq!(parms.max_cycles, 10);
        assert_eq!(parms.max_output_fits, 1);
        assert_eq!(parms.max_peaks, 10);
        assert!(parms.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_cycles() {
        let parms = FitParameters { max_cycles: 0, ..FitParameters::default() };
        assert!(matches!(parms.validate(), Err(FitError::InvalidParameters(_))));
    }
}

//! Error types for gammacore

use thiserror::Error;

/// Failures of the energy and width calibration equations.
///
/// These are recoverable: callers either fall back to a documented default
/// or mark the affected representation invalid.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CalibrationError {
    /// The width equation produced a negative value under the square root or
    /// a negative linear width.
    #[error("peak width negative or undefined at channel {channel}")]
    InvalidWidth { channel: f64 },

    /// Energy does not depend on channel, so no inverse exists.
    #[error("energy calibration is constant")]
    ConstantCalibration,

    /// The quadratic energy equation has no real root for this energy.
    #[error("b^2 - 4ac is negative for energy {energy}")]
    NegativeDiscriminant { energy: f64 },
}

/// Failures raised by a least squares solver.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SolverError {
    #[error("maximal count ({0}) exceeded: evaluations")]
    TooManyEvaluations(usize),

    #[error("residuals or jacobian contain non-finite values")]
    NonFinite,

    #[error("normal matrix is singular, covariance undefined")]
    SingularCovariance,

    #[error("start vector has {got} entries, problem expects {expected}")]
    DimensionMismatch { expected: usize, got: usize },
}

/// Region fit error type
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FitError {
    /// More candidate peaks than the fit is allowed to carry.
    #[error("too many input peaks: {count} > {max}")]
    TooManyInputPeaks { count: usize, max: usize },

    /// Not enough channels left for the free parameters of a cycle.
    #[error("cycle {cycle}: too many variables, overdetermined ({width} channels, {vary_count} free)")]
    Overdetermined {
        cycle: usize,
        width: usize,
        vary_count: usize,
    },

    /// The solver failed; carries its message.
    #[error("cycle {cycle}: least squares optimizer failed: {message}")]
    OptimizerDivergence { cycle: usize, message: String },

    /// The region (and its background estimate) does not lie inside the spectrum.
    #[error("region [{first}, {last}] is not covered by the spectrum")]
    RegionOutsideSpectrum { first: i32, last: i32 },

    /// Parameter validation error
    #[error("invalid fit parameters: {0}")]
    InvalidParameters(String),
}

impl FitError {
    /// Wraps a solver failure raised while running `cycle`.
    pub fn divergence(cycle: usize, err: &SolverError) -> Self {
        FitError::OptimizerDivergence {
            cycle,
            message: err.to_string(),
        }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, FitError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_divergence_keeps_solver_message() {
        let err = FitError::divergence(3, &SolverError::TooManyEvaluations(600));
        match &err {
            FitError::OptimizerDivergence { cycle, message } => {
                assert_eq!(*cycle, 3);
                assert!(message.contains("600"));
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert!(err.to_string().starts_with("cycle 3"));
    }
}

//! Nonlinear least squares seam of the region fit.
//!
//! The region fit only needs a solver that drives a [`LeastSquaresProblem`]
//! (residuals plus Jacobian) from a start vector to a minimum of the sum of
//! squared residuals and reports the parameter covariance there.
//! [`LevenbergMarquardt`] is the default implementation.

use nalgebra::{DMatrix, DVector};

use crate::error::SolverError;
use crate::fit::parameters::SolverTolerances;

/// A residual vector and its Jacobian as functions of the parameter vector.
///
/// Both calls receive the candidate vector; implementations overwrite their
/// internal state from it before evaluating.
pub trait LeastSquaresProblem {
    fn parameter_count(&self) -> usize;

    fn residual_count(&self) -> usize;

    /// Residuals (target minus model) at `x`.
    fn residuals(&mut self, x: &DVector<f64>) -> DVector<f64>;

    /// `d residual_i / d x_j` at `x`, one row per residual.
    fn jacobian(&mut self, x: &DVector<f64>) -> DMatrix<f64>;
}

/// Why the solver stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Termination {
    /// Actual and predicted relative reduction of the cost both within `ftol`.
    CostReduction,
    /// Relative step length within `xtol`.
    StepSize,
    /// Both criteria met on the same step.
    Both,
    /// The residuals are exactly zero.
    ExactFit,
    /// No step could reduce the cost any further.
    Stalled,
}

impl Termination {
    /// Numeric return code carried into fit reports.
    pub fn code(&self) -> i32 {
        match self {
            Termination::CostReduction => 1,
            Termination::StepSize => 2,
            Termination::Both => 3,
            Termination::ExactFit => 4,
            Termination::Stalled => 5,
        }
    }
}

/// Outcome of a successful solve.
#[derive(Clone, Debug)]
pub struct LeastSquaresSolution {
    pub x: DVector<f64>,
    /// `(J^T J)^-1` at `x`, ordered like `x`.
    pub covariance: DMatrix<f64>,
    /// Sum of squared residuals at `x`.
    pub cost: f64,
    pub evaluations: usize,
    pub termination: Termination,
}

pub trait Optimizer {
    /// Minimises the sum of squared residuals of `problem` starting at `start`.
    ///
    /// Gives up with [`SolverError::TooManyEvaluations`] after
    /// `100 * (n + 1)` residual evaluations for `n` parameters.
    fn solve(
        &self,
        problem: &mut dyn LeastSquaresProblem,
        start: DVector<f64>,
        tolerances: SolverTolerances,
    ) -> Result<LeastSquaresSolution, SolverError>;
}

/// Evaluation budget of a solve over `n` parameters.
pub fn max_evaluations(n: usize) -> usize {
    100 * (n + 1)
}

/// Damped Gauss-Newton solver with Marquardt diagonal scaling.
#[derive(Debug, Clone)]
pub struct LevenbergMarquardt {
    /// Initial damping parameter.
    pub initial_lambda: f64,
    /// Factor to increase lambda on a rejected step.
    pub lambda_up: f64,
    /// Factor to decrease lambda on an accepted step.
    pub lambda_down: f64,
    /// Damping above which the solve is considered stalled.
    pub max_lambda: f64,
}

impl Default for LevenbergMarquardt {
    fn default() -> Self {
        LevenbergMarquardt {
            initial_lambda: 1e-3,
            lambda_up: 10.0,
            lambda_down: 0.1,
            max_lambda: 1e16,
        }
    }
}

fn all_finite(v: &DVector<f64>) -> bool {
    v.iter().all(|x| x.is_finite())
}

/// Solves the damped normal equations, Cholesky first, LU when the matrix is
/// not numerically positive definite.
fn solve_damped(normal: &DMatrix<f64>, rhs: &DVector<f64>) -> Option<DVector<f64>> {
    if let Some(chol) = normal.clone().cholesky() {
        return Some(chol.solve(rhs));
    }
    normal.clone().lu().solve(rhs)
}

/// `(J^T J)^-1`, failing when the normal matrix is singular.
pub fn covariance_of(jacobian: &DMatrix<f64>) -> Result<DMatrix<f64>, SolverError> {
    let normal = jacobian.tr_mul(jacobian);
    let inverse = match normal.clone().cholesky() {
        Some(chol) => Some(chol.inverse()),
        None => normal.try_inverse(),
    };
    match inverse {
        Some(cov) if cov.iter().all(|v| v.is_finite()) => Ok(cov),
        _ => Err(SolverError::SingularCovariance),
    }
}

impl Optimizer for LevenbergMarquardt {
    fn solve(
        &self,
        problem: &mut dyn LeastSquaresProblem,
        start: DVector<f64>,
        tolerances: SolverTolerances,
    ) -> Result<LeastSquaresSolution, SolverError> {
        let n = problem.parameter_count();
        if start.len() != n {
            return Err(SolverError::DimensionMismatch { expected: n, got: start.len() });
        }
        let budget = max_evaluations(n);

        let mut x = start;
        let mut residuals = problem.residuals(&x);
        let mut evaluations = 1;
        if !all_finite(&residuals) {
            return Err(SolverError::NonFinite);
        }
        let mut cost = residuals.norm_squared();
        let mut lambda = self.initial_lambda;

        let termination = 'outer: loop {
            if cost == 0.0 {
                break Termination::ExactFit;
            }

            let jacobian = problem.jacobian(&x);
            if jacobian.iter().any(|v| !v.is_finite()) {
                return Err(SolverError::NonFinite);
            }
            let normal = jacobian.tr_mul(&jacobian);
            let gradient = jacobian.tr_mul(&residuals);
            let descent = gradient.map(|g| -g);

            loop {
                let mut damped = normal.clone();
                for i in 0..n {
                    damped[(i, i)] += lambda * normal[(i, i)].max(f64::EPSILON);
                }

                let Some(delta) = solve_damped(&damped, &descent) else {
                    lambda *= self.lambda_up;
                    if lambda > self.max_lambda {
                        break 'outer Termination::Stalled;
                    }
                    continue;
                };

                let candidate = &x + &delta;
                let trial = problem.residuals(&candidate);
                evaluations += 1;
                if evaluations > budget {
                    return Err(SolverError::TooManyEvaluations(budget));
                }

                let trial_cost = if all_finite(&trial) {
                    trial.norm_squared()
                } else {
                    f64::INFINITY
                };

                let small_step = delta.norm() <= tolerances.xtol * (x.norm() + tolerances.xtol);

                if trial_cost < cost {
                    let predicted = -(2.0 * delta.dot(&gradient) + delta.dot(&(&normal * &delta)));
                    let actual_rel = (cost - trial_cost) / cost;
                    let predicted_rel = predicted / cost;
                    let small_reduction = actual_rel <= tolerances.ftol && predicted_rel <= tolerances.ftol;

                    x = candidate;
                    residuals = trial;
                    cost = trial_cost;
                    lambda = (lambda * self.lambda_down).max(f64::EPSILON);

                    match (small_reduction, small_step) {
                        (true, true) => break 'outer Termination::Both,
                        (true, false) => break 'outer Termination::CostReduction,
                        (false, true) => break 'outer Termination::StepSize,
                        (false, false) => break,
                    }
                }

                if small_step {
                    break 'outer Termination::StepSize;
                }
                lambda *= self.lambda_up;
                if lambda > self.max_lambda {
                    break 'outer Termination::Stalled;
                }
            }
        };

        // leaves the problem evaluated at the solution
        let jacobian = problem.jacobian(&x);
        let covariance = covariance_of(&jacobian)?;

        Ok(LeastSquaresSolution {
            x,
            covariance,
            cost,
            evaluations,
            termination,
        })
    }
}

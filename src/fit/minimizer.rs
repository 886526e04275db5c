//! Minimizer interface and the default Nelder-Mead implementation.
//!
//! The engine only needs "minimize this objective over a bounded parameter
//! vector". The default implementation wraps `argmin`'s Nelder-Mead simplex:
//!
//! - parameters are rescaled by their starting magnitude, so a normalization of
//!   1e-12 and an index of −2.5 move on comparable scales
//! - the initial simplex steps every coordinate by 10% (0.1 for a zero start)
//! - bounds are enforced by clamping inside the objective
//!
//! Covariances come from the inverse finite-difference Hessian at the minimum.

use argmin::core::{CostFunction, Executor, State, TerminationReason, TerminationStatus};
use argmin::solver::neldermead::NelderMead;
use log::debug;
use nalgebra::DMatrix;

use crate::domain::FitStatus;
use crate::error::FitError;
use crate::math::{central_hessian, covariance_from_hessian};

/// Objective over the free-parameter vector.
pub type Objective<'a> = dyn Fn(&[f64]) -> Result<f64, FitError> + Sync + 'a;

/// Cost reported for parameter vectors where the objective is not finite.
const PENALTY: f64 = 1e300;

#[derive(Debug, Clone)]
pub struct MinimizerOutcome {
    pub parameters: Vec<f64>,
    pub value: f64,
    pub status: FitStatus,
    pub iterations: u64,
}

pub trait Minimizer: Send + Sync + std::fmt::Debug {
    fn minimize(
        &self,
        objective: &Objective<'_>,
        start: &[f64],
        bounds: &[(f64, f64)],
    ) -> Result<MinimizerOutcome, FitError>;
}

#[derive(Debug, Clone)]
pub struct NelderMeadMinimizer {
    pub max_iterations: u64,
    /// Standard deviation of simplex cost values at which the search stops.
    pub tolerance: f64,
}

impl Default for NelderMeadMinimizer {
    fn default() -> Self {
        Self {
            max_iterations: 2000,
            tolerance: 1e-10,
        }
    }
}

impl NelderMeadMinimizer {
    pub fn new(max_iterations: u64, tolerance: f64) -> Result<Self, FitError> {
        if max_iterations == 0 {
            return Err(FitError::configuration("Minimizer needs at least one iteration."));
        }
        if !(tolerance.is_finite() && tolerance > 0.0) {
            return Err(FitError::configuration(format!(
                "Minimizer tolerance must be finite and > 0, got {tolerance}."
            )));
        }
        Ok(Self {
            max_iterations,
            tolerance,
        })
    }
}

/// Objective in scaled coordinates `u`, with `x = clamp(scale · u)`.
struct ScaledProblem<'a> {
    objective: &'a Objective<'a>,
    scale: Vec<f64>,
    bounds: &'a [(f64, f64)],
}

fn unscale(u: &[f64], scale: &[f64], bounds: &[(f64, f64)]) -> Vec<f64> {
    u.iter()
        .zip(scale)
        .zip(bounds)
        .map(|((&ui, &s), &(lo, hi))| (ui * s).clamp(lo, hi))
        .collect()
}

impl CostFunction for ScaledProblem<'_> {
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, u: &Self::Param) -> Result<Self::Output, argmin::core::Error> {
        let value = (self.objective)(&unscale(u, &self.scale, self.bounds))?;
        Ok(if value.is_finite() { value } else { PENALTY })
    }
}

impl Minimizer for NelderMeadMinimizer {
    fn minimize(
        &self,
        objective: &Objective<'_>,
        start: &[f64],
        bounds: &[(f64, f64)],
    ) -> Result<MinimizerOutcome, FitError> {
        if start.is_empty() {
            return Err(FitError::configuration("No free parameters to minimize."));
        }
        if bounds.len() != start.len() {
            return Err(FitError::configuration(format!(
                "Parameter and bounds length mismatch: {} != {}",
                start.len(),
                bounds.len()
            )));
        }
        if let Some(i) = bounds.iter().position(|(lo, hi)| !(lo <= hi)) {
            return Err(FitError::configuration(format!("Invalid bounds for parameter {i}.")));
        }

        let start: Vec<f64> = start
            .iter()
            .zip(bounds)
            .map(|(&x, &(lo, hi))| x.clamp(lo, hi))
            .collect();
        let scale: Vec<f64> = start.iter().map(|&x| if x != 0.0 { x.abs() } else { 1.0 }).collect();
        let u0: Vec<f64> = start.iter().zip(&scale).map(|(x, s)| x / s).collect();

        let mut simplex = vec![u0.clone()];
        for i in 0..u0.len() {
            let mut vertex = u0.clone();
            vertex[i] += 0.1;
            simplex.push(vertex);
        }

        let scale_out = scale.clone();
        let problem = ScaledProblem {
            objective,
            scale,
            bounds,
        };
        let solver = NelderMead::new(simplex).with_sd_tolerance(self.tolerance)?;
        let res = Executor::new(problem, solver)
            .configure(|state| state.max_iters(self.max_iterations))
            .run()?;

        let state = res.state();
        let best_u = state
            .get_best_param()
            .ok_or_else(|| FitError::numerical("Minimizer returned no parameters."))?;
        let parameters = unscale(best_u, &scale_out, bounds);
        let value = state.get_best_cost();
        let iterations = state.get_iter();
        let converged = matches!(
            state.get_termination_status(),
            TerminationStatus::Terminated(TerminationReason::SolverConverged)
                | TerminationStatus::Terminated(TerminationReason::TargetCostReached)
        );
        debug!("nelder-mead: {iterations} iterations, cost {value:.6}, converged {converged}");

        Ok(MinimizerOutcome {
            parameters,
            value,
            status: if converged {
                FitStatus::Converged
            } else {
                FitStatus::NotConverged
            },
            iterations,
        })
    }
}

/// Covariance of the minimum `x` of a negative log-likelihood.
///
/// Returns `None` if the Hessian cannot be evaluated or inverted.
pub fn estimate_covariance(objective: &Objective<'_>, x: &[f64]) -> Option<DMatrix<f64>> {
    let hessian = central_hessian(&|p: &[f64]| objective(p), x)
        .inspect_err(|e| debug!("no hessian at the minimum: {e}"))
        .ok()?;
    covariance_from_hessian(&hessian)
}

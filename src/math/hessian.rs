//! Finite-difference derivatives and covariance from the observed information.
//!
//! Derivatives come from `finitediff`, which steps every coordinate by the
//! same absolute amount. They are evaluated in stretched coordinates where one
//! such step moves parameter `i` by `RELATIVE_STEP · |x_i|`, so a 1e-12
//! normalization and an O(1) index are resolved alike.
//!
//! The objective here is always a negative log-likelihood, so the covariance
//! of the estimate is the inverse of its Hessian at the minimum.

use std::cell::RefCell;

use finitediff::FiniteDiff;
use log::debug;
use nalgebra::{Cholesky, DMatrix, DVector};

use crate::error::FitError;

/// Parameter change per finite-difference step, relative to the parameter.
pub const RELATIVE_STEP: f64 = 1e-3;

/// Absolute step `finitediff` takes on `Vec<f64>`: `sqrt(f64::EPSILON)`.
const FINITEDIFF_STEP: f64 = 1.490_116_119_384_765_6e-8;

/// Magnitude used for a coordinate that is exactly zero.
const ZERO_MAGNITUDE: f64 = 0.1;

const MAX_DAMPING_ATTEMPTS: usize = 10;

/// Affine map `x = origin + (u − 1) · stretch`, centred on `u = 1`.
struct Stretched {
    origin: Vec<f64>,
    stretch: Vec<f64>,
}

impl Stretched {
    fn around(x: &[f64]) -> Self {
        let stretch = x
            .iter()
            .map(|&v| {
                let magnitude = if v != 0.0 { v.abs() } else { ZERO_MAGNITUDE };
                RELATIVE_STEP * magnitude / FINITEDIFF_STEP
            })
            .collect();
        Self {
            origin: x.to_vec(),
            stretch,
        }
    }

    fn centre(&self) -> Vec<f64> {
        vec![1.0; self.origin.len()]
    }

    fn to_params(&self, u: &[f64]) -> Vec<f64> {
        self.origin
            .iter()
            .zip(&self.stretch)
            .zip(u)
            .map(|((&x0, &s), &ui)| x0 + (ui - 1.0) * s)
            .collect()
    }
}

/// Central-difference gradient of `f` at `x`.
pub fn central_gradient<F>(f: &F, x: &[f64]) -> Vec<f64>
where
    F: Fn(&[f64]) -> f64,
{
    let coords = Stretched::around(x);
    let cost = |u: &Vec<f64>| f(&coords.to_params(u));
    coords
        .centre()
        .central_diff(&cost)
        .iter()
        .zip(&coords.stretch)
        .map(|(g, s)| g / s)
        .collect()
}

/// Central-difference Hessian of `f` at `x`, symmetrized.
///
/// The first error raised by `f` is returned instead of a Hessian.
pub fn central_hessian<F>(f: &F, x: &[f64]) -> Result<DMatrix<f64>, FitError>
where
    F: Fn(&[f64]) -> Result<f64, FitError>,
{
    let n = x.len();
    if n == 0 {
        return Err(FitError::configuration("Hessian of a function of no parameters."));
    }
    let coords = Stretched::around(x);
    let failure: RefCell<Option<FitError>> = RefCell::new(None);
    let cost = |u: &Vec<f64>| -> f64 {
        match f(&coords.to_params(u)) {
            Ok(v) => v,
            Err(e) => {
                if failure.borrow().is_none() {
                    *failure.borrow_mut() = Some(e);
                }
                f64::NAN
            }
        }
    };
    let gradient = |u: &Vec<f64>| u.central_diff(&cost);
    let stretched = coords.centre().central_hessian(&gradient);
    if let Some(e) = failure.into_inner() {
        return Err(e);
    }

    let h = DMatrix::from_fn(n, n, |i, j| stretched[i][j] / (coords.stretch[i] * coords.stretch[j]));
    let h = (&h + h.transpose()) * 0.5;
    if h.iter().all(|v| v.is_finite()) {
        Ok(h)
    } else {
        Err(FitError::numerical("Hessian contains non-finite entries."))
    }
}

/// Invert a Hessian into a covariance matrix.
///
/// The symmetrized Hessian is equilibrated to a unit diagonal and factorized
/// by Cholesky; a slightly indefinite matrix gets a growing diagonal damping.
/// Returns `None` when no damping up to 0.1 of the diagonal helps or a
/// variance comes out non-positive.
pub fn covariance_from_hessian(hessian: &DMatrix<f64>) -> Option<DMatrix<f64>> {
    let n = hessian.nrows();
    if n == 0 || hessian.ncols() != n {
        return None;
    }
    let sym = (hessian + hessian.transpose()) * 0.5;
    let scale = DVector::from_iterator(
        n,
        (0..n).map(|i| {
            let d = sym[(i, i)].abs();
            if d > 0.0 && d.is_finite() { 1.0 / d.sqrt() } else { 1.0 }
        }),
    );
    let s = DMatrix::from_diagonal(&scale);
    let unit = &s * &sym * &s;
    let identity = DMatrix::<f64>::identity(n, n);

    let mut damped = unit;
    let mut damping = 0.0_f64;
    for attempt in 0..MAX_DAMPING_ATTEMPTS {
        if let Some(chol) = Cholesky::new(damped.clone()) {
            if damping > 0.0 {
                debug!("hessian factorized with diagonal damping {damping:e} after {attempt} attempts");
            }
            let cov = &s * chol.solve(&identity) * &s;
            let valid = (0..n).all(|i| cov[(i, i)].is_finite() && cov[(i, i)] > 0.0)
                && cov.iter().all(|v| v.is_finite());
            return valid.then_some(cov);
        }
        let next = if damping == 0.0 { 1e-9 } else { damping * 10.0 };
        for i in 0..n {
            damped[(i, i)] += next - damping;
        }
        damping = next;
    }
    None
}

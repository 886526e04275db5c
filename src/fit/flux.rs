//! Fluxes derived from the best fit with linear error propagation.
//!
//! For a quantity `q(θ)` of the free parameters, `σ_q² = ∇qᵀ C ∇q` with a
//! central-difference gradient and the fit covariance `C`. All quantities here
//! use the intrinsic (de-absorbed) spectrum.

use nalgebra::{DMatrix, DVector};

use crate::domain::{BandPoint, FitResult, IntegralFlux};
use crate::error::FitError;
use crate::fit::FitEngine;
use crate::math::{central_gradient, integrate_log, log_space};
use crate::models::{LiteratureSpectrum, SpectralModel};

const INTEGRATION_INTERVALS: usize = 400;

impl FitEngine {
    /// Best-fit intrinsic `dN/dE` with its 1σ error on `n_points` log-spaced
    /// energies across the fit range.
    pub fn confidence_band(&self, n_points: usize) -> Result<Vec<BandPoint>, FitError> {
        let fit = self.require_fit()?;
        let model = self.require_model()?;
        let covariance = covariance_matrix(fit)?;
        let (lo, hi) = self.energy_range();
        let energies = log_space(10f64.powf(lo), 10f64.powf(hi), n_points)?;

        Ok(energies
            .into_iter()
            .map(|e| {
                let q = |p: &[f64]| model.evaluate_intrinsic_with(p, e);
                BandPoint {
                    energy: e,
                    flux: q(&fit.parameters),
                    flux_err: propagate(&q, fit, &covariance),
                }
            })
            .collect())
    }

    /// Intrinsic photon flux between `e_min` and `e_max` TeV, cm⁻² s⁻¹.
    pub fn integral_flux(&self, e_min: f64, e_max: f64) -> Result<IntegralFlux, FitError> {
        if !(e_min.is_finite() && e_max.is_finite() && e_min > 0.0 && e_max > e_min) {
            return Err(FitError::configuration(format!(
                "Invalid integration range [{e_min}, {e_max}] TeV."
            )));
        }
        let fit = self.require_fit()?;
        let model = self.require_model()?;
        let q = |p: &[f64]| integral(model, p, e_min, e_max);
        let flux_err = match covariance_matrix(fit) {
            Ok(c) => propagate(&q, fit, &c),
            Err(_) => f64::NAN,
        };
        Ok(IntegralFlux {
            e_min,
            e_max,
            flux: q(&fit.parameters),
            flux_err,
        })
    }

    /// Integral flux as a fraction of `reference` over the same range.
    pub fn flux_in_reference_units(
        &self,
        reference: &dyn LiteratureSpectrum,
        e_min: f64,
        e_max: f64,
    ) -> Result<(f64, f64), FitError> {
        let flux = self.integral_flux(e_min, e_max)?;
        let denom = reference.integral_flux(e_min, e_max);
        if !(denom.is_finite() && denom > 0.0) {
            return Err(FitError::numerical(format!(
                "Reference spectrum of {} has no flux in [{e_min}, {e_max}] TeV.",
                reference.source()
            )));
        }
        Ok((flux.flux / denom, flux.flux_err / denom))
    }
}

pub(crate) fn integral(model: &SpectralModel, params: &[f64], e_min: f64, e_max: f64) -> f64 {
    integrate_log(|e| model.evaluate_intrinsic_with(params, e), e_min, e_max, INTEGRATION_INTERVALS)
}

fn covariance_matrix(fit: &FitResult) -> Result<DMatrix<f64>, FitError> {
    let rows = fit
        .covariance
        .as_ref()
        .ok_or_else(|| FitError::numerical("The fit has no covariance matrix."))?;
    let n = rows.len();
    Ok(DMatrix::from_fn(n, n, |i, j| rows[i][j]))
}

/// `sqrt(∇qᵀ C ∇q)` with the gradient taken over the free parameters of `fit`.
pub(crate) fn propagate<Q>(q: &Q, fit: &FitResult, covariance: &DMatrix<f64>) -> f64
where
    Q: Fn(&[f64]) -> f64,
{
    let n = fit.free_indices.len();
    if covariance.nrows() != n {
        return f64::NAN;
    }
    let free: Vec<f64> = fit.free_indices.iter().map(|&i| fit.parameters[i]).collect();
    let of_free = |x: &[f64]| {
        let mut params = fit.parameters.clone();
        for (&i, &v) in fit.free_indices.iter().zip(x) {
            params[i] = v;
        }
        q(&params)
    };
    let grad = DVector::from_vec(central_gradient(&of_free, &free));
    let var = (grad.transpose() * covariance * &grad)[(0, 0)];
    var.max(0.0).sqrt()
}

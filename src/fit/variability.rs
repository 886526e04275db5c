//! Time-binned sub-fits, light curves and the variability index.
//!
//! The variability index compares two hypotheses over the same time bins:
//!
//! - joint: one spectrum (fitted on all binned runs) describes every bin
//! - independent: each bin gets its own normalization, shape held fixed
//!
//! `index = 2 (Σ ln L_independent − Σ ln L_joint)`, distributed as χ² with
//! (bins − 1) degrees of freedom for a steady source.

use log::{info, warn};

use crate::domain::{LightCurvePoint, TimeBinning, VariabilityResult};
use crate::error::FitError;
use crate::fit::flux::integral;
use crate::fit::spectrum::{crossing_above, crossing_below, fit_norm_scale, scaled_cost};
use crate::fit::{FitEngine, Window};
use crate::math::on_off_ts;
use crate::models::SpectralModel;
use crate::observation::ObservationUnit;

/// One time bin and an engine over its runs.
#[derive(Debug, Clone)]
pub struct TimeBin {
    pub mjd_min: f64,
    pub mjd_max: f64,
    pub engine: FitEngine,
}

impl TimeBin {
    pub fn mjd_centre(&self) -> f64 {
        0.5 * (self.mjd_min + self.mjd_max)
    }
}

impl FitEngine {
    /// MJD bin edges for `binning` over the active runs.
    pub fn time_bin_edges(&self, binning: &TimeBinning) -> Result<Vec<f64>, FitError> {
        match binning {
            TimeBinning::Edges(edges) => {
                if edges.len() < 2 || edges.windows(2).any(|w| !(w[1] > w[0])) {
                    return Err(FitError::configuration("Time bin edges must be increasing."));
                }
                Ok(edges.clone())
            }
            TimeBinning::Width(dt) => {
                self.require_active_runs()?;
                let (min, max) = self
                    .active_units()
                    .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), u| {
                        (lo.min(u.mjd()), hi.max(u.mjd()))
                    });
                self.uniform_time_edges(min, max, *dt)
            }
        }
    }

    /// Bins of about `dt` days covering `[min − dt/2, max + dt/2]`.
    ///
    /// More bins than `FitConfig::max_time_bins` is a configuration error.
    pub fn uniform_time_edges(&self, min: f64, max: f64, dt: f64) -> Result<Vec<f64>, FitError> {
        if !(dt.is_finite() && dt > 0.0) {
            return Err(FitError::configuration(format!(
                "Time bin width must be finite and > 0 days, got {dt}."
            )));
        }
        if !(min.is_finite() && max.is_finite() && min <= max) {
            return Err(FitError::configuration(format!("Invalid MJD span [{min}, {max}].")));
        }
        let lo = min - 0.5 * dt;
        let hi = max + 0.5 * dt;
        let n = ((hi - lo) / dt).round().max(1.0);
        let max_bins = self.config().max_time_bins;
        if !(n <= max_bins as f64) {
            return Err(FitError::configuration(format!(
                "{n} time bins of {dt} days exceed the limit of {max_bins}."
            )));
        }
        let n = n as usize;
        let width = (hi - lo) / n as f64;
        Ok((0..=n).map(|i| lo + width * i as f64).collect())
    }

    /// One engine per non-empty time bin, each over the active runs inside it.
    pub fn time_binned_data(&self, binning: &TimeBinning) -> Result<Vec<TimeBin>, FitError> {
        let edges = self.time_bin_edges(binning)?;
        let last = edges.len() - 2;
        let mut bins = Vec::new();
        for (i, w) in edges.windows(2).enumerate() {
            let (lo, hi) = (w[0], w[1]);
            let inside = |u: &&ObservationUnit| {
                let t = u.mjd();
                t >= lo && (t < hi || (i == last && t <= hi))
            };
            let units: Vec<ObservationUnit> = self.active_units().filter(inside).cloned().collect();
            if units.is_empty() {
                continue;
            }
            bins.push(TimeBin {
                mjd_min: lo,
                mjd_max: hi,
                engine: self.with_units(units)?,
            });
        }
        Ok(bins)
    }

    /// Variability index of the active runs in bins of `dt` days.
    ///
    /// `best_fit` seeds the joint fit. With `mjd_range` only runs inside it are
    /// used and the bins are laid over the range itself, not over the runs.
    pub fn variability_index(
        &self,
        dt: f64,
        best_fit: &SpectralModel,
        mjd_range: Option<(f64, f64)>,
    ) -> Result<VariabilityResult, FitError> {
        let mut scope = self.from_active_runs()?;
        let binning = match mjd_range {
            Some((lo, hi)) => {
                scope.set_time_range(lo, hi)?;
                scope = scope.from_active_runs()?;
                TimeBinning::Edges(scope.uniform_time_edges(lo, hi, dt)?)
            }
            None => TimeBinning::Width(dt),
        };
        scope.publish_model(best_fit.clone());

        let bins = scope.time_binned_data(&binning)?;
        if bins.is_empty() {
            return Err(FitError::data("No runs fall into the requested time bins."));
        }

        let joint_fit = scope.fit_energy_spectrum()?;
        if !joint_fit.status.is_ok() {
            warn!("joint fit for the variability index finished with {:?}", joint_fit.status);
        }
        let joint = scope.require_model()?.clone();

        let (e_lo, e_hi) = scope.energy_range();
        let (e_lo, e_hi) = (10f64.powf(e_lo), 10f64.powf(e_hi));

        let mut sum_joint = 0.0;
        let mut sum_independent = 0.0;
        let mut light_curve = Vec::with_capacity(bins.len());
        for bin in &bins {
            let engine = &bin.engine;
            let cost_joint = engine.joint_cost(&joint, joint.parameters(), Window::Fit);
            let fit = fit_norm_scale(engine, &joint, Window::Fit)?;
            sum_joint += cost_joint;
            sum_independent += fit.cost.min(cost_joint);

            let cost = |k: f64| scaled_cost(engine, &joint, &fit, k, Window::Fit);
            let k_lo = crossing_below(&cost, fit.scale, fit.cost + 0.5);
            let k_hi = crossing_above(&cost, fit.scale, fit.cost + 0.5).unwrap_or(fit.scale);

            let mut base = joint.parameters().to_vec();
            base[joint.kind().norm_parameter()] = fit.base_norm;
            let unit_flux = integral(&joint, &base, e_lo, e_hi);
            let (non, noff, alpha) = engine.summed_counts(Window::Fit);

            light_curve.push(LightCurvePoint {
                mjd: bin.mjd_centre(),
                mjd_half_width: 0.5 * (bin.mjd_max - bin.mjd_min),
                n_runs: engine.n_runs(),
                flux: fit.scale * unit_flux,
                flux_err: 0.5 * (k_hi - k_lo).max(0.0) * unit_flux,
                ts: on_off_ts(non, noff, alpha),
                neg_log_likelihood: fit.cost,
            });
        }

        let index = 2.0 * (sum_joint - sum_independent);
        info!(
            "variability index {index:.3} over {} time bins of {dt} days",
            light_curve.len()
        );
        Ok(VariabilityResult {
            index,
            neg_log_likelihood_independent: sum_independent,
            neg_log_likelihood_joint: sum_joint,
            ndf: light_curve.len().saturating_sub(1),
            light_curve,
        })
    }
}

//! Joint likelihood over many runs.
//!
//! `FitEngine` owns the spectral model and the observation units. The joint
//! objective is the sum of the units' `−ln L` over active runs:
//!
//! - the free-parameter vector is expanded into a full parameter vector once
//! - units are evaluated in parallel, each reading the same immutable model
//!   and parameter slice
//!
//! The model published to the units is replaced (never mutated) when
//! parameters change, so every evaluation sees a consistent snapshot.

use std::collections::BTreeSet;
use std::ops::Range;
use std::sync::Arc;

use log::{debug, info, warn};
use rand::Rng;
use rayon::prelude::*;

use crate::domain::{FitConfig, FitResult, FitStatus, LastCount, RunFitInfo, ThresholdMethod, ThresholdSetting};
use crate::error::FitError;
use crate::fit::{Minimizer, NelderMeadMinimizer, estimate_covariance};
use crate::models::{EblOpacity, ModelKind, SpectralModel};
use crate::observation::{ObservationUnit, to_log_range};
use crate::response::{DataProvider, EnergyBinning, RunReference};

/// Which bins of each unit enter a joint likelihood sum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Window {
    /// Each unit's fit window.
    Fit,
    /// A single energy bin, for units whose fit window contains it.
    Bin(usize),
}

impl Window {
    pub(crate) fn bins(self, unit: &ObservationUnit) -> Range<usize> {
        self.narrow(unit.fit_window())
    }

    /// As [`Window::bins`], with the fit window taken at `params`.
    pub(crate) fn bins_with(self, unit: &ObservationUnit, model: &SpectralModel, params: &[f64]) -> Range<usize> {
        self.narrow(unit.fit_window_with(model, params))
    }

    fn narrow(self, fit: Range<usize>) -> Range<usize> {
        match self {
            Window::Fit => fit,
            Window::Bin(j) if fit.contains(&j) => j..j + 1,
            Window::Bin(_) => 0..0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FitEngine {
    config: FitConfig,
    binning: EnergyBinning,
    energy_range: (f64, f64),
    threshold: Option<ThresholdSetting>,
    last_count: Option<LastCount>,
    mjd_range: Option<(f64, f64)>,
    model: Option<Arc<SpectralModel>>,
    units: Vec<ObservationUnit>,
    excluded_runs: BTreeSet<u32>,
    excluded_dates: Vec<(f64, f64)>,
    minimizer: Arc<dyn Minimizer>,
    last_fit: Option<FitResult>,
}

impl FitEngine {
    pub fn new(config: FitConfig) -> Result<Self, FitError> {
        let binning = EnergyBinning::new(config.bin_width, config.binning_min, config.binning_max)?;
        let energy_range = to_log_range(config.energy_min, config.energy_max, false)?;
        if let Some(t) = &config.threshold {
            t.validate()?;
        }
        if !(config.max_energy_bias.is_finite() && config.max_energy_bias > 0.0) {
            return Err(FitError::configuration(format!(
                "Maximum energy bias must be finite and > 0, got {}.",
                config.max_energy_bias
            )));
        }
        let minimizer = NelderMeadMinimizer::new(config.max_iterations, config.tolerance)?;
        Ok(Self {
            threshold: config.threshold,
            last_count: config.last_count,
            config,
            binning,
            energy_range,
            mjd_range: None,
            model: None,
            units: Vec::new(),
            excluded_runs: BTreeSet::new(),
            excluded_dates: Vec::new(),
            minimizer: Arc::new(minimizer),
            last_fit: None,
        })
    }

    /// Replace the default Nelder-Mead minimizer.
    pub fn with_minimizer(mut self, minimizer: Arc<dyn Minimizer>) -> Self {
        self.minimizer = minimizer;
        self
    }

    pub fn config(&self) -> &FitConfig {
        &self.config
    }

    pub fn binning(&self) -> &EnergyBinning {
        &self.binning
    }

    pub(crate) fn minimizer(&self) -> &dyn Minimizer {
        self.minimizer.as_ref()
    }

    // ---- model ----

    /// Build a fresh model of `kind`; `norm_energy` in TeV.
    pub fn set_model(&mut self, kind: ModelKind, norm_energy: f64) -> Result<(), FitError> {
        let model = SpectralModel::new(kind, norm_energy)?;
        self.install_model(model)
    }

    /// As [`FitEngine::set_model`], attenuated by `exp(−τ(E))`.
    pub fn set_model_with_ebl(
        &mut self,
        kind: ModelKind,
        norm_energy: f64,
        opacity: Arc<dyn EblOpacity>,
    ) -> Result<(), FitError> {
        let model = SpectralModel::new(kind, norm_energy)?.with_ebl(opacity);
        self.install_model(model)
    }

    fn install_model(&mut self, mut model: SpectralModel) -> Result<(), FitError> {
        model.set_energy_range_log(self.binning.min(), self.binning.max())?;
        info!("model set to {} at E0 = {} TeV", model.kind().name(), model.norm_energy());
        self.last_fit = None;
        self.publish_model(model);
        Ok(())
    }

    /// Share `model` with every unit.
    pub(crate) fn publish_model(&mut self, model: SpectralModel) {
        let model = Arc::new(model);
        for unit in &mut self.units {
            unit.set_model(model.clone());
        }
        self.model = Some(model);
    }

    pub fn model(&self) -> Option<&SpectralModel> {
        self.model.as_deref()
    }

    pub(crate) fn require_model(&self) -> Result<&SpectralModel, FitError> {
        self.model()
            .ok_or_else(|| FitError::configuration("No spectral model set; call set_model first."))
    }

    /// Clone of the current (best-fit after a fit) model.
    pub fn best_fit_model(&self) -> Option<SpectralModel> {
        self.model().cloned()
    }

    /// Overwrite the full parameter vector (e.g. to seed a fit).
    pub fn set_parameters(&mut self, params: &[f64]) -> Result<(), FitError> {
        let mut model = self.require_model()?.clone();
        model.set_parameters(params)?;
        self.publish_model(model);
        Ok(())
    }

    pub fn fix_parameter(&mut self, index: usize, value: Option<f64>) -> Result<(), FitError> {
        let mut model = self.require_model()?.clone();
        model.fix_parameter(index, value)?;
        self.publish_model(model);
        Ok(())
    }

    pub fn release_parameter(&mut self, index: usize) -> Result<(), FitError> {
        let mut model = self.require_model()?.clone();
        model.release_parameter(index)?;
        self.publish_model(model);
        Ok(())
    }

    // ---- runs ----

    /// Load a run from `provider` and add it.
    pub fn add_run<P: DataProvider + ?Sized>(&mut self, provider: &P, run: &RunReference) -> Result<(), FitError> {
        let raw = provider.load(run).inspect_err(|e| {
            warn!("skipping run {} from '{}': {e}", run.run_number, run.source);
        })?;
        let unit = ObservationUnit::new(raw, self.binning)?;
        self.add_object(unit)
    }

    /// Add a unit, configuring it with the current binning, model, range and threshold.
    pub fn add_object(&mut self, mut unit: ObservationUnit) -> Result<(), FitError> {
        let run = unit.run_number();
        if self.units.iter().any(|u| u.run_number() == run) {
            return Err(FitError::data(format!("Run {run} has already been added.")));
        }
        if unit.binning() != &self.binning {
            unit.set_binning(self.binning);
        }
        unit.set_energy_range(self.energy_range.0, self.energy_range.1, false)?;
        unit.set_max_energy_bias(self.config.max_energy_bias)?;
        unit.set_last_count(self.last_count);
        if let Some(setting) = self.threshold {
            apply_threshold(&mut unit, setting);
        }
        if let Some(model) = &self.model {
            unit.set_model(model.clone());
        }
        self.units.push(unit);
        Ok(())
    }

    pub fn units(&self) -> &[ObservationUnit] {
        &self.units
    }

    pub fn n_runs(&self) -> usize {
        self.units.len()
    }

    // ---- configuration broadcast ----

    pub fn set_energy_range(&mut self, min: f64, max: f64, linear: bool) -> Result<(), FitError> {
        let range = to_log_range(min, max, linear)?;
        for unit in &mut self.units {
            unit.set_energy_range(range.0, range.1, false)?;
        }
        self.energy_range = range;
        Ok(())
    }

    /// Fit range in log10(E/TeV).
    pub fn energy_range(&self) -> (f64, f64) {
        self.energy_range
    }

    /// Configure the threshold of every run. Runs where no threshold can be
    /// derived keep fitting without one.
    pub fn set_energy_threshold(&mut self, method: ThresholdMethod, value: f64, linear: bool) -> Result<(), FitError> {
        let setting = ThresholdSetting { method, value, linear };
        setting.validate()?;
        for unit in &mut self.units {
            apply_threshold(unit, setting);
        }
        self.threshold = Some(setting);
        Ok(())
    }

    pub fn clear_energy_threshold(&mut self) {
        for unit in &mut self.units {
            unit.clear_energy_threshold();
        }
        self.threshold = None;
    }

    /// End every run's fit window before its last counted bin, or lift the cut.
    pub fn set_last_count(&mut self, definition: Option<LastCount>) {
        for unit in &mut self.units {
            unit.set_last_count(definition);
        }
        self.last_count = definition;
    }

    pub fn last_count(&self) -> Option<LastCount> {
        self.last_count
    }

    pub fn set_binning(&mut self, binning: EnergyBinning) -> Result<(), FitError> {
        for unit in &mut self.units {
            unit.set_binning(binning);
        }
        self.binning = binning;
        if let Some(model) = self.model() {
            let mut model = model.clone();
            model.set_energy_range_log(binning.min(), binning.max())?;
            self.publish_model(model);
        }
        Ok(())
    }

    /// Only runs starting within `[mjd_min, mjd_max]` are active.
    pub fn set_time_range(&mut self, mjd_min: f64, mjd_max: f64) -> Result<(), FitError> {
        if !(mjd_min.is_finite() && mjd_max.is_finite() && mjd_min <= mjd_max) {
            return Err(FitError::configuration(format!(
                "Invalid MJD range [{mjd_min}, {mjd_max}]."
            )));
        }
        self.mjd_range = Some((mjd_min, mjd_max));
        Ok(())
    }

    pub fn clear_time_range(&mut self) {
        self.mjd_range = None;
    }

    // ---- active-run bookkeeping ----

    pub fn exclude_run(&mut self, run_number: u32) -> Result<(), FitError> {
        if !self.units.iter().any(|u| u.run_number() == run_number) {
            return Err(FitError::data(format!("Unknown run {run_number}.")));
        }
        self.excluded_runs.insert(run_number);
        Ok(())
    }

    pub fn include_run(&mut self, run_number: u32) -> Result<(), FitError> {
        if !self.units.iter().any(|u| u.run_number() == run_number) {
            return Err(FitError::data(format!("Unknown run {run_number}.")));
        }
        self.excluded_runs.remove(&run_number);
        Ok(())
    }

    /// Exclude runs starting strictly between `mjd_start` and `mjd_stop`.
    pub fn add_exclusion_date(&mut self, mjd_start: f64, mjd_stop: f64) -> Result<(), FitError> {
        if !(mjd_start.is_finite() && mjd_stop.is_finite() && mjd_start < mjd_stop) {
            return Err(FitError::configuration(format!(
                "Invalid exclusion window ({mjd_start}, {mjd_stop})."
            )));
        }
        self.excluded_dates.push((mjd_start, mjd_stop));
        Ok(())
    }

    pub fn is_active(&self, unit: &ObservationUnit) -> bool {
        let mjd = unit.mjd();
        if self.excluded_runs.contains(&unit.run_number()) {
            return false;
        }
        if let Some((lo, hi)) = self.mjd_range {
            if mjd < lo || mjd > hi {
                return false;
            }
        }
        !self.excluded_dates.iter().any(|&(start, stop)| mjd > start && mjd < stop)
    }

    /// Run numbers of the active runs, in insertion order.
    pub fn active_runs(&self) -> Vec<u32> {
        self.active_units().map(|u| u.run_number()).collect()
    }

    /// `(run number, active)` for every run.
    pub fn run_status(&self) -> Vec<(u32, bool)> {
        self.units.iter().map(|u| (u.run_number(), self.is_active(u))).collect()
    }

    pub fn active_units(&self) -> impl Iterator<Item = &ObservationUnit> + '_ {
        self.units.iter().filter(|u| self.is_active(u))
    }

    pub(crate) fn require_active_runs(&self) -> Result<(), FitError> {
        if self.active_units().next().is_none() {
            return Err(FitError::data("No active runs to fit."));
        }
        Ok(())
    }

    /// Live-time weighted mean alpha of the active runs.
    pub fn mean_alpha(&self) -> Option<f64> {
        let (sw, swa) = self
            .active_units()
            .fold((0.0, 0.0), |(sw, swa), u| (sw + u.live_time(), swa + u.live_time() * u.alpha()));
        (sw > 0.0).then(|| swa / sw)
    }

    // ---- likelihood ----

    /// Joint `−ln L` of the active runs for a free-parameter vector.
    pub fn neg_log_likelihood(&self, free: &[f64]) -> Result<f64, FitError> {
        let model = self.require_model()?;
        let full = model.expand_free(free)?;
        Ok(self.joint_cost(model, &full, Window::Fit))
    }

    /// Joint `−ln L` of the saturated model.
    pub fn neg_log_likelihood_null(&self) -> f64 {
        self.active_units().map(|u| u.neg_log_likelihood_null()).sum()
    }

    /// Bins in all active fit windows minus free parameters.
    pub fn ndf(&self) -> Result<usize, FitError> {
        let model = self.require_model()?;
        let bins: usize = self.active_units().map(|u| u.n_bins_in_window()).sum();
        bins.checked_sub(model.n_free()).ok_or_else(|| {
            FitError::numerical(format!(
                "{bins} bins in the fit windows but {} free parameters.",
                model.n_free()
            ))
        })
    }

    /// Σ `−ln L` over active runs for a full parameter vector.
    pub(crate) fn joint_cost(&self, model: &SpectralModel, full: &[f64], window: Window) -> f64 {
        let active: Vec<&ObservationUnit> = self.active_units().collect();
        let per_run: Vec<f64> = active
            .par_iter()
            .map(|u| u.neg_log_likelihood_in(model, full, window.bins_with(u, model, full)))
            .collect();
        per_run.iter().sum()
    }

    // ---- fitting ----

    /// Minimize the joint `−ln L` starting from the current parameters.
    ///
    /// The best-fit model is published to all units. Non-convergence and a
    /// singular Hessian are reported in `FitResult::status`.
    pub fn fit_energy_spectrum(&mut self) -> Result<FitResult, FitError> {
        self.require_active_runs()?;
        let model = self.require_model()?.clone();
        let free_indices = model.free_indices();
        if free_indices.is_empty() {
            return Err(FitError::configuration("All model parameters are fixed."));
        }

        let (outcome, covariance) = {
            let objective = |free: &[f64]| -> Result<f64, FitError> {
                let full = model.expand_free(free)?;
                Ok(self.joint_cost(&model, &full, Window::Fit))
            };
            let outcome = self
                .minimizer
                .minimize(&objective, &model.free_parameters(), &model.free_bounds())?;
            let covariance = estimate_covariance(&objective, &outcome.parameters);
            (outcome, covariance)
        };

        let full = model.expand_free(&outcome.parameters)?;
        let mut best = model.clone();
        best.set_parameters(&full)?;

        let status = match (outcome.status, &covariance) {
            (FitStatus::NotConverged, _) => FitStatus::NotConverged,
            (_, None) => FitStatus::DegenerateCovariance,
            _ => FitStatus::Converged,
        };
        if !status.is_ok() {
            warn!("joint fit finished with status {status:?} after {} iterations", outcome.iterations);
        }

        let mut errors = vec![0.0; full.len()];
        if let Some(cov) = &covariance {
            for (k, &i) in free_indices.iter().enumerate() {
                errors[i] = cov[(k, k)].sqrt();
            }
        }

        self.publish_model(best);
        let ndf = match self.ndf() {
            Ok(n) => n,
            Err(e) => {
                warn!("{e}");
                0
            }
        };

        let result = FitResult {
            model: model.kind(),
            parameter_names: model.parameter_names(),
            parameters: full,
            errors,
            free_indices,
            covariance: covariance.map(|c| {
                (0..c.nrows())
                    .map(|i| (0..c.ncols()).map(|j| c[(i, j)]).collect())
                    .collect()
            }),
            neg_log_likelihood: outcome.value,
            neg_log_likelihood_null: self.neg_log_likelihood_null(),
            ndf,
            status,
            iterations: outcome.iterations,
        };
        info!(
            "joint fit over {} runs: -lnL = {:.3}, ndf = {}, parameters = {:?}",
            self.active_runs().len(),
            result.neg_log_likelihood,
            result.ndf,
            result.parameters
        );
        self.last_fit = Some(result.clone());
        Ok(result)
    }

    /// Per-run likelihoods of the active runs at the last best fit.
    pub fn run_wise_fit_info(&self) -> Result<Vec<RunFitInfo>, FitError> {
        self.require_fit()?;
        let model = self.require_model()?;
        let n_free = model.n_free();
        let active: Vec<&ObservationUnit> = self.active_units().collect();
        let info: Vec<RunFitInfo> = active
            .par_iter()
            .map(|u| {
                let neg_log_likelihood = u.neg_log_likelihood_with(model, model.parameters());
                let neg_log_likelihood_null = u.neg_log_likelihood_null();
                let n_bins = u.n_bins_in_window();
                RunFitInfo {
                    run_number: u.run_number(),
                    mjd: u.mjd(),
                    neg_log_likelihood,
                    neg_log_likelihood_null,
                    deviance: 2.0 * (neg_log_likelihood - neg_log_likelihood_null),
                    n_bins,
                    ndf: n_bins.saturating_sub(n_free),
                }
            })
            .collect();
        for run in &info {
            debug!(
                "run {}: -lnL = {:.3}, -lnL0 = {:.3}, deviance = {:.3}, ndf = {}",
                run.run_number, run.neg_log_likelihood, run.neg_log_likelihood_null, run.deviance, run.ndf
            );
        }
        Ok(info)
    }

    pub fn last_fit(&self) -> Option<&FitResult> {
        self.last_fit.as_ref()
    }

    pub(crate) fn require_fit(&self) -> Result<&FitResult, FitError> {
        self.last_fit.as_ref().ok_or_else(|| {
            FitError::configuration("No fit result available; call fit_energy_spectrum first.")
        })
    }

    // ---- derived engines ----

    /// Copy of this engine holding only the active runs.
    pub fn from_active_runs(&self) -> Result<FitEngine, FitError> {
        let units: Vec<ObservationUnit> = self.active_units().cloned().collect();
        self.with_units(units)
    }

    /// Engine over `units` with this engine's configuration and model definition.
    pub(crate) fn with_units(&self, units: Vec<ObservationUnit>) -> Result<FitEngine, FitError> {
        let mut engine = FitEngine {
            config: self.config.clone(),
            binning: self.binning,
            energy_range: self.energy_range,
            threshold: self.threshold,
            last_count: self.last_count,
            mjd_range: None,
            model: None,
            units: Vec::with_capacity(units.len()),
            excluded_runs: BTreeSet::new(),
            excluded_dates: Vec::new(),
            minimizer: self.minimizer.clone(),
            last_fit: None,
        };
        for unit in units {
            engine.add_object(unit)?;
        }
        if let Some(model) = self.model() {
            engine.publish_model(model.clone());
        }
        Ok(engine)
    }

    /// Engine whose runs are Poisson-sampled copies of the active runs at the
    /// current model parameters.
    pub fn fake_runs<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<FitEngine, FitError> {
        let model = self.require_model()?;
        let units = self
            .active_units()
            .map(|u| u.fake_it(model, None, None, rng))
            .collect::<Result<Vec<_>, _>>()?;
        self.with_units(units)
    }
}

fn apply_threshold(unit: &mut ObservationUnit, setting: ThresholdSetting) {
    if let Err(e) = unit.set_threshold(setting) {
        warn!("run {}: no energy threshold applied: {e}", unit.run_number());
        unit.clear_energy_threshold();
    }
}

//! Likelihood of a single observation run.
//!
//! An `ObservationUnit` folds a spectral model through its run's response:
//!
//! ```text
//! S_i = Σ_j dN/dE(E_j) · A(E_j) · M[i][j] · 1e4 · T_live · ΔE_j
//! ```
//!
//! where `i` runs over reconstructed-energy bins, `j` over true-energy bins with
//! an acceptable energy bias, `E_j` is the spectrally weighted mean energy of bin
//! `j`, `A` the effective area in m² (1e4 converts to cm²) and `ΔE_j` the linear
//! bin width. The background is profiled out bin by bin in closed form.
//!
//! Likelihoods are returned as `−ln L`, the quantity the engine minimizes.

use std::ops::Range;
use std::sync::Arc;

use log::{debug, warn};
use rand::Rng;

use crate::domain::{LastCount, RunMetadata, ThresholdMethod, ThresholdSetting};
use crate::error::FitError;
use crate::math::{
    bin_neg_log_likelihood, bin_neg_log_likelihood_null, on_off_ts, profiled_background, sample_poisson,
    weighted_mean_log_energy,
};
use crate::models::SpectralModel;
use crate::response::{EnergyBinning, RawRunData, ResponseData};

/// Migration probabilities below this are ignored when folding.
pub const MIGRATION_CUTOFF: f64 = 1e-5;

/// m² → cm².
const AREA_TO_CM2: f64 = 1e4;

/// Default maximum energy bias of a true-energy bin used in folding.
pub const DEFAULT_MAX_ENERGY_BIAS: f64 = 0.15;

#[derive(Debug, Clone)]
pub struct ObservationUnit {
    response: ResponseData,
    model: Option<Arc<SpectralModel>>,
    /// Fit window in log10(E/TeV).
    energy_range: (f64, f64),
    threshold_setting: Option<ThresholdSetting>,
    /// Threshold in log10(E/TeV) derived from `threshold_setting`.
    threshold: Option<f64>,
    max_energy_bias: f64,
    last_count: Option<LastCount>,
}

impl ObservationUnit {
    /// Build a unit from raw run data rebinned onto `binning`.
    pub fn new(raw: RawRunData, binning: EnergyBinning) -> Result<Self, FitError> {
        Ok(Self::from_response(ResponseData::new(raw, binning)?))
    }

    pub fn from_response(response: ResponseData) -> Self {
        let binning = *response.binning();
        Self {
            response,
            model: None,
            energy_range: (binning.min(), binning.max()),
            threshold_setting: None,
            threshold: None,
            max_energy_bias: DEFAULT_MAX_ENERGY_BIAS,
            last_count: None,
        }
    }

    pub fn response(&self) -> &ResponseData {
        &self.response
    }

    pub fn metadata(&self) -> &RunMetadata {
        self.response.metadata()
    }

    pub fn run_number(&self) -> u32 {
        self.response.metadata().run_number
    }

    pub fn mjd(&self) -> f64 {
        self.response.metadata().mjd
    }

    pub fn alpha(&self) -> f64 {
        self.response.alpha()
    }

    pub fn live_time(&self) -> f64 {
        self.response.live_time()
    }

    pub fn binning(&self) -> &EnergyBinning {
        self.response.binning()
    }

    /// On and off counts with the epsilon floor.
    pub fn counts(&self) -> (&[f64], &[f64]) {
        self.response.counts()
    }

    /// Rebin the response. A configured threshold is re-derived on the new grid.
    pub fn set_binning(&mut self, binning: EnergyBinning) {
        self.response.set_binning(binning);
        if let Some(setting) = self.threshold_setting {
            if let Err(e) = self.set_threshold(setting) {
                warn!("run {}: threshold dropped after rebinning: {e}", self.run_number());
                self.threshold_setting = None;
                self.threshold = None;
            }
        }
    }

    /// Share `model` with this unit; it is only read.
    pub fn set_model(&mut self, model: Arc<SpectralModel>) {
        self.model = Some(model);
    }

    pub fn model(&self) -> Option<&Arc<SpectralModel>> {
        self.model.as_ref()
    }

    /// Set the fit window; `linear` takes TeV instead of log10(E/TeV).
    pub fn set_energy_range(&mut self, min: f64, max: f64, linear: bool) -> Result<(), FitError> {
        self.energy_range = to_log_range(min, max, linear)?;
        Ok(())
    }

    /// Fit window in log10(E/TeV), before the threshold is applied.
    pub fn energy_range(&self) -> (f64, f64) {
        self.energy_range
    }

    /// Determine and store the energy threshold, returned in log10(E/TeV).
    ///
    /// On error the previous threshold is kept.
    pub fn set_energy_threshold(&mut self, method: ThresholdMethod, value: f64, linear: bool) -> Result<f64, FitError> {
        self.set_threshold(ThresholdSetting { method, value, linear })
    }

    pub fn set_threshold(&mut self, setting: ThresholdSetting) -> Result<f64, FitError> {
        let threshold = match setting.method {
            ThresholdMethod::Fixed => fixed_threshold(setting.value, setting.linear)?,
            ThresholdMethod::EffectiveAreaFraction => self.area_fraction_threshold(setting.value)?,
            ThresholdMethod::EnergyBias => self.energy_bias_threshold(setting.value)?,
        };
        debug!(
            "run {}: energy threshold {:.3} TeV ({:?})",
            self.run_number(),
            10f64.powf(threshold),
            setting.method
        );
        self.threshold_setting = Some(setting);
        self.threshold = Some(threshold);
        Ok(threshold)
    }

    pub fn clear_energy_threshold(&mut self) {
        self.threshold_setting = None;
        self.threshold = None;
    }

    /// Threshold in log10(E/TeV), if one is set.
    pub fn energy_threshold(&self) -> Option<f64> {
        self.threshold
    }

    pub fn set_max_energy_bias(&mut self, max_bias: f64) -> Result<(), FitError> {
        if !(max_bias.is_finite() && max_bias > 0.0) {
            return Err(FitError::configuration(format!(
                "Maximum energy bias must be finite and > 0, got {max_bias}."
            )));
        }
        self.max_energy_bias = max_bias;
        Ok(())
    }

    pub fn max_energy_bias(&self) -> f64 {
        self.max_energy_bias
    }

    /// Stop the fit window before the last bin holding a count of `definition`.
    pub fn set_last_count(&mut self, definition: Option<LastCount>) {
        self.last_count = definition;
    }

    pub fn last_count(&self) -> Option<LastCount> {
        self.last_count
    }

    /// Bins whose centre lies in `[max(e_min, threshold), e_max]`.
    pub fn energy_window(&self) -> Range<usize> {
        let lo = match self.threshold {
            Some(t) => self.energy_range.0.max(t),
            None => self.energy_range.0,
        };
        let hi = self.energy_range.1;
        let tol = 1e-9;
        let centres = self.binning().centres();
        let start = centres.iter().position(|&c| c >= lo - tol).unwrap_or(centres.len());
        let end = centres.iter().rposition(|&c| c <= hi + tol).map_or(0, |i| i + 1);
        if start < end { start..end } else { start..start }
    }

    /// Energy window cut by the last-count definition, at the shared model's
    /// parameters. Without a model a `Model` definition cuts nothing.
    pub fn fit_window(&self) -> Range<usize> {
        match self.model.as_deref() {
            Some(model) => self.fit_window_with(model, model.parameters()),
            None => self.window_before(None),
        }
    }

    /// Fit window for an explicit full parameter vector.
    pub fn fit_window_with(&self, model: &SpectralModel, params: &[f64]) -> Range<usize> {
        if self.last_count == Some(LastCount::Model) {
            let excess = self.model_predicted_excess_with(model, params);
            self.window_before(Some(&excess))
        } else {
            self.window_before(None)
        }
    }

    fn window_before(&self, excess: Option<&[f64]>) -> Range<usize> {
        let window = self.energy_window();
        let (on, off) = self.counts();
        let last = match (self.last_count, excess) {
            (None, _) => return window,
            (Some(LastCount::On), _) => last_counted_bin(on),
            (Some(LastCount::Off), _) => last_counted_bin(off),
            (Some(LastCount::Model), Some(excess)) => last_counted_bin(excess),
            (Some(LastCount::Model), None) => return window,
        };
        window.start..window.end.min(last).max(window.start)
    }

    pub fn n_bins_in_window(&self) -> usize {
        self.fit_window().len()
    }

    /// Degrees of freedom: bins in window minus free model parameters.
    pub fn ndf(&self) -> Result<usize, FitError> {
        let model = self.require_model()?;
        let bins = self.n_bins_in_window();
        let free = model.n_free();
        bins.checked_sub(free).ok_or_else(|| {
            FitError::numerical(format!(
                "run {}: {bins} bins in the fit window but {free} free parameters.",
                self.run_number()
            ))
        })
    }

    /// Predicted signal counts per reconstructed bin for the shared model.
    pub fn model_predicted_excess(&self) -> Result<Vec<f64>, FitError> {
        let model = self.require_model()?;
        Ok(self.model_predicted_excess_with(model, model.parameters()))
    }

    /// Predicted signal counts for an explicit full parameter vector.
    pub fn model_predicted_excess_with(&self, model: &SpectralModel, params: &[f64]) -> Vec<f64> {
        let binning = self.binning();
        let n = binning.n_bins();
        let migration = self.response.migration();
        let bias = self.response.energy_bias();
        let area = self.response.effective_area();
        let gamma = model.spectral_index_with(params);
        let live_time = self.live_time();

        let mut excess = vec![0.0; n];
        for j in 0..n {
            if matches!(bias.get(j), Some(Some(b)) if *b > self.max_energy_bias) {
                continue;
            }
            let log_e = weighted_mean_log_energy(binning.lower_edge(j), binning.upper_edge(j), gamma);
            let exposure = area.evaluate(log_e) * AREA_TO_CM2 * live_time * binning.linear_width(j);
            let counts_true = model.evaluate_with(params, 10f64.powf(log_e)) * exposure;
            if !(counts_true > 0.0 && counts_true.is_finite()) {
                continue;
            }
            for (i, slot) in excess.iter_mut().enumerate() {
                let p = migration[(i, j)];
                if p >= MIGRATION_CUTOFF {
                    *slot += counts_true * p;
                }
            }
        }
        excess
    }

    /// Profiled background (off region) per bin for the shared model.
    pub fn model_predicted_off(&self) -> Result<Vec<f64>, FitError> {
        let model = self.require_model()?;
        Ok(self.model_predicted_off_with(model, model.parameters()))
    }

    pub fn model_predicted_off_with(&self, model: &SpectralModel, params: &[f64]) -> Vec<f64> {
        let excess = self.model_predicted_excess_with(model, params);
        self.profiled_off(&excess)
    }

    /// `−ln L` over the fit window for the shared model.
    pub fn neg_log_likelihood(&self) -> Result<f64, FitError> {
        let model = self.require_model()?;
        Ok(self.neg_log_likelihood_with(model, model.parameters()))
    }

    /// `−ln L` over the fit window for an explicit full parameter vector.
    pub fn neg_log_likelihood_with(&self, model: &SpectralModel, params: &[f64]) -> f64 {
        let excess = self.model_predicted_excess_with(model, params);
        let bins = self.window_before(Some(&excess));
        self.sum_neg_log_likelihood(&excess, bins)
    }

    /// `−ln L` summed over `bins` only.
    pub fn neg_log_likelihood_in(&self, model: &SpectralModel, params: &[f64], bins: Range<usize>) -> f64 {
        let excess = self.model_predicted_excess_with(model, params);
        self.sum_neg_log_likelihood(&excess, bins)
    }

    fn sum_neg_log_likelihood(&self, excess: &[f64], bins: Range<usize>) -> f64 {
        let (on, off) = self.counts();
        let alpha = self.alpha();
        bins.filter(|&i| i < on.len())
            .map(|i| {
                let b = profiled_background(on[i], off[i], alpha, excess[i]);
                bin_neg_log_likelihood(on[i], off[i], alpha, excess[i], b)
            })
            .sum()
    }

    /// `−ln L` of the saturated model over the fit window.
    pub fn neg_log_likelihood_null(&self) -> f64 {
        self.neg_log_likelihood_null_in(self.fit_window())
    }

    pub fn neg_log_likelihood_null_in(&self, bins: Range<usize>) -> f64 {
        let (on, off) = self.counts();
        bins.filter(|&i| i < on.len())
            .map(|i| bin_neg_log_likelihood_null(on[i], off[i]))
            .sum()
    }

    /// On/off test statistic of the counts summed over `bins`.
    pub fn ts_in(&self, bins: Range<usize>) -> f64 {
        let (on, off) = self.summed_counts(bins);
        on_off_ts(on, off, self.alpha())
    }

    /// Total on and off counts over `bins`.
    pub fn summed_counts(&self, bins: Range<usize>) -> (f64, f64) {
        let (on, off) = self.counts();
        bins.filter(|&i| i < on.len())
            .fold((0.0, 0.0), |(a, b), i| (a + on[i], b + off[i]))
    }

    /// Poisson-sampled copy at `model`'s current parameters.
    ///
    /// `on = Poisson(S) + α·Poisson(B)`, `off = Poisson(B)`; the response is kept.
    pub fn fake_it<R: Rng + ?Sized>(
        &self,
        model: &SpectralModel,
        run_number: Option<u32>,
        mjd: Option<f64>,
        rng: &mut R,
    ) -> Result<Self, FitError> {
        let params = model.parameters();
        let excess = self.model_predicted_excess_with(model, params);
        let background = self.profiled_off(&excess);
        let alpha = self.alpha();

        let mut on = Vec::with_capacity(excess.len());
        let mut off = Vec::with_capacity(excess.len());
        for (&s, &b) in excess.iter().zip(&background) {
            let b_sample = sample_poisson(rng, b);
            on.push(sample_poisson(rng, s) + alpha * sample_poisson(rng, b));
            off.push(b_sample);
        }

        let mut response = self.response.with_counts(on, off)?;
        if run_number.is_some() || mjd.is_some() {
            let mut meta = response.metadata().clone();
            if let Some(n) = run_number {
                meta.run_number = n;
            }
            if let Some(t) = mjd {
                meta.mjd = t;
            }
            response = response.with_metadata(meta)?;
        }

        let mut fake = self.clone();
        fake.response = response;
        Ok(fake)
    }

    fn profiled_off(&self, excess: &[f64]) -> Vec<f64> {
        let (on, off) = self.counts();
        let alpha = self.alpha();
        excess
            .iter()
            .enumerate()
            .map(|(i, &s)| profiled_background(on[i], off[i], alpha, s))
            .collect()
    }

    fn require_model(&self) -> Result<&SpectralModel, FitError> {
        self.model.as_deref().ok_or_else(|| {
            FitError::configuration(format!("run {}: no spectral model set.", self.run_number()))
        })
    }

    /// First bin whose effective area, normalized to its peak, exceeds `fraction`.
    fn area_fraction_threshold(&self, fraction: f64) -> Result<f64, FitError> {
        if !(fraction.is_finite() && fraction > 0.0 && fraction < 1.0) {
            return Err(FitError::configuration(format!(
                "Effective area fraction must lie in (0, 1), got {fraction}."
            )));
        }
        let binning = self.binning();
        let centres = binning.centres();
        let area: Vec<f64> = centres
            .iter()
            .map(|&c| self.response.effective_area().evaluate(c))
            .collect();
        let peak = area.iter().copied().fold(0.0, f64::max);
        if peak <= 0.0 {
            return Err(FitError::configuration(format!(
                "run {}: effective area is zero on the energy grid.",
                self.run_number()
            )));
        }
        let first = area.iter().position(|&a| a / peak > fraction).ok_or_else(|| {
            FitError::configuration(format!(
                "run {}: effective area never exceeds {fraction} of its peak.",
                self.run_number()
            ))
        })?;
        Ok(preceding_centre(binning, first))
    }

    /// First bin with a defined energy bias below `max_bias`.
    fn energy_bias_threshold(&self, max_bias: f64) -> Result<f64, FitError> {
        if !(max_bias.is_finite() && max_bias > 0.0) {
            return Err(FitError::configuration(format!(
                "Energy bias threshold must be finite and > 0, got {max_bias}."
            )));
        }
        let first = self
            .response
            .energy_bias()
            .iter()
            .position(|b| matches!(b, Some(v) if *v < max_bias))
            .ok_or_else(|| {
                FitError::configuration(format!(
                    "run {}: no energy bin with a bias below {max_bias}.",
                    self.run_number()
                ))
            })?;
        Ok(preceding_centre(self.binning(), first))
    }
}

/// Index of the last bin holding at least one count, or 0 if there is none.
fn last_counted_bin(values: &[f64]) -> usize {
    values.iter().rposition(|&v| v >= 1.0).unwrap_or(0)
}

/// Centre of the bin before `bin`, or the lower grid edge for the first bin.
fn preceding_centre(binning: &EnergyBinning, bin: usize) -> f64 {
    if bin == 0 {
        binning.min()
    } else {
        binning.centre(bin - 1)
    }
}

fn fixed_threshold(value: f64, linear: bool) -> Result<f64, FitError> {
    if linear {
        if !(value.is_finite() && value > 0.0) {
            return Err(FitError::configuration(format!(
                "Linear energy threshold must be finite and > 0 TeV, got {value}."
            )));
        }
        Ok(value.log10())
    } else if value.is_finite() {
        Ok(value)
    } else {
        Err(FitError::configuration("Energy threshold must be finite."))
    }
}

/// Convert an energy range to log10(E/TeV), validating it.
pub(crate) fn to_log_range(min: f64, max: f64, linear: bool) -> Result<(f64, f64), FitError> {
    let (lo, hi) = if linear {
        if !(min.is_finite() && max.is_finite() && min > 0.0 && max > 0.0) {
            return Err(FitError::configuration(format!(
                "Linear energy range [{min}, {max}] must be finite and > 0 TeV."
            )));
        }
        (min.log10(), max.log10())
    } else {
        (min, max)
    };
    if !(lo.is_finite() && hi.is_finite() && lo < hi) {
        return Err(FitError::configuration(format!(
            "Invalid energy range [{min}, {max}] (must be finite and min<max)."
        )));
    }
    Ok((lo, hi))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ModelKind;
    use crate::response::fixtures::{smeared_run, synthetic_run};
    use crate::response::{EffectiveArea, COUNT_FLOOR};
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn power_law_unit() -> (ObservationUnit, Arc<SpectralModel>) {
        let binning = EnergyBinning::new(0.5, -1.0, 0.0).unwrap();
        let mut unit = ObservationUnit::new(synthetic_run(1, &binning, vec![50.0, 30.0], vec![200.0, 120.0]), binning).unwrap();
        let model = Arc::new(SpectralModel::new(ModelKind::PowerLaw, 1.0).unwrap());
        unit.set_model(model.clone());
        (unit, model)
    }

    #[test]
    fn excess_follows_folding_formula_for_diagonal_response() {
        let (unit, model) = power_law_unit();
        let excess = unit.model_predicted_excess().unwrap();
        let b = unit.binning();
        for j in 0..2 {
            let log_e = weighted_mean_log_energy(b.lower_edge(j), b.upper_edge(j), -2.5);
            let expected = model.evaluate_log(log_e) * 1e5 * 1e4 * 1800.0 * b.linear_width(j);
            assert!(((excess[j] - expected) / expected).abs() < 1e-12);
        }
    }

    #[test]
    fn saturating_prediction_reproduces_null_likelihood() {
        let (template, model) = power_law_unit();
        let params = model.parameters().to_vec();
        let excess = template.model_predicted_excess_with(&model, &params);
        let alpha = template.alpha();
        let off = vec![200.0, 120.0];
        // Counts the model at `params` predicts exactly, background at Noff.
        let on: Vec<f64> = excess.iter().zip(&off).map(|(s, b)| s + alpha * b).collect();
        let binning = *template.binning();
        let mut unit = ObservationUnit::new(synthetic_run(1, &binning, on, off), binning).unwrap();
        unit.set_model(model.clone());

        let l = unit.neg_log_likelihood_with(&model, &params);
        assert!((l - unit.neg_log_likelihood_null()).abs() < 1e-6, "{l}");
        assert!((unit.neg_log_likelihood().unwrap() - l).abs() < 1e-12);

        let mut brighter = params.clone();
        brighter[0] *= 2.0;
        assert!(unit.neg_log_likelihood_with(&model, &brighter) > l + 1.0);
    }

    #[test]
    fn last_on_count_ends_the_window_before_that_bin() {
        let (mut unit, _) = power_law_unit();
        assert_eq!(unit.fit_window(), 0..2);
        unit.set_last_count(Some(LastCount::On));
        assert_eq!(unit.energy_window(), 0..2);
        assert_eq!(unit.fit_window(), 0..1);
        assert_eq!(unit.n_bins_in_window(), 1);
        unit.set_last_count(None);
        assert_eq!(unit.fit_window(), 0..2);
    }

    #[test]
    fn last_model_count_follows_the_evaluated_parameters() {
        let (mut unit, model) = power_law_unit();
        unit.set_last_count(Some(LastCount::Model));
        // About 33 and 5.5 predicted counts: the window stops before bin 1.
        assert_eq!(unit.fit_window(), 0..1);
        let faint = [1e-14, -2.5];
        assert!(unit.model_predicted_excess_with(&model, &faint).iter().all(|&s| s < 1.0));
        assert_eq!(unit.fit_window_with(&model, &faint), 0..0);
        assert_eq!(unit.neg_log_likelihood_with(&model, &faint), 0.0);
    }

    #[test]
    fn ndf_counts_window_bins_minus_free_parameters() {
        let (mut unit, _) = power_law_unit();
        assert_eq!(unit.ndf().unwrap(), 0);
        unit.set_energy_range(0.5, 1.0, true).unwrap();
        assert_eq!(unit.n_bins_in_window(), 1);
        let err = unit.ndf().unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Numerical);
    }

    #[test]
    fn setting_range_twice_keeps_counts_and_window() {
        let (mut unit, _) = power_law_unit();
        unit.set_energy_range(-1.0, 0.0, false).unwrap();
        let counts = unit.counts().0.to_vec();
        let window = unit.fit_window();
        unit.set_energy_range(-1.0, 0.0, false).unwrap();
        assert_eq!(unit.counts().0, counts.as_slice());
        assert_eq!(unit.fit_window(), window);
    }

    #[test]
    fn area_fraction_threshold_returns_preceding_centre() {
        let binning = EnergyBinning::new(0.2, -1.0, 1.0).unwrap();
        let mut raw = synthetic_run(1, &binning, vec![1.0; 10], vec![1.0; 10]);
        // Rising area: 0.1, 0.2, 0.3, 0.45 of peak, then 0.7 at bin 4, flat from bin 5.
        let centres = binning.centres();
        let frac = [0.1, 0.2, 0.3, 0.45, 0.7, 1.0, 1.0, 1.0, 1.0, 1.0];
        let area = frac.iter().map(|f| f * 1e5).collect();
        raw.effective_area = EffectiveArea::new(centres.clone(), area).unwrap();
        let mut unit = ObservationUnit::new(raw, binning).unwrap();
        let t = unit.set_energy_threshold(ThresholdMethod::EffectiveAreaFraction, 0.5, false).unwrap();
        assert_eq!(t, centres[3]);
        assert_eq!(unit.fit_window().start, 3);
    }

    #[test]
    fn invalid_threshold_leaves_state_unchanged() {
        let (mut unit, _) = power_law_unit();
        unit.set_energy_threshold(ThresholdMethod::Fixed, 0.3, true).unwrap();
        let before = unit.energy_threshold();
        assert!(unit.set_energy_threshold(ThresholdMethod::EffectiveAreaFraction, 1.5, false).is_err());
        assert!(unit.set_energy_threshold(ThresholdMethod::Fixed, -1.0, true).is_err());
        // Diagonal response: every bias is undefined, so no bin qualifies.
        assert!(unit.set_energy_threshold(ThresholdMethod::EnergyBias, 0.1, false).is_err());
        assert_eq!(unit.energy_threshold(), before);
    }

    #[test]
    fn bias_threshold_skips_undefined_bins() {
        let binning = EnergyBinning::new(0.1, -1.0, 1.0).unwrap();
        let mut unit = ObservationUnit::new(smeared_run(1, &binning, 10.0, 40.0, 0.2), binning).unwrap();
        let t = unit.set_energy_threshold(ThresholdMethod::EnergyBias, 0.5, false).unwrap();
        assert!(t >= binning.min() && t < binning.max());
    }

    #[test]
    fn fake_counts_average_to_prediction() {
        let (unit, model) = power_law_unit();
        let excess = unit.model_predicted_excess().unwrap();
        let mut rng = StdRng::seed_from_u64(42);
        let n = 2000;
        let alpha = unit.alpha();
        let mut mean_excess = vec![0.0; 2];
        for k in 0..n {
            let fake = unit.fake_it(&model, Some(1000 + k), None, &mut rng).unwrap();
            assert_eq!(fake.run_number(), 1000 + k);
            let predicted = fake.model_predicted_excess_with(&model, model.parameters());
            for i in 0..2 {
                assert!((predicted[i] - excess[i]).abs() < 1e-9 * excess[i].max(1.0));
                let (on, off) = fake.counts();
                mean_excess[i] += (on[i] - alpha * off[i] - (1.0 - alpha) * COUNT_FLOOR) / n as f64;
            }
        }
        for i in 0..2 {
            let tol = 0.1 * excess[i].max(1.0);
            assert!((mean_excess[i] - excess[i]).abs() < tol, "bin {i}: {} vs {}", mean_excess[i], excess[i]);
        }
    }

    #[test]
    fn missing_model_is_a_configuration_error() {
        let binning = EnergyBinning::new(0.5, -1.0, 0.0).unwrap();
        let unit = ObservationUnit::new(synthetic_run(1, &binning, vec![1.0, 1.0], vec![1.0, 1.0]), binning).unwrap();
        assert!(unit.neg_log_likelihood().is_err());
    }
}

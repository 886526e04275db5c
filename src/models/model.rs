//! Analytic spectral shapes.
//!
//! Every shape is a `ModelKind` with:
//! - a closed-form `dN/dE` evaluator taking an explicit parameter slice
//! - a parameter table (name, initial value, bounds)
//! - the index of the parameter acting as the spectral index
//!
//! `SpectralModel` bundles a kind with its current parameter values, the
//! fixed-parameter mask, the normalization energy and an optional EBL opacity.
//! Energies are TeV, fluxes cm⁻² s⁻¹ TeV⁻¹.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::FitError;
use crate::models::EblOpacity;

/// Initial normalization of every shape, cm⁻² s⁻¹ TeV⁻¹.
pub const DEFAULT_NORM: f64 = 1e-12;

/// Spectral shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    /// `N (E/E0)^Γ`
    PowerLaw,
    /// `N (E/E0)^Γ exp(−E/Ec)`
    ExponentialCutoff,
    /// `N (E/E0)^(Γ + β E)`
    CurvedPowerLaw,
    /// `N (E/E0)^(α + β ln(E/E0))`
    LogParabola,
    /// `N (E/E0)^(α + β ln(E/E0)) exp(−E/Ec)`
    LogParabolaCutoff,
    /// `N (E/E0)^Γ exp(−(E/Ec)^δ)`
    SuperExponentialCutoff,
    /// `N (E/Eb)^Γ1` below `Eb`, `N (E/Eb)^Γ2` above.
    BrokenPowerLaw,
}

/// Metadata of one model parameter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ParameterSpec {
    pub name: &'static str,
    pub initial: f64,
    pub lower: f64,
    pub upper: f64,
}

const fn spec(name: &'static str, initial: f64, lower: f64, upper: f64) -> ParameterSpec {
    ParameterSpec {
        name,
        initial,
        lower,
        upper,
    }
}

const NORM: ParameterSpec = spec("Norm", DEFAULT_NORM, 0.0, 1e-5);

impl ModelKind {
    pub const ALL: [ModelKind; 7] = [
        ModelKind::PowerLaw,
        ModelKind::ExponentialCutoff,
        ModelKind::CurvedPowerLaw,
        ModelKind::LogParabola,
        ModelKind::LogParabolaCutoff,
        ModelKind::SuperExponentialCutoff,
        ModelKind::BrokenPowerLaw,
    ];

    /// Numeric model id (0..=6) used by older analysis configurations.
    pub fn from_id(id: u8) -> Result<Self, FitError> {
        Self::ALL.get(id as usize).copied().ok_or_else(|| {
            FitError::configuration(format!("Unknown spectral model id {id} (expected 0..=6)."))
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            ModelKind::PowerLaw => "power law",
            ModelKind::ExponentialCutoff => "power law with exponential cut-off",
            ModelKind::CurvedPowerLaw => "curved power law",
            ModelKind::LogParabola => "log parabola",
            ModelKind::LogParabolaCutoff => "log parabola with exponential cut-off",
            ModelKind::SuperExponentialCutoff => "power law with super-exponential cut-off",
            ModelKind::BrokenPowerLaw => "broken power law",
        }
    }

    /// Parameter table. The break energy of the broken power law starts at `norm_energy`.
    pub fn parameter_specs(self, norm_energy: f64) -> Vec<ParameterSpec> {
        match self {
            ModelKind::PowerLaw => vec![NORM, spec("Index", -2.5, -10.0, 0.0)],
            ModelKind::ExponentialCutoff => vec![
                NORM,
                spec("Index", -1.5, -10.0, 0.0),
                spec("E_CutOff", 1.0, 1e-9, 100.0),
            ],
            ModelKind::CurvedPowerLaw => vec![
                NORM,
                spec("Index", -1.5, -10.0, 10.0),
                spec("Beta", -0.01, -10.0, 0.0),
            ],
            ModelKind::LogParabola => vec![
                NORM,
                spec("Alpha", -1.5, -10.0, 0.0),
                spec("Beta", -0.1, -10.0, 0.0),
            ],
            ModelKind::LogParabolaCutoff => vec![
                NORM,
                spec("Alpha", -1.5, -10.0, 0.0),
                spec("Beta", -0.1, -10.0, 0.0),
                spec("E_CutOff", 2.0, 0.0, 100.0),
            ],
            ModelKind::SuperExponentialCutoff => vec![
                NORM,
                spec("Index", -1.5, -10.0, 0.0),
                spec("E_CutOff", 1.0, 0.0, 100.0),
                spec("Delta", 1.0, -5.0, 5.0),
            ],
            ModelKind::BrokenPowerLaw => vec![
                NORM,
                spec("Index1", -1.5, -10.0, 0.0),
                spec("Index2", -2.0, -10.0, 0.0),
                spec("E_Break", norm_energy, norm_energy.min(1e-2), norm_energy.max(100.0)),
            ],
        }
    }

    pub fn n_parameters(self) -> usize {
        match self {
            ModelKind::PowerLaw => 2,
            ModelKind::ExponentialCutoff | ModelKind::CurvedPowerLaw | ModelKind::LogParabola => 3,
            _ => 4,
        }
    }

    /// Index of the normalization parameter.
    pub fn norm_parameter(self) -> usize {
        0
    }

    /// Index of the parameter used as spectral index for bin-weighted mean energies.
    pub fn index_parameter(self) -> usize {
        1
    }

    /// Intrinsic `dN/dE` at `e` (TeV) for parameters `p` and normalization energy `e0`.
    pub fn evaluate(self, p: &[f64], e0: f64, e: f64) -> f64 {
        let x = e / e0;
        match self {
            ModelKind::PowerLaw => p[0] * x.powf(p[1]),
            ModelKind::ExponentialCutoff => p[0] * x.powf(p[1]) * (-e / p[2]).exp(),
            ModelKind::CurvedPowerLaw => p[0] * x.powf(p[1] + p[2] * e),
            ModelKind::LogParabola => p[0] * x.powf(p[1] + p[2] * x.ln()),
            ModelKind::LogParabolaCutoff => {
                p[0] * x.powf(p[1] + p[2] * x.ln()) * (-e / p[3]).exp()
            }
            ModelKind::SuperExponentialCutoff => {
                p[0] * x.powf(p[1]) * (-(e / p[2]).powf(p[3])).exp()
            }
            ModelKind::BrokenPowerLaw => {
                let eb = p[3];
                let index = if e < eb { p[1] } else { p[2] };
                p[0] * (e / eb).powf(index)
            }
        }
    }
}

/// A spectral shape with parameter values and fit bookkeeping.
#[derive(Debug, Clone)]
pub struct SpectralModel {
    kind: ModelKind,
    norm_energy: f64,
    specs: Vec<ParameterSpec>,
    params: Vec<f64>,
    fixed: Vec<bool>,
    log_range: (f64, f64),
    ebl: Option<Arc<dyn EblOpacity>>,
}

impl SpectralModel {
    /// Build `kind` with its initial parameters. `norm_energy` is in TeV.
    pub fn new(kind: ModelKind, norm_energy: f64) -> Result<Self, FitError> {
        if !(norm_energy.is_finite() && norm_energy > 0.0) {
            return Err(FitError::configuration(format!(
                "Normalization energy must be finite and > 0 TeV, got {norm_energy}."
            )));
        }
        let specs = kind.parameter_specs(norm_energy);
        let params = specs.iter().map(|s| s.initial).collect();
        let fixed = vec![false; specs.len()];
        Ok(Self {
            kind,
            norm_energy,
            specs,
            params,
            fixed,
            log_range: (-2.0, 3.0),
            ebl: None,
        })
    }

    /// Attenuate the shape by `exp(−τ(E))`.
    pub fn with_ebl(mut self, opacity: Arc<dyn EblOpacity>) -> Self {
        self.ebl = Some(opacity);
        self
    }

    pub fn kind(&self) -> ModelKind {
        self.kind
    }

    pub fn norm_energy(&self) -> f64 {
        self.norm_energy
    }

    pub fn has_ebl(&self) -> bool {
        self.ebl.is_some()
    }

    pub fn parameter_specs(&self) -> &[ParameterSpec] {
        &self.specs
    }

    pub fn parameter_names(&self) -> Vec<String> {
        self.specs.iter().map(|s| s.name.to_string()).collect()
    }

    pub fn parameters(&self) -> &[f64] {
        &self.params
    }

    pub fn n_parameters(&self) -> usize {
        self.params.len()
    }

    /// Replace the full parameter vector.
    pub fn set_parameters(&mut self, params: &[f64]) -> Result<(), FitError> {
        if params.len() != self.params.len() {
            return Err(FitError::configuration(format!(
                "{} expects {} parameters, got {}.",
                self.kind.name(),
                self.params.len(),
                params.len()
            )));
        }
        if let Some(bad) = params.iter().position(|v| !v.is_finite()) {
            return Err(FitError::configuration(format!(
                "Parameter {} is not finite.",
                self.specs[bad].name
            )));
        }
        self.params.copy_from_slice(params);
        Ok(())
    }

    pub fn set_parameter(&mut self, index: usize, value: f64) -> Result<(), FitError> {
        self.check_index(index)?;
        if !value.is_finite() {
            return Err(FitError::configuration(format!(
                "Parameter {} must be finite, got {value}.",
                self.specs[index].name
            )));
        }
        self.params[index] = value;
        Ok(())
    }

    /// Hold parameter `index` at its current value (or `value`) during fits.
    pub fn fix_parameter(&mut self, index: usize, value: Option<f64>) -> Result<(), FitError> {
        if let Some(v) = value {
            self.set_parameter(index, v)?;
        }
        self.check_index(index)?;
        self.fixed[index] = true;
        Ok(())
    }

    pub fn release_parameter(&mut self, index: usize) -> Result<(), FitError> {
        self.check_index(index)?;
        self.fixed[index] = false;
        Ok(())
    }

    pub fn is_fixed(&self, index: usize) -> bool {
        self.fixed.get(index).copied().unwrap_or(false)
    }

    pub fn free_indices(&self) -> Vec<usize> {
        (0..self.params.len()).filter(|&i| !self.fixed[i]).collect()
    }

    pub fn n_free(&self) -> usize {
        self.fixed.iter().filter(|f| !**f).count()
    }

    pub fn free_parameters(&self) -> Vec<f64> {
        self.free_indices().into_iter().map(|i| self.params[i]).collect()
    }

    /// `(lower, upper)` of every free parameter.
    pub fn free_bounds(&self) -> Vec<(f64, f64)> {
        self.free_indices()
            .into_iter()
            .map(|i| (self.specs[i].lower, self.specs[i].upper))
            .collect()
    }

    /// Merge free-parameter values into a copy of the full parameter vector.
    pub fn expand_free(&self, free: &[f64]) -> Result<Vec<f64>, FitError> {
        let n_free = self.n_free();
        if free.len() != n_free {
            return Err(FitError::configuration(format!(
                "Parameter vector has length {} but the model has {n_free} free parameters.",
                free.len()
            )));
        }
        let mut full = self.params.clone();
        for (slot, &v) in self.free_indices().into_iter().zip(free) {
            full[slot] = v;
        }
        Ok(full)
    }

    /// Valid energy range in log10(E/TeV).
    pub fn energy_range_log(&self) -> (f64, f64) {
        self.log_range
    }

    /// Valid energy range in TeV.
    pub fn energy_range_linear(&self) -> (f64, f64) {
        (10f64.powf(self.log_range.0), 10f64.powf(self.log_range.1))
    }

    pub fn set_energy_range_log(&mut self, min: f64, max: f64) -> Result<(), FitError> {
        if !(min.is_finite() && max.is_finite() && min < max) {
            return Err(FitError::configuration(format!(
                "Invalid model energy range [{min}, {max}]."
            )));
        }
        self.log_range = (min, max);
        Ok(())
    }

    /// Spectral index used to weight mean bin energies.
    pub fn spectral_index_with(&self, params: &[f64]) -> f64 {
        params
            .get(self.kind.index_parameter())
            .copied()
            .unwrap_or(-2.0)
    }

    /// Intrinsic (unabsorbed) `dN/dE` at `e` TeV for the full parameter vector `params`.
    pub fn evaluate_intrinsic_with(&self, params: &[f64], e: f64) -> f64 {
        let v = self.kind.evaluate(params, self.norm_energy, e);
        if v.is_finite() { v } else { 0.0 }
    }

    /// Observed `dN/dE` (EBL-attenuated when configured). Zero outside the valid range.
    pub fn evaluate_with(&self, params: &[f64], e: f64) -> f64 {
        if !(e > 0.0) {
            return 0.0;
        }
        let log_e = e.log10();
        if log_e < self.log_range.0 || log_e > self.log_range.1 {
            return 0.0;
        }
        let intrinsic = self.evaluate_intrinsic_with(params, e);
        match &self.ebl {
            Some(ebl) => intrinsic * (-ebl.optical_depth(e)).exp(),
            None => intrinsic,
        }
    }

    /// Observed `dN/dE` at the current parameters.
    pub fn evaluate(&self, e: f64) -> f64 {
        self.evaluate_with(&self.params, e)
    }

    /// Observed `dN/dE` at `10^log_e` TeV.
    pub fn evaluate_log(&self, log_e: f64) -> f64 {
        self.evaluate(10f64.powf(log_e))
    }

    pub fn evaluate_intrinsic(&self, e: f64) -> f64 {
        self.evaluate_intrinsic_with(&self.params, e)
    }

    fn check_index(&self, index: usize) -> Result<(), FitError> {
        if index >= self.params.len() {
            return Err(FitError::configuration(format!(
                "Parameter index {index} out of range for {} ({} parameters).",
                self.kind.name(),
                self.params.len()
            )));
        }
        Ok(())
    }
}

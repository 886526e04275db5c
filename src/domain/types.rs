//! Shared domain types.
//!
//! These types are kept lightweight and serializable so they can be:
//!
//! - passed between the observation units and the fit engine
//! - exported to JSON reports
//! - loaded from a JSON configuration file (`FitConfig`)

use serde::{Deserialize, Serialize};

use crate::error::FitError;
use crate::models::ModelKind;

/// Per-run bookkeeping delivered by the data provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMetadata {
    pub run_number: u32,
    /// Modified Julian Date of the run start.
    pub mjd: f64,
    /// Wall-clock duration in seconds.
    pub duration: f64,
    /// Fraction of `duration` lost to dead time, in `[0, 1)`.
    pub dead_time_fraction: f64,
    /// Mean pointing elevation in degrees.
    pub elevation: f64,
    /// Mean pointing azimuth in degrees.
    pub azimuth: f64,
}

impl RunMetadata {
    /// Live time in seconds: `duration × (1 − dead time fraction)`.
    pub fn live_time(&self) -> f64 {
        self.duration * (1.0 - self.dead_time_fraction)
    }
}

/// How a run's low-energy threshold is determined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdMethod {
    /// Fixed absolute energy.
    Fixed,
    /// First bin whose effective area exceeds a fraction of the peak.
    EffectiveAreaFraction,
    /// First bin whose energy bias drops below a value.
    EnergyBias,
}

impl ThresholdMethod {
    /// Map the numeric method codes (0, 1, 2) onto the enum.
    pub fn from_code(code: u8) -> Result<Self, FitError> {
        match code {
            0 => Ok(ThresholdMethod::Fixed),
            1 => Ok(ThresholdMethod::EffectiveAreaFraction),
            2 => Ok(ThresholdMethod::EnergyBias),
            other => Err(FitError::configuration(format!(
                "Unknown energy threshold method {other} (expected 0, 1 or 2)."
            ))),
        }
    }
}

/// Threshold configuration broadcast by the engine to every unit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdSetting {
    pub method: ThresholdMethod,
    pub value: f64,
    /// Interpret a `Fixed` value as TeV instead of log10(E/TeV).
    #[serde(default)]
    pub linear: bool,
}

impl ThresholdSetting {
    /// Range checks that do not depend on a run's response.
    pub fn validate(&self) -> Result<(), FitError> {
        let v = self.value;
        let ok = match self.method {
            ThresholdMethod::Fixed => v.is_finite() && (!self.linear || v > 0.0),
            ThresholdMethod::EffectiveAreaFraction => v.is_finite() && v > 0.0 && v < 1.0,
            ThresholdMethod::EnergyBias => v.is_finite() && v > 0.0,
        };
        if ok {
            Ok(())
        } else {
            Err(FitError::configuration(format!(
                "Invalid value {v} for energy threshold method {:?}.",
                self.method
            )))
        }
    }
}

impl Default for ThresholdSetting {
    fn default() -> Self {
        Self {
            method: ThresholdMethod::EffectiveAreaFraction,
            value: 0.15,
            linear: false,
        }
    }
}

/// Which counts end a run's fit window: it stops before the last energy bin
/// holding at least one count of this kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LastCount {
    On,
    Off,
    /// Predicted excess of the model being evaluated.
    Model,
}

impl std::str::FromStr for LastCount {
    type Err = FitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "on" => Ok(LastCount::On),
            "off" => Ok(LastCount::Off),
            "model" => Ok(LastCount::Model),
            other => Err(FitError::configuration(format!(
                "Unknown last-count definition '{other}' (expected 'on', 'off' or 'model')."
            ))),
        }
    }
}

/// Fit configuration.
///
/// All energies are log10(E/TeV) unless a field says otherwise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FitConfig {
    pub bin_width: f64,
    pub binning_min: f64,
    pub binning_max: f64,
    pub energy_min: f64,
    pub energy_max: f64,
    pub threshold: Option<ThresholdSetting>,
    /// Maximum energy bias of a true-energy bin accepted when folding.
    pub max_energy_bias: f64,
    /// Truncate every fit window at the last counted bin.
    pub last_count: Option<LastCount>,
    pub max_iterations: u64,
    /// Standard-deviation tolerance of the simplex cost values.
    pub tolerance: f64,
    /// Bins with a test statistic below this become upper limits.
    pub spectral_point_ts_threshold: f64,
    /// Δ(−2 ln L) defining a 95% one-sided upper limit.
    pub upper_limit_delta: f64,
    pub band_points: usize,
    /// Upper limit on the number of light-curve bins.
    pub max_time_bins: usize,
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            bin_width: 0.2,
            binning_min: -1.5,
            binning_max: 2.1,
            energy_min: -1.0,
            energy_max: 2.0,
            threshold: Some(ThresholdSetting::default()),
            max_energy_bias: 0.15,
            last_count: None,
            max_iterations: 2000,
            tolerance: 1e-10,
            spectral_point_ts_threshold: 4.0,
            upper_limit_delta: 2.71,
            band_points: 100,
            max_time_bins: 10_000,
        }
    }
}

/// Outcome of a minimization, carried inside results instead of being raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FitStatus {
    Converged,
    /// The iteration budget ran out before the tolerance was reached.
    NotConverged,
    /// The minimum was found but the Hessian could not be inverted.
    DegenerateCovariance,
}

impl FitStatus {
    pub fn is_ok(self) -> bool {
        matches!(self, FitStatus::Converged)
    }
}

/// Result of a joint spectral fit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitResult {
    pub model: ModelKind,
    pub parameter_names: Vec<String>,
    /// Full parameter vector (fixed parameters included).
    pub parameters: Vec<f64>,
    /// 1σ errors from the covariance diagonal; zero for fixed parameters.
    pub errors: Vec<f64>,
    /// Indices into `parameters` of the free parameters, in covariance order.
    pub free_indices: Vec<usize>,
    /// Covariance of the free parameters.
    pub covariance: Option<Vec<Vec<f64>>>,
    /// −ln L at the best fit.
    pub neg_log_likelihood: f64,
    /// −ln L of the saturated model over the same window.
    pub neg_log_likelihood_null: f64,
    pub ndf: usize,
    pub status: FitStatus,
    pub iterations: u64,
}

impl FitResult {
    /// Likelihood-ratio goodness of fit `2 (−ln L − (−ln L0))` per degree of freedom.
    pub fn reduced_deviance(&self) -> f64 {
        let dev = 2.0 * (self.neg_log_likelihood - self.neg_log_likelihood_null);
        if self.ndf == 0 { f64::NAN } else { dev / self.ndf as f64 }
    }
}

/// Goodness of fit of one run at the joint best fit.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RunFitInfo {
    pub run_number: u32,
    pub mjd: f64,
    pub neg_log_likelihood: f64,
    pub neg_log_likelihood_null: f64,
    /// `2 (−ln L − (−ln L0))`.
    pub deviance: f64,
    pub n_bins: usize,
    /// `n_bins` minus free parameters, floored at zero.
    pub ndf: usize,
}

impl RunFitInfo {
    pub fn reduced_deviance(&self) -> f64 {
        if self.ndf == 0 { f64::NAN } else { self.deviance / self.ndf as f64 }
    }
}

/// Points `(x, y)` where the profiled Δ(−2 ln L) of parameters `x_index`
/// and `y_index` equals `level`, ordered by angle around the best fit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LikelihoodContour {
    pub x_index: usize,
    pub y_index: usize,
    pub level: f64,
    pub best: (f64, f64),
    pub points: Vec<(f64, f64)>,
}

/// One binned flux point.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpectralPoint {
    /// Bin centre, TeV.
    pub energy: f64,
    pub energy_min: f64,
    pub energy_max: f64,
    /// dN/dE at `energy` in cm⁻² s⁻¹ TeV⁻¹; the 95% limit when `is_upper_limit`.
    pub flux: f64,
    pub flux_err_low: f64,
    pub flux_err_high: f64,
    /// On/off test statistic of the summed bin counts.
    pub ts: f64,
    pub is_upper_limit: bool,
    /// −ln L of the normalization-only fit in this bin.
    pub neg_log_likelihood: f64,
    pub status: FitStatus,
}

/// One step of a profile-likelihood scan.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ProfilePoint {
    pub value: f64,
    /// Δ(−2 ln L) relative to the global best fit.
    pub delta_two_log_l: f64,
    pub status: FitStatus,
}

/// Asymmetric likelihood-ratio interval for one parameter.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ParameterInterval {
    pub best: f64,
    pub lower: f64,
    pub upper: f64,
}

/// One point of the 1σ butterfly around the best-fit spectrum.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BandPoint {
    /// TeV.
    pub energy: f64,
    pub flux: f64,
    pub flux_err: f64,
}

/// Integrated photon flux with propagated error, cm⁻² s⁻¹.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct IntegralFlux {
    pub e_min: f64,
    pub e_max: f64,
    pub flux: f64,
    pub flux_err: f64,
}

/// Time binning used for light curves and variability.
#[derive(Debug, Clone, PartialEq)]
pub enum TimeBinning {
    /// Uniform bins of the given width (days) over the active runs.
    Width(f64),
    /// Explicit MJD bin edges.
    Edges(Vec<f64>),
}

/// Flux of one time bin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LightCurvePoint {
    pub mjd: f64,
    pub mjd_half_width: f64,
    pub n_runs: usize,
    pub flux: f64,
    pub flux_err: f64,
    pub ts: f64,
    pub neg_log_likelihood: f64,
}

/// Likelihood-ratio variability test.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariabilityResult {
    /// `2 (Σ ln L_independent − Σ ln L_joint)`.
    pub index: f64,
    /// Σ −ln L with an independent normalization per time bin.
    pub neg_log_likelihood_independent: f64,
    /// Σ −ln L with the joint best fit in every bin.
    pub neg_log_likelihood_joint: f64,
    /// Degrees of freedom of the test: number of non-empty bins − 1.
    pub ndf: usize,
    pub light_curve: Vec<LightCurvePoint>,
}

//! Extragalactic background light absorption.

use crate::error::FitError;
use crate::math::interpolate_linear;

/// Optical depth of the extragalactic background light for a fixed source redshift.
pub trait EblOpacity: Send + Sync + std::fmt::Debug {
    /// Optical depth `τ(E)` at `e` TeV.
    fn optical_depth(&self, e: f64) -> f64;
}

/// `τ` tabulated against log10(E/TeV), linearly interpolated.
///
/// Outside the table the nearest tabulated value is used.
#[derive(Debug, Clone)]
pub struct TabulatedOpacity {
    log_energy: Vec<f64>,
    tau: Vec<f64>,
}

impl TabulatedOpacity {
    pub fn new(log_energy: Vec<f64>, tau: Vec<f64>) -> Result<Self, FitError> {
        if log_energy.is_empty() || log_energy.len() != tau.len() {
            return Err(FitError::data(format!(
                "Opacity table needs matching, non-empty columns (got {} energies, {} depths).",
                log_energy.len(),
                tau.len()
            )));
        }
        if log_energy.windows(2).any(|w| !(w[1] > w[0])) {
            return Err(FitError::data("Opacity table energies must be strictly increasing."));
        }
        if tau.iter().any(|t| !(t.is_finite() && *t >= 0.0)) {
            return Err(FitError::data("Opacity table depths must be finite and >= 0."));
        }
        Ok(Self { log_energy, tau })
    }
}

impl EblOpacity for TabulatedOpacity {
    fn optical_depth(&self, e: f64) -> f64 {
        if !(e > 0.0) {
            return 0.0;
        }
        let x = e.log10();
        let n = self.log_energy.len();
        if x <= self.log_energy[0] {
            return self.tau[0];
        }
        if x >= self.log_energy[n - 1] {
            return self.tau[n - 1];
        }
        interpolate_linear(&self.log_energy, &self.tau, x).unwrap_or(0.0)
    }
}

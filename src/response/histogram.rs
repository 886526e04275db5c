//! Raw per-run histograms and instrument response curves, and their rebinning
//! onto an [`EnergyBinning`].
//!
//! All energy axes are log10(E/TeV). Rebinning assigns each raw bin (or matrix
//! cell) to the target bin containing its centre.

use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

use crate::error::FitError;
use crate::math::interpolate_linear;
use crate::response::EnergyBinning;

/// A 1-D count histogram with explicit bin edges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Histogram1D {
    edges: Vec<f64>,
    contents: Vec<f64>,
}

impl Histogram1D {
    pub fn new(edges: Vec<f64>, contents: Vec<f64>) -> Result<Self, FitError> {
        validate_edges(&edges, "histogram")?;
        if contents.len() + 1 != edges.len() {
            return Err(FitError::data(format!(
                "Histogram has {} edges but {} bins.",
                edges.len(),
                contents.len()
            )));
        }
        if contents.iter().any(|c| !c.is_finite() || *c < 0.0) {
            return Err(FitError::data("Histogram contents must be finite and >= 0."));
        }
        Ok(Self { edges, contents })
    }

    /// Histogram on the edges of `binning`.
    pub fn on_binning(binning: &EnergyBinning, contents: Vec<f64>) -> Result<Self, FitError> {
        Self::new(binning.edges(), contents)
    }

    pub fn edges(&self) -> &[f64] {
        &self.edges
    }

    pub fn contents(&self) -> &[f64] {
        &self.contents
    }

    pub fn total(&self) -> f64 {
        self.contents.iter().sum()
    }

    pub fn centres(&self) -> impl Iterator<Item = f64> + '_ {
        self.edges.windows(2).map(|w| 0.5 * (w[0] + w[1]))
    }

    /// Sum raw bins into the bins of `binning` by raw bin centre.
    pub fn rebin(&self, binning: &EnergyBinning) -> Vec<f64> {
        let mut out = vec![0.0; binning.n_bins()];
        for (centre, &c) in self.centres().zip(&self.contents) {
            if let Some(i) = binning.bin_index(centre) {
                out[i] += c;
            }
        }
        out
    }
}

/// Energy migration matrix: rows are reconstructed energy, columns true energy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationMatrix {
    reco_edges: Vec<f64>,
    true_edges: Vec<f64>,
    /// `values[reco][true]`
    values: Vec<Vec<f64>>,
}

impl MigrationMatrix {
    pub fn new(reco_edges: Vec<f64>, true_edges: Vec<f64>, values: Vec<Vec<f64>>) -> Result<Self, FitError> {
        validate_edges(&reco_edges, "migration matrix (reconstructed axis)")?;
        validate_edges(&true_edges, "migration matrix (true axis)")?;
        let n_reco = reco_edges.len() - 1;
        let n_true = true_edges.len() - 1;
        if values.len() != n_reco || values.iter().any(|row| row.len() != n_true) {
            return Err(FitError::data(format!(
                "Migration matrix must be {n_reco} x {n_true} to match its axes."
            )));
        }
        if values.iter().flatten().any(|v| !v.is_finite() || *v < 0.0) {
            return Err(FitError::data("Migration matrix entries must be finite and >= 0."));
        }
        if values.iter().flatten().all(|v| *v == 0.0) {
            return Err(FitError::data("Migration matrix is empty."));
        }
        Ok(Self {
            reco_edges,
            true_edges,
            values,
        })
    }

    /// Diagonal matrix on `binning` (perfect energy reconstruction).
    pub fn diagonal(binning: &EnergyBinning) -> Result<Self, FitError> {
        let n = binning.n_bins();
        let values = (0..n)
            .map(|i| (0..n).map(|j| if i == j { 1.0 } else { 0.0 }).collect())
            .collect();
        Self::new(binning.edges(), binning.edges(), values)
    }

    pub fn reco_edges(&self) -> &[f64] {
        &self.reco_edges
    }

    pub fn true_edges(&self) -> &[f64] {
        &self.true_edges
    }

    pub fn values(&self) -> &[Vec<f64>] {
        &self.values
    }

    /// Rebin onto `binning` on both axes and normalize every true-energy column
    /// to unit probability over reconstructed energy. Empty columns stay zero.
    pub fn rebin_normalized(&self, binning: &EnergyBinning) -> DMatrix<f64> {
        let n = binning.n_bins();
        let mut m = DMatrix::<f64>::zeros(n, n);
        let reco_bins: Vec<Option<usize>> = self
            .reco_edges
            .windows(2)
            .map(|w| binning.bin_index(0.5 * (w[0] + w[1])))
            .collect();
        let true_bins: Vec<Option<usize>> = self
            .true_edges
            .windows(2)
            .map(|w| binning.bin_index(0.5 * (w[0] + w[1])))
            .collect();

        for (row, reco) in self.values.iter().zip(&reco_bins) {
            let Some(i) = reco else { continue };
            for (&v, tru) in row.iter().zip(&true_bins) {
                if let Some(j) = tru {
                    m[(*i, *j)] += v;
                }
            }
        }

        for j in 0..n {
            let sum: f64 = m.column(j).sum();
            if sum > 0.0 {
                m.column_mut(j).scale_mut(1.0 / sum);
            }
        }
        m
    }
}

/// Effective area in m² sampled against log10(E/TeV).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectiveArea {
    log_energy: Vec<f64>,
    area: Vec<f64>,
    /// Optional asymmetric 1σ errors `(low, high)` at the sample points.
    errors: Option<(Vec<f64>, Vec<f64>)>,
}

impl EffectiveArea {
    pub fn new(log_energy: Vec<f64>, area: Vec<f64>) -> Result<Self, FitError> {
        if log_energy.is_empty() || log_energy.len() != area.len() {
            return Err(FitError::data(format!(
                "Effective area needs matching, non-empty columns (got {} energies, {} areas).",
                log_energy.len(),
                area.len()
            )));
        }
        if log_energy.windows(2).any(|w| !(w[1] > w[0])) {
            return Err(FitError::data("Effective area energies must be strictly increasing."));
        }
        if area.iter().any(|a| !a.is_finite() || *a < 0.0) {
            return Err(FitError::data("Effective area values must be finite and >= 0."));
        }
        if area.iter().all(|a| *a == 0.0) {
            return Err(FitError::data("Effective area is zero everywhere."));
        }
        Ok(Self {
            log_energy,
            area,
            errors: None,
        })
    }

    pub fn with_errors(mut self, low: Vec<f64>, high: Vec<f64>) -> Result<Self, FitError> {
        if low.len() != self.area.len() || high.len() != self.area.len() {
            return Err(FitError::data("Effective area errors must match the area samples."));
        }
        self.errors = Some((low, high));
        Ok(self)
    }

    pub fn log_energy(&self) -> &[f64] {
        &self.log_energy
    }

    pub fn area(&self) -> &[f64] {
        &self.area
    }

    pub fn errors(&self) -> Option<(&[f64], &[f64])> {
        self.errors.as_ref().map(|(l, h)| (l.as_slice(), h.as_slice()))
    }

    /// Area in m² at log10(E/TeV) `log_e`; zero outside the sampled range.
    pub fn evaluate(&self, log_e: f64) -> f64 {
        interpolate_linear(&self.log_energy, &self.area, log_e)
            .unwrap_or(0.0)
            .max(0.0)
    }
}

fn validate_edges(edges: &[f64], what: &str) -> Result<(), FitError> {
    if edges.len() < 2 {
        return Err(FitError::data(format!("{what} needs at least one bin.")));
    }
    if edges.iter().any(|e| !e.is_finite()) || edges.windows(2).any(|w| !(w[1] > w[0])) {
        return Err(FitError::data(format!("{what} edges must be finite and increasing.")));
    }
    Ok(())
}

//! Uniform log10(E/TeV) energy grid shared by every run of a fit.

use log::warn;
use serde::{Deserialize, Serialize};

use crate::error::FitError;

/// Tolerance used when counting bins and assigning values on bin edges.
const EDGE_TOLERANCE: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EnergyBinning {
    width: f64,
    min: f64,
    max: f64,
}

impl EnergyBinning {
    /// `width`, `min` and `max` are in log10(E/TeV).
    ///
    /// A span that is not a whole number of bins is cut back to the last full
    /// bin; `max()` reports the upper edge actually used.
    pub fn new(width: f64, min: f64, max: f64) -> Result<Self, FitError> {
        if !(width.is_finite() && width > 0.0) {
            return Err(FitError::configuration(format!(
                "Energy bin width must be finite and > 0, got {width}."
            )));
        }
        if !(min.is_finite() && max.is_finite() && min < max) {
            return Err(FitError::configuration(format!(
                "Invalid energy binning range [{min}, {max}] (must be finite and min<max)."
            )));
        }
        if (max - min) / width + EDGE_TOLERANCE < 1.0 {
            return Err(FitError::configuration(format!(
                "Energy binning [{min}, {max}] is narrower than one bin of width {width}."
            )));
        }
        let n = ((max - min) / width + EDGE_TOLERANCE).floor();
        let edge = min + width * n;
        if max - edge > EDGE_TOLERANCE * width {
            warn!("energy binning [{min}, {max}] is not a whole number of {width} bins; upper edge set to {edge}");
            return Ok(Self { width, min, max: edge });
        }
        Ok(Self { width, min, max })
    }

    pub fn width(&self) -> f64 {
        self.width
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }

    pub fn n_bins(&self) -> usize {
        ((self.max - self.min) / self.width + EDGE_TOLERANCE).floor() as usize
    }

    /// `n_bins + 1` bin edges.
    pub fn edges(&self) -> Vec<f64> {
        (0..=self.n_bins())
            .map(|i| self.min + self.width * i as f64)
            .collect()
    }

    pub fn centres(&self) -> Vec<f64> {
        (0..self.n_bins())
            .map(|i| self.min + self.width * (i as f64 + 0.5))
            .collect()
    }

    pub fn lower_edge(&self, bin: usize) -> f64 {
        self.min + self.width * bin as f64
    }

    pub fn upper_edge(&self, bin: usize) -> f64 {
        self.min + self.width * (bin as f64 + 1.0)
    }

    pub fn centre(&self, bin: usize) -> f64 {
        self.min + self.width * (bin as f64 + 0.5)
    }

    /// Linear width `10^upper − 10^lower` of `bin`, in TeV.
    pub fn linear_width(&self, bin: usize) -> f64 {
        10f64.powf(self.upper_edge(bin)) - 10f64.powf(self.lower_edge(bin))
    }

    /// Bin containing `x` (log10 TeV), if any.
    pub fn bin_index(&self, x: f64) -> Option<usize> {
        if !x.is_finite() {
            return None;
        }
        let u = (x - self.min) / self.width;
        if u < -EDGE_TOLERANCE {
            return None;
        }
        let idx = (u + EDGE_TOLERANCE).floor().max(0.0) as usize;
        if idx < self.n_bins() { Some(idx) } else { None }
    }
}

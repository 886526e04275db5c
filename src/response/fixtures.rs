//! Synthetic runs for unit tests.

use crate::domain::RunMetadata;
use crate::response::{EffectiveArea, EnergyBinning, Histogram1D, MigrationMatrix, RawRunData};

pub(crate) fn metadata(run_number: u32) -> RunMetadata {
    RunMetadata {
        run_number,
        mjd: 58000.0 + run_number as f64,
        duration: 1800.0,
        dead_time_fraction: 0.0,
        elevation: 70.0,
        azimuth: 180.0,
    }
}

/// Flat 1e5 m² effective area, perfect energy reconstruction, alpha 0.2.
pub(crate) fn synthetic_run(run_number: u32, binning: &EnergyBinning, on: Vec<f64>, off: Vec<f64>) -> RawRunData {
    let edges = binning.edges();
    let lo = edges[0] - 1.0;
    let hi = edges[edges.len() - 1] + 1.0;
    RawRunData {
        metadata: metadata(run_number),
        alpha: 0.2,
        on: Histogram1D::new(edges.clone(), on).unwrap(),
        off: Histogram1D::new(edges, off).unwrap(),
        effective_area: EffectiveArea::new(vec![lo, hi], vec![1e5, 1e5]).unwrap(),
        migration: MigrationMatrix::diagonal(binning).unwrap(),
    }
}

/// Gaussian smearing of width `sigma` (log10 E) and an area rising to a plateau.
pub(crate) fn smeared_run(run_number: u32, binning: &EnergyBinning, on: f64, off: f64, sigma: f64) -> RawRunData {
    let n = binning.n_bins();
    let centres = binning.centres();
    let values = (0..n)
        .map(|i| {
            (0..n)
                .map(|j| {
                    let d = (centres[i] - centres[j]) / sigma;
                    (-0.5 * d * d).exp()
                })
                .collect()
        })
        .collect();
    let log_e: Vec<f64> = (0..=40).map(|k| -2.0 + 0.1 * k as f64).collect();
    let area = log_e.iter().map(|&x| 1e5 / (1.0 + (-(x + 0.5) * 6.0).exp())).collect();
    RawRunData {
        metadata: metadata(run_number),
        alpha: 0.2,
        on: Histogram1D::new(binning.edges(), vec![on; n]).unwrap(),
        off: Histogram1D::new(binning.edges(), vec![off; n]).unwrap(),
        effective_area: EffectiveArea::new(log_e, area).unwrap(),
        migration: MigrationMatrix::new(binning.edges(), binning.edges(), values).unwrap(),
    }
}

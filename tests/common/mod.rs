#![allow(dead_code)]

use gamma_likelihood::domain::{FitConfig, RunMetadata};
use gamma_likelihood::models::{ModelKind, SpectralModel};
use gamma_likelihood::observation::ObservationUnit;
use gamma_likelihood::response::{EffectiveArea, EnergyBinning, Histogram1D, MigrationMatrix, RawRunData};

pub const ALPHA: f64 = 0.2;

/// Flat effective area, so that a 1e-12 normalization gives tens of counts per bin.
pub const AREA_M2: f64 = 50.0;

pub fn metadata(run_number: u32, mjd: f64, duration: f64) -> RunMetadata {
    RunMetadata {
        run_number,
        mjd,
        duration,
        dead_time_fraction: 0.0,
        elevation: 65.0,
        azimuth: 0.0,
    }
}

pub fn raw_run(
    binning: &EnergyBinning,
    meta: RunMetadata,
    on: Vec<f64>,
    off: Vec<f64>,
) -> RawRunData {
    let edges = binning.edges();
    RawRunData {
        metadata: meta,
        alpha: ALPHA,
        on: Histogram1D::new(edges.clone(), on).unwrap(),
        off: Histogram1D::new(edges.clone(), off).unwrap(),
        effective_area: EffectiveArea::new(vec![edges[0] - 1.0, edges[edges.len() - 1] + 1.0], vec![AREA_M2, AREA_M2])
            .unwrap(),
        migration: MigrationMatrix::diagonal(binning).unwrap(),
    }
}

pub fn unit(binning: &EnergyBinning, meta: RunMetadata, on: Vec<f64>, off: Vec<f64>) -> ObservationUnit {
    ObservationUnit::new(raw_run(binning, meta, on, off), *binning).unwrap()
}

/// Run whose counts are the exact expectation of `truth` over a background of
/// `off` counts per bin, so `truth` is the maximum-likelihood estimate.
pub fn asimov_unit(binning: &EnergyBinning, meta: RunMetadata, truth: &SpectralModel, off: f64) -> ObservationUnit {
    let n = binning.n_bins();
    let template = unit(binning, meta.clone(), vec![0.0; n], vec![0.0; n]);
    let excess = template.model_predicted_excess_with(truth, truth.parameters());
    let on = excess.iter().map(|s| s + ALPHA * off).collect();
    unit(binning, meta, on, vec![off; n])
}

pub fn power_law(norm: f64, index: f64) -> SpectralModel {
    let mut m = SpectralModel::new(ModelKind::PowerLaw, 1.0).unwrap();
    m.set_parameters(&[norm, index]).unwrap();
    m
}

/// Configuration covering `binning` with no threshold.
pub fn config_for(binning: &EnergyBinning) -> FitConfig {
    FitConfig {
        bin_width: binning.width(),
        binning_min: binning.min(),
        binning_max: binning.max(),
        energy_min: binning.min(),
        energy_max: binning.max(),
        threshold: None,
        ..FitConfig::default()
    }
}

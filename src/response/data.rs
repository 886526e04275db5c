//! Per-run response on the shared energy grid.
//!
//! `ResponseData` keeps the raw run data and derives, for the current binning:
//!
//! - on/off counts with an epsilon floor
//! - the column-normalized migration matrix
//! - the energy bias of every true-energy bin
//!
//! Rebinning always starts from the raw histograms, so it is idempotent.

use log::{debug, warn};
use nalgebra::DMatrix;

use crate::domain::RunMetadata;
use crate::error::FitError;
use crate::response::{EffectiveArea, EnergyBinning, Histogram1D, RawRunData};

/// Added to every count so that `ln` terms stay finite.
pub const COUNT_FLOOR: f64 = 1e-9;

/// Counts above this are treated as corrupt and reset to the floor.
pub const CORRUPT_COUNT: f64 = 1e9;

/// True-energy slices with fewer non-zero cells get an undefined bias.
pub const MIN_BIAS_ENTRIES: usize = 4;

#[derive(Debug, Clone)]
pub struct ResponseData {
    raw: RawRunData,
    binning: EnergyBinning,
    on: Vec<f64>,
    off: Vec<f64>,
    migration: DMatrix<f64>,
    bias: Vec<Option<f64>>,
}

impl ResponseData {
    pub fn new(raw: RawRunData, binning: EnergyBinning) -> Result<Self, FitError> {
        raw.validate()?;
        let mut data = Self {
            raw,
            binning,
            on: Vec::new(),
            off: Vec::new(),
            migration: DMatrix::zeros(0, 0),
            bias: Vec::new(),
        };
        data.set_binning(binning);
        Ok(data)
    }

    /// Rebin counts and migration matrix onto `binning` and recompute the bias.
    pub fn set_binning(&mut self, binning: EnergyBinning) {
        self.binning = binning;
        let run = self.raw.metadata.run_number;
        self.on = floor_counts(self.raw.on.rebin(&binning), run, "on");
        self.off = floor_counts(self.raw.off.rebin(&binning), run, "off");
        self.migration = self.raw.migration.rebin_normalized(&binning);
        self.bias = estimate_energy_bias(&self.migration, &binning);
        debug!(
            "run {run}: rebinned to {} bins, {} with undefined energy bias",
            binning.n_bins(),
            self.bias.iter().filter(|b| b.is_none()).count()
        );
    }

    /// Copy of this response with the raw on/off histograms replaced by
    /// `on`/`off` on the current binning.
    pub fn with_counts(&self, on: Vec<f64>, off: Vec<f64>) -> Result<Self, FitError> {
        let mut raw = self.raw.clone();
        raw.on = Histogram1D::on_binning(&self.binning, on)?;
        raw.off = Histogram1D::on_binning(&self.binning, off)?;
        Self::new(raw, self.binning)
    }

    pub fn with_metadata(&self, metadata: RunMetadata) -> Result<Self, FitError> {
        let mut raw = self.raw.clone();
        raw.metadata = metadata;
        Self::new(raw, self.binning)
    }

    pub fn binning(&self) -> &EnergyBinning {
        &self.binning
    }

    pub fn n_bins(&self) -> usize {
        self.on.len()
    }

    /// On and off counts per bin, floored at [`COUNT_FLOOR`].
    pub fn counts(&self) -> (&[f64], &[f64]) {
        (&self.on, &self.off)
    }

    pub fn on_counts(&self) -> &[f64] {
        &self.on
    }

    pub fn off_counts(&self) -> &[f64] {
        &self.off
    }

    pub fn alpha(&self) -> f64 {
        self.raw.alpha
    }

    pub fn metadata(&self) -> &RunMetadata {
        &self.raw.metadata
    }

    pub fn live_time(&self) -> f64 {
        self.raw.metadata.live_time()
    }

    pub fn effective_area(&self) -> &EffectiveArea {
        &self.raw.effective_area
    }

    /// `migration[(reco, true)]`; every non-empty true column sums to 1.
    pub fn migration(&self) -> &DMatrix<f64> {
        &self.migration
    }

    /// Relative energy bias per true-energy bin; `None` where it could not be estimated.
    pub fn energy_bias(&self) -> &[Option<f64>] {
        &self.bias
    }

    pub fn raw(&self) -> &RawRunData {
        &self.raw
    }
}

fn floor_counts(counts: Vec<f64>, run: u32, which: &str) -> Vec<f64> {
    counts
        .into_iter()
        .enumerate()
        .map(|(i, c)| {
            if c > CORRUPT_COUNT {
                warn!("run {run}: corrupt {which} count {c} in bin {i}, reset to zero");
                COUNT_FLOOR
            } else {
                c + COUNT_FLOOR
            }
        })
        .collect()
}

/// Relative bias `|E_peak − E_true| / E_true` of each true-energy column.
///
/// The peak is the weighted mean of reconstructed log energy, first over the
/// whole column to get a width, then within two widths of the maximum cell.
fn estimate_energy_bias(migration: &DMatrix<f64>, binning: &EnergyBinning) -> Vec<Option<f64>> {
    let centres = binning.centres();
    let n = migration.ncols().min(centres.len());
    (0..n)
        .map(|j| {
            let column: Vec<f64> = migration.column(j).iter().copied().collect();
            if column.iter().filter(|v| **v > 0.0).count() < MIN_BIAS_ENTRIES {
                return None;
            }
            let (imax, _) = column
                .iter()
                .enumerate()
                .fold((0, f64::MIN), |best, (i, &v)| if v > best.1 { (i, v) } else { best });

            let (_, sigma) = weighted_moments(&column, &centres, |_| true)?;
            let half_window = (2.0 * sigma).max(binning.width());
            let peak = centres[imax];
            let (mu, _) = weighted_moments(&column, &centres, |c| (c - peak).abs() <= half_window)?;

            let e_true = 10f64.powf(centres[j]);
            let bias = (10f64.powf(mu) - e_true).abs() / e_true;
            bias.is_finite().then_some(bias)
        })
        .collect()
}

fn weighted_moments<F>(weights: &[f64], x: &[f64], keep: F) -> Option<(f64, f64)>
where
    F: Fn(f64) -> bool,
{
    let mut sw = 0.0;
    let mut swx = 0.0;
    let mut swxx = 0.0;
    for (&w, &xi) in weights.iter().zip(x) {
        if w > 0.0 && keep(xi) {
            sw += w;
            swx += w * xi;
            swxx += w * xi * xi;
        }
    }
    if sw <= 0.0 {
        return None;
    }
    let mean = swx / sw;
    let var = (swxx / sw - mean * mean).max(0.0);
    Some((mean, var.sqrt()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::response::fixtures::{smeared_run, synthetic_run};

    #[test]
    fn counts_carry_epsilon_floor() {
        let binning = EnergyBinning::new(0.5, -1.0, 0.0).unwrap();
        let data = ResponseData::new(synthetic_run(1, &binning, vec![50.0, 0.0], vec![200.0, 120.0]), binning).unwrap();
        let (on, off) = data.counts();
        assert!((on[0] - 50.0 - COUNT_FLOOR).abs() < 1e-12);
        assert!((on[1] - COUNT_FLOOR).abs() < 1e-15);
        assert_eq!(off.len(), 2);
    }

    #[test]
    fn corrupt_counts_are_reset() {
        let binning = EnergyBinning::new(0.5, -1.0, 0.0).unwrap();
        let data = ResponseData::new(synthetic_run(1, &binning, vec![5e9, 3.0], vec![1.0, 1.0]), binning).unwrap();
        assert_eq!(data.on_counts()[0], COUNT_FLOOR);
    }

    #[test]
    fn rebinning_twice_is_idempotent() {
        let fine = EnergyBinning::new(0.1, -1.0, 1.0).unwrap();
        let mut data = ResponseData::new(smeared_run(3, &fine, 20.0, 80.0, 0.2), fine).unwrap();
        let coarse = EnergyBinning::new(0.2, -1.0, 1.0).unwrap();
        data.set_binning(coarse);
        let first = data.counts().0.to_vec();
        let first_m = data.migration().clone();
        data.set_binning(coarse);
        assert_eq!(data.counts().0, first.as_slice());
        assert_eq!(data.migration(), &first_m);
    }

    #[test]
    fn sparse_columns_have_undefined_bias() {
        let binning = EnergyBinning::new(0.5, -1.0, 0.0).unwrap();
        let data = ResponseData::new(synthetic_run(1, &binning, vec![1.0, 1.0], vec![1.0, 1.0]), binning).unwrap();
        assert!(data.energy_bias().iter().all(|b| b.is_none()));
    }

    #[test]
    fn symmetric_smearing_has_small_bias() {
        let binning = EnergyBinning::new(0.1, -1.0, 1.0).unwrap();
        let data = ResponseData::new(smeared_run(1, &binning, 10.0, 40.0, 0.2), binning).unwrap();
        let mid = binning.n_bins() / 2;
        let b = data.energy_bias()[mid].unwrap();
        assert!(b < 0.1, "bias {b}");
    }
}

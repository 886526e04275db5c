//! Spectrum report JSON.
//!
//! A report is the portable summary of one analysis:
//! - the joint fit (parameters, errors, covariance, status)
//! - binned flux points and the 1σ confidence band
//! - optionally the variability test and its light curve
//! - which runs were used

use std::fs::File;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::domain::{BandPoint, FitResult, SpectralPoint, VariabilityResult};
use crate::error::FitError;
use crate::fit::FitEngine;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunStatus {
    pub run_number: u32,
    pub active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpectrumReport {
    pub tool: String,
    pub fit: FitResult,
    pub spectral_points: Vec<SpectralPoint>,
    pub confidence_band: Vec<BandPoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variability: Option<VariabilityResult>,
    pub runs: Vec<RunStatus>,
}

impl SpectrumReport {
    /// Collect fit, flux points and band from an engine that has been fitted.
    pub fn from_engine(engine: &FitEngine) -> Result<Self, FitError> {
        let fit = engine
            .last_fit()
            .cloned()
            .ok_or_else(|| FitError::configuration("Cannot build a report before fitting."))?;
        let confidence_band = if fit.covariance.is_some() {
            engine.confidence_band(engine.config().band_points)?
        } else {
            Vec::new()
        };
        Ok(Self {
            tool: env!("CARGO_PKG_NAME").to_string(),
            spectral_points: engine.spectral_points()?,
            confidence_band,
            variability: None,
            runs: engine
                .run_status()
                .into_iter()
                .map(|(run_number, active)| RunStatus { run_number, active })
                .collect(),
            fit,
        })
    }

    pub fn with_variability(mut self, variability: VariabilityResult) -> Self {
        self.variability = Some(variability);
        self
    }
}

/// Write a report JSON file.
pub fn write_report_json(path: &Path, report: &SpectrumReport) -> Result<(), FitError> {
    let file = File::create(path)
        .map_err(|e| FitError::data(format!("Failed to create report JSON '{}': {e}", path.display())))?;
    serde_json::to_writer_pretty(file, report)?;
    Ok(())
}

/// Read a report JSON file.
pub fn read_report_json(path: &Path) -> Result<SpectrumReport, FitError> {
    let file = File::open(path)
        .map_err(|e| FitError::data(format!("Failed to open report JSON '{}': {e}", path.display())))?;
    let report: SpectrumReport = serde_json::from_reader(file)?;
    Ok(report)
}

//! Access to per-run input data.
//!
//! Persistence of run data lives outside this crate; a [`DataProvider`] hands
//! over a [`RawRunData`] for a [`RunReference`]. [`InMemoryProvider`] serves
//! data assembled in memory (simulations, tests, pre-loaded archives).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::domain::RunMetadata;
use crate::error::FitError;
use crate::response::{EffectiveArea, Histogram1D, MigrationMatrix};

/// Location of one run: a source (file, archive, table name) and a run number.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunReference {
    pub source: String,
    pub run_number: u32,
}

impl RunReference {
    pub fn new(source: impl Into<String>, run_number: u32) -> Self {
        Self {
            source: source.into(),
            run_number,
        }
    }
}

/// Everything needed to build one run's response, before rebinning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRunData {
    pub metadata: RunMetadata,
    /// On/off exposure ratio.
    pub alpha: f64,
    pub on: Histogram1D,
    pub off: Histogram1D,
    pub effective_area: EffectiveArea,
    pub migration: MigrationMatrix,
}

impl RawRunData {
    /// Validity check: malformed runs are rejected with a data error.
    pub fn validate(&self) -> Result<(), FitError> {
        let run = self.metadata.run_number;
        if !(self.alpha.is_finite() && self.alpha > 0.0) {
            return Err(FitError::data(format!(
                "Run {run}: alpha must be finite and > 0, got {}.",
                self.alpha
            )));
        }
        if !(self.metadata.duration.is_finite() && self.metadata.duration > 0.0) {
            return Err(FitError::data(format!(
                "Run {run}: duration must be > 0 s, got {}.",
                self.metadata.duration
            )));
        }
        let dt = self.metadata.dead_time_fraction;
        if !(dt.is_finite() && (0.0..1.0).contains(&dt)) {
            return Err(FitError::data(format!(
                "Run {run}: dead time fraction must lie in [0, 1), got {dt}."
            )));
        }
        if !self.metadata.mjd.is_finite() {
            return Err(FitError::data(format!("Run {run}: MJD is not finite.")));
        }
        if self.on.contents().is_empty() || self.off.contents().is_empty() {
            return Err(FitError::data(format!("Run {run}: empty on/off histograms.")));
        }
        Ok(())
    }
}

/// Source of run data.
pub trait DataProvider {
    fn load(&self, run: &RunReference) -> Result<RawRunData, FitError>;
}

/// Runs held in memory, keyed by reference.
#[derive(Debug, Clone, Default)]
pub struct InMemoryProvider {
    runs: HashMap<RunReference, RawRunData>,
}

impl InMemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, run: RunReference, data: RawRunData) {
        self.runs.insert(run, data);
    }

    pub fn len(&self) -> usize {
        self.runs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }
}

impl DataProvider for InMemoryProvider {
    fn load(&self, run: &RunReference) -> Result<RawRunData, FitError> {
        let data = self.runs.get(run).ok_or_else(|| {
            FitError::data(format!("Run {} not found in '{}'.", run.run_number, run.source))
        })?;
        data.validate()?;
        Ok(data.clone())
    }
}

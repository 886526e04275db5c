//! Instrument response and run data.
//!
//! - the shared log-energy grid (`binning`)
//! - raw histograms, migration matrix and effective area (`histogram`)
//! - data provider interface (`provider`)
//! - per-run rebinned response (`data`)

pub mod binning;
pub mod data;
pub mod histogram;
pub mod provider;

#[cfg(test)]
pub(crate) mod fixtures;

pub use binning::*;
pub use data::*;
pub use histogram::*;
pub use provider::*;

//! Domain types used throughout the fitting pipeline.
//!
//! This module defines:
//!
//! - run metadata and threshold configuration (`RunMetadata`, `ThresholdSetting`)
//! - the serializable fit configuration (`FitConfig`)
//! - fit outputs (`FitResult`, `SpectralPoint`, `VariabilityResult`, etc.)

pub mod types;

pub use types::*;

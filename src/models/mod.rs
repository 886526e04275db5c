//! Spectral models.
//!
//! - analytic shapes and parameter bookkeeping (`model`)
//! - EBL attenuation (`ebl`)
//! - literature reference spectra (`literature`)

pub mod ebl;
pub mod literature;
pub mod model;

pub use ebl::*;
pub use literature::*;
pub use model::*;

//! `gamma-likelihood` library crate.
//!
//! Joint maximum-likelihood spectral fitting of gamma-ray observation runs
//! with on/off Poisson statistics:
//!
//! - per-run response folding and profiled likelihoods (`observation`)
//! - the joint fit, flux points, intervals and variability (`fit`)
//! - analytic spectral shapes with optional EBL absorption (`models`)
//! - energy binning, histograms and the data provider seam (`response`)

pub mod domain;
pub mod error;
pub mod fit;
pub mod io;
pub mod math;
pub mod models;
pub mod observation;
pub mod response;

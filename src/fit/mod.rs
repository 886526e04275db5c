//! Joint fit orchestration.
//!
//! Responsibilities:
//!
//! - minimize the joint likelihood of all active runs (`engine`, `minimizer`)
//! - binned flux points and profile-likelihood intervals (`spectrum`)
//! - confidence band and integral fluxes (`flux`)
//! - time-binned sub-fits and the variability index (`variability`)

pub mod engine;
pub mod flux;
pub mod minimizer;
pub mod spectrum;
pub mod variability;

pub use engine::*;
pub use minimizer::*;
pub use variability::*;

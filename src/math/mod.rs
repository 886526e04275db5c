//! Mathematical utilities: grids and quadrature, on/off Poisson statistics,
//! and Hessian-based covariance.

pub mod grid;
pub mod hessian;
pub mod stats;

pub use grid::*;
pub use hessian::*;
pub use stats::*;

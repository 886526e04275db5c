//! Per-run likelihood units.

pub mod unit;

pub use unit::*;

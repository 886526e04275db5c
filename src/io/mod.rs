//! Input/output helpers.
//!
//! - fit configuration JSON (`config`)
//! - spectrum report JSON (`report`)

pub mod config;
pub mod report;

pub use config::*;
pub use report::*;

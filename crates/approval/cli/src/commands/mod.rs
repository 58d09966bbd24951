//! CLI command implementations

pub mod blueprint;
pub mod simulate;

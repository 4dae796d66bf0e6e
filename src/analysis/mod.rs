// src/analysis/mod.rs
pub mod indicators;

pub use indicators::{build_snapshot, compute_indicators};

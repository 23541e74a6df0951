//! pcapwatch math utilities.

pub mod stats;

pub use stats::RunningStats;

//! pcapwatch core library.
//!
//! Watches a capture file (or the newest matching file in a directory),
//! feeds it unit by unit to an external scoring engine, and writes an alert
//! whenever a score crosses the static or adaptive threshold.

pub mod alert;
pub mod config;
pub mod driver;
pub mod engine;
pub mod exit_codes;
pub mod lifecycle;
pub mod logging;
pub mod source;
pub mod threshold;

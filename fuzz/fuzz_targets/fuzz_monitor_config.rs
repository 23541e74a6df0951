//! Fuzz target for monitor configuration parsing.
//!
//! Tests that config parsing and validation handle arbitrary input
//! without panicking.

#![no_main]

use libfuzzer_sys::fuzz_target;
use pw_core::config::{validate, MonitorConfig};

fuzz_target!(|data: &[u8]| {
    if let Ok(config) = serde_json::from_slice::<MonitorConfig>(data) {
        let _ = validate(&config);
    }
});

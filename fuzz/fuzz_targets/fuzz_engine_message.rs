//! Fuzz target for scoring engine message parsing.
//!
//! Tests that `parse_message` handles arbitrary stdout lines without panicking.

#![no_main]

use libfuzzer_sys::fuzz_target;
use pw_core::engine::parse_message;

fuzz_target!(|data: &str| {
    // Malformed lines become protocol errors, never panics
    if let Ok(message) = parse_message(data) {
        let _ = message.into_unit();
    }
});

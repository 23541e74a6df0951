//! Structured logging for pcapwatch.
//!
//! Provides dual-mode logging on stderr:
//! - Human-readable console output for interactive use
//! - Machine-parseable JSONL for supervised deployments
//!
//! plus an optional append-only JSONL trace file (`monitor.log`) in the
//! log directory. Alerts are written to their own file by
//! [`crate::alert`]; they are mirrored here at `warn` level.
//!
//! # Design Notes
//!
//! - stdout is reserved for command payloads (`--print-config`, summaries)
//! - Events carry an `event` field naming what happened (see [`event_names`])
//! - `run_id` and `session_id` come from the enclosing spans

pub mod config;
pub mod events;
pub mod layer;

pub use config::{LogConfig, LogFormat, LogLevel};
pub use events::{event_names, Level};
pub use layer::JsonlLayer;

use std::fs::{self, OpenOptions};
use std::io::IsTerminal;
use std::path::Path;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::fmt;

/// Initialize the logging subsystem.
///
/// Must be called once at startup before any logging occurs. When
/// `trace_file` is given its parent directory is created and the file is
/// opened for appending.
pub fn init_logging(config: &LogConfig, trace_file: Option<&Path>) -> std::io::Result<()> {
    let human = (config.format == LogFormat::Human).then(|| {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
            .with_ansi(std::io::stderr().is_terminal())
    });
    let jsonl = (config.format == LogFormat::Jsonl).then(JsonlLayer::stderr);

    let file = match trace_file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    fs::create_dir_all(parent)?;
                }
            }
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            Some(JsonlLayer::new(file))
        }
        None => None,
    };

    // A second initialization (tests, embedding) keeps the first subscriber.
    let _ = tracing_subscriber::registry()
        .with(config.env_filter())
        .with(human)
        .with(jsonl)
        .with(file)
        .try_init();
    Ok(())
}

/// Truncate a string for inclusion in a log line or error message.
pub fn truncate_for_log(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        return s.to_string();
    }
    let mut end = max_len;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...(truncated)", &s[..end])
}

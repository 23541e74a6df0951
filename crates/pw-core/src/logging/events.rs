//! Log levels and event names.

use serde::{Deserialize, Serialize};

/// Log level as written in JSONL output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<tracing::Level> for Level {
    fn from(level: tracing::Level) -> Self {
        match level {
            tracing::Level::TRACE => Level::Trace,
            tracing::Level::DEBUG => Level::Debug,
            tracing::Level::INFO => Level::Info,
            tracing::Level::WARN => Level::Warn,
            tracing::Level::ERROR => Level::Error,
        }
    }
}

/// Values of the `event` field, for filtering logs by what happened.
pub mod event_names {
    // Lifecycle
    pub const MONITOR_STARTED: &str = "monitor.started";
    pub const MONITOR_STOPPED: &str = "monitor.stopped";
    pub const MONITOR_FATAL: &str = "monitor.fatal";
    pub const SHUTDOWN_REQUESTED: &str = "monitor.shutdown_requested";
    pub const PACKET_LIMIT_REACHED: &str = "monitor.packet_limit";

    // Sources
    pub const SOURCE_RESOLVED: &str = "source.resolved";
    pub const SOURCE_NOT_FOUND: &str = "source.not_found";
    pub const SOURCE_UNUSABLE: &str = "source.unusable";
    pub const SOURCE_REPLACED: &str = "source.replaced";
    pub const DISCOVERY_EXHAUSTED: &str = "source.discovery_exhausted";

    // Sessions
    pub const SESSION_BOUND: &str = "session.bound";
    pub const SESSION_CLOSED: &str = "session.closed";
    pub const SESSION_FAILED: &str = "session.failed";
    pub const SESSION_STUCK: &str = "session.stuck";
    pub const STREAM_END: &str = "session.end_of_stream";
    pub const ROTATION: &str = "session.rotation";

    // Units
    pub const UNIT_FAILED: &str = "unit.failed";
    pub const PROGRESS: &str = "unit.progress";

    // Alerts
    pub const ALERT_EMITTED: &str = "alert.emitted";
    pub const ALERT_WRITE_FAILED: &str = "alert.write_failed";
}

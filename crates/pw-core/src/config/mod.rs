//! Configuration loading and validation for pcapwatch.
//!
//! This module handles:
//! - The `MonitorConfig` document and its built-in defaults
//! - Loading a JSON config file (`--config`)
//! - Semantic validation before the monitor starts
//!
//! Resolution order is CLI > environment > config file > defaults. The
//! CLI and environment layers are applied by the binary on top of the
//! value returned here.

mod validate;

pub use validate::{validate, ValidationError};

use crate::source::SourceMode;
use crate::threshold::ThresholdPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Default capture file in single-file mode.
pub const DEFAULT_CAPTURE_PATH: &str = "/data/current.pcap";

/// Preferred log directory when running inside the capture appliance.
const APPLIANCE_LOG_ROOT: &str = "/app/logs";

/// Errors that can occur during config loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config file not found: {path}")]
    NotFound { path: PathBuf },

    #[error("Invalid JSON in config file {path}: {source}")]
    ParseError {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("I/O error reading {path}: {source}")]
    IoError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Semantic validation failed: {0}")]
    ValidationError(#[from] ValidationError),
}

impl From<ConfigError> for pw_common::Error {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::ValidationError(ValidationError::InvalidValue { field, message }) => {
                pw_common::Error::InvalidValue { field, message }
            }
            other => pw_common::Error::Config(other.to_string()),
        }
    }
}

/// Parameters handed to the scoring engine for every session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    /// Stop after this many units in total; unbounded when absent.
    pub packet_limit: Option<u64>,
    /// Maximum autoencoder ensemble size.
    pub max_ae: u32,
    /// Units used to learn the feature mapping.
    pub fm_grace: u64,
    /// Units used to train the anomaly detector.
    pub ad_grace: u64,
    pub learning_rate: f64,
    /// Hidden-to-visible layer ratio.
    pub hidden_ratio: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            packet_limit: None,
            max_ae: 10,
            fm_grace: 5_000,
            ad_grace: 50_000,
            learning_rate: 0.01,
            hidden_ratio: 0.75,
        }
    }
}

impl ScoringConfig {
    /// Units whose scores are never evaluated (the engine is still training).
    pub fn grace_units(&self) -> u64 {
        self.fm_grace.saturating_add(self.ad_grace)
    }
}

/// Which engine implementation binds sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EngineKind {
    /// Spawn the engine command per session.
    #[default]
    Command,
    /// Replay recorded engine output from the capture files themselves.
    Replay,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub kind: EngineKind,
    /// Program launched once per session.
    pub command: String,
    /// Arguments placed before the per-session arguments.
    pub args: Vec<String>,
    /// Watchdog for every engine request.
    pub timeout_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            kind: EngineKind::Command,
            command: "pcapwatch-engine".to_string(),
            args: Vec::new(),
            timeout_secs: 30,
        }
    }
}

/// Stream driver pacing and failure budgets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    /// Sleep between resolver polls while idle or draining.
    pub poll_interval_ms: u64,
    /// Backoff after a per-unit failure.
    pub unit_retry_backoff_ms: u64,
    /// Consecutive per-unit failures before the session is dropped.
    pub max_unit_failures: u32,
    /// Consecutive unexpected failures before the monitor gives up.
    pub max_unexpected_failures: u32,
    /// Polls without ever finding a capture source before giving up.
    /// Unlimited when absent.
    pub max_discovery_retries: Option<u32>,
    /// Log a progress line every this many units.
    pub progress_every: u64,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1_000,
            unit_retry_backoff_ms: 100,
            max_unit_failures: 5,
            max_unexpected_failures: 10,
            max_discovery_retries: Some(300),
            progress_every: 1_000,
        }
    }
}

impl DriverConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn unit_retry_backoff(&self) -> Duration {
        Duration::from_millis(self.unit_retry_backoff_ms)
    }
}

/// Where logs and alerts are written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Directory for the trace log and alert log.
    pub log_dir: PathBuf,
    /// Alert log file name inside `log_dir`.
    pub alert_file: String,
    /// Trace log file name inside `log_dir`; no file trace log when absent.
    pub trace_file: Option<String>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            log_dir: default_log_dir(),
            alert_file: "alerts.jsonl".to_string(),
            trace_file: Some("monitor.log".to_string()),
        }
    }
}

impl OutputConfig {
    pub fn alert_path(&self) -> PathBuf {
        self.log_dir.join(&self.alert_file)
    }

    pub fn trace_path(&self) -> Option<PathBuf> {
        self.trace_file.as_ref().map(|f| self.log_dir.join(f))
    }
}

/// `/app/logs/pcapwatch` on the appliance, the platform data dir elsewhere.
pub fn default_log_dir() -> PathBuf {
    let appliance = Path::new(APPLIANCE_LOG_ROOT);
    if appliance.is_dir() {
        return appliance.join("pcapwatch");
    }
    dirs::data_local_dir()
        .map(|d| d.join("pcapwatch").join("logs"))
        .unwrap_or_else(|| PathBuf::from("logs"))
}

/// Complete monitor configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub source: SourceMode,
    pub scoring: ScoringConfig,
    pub threshold: ThresholdPolicy,
    pub engine: EngineConfig,
    pub driver: DriverConfig,
    pub output: OutputConfig,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            source: SourceMode::File {
                path: PathBuf::from(DEFAULT_CAPTURE_PATH),
            },
            scoring: ScoringConfig::default(),
            threshold: ThresholdPolicy::default(),
            engine: EngineConfig::default(),
            driver: DriverConfig::default(),
            output: OutputConfig::default(),
        }
    }
}

impl MonitorConfig {
    /// Load a config file. Missing sections take their defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound {
                path: path.to_path_buf(),
            });
        }
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::IoError {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_json(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })
    }

    pub fn from_json(content: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(content)
    }

    /// Load `path` if given, else defaults; validate either way.
    pub fn resolve(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match path {
            Some(p) => Self::load(p)?,
            None => Self::default(),
        };
        validate(&config)?;
        Ok(config)
    }

    pub fn to_json_pretty(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }
}

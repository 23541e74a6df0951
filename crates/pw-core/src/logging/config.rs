//! Logging configuration.
//!
//! Supports configuration via:
//! - CLI flags (`-v`, `-q`, `--log-format`)
//! - Environment variables (`PCAPWATCH_LOG`, `RUST_LOG`, `PCAPWATCH_LOG_FORMAT`)

use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

/// Log output format on stderr.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable console format (default).
    #[default]
    Human,
    /// Machine-parseable JSON lines.
    Jsonl,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "human" | "console" | "pretty" => Ok(LogFormat::Human),
            "jsonl" | "json" | "structured" => Ok(LogFormat::Jsonl),
            _ => Err(format!("unknown log format: {}", s)),
        }
    }
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogFormat::Human => write!(f, "human"),
            LogFormat::Jsonl => write!(f, "jsonl"),
        }
    }
}

/// Log level filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
    Off,
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            "off" | "none" | "quiet" => Ok(LogLevel::Off),
            _ => Err(format!("unknown log level: {}", s)),
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Trace => write!(f, "trace"),
            LogLevel::Debug => write!(f, "debug"),
            LogLevel::Info => write!(f, "info"),
            LogLevel::Warn => write!(f, "warn"),
            LogLevel::Error => write!(f, "error"),
            LogLevel::Off => write!(f, "off"),
        }
    }
}

impl LogLevel {
    /// Level selected by `-v`/`-q` counts, if any flag was given.
    pub fn from_verbosity(verbose: u8, quiet: u8) -> Option<LogLevel> {
        match (verbose, quiet) {
            (0, 0) => None,
            (_, q) if q >= 2 => Some(LogLevel::Error),
            (_, 1) => Some(LogLevel::Warn),
            (1, _) => Some(LogLevel::Debug),
            _ => Some(LogLevel::Trace),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Default)]
pub struct LogConfig {
    /// Stderr format. The trace log file is always JSONL.
    pub format: LogFormat,
    /// Level used when no directive string applies.
    pub level: LogLevel,
    /// Filter directives from the environment (e.g. `pw_core=debug`).
    pub directives: Option<String>,
}

impl LogConfig {
    /// Create config from environment and CLI overrides.
    pub fn from_env(cli_level: Option<LogLevel>, cli_format: Option<LogFormat>) -> Self {
        Self::resolve(cli_level, cli_format, |key| std::env::var(key).ok())
    }

    /// Resolution with an injectable environment.
    ///
    /// CLI level > `PCAPWATCH_LOG` > `RUST_LOG` > info.
    /// CLI format > `PCAPWATCH_LOG_FORMAT` > human.
    pub fn resolve(
        cli_level: Option<LogLevel>,
        cli_format: Option<LogFormat>,
        env: impl Fn(&str) -> Option<String>,
    ) -> Self {
        let mut config = LogConfig::default();

        if let Some(level) = cli_level {
            config.level = level;
        } else if let Some(val) = env("PCAPWATCH_LOG").or_else(|| env("RUST_LOG")) {
            match val.parse::<LogLevel>() {
                Ok(level) => config.level = level,
                Err(_) => config.directives = Some(val),
            }
        }

        if let Some(format) = cli_format {
            config.format = format;
        } else if let Some(format) = env("PCAPWATCH_LOG_FORMAT").and_then(|v| v.parse().ok()) {
            config.format = format;
        }

        config
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }

    /// Filter for the subscriber; bad directives fall back to the level.
    pub fn env_filter(&self) -> EnvFilter {
        self.directives
            .as_deref()
            .and_then(|d| EnvFilter::try_new(d).ok())
            .unwrap_or_else(|| EnvFilter::new(self.level.to_string()))
    }
}

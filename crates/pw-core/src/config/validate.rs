//! Semantic validation of a loaded configuration.

use super::{EngineKind, MonitorConfig};
use crate::source::{FilePattern, SourceMode};
use crate::threshold::ThresholdPolicy;
use thiserror::Error;

/// Configuration validation errors.
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

impl ValidationError {
    fn invalid(field: &str, message: impl Into<String>) -> Self {
        ValidationError::InvalidValue {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

/// Validate a configuration semantically.
pub fn validate(config: &MonitorConfig) -> Result<(), ValidationError> {
    match &config.source {
        SourceMode::File { path } => {
            if path.as_os_str().is_empty() {
                return Err(ValidationError::invalid("source.path", "must not be empty"));
            }
        }
        SourceMode::Directory { dir, pattern } => {
            if dir.as_os_str().is_empty() {
                return Err(ValidationError::invalid("source.dir", "must not be empty"));
            }
            if pattern.is_empty() {
                return Err(ValidationError::invalid("source.pattern", "must not be empty"));
            }
            if pattern.contains('/') {
                return Err(ValidationError::invalid(
                    "source.pattern",
                    "matches file names only, no path separators",
                ));
            }
            if let Err(e) = FilePattern::new(pattern) {
                return Err(ValidationError::invalid("source.pattern", e.to_string()));
            }
        }
    }

    let scoring = &config.scoring;
    if scoring.max_ae == 0 {
        return Err(ValidationError::invalid("scoring.max_ae", "must be at least 1"));
    }
    if !(scoring.learning_rate > 0.0 && scoring.learning_rate <= 1.0) {
        return Err(ValidationError::invalid(
            "scoring.learning_rate",
            format!("must be in (0, 1], got {}", scoring.learning_rate),
        ));
    }
    if !(scoring.hidden_ratio > 0.0 && scoring.hidden_ratio <= 1.0) {
        return Err(ValidationError::invalid(
            "scoring.hidden_ratio",
            format!("must be in (0, 1], got {}", scoring.hidden_ratio),
        ));
    }
    if scoring.packet_limit == Some(0) {
        return Err(ValidationError::invalid(
            "scoring.packet_limit",
            "must be positive when set",
        ));
    }

    match &config.threshold {
        ThresholdPolicy::Static { threshold } => {
            if !threshold.is_finite() {
                return Err(ValidationError::invalid(
                    "threshold.threshold",
                    "must be finite",
                ));
            }
        }
        ThresholdPolicy::Adaptive {
            multiplier,
            window,
            ..
        } => {
            if !(multiplier.is_finite() && *multiplier > 0.0) {
                return Err(ValidationError::invalid(
                    "threshold.multiplier",
                    format!("must be positive, got {}", multiplier),
                ));
            }
            if let Some(w) = window {
                if *w < 2 {
                    return Err(ValidationError::invalid(
                        "threshold.window",
                        "must be at least 2",
                    ));
                }
            }
        }
    }

    if config.engine.kind == EngineKind::Command {
        if config.engine.command.trim().is_empty() {
            return Err(ValidationError::invalid("engine.command", "must not be empty"));
        }
        if config.engine.timeout_secs == 0 {
            return Err(ValidationError::invalid(
                "engine.timeout_secs",
                "must be positive",
            ));
        }
    }

    let driver = &config.driver;
    if driver.poll_interval_ms == 0 {
        return Err(ValidationError::invalid(
            "driver.poll_interval_ms",
            "must be positive",
        ));
    }
    if driver.max_unit_failures == 0 {
        return Err(ValidationError::invalid(
            "driver.max_unit_failures",
            "must be at least 1",
        ));
    }
    if driver.max_unexpected_failures == 0 {
        return Err(ValidationError::invalid(
            "driver.max_unexpected_failures",
            "must be at least 1",
        ));
    }
    if driver.progress_every == 0 {
        return Err(ValidationError::invalid(
            "driver.progress_every",
            "must be positive",
        ));
    }

    if config.output.alert_file.is_empty() {
        return Err(ValidationError::invalid("output.alert_file", "must not be empty"));
    }

    Ok(())
}

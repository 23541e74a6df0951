//! Error types for pcapwatch.
//!
//! This module provides structured error handling with:
//! - Stable error codes for machine parsing
//! - Category classification for error grouping
//! - Recoverability hints for the monitor loop
//! - Remediation suggestions for operators
//!
//! # Structured Output
//!
//! Fatal errors are logged as a final structured entry before exit:
//! ```json
//! {
//!   "code": 22,
//!   "category": "discovery",
//!   "message": "no capture source found after 30 attempts",
//!   "recoverable": false,
//!   "suggested_action": "abort",
//!   "context": { "attempts": 30 }
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for pcapwatch operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error categories for grouping related errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Configuration file or flag errors.
    Config,
    /// Capture source discovery errors.
    Discovery,
    /// Scoring engine session errors.
    Engine,
    /// Alert log errors.
    Alert,
    /// File I/O and serialization errors.
    Io,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCategory::Config => write!(f, "config"),
            ErrorCategory::Discovery => write!(f, "discovery"),
            ErrorCategory::Engine => write!(f, "engine"),
            ErrorCategory::Alert => write!(f, "alert"),
            ErrorCategory::Io => write!(f, "io"),
        }
    }
}

/// Suggested follow-up for an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestedAction {
    /// Retry the operation (possibly with backoff).
    Retry,
    /// Run validation on the configuration.
    RunCheck,
    /// Wait for a resource to become available.
    Wait,
    /// Skip this item and continue.
    Skip,
    /// Abort the process.
    Abort,
    /// Manual intervention required.
    ManualIntervention,
}

impl std::fmt::Display for SuggestedAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SuggestedAction::Retry => write!(f, "retry"),
            SuggestedAction::RunCheck => write!(f, "run_check"),
            SuggestedAction::Wait => write!(f, "wait"),
            SuggestedAction::Skip => write!(f, "skip"),
            SuggestedAction::Abort => write!(f, "abort"),
            SuggestedAction::ManualIntervention => write!(f, "manual_intervention"),
        }
    }
}

/// Unified error type for pcapwatch.
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors (10-19)
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    // Discovery errors (20-29)
    #[error("capture source unusable: {path}: {reason}")]
    SourceUnusable { path: PathBuf, reason: String },

    #[error("no capture source found after {attempts} attempts")]
    DiscoveryExhausted { attempts: u32 },

    // Engine errors (30-39)
    #[error("scoring session construction failed: {0}")]
    SessionBind(String),

    #[error("scoring engine failed on unit: {0}")]
    UnitFailed(String),

    #[error("scoring engine did not respond within {seconds}s")]
    EngineTimeout { seconds: u64 },

    #[error("scoring engine protocol violation: {0}")]
    EngineProtocol(String),

    #[error("unexpected failure repeated {count} times: {last}")]
    RepeatedFailure { count: u32, last: String },

    // Alert errors (40-49)
    #[error("alert log write failed: {0}")]
    AlertWrite(String),

    // I/O errors (60-69)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Returns the error code for this error type.
    ///
    /// Error codes are stable and grouped by category:
    /// - 10-19: Configuration errors
    /// - 20-29: Discovery errors
    /// - 30-39: Engine errors
    /// - 40-49: Alert errors
    /// - 60-69: I/O errors
    pub fn code(&self) -> u32 {
        match self {
            Error::Config(_) => 10,
            Error::InvalidValue { .. } => 11,
            Error::SourceUnusable { .. } => 21,
            Error::DiscoveryExhausted { .. } => 22,
            Error::SessionBind(_) => 30,
            Error::UnitFailed(_) => 31,
            Error::EngineTimeout { .. } => 32,
            Error::EngineProtocol(_) => 33,
            Error::RepeatedFailure { .. } => 34,
            Error::AlertWrite(_) => 40,
            Error::Io(_) => 60,
        }
    }

    /// Returns the error category for grouping and filtering.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Config(_) | Error::InvalidValue { .. } => ErrorCategory::Config,

            Error::SourceUnusable { .. } | Error::DiscoveryExhausted { .. } => {
                ErrorCategory::Discovery
            }

            Error::SessionBind(_)
            | Error::UnitFailed(_)
            | Error::EngineTimeout { .. }
            | Error::EngineProtocol(_)
            | Error::RepeatedFailure { .. } => ErrorCategory::Engine,

            Error::AlertWrite(_) => ErrorCategory::Alert,

            Error::Io(_) => ErrorCategory::Io,
        }
    }

    /// Returns whether the monitor loop may continue after this error.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Error::Config(_) => false,
            Error::InvalidValue { .. } => false,

            // Fatal for the source, not for the process.
            Error::SourceUnusable { .. } => true,
            Error::DiscoveryExhausted { .. } => false,

            Error::SessionBind(_) => true,
            Error::UnitFailed(_) => true,
            Error::EngineTimeout { .. } => true,
            Error::EngineProtocol(_) => true,
            Error::RepeatedFailure { .. } => false,

            Error::AlertWrite(_) => false,

            Error::Io(_) => true,
        }
    }

    /// Returns the suggested follow-up.
    pub fn suggested_action(&self) -> SuggestedAction {
        match self {
            Error::Config(_) | Error::InvalidValue { .. } => SuggestedAction::RunCheck,

            Error::SourceUnusable { .. } => SuggestedAction::Skip,
            Error::DiscoveryExhausted { .. } => SuggestedAction::Abort,

            Error::SessionBind(_) => SuggestedAction::Skip,
            Error::UnitFailed(_) => SuggestedAction::Retry,
            Error::EngineTimeout { .. } => SuggestedAction::Retry,
            Error::EngineProtocol(_) => SuggestedAction::ManualIntervention,
            Error::RepeatedFailure { .. } => SuggestedAction::Abort,

            Error::AlertWrite(_) => SuggestedAction::ManualIntervention,

            Error::Io(_) => SuggestedAction::Retry,
        }
    }

    /// Returns a human-readable remediation hint.
    pub fn remediation(&self) -> &'static str {
        match self {
            Error::Config(_) | Error::InvalidValue { .. } => {
                "Run 'pcapwatch --print-config' to inspect the effective configuration."
            }
            Error::SourceUnusable { .. } => {
                "The capture file could not be opened by the scoring engine. Check its header."
            }
            Error::DiscoveryExhausted { .. } => {
                "No capture file appeared in time. Raise --max-discovery-retries or fix the path."
            }
            Error::SessionBind(_) => {
                "The scoring engine rejected the capture file or its parameters."
            }
            Error::UnitFailed(_) => "A single capture record was malformed; it will be retried.",
            Error::EngineTimeout { .. } => {
                "The scoring engine hung. Raise --engine-timeout-secs or inspect the engine."
            }
            Error::EngineProtocol(_) => {
                "The scoring engine wrote an unexpected line on stdout. Check the engine command."
            }
            Error::RepeatedFailure { .. } => {
                "The monitor loop kept failing. Inspect the trace log for the first failure."
            }
            Error::AlertWrite(_) => "Check disk space and permissions on the alert log directory.",
            Error::Io(_) => "Check disk space, permissions, and that directories exist.",
        }
    }
}

/// Structured error response for the final fatal log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredError {
    /// Stable error code.
    pub code: u32,

    /// Error category for grouping.
    pub category: ErrorCategory,

    /// Human-readable error message.
    pub message: String,

    /// Whether the error is potentially recoverable.
    pub recoverable: bool,

    /// Suggested follow-up.
    pub suggested_action: SuggestedAction,

    /// Additional structured context (e.g., file path).
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub context: HashMap<String, serde_json::Value>,
}

impl From<&Error> for StructuredError {
    fn from(err: &Error) -> Self {
        let mut context = HashMap::new();

        match err {
            Error::SourceUnusable { path, .. } => {
                context.insert("path".to_string(), serde_json::json!(path));
            }
            Error::DiscoveryExhausted { attempts } => {
                context.insert("attempts".to_string(), serde_json::json!(attempts));
            }
            Error::EngineTimeout { seconds } => {
                context.insert("timeout_seconds".to_string(), serde_json::json!(seconds));
            }
            Error::RepeatedFailure { count, .. } => {
                context.insert("count".to_string(), serde_json::json!(count));
            }
            _ => {}
        }

        StructuredError {
            code: err.code(),
            category: err.category(),
            message: err.to_string(),
            recoverable: err.is_recoverable(),
            suggested_action: err.suggested_action(),
            context,
        }
    }
}

impl StructuredError {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(r#"{{"code":{},"error":"serialization_failed"}}"#, self.code)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_grouped_by_category() {
        assert_eq!(Error::Config("x".into()).code(), 10);
        assert_eq!(Error::DiscoveryExhausted { attempts: 3 }.code(), 22);
        assert_eq!(Error::SessionBind("bad header".into()).code(), 30);
        assert_eq!(Error::AlertWrite("disk full".into()).code(), 40);
    }

    #[test]
    fn test_category_mapping() {
        assert_eq!(
            Error::SourceUnusable {
                path: PathBuf::from("/data/a.pcap"),
                reason: "bad magic".into()
            }
            .category(),
            ErrorCategory::Discovery
        );
        assert_eq!(
            Error::EngineTimeout { seconds: 30 }.category(),
            ErrorCategory::Engine
        );
    }

    #[test]
    fn test_recoverability() {
        assert!(Error::UnitFailed("truncated record".into()).is_recoverable());
        assert!(Error::SessionBind("bad header".into()).is_recoverable());
        assert!(!Error::DiscoveryExhausted { attempts: 30 }.is_recoverable());
        assert!(!Error::RepeatedFailure {
            count: 10,
            last: "boom".into()
        }
        .is_recoverable());
    }

    #[test]
    fn test_structured_error_context() {
        let err = Error::DiscoveryExhausted { attempts: 30 };
        let structured = StructuredError::from(&err);
        assert_eq!(structured.code, 22);
        assert_eq!(structured.category, ErrorCategory::Discovery);
        assert_eq!(structured.suggested_action, SuggestedAction::Abort);
        assert_eq!(structured.context["attempts"], 30);

        let json = structured.to_json();
        assert!(json.contains("\"category\":\"discovery\""));
    }

    #[test]
    fn test_engine_timeout_remediation_names_cli_flag() {
        let remediation = Error::EngineTimeout { seconds: 30 }.remediation();
        assert!(remediation.contains("--engine-timeout-secs"));
    }

    #[test]
    fn test_unusable_source_context() {
        let err = Error::SourceUnusable {
            path: PathBuf::from("/data/b.pcap"),
            reason: "bad magic".into(),
        };
        let structured = StructuredError::from(&err);
        assert_eq!(structured.code, 21);
        assert_eq!(structured.suggested_action, SuggestedAction::Skip);
        assert_eq!(structured.context["path"], "/data/b.pcap");
        assert!(structured.message.contains("bad magic"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: Error = io.into();
        assert_eq!(err.category(), ErrorCategory::Io);
        assert!(err.to_string().contains("gone"));
    }
}

//! Exit codes for the pcapwatch CLI.
//!
//! Exit code ranges:
//! - 0: clean stop (shutdown signal or packet limit)
//! - 10-19: User/environment errors (recoverable by user action)
//! - 20-29: Internal and runtime errors

use pw_common::{Error, ErrorCategory};

/// Exit codes for pcapwatch.
///
/// These codes are a stable contract for supervisors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    /// Stopped by signal or packet limit.
    Clean = 0,

    // ========================================================================
    // User / Environment Errors (10-19)
    // ========================================================================
    /// Invalid arguments
    ArgsError = 10,

    /// Configuration file missing, unparseable, or invalid
    ConfigError = 11,

    /// No capture source appeared within the discovery budget
    SourceNotFound = 12,

    // ========================================================================
    // Internal / Runtime Errors (20-29)
    // ========================================================================
    /// Internal error (bug - please report)
    InternalError = 20,

    /// I/O error (log directory, alert log)
    IoError = 21,

    /// Scoring engine kept failing
    EngineError = 22,
}

impl ExitCode {
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    pub fn is_success(self) -> bool {
        self == ExitCode::Clean
    }

    /// Codes 10-19, resolvable by the operator.
    pub fn is_user_error(self) -> bool {
        (10..20).contains(&(self as i32))
    }

    pub fn code_name(&self) -> &'static str {
        match self {
            ExitCode::Clean => "OK_CLEAN",
            ExitCode::ArgsError => "ERR_ARGS",
            ExitCode::ConfigError => "ERR_CONFIG",
            ExitCode::SourceNotFound => "ERR_SOURCE_NOT_FOUND",
            ExitCode::InternalError => "ERR_INTERNAL",
            ExitCode::IoError => "ERR_IO",
            ExitCode::EngineError => "ERR_ENGINE",
        }
    }

    /// Exit code for a fatal monitor error.
    pub fn for_error(err: &Error) -> ExitCode {
        match err.category() {
            ErrorCategory::Config => ExitCode::ConfigError,
            ErrorCategory::Discovery => ExitCode::SourceNotFound,
            ErrorCategory::Engine => ExitCode::EngineError,
            ErrorCategory::Alert | ErrorCategory::Io => ExitCode::IoError,
        }
    }
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> Self {
        code as i32
    }
}

impl std::fmt::Display for ExitCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.code_name(), self.as_i32())
    }
}

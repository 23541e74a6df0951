//! Scoring engine adapter.
//!
//! The anomaly-scoring engine is an external collaborator. This module
//! defines the narrow contract the stream driver relies on:
//!
//! - [`EngineFactory::bind`] constructs a session for one capture file
//! - [`ScoringSession::next_unit`] pulls exactly one packet's score
//! - [`ScoringSession::source_path`] reports which file the session reads
//!
//! Two implementations ship with the crate:
//!
//! - [`command::CommandEngineFactory`] drives the engine as a child process
//!   speaking the JSONL protocol in [`protocol`]
//! - [`replay::ReplayEngineFactory`] replays previously recorded engine
//!   output, one JSONL message per unit

pub mod command;
pub mod protocol;
pub mod replay;

pub use command::CommandEngineFactory;
pub use protocol::{parse_message, EngineMessage};
pub use replay::ReplayEngineFactory;

use crate::config::ScoringConfig;
use crate::source::CaptureSource;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Endpoint and protocol of the packet behind a score, when the engine
/// exposes it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PacketMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dst: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
}

impl PacketMeta {
    pub fn is_empty(&self) -> bool {
        self.src.is_none() && self.dst.is_none() && self.protocol.is_none()
    }
}

/// Result of pulling one unit from a session.
///
/// End-of-stream is its own variant; no score value is reserved for it.
#[derive(Debug, Clone, PartialEq)]
pub enum NextUnit {
    Scored {
        score: f64,
        packet: Option<PacketMeta>,
    },
    EndOfStream,
}

/// Errors raised by an engine binding or session.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The engine refused the capture file or its parameters.
    #[error("engine rejected source: {0}")]
    Bind(String),

    /// A single capture record could not be scored.
    #[error("unit failed: {0}")]
    Unit(String),

    /// The engine did not answer within the watchdog timeout.
    #[error("engine timed out after {0:?}")]
    Timeout(Duration),

    /// The engine process went away mid-session.
    #[error("engine exited: {0}")]
    Exited(String),

    /// The engine wrote something that is not a protocol message.
    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Whether the session can keep being used after this error.
    ///
    /// Only per-unit failures leave the session intact; everything else
    /// requires tearing the session down.
    pub fn is_unit_failure(&self) -> bool {
        matches!(self, EngineError::Unit(_))
    }
}

impl From<EngineError> for pw_common::Error {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Bind(msg) => pw_common::Error::SessionBind(msg),
            EngineError::Unit(msg) => pw_common::Error::UnitFailed(msg),
            EngineError::Timeout(d) => pw_common::Error::EngineTimeout {
                seconds: d.as_secs(),
            },
            EngineError::Exited(msg) | EngineError::Protocol(msg) => {
                pw_common::Error::EngineProtocol(msg)
            }
            EngineError::Io(e) => pw_common::Error::Io(e),
        }
    }
}

/// A live binding between one capture file and one engine instance.
pub trait ScoringSession: Send {
    /// Pull and score exactly one unit.
    fn next_unit(&mut self) -> Result<NextUnit, EngineError>;

    /// Path of the capture file this session reads.
    fn source_path(&self) -> &Path;
}

/// Constructs scoring sessions.
pub trait EngineFactory: Send {
    /// Bind a new session to `source`.
    ///
    /// `resume_at` is the number of units of this file already consumed by
    /// earlier sessions; the new session must start at the unit after them.
    fn bind(
        &self,
        source: &CaptureSource,
        config: &ScoringConfig,
        resume_at: u64,
    ) -> Result<Box<dyn ScoringSession>, EngineError>;

    /// Short name for logs.
    fn name(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_unit_errors_keep_session() {
        assert!(EngineError::Unit("bad record".into()).is_unit_failure());
        assert!(!EngineError::Timeout(Duration::from_secs(1)).is_unit_failure());
        assert!(!EngineError::Exited("status 1".into()).is_unit_failure());
        assert!(!EngineError::Bind("bad header".into()).is_unit_failure());
    }

    #[test]
    fn test_engine_error_maps_to_common_codes() {
        let err: pw_common::Error = EngineError::Bind("bad header".into()).into();
        assert_eq!(err.code(), 30);
        let err: pw_common::Error = EngineError::Timeout(Duration::from_secs(30)).into();
        assert_eq!(err.code(), 32);
    }

    #[test]
    fn test_packet_meta_empty() {
        assert!(PacketMeta::default().is_empty());
        let meta = PacketMeta {
            protocol: Some("udp".into()),
            ..Default::default()
        };
        assert!(!meta.is_empty());
    }
}

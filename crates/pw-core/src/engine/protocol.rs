//! JSONL wire protocol spoken by scoring engines.
//!
//! One JSON object per line, tagged by `type`:
//!
//! ```text
//! {"type":"ready"}
//! {"type":"score","score":0.0213,"src":"10.0.0.4:51820","dst":"10.0.0.1:53","protocol":"udp"}
//! {"type":"end_of_stream"}
//! {"type":"error","message":"truncated record"}
//! {"type":"fatal","message":"bad pcap magic"}
//! ```
//!
//! The child-process engine writes these on stdout; the replay engine reads
//! them from a recorded file.

use super::{EngineError, NextUnit, PacketMeta};
use serde::{Deserialize, Serialize};

/// A single engine message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineMessage {
    /// Construction succeeded; the engine is waiting for requests.
    Ready,
    /// One scored unit.
    Score {
        score: f64,
        #[serde(flatten)]
        packet: PacketMeta,
    },
    /// No more units in the bound file.
    EndOfStream,
    /// The current unit could not be scored. The engine has moved past it.
    Error { message: String },
    /// The engine cannot continue with this source.
    Fatal { message: String },
}

impl EngineMessage {
    pub fn score(score: f64) -> Self {
        EngineMessage::Score {
            score,
            packet: PacketMeta::default(),
        }
    }

    /// Serialize as one protocol line, without the trailing newline.
    pub fn to_line(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Translate a unit-level message into the session result.
    ///
    /// `Ready` and `Fatal` are not valid answers to a unit request.
    pub fn into_unit(self) -> Result<NextUnit, EngineError> {
        match self {
            EngineMessage::Score { score, packet } => {
                if !score.is_finite() {
                    return Err(EngineError::Unit(format!("non-finite score {}", score)));
                }
                let packet = (!packet.is_empty()).then_some(packet);
                Ok(NextUnit::Scored { score, packet })
            }
            EngineMessage::EndOfStream => Ok(NextUnit::EndOfStream),
            EngineMessage::Error { message } => Err(EngineError::Unit(message)),
            EngineMessage::Fatal { message } => Err(EngineError::Exited(message)),
            EngineMessage::Ready => Err(EngineError::Protocol(
                "unexpected ready message mid-session".to_string(),
            )),
        }
    }
}

/// Parse one protocol line.
pub fn parse_message(line: &str) -> Result<EngineMessage, EngineError> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Err(EngineError::Protocol("empty line".to_string()));
    }
    serde_json::from_str(trimmed).map_err(|e| {
        EngineError::Protocol(format!("{}: {}", e, crate::logging::truncate_for_log(trimmed, 120)))
    })
}

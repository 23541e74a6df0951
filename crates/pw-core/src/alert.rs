//! Alert records and the append-only alert log.
//!
//! One [`AlertRecord`] per flagged unit, written as a JSON line to a log
//! separate from the trace log and flushed after every record. Each alert
//! is also mirrored into the trace log as a `warn` event.

use crate::engine::PacketMeta;
use crate::logging::event_names;
use crate::threshold::{Evaluation, PolicyKind};
use chrono::{SecondsFormat, Utc};
use pw_common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::warn;

/// A flagged unit. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRecord {
    /// Cumulative sequence number of the unit across all files.
    pub packet_id: u64,
    pub score: f64,
    pub threshold: f64,
    /// Standard deviations above the mean; absent for the static policy.
    pub deviation: Option<f64>,
    /// RFC 3339 wall-clock time with microseconds.
    pub timestamp: String,
    pub anomaly: bool,
    pub policy: PolicyKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dst: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
    pub source_file: PathBuf,
    pub session_id: String,
}

impl AlertRecord {
    pub fn new(
        packet_id: u64,
        evaluation: &Evaluation,
        packet: Option<&PacketMeta>,
        source_file: &Path,
        session_id: &str,
    ) -> Self {
        let packet = packet.cloned().unwrap_or_default();
        Self {
            packet_id,
            score: evaluation.score,
            threshold: evaluation.threshold,
            deviation: evaluation.deviation,
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true),
            anomaly: evaluation.anomalous,
            policy: evaluation.policy,
            src: packet.src,
            dst: packet.dst,
            protocol: packet.protocol,
            source_file: source_file.to_path_buf(),
            session_id: session_id.to_string(),
        }
    }

    pub fn to_jsonl(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Destination for alert records.
pub trait AlertSink: Send {
    fn write(&mut self, record: &AlertRecord) -> Result<()>;

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

/// JSONL alert log.
pub struct JsonlAlertLog<W: Write + Send> {
    writer: W,
}

impl<W: Write + Send> JsonlAlertLog<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl JsonlAlertLog<BufWriter<File>> {
    /// Open `path` for appending, creating the parent directory if needed.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| {
                    Error::AlertWrite(format!("cannot create {}: {}", parent.display(), e))
                })?;
            }
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| Error::AlertWrite(format!("cannot open {}: {}", path.display(), e)))?;
        Ok(Self::new(BufWriter::new(file)))
    }
}

impl<W: Write + Send> AlertSink for JsonlAlertLog<W> {
    fn write(&mut self, record: &AlertRecord) -> Result<()> {
        let mut line = record.to_jsonl();
        line.push('\n');
        self.writer
            .write_all(line.as_bytes())
            .and_then(|_| self.writer.flush())
            .map_err(|e| Error::AlertWrite(e.to_string()))
    }

    fn flush(&mut self) -> Result<()> {
        self.writer
            .flush()
            .map_err(|e| Error::AlertWrite(e.to_string()))
    }
}

/// Turns anomalous evaluations into alert records.
pub struct AlertEmitter {
    sink: Box<dyn AlertSink>,
    emitted: u64,
}

impl AlertEmitter {
    pub fn new(sink: Box<dyn AlertSink>) -> Self {
        Self { sink, emitted: 0 }
    }

    /// Emit a record if `evaluation` is anomalous.
    ///
    /// The trace-log mirror is written before the alert log, so an alert log
    /// failure never loses the alert entirely.
    pub fn emit(
        &mut self,
        packet_id: u64,
        evaluation: &Evaluation,
        packet: Option<&PacketMeta>,
        source_file: &Path,
        session_id: &str,
    ) -> Result<Option<AlertRecord>> {
        if !evaluation.anomalous {
            return Ok(None);
        }
        let record = AlertRecord::new(packet_id, evaluation, packet, source_file, session_id);
        warn!(
            event = event_names::ALERT_EMITTED,
            packet_id = record.packet_id,
            score = record.score,
            threshold = record.threshold,
            deviation = record.deviation,
            src = record.src.as_deref(),
            dst = record.dst.as_deref(),
            protocol = record.protocol.as_deref(),
            source_file = %record.source_file.display(),
            "anomaly detected"
        );
        self.sink.write(&record)?;
        self.emitted += 1;
        Ok(Some(record))
    }

    pub fn emitted(&self) -> u64 {
        self.emitted
    }

    pub fn flush(&mut self) -> Result<()> {
        self.sink.flush()
    }
}

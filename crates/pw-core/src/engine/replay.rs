//! Replay engine for recorded scores.
//!
//! Treats each capture file as a recording of engine output: one protocol
//! message per line, in the format of [`super::protocol`]. `score` and
//! `error` lines are units; `ready` lines are ignored; an `end_of_stream`
//! line or the end of the file ends the stream. A trailing line without a
//! newline is still being written and is not read until it is complete.
//!
//! Useful for re-running threshold policies over recorded scores and for
//! exercising the driver against real files.

use super::{parse_message, EngineError, EngineFactory, EngineMessage, NextUnit, ScoringSession};
use crate::config::ScoringConfig;
use crate::source::CaptureSource;
use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Clone, Default)]
pub struct ReplayEngineFactory;

impl ReplayEngineFactory {
    pub fn new() -> Self {
        Self
    }
}

impl EngineFactory for ReplayEngineFactory {
    fn bind(
        &self,
        source: &CaptureSource,
        _config: &ScoringConfig,
        resume_at: u64,
    ) -> Result<Box<dyn ScoringSession>, EngineError> {
        let file = File::open(&source.path)
            .map_err(|e| EngineError::Bind(format!("{}: {}", source.path.display(), e)))?;
        let mut session = ReplaySession {
            path: source.path.clone(),
            reader: BufReader::new(file),
            offset: 0,
            pending: None,
        };

        let mut skipped = 0;
        while skipped < resume_at {
            match session.next_message() {
                Ok(Some(EngineMessage::Score { .. })) | Ok(Some(EngineMessage::Error { .. })) => {
                    skipped += 1
                }
                Ok(Some(EngineMessage::Fatal { message })) => {
                    return Err(EngineError::Bind(message))
                }
                Ok(Some(_)) => {}
                Ok(None) => break,
                Err(e) if e.is_unit_failure() => skipped += 1,
                Err(e) => return Err(e),
            }
        }

        // A recording that starts with `fatal` is a rejected source.
        match session.next_message() {
            Ok(Some(EngineMessage::Fatal { message })) => return Err(EngineError::Bind(message)),
            Ok(other) => session.pending = other.map(Ok),
            Err(e) if e.is_unit_failure() => session.pending = Some(Err(e)),
            Err(e) => return Err(e),
        }

        debug!(path = %source.path.display(), resume_at, skipped, "replay session bound");
        Ok(Box::new(session))
    }

    fn name(&self) -> &'static str {
        "replay"
    }
}

struct ReplaySession {
    path: PathBuf,
    reader: BufReader<File>,
    /// Byte offset just past the last complete line read.
    offset: u64,
    /// First unit, read at bind time to detect a rejected recording.
    pending: Option<Result<EngineMessage, EngineError>>,
}

impl ReplaySession {
    fn next_message(&mut self) -> Result<Option<EngineMessage>, EngineError> {
        if let Some(pending) = self.pending.take() {
            return pending.map(Some);
        }
        loop {
            let mut line = String::new();
            let n = self.reader.read_line(&mut line)?;
            if n == 0 {
                return Ok(None);
            }
            if !line.ends_with('\n') {
                self.reader.seek(SeekFrom::Start(self.offset))?;
                return Ok(None);
            }
            self.offset += n as u64;
            if line.trim().is_empty() {
                continue;
            }
            // A corrupt line is one bad unit, not a broken session.
            match parse_message(&line).map_err(|e| EngineError::Unit(e.to_string()))? {
                EngineMessage::Ready => continue,
                msg => return Ok(Some(msg)),
            }
        }
    }
}

impl ScoringSession for ReplaySession {
    fn next_unit(&mut self) -> Result<NextUnit, EngineError> {
        match self.next_message()? {
            Some(msg) => msg.into_unit(),
            None => Ok(NextUnit::EndOfStream),
        }
    }

    fn source_path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::OpenOptions;
    use std::io::Write;
    use std::time::SystemTime;
    use tempfile::TempDir;

    fn write(path: &Path, body: &str) {
        std::fs::write(path, body).unwrap();
    }

    fn source(path: &Path) -> CaptureSource {
        CaptureSource::stat(path).unwrap()
    }

    fn drain(session: &mut Box<dyn ScoringSession>) -> Vec<f64> {
        let mut out = Vec::new();
        while let NextUnit::Scored { score, .. } = session.next_unit().unwrap() {
            out.push(score);
        }
        out
    }

    #[test]
    fn test_replays_scores_in_order() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.pcap");
        write(
            &path,
            "{\"type\":\"ready\"}\n{\"type\":\"score\",\"score\":0.1}\n\n{\"type\":\"score\",\"score\":0.2}\n",
        );
        let mut session = ReplayEngineFactory
            .bind(&source(&path), &ScoringConfig::default(), 0)
            .unwrap();
        assert_eq!(drain(&mut session), vec![0.1, 0.2]);
        // End of stream is sticky until the file grows.
        assert_eq!(session.next_unit().unwrap(), NextUnit::EndOfStream);
    }

    #[test]
    fn test_resume_skips_consumed_units() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.pcap");
        let body: String = (1..=5)
            .map(|i| format!("{{\"type\":\"score\",\"score\":{}}}\n", i))
            .collect();
        write(&path, &body);
        let mut session = ReplayEngineFactory
            .bind(&source(&path), &ScoringConfig::default(), 3)
            .unwrap();
        assert_eq!(drain(&mut session), vec![4.0, 5.0]);
    }

    #[test]
    fn test_resume_counts_failed_units() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.pcap");
        write(
            &path,
            "{\"type\":\"score\",\"score\":1}\n{\"type\":\"error\",\"message\":\"bad\"}\n{\"type\":\"score\",\"score\":3}\n",
        );
        let mut session = ReplayEngineFactory
            .bind(&source(&path), &ScoringConfig::default(), 2)
            .unwrap();
        assert_eq!(drain(&mut session), vec![3.0]);
    }

    #[test]
    fn test_partial_line_waits_for_newline() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.pcap");
        write(&path, "{\"type\":\"score\",\"score\":1}\n{\"type\":\"sco");
        let mut session = ReplayEngineFactory
            .bind(&source(&path), &ScoringConfig::default(), 0)
            .unwrap();
        assert_eq!(drain(&mut session), vec![1.0]);

        let mut f = OpenOptions::new().append(true).open(&path).unwrap();
        f.write_all(b"re\",\"score\":2}\n").unwrap();
        drop(f);
        assert_eq!(drain(&mut session), vec![2.0]);
    }

    #[test]
    fn test_fatal_header_rejects_source() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.pcap");
        write(&path, "{\"type\":\"fatal\",\"message\":\"bad pcap magic\"}\n");
        let err = ReplayEngineFactory
            .bind(&source(&path), &ScoringConfig::default(), 0)
            .err()
            .unwrap();
        assert!(matches!(err, EngineError::Bind(_)));
    }

    #[test]
    fn test_missing_file_rejects_source() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("gone.pcap");
        let src = CaptureSource {
            path: path.clone(),
            created: SystemTime::now(),
            size: 0,
            identity: Default::default(),
        };
        assert!(matches!(
            ReplayEngineFactory.bind(&src, &ScoringConfig::default(), 0),
            Err(EngineError::Bind(_))
        ));
    }

    #[test]
    fn test_corrupt_line_is_unit_failure() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.pcap");
        write(&path, "garbage\n{\"type\":\"score\",\"score\":2}\n");
        let mut session = ReplayEngineFactory
            .bind(&source(&path), &ScoringConfig::default(), 0)
            .unwrap();
        assert!(session.next_unit().unwrap_err().is_unit_failure());
        assert_eq!(drain(&mut session), vec![2.0]);
    }
}

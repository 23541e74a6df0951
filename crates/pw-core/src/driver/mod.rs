//! Stream driver: the control loop between capture files and the engine.
//!
//! The driver pulls one unit at a time from the bound scoring session,
//! hands each score to the threshold tracker and alert emitter, and decides
//! when to re-poll the resolver, re-bind a grown file, or switch to a
//! rotated one.
//!
//! ```text
//!   Idle ──(new/grown source, bind)──▶ Active ──(score)──▶ Active
//!    ▲  ◀──(same/none, wait)── Draining ◀──(end of stream)──┘
//!    │                            │
//!    └────────(wait)──────────────┘──(different source, bind)──▶ Active
//!
//!   any ──(shutdown | packet limit)──▶ Stopped
//! ```
//!
//! Progress through the current file is tracked as a count of units the
//! engine has moved past. A re-bind of the same (grown or interrupted) file
//! passes that count as the resume offset so no unit is scored twice;
//! the global sequence counter and the threshold statistics are never
//! reset by rotation.
//!
//! `step()` performs exactly one transition and never sleeps, which keeps
//! the state machine testable; `run()` loops over it and performs the
//! waits, sliced so a shutdown request is seen within ~100 ms.

mod state;

pub use state::{DriverState, MonitorState, RunSummary, Step, StopReason};

use state::{FileLedger, FileProgress};

use crate::alert::{AlertEmitter, AlertSink};
use crate::config::{DriverConfig, MonitorConfig, ScoringConfig};
use crate::engine::{EngineError, EngineFactory, NextUnit, PacketMeta, ScoringSession};
use crate::lifecycle::ShutdownFlag;
use crate::logging::event_names;
use crate::source::{CaptureSource, SourceResolver, UnusableSources};
use crate::threshold::{ThresholdTracker, Verdict};
use pw_common::{Error, Result, SessionId};
use pw_math::RunningStats;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, info_span, warn, Span};

/// Granularity of interruptible sleeps.
const SLEEP_SLICE: Duration = Duration::from_millis(100);

struct ActiveSession {
    id: SessionId,
    span: Span,
    session: Box<dyn ScoringSession>,
}

pub struct StreamDriver {
    resolver: SourceResolver,
    factory: Box<dyn EngineFactory>,
    scoring: ScoringConfig,
    settings: DriverConfig,
    tracker: ThresholdTracker,
    alerts: AlertEmitter,
    shutdown: ShutdownFlag,

    state: DriverState,
    monitor: MonitorState,
    session: Option<ActiveSession>,
    progress: Option<FileProgress>,
    earlier: FileLedger,
    unusable: UnusableSources,

    ever_found: bool,
    discovery_misses: u32,
    unit_failures: u32,
    unexpected_failures: u32,

    scores: RunningStats,
    post_grace: u64,
    sessions_bound: u64,
    rotations: u64,
    stop_reason: Option<StopReason>,
    started: Instant,
}

impl StreamDriver {
    /// Fails only when the directory pattern does not compile.
    pub fn new(
        config: &MonitorConfig,
        factory: Box<dyn EngineFactory>,
        sink: Box<dyn AlertSink>,
        shutdown: ShutdownFlag,
    ) -> Result<Self> {
        let resolver = SourceResolver::new(config.source.clone())
            .map_err(|e| Error::Config(format!("invalid source.pattern: {}", e)))?;
        Ok(Self {
            resolver,
            factory,
            scoring: config.scoring.clone(),
            settings: config.driver.clone(),
            tracker: ThresholdTracker::new(config.threshold.clone(), config.scoring.grace_units()),
            alerts: AlertEmitter::new(sink),
            shutdown,
            state: DriverState::Idle,
            monitor: MonitorState::default(),
            session: None,
            progress: None,
            earlier: FileLedger::default(),
            unusable: UnusableSources::new(),
            ever_found: false,
            discovery_misses: 0,
            unit_failures: 0,
            unexpected_failures: 0,
            scores: RunningStats::new(),
            post_grace: 0,
            sessions_bound: 0,
            rotations: 0,
            stop_reason: None,
            started: Instant::now(),
        })
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    pub fn monitor(&self) -> &MonitorState {
        &self.monitor
    }

    pub fn tracker(&self) -> &ThresholdTracker {
        &self.tracker
    }

    /// The file currently (or most recently) bound.
    pub fn current_source(&self) -> Option<&CaptureSource> {
        self.progress.as_ref().map(|p| &p.source)
    }

    /// Units of the current file already consumed.
    pub fn consumed_in_current(&self) -> u64 {
        self.progress.as_ref().map_or(0, |p| p.consumed)
    }

    pub fn alerts_emitted(&self) -> u64 {
        self.alerts.emitted()
    }

    /// Run until shutdown, packet limit, or a fatal error.
    pub fn run(&mut self) -> Result<RunSummary> {
        let outcome = loop {
            match self.step() {
                Ok(Step::Stopped) => break Ok(()),
                Ok(Step::Wait(delay)) => self.pause(delay),
                Ok(_) => {}
                Err(e) => break Err(e),
            }
        };
        if self.state != DriverState::Stopped {
            self.stop(StopReason::Failed);
        }
        outcome.map(|_| self.summary())
    }

    /// Perform one state transition.
    pub fn step(&mut self) -> Result<Step> {
        if self.state == DriverState::Stopped {
            return Ok(Step::Stopped);
        }
        if self.shutdown.is_requested() {
            info!(
                event = event_names::SHUTDOWN_REQUESTED,
                processed = self.monitor.processed,
                "shutdown requested, stopping"
            );
            self.stop(StopReason::Shutdown);
            return Ok(Step::Stopped);
        }
        if let Some(limit) = self.scoring.packet_limit {
            if self.monitor.processed >= limit {
                info!(
                    event = event_names::PACKET_LIMIT_REACHED,
                    limit,
                    "packet limit reached, stopping"
                );
                self.stop(StopReason::PacketLimit);
                return Ok(Step::Stopped);
            }
        }

        match self.state {
            DriverState::Idle => self.poll_idle(),
            DriverState::Active => self.pull_unit(),
            DriverState::Draining => self.poll_draining(),
            DriverState::Stopped => Ok(Step::Stopped),
        }
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary {
            processed: self.monitor.processed,
            alerts: self.alerts.emitted(),
            mean_score: (!self.scores.is_empty()).then(|| self.scores.mean()),
            max_score: self.scores.max(),
            evaluated: self.post_grace,
            final_threshold: self.tracker.current_threshold(),
            sessions_bound: self.sessions_bound,
            rotations: self.rotations,
            unusable_sources: self.unusable.len(),
            stop_reason: self.stop_reason,
            elapsed_secs: self.started.elapsed().as_secs_f64(),
        }
    }

    fn poll_idle(&mut self) -> Result<Step> {
        let Some(source) = self.resolver.resolve_excluding(&self.unusable) else {
            return self.on_not_found();
        };
        if !self.ever_found {
            info!(
                event = event_names::SOURCE_RESOLVED,
                path = %source.path.display(),
                size = source.size,
                "capture source found"
            );
            self.ever_found = true;
        }

        if self.is_unchanged(&source) {
            debug!(path = %source.path.display(), "capture source unchanged");
            return Ok(Step::Wait(self.settings.poll_interval()));
        }
        self.bind(source)
    }

    fn poll_draining(&mut self) -> Result<Step> {
        match self.resolver.resolve_excluding(&self.unusable) {
            Some(source) if !self.is_current(&source) && !self.is_unchanged(&source) => {
                self.close_session("rotated");
                self.bind(source)
            }
            _ => {
                self.close_session("drained");
                self.state = DriverState::Idle;
                Ok(Step::Wait(self.settings.poll_interval()))
            }
        }
    }

    fn is_current(&self, source: &CaptureSource) -> bool {
        self.progress
            .as_ref()
            .is_some_and(|p| p.source.same_file(source))
    }

    /// Progress recorded for this file, current or earlier in the run.
    fn known_progress(&self, source: &CaptureSource) -> Option<&FileProgress> {
        self.progress
            .as_ref()
            .filter(|p| p.source.same_file(source))
            .or_else(|| self.earlier.find(source))
    }

    /// Drained at this exact size already; nothing new to score.
    fn is_unchanged(&self, source: &CaptureSource) -> bool {
        self.known_progress(source)
            .is_some_and(|p| p.drained && p.source.size == source.size)
    }

    fn on_not_found(&mut self) -> Result<Step> {
        debug!(
            event = event_names::SOURCE_NOT_FOUND,
            location = %self.resolver.mode().location().display(),
            "no capture source available"
        );
        if !self.ever_found {
            self.discovery_misses += 1;
            if let Some(max) = self.settings.max_discovery_retries {
                if self.discovery_misses > max {
                    error!(
                        event = event_names::DISCOVERY_EXHAUSTED,
                        attempts = self.discovery_misses,
                        location = %self.resolver.mode().location().display(),
                        "no capture source found, giving up"
                    );
                    return Err(Error::DiscoveryExhausted {
                        attempts: self.discovery_misses,
                    });
                }
            }
        }
        Ok(Step::Wait(self.settings.poll_interval()))
    }

    /// Bind a session, continuing a known file where it left off.
    ///
    /// Progress is only replaced once the bind succeeds, so a rejected new
    /// file never costs the position in the old one.
    fn bind(&mut self, source: CaptureSource) -> Result<Step> {
        let resume_at = self
            .known_progress(&source)
            .filter(|p| source.size >= p.source.size)
            .map(|p| p.consumed);
        let current = self.is_current(&source);

        let id = SessionId::new();
        let span = info_span!("session", session_id = %id);
        let bound = span.in_scope(|| {
            self.factory.bind(&source, &self.scoring, resume_at.unwrap_or(0))
        });

        let session = match bound {
            Ok(session) => session,
            Err(e) => {
                error!(
                    event = event_names::SOURCE_UNUSABLE,
                    path = %source.path.display(),
                    error = %e,
                    "engine rejected capture source"
                );
                self.unusable.insert(&source);
                self.state = DriverState::Idle;
                self.note_unexpected(Error::SourceUnusable {
                    path: source.path.clone(),
                    reason: e.to_string(),
                })?;
                return Ok(Step::BindFailed);
            }
        };

        if current && resume_at.is_some() {
            if let Some(progress) = self.progress.as_mut() {
                progress.source.size = source.size;
                progress.drained = false;
            }
        } else {
            let resumed = self.earlier.take(&source).filter(|_| resume_at.is_some());
            if let Some(previous) = self.progress.take() {
                if previous.source.path == source.path {
                    info!(
                        event = event_names::SOURCE_REPLACED,
                        path = %source.path.display(),
                        previous_size = previous.source.size,
                        size = source.size,
                        "capture file replaced"
                    );
                } else {
                    info!(
                        event = event_names::ROTATION,
                        from = %previous.source.path.display(),
                        to = %source.path.display(),
                        "capture file rotated"
                    );
                }
                self.rotations += 1;
                if !previous.source.same_file(&source) {
                    self.earlier.remember(previous);
                }
            }
            let mut progress = resumed.unwrap_or_else(|| FileProgress::new(source.clone()));
            progress.source = source.clone();
            progress.drained = false;
            self.progress = Some(progress);
        }

        self.monitor.last_processed_size = source.size;
        self.sessions_bound += 1;
        self.unit_failures = 0;
        span.in_scope(|| {
            info!(
                event = event_names::SESSION_BOUND,
                path = %source.path.display(),
                size = source.size,
                resume_at = resume_at.unwrap_or(0),
                engine = self.factory.name(),
                "session bound"
            )
        });
        self.session = Some(ActiveSession { id, span, session });
        self.state = DriverState::Active;
        Ok(Step::Bound)
    }

    fn pull_unit(&mut self) -> Result<Step> {
        let Some(active) = self.session.as_mut() else {
            self.state = DriverState::Idle;
            return Ok(Step::Wait(Duration::ZERO));
        };
        let span = active.span.clone();
        let _entered = span.enter();
        let result = active.session.next_unit();

        match result {
            Ok(NextUnit::Scored { score, packet }) => self.on_score(score, packet),
            Ok(NextUnit::EndOfStream) => {
                if let Some(progress) = self.progress.as_mut() {
                    progress.drained = true;
                }
                info!(
                    event = event_names::STREAM_END,
                    consumed = self.consumed_in_current(),
                    processed = self.monitor.processed,
                    "end of capture reached"
                );
                self.state = DriverState::Draining;
                Ok(Step::EndOfStream)
            }
            Err(e) if e.is_unit_failure() => self.on_unit_failure(e),
            Err(e) => self.on_session_failure(e),
        }
    }

    fn on_score(&mut self, score: f64, packet: Option<PacketMeta>) -> Result<Step> {
        self.unit_failures = 0;
        if let Some(progress) = self.progress.as_mut() {
            progress.consumed += 1;
        }
        self.monitor.processed += 1;
        let sequence = self.monitor.processed;
        self.scores.push(score);

        let mut clean = true;
        match self.tracker.observe(sequence, score) {
            Verdict::Grace => {}
            Verdict::WarmingUp => self.post_grace += 1,
            Verdict::Evaluated(evaluation) => {
                self.post_grace += 1;
                let session_id = self.session.as_ref().map_or("", |s| s.id.as_str());
                let source_file = self
                    .progress
                    .as_ref()
                    .map(|p| p.source.path.as_path())
                    .unwrap_or_else(|| self.resolver.mode().location());
                let emitted = self.alerts.emit(
                    sequence,
                    &evaluation,
                    packet.as_ref(),
                    source_file,
                    session_id,
                );
                if let Err(e) = emitted {
                    error!(
                        event = event_names::ALERT_WRITE_FAILED,
                        packet_id = sequence,
                        error = %e,
                        "failed to write alert"
                    );
                    clean = false;
                    self.note_unexpected(e)?;
                }
            }
        }
        if clean {
            self.unexpected_failures = 0;
        }

        if sequence % self.settings.progress_every.max(1) == 0 {
            info!(
                event = event_names::PROGRESS,
                processed = sequence,
                alerts = self.alerts.emitted(),
                "processed {} packets",
                sequence
            );
        }
        Ok(Step::Unit)
    }

    fn on_unit_failure(&mut self, err: EngineError) -> Result<Step> {
        self.unit_failures += 1;
        // The engine has moved past the failed unit.
        if let Some(progress) = self.progress.as_mut() {
            progress.consumed += 1;
        }
        error!(
            event = event_names::UNIT_FAILED,
            error = %err,
            consecutive = self.unit_failures,
            "failed to score unit"
        );
        if self.unit_failures >= self.settings.max_unit_failures {
            warn!(
                event = event_names::SESSION_STUCK,
                failures = self.unit_failures,
                "dropping session after repeated unit failures"
            );
            self.close_session("stuck");
            self.state = DriverState::Idle;
            self.note_unexpected(err.into())?;
        }
        Ok(Step::Wait(self.settings.unit_retry_backoff()))
    }

    fn on_session_failure(&mut self, err: EngineError) -> Result<Step> {
        error!(
            event = event_names::SESSION_FAILED,
            error = %err,
            consumed = self.consumed_in_current(),
            "scoring session failed"
        );
        self.close_session("failed");
        self.state = DriverState::Idle;
        self.note_unexpected(err.into())?;
        Ok(Step::Wait(self.settings.poll_interval()))
    }

    /// Count a failure; too many in a row is fatal.
    fn note_unexpected(&mut self, err: Error) -> Result<()> {
        self.unexpected_failures += 1;
        if self.unexpected_failures >= self.settings.max_unexpected_failures {
            return Err(Error::RepeatedFailure {
                count: self.unexpected_failures,
                last: err.to_string(),
            });
        }
        Ok(())
    }

    fn close_session(&mut self, reason: &str) {
        if let Some(active) = self.session.take() {
            active.span.in_scope(|| {
                debug!(
                    event = event_names::SESSION_CLOSED,
                    path = %active.session.source_path().display(),
                    reason,
                    "session closed"
                )
            });
        }
    }

    fn stop(&mut self, reason: StopReason) {
        self.close_session("stopped");
        if let Err(e) = self.alerts.flush() {
            error!(error = %e, "failed to flush alert log");
        }
        self.state = DriverState::Stopped;
        self.stop_reason = Some(reason);
    }

    fn pause(&self, delay: Duration) {
        let deadline = Instant::now() + delay;
        loop {
            if self.shutdown.is_requested() {
                return;
            }
            let now = Instant::now();
            if now >= deadline {
                return;
            }
            std::thread::sleep(SLEEP_SLICE.min(deadline - now));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::AlertRecord;
    use crate::config::EngineKind;
    use crate::engine::ReplayEngineFactory;
    use crate::source::SourceMode;
    use crate::threshold::ThresholdPolicy;
    use std::fs::{self, OpenOptions};
    use std::io::Write;
    use std::path::Path;
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    #[derive(Clone, Default)]
    struct SharedSink(Arc<Mutex<Vec<AlertRecord>>>);

    impl AlertSink for SharedSink {
        fn write(&mut self, record: &AlertRecord) -> Result<()> {
            self.0.lock().unwrap().push(record.clone());
            Ok(())
        }
    }

    fn score_lines(scores: &[f64]) -> String {
        scores
            .iter()
            .map(|s| format!("{{\"type\":\"score\",\"score\":{}}}\n", s))
            .collect()
    }

    fn append(path: &Path, body: &str) {
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .unwrap();
        f.write_all(body.as_bytes()).unwrap();
    }

    fn config(source: SourceMode, grace: u64) -> MonitorConfig {
        let mut config = MonitorConfig::default();
        config.source = source;
        config.engine.kind = EngineKind::Replay;
        config.scoring.fm_grace = grace;
        config.scoring.ad_grace = 0;
        config.threshold = ThresholdPolicy::Static { threshold: 0.5 };
        config.driver.poll_interval_ms = 0;
        config.driver.unit_retry_backoff_ms = 0;
        config.driver.max_discovery_retries = Some(3);
        config
    }

    fn driver(config: &MonitorConfig) -> (StreamDriver, SharedSink, ShutdownFlag) {
        let sink = SharedSink::default();
        let shutdown = ShutdownFlag::new();
        let driver = StreamDriver::new(
            config,
            Box::new(ReplayEngineFactory::new()),
            Box::new(sink.clone()),
            shutdown.clone(),
        )
        .unwrap();
        (driver, sink, shutdown)
    }

    /// Step until the driver stops consuming and reaches `Idle` or `Stopped`.
    fn settle(driver: &mut StreamDriver) {
        for _ in 0..10_000 {
            match driver.step().unwrap() {
                Step::Wait(_) if driver.state() == DriverState::Idle => return,
                Step::Stopped => return,
                _ => {}
            }
        }
        panic!("driver did not settle");
    }

    #[test]
    fn test_idle_until_file_appears() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("current.pcap");
        let cfg = config(SourceMode::File { path: path.clone() }, 0);
        let (mut driver, _, _) = driver(&cfg);

        assert!(matches!(driver.step().unwrap(), Step::Wait(_)));
        assert_eq!(driver.state(), DriverState::Idle);

        fs::write(&path, score_lines(&[0.1, 0.2])).unwrap();
        assert_eq!(driver.step().unwrap(), Step::Bound);
        assert_eq!(driver.state(), DriverState::Active);
        assert_eq!(driver.step().unwrap(), Step::Unit);
        assert_eq!(driver.step().unwrap(), Step::Unit);
        assert_eq!(driver.step().unwrap(), Step::EndOfStream);
        assert_eq!(driver.state(), DriverState::Draining);
        assert!(matches!(driver.step().unwrap(), Step::Wait(_)));
        assert_eq!(driver.state(), DriverState::Idle);
        assert_eq!(driver.monitor().processed, 2);
    }

    #[test]
    fn test_discovery_budget_exhausted() {
        let dir = TempDir::new().unwrap();
        let cfg = config(
            SourceMode::File {
                path: dir.path().join("never.pcap"),
            },
            0,
        );
        let (mut driver, _, _) = driver(&cfg);
        for _ in 0..3 {
            assert!(matches!(driver.step().unwrap(), Step::Wait(_)));
        }
        let err = driver.step().unwrap_err();
        assert!(matches!(err, Error::DiscoveryExhausted { attempts: 4 }));
    }

    #[test]
    fn test_unchanged_file_is_not_rebound() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("current.pcap");
        fs::write(&path, score_lines(&[0.1; 5])).unwrap();
        let cfg = config(SourceMode::File { path: path.clone() }, 0);
        let (mut driver, _, _) = driver(&cfg);

        settle(&mut driver);
        assert_eq!(driver.monitor().processed, 5);
        for _ in 0..5 {
            assert!(matches!(driver.step().unwrap(), Step::Wait(_)));
        }
        assert_eq!(driver.summary().sessions_bound, 1);
    }

    #[test]
    fn test_grown_file_resumes_without_duplicates() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("current.pcap");
        fs::write(&path, score_lines(&[0.1, 0.2, 0.3])).unwrap();
        let cfg = config(SourceMode::File { path: path.clone() }, 0);
        let (mut driver, sink, _) = driver(&cfg);

        settle(&mut driver);
        assert_eq!(driver.monitor().processed, 3);

        // The appended unit is anomalous; exactly it must alert.
        append(&path, &score_lines(&[0.9, 0.1]));
        settle(&mut driver);
        assert_eq!(driver.monitor().processed, 5);
        assert_eq!(driver.summary().sessions_bound, 2);
        assert_eq!(driver.summary().rotations, 0);

        let alerts = sink.0.lock().unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].packet_id, 4);
    }

    #[test]
    fn test_replaced_file_starts_over() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("current.pcap");
        fs::write(&path, score_lines(&[0.1; 4])).unwrap();
        let cfg = config(SourceMode::File { path: path.clone() }, 0);
        let (mut driver, _, _) = driver(&cfg);
        settle(&mut driver);

        fs::remove_file(&path).unwrap();
        fs::write(&path, score_lines(&[0.1; 2])).unwrap();
        settle(&mut driver);
        // Smaller file at the same path: all of it is new.
        assert_eq!(driver.monitor().processed, 6);
        assert_eq!(driver.consumed_in_current(), 2);
    }

    #[test]
    fn test_truncated_in_place_restarts_from_zero() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("current.pcap");
        fs::write(&path, score_lines(&[0.1; 4])).unwrap();
        let cfg = config(SourceMode::File { path: path.clone() }, 0);
        let (mut driver, sink, _) = driver(&cfg);
        settle(&mut driver);
        assert_eq!(driver.consumed_in_current(), 4);
        let identity = driver.current_source().unwrap().identity;

        // Same inode, fewer units: the writer restarted the file.
        let mut f = OpenOptions::new()
            .write(true)
            .truncate(true)
            .open(&path)
            .unwrap();
        f.write_all(score_lines(&[0.1, 0.9]).as_bytes()).unwrap();
        drop(f);

        assert_eq!(driver.step().unwrap(), Step::Bound);
        assert_eq!(driver.consumed_in_current(), 0);
        assert_eq!(driver.current_source().unwrap().identity, identity);
        settle(&mut driver);
        assert_eq!(driver.monitor().processed, 6);
        assert_eq!(driver.consumed_in_current(), 2);
        let alerts = sink.0.lock().unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].packet_id, 6);
    }

    #[test]
    fn test_rejected_file_retried_after_rewrite() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("current.pcap");
        fs::write(&path, "{\"type\":\"fatal\",\"message\":\"short header\"}\n").unwrap();
        let cfg = config(SourceMode::File { path: path.clone() }, 0);
        let (mut driver, _, _) = driver(&cfg);
        assert_eq!(driver.step().unwrap(), Step::BindFailed);
        assert!(matches!(driver.step().unwrap(), Step::Wait(_)));

        // The writer rewrites the same inode with a complete capture.
        let mut f = OpenOptions::new()
            .write(true)
            .truncate(true)
            .open(&path)
            .unwrap();
        f.write_all(score_lines(&[0.1; 50]).as_bytes()).unwrap();
        drop(f);

        settle(&mut driver);
        assert_eq!(driver.monitor().processed, 50);
        assert_eq!(driver.summary().sessions_bound, 1);
    }

    #[test]
    fn test_bind_failures_report_unusable_source() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("current.pcap");
        fs::write(&path, "{\"type\":\"fatal\",\"message\":\"bad magic\"}\n").unwrap();
        let mut cfg = config(SourceMode::File { path: path.clone() }, 0);
        cfg.driver.max_unexpected_failures = 1;
        let (mut driver, _, _) = driver(&cfg);
        let err = driver.step().unwrap_err();
        let Error::RepeatedFailure { count, last } = err else {
            panic!("expected a repeated failure, got {:?}", err);
        };
        assert_eq!(count, 1);
        assert!(last.contains("capture source unusable"));
        assert!(last.contains("current.pcap"));
        assert!(last.contains("bad magic"));
    }

    #[test]
    fn test_rotation_keeps_global_sequence() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.pcap"), score_lines(&[0.1; 3])).unwrap();
        let cfg = config(
            SourceMode::Directory {
                dir: dir.path().to_path_buf(),
                pattern: "*.pcap".to_string(),
            },
            0,
        );
        let (mut driver, sink, _) = driver(&cfg);
        settle(&mut driver);
        assert_eq!(driver.monitor().processed, 3);

        std::thread::sleep(Duration::from_millis(20));
        fs::write(dir.path().join("b.pcap"), score_lines(&[0.1, 0.8])).unwrap();
        settle(&mut driver);

        assert_eq!(driver.monitor().processed, 5);
        assert_eq!(driver.summary().rotations, 1);
        let alerts = sink.0.lock().unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].packet_id, 5);
        assert!(alerts[0].source_file.ends_with("b.pcap"));
    }

    #[test]
    fn test_rejected_source_marked_unusable() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.pcap"), score_lines(&[0.1; 2])).unwrap();
        std::thread::sleep(Duration::from_millis(20));
        fs::write(
            dir.path().join("b.pcap"),
            "{\"type\":\"fatal\",\"message\":\"bad pcap magic\"}\n",
        )
        .unwrap();
        let cfg = config(
            SourceMode::Directory {
                dir: dir.path().to_path_buf(),
                pattern: "*.pcap".to_string(),
            },
            0,
        );
        let (mut driver, _, _) = driver(&cfg);

        assert_eq!(driver.step().unwrap(), Step::BindFailed);
        assert_eq!(driver.step().unwrap(), Step::Bound);
        assert!(driver.current_source().unwrap().path.ends_with("a.pcap"));
        settle(&mut driver);
        assert_eq!(driver.monitor().processed, 2);
        assert_eq!(driver.summary().unusable_sources, 1);
    }

    #[test]
    fn test_unit_failures_are_skipped() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("current.pcap");
        let body = format!(
            "{}{{\"type\":\"error\",\"message\":\"truncated\"}}\n{}",
            score_lines(&[0.1]),
            score_lines(&[0.2])
        );
        fs::write(&path, body).unwrap();
        let cfg = config(SourceMode::File { path }, 0);
        let (mut driver, _, _) = driver(&cfg);
        settle(&mut driver);
        assert_eq!(driver.monitor().processed, 2);
        assert_eq!(driver.consumed_in_current(), 3);
        assert_eq!(driver.summary().sessions_bound, 1);
    }

    #[test]
    fn test_stuck_session_dropped_after_cap() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("current.pcap");
        let mut body = String::new();
        for _ in 0..5 {
            body.push_str("{\"type\":\"error\",\"message\":\"bad\"}\n");
        }
        body.push_str(&score_lines(&[0.1]));
        fs::write(&path, body).unwrap();
        let cfg = config(SourceMode::File { path }, 0);
        let (mut driver, _, _) = driver(&cfg);
        settle(&mut driver);
        assert_eq!(driver.monitor().processed, 0);
        assert_eq!(driver.consumed_in_current(), 5);
        // Dropped after five failures, re-bound past them.
        settle(&mut driver);
        assert_eq!(driver.monitor().processed, 1);
        assert_eq!(driver.summary().sessions_bound, 2);
    }

    #[test]
    fn test_shutdown_stops_between_units() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("current.pcap");
        fs::write(&path, score_lines(&[0.1; 10])).unwrap();
        let cfg = config(SourceMode::File { path }, 0);
        let (mut driver, _, shutdown) = driver(&cfg);

        assert_eq!(driver.step().unwrap(), Step::Bound);
        assert_eq!(driver.step().unwrap(), Step::Unit);
        shutdown.request();
        assert_eq!(driver.step().unwrap(), Step::Stopped);
        assert_eq!(driver.state(), DriverState::Stopped);
        assert_eq!(driver.monitor().processed, 1);
        // Terminal: nothing is bound again.
        assert_eq!(driver.step().unwrap(), Step::Stopped);
        assert_eq!(driver.summary().stop_reason, Some(StopReason::Shutdown));
    }

    #[test]
    fn test_packet_limit_stops_run() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("current.pcap");
        fs::write(&path, score_lines(&[0.1; 10])).unwrap();
        let mut cfg = config(SourceMode::File { path }, 0);
        cfg.scoring.packet_limit = Some(4);
        let (mut driver, _, _) = driver(&cfg);
        let summary = driver.run().unwrap();
        assert_eq!(summary.processed, 4);
        assert_eq!(summary.stop_reason, Some(StopReason::PacketLimit));
    }

    #[test]
    fn test_grace_units_never_alert() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("current.pcap");
        fs::write(&path, score_lines(&[9.0, 9.0, 9.0, 0.1, 9.0])).unwrap();
        let cfg = config(SourceMode::File { path }, 3);
        let (mut driver, sink, _) = driver(&cfg);
        settle(&mut driver);
        let ids: Vec<u64> = sink.0.lock().unwrap().iter().map(|a| a.packet_id).collect();
        assert_eq!(ids, vec![5]);
        assert_eq!(driver.summary().evaluated, 2);
    }

    #[test]
    fn test_summary_scores() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("current.pcap");
        fs::write(&path, score_lines(&[0.1, 0.3])).unwrap();
        let cfg = config(SourceMode::File { path }, 0);
        let (mut driver, _, _) = driver(&cfg);
        settle(&mut driver);
        let summary = driver.summary();
        assert!((summary.mean_score.unwrap() - 0.2).abs() < 1e-12);
        assert_eq!(summary.max_score, Some(0.3));
        assert_eq!(summary.final_threshold, Some(0.5));
    }
}

//! Child-process scoring engine.
//!
//! Each session spawns the configured engine command with the capture path
//! and scoring parameters as arguments, waits for a `ready` line, and then
//! requests one unit at a time by writing `next` to the child's stdin.
//!
//! Stdout is drained by a reader thread into a channel so every wait can be
//! bounded with `recv_timeout`. A request that is not answered within the
//! watchdog timeout kills the child (SIGTERM, then SIGKILL after a grace
//! period) and surfaces [`EngineError::Timeout`].

use super::{parse_message, EngineError, EngineFactory, EngineMessage, NextUnit, ScoringSession};
use crate::config::{EngineConfig, ScoringConfig};
use crate::source::CaptureSource;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::Duration;
use tracing::{debug, error, trace, warn};

/// Grace period between SIGTERM and SIGKILL.
const SIGTERM_GRACE_MS: u64 = 500;

/// Spawns one engine process per session.
#[derive(Debug, Clone)]
pub struct CommandEngineFactory {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandEngineFactory {
    pub fn new(program: impl Into<String>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args,
            timeout,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(
            config.command.clone(),
            config.args.clone(),
            Duration::from_secs(config.timeout_secs),
        )
    }

    /// Arguments passed after the configured ones.
    pub fn session_args(
        source: &CaptureSource,
        config: &ScoringConfig,
        resume_at: u64,
    ) -> Vec<String> {
        let mut args = vec![
            "--source".to_string(),
            source.path.display().to_string(),
        ];
        if let Some(limit) = config.packet_limit {
            args.push("--packet-limit".to_string());
            args.push(limit.to_string());
        }
        args.extend([
            "--max-ae".to_string(),
            config.max_ae.to_string(),
            "--fm-grace".to_string(),
            config.fm_grace.to_string(),
            "--ad-grace".to_string(),
            config.ad_grace.to_string(),
            "--learning-rate".to_string(),
            config.learning_rate.to_string(),
            "--hidden-ratio".to_string(),
            config.hidden_ratio.to_string(),
            "--resume-at".to_string(),
            resume_at.to_string(),
        ]);
        args
    }
}

impl EngineFactory for CommandEngineFactory {
    fn bind(
        &self,
        source: &CaptureSource,
        config: &ScoringConfig,
        resume_at: u64,
    ) -> Result<Box<dyn ScoringSession>, EngineError> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .args(Self::session_args(source, config, resume_at))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());

        let mut child = cmd.spawn().map_err(|e| {
            error!(command = %self.program, error = %e, "failed to spawn engine");
            EngineError::Bind(format!("failed to spawn {}: {}", self.program, e))
        })?;
        debug!(pid = child.id(), command = %self.program, resume_at, "engine spawned");

        let stdin = child.stdin.take();
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| EngineError::Bind("engine stdout unavailable".to_string()))?;

        // The reader is detached: an orphaned grandchild may keep stdout
        // open after the engine itself is gone.
        let (tx, rx) = mpsc::channel();
        thread::Builder::new()
            .name("engine-stdout".to_string())
            .spawn(move || {
                for line in BufReader::new(stdout).lines() {
                    if tx.send(line).is_err() {
                        break;
                    }
                }
            })
            .map_err(EngineError::Io)?;

        let mut session = CommandSession {
            path: source.path.clone(),
            child,
            stdin,
            lines: rx,
            timeout: self.timeout,
        };

        let greeting = session
            .recv()
            .map_err(|e| EngineError::Bind(format!("engine failed to start: {}", e)))?;
        match greeting {
            EngineMessage::Ready => Ok(Box::new(session)),
            EngineMessage::Fatal { message } => Err(EngineError::Bind(message)),
            other => Err(EngineError::Bind(format!(
                "expected ready, engine sent {}",
                other.to_line()
            ))),
        }
    }

    fn name(&self) -> &'static str {
        "command"
    }
}

/// One running engine process.
struct CommandSession {
    path: PathBuf,
    child: Child,
    stdin: Option<ChildStdin>,
    lines: Receiver<std::io::Result<String>>,
    timeout: Duration,
}

impl CommandSession {
    /// Wait for the next protocol message, bounded by the watchdog.
    fn recv(&mut self) -> Result<EngineMessage, EngineError> {
        loop {
            match self.lines.recv_timeout(self.timeout) {
                Ok(Ok(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    trace!(line = %line, "engine line");
                    return parse_message(&line);
                }
                Ok(Err(e)) => return Err(EngineError::Io(e)),
                Err(RecvTimeoutError::Timeout) => {
                    warn!(
                        pid = self.child.id(),
                        timeout_ms = self.timeout.as_millis() as u64,
                        "engine watchdog expired"
                    );
                    self.terminate();
                    return Err(EngineError::Timeout(self.timeout));
                }
                Err(RecvTimeoutError::Disconnected) => {
                    let status = self
                        .child
                        .wait()
                        .map(|s| s.to_string())
                        .unwrap_or_else(|e| e.to_string());
                    return Err(EngineError::Exited(status));
                }
            }
        }
    }

    fn terminate(&mut self) {
        self.stdin.take();
        if let Ok(None) = self.child.try_wait() {
            kill_with_grace(&mut self.child);
        }
    }
}

impl ScoringSession for CommandSession {
    fn next_unit(&mut self) -> Result<NextUnit, EngineError> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| EngineError::Exited("session already terminated".to_string()))?;
        if let Err(e) = stdin.write_all(b"next\n").and_then(|_| stdin.flush()) {
            return Err(EngineError::Exited(format!("request failed: {}", e)));
        }
        self.recv()?.into_unit()
    }

    fn source_path(&self) -> &Path {
        &self.path
    }
}

impl Drop for CommandSession {
    fn drop(&mut self) {
        // Closing stdin lets a well-behaved engine exit on its own.
        self.stdin.take();
        match self.child.try_wait() {
            Ok(Some(_)) => {}
            Ok(None) => {
                thread::sleep(Duration::from_millis(50));
                if let Ok(None) = self.child.try_wait() {
                    kill_with_grace(&mut self.child);
                }
            }
            Err(e) => error!(error = %e, "failed to check engine status"),
        }
    }
}

#[cfg(unix)]
fn kill_with_grace(child: &mut Child) {
    let pid = child.id() as i32;

    unsafe {
        libc::kill(pid, libc::SIGTERM);
    }
    debug!(pid, "sent SIGTERM to engine");

    thread::sleep(Duration::from_millis(SIGTERM_GRACE_MS));

    match child.try_wait() {
        Ok(Some(_)) => {
            trace!(pid, "engine exited after SIGTERM");
        }
        Ok(None) => {
            warn!(pid, "engine did not exit after SIGTERM, sending SIGKILL");
            unsafe {
                libc::kill(pid, libc::SIGKILL);
            }
            let _ = child.wait();
        }
        Err(e) => {
            error!(pid, error = %e, "failed to check engine status");
        }
    }
}

#[cfg(not(unix))]
fn kill_with_grace(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

//! Driver states, step outcomes and run summaries.

use crate::source::CaptureSource;
use serde::Serialize;
use std::collections::VecDeque;
use std::time::Duration;

/// Stream driver state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DriverState {
    /// No bound session; polling the resolver.
    Idle,
    /// A session is bound and producing units.
    Active,
    /// The bound session reached end-of-stream; looking for rotation.
    Draining,
    /// Terminal. No session will be bound again.
    Stopped,
}

/// What a single [`super::StreamDriver::step`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// One unit was consumed.
    Unit,
    /// A session was bound.
    Bound,
    /// The engine rejected a source; re-poll without waiting.
    BindFailed,
    /// The bound session reached end-of-stream.
    EndOfStream,
    /// Nothing to do until the given delay has passed.
    Wait(Duration),
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Shutdown,
    PacketLimit,
    Failed,
}

/// Counters owned by the driver.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MonitorState {
    /// Units processed across all files; also the last sequence number.
    pub processed: u64,
    /// Size of the bound file when its current session was bound.
    pub last_processed_size: u64,
}

/// Progress through the current file.
#[derive(Debug, Clone)]
pub(crate) struct FileProgress {
    /// The file, with its size as of the last bind.
    pub source: CaptureSource,
    /// Units the engine has moved past, scored or failed.
    pub consumed: u64,
    /// Whether the last session reached end-of-stream at `source.size`.
    pub drained: bool,
}

impl FileProgress {
    pub fn new(source: CaptureSource) -> Self {
        Self {
            source,
            consumed: 0,
            drained: false,
        }
    }
}

/// Files bound earlier in the run.
const MAX_REMEMBERED_FILES: usize = 64;

/// Progress of files the driver has moved away from.
///
/// Lets a file that becomes the newest again (the newer one was deleted)
/// resume where it left off instead of being scored from the start.
/// Bounded; the oldest entry is evicted first.
#[derive(Debug, Default)]
pub(crate) struct FileLedger {
    entries: VecDeque<FileProgress>,
}

impl FileLedger {
    pub fn find(&self, source: &CaptureSource) -> Option<&FileProgress> {
        self.entries.iter().find(|p| p.source.same_file(source))
    }

    pub fn take(&mut self, source: &CaptureSource) -> Option<FileProgress> {
        let index = self.entries.iter().position(|p| p.source.same_file(source))?;
        self.entries.remove(index)
    }

    pub fn remember(&mut self, progress: FileProgress) {
        self.entries.retain(|p| !p.source.same_file(&progress.source));
        if self.entries.len() >= MAX_REMEMBERED_FILES {
            self.entries.pop_front();
        }
        self.entries.push_back(progress);
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Final report of a monitor run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub processed: u64,
    pub alerts: u64,
    pub mean_score: Option<f64>,
    pub max_score: Option<f64>,
    /// Post-grace scores folded into the threshold statistics.
    pub evaluated: u64,
    pub final_threshold: Option<f64>,
    pub sessions_bound: u64,
    pub rotations: u64,
    pub unusable_sources: usize,
    pub stop_reason: Option<StopReason>,
    pub elapsed_secs: f64,
}

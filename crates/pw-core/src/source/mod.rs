//! Capture source resolution.
//!
//! Answers "which capture file should be processed now?" for either a
//! single fixed path or the newest file matching a pattern in a directory.
//! Resolution is read-only and idempotent: two calls with no filesystem
//! change in between return equivalent sources.

mod glob;

pub use glob::FilePattern;

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::debug;

/// Unusable entries remembered before the oldest is forgotten.
const MAX_UNUSABLE: usize = 64;

/// Distinguishes a file from a later file at the same path.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct FileIdentity {
    /// Inode number on unix, zero elsewhere.
    pub inode: u64,
    /// Birth time, where the filesystem records it.
    pub born: Option<SystemTime>,
}

/// A capture file as observed at resolution time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureSource {
    pub path: PathBuf,
    /// Creation time, or modification time where the filesystem does not
    /// record creation. Used for ordering.
    pub created: SystemTime,
    /// Size in bytes at resolution time.
    pub size: u64,
    pub identity: FileIdentity,
}

impl CaptureSource {
    /// Stat `path` into a source. Directories and vanished files yield `None`.
    pub fn stat(path: &Path) -> Option<Self> {
        let meta = match fs::metadata(path) {
            Ok(meta) => meta,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "capture source not readable");
                return None;
            }
        };
        if !meta.is_file() {
            return None;
        }
        let born = meta.created().ok();
        let created = born
            .or_else(|| meta.modified().ok())
            .unwrap_or(SystemTime::UNIX_EPOCH);
        Some(Self {
            path: path.to_path_buf(),
            created,
            size: meta.len(),
            identity: FileIdentity {
                inode: inode_of(&meta),
                born,
            },
        })
    }

    /// Whether `other` is the same file, ignoring growth.
    ///
    /// A path reused by a new file (new inode or birth time) is a
    /// different file.
    pub fn same_file(&self, other: &CaptureSource) -> bool {
        self.path == other.path && self.identity == other.identity
    }
}

#[cfg(unix)]
fn inode_of(meta: &fs::Metadata) -> u64 {
    use std::os::unix::fs::MetadataExt;
    meta.ino()
}

#[cfg(not(unix))]
fn inode_of(_meta: &fs::Metadata) -> u64 {
    0
}

/// How capture files are located.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum SourceMode {
    /// One fixed path, re-read as it grows.
    File { path: PathBuf },
    /// The newest file in `dir` whose name matches `pattern`.
    Directory { dir: PathBuf, pattern: String },
}

impl SourceMode {
    /// The path or directory being watched.
    pub fn location(&self) -> &Path {
        match self {
            SourceMode::File { path } => path,
            SourceMode::Directory { dir, .. } => dir,
        }
    }
}

/// Sources that failed to bind, keyed by path, file identity and size.
///
/// A file that changes size after being rejected (a header flushed late, a
/// rewrite in place) is offered again. Bounded; the oldest entry is
/// evicted first.
#[derive(Debug, Default, Clone)]
pub struct UnusableSources {
    entries: VecDeque<(PathBuf, FileIdentity, u64)>,
}

impl UnusableSources {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, source: &CaptureSource) {
        if self.contains(source) {
            return;
        }
        if self.entries.len() >= MAX_UNUSABLE {
            self.entries.pop_front();
        }
        self.entries
            .push_back((source.path.clone(), source.identity, source.size));
    }

    pub fn contains(&self, source: &CaptureSource) -> bool {
        self.entries.iter().any(|(path, identity, size)| {
            *path == source.path && *identity == source.identity && *size == source.size
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Resolves the current capture source.
#[derive(Debug, Clone)]
pub struct SourceResolver {
    mode: SourceMode,
    /// Compiled `pattern` of directory mode.
    pattern: Option<FilePattern>,
}

impl SourceResolver {
    /// Fails only when the directory pattern cannot be compiled.
    pub fn new(mode: SourceMode) -> Result<Self, regex::Error> {
        let pattern = match &mode {
            SourceMode::File { .. } => None,
            SourceMode::Directory { pattern, .. } => Some(FilePattern::new(pattern)?),
        };
        Ok(Self { mode, pattern })
    }

    pub fn mode(&self) -> &SourceMode {
        &self.mode
    }

    /// The current source, or `None` when nothing usable exists yet.
    pub fn resolve(&self) -> Option<CaptureSource> {
        self.resolve_excluding(&UnusableSources::default())
    }

    /// Like [`resolve`](Self::resolve), skipping sources known to be unusable.
    pub fn resolve_excluding(&self, unusable: &UnusableSources) -> Option<CaptureSource> {
        match (&self.mode, &self.pattern) {
            (SourceMode::File { path }, _) => {
                CaptureSource::stat(path).filter(|s| !unusable.contains(s))
            }
            (SourceMode::Directory { dir, .. }, Some(pattern)) => {
                newest_in(dir, pattern, unusable)
            }
            (SourceMode::Directory { .. }, None) => None,
        }
    }
}

/// Newest matching file; ties on creation time go to the greatest path.
fn newest_in(
    dir: &Path,
    pattern: &FilePattern,
    unusable: &UnusableSources,
) -> Option<CaptureSource> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            debug!(dir = %dir.display(), error = %e, "capture directory not readable");
            return None;
        }
    };

    entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| {
            entry
                .file_name()
                .to_str()
                .map(|name| pattern.is_match(name))
                .unwrap_or(false)
        })
        .filter_map(|entry| CaptureSource::stat(&entry.path()))
        .filter(|source| !unusable.contains(source))
        .max_by(|a, b| a.created.cmp(&b.created).then_with(|| a.path.cmp(&b.path)))
}

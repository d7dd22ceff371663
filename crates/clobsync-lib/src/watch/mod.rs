//! Filesystem observation
//!
//! The [`DirectoryWatcher`] turns OS notifications into [`RawChangeEvent`]s
//! and keeps a [`WatchedDirectory`] mirror of the root. The [`ChangeDebouncer`]
//! coalesces bursts of raw events per path into one [`DebouncedChangeEvent`].
//!
//! ```text
//! notify ──> EventTranslator ──RawChangeEvent──> ChangeDebouncer ──DebouncedChangeEvent──> orchestrator
//!                 │                                    │
//!                 └──── structure ──> tree <── fingerprints
//! ```

pub mod debouncer;
pub mod tree;
pub mod watcher;

pub use debouncer::ChangeDebouncer;
pub use tree::{WatchedDirectory, WatchedFile, WatchedNode};
pub use watcher::{DirectoryWatcher, EventTranslator};

use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use sha2::{Digest, Sha256};

/// Tree shared between the watcher (structure) and the debouncer (fingerprints).
pub type SharedTree = Arc<RwLock<WatchedDirectory>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    Created,
    Modified,
    Deleted,
    /// Single-event rename reported by a producer that does not split them
    Renamed,
}

impl ChangeKind {
    /// Whether the change adds or removes a file.
    pub fn is_structural(&self) -> bool {
        !matches!(self, ChangeKind::Modified)
    }
}

/// An undebounced change as reported by the watcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawChangeEvent {
    pub path: PathBuf,
    pub kind: ChangeKind,
}

impl RawChangeEvent {
    pub fn new(path: impl Into<PathBuf>, kind: ChangeKind) -> Self {
        Self {
            path: path.into(),
            kind,
        }
    }
}

/// One logical change after the quiet period expired.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebouncedChangeEvent {
    pub path: PathBuf,
    /// Kind of the last raw event in the burst
    pub kind: ChangeKind,
    /// Content fingerprint at fire time, `None` when the file is gone
    pub fingerprint: Option<String>,
}

/// Lowercase hex SHA-256 of a file's content.
pub fn fingerprint(path: &Path) -> io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Fingerprint of in-memory content.
pub fn fingerprint_bytes(content: &[u8]) -> String {
    hex::encode(Sha256::digest(content))
}

//! Sync requests
//!
//! A [`SyncRequest`] is one unit of work for the orchestrator: a path plus
//! what should happen to it. Requests come from debounced filesystem events
//! or from explicit user commands.
//!
//! # Example
//!
//! ```
//! use std::path::PathBuf;
//! use clobsync_lib::operations::{SyncAction, SyncRequest};
//!
//! let request = SyncRequest::new(1, PathBuf::from("/work/src/report.xml"), SyncAction::Push);
//!
//! assert_eq!(request.seq(), 1);
//! assert!(request.is_explicit());
//! ```

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::watch::{ChangeKind, DebouncedChangeEvent};

/// What to do with a path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncAction {
    /// A debounced filesystem change
    Changed {
        kind: ChangeKind,
        /// Content fingerprint when the change fired
        fingerprint: Option<String>,
    },
    /// Push local content to the existing row
    Push,
    /// Create a new row from the local file
    Insert,
    /// Overwrite the local file with the row content
    Download,
}

impl SyncAction {
    pub fn name(&self) -> &'static str {
        match self {
            SyncAction::Changed { .. } => "change",
            SyncAction::Push => "push",
            SyncAction::Insert => "insert",
            SyncAction::Download => "download",
        }
    }
}

/// One queued operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncRequest {
    /// Monotonic sequence number; requests for one path run in this order.
    seq: u64,

    /// When the request was created (Unix timestamp in nanoseconds).
    timestamp: u64,

    path: PathBuf,

    action: SyncAction,
}

impl SyncRequest {
    pub fn new(seq: u64, path: PathBuf, action: SyncAction) -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);

        Self {
            seq,
            timestamp,
            path,
            action,
        }
    }

    /// Request for a debounced change event.
    pub fn from_event(seq: u64, event: DebouncedChangeEvent) -> Self {
        Self::new(
            seq,
            event.path,
            SyncAction::Changed {
                kind: event.kind,
                fingerprint: event.fingerprint,
            },
        )
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Nanoseconds since Unix epoch.
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn action(&self) -> &SyncAction {
        &self.action
    }

    /// True for requests issued by a user rather than a filesystem event.
    pub fn is_explicit(&self) -> bool {
        !matches!(self.action, SyncAction::Changed { .. })
    }
}

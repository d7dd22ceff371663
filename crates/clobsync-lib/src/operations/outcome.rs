//! Results of sync operations.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::backup::FileBackup;
use crate::error::SyncError;
use crate::store::RemoteFileRecord;

/// Why an operation did nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SkipReason {
    /// No mapping rule covers the path
    NoMapping,
    /// No row exists for the file and inserting was not requested
    NotInDatabase,
    /// The user declined a table or MIME type selection
    SelectionDeclined,
    /// Content matches what was last synced
    Unchanged,
    /// The file was deleted locally; rows are never deleted
    LocalDelete,
    /// The file disappeared before it could be read
    Vanished,
    /// The session closed before the request started
    Cancelled,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            SkipReason::NoMapping => "no mapping rule",
            SkipReason::NotInDatabase => "not in database",
            SkipReason::SelectionDeclined => "selection declined",
            SkipReason::Unchanged => "unchanged",
            SkipReason::LocalDelete => "deleted locally",
            SkipReason::Vanished => "file vanished",
            SkipReason::Cancelled => "cancelled",
        };
        f.write_str(text)
    }
}

/// Step of the pipeline an operation was in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Resolving,
    WaitingForSelection,
    BackingUp,
    Writing,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Phase::Resolving => "resolving",
            Phase::WaitingForSelection => "waiting for selection",
            Phase::BackingUp => "backing up",
            Phase::Writing => "writing",
        };
        f.write_str(text)
    }
}

/// Final result of one operation.
#[derive(Debug, Clone)]
pub enum SyncOutcome {
    /// Local content was written to the row
    Updated(RemoteFileRecord),
    /// A new row was created
    Inserted(RemoteFileRecord),
    /// Row content was written to the local file
    Downloaded(RemoteFileRecord),
    Skipped(SkipReason),
    Failed { phase: Phase, error: Arc<SyncError> },
}

impl SyncOutcome {
    pub fn failed(phase: Phase, error: SyncError) -> Self {
        SyncOutcome::Failed {
            phase,
            error: Arc::new(error),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(
            self,
            SyncOutcome::Updated(_) | SyncOutcome::Inserted(_) | SyncOutcome::Downloaded(_)
        )
    }

    pub fn skip_reason(&self) -> Option<SkipReason> {
        match self {
            SyncOutcome::Skipped(reason) => Some(*reason),
            _ => None,
        }
    }

    /// Record affected by a successful operation.
    pub fn record(&self) -> Option<&RemoteFileRecord> {
        match self {
            SyncOutcome::Updated(r) | SyncOutcome::Inserted(r) | SyncOutcome::Downloaded(r) => {
                Some(r)
            }
            _ => None,
        }
    }
}

impl fmt::Display for SyncOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncOutcome::Updated(r) => write!(f, "updated {} [{}]", r.table, r.key),
            SyncOutcome::Inserted(r) => write!(f, "inserted into {} [{}]", r.table, r.key),
            SyncOutcome::Downloaded(r) => write!(f, "downloaded from {} [{}]", r.table, r.key),
            SyncOutcome::Skipped(reason) => write!(f, "skipped ({})", reason),
            SyncOutcome::Failed { phase, error } => write!(f, "failed while {}: {}", phase, error),
        }
    }
}

/// Everything known about a finished operation.
#[derive(Debug, Clone)]
pub struct OperationReport {
    pub path: PathBuf,
    pub outcome: SyncOutcome,
    /// True when files appeared or disappeared from the synced set
    pub structural_change: bool,
    /// Snapshot taken before the local file was overwritten or pushed
    pub backup: Option<FileBackup>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

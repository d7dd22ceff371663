//! Listener boundary between the pipeline and whatever drives it.
//!
//! The orchestrator never talks to a UI directly. It asks a [`SyncListener`]
//! to make choices it is not allowed to make itself (which table, which MIME
//! type) and tells it what happened.

use std::path::Path;

use crate::mapping::TableMapping;
use crate::operations::SyncOutcome;

/// Receives selection requests and progress notifications.
///
/// All methods have default implementations so listeners can choose which
/// notifications they care about. The selection defaults decline.
///
/// # Thread Safety
///
/// Listeners must be `Send + Sync` as they are called from every worker
/// thread. Selection methods may block; only the asking file waits.
pub trait SyncListener: Send + Sync {
    /// Pick one of several candidate tables for `path`.
    ///
    /// # Arguments
    /// * `path` - File being synced
    /// * `candidates` - Candidate tables, most specific rule first
    ///
    /// Returning `None` declines and the operation is skipped.
    fn request_table_selection(
        &self,
        _path: &Path,
        _candidates: &[TableMapping],
    ) -> Option<TableMapping> {
        None
    }

    /// Pick the MIME type to store with a new row.
    ///
    /// Returning `None` declines and the insert is skipped.
    fn request_mime_type_selection(&self, _path: &Path, _candidates: &[String]) -> Option<String> {
        None
    }

    /// Called before the first operation of a batch starts.
    fn on_processing_started(&self) {}

    /// Called when the queue has drained.
    ///
    /// # Arguments
    /// * `structural_change` - True when any finished operation added or
    ///   removed files from the synced set
    fn on_processing_finished(&self, _structural_change: bool) {}

    /// Called once per finished operation.
    fn on_operation_complete(&self, _path: &Path, _outcome: &SyncOutcome) {}
}

/// Listener that ignores notifications and declines every selection.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopListener;

impl SyncListener for NoopListener {}

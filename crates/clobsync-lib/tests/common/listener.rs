//! Listener that answers selections from a script and records every callback.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use clobsync_lib::{SyncListener, SyncOutcome, TableMapping};

#[derive(Default)]
pub struct RecordingListener {
    table_choice: Mutex<Option<String>>,
    mime_choice: Mutex<Option<String>>,
    table_requests: Mutex<Vec<(PathBuf, Vec<String>)>>,
    mime_requests: Mutex<Vec<(PathBuf, Vec<String>)>>,
    outcomes: Mutex<Vec<(PathBuf, SyncOutcome)>>,
    started: AtomicUsize,
    finished: Mutex<Vec<bool>>,
}

impl RecordingListener {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer table selections with the table of this qualified name.
    pub fn choose_table(&self, qualified_name: &str) {
        *self.table_choice.lock().unwrap() = Some(qualified_name.to_string());
    }

    pub fn choose_mime_type(&self, mime_type: &str) {
        *self.mime_choice.lock().unwrap() = Some(mime_type.to_string());
    }

    pub fn table_requests(&self) -> Vec<(PathBuf, Vec<String>)> {
        self.table_requests.lock().unwrap().clone()
    }

    pub fn mime_requests(&self) -> Vec<(PathBuf, Vec<String>)> {
        self.mime_requests.lock().unwrap().clone()
    }

    pub fn outcomes(&self) -> Vec<(PathBuf, SyncOutcome)> {
        self.outcomes.lock().unwrap().clone()
    }

    pub fn outcome_count(&self) -> usize {
        self.outcomes.lock().unwrap().len()
    }

    pub fn started_count(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    pub fn finished(&self) -> Vec<bool> {
        self.finished.lock().unwrap().clone()
    }
}

impl SyncListener for RecordingListener {
    fn request_table_selection(&self, path: &Path, candidates: &[TableMapping]) -> Option<TableMapping> {
        let names = candidates.iter().map(TableMapping::qualified_name).collect();
        self.table_requests
            .lock()
            .unwrap()
            .push((path.to_path_buf(), names));

        let choice = self.table_choice.lock().unwrap().clone()?;
        candidates
            .iter()
            .find(|c| c.qualified_name() == choice)
            .cloned()
    }

    fn request_mime_type_selection(&self, path: &Path, candidates: &[String]) -> Option<String> {
        self.mime_requests
            .lock()
            .unwrap()
            .push((path.to_path_buf(), candidates.to_vec()));
        self.mime_choice.lock().unwrap().clone()
    }

    fn on_processing_started(&self) {
        self.started.fetch_add(1, Ordering::SeqCst);
    }

    fn on_processing_finished(&self, structural_change: bool) {
        self.finished.lock().unwrap().push(structural_change);
    }

    fn on_operation_complete(&self, path: &Path, outcome: &SyncOutcome) {
        self.outcomes
            .lock()
            .unwrap()
            .push((path.to_path_buf(), outcome.clone()));
    }
}

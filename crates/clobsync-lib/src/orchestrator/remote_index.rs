//! Cached remote file listings, one per table.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use log::debug;

use super::timeout::{run_with_timeout, Stragglers};
use crate::error::{SyncError, SyncResult};
use crate::mapping::TableMapping;
use crate::store::{RemoteFileRecord, RowStore};

/// Snapshot of `list_known_files` per table, fetched on first use.
///
/// A lookup that misses the cached listing re-fetches it once, so rows created
/// by other writers become visible before a file is treated as new.
pub struct RemoteIndex {
    store: Arc<dyn RowStore>,
    timeout: Duration,
    cache: Mutex<HashMap<String, Vec<RemoteFileRecord>>>,
}

impl RemoteIndex {
    pub fn new(store: Arc<dyn RowStore>, timeout: Duration) -> Self {
        Self {
            store,
            timeout,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// All records of `table`, fetching the listing when not cached.
    pub fn records(&self, table: &TableMapping) -> SyncResult<Vec<RemoteFileRecord>> {
        if let Some(records) = self.lock().get(&table.qualified_name()) {
            return Ok(records.clone());
        }
        self.fetch(table)
    }

    /// Record in `table` whose file name matches `file_name`, ignoring case.
    pub fn find(&self, table: &TableMapping, file_name: &str) -> SyncResult<Option<RemoteFileRecord>> {
        let cached = self.lock().get(&table.qualified_name()).cloned();
        if let Some(records) = cached {
            if let Some(found) = pick(records, file_name) {
                return Ok(Some(found));
            }
            debug!("{} not in cached listing of {}", file_name, table.qualified_name());
        }
        Ok(pick(self.fetch(table)?, file_name))
    }

    /// Add a freshly inserted row to a cached listing.
    pub fn record_inserted(&self, record: RemoteFileRecord) {
        if let Some(records) = self.lock().get_mut(&record.table) {
            records.push(record);
        }
    }

    /// Drop every cached listing; the next lookup re-fetches.
    pub fn invalidate(&self) {
        self.lock().clear();
    }

    fn fetch(&self, table: &TableMapping) -> SyncResult<Vec<RemoteFileRecord>> {
        let name = table.qualified_name();
        let store = Arc::clone(&self.store);
        let mapping = table.clone();
        // Listing is read-only, so a late call may finish unobserved
        let mut late = Stragglers::default();
        let records = run_with_timeout("list_known_files", self.timeout, &mut late, move || {
            store
                .list_known_files(&mapping)
                .map_err(|source| SyncError::RemoteReadFailed {
                    table: mapping.qualified_name(),
                    source,
                })
        })?;
        debug!("Fetched {} record(s) for {}", records.len(), name);

        self.lock().insert(name, records.clone());
        Ok(records)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Vec<RemoteFileRecord>>> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn pick(records: Vec<RemoteFileRecord>, file_name: &str) -> Option<RemoteFileRecord> {
    records.into_iter().find(|r| r.matches_name(file_name))
}

//! In-memory row store that records when writes run.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

use clobsync_lib::store::{KeyValue, NewRow, RowStoreError};
use clobsync_lib::{RemoteFileRecord, RowKey, RowStore, TableMapping};

/// One `write_payload` call, from entry to return.
#[derive(Debug, Clone)]
pub struct WriteInterval {
    pub table: String,
    pub key: RowKey,
    pub start: Instant,
    pub end: Instant,
}

impl WriteInterval {
    pub fn overlaps(&self, other: &WriteInterval) -> bool {
        self.start < other.end && other.start < self.end
    }
}

#[derive(Default)]
pub struct MockRowStore {
    records: Mutex<HashMap<String, Vec<RemoteFileRecord>>>,
    payloads: Mutex<HashMap<(String, RowKey), Vec<u8>>>,
    mime_types: Mutex<HashMap<(String, RowKey), String>>,
    inserts: Mutex<Vec<(String, NewRow)>>,
    writes: Mutex<Vec<WriteInterval>>,
    write_delay: Mutex<Duration>,
    fail_writes: AtomicBool,
    next_id: AtomicI64,
}

impl MockRowStore {
    pub fn new() -> Self {
        Self {
            next_id: AtomicI64::new(100),
            ..Default::default()
        }
    }

    /// Add a row mirroring `file_name` and return its record.
    pub fn add_row(&self, table: &TableMapping, file_name: &str, content: &[u8]) -> RemoteFileRecord {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let record = RemoteFileRecord::new(
            table.qualified_name(),
            RowKey::single("ID", KeyValue::Integer(id)),
            file_name,
        );
        self.records
            .lock()
            .unwrap()
            .entry(table.qualified_name())
            .or_default()
            .push(record.clone());
        self.payloads
            .lock()
            .unwrap()
            .insert((table.qualified_name(), record.key.clone()), content.to_vec());
        record
    }

    pub fn set_payload(&self, record: &RemoteFileRecord, content: &[u8]) {
        self.payloads
            .lock()
            .unwrap()
            .insert((record.table.clone(), record.key.clone()), content.to_vec());
    }

    pub fn payload(&self, record: &RemoteFileRecord) -> Option<Vec<u8>> {
        self.payloads
            .lock()
            .unwrap()
            .get(&(record.table.clone(), record.key.clone()))
            .cloned()
    }

    pub fn mime_type(&self, record: &RemoteFileRecord) -> Option<String> {
        self.mime_types
            .lock()
            .unwrap()
            .get(&(record.table.clone(), record.key.clone()))
            .cloned()
    }

    /// Rows of `table`, including inserted ones.
    pub fn rows(&self, table: &str) -> Vec<RemoteFileRecord> {
        self.records
            .lock()
            .unwrap()
            .get(table)
            .cloned()
            .unwrap_or_default()
    }

    pub fn inserts(&self) -> Vec<(String, NewRow)> {
        self.inserts.lock().unwrap().clone()
    }

    pub fn writes(&self) -> Vec<WriteInterval> {
        self.writes.lock().unwrap().clone()
    }

    pub fn write_count(&self) -> usize {
        self.writes.lock().unwrap().len()
    }

    /// Make every write and insert sleep first.
    pub fn set_write_delay(&self, delay: Duration) {
        *self.write_delay.lock().unwrap() = delay;
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn delay(&self) {
        let delay = *self.write_delay.lock().unwrap();
        if !delay.is_zero() {
            thread::sleep(delay);
        }
    }
}

impl RowStore for MockRowStore {
    fn read_payload(&self, table: &TableMapping, key: &RowKey) -> Result<Vec<u8>, RowStoreError> {
        self.payloads
            .lock()
            .unwrap()
            .get(&(table.qualified_name(), key.clone()))
            .cloned()
            .ok_or_else(|| RowStoreError::RowNotFound(format!("{} {}", table.qualified_name(), key)))
    }

    fn write_payload(
        &self,
        table: &TableMapping,
        key: &RowKey,
        content: &[u8],
        mime_type: Option<&str>,
    ) -> Result<(), RowStoreError> {
        let start = Instant::now();
        self.delay();

        let result = if self.fail_writes.load(Ordering::SeqCst) {
            Err(RowStoreError::Other("write rejected".to_string()))
        } else {
            let slot = (table.qualified_name(), key.clone());
            if let Some(mime) = mime_type {
                self.mime_types.lock().unwrap().insert(slot.clone(), mime.to_string());
            }
            self.payloads.lock().unwrap().insert(slot, content.to_vec());
            Ok(())
        };

        self.writes.lock().unwrap().push(WriteInterval {
            table: table.qualified_name(),
            key: key.clone(),
            start,
            end: Instant::now(),
        });
        result
    }

    fn insert_row(&self, table: &TableMapping, row: &NewRow) -> Result<RowKey, RowStoreError> {
        self.delay();
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(RowStoreError::Other("insert rejected".to_string()));
        }

        let record = self.add_row(table, &table.file_name_for(&row.mnemonic), &row.content);
        if let Some(mime) = &row.mime_type {
            self.mime_types
                .lock()
                .unwrap()
                .insert((record.table.clone(), record.key.clone()), mime.clone());
        }
        self.inserts
            .lock()
            .unwrap()
            .push((table.qualified_name(), row.clone()));
        Ok(record.key)
    }

    fn list_known_files(&self, table: &TableMapping) -> Result<Vec<RemoteFileRecord>, RowStoreError> {
        Ok(self.rows(&table.qualified_name()))
    }
}

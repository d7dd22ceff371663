pub mod sqlite;

use std::fmt;

use thiserror::Error;

use crate::mapping::TableMapping;

pub use sqlite::SqliteRowStore;

#[derive(Error, Debug)]
pub enum RowStoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Row not found: {0}")]
    RowNotFound(String),

    #[error("Content of {table} is not valid UTF-8 text")]
    InvalidText { table: String },

    #[error("Unsupported mapping: {0}")]
    Unsupported(String),

    #[error("{0}")]
    Other(String),
}

/// A single primary-key value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum KeyValue {
    Integer(i64),
    Text(String),
}

impl fmt::Display for KeyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyValue::Integer(v) => write!(f, "{}", v),
            KeyValue::Text(v) => write!(f, "'{}'", v),
        }
    }
}

/// Ordered primary-key values identifying one row.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RowKey(pub Vec<(String, KeyValue)>);

impl RowKey {
    pub fn single(column: impl Into<String>, value: KeyValue) -> Self {
        Self(vec![(column.into(), value)])
    }

    pub fn parts(&self) -> &[(String, KeyValue)] {
        &self.0
    }
}

impl fmt::Display for RowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|(c, v)| format!("{}={}", c, v)).collect();
        write!(f, "{}", parts.join(","))
    }
}

/// Cached link between a remote row and the file name it mirrors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFileRecord {
    /// Qualified name of the table holding the row
    pub table: String,
    pub key: RowKey,
    /// File name used to match local files
    pub file_name: String,
}

impl RemoteFileRecord {
    pub fn new(table: impl Into<String>, key: RowKey, file_name: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            key,
            file_name: file_name.into(),
        }
    }

    /// File names compare case-insensitively.
    pub fn matches_name(&self, file_name: &str) -> bool {
        self.file_name.eq_ignore_ascii_case(file_name)
    }
}

/// Values for a row about to be inserted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRow {
    /// Value for the mnemonic column (or the parent's mnemonic column)
    pub mnemonic: String,
    pub content: Vec<u8>,
    pub mime_type: Option<String>,
}

/// Relational store holding the mirrored content.
///
/// Implementations must be `Send + Sync`; the orchestrator calls them from
/// several worker threads, never twice concurrently for the same row.
pub trait RowStore: Send + Sync {
    /// Read the content column of the row identified by `key`.
    fn read_payload(&self, table: &TableMapping, key: &RowKey) -> Result<Vec<u8>, RowStoreError>;

    /// Overwrite the content column (and MIME column, when given) of one row.
    fn write_payload(
        &self,
        table: &TableMapping,
        key: &RowKey,
        content: &[u8],
        mime_type: Option<&str>,
    ) -> Result<(), RowStoreError>;

    /// Insert a new row and return its key.
    fn insert_row(&self, table: &TableMapping, row: &NewRow) -> Result<RowKey, RowStoreError>;

    /// List every row of `table` as a file record.
    fn list_known_files(&self, table: &TableMapping) -> Result<Vec<RemoteFileRecord>, RowStoreError>;
}

//! Mapping rules binding local directories to database tables
//!
//! A [`MappingRule`] (a "clob type") names a directory under the watch root and
//! the ordered list of [`TableMapping`] candidates whose rows hold the content
//! of files in that directory. Rules are loaded once per session and never
//! change while it runs.
//!
//! ```text
//! rule "reports"  dir = "src", recursive
//!   ├── table REPORTS        (ID identifier, NAME mnemonic, BODY content)
//!   └── table REPORT_DRAFTS  (ID identifier, NAME mnemonic, BODY content, MIME mime)
//! ```

pub mod resolver;

pub use resolver::{MappingResolver, MappingResult};

use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{SyncError, SyncResult};

/// What a column is used for when mirroring a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Purpose {
    /// Primary key of the row
    Identifier,
    /// Human readable name, used to build the local file name
    Mnemonic,
    /// The CLOB/BLOB holding the file content
    Content,
    /// MIME type of the content
    MimeType,
    /// Value drawn from a sequence when a row is inserted
    SequenceSource,
}

/// Storage type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Datatype {
    /// Character large object
    Text,
    /// Binary large object
    Binary,
    /// Short character column
    Varchar,
    /// Numeric column
    Integer,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub purpose: Purpose,
    pub datatype: Datatype,
    /// MIME types the content column accepts. Only meaningful for `Content`.
    #[serde(default)]
    pub mime_types: Vec<String>,
}

impl Column {
    pub fn new(name: impl Into<String>, purpose: Purpose, datatype: Datatype) -> Self {
        Self {
            name: name.into(),
            purpose,
            datatype,
            mime_types: Vec::new(),
        }
    }

    pub fn with_mime_types<I, S>(mut self, mime_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.mime_types = mime_types.into_iter().map(Into::into).collect();
        self
    }
}

/// Link from a detail table to the master table that owns the mnemonic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParentLink {
    #[serde(default)]
    pub schema: String,
    pub table: String,
    /// Primary key column of the parent table
    pub key_column: String,
    /// Column of the parent table holding the mnemonic
    pub mnemonic_column: String,
    /// Column of the detail table referencing the parent key
    pub foreign_key_column: String,
}

impl ParentLink {
    pub fn qualified_name(&self) -> String {
        qualify(&self.schema, &self.table)
    }
}

/// One candidate table for a mapping rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableMapping {
    #[serde(default)]
    pub schema: String,
    pub table: String,
    /// Extension appended to mnemonics that carry none (without the dot)
    #[serde(default)]
    pub default_extension: Option<String>,
    pub columns: Vec<Column>,
    #[serde(default)]
    pub parent: Option<ParentLink>,
}

impl TableMapping {
    pub fn new(schema: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            table: table.into(),
            default_extension: None,
            columns: Vec::new(),
            parent: None,
        }
    }

    pub fn with_column(mut self, column: Column) -> Self {
        self.columns.push(column);
        self
    }

    pub fn with_parent(mut self, parent: ParentLink) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn with_default_extension(mut self, extension: impl Into<String>) -> Self {
        self.default_extension = Some(extension.into());
        self
    }

    /// `schema.table`, or just `table` when no schema is set
    pub fn qualified_name(&self) -> String {
        qualify(&self.schema, &self.table)
    }

    /// First column with the given purpose
    pub fn column(&self, purpose: Purpose) -> Option<&Column> {
        self.columns.iter().find(|c| c.purpose == purpose)
    }

    pub fn content_column(&self) -> SyncResult<&Column> {
        self.column(Purpose::Content).ok_or_else(|| {
            SyncError::InvalidMapping(format!("{} has no content column", self.qualified_name()))
        })
    }

    pub fn mime_column(&self) -> Option<&Column> {
        self.column(Purpose::MimeType)
    }

    /// MIME types the user has to choose from when inserting into this table.
    ///
    /// Empty when the table stores no MIME type.
    pub fn mime_candidates(&self) -> &[String] {
        match (self.mime_column(), self.column(Purpose::Content)) {
            (Some(_), Some(content)) => &content.mime_types,
            _ => &[],
        }
    }

    /// Local file name for a row with the given mnemonic.
    pub fn file_name_for(&self, mnemonic: &str) -> String {
        match &self.default_extension {
            Some(ext) if Path::new(mnemonic).extension().is_none() => {
                format!("{}.{}", mnemonic, ext)
            }
            _ => mnemonic.to_string(),
        }
    }

    /// Mnemonic to store for a local file name.
    ///
    /// Strips the default extension so that `file_name_for` round-trips.
    pub fn mnemonic_for(&self, file_name: &str) -> String {
        if let Some(ext) = &self.default_extension {
            let suffix = format!(".{}", ext);
            if file_name.len() > suffix.len() {
                let split = file_name.len() - suffix.len();
                if file_name.is_char_boundary(split)
                    && file_name[split..].eq_ignore_ascii_case(&suffix)
                {
                    return file_name[..split].to_string();
                }
            }
        }
        file_name.to_string()
    }

    /// Check the column invariants.
    ///
    /// Exactly one content column and at most one MIME type column.
    pub fn validate(&self) -> SyncResult<()> {
        let count = |p: Purpose| self.columns.iter().filter(|c| c.purpose == p).count();

        if count(Purpose::Content) != 1 {
            return Err(SyncError::InvalidMapping(format!(
                "{} must have exactly one content column, found {}",
                self.qualified_name(),
                count(Purpose::Content)
            )));
        }
        if count(Purpose::MimeType) > 1 {
            return Err(SyncError::InvalidMapping(format!(
                "{} has more than one MIME type column",
                self.qualified_name()
            )));
        }
        if self.column(Purpose::Mnemonic).is_none() && self.parent.is_none() {
            return Err(SyncError::InvalidMapping(format!(
                "{} needs a mnemonic column or a parent link",
                self.qualified_name()
            )));
        }
        if self.column(Purpose::Identifier).is_none() {
            return Err(SyncError::InvalidMapping(format!(
                "{} has no identifier column",
                self.qualified_name()
            )));
        }
        Ok(())
    }
}

/// Binds a directory under the watch root to candidate tables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingRule {
    pub name: String,
    /// Directory relative to the watch root. Empty means the root itself.
    pub directory: PathBuf,
    #[serde(default = "default_recursive")]
    pub recursive: bool,
    pub tables: Vec<TableMapping>,
}

fn default_recursive() -> bool {
    true
}

impl MappingRule {
    pub fn new(name: impl Into<String>, directory: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            directory: directory.into(),
            recursive: true,
            tables: Vec::new(),
        }
    }

    pub fn recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    pub fn with_table(mut self, table: TableMapping) -> Self {
        self.tables.push(table);
        self
    }

    /// Number of normal components in the directory pattern.
    pub fn depth(&self) -> usize {
        normal_components(&self.directory).len()
    }

    /// Does this rule cover the file at `relative_path`?
    pub fn covers(&self, relative_path: &Path) -> bool {
        let dir = normal_components(&self.directory);
        let file = normal_components(relative_path);
        if file.len() <= dir.len() {
            return false;
        }
        if file[..dir.len()] != dir[..] {
            return false;
        }
        self.recursive || file.len() == dir.len() + 1
    }

    pub fn validate(&self) -> SyncResult<()> {
        if self.tables.is_empty() {
            return Err(SyncError::InvalidMapping(format!(
                "rule '{}' lists no tables",
                self.name
            )));
        }
        if self.directory.is_absolute() {
            return Err(SyncError::InvalidMapping(format!(
                "rule '{}' directory must be relative to the watch root",
                self.name
            )));
        }
        for table in &self.tables {
            table.validate()?;
        }
        Ok(())
    }
}

/// Validate every rule of a session.
pub fn validate_rules(rules: &[MappingRule]) -> SyncResult<()> {
    rules.iter().try_for_each(MappingRule::validate)
}

fn qualify(schema: &str, table: &str) -> String {
    if schema.is_empty() {
        table.to_string()
    } else {
        format!("{}.{}", schema, table)
    }
}

fn normal_components(path: &Path) -> Vec<&std::ffi::OsStr> {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(s) => Some(s),
            _ => None,
        })
        .collect()
}

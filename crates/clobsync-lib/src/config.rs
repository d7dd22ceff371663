//! Session configuration
//!
//! A session is described by a TOML file:
//!
//! ```toml
//! root = "/home/me/work/clobs"
//! connection = "dev"
//! database = "/home/me/work/app.db"
//! debounce_ms = 500
//! auto_insert = true
//!
//! [schemas]
//! APP = "/home/me/work/app_schema.db"
//!
//! [[rules]]
//! name = "reports"
//! directory = "src"
//!
//! [[rules.tables]]
//! table = "REPORTS"
//! default_extension = "xml"
//!
//! [[rules.tables.columns]]
//! name = "ID"
//! purpose = "identifier"
//! datatype = "integer"
//! ```
//!
//! Relative `root`, `database`, `backup_dir` and schema paths are resolved
//! against the directory holding the configuration file.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::debug;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::backup::BackupStore;
use crate::mapping::{validate_rules, MappingRule};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Cannot read configuration {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Everything a sync session needs besides the row store and the listener.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Watched root directory
    pub root: PathBuf,
    /// Connection name, used to group backups
    #[serde(default = "default_connection")]
    pub connection: String,
    /// Database file for the SQLite row store
    #[serde(default)]
    pub database: Option<PathBuf>,
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_io_timeout_secs")]
    pub io_timeout_secs: u64,
    #[serde(default)]
    pub backup_dir: Option<PathBuf>,
    #[serde(default = "default_backup_lifetime_days")]
    pub backup_lifetime_days: u64,
    /// Insert rows for files that have none yet
    #[serde(default)]
    pub auto_insert: bool,
    /// Drop events for read-only files
    #[serde(default)]
    pub hide_read_only: bool,
    /// Database files attached under a schema name, for qualified table names
    #[serde(default)]
    pub schemas: BTreeMap<String, PathBuf>,
    #[serde(default)]
    pub rules: Vec<MappingRule>,
}

fn default_connection() -> String {
    "default".to_string()
}

fn default_debounce_ms() -> u64 {
    500
}

fn default_workers() -> usize {
    4
}

fn default_io_timeout_secs() -> u64 {
    30
}

fn default_backup_lifetime_days() -> u64 {
    30
}

impl SessionConfig {
    /// Configuration with defaults for everything but the root.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            connection: default_connection(),
            database: None,
            debounce_ms: default_debounce_ms(),
            workers: default_workers(),
            io_timeout_secs: default_io_timeout_secs(),
            backup_dir: None,
            backup_lifetime_days: default_backup_lifetime_days(),
            auto_insert: false,
            hide_read_only: false,
            schemas: BTreeMap::new(),
            rules: Vec::new(),
        }
    }

    pub fn with_rule(mut self, rule: MappingRule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Load and validate a configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_toml_str(&content)?;

        if let Some(base) = path.parent() {
            config.resolve_relative_to(base);
        }
        config.validate()?;
        debug!("Loaded configuration from {:?} ({} rule(s))", path, config.rules.len());
        Ok(config)
    }

    /// Parse without validating or resolving paths.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::Invalid("workers must be at least 1".into()));
        }
        if self.io_timeout_secs == 0 {
            return Err(ConfigError::Invalid("io_timeout_secs must be at least 1".into()));
        }
        if self.connection.trim().is_empty() {
            return Err(ConfigError::Invalid("connection name is empty".into()));
        }
        validate_rules(&self.rules).map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_secs(self.io_timeout_secs)
    }

    pub fn backup_lifetime(&self) -> Duration {
        Duration::from_secs(self.backup_lifetime_days * 24 * 60 * 60)
    }

    /// Backup directory, falling back to the per-user default.
    pub fn backup_dir(&self) -> PathBuf {
        self.backup_dir
            .clone()
            .unwrap_or_else(BackupStore::default_base_dir)
    }

    fn resolve_relative_to(&mut self, base: &Path) {
        let resolve = |p: &Path| {
            if p.is_relative() {
                base.join(p)
            } else {
                p.to_path_buf()
            }
        };
        self.root = resolve(&self.root);
        self.database = self.database.as_deref().map(resolve);
        self.backup_dir = self.backup_dir.as_deref().map(resolve);
        for path in self.schemas.values_mut() {
            *path = resolve(path);
        }
    }
}

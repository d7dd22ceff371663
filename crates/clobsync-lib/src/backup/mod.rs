//! Backup store for local file versions
//!
//! Every operation that overwrites a local file first copies the current bytes
//! here. Backups are grouped per watched root in the central backup directory
//! (`~/.local/share/clobsync/backups/` by default):
//!
//! ```text
//! backups/
//! └── roots/
//!     └── {uuid}/
//!         ├── root.toml            <- watched root + connection name
//!         └── files/
//!             └── {path hash}/
//!                 ├── origin.toml  <- original path
//!                 ├── 1760608800000000000.bak
//!                 └── 1760608812000000001.bak
//! ```
//!
//! Backup file names are creation timestamps in nanoseconds. A store never
//! issues a stamp at or below one already on disk, so newest-first ordering is
//! a sort by name even when the clock steps back between runs.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;

use crate::error::{IoErrorExt, SyncError, SyncResult};
use crate::staging::write_atomic;

const BACKUP_EXTENSION: &str = "bak";
const ROOT_META: &str = "root.toml";
const ORIGIN_META: &str = "origin.toml";

/// One immutable snapshot of a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileBackup {
    /// Path of the file that was backed up
    pub original_path: PathBuf,
    /// Where the snapshot bytes live
    pub location: PathBuf,
    pub created_at: DateTime<Utc>,
    /// Identifier of the watched root/connection pair
    pub root_id: String,
}

impl FileBackup {
    /// Snapshot bytes.
    pub fn read(&self) -> std::io::Result<Vec<u8>> {
        std::fs::read(&self.location)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct RootMetadata {
    root: RootSection,
}

#[derive(Debug, Serialize, Deserialize)]
struct RootSection {
    uuid: String,
    source_dir: String,
    connection: String,
    created: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct OriginMetadata {
    original_path: String,
}

/// Append-only snapshot store for one watched root.
pub struct BackupStore {
    root_dir: PathBuf,
    root_id: String,
    source_root: PathBuf,
    last_stamp: Mutex<i64>,
}

impl BackupStore {
    /// Default location: `~/.local/share/clobsync/backups`
    pub fn default_base_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("clobsync")
            .join("backups")
    }

    /// Open the store for `source_root` synced over `connection`.
    ///
    /// Reuses the existing root directory for this pair when one exists,
    /// otherwise creates a new one with a fresh UUID.
    pub fn open(base_dir: &Path, source_root: &Path, connection: &str) -> SyncResult<Self> {
        let roots_dir = base_dir.join("roots");
        std::fs::create_dir_all(&roots_dir)?;
        let source_root = std::fs::canonicalize(source_root).map_err(|e| e.into_sync_error(source_root))?;

        if let Some((root_dir, meta)) = find_root(&roots_dir, &source_root, connection)? {
            let newest = newest_stamp(&root_dir.join("files"));
            debug!(
                "Reusing backup root {} for {:?} (newest stamp {})",
                meta.root.uuid, source_root, newest
            );
            return Ok(Self {
                root_dir,
                root_id: meta.root.uuid,
                source_root,
                last_stamp: Mutex::new(newest),
            });
        }

        let uuid = uuid::Uuid::new_v4().to_string();
        let root_dir = roots_dir.join(&uuid);
        std::fs::create_dir_all(root_dir.join("files"))?;

        let meta = RootMetadata {
            root: RootSection {
                uuid: uuid.clone(),
                source_dir: source_root.display().to_string(),
                connection: connection.to_string(),
                created: Utc::now().to_rfc3339(),
            },
        };
        let text = toml::to_string_pretty(&meta)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        write_atomic(&root_dir.join(ROOT_META), text.as_bytes())?;

        info!("Created backup root {} for {:?} ({})", uuid, source_root, connection);
        Ok(Self {
            root_dir,
            root_id: uuid,
            source_root,
            last_stamp: Mutex::new(0),
        })
    }

    pub fn root_id(&self) -> &str {
        &self.root_id
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    /// Copy the current bytes of `path` into the store.
    pub fn snapshot(&self, path: &Path) -> SyncResult<FileBackup> {
        let content = std::fs::read(path).map_err(|source| SyncError::BackupFailed {
            path: path.to_path_buf(),
            source,
        })?;
        self.snapshot_content(path, &content)
    }

    /// Store caller-supplied bytes as the pre-overwrite version of `path`.
    pub fn snapshot_content(&self, path: &Path, content: &[u8]) -> SyncResult<FileBackup> {
        let fail = |source: std::io::Error| SyncError::BackupFailed {
            path: path.to_path_buf(),
            source,
        };

        let dir = self.path_dir(path);
        std::fs::create_dir_all(&dir).map_err(fail)?;

        let origin = dir.join(ORIGIN_META);
        if !origin.exists() {
            let meta = OriginMetadata {
                original_path: path.display().to_string(),
            };
            let text = toml::to_string(&meta)
                .map_err(|e| fail(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?;
            write_atomic(&origin, text.as_bytes()).map_err(fail)?;
        }

        let stamp = self.next_stamp();
        let location = dir.join(format!("{:020}.{}", stamp, BACKUP_EXTENSION));

        let mut staged = NamedTempFile::new_in(&dir).map_err(fail)?;
        staged.write_all(content).map_err(fail)?;
        staged.as_file().sync_all().map_err(fail)?;
        staged.persist_noclobber(&location).map_err(|e| fail(e.error))?;

        debug!("Backed up {:?} ({} bytes) to {:?}", path, content.len(), location);
        Ok(FileBackup {
            original_path: path.to_path_buf(),
            location,
            created_at: Utc.timestamp_nanos(stamp),
            root_id: self.root_id.clone(),
        })
    }

    /// All backups of `path`, newest first.
    pub fn list_backups(&self, path: &Path) -> SyncResult<Vec<FileBackup>> {
        let dir = self.path_dir(path);
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut stamps: Vec<(i64, PathBuf)> = Vec::new();
        for entry in std::fs::read_dir(&dir)? {
            let location = entry?.path();
            if let Some(stamp) = parse_stamp(&location) {
                stamps.push((stamp, location));
            }
        }
        stamps.sort_by(|a, b| b.0.cmp(&a.0));

        Ok(stamps
            .into_iter()
            .map(|(stamp, location)| FileBackup {
                original_path: path.to_path_buf(),
                location,
                created_at: Utc.timestamp_nanos(stamp),
                root_id: self.root_id.clone(),
            })
            .collect())
    }

    /// Write a backup's bytes to `target` atomically.
    pub fn restore(&self, backup: &FileBackup, target: &Path) -> SyncResult<()> {
        let content = backup
            .read()
            .map_err(|e| e.into_sync_error(&backup.location))?;
        write_atomic(target, &content).map_err(|e| e.into_local_write_error(target))?;
        info!("Restored {:?} from backup taken {}", target, backup.created_at);
        Ok(())
    }

    /// Delete backups older than `older_than`. Returns how many were removed.
    ///
    /// Best-effort: individual failures are logged and skipped.
    pub fn purge(&self, older_than: Duration) -> SyncResult<usize> {
        let cutoff = now_nanos().saturating_sub(i64::try_from(older_than.as_nanos()).unwrap_or(i64::MAX));
        let files_dir = self.root_dir.join("files");
        if !files_dir.exists() {
            return Ok(0);
        }

        let mut removed = 0;
        for dir in std::fs::read_dir(&files_dir)? {
            let dir = match dir {
                Ok(d) => d.path(),
                Err(e) => {
                    warn!("purge: unreadable entry in {:?}: {}", files_dir, e);
                    continue;
                }
            };
            let entries = match std::fs::read_dir(&dir) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!("purge: cannot read {:?}: {}", dir, e);
                    continue;
                }
            };

            let mut remaining = 0;
            for entry in entries.flatten() {
                let location = entry.path();
                match parse_stamp(&location) {
                    Some(stamp) if stamp < cutoff => match std::fs::remove_file(&location) {
                        Ok(()) => removed += 1,
                        Err(e) => {
                            warn!("purge: cannot remove {:?}: {}", location, e);
                            remaining += 1;
                        }
                    },
                    Some(_) => remaining += 1,
                    None => {}
                }
            }

            if remaining == 0 {
                // A snapshot racing with us keeps the directory non-empty
                let _ = std::fs::remove_file(dir.join(ORIGIN_META));
                if let Err(e) = std::fs::remove_dir(&dir) {
                    debug!("purge: keeping {:?}: {}", dir, e);
                }
            }
        }

        info!("Purged {} backup(s) older than {:?} from root {}", removed, older_than, self.root_id);
        Ok(removed)
    }

    /// Run `purge` on a background thread.
    pub fn purge_in_background(self: &Arc<Self>, older_than: Duration) -> JoinHandle<()> {
        let store = Arc::clone(self);
        thread::spawn(move || {
            if let Err(e) = store.purge(older_than) {
                warn!("Backup purge failed: {}", e);
            }
        })
    }

    fn path_dir(&self, path: &Path) -> PathBuf {
        let key = path.strip_prefix(&self.source_root).unwrap_or(path);
        let digest = Sha256::digest(key.to_string_lossy().as_bytes());
        self.root_dir.join("files").join(&hex::encode(digest)[..16])
    }

    fn next_stamp(&self) -> i64 {
        let mut last = self.last_stamp.lock().unwrap_or_else(PoisonError::into_inner);
        let stamp = now_nanos().max(*last + 1);
        *last = stamp;
        stamp
    }
}

impl std::fmt::Debug for BackupStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackupStore")
            .field("root_dir", &self.root_dir)
            .field("root_id", &self.root_id)
            .field("source_root", &self.source_root)
            .finish()
    }
}

fn find_root(
    roots_dir: &Path,
    source_root: &Path,
    connection: &str,
) -> SyncResult<Option<(PathBuf, RootMetadata)>> {
    for entry in std::fs::read_dir(roots_dir)? {
        let entry = entry?;
        let meta_path = entry.path().join(ROOT_META);
        if !meta_path.exists() {
            continue;
        }
        let content = std::fs::read_to_string(&meta_path)?;
        match toml::from_str::<RootMetadata>(&content) {
            Ok(meta)
                if Path::new(&meta.root.source_dir) == source_root
                    && meta.root.connection == connection =>
            {
                return Ok(Some((entry.path(), meta)));
            }
            Ok(_) => {}
            Err(e) => warn!("Ignoring unreadable {:?}: {}", meta_path, e),
        }
    }
    Ok(None)
}

/// Highest backup stamp under `files_dir`, 0 when there is none.
fn newest_stamp(files_dir: &Path) -> i64 {
    let dirs = match std::fs::read_dir(files_dir) {
        Ok(dirs) => dirs,
        Err(_) => return 0,
    };
    dirs.flatten()
        .filter_map(|dir| std::fs::read_dir(dir.path()).ok())
        .flat_map(|entries| entries.flatten())
        .filter_map(|entry| parse_stamp(&entry.path()))
        .max()
        .unwrap_or(0)
}

fn parse_stamp(location: &Path) -> Option<i64> {
    if location.extension().and_then(|e| e.to_str()) != Some(BACKUP_EXTENSION) {
        return None;
    }
    location.file_stem()?.to_str()?.parse().ok()
}

fn now_nanos() -> i64 {
    Utc::now().timestamp_nanos_opt().unwrap_or(i64::MAX)
}

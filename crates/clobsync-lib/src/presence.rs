//! Where a synced file exists: locally, remotely or both.
//!
//! A [`FileSyncView`] merges the watched tree with the remote listings and
//! says which operations make sense for each file.

use std::collections::HashSet;
use std::path::PathBuf;

use crate::error::SyncResult;
use crate::mapping::MappingResolver;
use crate::orchestrator::RemoteIndex;
use crate::store::{RemoteFileRecord, RowKey};
use crate::watch::WatchedDirectory;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Presence {
    LocalOnly,
    RemoteOnly,
    Both,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSyncView {
    /// Local path, or where the file would be downloaded to
    pub path: PathBuf,
    pub presence: Presence,
    pub record: Option<RemoteFileRecord>,
    pub read_only: bool,
}

impl FileSyncView {
    pub fn can_update(&self) -> bool {
        self.presence == Presence::Both && !self.read_only
    }

    pub fn can_insert(&self) -> bool {
        self.presence == Presence::LocalOnly
    }

    pub fn can_download(&self) -> bool {
        matches!(self.presence, Presence::RemoteOnly | Presence::Both)
    }
}

/// Views for every mapped local file and every remote row without a local file.
///
/// Remote-only rows are placed in the directory of the first rule listing
/// their table.
pub fn build_views(
    tree: &WatchedDirectory,
    resolver: &MappingResolver,
    index: &RemoteIndex,
) -> SyncResult<Vec<FileSyncView>> {
    let mut views = Vec::new();
    let mut seen: HashSet<(String, RowKey)> = HashSet::new();

    for file in tree.files() {
        let candidates = resolver.resolve(&file.path).candidates();
        if candidates.is_empty() {
            continue;
        }
        let name = match file.file_name() {
            Some(name) => name,
            None => continue,
        };

        let mut record = None;
        for table in &candidates {
            if let Some(found) = index.find(table, name)? {
                record = Some(found);
                break;
            }
        }
        if let Some(r) = &record {
            seen.insert((r.table.clone(), r.key.clone()));
        }
        views.push(FileSyncView {
            path: file.path.clone(),
            presence: if record.is_some() {
                Presence::Both
            } else {
                Presence::LocalOnly
            },
            record,
            read_only: file.read_only,
        });
    }

    for rule in resolver.rules() {
        for table in &rule.tables {
            for record in index.records(table)? {
                if !seen.insert((record.table.clone(), record.key.clone())) {
                    continue;
                }
                views.push(FileSyncView {
                    path: resolver.root().join(&rule.directory).join(&record.file_name),
                    presence: Presence::RemoteOnly,
                    record: Some(record),
                    read_only: false,
                });
            }
        }
    }

    views.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(views)
}

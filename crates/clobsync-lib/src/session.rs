//! A watch session for one root directory.
//!
//! Wires the pipeline together and owns every thread it starts:
//!
//! ```text
//! DirectoryWatcher ──raw──> ChangeDebouncer ──debounced──> SyncOrchestrator
//!        └──────── shared tree ────────┘
//! ```
//!
//! Closing the session stops the watcher, cancels pending debounce timers,
//! drops queued requests and waits for in-flight operations.

use std::path::{Path, PathBuf};
use std::sync::mpsc::channel;
use std::sync::{Arc, PoisonError};
use std::thread::JoinHandle;

use log::{info, warn};

use crate::backup::BackupStore;
use crate::config::SessionConfig;
use crate::error::{SyncError, SyncResult};
use crate::mapping::MappingResolver;
use crate::operations::{OperationReport, SyncAction};
use crate::orchestrator::{PipelineOptions, SyncListener, SyncOrchestrator};
use crate::presence::{build_views, FileSyncView};
use crate::store::RowStore;
use crate::watch::{ChangeDebouncer, DirectoryWatcher, SharedTree};

/// Start an orchestrator for `root` without watching it.
///
/// Also starts the background purge of expired backups and returns its handle.
pub fn start_orchestrator(
    config: &SessionConfig,
    root: &Path,
    store: Arc<dyn RowStore>,
    listener: Arc<dyn SyncListener>,
) -> SyncResult<(SyncOrchestrator, Arc<BackupStore>, JoinHandle<()>)> {
    config.validate()?;
    let root = std::fs::canonicalize(root).map_err(|_| SyncError::NotFound(root.to_path_buf()))?;

    let backups = Arc::new(BackupStore::open(&config.backup_dir(), &root, &config.connection)?);
    let purge = backups.purge_in_background(config.backup_lifetime());

    let resolver = MappingResolver::new(&root, Arc::new(config.rules.clone()));
    let options = PipelineOptions {
        auto_insert: config.auto_insert,
        io_timeout: config.io_timeout(),
    };
    let orchestrator = SyncOrchestrator::start(
        resolver,
        store,
        Arc::clone(&backups),
        listener,
        options,
        config.workers,
    );
    Ok((orchestrator, backups, purge))
}

pub struct SyncSession {
    root: PathBuf,
    watcher: DirectoryWatcher,
    debouncer: ChangeDebouncer,
    orchestrator: SyncOrchestrator,
    backups: Arc<BackupStore>,
    purge: Option<JoinHandle<()>>,
    closed: bool,
}

impl SyncSession {
    /// Watch `config.root` and sync changes until closed.
    pub fn open(
        config: &SessionConfig,
        store: Arc<dyn RowStore>,
        listener: Arc<dyn SyncListener>,
    ) -> SyncResult<Self> {
        let mut watcher = DirectoryWatcher::open(&config.root, config.hide_read_only)?;
        let root = watcher.root().to_path_buf();
        let (mut orchestrator, backups, purge) = start_orchestrator(config, &root, store, listener)?;

        let raw = watcher
            .subscribe()
            .ok_or_else(|| {
                SyncError::Io(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "watcher stream already taken",
                ))
            })?;
        let (tx, rx) = channel();
        let mut debouncer = ChangeDebouncer::with_tree(config.debounce(), watcher.tree(), tx);
        debouncer.attach(raw);
        orchestrator.consume(rx);

        info!(
            "Session for {:?} ({}) started with {} rule(s)",
            root,
            config.connection,
            config.rules.len()
        );
        Ok(Self {
            root,
            watcher,
            debouncer,
            orchestrator,
            backups,
            purge: Some(purge),
            closed: false,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn tree(&self) -> SharedTree {
        self.watcher.tree()
    }

    pub fn backups(&self) -> &Arc<BackupStore> {
        &self.backups
    }

    pub fn orchestrator(&self) -> &SyncOrchestrator {
        &self.orchestrator
    }

    /// Run an explicit request and wait for its report.
    pub fn run(&self, path: PathBuf, action: SyncAction) -> Option<OperationReport> {
        self.orchestrator.run(path, action)
    }

    /// Presence of every mapped file, from freshly fetched listings.
    pub fn file_views(&self) -> SyncResult<Vec<FileSyncView>> {
        self.orchestrator.remote_index().invalidate();
        let tree = self.watcher.tree();
        let tree = tree.read().unwrap_or_else(PoisonError::into_inner);
        build_views(&tree, self.orchestrator.resolver(), self.orchestrator.remote_index())
    }

    /// Stop everything. In-flight operations finish first.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        self.watcher.close();
        self.debouncer.close();
        let dropped = self.orchestrator.shutdown();
        if let Some(handle) = self.purge.take() {
            if handle.join().is_err() {
                warn!("Backup purge thread panicked");
            }
        }
        info!("Session for {:?} closed ({} queued request(s) dropped)", self.root, dropped.len());
    }
}

impl Drop for SyncSession {
    fn drop(&mut self) {
        self.close();
    }
}

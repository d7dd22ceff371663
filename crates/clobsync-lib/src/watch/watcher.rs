//! Directory watcher backed by `notify`.
//!
//! The OS callback only forwards `notify` events into a channel. A translation
//! thread feeds them through an [`EventTranslator`], which updates the shared
//! tree and produces [`RawChangeEvent`]s for files.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, PoisonError, RwLock};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, info, warn};
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};

use super::tree::{WatchedDirectory, WatchedNode};
use super::{ChangeKind, RawChangeEvent, SharedTree};
use crate::error::{SyncError, SyncResult};

const CLOSE_POLL: Duration = Duration::from_millis(100);

/// Converts `notify` events into file-level change events.
///
/// Holds no OS resources, so it can be driven with synthetic events.
pub struct EventTranslator {
    root: PathBuf,
    tree: SharedTree,
    hide_read_only: bool,
}

impl EventTranslator {
    pub fn new(root: impl Into<PathBuf>, tree: SharedTree, hide_read_only: bool) -> Self {
        Self {
            root: root.into(),
            tree,
            hide_read_only,
        }
    }

    /// Apply one `notify` event to the tree and return the file changes it implies.
    pub fn translate(&mut self, event: &Event) -> Vec<RawChangeEvent> {
        let mut out = Vec::new();
        match &event.kind {
            EventKind::Create(_) => {
                for path in self.in_root(&event.paths) {
                    self.created(path, &mut out);
                }
            }
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)) if event.paths.len() == 2 => {
                let (from, to) = (&event.paths[0], &event.paths[1]);
                if from.starts_with(&self.root) {
                    self.deleted(from, &mut out);
                }
                if to.starts_with(&self.root) {
                    self.created(to, &mut out);
                }
            }
            // Unpaired rename halves: decide by what is on disk now
            EventKind::Modify(ModifyKind::Name(_)) => {
                for path in self.in_root(&event.paths) {
                    if path.exists() {
                        self.created(path, &mut out);
                    } else {
                        self.deleted(path, &mut out);
                    }
                }
            }
            EventKind::Modify(ModifyKind::Metadata(_)) => {
                for path in self.in_root(&event.paths) {
                    self.metadata_changed(path);
                }
            }
            EventKind::Modify(_) | EventKind::Any => {
                for path in self.in_root(&event.paths) {
                    self.modified(path, &mut out);
                }
            }
            EventKind::Remove(_) => {
                for path in self.in_root(&event.paths) {
                    self.deleted(path, &mut out);
                }
            }
            EventKind::Access(_) | EventKind::Other => {}
        }
        out
    }

    fn in_root<'a>(&'a self, paths: &'a [PathBuf]) -> impl Iterator<Item = &'a PathBuf> + 'a {
        paths
            .iter()
            .filter(move |p| p.starts_with(&self.root) && p.as_path() != self.root)
    }

    fn created(&self, path: &Path, out: &mut Vec<RawChangeEvent>) {
        let mut tree = self.tree.write().unwrap_or_else(PoisonError::into_inner);
        match tree.insert_path(path) {
            Ok(Some(node)) => {
                for file in node.files() {
                    if self.hide_read_only && file.read_only {
                        continue;
                    }
                    out.push(RawChangeEvent::new(&file.path, ChangeKind::Created));
                }
            }
            // Already gone again; the matching remove event follows
            Ok(None) => {}
            Err(e) => warn!("Cannot add {:?} to watched tree: {}", path, e),
        }
    }

    fn modified(&self, path: &Path, out: &mut Vec<RawChangeEvent>) {
        let read_only = {
            let tree = self.tree.read().unwrap_or_else(PoisonError::into_inner);
            match tree.get(path) {
                Some(WatchedNode::File(file)) => Some(file.read_only),
                // Directory content changes arrive as events for the children
                Some(WatchedNode::Directory(_)) => return,
                None => None,
            }
        };
        match read_only {
            Some(true) if self.hide_read_only => {}
            Some(_) => out.push(RawChangeEvent::new(path, ChangeKind::Modified)),
            // Modify for an entry we never saw created: pick it up now
            None => self.created(path, out),
        }
    }

    fn deleted(&self, path: &Path, out: &mut Vec<RawChangeEvent>) {
        let mut tree = self.tree.write().unwrap_or_else(PoisonError::into_inner);
        match tree.remove_path(path) {
            Some(node) => {
                for file in node.files() {
                    if self.hide_read_only && file.read_only {
                        continue;
                    }
                    out.push(RawChangeEvent::new(&file.path, ChangeKind::Deleted));
                }
            }
            None => out.push(RawChangeEvent::new(path, ChangeKind::Deleted)),
        }
    }

    fn metadata_changed(&self, path: &Path) {
        if let Ok(metadata) = std::fs::metadata(path) {
            let mut tree = self.tree.write().unwrap_or_else(PoisonError::into_inner);
            tree.set_read_only(path, metadata.permissions().readonly());
        }
    }
}

/// Watches one root directory recursively.
pub struct DirectoryWatcher {
    root: PathBuf,
    tree: SharedTree,
    watcher: Option<RecommendedWatcher>,
    receiver: Option<Receiver<RawChangeEvent>>,
    translator: Option<JoinHandle<()>>,
    closed: Arc<AtomicBool>,
}

impl DirectoryWatcher {
    /// Scan `root` and start watching it.
    pub fn open(root: &Path, hide_read_only: bool) -> SyncResult<Self> {
        if !root.is_dir() {
            return Err(SyncError::NotFound(root.to_path_buf()));
        }
        let root = std::fs::canonicalize(root)?;
        let tree: SharedTree = Arc::new(RwLock::new(WatchedDirectory::scan(&root)?));

        let (notify_tx, notify_rx) = channel::<notify::Result<Event>>();
        let mut watcher = notify::recommended_watcher(notify_tx)?;
        watcher.watch(&root, RecursiveMode::Recursive)?;

        let (raw_tx, raw_rx) = channel();
        let closed = Arc::new(AtomicBool::new(false));
        let translator = EventTranslator::new(&root, Arc::clone(&tree), hide_read_only);
        let handle = spawn_translator(translator, notify_rx, raw_tx, Arc::clone(&closed));

        info!("Watching {:?}", root);
        Ok(Self {
            root,
            tree,
            watcher: Some(watcher),
            receiver: Some(raw_rx),
            translator: Some(handle),
            closed,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn tree(&self) -> SharedTree {
        Arc::clone(&self.tree)
    }

    /// Take the event stream. Only the first call returns it.
    pub fn subscribe(&mut self) -> Option<Receiver<RawChangeEvent>> {
        self.receiver.take()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Release the OS watch. The event stream ends once the translator exits.
    pub fn close(&mut self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.watcher.take();
        if let Some(handle) = self.translator.take() {
            if handle.join().is_err() {
                warn!("Watcher translation thread panicked");
            }
        }
        info!("Stopped watching {:?}", self.root);
    }
}

impl Drop for DirectoryWatcher {
    fn drop(&mut self) {
        self.close();
    }
}

fn spawn_translator(
    mut translator: EventTranslator,
    notify_rx: Receiver<notify::Result<Event>>,
    raw_tx: Sender<RawChangeEvent>,
    closed: Arc<AtomicBool>,
) -> JoinHandle<()> {
    thread::spawn(move || {
        while !closed.load(Ordering::SeqCst) {
            match notify_rx.recv_timeout(CLOSE_POLL) {
                Ok(Ok(event)) => {
                    debug!("notify: {:?} {:?}", event.kind, event.paths);
                    for raw in translator.translate(&event) {
                        if raw_tx.send(raw).is_err() {
                            return;
                        }
                    }
                }
                Ok(Err(e)) => warn!("Watch error: {}", e),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
    })
}

//! In-memory mirror of a watched directory.
//!
//! The tree only tracks what the watcher has seen: directories, files, the
//! read-only flag and the last fingerprint the debouncer computed. It is
//! rebuilt one subtree at a time when directories appear.

use std::collections::BTreeMap;
use std::ffi::{OsStr, OsString};
use std::io;
use std::path::{Component, Path, PathBuf};

use log::{debug, warn};
use walkdir::WalkDir;

/// A file seen in the watched tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchedFile {
    pub path: PathBuf,
    pub read_only: bool,
    /// Lowercase hex SHA-256 of the content, once computed
    pub fingerprint: Option<String>,
}

impl WatchedFile {
    pub fn new(path: impl Into<PathBuf>, read_only: bool) -> Self {
        Self {
            path: path.into(),
            read_only,
            fingerprint: None,
        }
    }

    pub fn file_name(&self) -> Option<&str> {
        self.path.file_name().and_then(|n| n.to_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchedNode {
    Directory(WatchedDirectory),
    File(WatchedFile),
}

impl WatchedNode {
    pub fn path(&self) -> &Path {
        match self {
            WatchedNode::Directory(d) => &d.path,
            WatchedNode::File(f) => &f.path,
        }
    }

    /// Every file at or below this node.
    pub fn files(&self) -> Vec<&WatchedFile> {
        match self {
            WatchedNode::Directory(d) => d.files(),
            WatchedNode::File(f) => vec![f],
        }
    }
}

/// A directory with children ordered by name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchedDirectory {
    pub path: PathBuf,
    children: BTreeMap<OsString, WatchedNode>,
}

impl WatchedDirectory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            children: BTreeMap::new(),
        }
    }

    /// Build the tree for `root` from disk.
    pub fn scan(root: &Path) -> io::Result<Self> {
        let mut dir = Self::new(root);
        for entry in WalkDir::new(root).min_depth(1).sort_by_file_name() {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    warn!("Skipping unreadable entry under {:?}: {}", root, e);
                    continue;
                }
            };
            let rel = match entry.path().strip_prefix(root) {
                Ok(rel) => rel.to_path_buf(),
                Err(_) => continue,
            };
            let file_type = entry.file_type();
            if file_type.is_dir() {
                dir.ensure_dir(&rel);
            } else if file_type.is_file() {
                let read_only = entry
                    .metadata()
                    .map(|m| m.permissions().readonly())
                    .unwrap_or(false);
                dir.put_file(&rel, WatchedFile::new(entry.path(), read_only));
            }
        }
        debug!("Scanned {:?}: {} file(s)", root, dir.files().len());
        Ok(dir)
    }

    pub fn children(&self) -> impl Iterator<Item = (&OsStr, &WatchedNode)> {
        self.children.iter().map(|(k, v)| (k.as_os_str(), v))
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// Look up a node by absolute path (under this directory) or relative path.
    pub fn get(&self, path: &Path) -> Option<&WatchedNode> {
        let names = self.names(path)?;
        let (last, parents) = names.split_last()?;
        let mut dir = self;
        for name in parents {
            match dir.children.get(*name)? {
                WatchedNode::Directory(d) => dir = d,
                WatchedNode::File(_) => return None,
            }
        }
        dir.children.get(*last)
    }

    pub fn get_file(&self, path: &Path) -> Option<&WatchedFile> {
        match self.get(path)? {
            WatchedNode::File(f) => Some(f),
            WatchedNode::Directory(_) => None,
        }
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.get(path).is_some()
    }

    /// Add whatever is on disk at `path`, scanning directories recursively.
    ///
    /// Returns the inserted node. Missing paths are not an error; they yield
    /// `None` since the entry may already be gone again.
    pub fn insert_path(&mut self, path: &Path) -> io::Result<Option<&WatchedNode>> {
        let rel = match self.relative(path) {
            Some(rel) if rel.components().next().is_some() => rel,
            _ => return Ok(None),
        };
        let absolute = self.path.join(&rel);

        let metadata = match std::fs::metadata(&absolute) {
            Ok(m) => m,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };

        let node = if metadata.is_dir() {
            WatchedNode::Directory(Self::scan(&absolute)?)
        } else {
            WatchedNode::File(WatchedFile::new(&absolute, metadata.permissions().readonly()))
        };

        let (name, parent) = match split_name(&rel) {
            Some(parts) => parts,
            None => return Ok(None),
        };
        let dir = self.ensure_dir(&parent);
        // Keep a known fingerprint when a file is re-created in place
        let node = match (dir.children.remove(&name), node) {
            (Some(WatchedNode::File(old)), WatchedNode::File(mut new)) => {
                new.fingerprint = old.fingerprint;
                WatchedNode::File(new)
            }
            (_, node) => node,
        };
        dir.children.insert(name.clone(), node);
        Ok(dir.children.get(&name))
    }

    /// Remove the node at `path` and return it.
    pub fn remove_path(&mut self, path: &Path) -> Option<WatchedNode> {
        let rel = self.relative(path)?;
        let (name, parent) = split_name(&rel)?;
        self.dir_mut(&parent)?.children.remove(&name)
    }

    /// Update the read-only flag of a known file.
    pub fn set_read_only(&mut self, path: &Path, read_only: bool) -> bool {
        match self.file_mut(path) {
            Some(file) => {
                file.read_only = read_only;
                true
            }
            None => false,
        }
    }

    /// Record a freshly computed fingerprint. Returns false for unknown files.
    pub fn set_fingerprint(&mut self, path: &Path, fingerprint: Option<String>) -> bool {
        match self.file_mut(path) {
            Some(file) => {
                file.fingerprint = fingerprint;
                true
            }
            None => false,
        }
    }

    /// Every file in the tree, in name order.
    pub fn files(&self) -> Vec<&WatchedFile> {
        let mut out = Vec::new();
        self.collect_files(&mut out);
        out
    }

    fn collect_files<'a>(&'a self, out: &mut Vec<&'a WatchedFile>) {
        for node in self.children.values() {
            match node {
                WatchedNode::Directory(d) => d.collect_files(out),
                WatchedNode::File(f) => out.push(f),
            }
        }
    }

    fn file_mut(&mut self, path: &Path) -> Option<&mut WatchedFile> {
        let rel = self.relative(path)?;
        let (name, parent) = split_name(&rel)?;
        match self.dir_mut(&parent)?.children.get_mut(&name)? {
            WatchedNode::File(f) => Some(f),
            WatchedNode::Directory(_) => None,
        }
    }

    fn dir_mut(&mut self, rel: &Path) -> Option<&mut WatchedDirectory> {
        let mut dir = self;
        for name in normal_names(rel) {
            match dir.children.get_mut(name)? {
                WatchedNode::Directory(d) => dir = d,
                WatchedNode::File(_) => return None,
            }
        }
        Some(dir)
    }

    /// Walk to `rel`, creating missing directories. A file in the way is
    /// replaced by a directory.
    fn ensure_dir(&mut self, rel: &Path) -> &mut WatchedDirectory {
        let mut dir = self;
        for name in normal_names(rel) {
            let child_path = dir.path.join(name);
            let entry = dir
                .children
                .entry(name.to_os_string())
                .or_insert_with(|| WatchedNode::Directory(WatchedDirectory::new(&child_path)));
            if let WatchedNode::File(_) = entry {
                *entry = WatchedNode::Directory(WatchedDirectory::new(&child_path));
            }
            dir = match entry {
                WatchedNode::Directory(d) => d,
                WatchedNode::File(_) => unreachable!("file replaced by directory above"),
            };
        }
        dir
    }

    fn put_file(&mut self, rel: &Path, file: WatchedFile) {
        if let Some((name, parent)) = split_name(rel) {
            self.ensure_dir(&parent).children.insert(name, WatchedNode::File(file));
        }
    }

    fn relative(&self, path: &Path) -> Option<PathBuf> {
        if path.is_absolute() {
            path.strip_prefix(&self.path).ok().map(Path::to_path_buf)
        } else {
            Some(path.to_path_buf())
        }
    }

    fn names<'a>(&self, path: &'a Path) -> Option<Vec<&'a OsStr>> {
        let rel = if path.is_absolute() {
            path.strip_prefix(&self.path).ok()?
        } else {
            path
        };
        Some(normal_names(rel).collect())
    }
}

fn normal_names(path: &Path) -> impl Iterator<Item = &OsStr> {
    path.components().filter_map(|c| match c {
        Component::Normal(s) => Some(s),
        _ => None,
    })
}

fn split_name(rel: &Path) -> Option<(OsString, PathBuf)> {
    let names: Vec<&OsStr> = normal_names(rel).collect();
    let (last, parents) = names.split_last()?;
    Some((last.to_os_string(), parents.iter().collect()))
}

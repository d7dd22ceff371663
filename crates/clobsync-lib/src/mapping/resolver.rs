//! Resolve a local path to the table(s) that may hold its content.
//!
//! Rules whose directory covers the path are ranked longest prefix first.
//! Their tables, in that order and without duplicates, are the candidates.
//! The resolver never picks between several candidates; that decision
//! belongs to whoever drives the pipeline.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::debug;

use super::{MappingRule, TableMapping};

/// Outcome of resolving one path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MappingResult {
    /// No rule covers the path; the pipeline ignores it.
    NoMatch,
    /// Exactly one candidate table.
    SingleMatch(TableMapping),
    /// Several candidates, most specific rule first.
    AmbiguousMatch(Vec<TableMapping>),
}

impl MappingResult {
    /// All candidate tables, empty for `NoMatch`.
    pub fn candidates(&self) -> Vec<TableMapping> {
        match self {
            MappingResult::NoMatch => Vec::new(),
            MappingResult::SingleMatch(t) => vec![t.clone()],
            MappingResult::AmbiguousMatch(ts) => ts.clone(),
        }
    }

    pub fn is_match(&self) -> bool {
        !matches!(self, MappingResult::NoMatch)
    }
}

/// Resolve `relative_path` (relative to the watch root) against `rules`.
pub fn resolve(relative_path: &Path, rules: &[MappingRule]) -> MappingResult {
    let mut covering: Vec<&MappingRule> = rules.iter().filter(|r| r.covers(relative_path)).collect();
    // Stable sort keeps configuration order between rules of equal depth
    covering.sort_by(|a, b| b.depth().cmp(&a.depth()));

    let mut candidates: Vec<TableMapping> = Vec::new();
    for rule in covering {
        for table in &rule.tables {
            if !candidates
                .iter()
                .any(|c| c.qualified_name() == table.qualified_name())
            {
                candidates.push(table.clone());
            }
        }
    }

    debug!(
        "resolve({:?}) -> {} candidate(s)",
        relative_path,
        candidates.len()
    );

    match candidates.len() {
        0 => MappingResult::NoMatch,
        1 => MappingResult::SingleMatch(candidates.remove(0)),
        _ => MappingResult::AmbiguousMatch(candidates),
    }
}

/// Resolver bound to one watch root and its session rules.
#[derive(Debug, Clone)]
pub struct MappingResolver {
    root: PathBuf,
    rules: Arc<Vec<MappingRule>>,
}

impl MappingResolver {
    pub fn new(root: impl Into<PathBuf>, rules: Arc<Vec<MappingRule>>) -> Self {
        Self {
            root: root.into(),
            rules,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn rules(&self) -> &[MappingRule] {
        &self.rules
    }

    /// Path relative to the root, or `None` when `path` lies outside it.
    pub fn relative<'a>(&self, path: &'a Path) -> Option<&'a Path> {
        if path.is_absolute() {
            path.strip_prefix(&self.root).ok()
        } else {
            Some(path)
        }
    }

    /// Resolve an absolute path under the root, or a root-relative path.
    pub fn resolve(&self, path: &Path) -> MappingResult {
        match self.relative(path) {
            Some(rel) => resolve(rel, &self.rules),
            None => MappingResult::NoMatch,
        }
    }
}

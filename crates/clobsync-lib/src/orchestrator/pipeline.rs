//! Single-operation state machine.
//!
//! ```text
//! Idle ─> Resolving ─┬───────────────────────────────┬─> BackingUp ─> Writing ─> Completed
//!                    └─> WaitingForSelection ─> Resolving                           │
//!                                                                       Aborted <───┘
//! ```
//!
//! One call to [`execute`] runs one request to completion on the calling
//! worker. The queue guarantees no other request for the same path runs
//! at the same time.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use log::{debug, info, warn};

use super::listener::SyncListener;
use super::remote_index::RemoteIndex;
use super::timeout::{run_with_timeout, Stragglers};
use crate::backup::{BackupStore, FileBackup};
use crate::error::{IoErrorExt, SyncError};
use crate::mapping::{MappingResolver, MappingResult, TableMapping};
use crate::operations::{OperationReport, Phase, SkipReason, SyncAction, SyncOutcome, SyncRequest};
use crate::staging::write_atomic;
use crate::store::{NewRow, RemoteFileRecord, RowStore};
use crate::watch::{fingerprint_bytes, ChangeKind};

/// Where an operation currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationState {
    Idle,
    Resolving,
    WaitingForSelection,
    BackingUp,
    Writing,
    Completed,
    Aborted,
}

/// Settings the pipeline needs per operation.
#[derive(Debug, Clone, Copy)]
pub struct PipelineOptions {
    pub auto_insert: bool,
    pub io_timeout: Duration,
}

/// Everything an operation may touch, shared by all workers.
pub(crate) struct PipelineContext {
    pub resolver: MappingResolver,
    pub store: Arc<dyn RowStore>,
    pub backups: Arc<BackupStore>,
    pub listener: Arc<dyn SyncListener>,
    pub index: Arc<RemoteIndex>,
    pub options: PipelineOptions,
    /// Fingerprint of the content last pushed or downloaded, per path
    synced: Mutex<HashMap<PathBuf, String>>,
}

impl PipelineContext {
    pub fn new(
        resolver: MappingResolver,
        store: Arc<dyn RowStore>,
        backups: Arc<BackupStore>,
        listener: Arc<dyn SyncListener>,
        options: PipelineOptions,
    ) -> Self {
        let index = Arc::new(RemoteIndex::new(Arc::clone(&store), options.io_timeout));
        Self {
            resolver,
            store,
            backups,
            listener,
            index,
            options,
            synced: Mutex::new(HashMap::new()),
        }
    }

    fn synced(&self) -> MutexGuard<'_, HashMap<PathBuf, String>> {
        self.synced.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn mark_synced(&self, path: &Path, content: &[u8]) {
        self.synced().insert(path.to_path_buf(), fingerprint_bytes(content));
    }
}

/// Why an operation stopped early.
struct Abort {
    phase: Phase,
    error: SyncError,
}

fn abort(phase: Phase, error: SyncError) -> Abort {
    Abort { phase, error }
}

type Step<T> = Result<T, Abort>;

/// Bookkeeping for one running operation.
struct Operation<'a> {
    path: &'a Path,
    state: OperationState,
    backup: Option<FileBackup>,
    structural: bool,
    /// Store calls that missed their deadline but still touch the row
    stragglers: Stragglers,
}

impl<'a> Operation<'a> {
    fn new(path: &'a Path) -> Self {
        Self {
            path,
            state: OperationState::Idle,
            backup: None,
            structural: false,
            stragglers: Stragglers::default(),
        }
    }

    fn enter(&mut self, state: OperationState) {
        debug!("{:?}: {:?} -> {:?}", self.path, self.state, state);
        self.state = state;
    }
}

/// Run one request through the pipeline.
///
/// The returned [`Stragglers`] must be waited on before the path is released.
pub(crate) fn execute(ctx: &PipelineContext, request: &SyncRequest) -> (OperationReport, Stragglers) {
    let started_at = Utc::now();
    let mut op = Operation::new(request.path());
    op.enter(OperationState::Resolving);

    let outcome = match run(ctx, request, &mut op) {
        Ok(outcome) => {
            op.enter(OperationState::Completed);
            outcome
        }
        Err(Abort { error, .. }) if error.is_declined() => {
            op.enter(OperationState::Aborted);
            info!("{:?}: selection declined", request.path());
            SyncOutcome::Skipped(SkipReason::SelectionDeclined)
        }
        Err(Abort { phase, error }) => {
            op.enter(OperationState::Aborted);
            warn!("{:?}: {} failed while {}: {}", request.path(), request.action().name(), phase, error);
            SyncOutcome::failed(phase, error)
        }
    };

    let report = OperationReport {
        path: request.path().to_path_buf(),
        outcome,
        structural_change: op.structural,
        backup: op.backup,
        started_at,
        finished_at: Utc::now(),
    };
    (report, op.stragglers)
}

fn run(ctx: &PipelineContext, request: &SyncRequest, op: &mut Operation<'_>) -> Step<SyncOutcome> {
    let path = request.path();
    let candidates = match ctx.resolver.resolve(path) {
        MappingResult::NoMatch => {
            debug!("{:?}: no mapping rule", path);
            return Ok(SyncOutcome::Skipped(SkipReason::NoMapping));
        }
        result => result.candidates(),
    };

    match request.action() {
        SyncAction::Changed {
            kind: ChangeKind::Deleted,
            ..
        } => {
            ctx.synced().remove(path);
            op.structural = true;
            Ok(SyncOutcome::Skipped(SkipReason::LocalDelete))
        }
        SyncAction::Changed { fingerprint, .. } => {
            if !path.is_file() {
                return Ok(SyncOutcome::Skipped(SkipReason::Vanished));
            }
            if let Some(fp) = fingerprint {
                if ctx.synced().get(path) == Some(fp) {
                    return Ok(SyncOutcome::Skipped(SkipReason::Unchanged));
                }
            }
            match find_matches(ctx, path, &candidates)? {
                matches if matches.is_empty() => {
                    if ctx.options.auto_insert {
                        insert(ctx, op, &candidates)
                    } else {
                        Ok(SyncOutcome::Skipped(SkipReason::NotInDatabase))
                    }
                }
                matches => {
                    let record = select_record(ctx, op, matches)?;
                    update(ctx, op, record)
                }
            }
        }
        SyncAction::Push => {
            require_local(path)?;
            let matches = find_matches(ctx, path, &candidates)?;
            if matches.is_empty() {
                return Err(abort(
                    Phase::Resolving,
                    SyncError::RemoteRecordMissing(path.to_path_buf()),
                ));
            }
            let record = select_record(ctx, op, matches)?;
            update(ctx, op, record)
        }
        SyncAction::Insert => {
            require_local(path)?;
            insert(ctx, op, &candidates)
        }
        SyncAction::Download => {
            let matches = find_matches(ctx, path, &candidates)?;
            if matches.is_empty() {
                return Err(abort(
                    Phase::Resolving,
                    SyncError::RemoteRecordMissing(path.to_path_buf()),
                ));
            }
            let record = select_record(ctx, op, matches)?;
            download(ctx, op, record)
        }
    }
}

fn require_local(path: &Path) -> Step<()> {
    if path.is_file() {
        Ok(())
    } else {
        Err(abort(Phase::Resolving, SyncError::NotFound(path.to_path_buf())))
    }
}

fn file_name(path: &Path) -> Step<&str> {
    path.file_name().and_then(|n| n.to_str()).ok_or_else(|| {
        abort(
            Phase::Resolving,
            SyncError::InvalidMapping(format!("{:?} has no usable file name", path)),
        )
    })
}

/// Candidate tables holding a row for this file, with the matching record.
fn find_matches(
    ctx: &PipelineContext,
    path: &Path,
    candidates: &[TableMapping],
) -> Step<Vec<(TableMapping, RemoteFileRecord)>> {
    let name = file_name(path)?;
    let mut matches = Vec::new();
    for table in candidates {
        let found = ctx
            .index
            .find(table, name)
            .map_err(|e| abort(Phase::Resolving, e))?;
        if let Some(record) = found {
            matches.push((table.clone(), record));
        }
    }
    Ok(matches)
}

/// Ask the listener when more than one candidate is possible.
fn select_table(ctx: &PipelineContext, op: &mut Operation<'_>, candidates: &[TableMapping]) -> Step<TableMapping> {
    if let [only] = candidates {
        return Ok(only.clone());
    }

    op.enter(OperationState::WaitingForSelection);
    let choice = ctx
        .listener
        .request_table_selection(op.path, candidates)
        .ok_or_else(|| {
            abort(
                Phase::WaitingForSelection,
                SyncError::AmbiguityDeclined(op.path.to_path_buf()),
            )
        })?;

    let selected = candidates
        .iter()
        .find(|c| c.qualified_name() == choice.qualified_name())
        .cloned()
        .ok_or_else(|| {
            abort(
                Phase::WaitingForSelection,
                SyncError::InvalidMapping(format!(
                    "{} is not a candidate for {:?}",
                    choice.qualified_name(),
                    op.path
                )),
            )
        })?;
    op.enter(OperationState::Resolving);
    Ok(selected)
}

fn select_record(
    ctx: &PipelineContext,
    op: &mut Operation<'_>,
    matches: Vec<(TableMapping, RemoteFileRecord)>,
) -> Step<(TableMapping, RemoteFileRecord)> {
    let tables: Vec<TableMapping> = matches.iter().map(|(t, _)| t.clone()).collect();
    let chosen = select_table(ctx, op, &tables)?.qualified_name();
    matches
        .into_iter()
        .find(|(t, _)| t.qualified_name() == chosen)
        .ok_or_else(|| abort(Phase::Resolving, SyncError::RemoteRecordMissing(op.path.to_path_buf())))
}

fn select_mime_type(ctx: &PipelineContext, op: &mut Operation<'_>, table: &TableMapping) -> Step<Option<String>> {
    match table.mime_candidates() {
        [] => Ok(None),
        [only] => Ok(Some(only.clone())),
        candidates => {
            op.enter(OperationState::WaitingForSelection);
            let mime = ctx
                .listener
                .request_mime_type_selection(op.path, candidates)
                .ok_or_else(|| {
                    abort(
                        Phase::WaitingForSelection,
                        SyncError::AmbiguityDeclined(op.path.to_path_buf()),
                    )
                })?;
            op.enter(OperationState::Resolving);
            Ok(Some(mime))
        }
    }
}

fn read_local(path: &Path, phase: Phase) -> Step<Vec<u8>> {
    std::fs::read(path).map_err(|e| abort(phase, e.into_sync_error(path)))
}

fn update(ctx: &PipelineContext, op: &mut Operation<'_>, target: (TableMapping, RemoteFileRecord)) -> Step<SyncOutcome> {
    let (table, record) = target;

    op.enter(OperationState::BackingUp);
    let content = read_local(op.path, Phase::BackingUp)?;
    let backup = ctx
        .backups
        .snapshot_content(op.path, &content)
        .map_err(|e| abort(Phase::BackingUp, e))?;
    op.backup = Some(backup);

    op.enter(OperationState::Writing);
    let store = Arc::clone(&ctx.store);
    let key = record.key.clone();
    let pushed = content.clone();
    run_with_timeout("write_payload", ctx.options.io_timeout, &mut op.stragglers, move || {
        store
            .write_payload(&table, &key, &pushed, None)
            .map_err(|source| SyncError::RemoteWriteFailed {
                table: table.qualified_name(),
                source,
            })
    })
    .map_err(|e| abort(Phase::Writing, e))?;

    ctx.mark_synced(op.path, &content);
    info!("{:?}: updated {} [{}]", op.path, record.table, record.key);
    Ok(SyncOutcome::Updated(record))
}

fn insert(ctx: &PipelineContext, op: &mut Operation<'_>, candidates: &[TableMapping]) -> Step<SyncOutcome> {
    let table = select_table(ctx, op, candidates)?;
    let mime_type = select_mime_type(ctx, op, &table)?;
    let name = file_name(op.path)?.to_string();

    op.enter(OperationState::Writing);
    let content = read_local(op.path, Phase::Writing)?;
    let row = NewRow {
        mnemonic: table.mnemonic_for(&name),
        content: content.clone(),
        mime_type,
    };

    let store = Arc::clone(&ctx.store);
    let mapping = table.clone();
    let key = run_with_timeout("insert_row", ctx.options.io_timeout, &mut op.stragglers, move || {
        store
            .insert_row(&mapping, &row)
            .map_err(|source| SyncError::RemoteWriteFailed {
                table: mapping.qualified_name(),
                source,
            })
    })
    .map_err(|e| abort(Phase::Writing, e))?;

    let record = RemoteFileRecord::new(table.qualified_name(), key, name);
    ctx.index.record_inserted(record.clone());
    ctx.mark_synced(op.path, &content);
    op.structural = true;
    info!("{:?}: inserted into {} [{}]", op.path, record.table, record.key);
    Ok(SyncOutcome::Inserted(record))
}

fn download(ctx: &PipelineContext, op: &mut Operation<'_>, target: (TableMapping, RemoteFileRecord)) -> Step<SyncOutcome> {
    let (table, record) = target;
    let existed = op.path.exists();

    if existed {
        op.enter(OperationState::BackingUp);
        let backup = ctx
            .backups
            .snapshot(op.path)
            .map_err(|e| abort(Phase::BackingUp, e))?;
        op.backup = Some(backup);
    }

    op.enter(OperationState::Writing);
    let store = Arc::clone(&ctx.store);
    let key = record.key.clone();
    let payload = run_with_timeout("read_payload", ctx.options.io_timeout, &mut op.stragglers, move || {
        store
            .read_payload(&table, &key)
            .map_err(|source| SyncError::RemoteReadFailed {
                table: table.qualified_name(),
                source,
            })
    })
    .map_err(|e| abort(Phase::Writing, e))?;

    write_atomic(op.path, &payload).map_err(|e| abort(Phase::Writing, e.into_local_write_error(op.path)))?;

    ctx.mark_synced(op.path, &payload);
    op.structural = !existed;
    info!("{:?}: downloaded from {} [{}]", op.path, record.table, record.key);
    Ok(SyncOutcome::Downloaded(record))
}

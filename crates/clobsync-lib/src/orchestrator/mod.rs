//! Sync orchestrator
//!
//! Consumes debounced change events and explicit requests, runs each through
//! the pipeline on a worker pool and reports outcomes to the listener.
//!
//! # Architecture
//!
//! ```text
//! DebouncedChangeEvent ─┐
//!                       ├──> SyncQueue ──> worker 1..n ──> pipeline::execute ──> SyncListener
//! submit(path, action) ─┘    (per-path exclusion)              │
//!                                                 resolver, backups, row store
//! ```

pub mod listener;
pub mod pipeline;
pub mod remote_index;
mod timeout;

pub use listener::{NoopListener, SyncListener};
pub use pipeline::{OperationState, PipelineOptions};
pub use remote_index::RemoteIndex;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use chrono::Utc;
use log::{debug, info, warn};

use crate::backup::BackupStore;
use crate::mapping::MappingResolver;
use crate::operations::{
    OperationReport, SkipReason, SyncAction, SyncOutcome, SyncQueue, SyncRequest,
};
use crate::store::RowStore;
use crate::watch::DebouncedChangeEvent;
use pipeline::PipelineContext;

/// Worker pool size when none is configured
pub const DEFAULT_WORKERS: usize = 4;

#[derive(Default)]
struct Batch {
    started: bool,
    active: usize,
    structural: bool,
}

struct Shared {
    queue: Arc<SyncQueue>,
    ctx: PipelineContext,
    next_seq: AtomicU64,
    replies: Mutex<HashMap<u64, Sender<OperationReport>>>,
    batch: Mutex<Batch>,
}

impl Shared {
    fn enqueue(&self, path: PathBuf, action: SyncAction) -> Option<u64> {
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        if self.queue.push(SyncRequest::new(seq, path, action)) {
            Some(seq)
        } else {
            None
        }
    }

    fn replies(&self) -> MutexGuard<'_, HashMap<u64, Sender<OperationReport>>> {
        self.replies.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn batch(&self) -> MutexGuard<'_, Batch> {
        self.batch.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn begin(&self) {
        let mut batch = self.batch();
        if !batch.started {
            batch.started = true;
            self.ctx.listener.on_processing_started();
        }
        batch.active += 1;
    }

    fn end(&self, structural: bool) {
        let mut batch = self.batch();
        batch.active -= 1;
        batch.structural |= structural;
        if batch.active == 0 && self.queue.is_empty() {
            batch.started = false;
            let structural = std::mem::take(&mut batch.structural);
            self.ctx.listener.on_processing_finished(structural);
        }
    }

    fn work(&self) {
        while let Some(job) = self.queue.next_job() {
            self.begin();
            let (report, stragglers) = pipeline::execute(&self.ctx, job.request());
            self.ctx
                .listener
                .on_operation_complete(&report.path, &report.outcome);
            if let Some(reply) = self.replies().remove(&job.request().seq()) {
                let _ = reply.send(report.clone());
            }
            // A timed-out store call still owns the path until it returns
            if !stragglers.is_empty() {
                debug!("{:?}: holding path for late store calls", report.path);
            }
            stragglers.wait();
            // Release the path before announcing the batch end
            drop(job);
            self.end(report.structural_change);
        }
    }
}

/// Runs sync operations for one watched root.
pub struct SyncOrchestrator {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
    consumers: Vec<JoinHandle<()>>,
}

impl SyncOrchestrator {
    /// Start the worker pool.
    pub fn start(
        resolver: MappingResolver,
        store: Arc<dyn RowStore>,
        backups: Arc<BackupStore>,
        listener: Arc<dyn SyncListener>,
        options: PipelineOptions,
        workers: usize,
    ) -> Self {
        let shared = Arc::new(Shared {
            queue: SyncQueue::new(),
            ctx: PipelineContext::new(resolver, store, backups, listener, options),
            next_seq: AtomicU64::new(1),
            replies: Mutex::new(HashMap::new()),
            batch: Mutex::new(Batch::default()),
        });

        let workers = (0..workers.max(1))
            .map(|_| {
                let shared = Arc::clone(&shared);
                thread::spawn(move || shared.work())
            })
            .collect::<Vec<_>>();
        info!("Sync orchestrator started with {} worker(s)", workers.len());

        Self {
            shared,
            workers,
            consumers: Vec::new(),
        }
    }

    /// Queue a debounced change. Returns false after shutdown.
    pub fn handle_event(&self, event: DebouncedChangeEvent) -> bool {
        let action = SyncAction::Changed {
            kind: event.kind,
            fingerprint: event.fingerprint,
        };
        self.shared.enqueue(event.path, action).is_some()
    }

    /// Queue every event from `events` until the stream ends.
    pub fn consume(&mut self, events: Receiver<DebouncedChangeEvent>) {
        let shared = Arc::clone(&self.shared);
        self.consumers.push(thread::spawn(move || {
            for event in events {
                debug!("orchestrator: {:?} {:?}", event.kind, event.path);
                let action = SyncAction::Changed {
                    kind: event.kind,
                    fingerprint: event.fingerprint,
                };
                if shared.enqueue(event.path, action).is_none() {
                    break;
                }
            }
        }));
    }

    /// Queue an explicit request; the receiver gets its report.
    ///
    /// Returns `None` after shutdown.
    pub fn submit(&self, path: PathBuf, action: SyncAction) -> Option<Receiver<OperationReport>> {
        let (tx, rx) = channel();
        let seq = self.shared.next_seq.fetch_add(1, Ordering::SeqCst);
        // Register before pushing so a fast worker finds the reply channel
        self.shared.replies().insert(seq, tx);
        if self.shared.queue.push(SyncRequest::new(seq, path, action)) {
            Some(rx)
        } else {
            self.shared.replies().remove(&seq);
            None
        }
    }

    /// Submit and wait for the report.
    pub fn run(&self, path: PathBuf, action: SyncAction) -> Option<OperationReport> {
        self.submit(path, action)?.recv().ok()
    }

    pub fn remote_index(&self) -> &RemoteIndex {
        &self.shared.ctx.index
    }

    pub fn resolver(&self) -> &MappingResolver {
        &self.shared.ctx.resolver
    }

    /// Requests waiting for a worker.
    pub fn pending(&self) -> usize {
        self.shared.queue.len()
    }

    /// Stop accepting work, drop queued requests and wait for in-flight ones.
    ///
    /// Returns the requests that never started.
    pub fn shutdown(&mut self) -> Vec<SyncRequest> {
        let dropped = self.shared.queue.close();
        for request in &dropped {
            if let Some(reply) = self.shared.replies().remove(&request.seq()) {
                let now = Utc::now();
                let _ = reply.send(OperationReport {
                    path: request.path().to_path_buf(),
                    outcome: SyncOutcome::Skipped(SkipReason::Cancelled),
                    structural_change: false,
                    backup: None,
                    started_at: now,
                    finished_at: now,
                });
            }
        }
        if !dropped.is_empty() {
            info!("Dropped {} queued request(s) on shutdown", dropped.len());
        }

        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                warn!("Sync worker panicked");
            }
        }
        // Consumers stop on their own once the event stream ends
        self.consumers.clear();
        dropped
    }
}

impl Drop for SyncOrchestrator {
    fn drop(&mut self) {
        if !self.workers.is_empty() {
            self.shutdown();
        }
    }
}

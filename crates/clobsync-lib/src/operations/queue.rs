//! Keyed request queue for the worker pool.
//!
//! This module provides a thread-safe queue of [`SyncRequest`]s with:
//! - `VecDeque` storage, oldest first
//! - `Condvar` notification (wake-on-push and wake-on-release for workers)
//! - an in-flight path set, so at most one request per path runs at a time
//!
//! A worker always receives the oldest request whose path is not in flight.
//! Requests for one path therefore run one after another in queue order,
//! while requests for different paths run in parallel.
//!
//! # Example
//!
//! ```
//! use clobsync_lib::operations::{SyncAction, SyncQueue, SyncRequest};
//! use std::path::PathBuf;
//!
//! let queue = SyncQueue::new();
//! queue.push(SyncRequest::new(1, PathBuf::from("a.txt"), SyncAction::Push));
//! queue.push(SyncRequest::new(2, PathBuf::from("a.txt"), SyncAction::Download));
//!
//! let first = queue.try_next_job().unwrap();
//! assert_eq!(first.request().seq(), 1);
//! // a.txt is in flight, the second request waits
//! assert!(queue.try_next_job().is_none());
//! drop(first);
//! assert_eq!(queue.try_next_job().unwrap().request().seq(), 2);
//! ```

use log::debug;
use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use super::SyncRequest;

/// Thread-safe request queue with per-path exclusion.
pub struct SyncQueue {
    inner: Mutex<QueueInner>,
    /// Signalled when a request is pushed, a path is released or the queue closes
    changed: Condvar,
}

struct QueueInner {
    queue: VecDeque<SyncRequest>,
    in_flight: HashSet<PathBuf>,
    closed: bool,
}

/// A request claimed by a worker.
///
/// The path stays in flight until the job is dropped.
pub struct ClaimedJob {
    queue: Arc<SyncQueue>,
    request: SyncRequest,
}

impl ClaimedJob {
    pub fn request(&self) -> &SyncRequest {
        &self.request
    }
}

impl Drop for ClaimedJob {
    fn drop(&mut self) {
        self.queue.release(self.request.path());
    }
}

impl SyncQueue {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(QueueInner {
                queue: VecDeque::new(),
                in_flight: HashSet::new(),
                closed: false,
            }),
            changed: Condvar::new(),
        })
    }

    /// Push a request. Returns false once the queue is closed.
    pub fn push(&self, request: SyncRequest) -> bool {
        let mut inner = self.lock();
        if inner.closed {
            debug!("SyncQueue::push: closed, dropping seq={}", request.seq());
            return false;
        }
        debug!(
            "SyncQueue::push: seq={} path={:?} queue_len={}",
            request.seq(),
            request.path(),
            inner.queue.len() + 1
        );
        inner.queue.push_back(request);
        drop(inner); // Release lock before notify
        self.changed.notify_all();
        true
    }

    /// Claim the oldest runnable request (non-blocking).
    pub fn try_next_job(self: &Arc<Self>) -> Option<ClaimedJob> {
        let mut inner = self.lock();
        self.claim(&mut inner)
    }

    /// Claim the oldest runnable request, blocking until one is available.
    ///
    /// Returns `None` once the queue is closed.
    pub fn next_job(self: &Arc<Self>) -> Option<ClaimedJob> {
        let mut inner = self.lock();
        loop {
            if inner.closed {
                return None;
            }
            if let Some(job) = self.claim(&mut inner) {
                return Some(job);
            }
            inner = self
                .changed
                .wait(inner)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Close the queue and return the requests that never started.
    ///
    /// Claimed jobs are unaffected and release their paths as usual.
    pub fn close(&self) -> Vec<SyncRequest> {
        let mut inner = self.lock();
        inner.closed = true;
        let dropped: Vec<SyncRequest> = inner.queue.drain(..).collect();
        drop(inner);
        self.changed.notify_all();
        if !dropped.is_empty() {
            debug!("SyncQueue::close: dropped {} queued request(s)", dropped.len());
        }
        dropped
    }

    pub fn is_empty(&self) -> bool {
        self.lock().queue.is_empty()
    }

    /// Number of queued (not yet claimed) requests.
    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    fn claim(self: &Arc<Self>, inner: &mut QueueInner) -> Option<ClaimedJob> {
        let index = inner
            .queue
            .iter()
            .position(|r| !inner.in_flight.contains(r.path()))?;
        let request = inner.queue.remove(index)?;
        inner.in_flight.insert(request.path().to_path_buf());
        debug!(
            "SyncQueue::claim: seq={} path={:?} remaining={}",
            request.seq(),
            request.path(),
            inner.queue.len()
        );
        Some(ClaimedJob {
            queue: Arc::clone(self),
            request,
        })
    }

    fn release(&self, path: &Path) {
        let mut inner = self.lock();
        inner.in_flight.remove(path);
        drop(inner);
        self.changed.notify_all();
    }

    fn lock(&self) -> MutexGuard<'_, QueueInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

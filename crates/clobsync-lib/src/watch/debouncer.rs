//! Per-path debouncing of raw change events.
//!
//! Every raw event (re)starts a quiet-period timer for its path and replaces
//! the pending kind. When a timer expires without further events, the path's
//! fingerprint is refreshed in the shared tree and exactly one
//! [`DebouncedChangeEvent`] is emitted. Paths never delay each other.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::mpsc::{Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, warn};

use super::{fingerprint, ChangeKind, DebouncedChangeEvent, RawChangeEvent, SharedTree};

struct Pending {
    deadline: Instant,
    kind: ChangeKind,
}

struct State {
    pending: HashMap<PathBuf, Pending>,
    output: Option<Sender<DebouncedChangeEvent>>,
    closed: bool,
}

struct Shared {
    state: Mutex<State>,
    wake: Condvar,
    quiet: Duration,
    tree: Option<SharedTree>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self, event: RawChangeEvent) {
        let mut state = self.lock();
        if state.closed {
            return;
        }
        debug!("debounce: {:?} {:?}", event.kind, event.path);
        state.pending.insert(
            event.path,
            Pending {
                deadline: Instant::now() + self.quiet,
                kind: event.kind,
            },
        );
        drop(state);
        self.wake.notify_one();
    }
}

/// Coalesces raw events per path over a fixed quiet duration.
pub struct ChangeDebouncer {
    shared: Arc<Shared>,
    timer: Option<JoinHandle<()>>,
    forwarders: Vec<JoinHandle<()>>,
}

impl ChangeDebouncer {
    /// Debouncer without a tree; emitted events carry a freshly read fingerprint.
    pub fn new(quiet: Duration, output: Sender<DebouncedChangeEvent>) -> Self {
        Self::build(quiet, None, output)
    }

    /// Debouncer that also records fingerprints in `tree`.
    pub fn with_tree(quiet: Duration, tree: SharedTree, output: Sender<DebouncedChangeEvent>) -> Self {
        Self::build(quiet, Some(tree), output)
    }

    fn build(quiet: Duration, tree: Option<SharedTree>, output: Sender<DebouncedChangeEvent>) -> Self {
        let shared = Arc::new(Shared {
            state: Mutex::new(State {
                pending: HashMap::new(),
                output: Some(output),
                closed: false,
            }),
            wake: Condvar::new(),
            quiet,
            tree,
        });
        let timer = {
            let shared = Arc::clone(&shared);
            thread::spawn(move || run_timer(shared))
        };
        Self {
            shared,
            timer: Some(timer),
            forwarders: Vec::new(),
        }
    }

    /// Register a raw event.
    pub fn notify(&self, event: RawChangeEvent) {
        self.shared.notify(event);
    }

    /// Feed every event from `events` into the debouncer on a helper thread.
    pub fn attach(&mut self, events: Receiver<RawChangeEvent>) {
        let shared = Arc::clone(&self.shared);
        self.forwarders.push(thread::spawn(move || {
            for event in events {
                if shared.lock().closed {
                    break;
                }
                shared.notify(event);
            }
        }));
    }

    /// Number of paths with a running timer.
    pub fn pending_count(&self) -> usize {
        self.shared.lock().pending.len()
    }

    /// Cancel every pending timer without firing it and end the output stream.
    pub fn close(&mut self) {
        {
            let mut state = self.shared.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            let cancelled = state.pending.len();
            state.pending.clear();
            state.output = None;
            if cancelled > 0 {
                debug!("debounce: cancelled {} pending timer(s)", cancelled);
            }
        }
        self.shared.wake.notify_all();
        if let Some(handle) = self.timer.take() {
            if handle.join().is_err() {
                warn!("Debounce timer thread panicked");
            }
        }
        // Forwarders exit when their source closes; they no longer feed us.
        self.forwarders.clear();
    }
}

impl Drop for ChangeDebouncer {
    fn drop(&mut self) {
        self.close();
    }
}

fn run_timer(shared: Arc<Shared>) {
    let mut state = shared.lock();
    loop {
        if state.closed {
            return;
        }

        let now = Instant::now();
        let due: Vec<PathBuf> = state
            .pending
            .iter()
            .filter(|(_, p)| p.deadline <= now)
            .map(|(path, _)| path.clone())
            .collect();

        if !due.is_empty() {
            let fired: Vec<(PathBuf, ChangeKind)> = due
                .into_iter()
                .filter_map(|path| state.pending.remove(&path).map(|p| (path, p.kind)))
                .collect();
            drop(state);

            let events: Vec<DebouncedChangeEvent> = fired
                .into_iter()
                .map(|(path, kind)| DebouncedChangeEvent {
                    fingerprint: refresh_fingerprint(&shared, &path),
                    path,
                    kind,
                })
                .collect();

            // Sending under the lock: a close that won the race suppresses these
            state = shared.lock();
            if state.closed {
                debug!("debounce: dropping {} event(s) after close", events.len());
                return;
            }
            if let Some(output) = &state.output {
                for event in events {
                    debug!("debounce: fire {:?} {:?}", event.kind, event.path);
                    if output.send(event).is_err() {
                        debug!("debounce: receiver gone");
                    }
                }
            }
            continue;
        }

        let next = state.pending.values().map(|p| p.deadline).min();
        state = match next {
            Some(deadline) => {
                let wait = deadline.saturating_duration_since(now);
                shared
                    .wake
                    .wait_timeout(state, wait)
                    .unwrap_or_else(PoisonError::into_inner)
                    .0
            }
            None => shared.wake.wait(state).unwrap_or_else(PoisonError::into_inner),
        };
    }
}

fn refresh_fingerprint(shared: &Shared, path: &std::path::Path) -> Option<String> {
    let fp = fingerprint(path).ok();
    if let Some(tree) = &shared.tree {
        let mut tree = tree.write().unwrap_or_else(PoisonError::into_inner);
        tree.set_fingerprint(path, fp.clone());
    }
    fp
}

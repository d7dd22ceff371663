//! Bounded waits for row store calls.

use std::io;
use std::sync::mpsc::{channel, RecvTimeoutError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, warn};

use crate::error::{SyncError, SyncResult};

/// Store calls that outlived their deadline.
///
/// The call keeps running on its helper thread. Whoever holds the path must
/// [`wait`](Stragglers::wait) before releasing it.
#[derive(Debug, Default)]
pub(crate) struct Stragglers(Vec<(&'static str, JoinHandle<()>)>);

impl Stragglers {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Block until every late call has returned.
    pub fn wait(self) {
        for (operation, handle) in self.0 {
            debug!("Waiting for late {} to finish", operation);
            if handle.join().is_err() {
                warn!("{} panicked after its deadline", operation);
            }
        }
    }
}

/// Run `f` on a helper thread and wait at most `timeout` for its result.
///
/// An expired call keeps running; its handle goes to `stragglers` and its
/// result is discarded.
pub(crate) fn run_with_timeout<T, F>(
    operation: &'static str,
    timeout: Duration,
    stragglers: &mut Stragglers,
    f: F,
) -> SyncResult<T>
where
    F: FnOnce() -> SyncResult<T> + Send + 'static,
    T: Send + 'static,
{
    let (tx, rx) = channel();
    let handle = thread::Builder::new()
        .name(format!("clobsync-{}", operation))
        .spawn(move || {
            let _ = tx.send(f());
        })?;

    match rx.recv_timeout(timeout) {
        Ok(result) => {
            // The helper only has to return after sending
            let _ = handle.join();
            result
        }
        Err(RecvTimeoutError::Timeout) => {
            stragglers.0.push((operation, handle));
            Err(SyncError::Timeout {
                operation,
                after: timeout,
            })
        }
        Err(RecvTimeoutError::Disconnected) => {
            let _ = handle.join();
            Err(SyncError::Io(io::Error::new(
                io::ErrorKind::Other,
                format!("{} panicked", operation),
            )))
        }
    }
}

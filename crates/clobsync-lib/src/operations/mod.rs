//! Operations module for clobsync
//!
//! This module contains the request types flowing into the orchestrator, the
//! keyed queue the worker pool draws from, and the outcomes reported back.

pub mod outcome;
pub mod queue;
pub mod request;

// Re-export key types for convenience
pub use outcome::{OperationReport, Phase, SkipReason, SyncOutcome};
pub use queue::{ClaimedJob, SyncQueue};
pub use request::{SyncAction, SyncRequest};

//! Functional tests of the sync pipeline
//!
//! These run the orchestrator against the instrumented in-memory row store:
//! - resolution and skip rules
//! - backups taken before overwrites
//! - per-path exclusion of writes
//! - the documented end-to-end scenarios

pub mod concurrency_test;
pub mod resolution_test;
pub mod scenario_test;

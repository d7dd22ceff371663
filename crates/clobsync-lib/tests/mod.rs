//! Test suite for clobsync
//!
//! This test suite is organized into several categories:
//! - `functional`: Pipeline behavior against an instrumented in-memory row store
//! - `integration`: End-to-end tests with SQLite, the debouncer and a real watcher
//!
//! All tests use the harness defined in the `common` module to avoid
//! duplicate setup code and keep test environments consistent.

pub mod functional;

//! # next-ledger
//!
//! SQLite-backed work ledger for file-processing jobs.
//!
//! Workers enqueue locations per treatment, claim pending items in hash
//! order (optionally restricted to a deterministic shard of the hash space),
//! and record completion. Content changes re-activate finished work on the
//! next enqueue; no central coordinator or lock is involved.

pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod hash;
pub mod model;
pub mod shard;
pub mod telemetry;

pub use error::{Error, ErrorKind, Result};

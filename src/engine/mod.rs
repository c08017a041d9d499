//! Core engine. The public API for enqueueing, claiming, and completing work.
//!
//! The engine owns the store handle. Each operation takes an explicit
//! request and returns a structured result; nothing reads process
//! arguments or standard streams.

mod claim;
mod complete;
mod enqueue;
mod status;

pub use claim::{ClaimBatch, ClaimRequest};
pub use complete::{Completion, parse_revisit};
pub use enqueue::EnqueueSummary;

use crate::config::Config;
use crate::db::Db;
use crate::error::{Error, Result};

/// The work ledger engine.
pub struct Engine {
    db: Db,
}

impl Engine {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Open (and migrate) the database named by `config`.
    pub async fn open(config: &Config) -> Result<Self> {
        Ok(Self::new(Db::open(config).await?))
    }

    /// Create an engine with in-memory storage (for testing).
    pub async fn in_memory() -> Result<Self> {
        Ok(Self::new(Db::in_memory().await?))
    }

    pub fn db(&self) -> &Db {
        &self.db
    }

    pub async fn close(self) {
        self.db.close().await;
    }
}

/// Trimmed, non-empty treatment label.
pub(crate) fn validate_treatment(treatment: &str) -> Result<&str> {
    let trimmed = treatment.trim();
    if trimmed.is_empty() {
        return Err(Error::validation("treatment must not be empty"));
    }
    Ok(trimmed)
}

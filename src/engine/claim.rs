//! Claim: select a bounded, hash-ordered batch of claimable items.
//!
//! Claiming is advisory. Nothing is locked or marked; two workers that want
//! disjoint work use disjoint shards, and a worker resumes a walk by passing
//! the returned cursor to the next call.

use chrono::{DateTime, Utc};
use opentelemetry::KeyValue;
use serde::Serialize;
use tracing::Instrument;

use super::{Engine, validate_treatment};
use crate::db::queue::RangeQuery;
use crate::error::{Error, Result};
use crate::model::{Cursor, WorkItem};
use crate::shard::{ShardRange, ShardSpec};
use crate::telemetry::ledger::{record_count, start_operation_span};
use crate::telemetry::metrics;

/// What to claim.
#[derive(Debug, Clone)]
pub struct ClaimRequest {
    pub treatment: String,
    /// Only items with a hash strictly greater than this.
    pub cursor: Option<Cursor>,
    /// Only items inside this shard's range.
    pub shard: Option<ShardSpec>,
    /// Maximum batch size (at least 1).
    pub limit: u32,
}

impl ClaimRequest {
    pub fn new(treatment: impl Into<String>) -> Self {
        Self {
            treatment: treatment.into(),
            cursor: None,
            shard: None,
            limit: 1,
        }
    }

    pub fn cursor(mut self, cursor: impl Into<Cursor>) -> Self {
        self.cursor = Some(cursor.into());
        self
    }

    pub fn shard(mut self, shard: ShardSpec) -> Self {
        self.shard = Some(shard);
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = limit;
        self
    }
}

/// A claimed batch.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ClaimBatch {
    /// Claimable items, ascending by location hash.
    pub items: Vec<WorkItem>,
    /// Rows in the scanned window that failed to decode. A non-zero value
    /// means the batch may be short even though more work exists.
    pub skipped: usize,
    /// Cursor for the next call: the stored hash of the last row scanned,
    /// including an undecodable one. `None` when the scan returned nothing.
    pub next_cursor: Option<Cursor>,
    /// The shard range that was applied, if any.
    pub shard_range: Option<ShardRange>,
}

impl ClaimBatch {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl Engine {
    /// Claim up to `limit` items as of now.
    pub async fn claim(&self, request: &ClaimRequest) -> Result<ClaimBatch> {
        self.claim_at(request, Utc::now()).await
    }

    /// Claim as of `now`. An item is claimable when it is pending, or when it
    /// is completed with a revisit time at or before `now`.
    pub async fn claim_at(&self, request: &ClaimRequest, now: DateTime<Utc>) -> Result<ClaimBatch> {
        let treatment = validate_treatment(&request.treatment)?;
        if request.limit == 0 {
            return Err(Error::validation("claim batch size must be at least 1"));
        }

        let shard_range = request.shard.map(|s| s.range());
        let span = start_operation_span("claim", treatment);

        let scan = self
            .db
            .range_query(&RangeQuery {
                treatment,
                after: request.cursor.as_ref(),
                range: shard_range.as_ref(),
                revisit_due_at: Some(now),
                limit: request.limit,
            })
            .instrument(span.clone())
            .await?;

        record_count(&span, scan.items.len() as u64);

        if scan.skipped > 0 {
            tracing::warn!(
                treatment,
                skipped = scan.skipped,
                returned = scan.items.len(),
                "claim batch short: undecodable rows skipped"
            );
            metrics::items_skipped().add(
                scan.skipped as u64,
                &[
                    KeyValue::new("treatment", treatment.to_string()),
                    KeyValue::new("stage", "claim"),
                ],
            );
        }

        metrics::items_claimed().add(
            scan.items.len() as u64,
            &[KeyValue::new("treatment", treatment.to_string())],
        );
        tracing::debug!(
            treatment,
            shard = ?request.shard,
            cursor = ?request.cursor,
            returned = scan.items.len(),
            "claimed"
        );

        Ok(ClaimBatch {
            items: scan.items,
            skipped: scan.skipped,
            next_cursor: scan.last_cursor,
            shard_range,
        })
    }
}

//! Enqueue: insert new locations or reconcile existing ones against their
//! current content.
//!
//! Per-location failures (unresolvable path, unreadable file) are logged
//! and skipped. A store write failure aborts the whole call; rows written
//! before it stay written and are reported in the error log.

use opentelemetry::KeyValue;
use serde::Serialize;
use std::path::PathBuf;
use tracing::Instrument;

use super::{Engine, validate_treatment};
use crate::db::queue::UpsertOutcome;
use crate::error::{Error, Result};
use crate::hash;
use crate::telemetry::ledger::{record_count, start_operation_span};
use crate::telemetry::metrics;

/// Tally of one enqueue call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EnqueueSummary {
    pub treatment: String,
    /// New pending rows.
    pub inserted: u64,
    /// Existing rows reset to pending because their content changed.
    pub requeued: u64,
    /// Existing rows left as they were.
    pub unchanged: u64,
    /// Locations that could not be hashed.
    pub skipped: u64,
}

impl EnqueueSummary {
    /// Locations whose row now matches their current content.
    pub fn reconciled(&self) -> u64 {
        self.inserted + self.requeued + self.unchanged
    }

    fn record(&mut self, outcome: UpsertOutcome) {
        match outcome {
            UpsertOutcome::Inserted => self.inserted += 1,
            UpsertOutcome::Requeued => self.requeued += 1,
            UpsertOutcome::Unchanged => self.unchanged += 1,
        }
    }
}

impl Engine {
    /// Enqueue a batch of locations for `treatment`. Blank entries are ignored.
    pub async fn enqueue<I, S>(&self, treatment: &str, locations: I) -> Result<EnqueueSummary>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let treatment = validate_treatment(treatment)?;
        let span = start_operation_span("enqueue", treatment);

        let summary = async {
            let mut summary = EnqueueSummary {
                treatment: treatment.to_string(),
                ..Default::default()
            };

            for raw in locations {
                let raw = raw.as_ref();
                if raw.trim().is_empty() {
                    continue;
                }

                match self.enqueue_one(treatment, raw).await {
                    Ok(outcome) => summary.record(outcome),
                    Err(e @ (Error::Resource { .. } | Error::Validation(_))) => {
                        tracing::warn!(location = raw, treatment, error = %e, "skipping location");
                        metrics::items_skipped().add(
                            1,
                            &[
                                KeyValue::new("treatment", treatment.to_string()),
                                KeyValue::new("stage", "enqueue"),
                            ],
                        );
                        summary.skipped += 1;
                    }
                    Err(e) => {
                        tracing::error!(
                            treatment,
                            reconciled = summary.reconciled(),
                            error = %e,
                            "enqueue aborted"
                        );
                        return Err(e);
                    }
                }
            }
            Ok(summary)
        }
        .instrument(span.clone())
        .await?;

        record_count(&span, summary.reconciled());
        tracing::info!(
            treatment,
            inserted = summary.inserted,
            requeued = summary.requeued,
            unchanged = summary.unchanged,
            skipped = summary.skipped,
            "enqueue finished"
        );
        Ok(summary)
    }

    /// Enqueue a single location.
    ///
    /// Returns [`Error::Resource`] when the content cannot be read; nothing
    /// is written in that case.
    pub async fn enqueue_one(&self, treatment: &str, location: &str) -> Result<UpsertOutcome> {
        let treatment = validate_treatment(treatment)?;
        let location = hash::location_string(location)?;
        let location_hash = hash::location_hash(&location);

        let path = PathBuf::from(&location);
        let content_hash = tokio::task::spawn_blocking(move || hash::content_hash(&path))
            .await
            .map_err(|e| Error::Other(format!("content hashing task failed: {e}")))??;

        let outcome = self
            .db
            .upsert(&location, &location_hash, &content_hash, treatment)
            .await?;

        tracing::debug!(location = %location, treatment, outcome = outcome.as_str(), "reconciled");
        metrics::items_enqueued().add(
            1,
            &[
                KeyValue::new("treatment", treatment.to_string()),
                KeyValue::new("outcome", outcome.as_str()),
            ],
        );
        Ok(outcome)
    }
}

//! Read-only status counts and the operator reset.

use chrono::{DateTime, Utc};
use opentelemetry::KeyValue;
use tracing::Instrument;

use super::{Engine, validate_treatment};
use crate::error::Result;
use crate::model::StatusReport;
use crate::telemetry::ledger::{record_count, start_operation_span};
use crate::telemetry::metrics;

impl Engine {
    /// Pending / done counts per treatment, optionally for one treatment.
    pub async fn status(&self, treatment: Option<&str>) -> Result<StatusReport> {
        self.status_at(treatment, Utc::now()).await
    }

    /// Counts as of `now` (which decides what is revisit-due).
    pub async fn status_at(&self, treatment: Option<&str>, now: DateTime<Utc>) -> Result<StatusReport> {
        let treatment = treatment.map(str::trim).filter(|t| !t.is_empty());
        let span = start_operation_span("status", treatment.unwrap_or("*"));
        let rows = self.db.aggregate(treatment, now).instrument(span.clone()).await?;
        record_count(&span, rows.len() as u64);
        Ok(StatusReport { rows })
    }

    /// Delete every item for `treatment`. Returns how many were deleted.
    pub async fn reset(&self, treatment: &str) -> Result<u64> {
        let treatment = validate_treatment(treatment)?;
        let span = start_operation_span("reset", treatment);
        let deleted = self
            .db
            .delete_by_treatment(treatment)
            .instrument(span.clone())
            .await?;
        record_count(&span, deleted);

        metrics::items_reset().add(deleted, &[KeyValue::new("treatment", treatment.to_string())]);
        tracing::info!(treatment, deleted, "treatment reset");
        Ok(deleted)
    }
}

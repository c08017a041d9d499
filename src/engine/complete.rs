//! Completion and revisit scheduling.

use chrono::{DateTime, Utc};
use opentelemetry::KeyValue;
use std::time::Duration;
use tracing::Instrument;

use super::{Engine, validate_treatment};
use crate::error::{Error, Result};
use crate::hash;
use crate::model::WorkItem;
use crate::telemetry::ledger::{record_count, start_operation_span};
use crate::telemetry::metrics;

/// A worker's report that it finished one item.
#[derive(Debug, Clone)]
pub struct Completion {
    pub location: String,
    pub treatment: String,
    /// Opaque value stored with the item; may be empty.
    pub result: String,
    /// Make the item claimable again this long after completion.
    pub revisit: Option<Duration>,
}

impl Completion {
    pub fn new(location: impl Into<String>, treatment: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            treatment: treatment.into(),
            result: String::new(),
            revisit: None,
        }
    }

    pub fn result(mut self, result: impl Into<String>) -> Self {
        self.result = result.into();
        self
    }

    pub fn revisit(mut self, after: Duration) -> Self {
        self.revisit = Some(after);
        self
    }
}

/// Parse a revisit duration such as `14d`, `14days`, `14 days`, or `2h 30m`.
pub fn parse_revisit(raw: &str) -> Result<Duration> {
    let compact: String = raw.split_whitespace().collect();
    if compact.is_empty() {
        return Err(Error::validation("revisit duration is empty"));
    }
    humantime::parse_duration(&compact)
        .map_err(|e| Error::validation(format!("invalid revisit duration {raw:?}: {e}")))
}

impl Engine {
    /// Mark an item complete as of now.
    pub async fn complete(&self, completion: &Completion) -> Result<WorkItem> {
        self.complete_at(completion, Utc::now()).await
    }

    /// Mark an item complete as of `now`.
    ///
    /// Returns [`Error::NotFound`] when no row exists for the location and
    /// treatment; nothing is written in that case.
    pub async fn complete_at(&self, completion: &Completion, now: DateTime<Utc>) -> Result<WorkItem> {
        let treatment = validate_treatment(&completion.treatment)?;
        let location = hash::location_string(&completion.location)?;
        let location_hash = hash::location_hash(&location);

        let next_at = completion
            .revisit
            .map(|after| {
                chrono::Duration::from_std(after)
                    .ok()
                    .and_then(|delta| now.checked_add_signed(delta))
                    .ok_or_else(|| Error::validation(format!("revisit duration {after:?} is too large")))
            })
            .transpose()?;

        let span = start_operation_span("done", treatment);
        let updated = self
            .db
            .mark_complete(&location_hash, treatment, now, &completion.result, next_at)
            .instrument(span.clone())
            .await?;
        record_count(&span, updated);

        if updated == 0 {
            return Err(Error::NotFound {
                location,
                treatment: treatment.to_string(),
            });
        }

        metrics::items_completed().add(1, &[KeyValue::new("treatment", treatment.to_string())]);
        tracing::info!(location = %location, treatment, next_at = ?next_at, "marked done");

        self.db
            .get(&location_hash, treatment)
            .await?
            .ok_or_else(|| Error::NotFound {
                location,
                treatment: treatment.to_string(),
            })
    }
}

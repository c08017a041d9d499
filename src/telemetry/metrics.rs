//! Metric instrument factories.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`;
//! without one, the instruments are no-ops.

use opentelemetry::metrics::{Counter, Histogram, Meter};

fn meter() -> Meter {
    opentelemetry::global::meter("next-ledger")
}

/// Counter: locations reconciled by enqueue.
/// Labels: `treatment`, `outcome` ("inserted" | "requeued" | "unchanged").
pub fn items_enqueued() -> Counter<u64> {
    meter()
        .u64_counter("ledger.items.enqueued")
        .with_description("Locations reconciled by enqueue")
        .build()
}

/// Counter: items returned by claim.
/// Labels: `treatment`.
pub fn items_claimed() -> Counter<u64> {
    meter()
        .u64_counter("ledger.items.claimed")
        .with_description("Items returned by claim")
        .build()
}

/// Counter: items marked done.
/// Labels: `treatment`.
pub fn items_completed() -> Counter<u64> {
    meter()
        .u64_counter("ledger.items.completed")
        .with_description("Items marked done")
        .build()
}

/// Counter: items deleted by reset.
/// Labels: `treatment`.
pub fn items_reset() -> Counter<u64> {
    meter()
        .u64_counter("ledger.items.reset")
        .with_description("Items deleted by treatment reset")
        .build()
}

/// Counter: per-item failures that were skipped instead of aborting.
/// Labels: `treatment`, `stage` ("enqueue" | "claim").
pub fn items_skipped() -> Counter<u64> {
    meter()
        .u64_counter("ledger.items.skipped")
        .with_description("Items skipped after a per-item failure")
        .build()
}

/// Histogram: command duration in milliseconds.
/// Labels: `operation`.
pub fn operation_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("ledger.operation.duration_ms")
        .with_description("Ledger command duration in milliseconds")
        .with_unit("ms")
        .build()
}

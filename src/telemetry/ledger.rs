//! Span helpers for ledger operations.

use tracing::Span;

/// Start a span for one ledger operation.
///
/// The `ledger.count` field is declared empty and filled by [`record_count`].
pub fn start_operation_span(op: &'static str, treatment: &str) -> Span {
    tracing::info_span!(
        "ledger.op",
        "ledger.op" = op,
        "ledger.treatment" = treatment,
        "ledger.count" = tracing::field::Empty,
    )
}

/// Record how many items the operation touched.
pub fn record_count(span: &Span, count: u64) {
    span.record("ledger.count", count);
}

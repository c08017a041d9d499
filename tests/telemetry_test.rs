//! Integration tests for telemetry initialization and span helpers.

use next_ledger::config::Config;
use next_ledger::telemetry::{self, TelemetryConfig};

#[test]
fn telemetry_initializes_without_endpoint() {
    // A global subscriber can be set once per process; a second init
    // returning Err is acceptable.
    let config = TelemetryConfig {
        endpoint: None,
        service_name: "next-ledger-test".to_string(),
        default_filter: "debug".to_string(),
    };
    let _guard = telemetry::init_telemetry(config);
}

#[test]
fn telemetry_config_follows_ledger_config() {
    let config = Config::default();
    let telemetry = TelemetryConfig::from_config(&config);
    assert!(telemetry.endpoint.is_none());
    assert_eq!(telemetry.service_name, "next-ledger");
    assert_eq!(telemetry.default_filter, "warn");
}

#[test]
fn operation_span_creates_and_records_count() {
    let span = telemetry::ledger::start_operation_span("claim", "lint");
    telemetry::ledger::record_count(&span, 3);
}

#[test]
fn metric_instruments_accept_measurements() {
    use opentelemetry::KeyValue;

    telemetry::metrics::items_enqueued().add(1, &[KeyValue::new("treatment", "lint")]);
    telemetry::metrics::operation_duration_ms().record(1.5, &[KeyValue::new("operation", "claim")]);
}

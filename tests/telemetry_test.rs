//! Telemetry initialization. Span fields are covered in `telemetry_spans_test`.

use margin_dispatch::telemetry::{SERVICE_NAME, TelemetryConfig, init_telemetry};

#[test]
fn telemetry_initializes_without_endpoint() {
    // Note: tracing subscriber can only be set once per process.
    let config = TelemetryConfig {
        endpoint: None,
        service_name: format!("{SERVICE_NAME}-test"),
        log_level: "debug".to_string(),
    };
    let guard = init_telemetry(config);
    assert!(guard.is_ok(), "first subscriber in this process must install");

    let again = init_telemetry(TelemetryConfig {
        endpoint: None,
        service_name: SERVICE_NAME.to_string(),
        log_level: "info".to_string(),
    });
    assert!(again.is_err(), "a second global subscriber is rejected");
}

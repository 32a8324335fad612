//! Tests for the ingress metrics.

use super::*;

/// Verify that two metric sets can coexist in one process.
#[test]
fn test_independent_registries() {
    let first = ServiceMetrics::new().unwrap();
    let second = ServiceMetrics::new().unwrap();

    first.record_webhook_request("tg", "accepted");

    assert_eq!(
        first
            .webhook_requests_total
            .with_label_values(&["tg", "accepted"])
            .get(),
        1
    );
    assert_eq!(
        second
            .webhook_requests_total
            .with_label_values(&["tg", "accepted"])
            .get(),
        0
    );
}

/// Verify that recorded values appear in the text exposition.
#[test]
fn test_encode_includes_recorded_metrics() {
    let metrics = ServiceMetrics::new().unwrap();
    metrics.record_webhook_request("wa", "unauthorized");
    metrics.record_enqueue("tg", Duration::from_millis(3));
    metrics.record_body_size("tg", 512);

    let text = metrics.encode().unwrap();

    assert!(text.contains(r#"webhook_requests_total{outcome="unauthorized",provider="wa"} 1"#));
    assert!(text.contains("webhook_enqueue_duration_seconds_count{provider=\"tg\"} 1"));
    assert!(text.contains("webhook_body_bytes_sum{provider=\"tg\"} 512"));
}

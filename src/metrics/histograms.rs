//! Histogram metrics

use std::time::Duration;

/// Backoff delay slept between attempts
pub fn backoff_delay(mechanism: &str, delay: Duration) {
    metrics::histogram!(
        "authconn_backoff_delay_ms",
        "mechanism" => mechanism.to_string()
    )
    .record(delay.as_millis() as f64);
}

/// Wall time of a full `reconnect()`, retries included
pub fn reconnect_duration(connection_type: &str, elapsed: Duration) {
    metrics::histogram!(
        "authconn_reconnect_duration_ms",
        "connection_type" => connection_type.to_string()
    )
    .record(elapsed.as_millis() as f64);
}

/// Attempts needed for a successful connect
pub fn attempts_to_connect(mechanism: &str, attempts: u32) {
    metrics::histogram!(
        "authconn_attempts_to_connect",
        "mechanism" => mechanism.to_string()
    )
    .record(f64::from(attempts));
}

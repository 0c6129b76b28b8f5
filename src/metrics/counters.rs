//! Counter metrics

/// One negotiation attempt finished
pub fn connect_attempt(mechanism: &str, outcome: &'static str) {
    metrics::counter!(
        "authconn_connect_attempts_total",
        "mechanism" => mechanism.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

/// Retry budget ran out
pub fn retry_exhausted(mechanism: &str) {
    metrics::counter!(
        "authconn_retry_exhausted_total",
        "mechanism" => mechanism.to_string()
    )
    .increment(1);
}

/// Retry loop stopped by cancellation
pub fn connect_cancelled(mechanism: &str) {
    metrics::counter!(
        "authconn_connect_cancelled_total",
        "mechanism" => mechanism.to_string()
    )
    .increment(1);
}

/// `reconnect()` finished
pub fn reconnect(connection_type: &str, outcome: &'static str) {
    metrics::counter!(
        "authconn_reconnects_total",
        "connection_type" => connection_type.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

/// A held handle was closed
pub fn handle_closed(connection_type: &str) {
    metrics::counter!(
        "authconn_handles_closed_total",
        "connection_type" => connection_type.to_string()
    )
    .increment(1);
}

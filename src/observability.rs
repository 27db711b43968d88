use std::net::SocketAddr;

// ── Booking rules ───────────────────────────────────────────────

/// Counter: candidates or actions refused by the local rule-set. Labels: reason.
pub const RULE_REJECTIONS_TOTAL: &str = "innkeep_rule_rejections_total";

/// Counter: lifecycle actions sent to the API. Labels: action, outcome.
pub const TRANSITIONS_TOTAL: &str = "innkeep_transitions_total";

/// Counter: reservations created.
pub const RESERVATIONS_CREATED_TOTAL: &str = "innkeep_reservations_created_total";

// ── API client ──────────────────────────────────────────────────

/// Counter: HTTP requests issued. Labels: method, status.
pub const API_REQUESTS_TOTAL: &str = "innkeep_api_requests_total";

/// Histogram: HTTP request latency in seconds. Labels: method.
pub const API_REQUEST_DURATION_SECONDS: &str = "innkeep_api_request_duration_seconds";

/// Counter: session refresh attempts after a 401. Labels: outcome.
pub const SESSION_REFRESH_TOTAL: &str = "innkeep_session_refresh_total";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Bucket an HTTP status for the `status` label.
pub fn status_label(status: u16) -> &'static str {
    match status {
        200..=299 => "2xx",
        401 => "401",
        404 => "404",
        409 => "409",
        400..=499 => "4xx",
        _ => "5xx",
    }
}

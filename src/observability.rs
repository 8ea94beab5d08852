use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "booker_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "booker_query_duration_seconds";

// ── Booking workflow ────────────────────────────────────────────

/// Counter: booking requests accepted.
pub const REQUESTS_SUBMITTED_TOTAL: &str = "booker_requests_submitted_total";

/// Counter: admin decisions recorded. Labels: outcome.
pub const DECISIONS_TOTAL: &str = "booker_decisions_total";

/// Counter: notification mails that could not be delivered.
pub const NOTIFICATION_FAILURES_TOTAL: &str = "booker_notification_failures_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "booker_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "booker_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "booker_connections_rejected_total";

/// Gauge: number of active tenants (loaded engines).
pub const TENANTS_ACTIVE: &str = "booker_tenants_active";

/// Counter: statements refused because the session is not an admin.
pub const PERMISSION_DENIED_TOTAL: &str = "booker_permission_denied_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "booker_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "booker_wal_flush_batch_size";

/// Install the Prometheus exporter on `port`. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertPlace { .. } => "insert_place",
        Command::InsertAdmin { .. } => "insert_admin",
        Command::InsertPhoto { .. } => "insert_photo",
        Command::InsertRequest { .. } => "insert_request",
        Command::InsertDecision { .. } => "insert_decision",
        Command::SelectPlaces => "select_places",
        Command::SelectAdmins => "select_admins",
        Command::SelectPhotos { .. } => "select_photos",
        Command::SelectRequests { .. } => "select_requests",
        Command::SelectApprovedIntervals { .. } => "select_approved_intervals",
        Command::SelectSlots { .. } => "select_slots",
    }
}

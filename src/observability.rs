use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::store::ChangeKind;

// ── Synchronizer ────────────────────────────────────────────────

/// Counter: change-feed events seen. Labels: kind, outcome (applied, noop, dropped).
pub const FEED_EVENTS_TOTAL: &str = "almoco_feed_events_total";

/// Counter: full loads. Labels: status (ok, degraded).
pub const FULL_LOADS_TOTAL: &str = "almoco_full_loads_total";

/// Counter: submissions by result. Labels: status.
pub const SUBMISSIONS_TOTAL: &str = "almoco_submissions_total";

/// Histogram: store call latency in seconds. Labels: op.
pub const STORE_CALL_DURATION_SECONDS: &str = "almoco_store_call_duration_seconds";

/// Gauge: bookings currently mirrored.
pub const MIRROR_BOOKINGS: &str = "almoco_mirror_bookings";

/// Counter: view recomputations pushed to subscribers.
pub const VIEWS_PUBLISHED_TOTAL: &str = "almoco_views_published_total";

// ── Local store ─────────────────────────────────────────────────

/// Counter: entries appended to table WALs.
pub const STORE_WAL_APPENDS_TOTAL: &str = "almoco_store_wal_appends_total";

/// Install the Prometheus exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Short label for a change kind.
pub fn change_label(kind: ChangeKind) -> &'static str {
    match kind {
        ChangeKind::Insert => "insert",
        ChangeKind::Update => "update",
        ChangeKind::Delete => "delete",
    }
}

use std::net::SocketAddr;

// ── Lifecycle ───────────────────────────────────────────────────

/// Counter: bookings created. Labels: status (initial status).
pub const BOOKINGS_CREATED_TOTAL: &str = "roombook_bookings_created_total";

/// Counter: lifecycle transitions. Labels: transition, outcome.
pub const TRANSITIONS_TOTAL: &str = "roombook_transitions_total";

/// Counter: requests refused because an approved booking overlaps.
pub const CONFLICTS_TOTAL: &str = "roombook_conflicts_total";

/// Counter: notifications the sink failed to accept.
pub const NOTIFICATIONS_FAILED_TOTAL: &str = "roombook_notifications_failed_total";

// ── Statistics ──────────────────────────────────────────────────

/// Histogram: time to build a statistics report, in seconds.
pub const STATISTICS_DURATION_SECONDS: &str = "roombook_statistics_duration_seconds";

/// Counter: statistics reports served from cache.
pub const STATISTICS_CACHE_HITS_TOTAL: &str = "roombook_statistics_cache_hits_total";

/// Counter: cache operations that fell back to the in-process store.
pub const CACHE_FALLBACKS_TOTAL: &str = "roombook_cache_fallbacks_total";

// ── Journal ─────────────────────────────────────────────────────

/// Histogram: group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "roombook_wal_flush_duration_seconds";

/// Histogram: events per group-commit flush.
pub const WAL_FLUSH_BATCH_SIZE: &str = "roombook_wal_flush_batch_size";

/// Counter: journal compactions. Labels: outcome.
pub const WAL_COMPACTIONS_TOTAL: &str = "roombook_wal_compactions_total";

/// Gauge: bookings held in memory.
pub const BOOKINGS_LOADED: &str = "roombook_bookings_loaded";

/// Install the Prometheus exporter on `port`. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

pub fn outcome_label<T, E>(result: &Result<T, E>) -> &'static str {
    if result.is_ok() { "ok" } else { "error" }
}

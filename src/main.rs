use std::sync::Arc;
use std::time::Duration;

use tracing::info;
use tracing_subscriber::EnvFilter;

use roombook::config::Config;
use roombook::directory::InMemoryDirectory;
use roombook::engine::{Collaborators, Engine};
use roombook::notify::NotifyHub;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env();
    roombook::observability::init(config.metrics_port)?;

    // Ensure data directory exists
    std::fs::create_dir_all(&config.data_dir)?;

    let directory = match &config.seed_file {
        Some(path) => InMemoryDirectory::load_seed(path)?,
        None => InMemoryDirectory::new(),
    };
    let directory = Arc::new(directory);
    let hub = Arc::new(NotifyHub::new());
    let wal_path = config.data_dir.join("roombook.wal");
    let engine = Arc::new(Engine::new(
        wal_path.clone(),
        Collaborators::in_memory(directory.clone(), hub),
        config.stats_cache_ttl,
    )?);

    info!("roombook started");
    info!("  journal: {}", wal_path.display());
    info!("  rooms: {}, users: {}", directory.room_count(), directory.user_count());
    info!(
        "  compact: every {:?} past {} appends",
        config.compact_interval, config.compact_threshold
    );
    info!(
        "  metrics: {}",
        config
            .metrics_port
            .map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );

    let compactor = tokio::spawn(roombook::compactor::run_compactor(
        engine.clone(),
        config.compact_threshold,
        config.compact_interval,
    ));
    let reporter = tokio::spawn(run_reporter(engine.clone(), config.report_interval));

    // Graceful shutdown on SIGTERM/ctrl-c
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }

    info!("shutdown signal received");
    compactor.abort();
    reporter.abort();
    // Leave a compact journal behind for the next start.
    if let Err(e) = engine.compact_journal().await {
        tracing::warn!("final compaction failed: {e}");
    }
    info!("roombook stopped");
    Ok(())
}

/// Log a statistics summary for the trailing 30 days on every tick.
async fn run_reporter(engine: Arc<Engine>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        let to = chrono::Local::now().naive_local();
        let from = to - chrono::Duration::days(30);
        match engine.get_statistics(from, to).await {
            Ok(report) => {
                info!(
                    total = report.total_bookings,
                    approved = report.approved_bookings,
                    pending = report.pending_bookings,
                    most_active_day = ?report.most_active_day,
                    "30-day booking summary"
                );
                match serde_json::to_string(&report.most_used_rooms) {
                    Ok(json) => tracing::debug!(most_used_rooms = %json, "room usage"),
                    Err(e) => tracing::warn!("cannot encode room usage: {e}"),
                }
            }
            Err(e) => tracing::warn!("statistics summary failed: {}", e.public_message()),
        }
    }
}

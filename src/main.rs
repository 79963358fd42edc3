//! Occupancy statistics engine
//!
//! Turns raw periodic device-count readings per location into a normalized
//! busyness signal, a same-time-of-day comparison, and a short-term trend.
//!
//! Module structure:
//! - `domain/` - Core business types (readings, status objects)
//! - `io/` - External interfaces (MQTT ingest, journal, HTTP API)
//! - `services/` - Statistics core (smoothing, store, aggregator, status, cache)
//! - `infra/` - Infrastructure (Config, Metrics, Broker)

use clap::Parser;
use occupancy_engine::infra::{Config, Metrics, SmoothingMode};
use occupancy_engine::io::{start_api_server, start_count_listener, ApiContext, Journal};
use occupancy_engine::services::{
    run_scheduler, Aggregator, AggregatorConfig, ReadingStore, Smoothing, StatsTables,
    StatusBuilder, StatusCache, StatusConfig,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// Occupancy statistics engine - busyness signals from raw count readings
#[derive(Parser, Debug)]
#[command(name = "occupancy-engine", version, about)]
struct Args {
    /// Path to TOML configuration file
    #[arg(short, long, default_value = "config/dev.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize structured logging with configurable level via RUST_LOG env var
    // Default: INFO, use RUST_LOG=debug for full event visibility
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    info!("occupancy-engine starting");

    let args = Args::parse();
    let config = Config::load_from_path(&args.config);

    // All hour-of-day, weekday, and midnight math follows the process local
    // timezone; apply the configured one before any task starts
    if let Some(timezone) = config.timezone() {
        std::env::set_var("TZ", timezone);
    }

    info!(
        config_file = %config.config_file(),
        site_id = %config.site_id(),
        timezone = %config.timezone().unwrap_or("inherited"),
        mqtt_host = %config.mqtt_host(),
        mqtt_port = %config.mqtt_port(),
        mqtt_topic = %config.mqtt_topic(),
        journal_file = %config.journal_file(),
        statistics_interval_secs = %config.statistics_interval_secs(),
        lookback_days = %config.lookback_days(),
        cache_ttl_secs = %config.cache_ttl_secs(),
        api_port = %config.api_port(),
        "config_loaded"
    );

    // Start embedded MQTT broker unless an external one is configured
    if config.broker_embedded() {
        occupancy_engine::infra::broker::start_embedded_broker(&config);
    }

    // Create shutdown signal
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Shared components
    let metrics = Arc::new(Metrics::new());
    let smoothing = match config.smoothing_mode() {
        SmoothingMode::Ema => Smoothing::Ema { alpha: config.smoothing_alpha() },
        SmoothingMode::Window => Smoothing::Window { size: config.smoothing_window() },
    };
    let store = Arc::new(ReadingStore::new(smoothing));
    let tables = Arc::new(StatsTables::new());

    // Replay the journal so statistics cover history from before this start
    let journal = Arc::new(Journal::new(config.journal_file()));
    if let Err(e) = journal.replay(&store) {
        error!(error = %e, "journal_replay_failed");
    }
    info!(
        locations = %store.location_count(),
        readings = %store.reading_count(),
        "store_ready"
    );

    // Start MQTT count listener
    let listener_config = config.clone();
    let listener_store = store.clone();
    let listener_journal = journal.clone();
    let listener_metrics = metrics.clone();
    let listener_shutdown = shutdown_rx.clone();
    tokio::spawn(async move {
        if let Err(e) = start_count_listener(
            &listener_config,
            listener_store,
            listener_journal,
            listener_metrics,
            listener_shutdown,
        )
        .await
        {
            error!(error = %e, "count listener error");
        }
    });

    // Start the statistics aggregation scheduler (first run fires immediately)
    let aggregator = Arc::new(Aggregator::new(
        store.clone(),
        tables.clone(),
        AggregatorConfig {
            lookback_days: config.lookback_days(),
            max_percentile: config.max_percentile(),
            closed_threshold: config.closed_threshold(),
            time_bucket_minutes: config.time_bucket_minutes(),
        },
    ));
    let scheduler_metrics = metrics.clone();
    let scheduler_shutdown = shutdown_rx.clone();
    let scheduler_interval = config.statistics_interval_secs();
    tokio::spawn(async move {
        run_scheduler(aggregator, scheduler_interval, scheduler_metrics, scheduler_shutdown).await;
    });

    // Start the HTTP API (status via cache, health, metrics)
    let builder = Arc::new(StatusBuilder::new(
        store.clone(),
        tables.clone(),
        StatusConfig {
            trend_lookback_rows: config.trend_lookback_rows(),
            trend_threshold: config.trend_threshold(),
            time_bucket_minutes: config.time_bucket_minutes(),
        },
    ));
    let cache = Arc::new(StatusCache::new(
        Duration::from_secs(config.cache_ttl_secs()),
        metrics.clone(),
    ));
    let ctx = Arc::new(ApiContext {
        cache,
        builder,
        metrics: metrics.clone(),
        site_id: config.site_id().to_string(),
    });
    let api_port = config.api_port();
    let api_shutdown = shutdown_rx.clone();
    tokio::spawn(async move {
        if let Err(e) = start_api_server(api_port, ctx, api_shutdown).await {
            error!(error = %e, "API server error");
        }
    });

    // Start metrics reporter (lock-free reads with full summary)
    let reporter_metrics = metrics.clone();
    let reporter_interval = config.metrics_interval_secs();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(reporter_interval));
        loop {
            interval.tick().await;
            reporter_metrics.report().log();
        }
    });

    // Handle shutdown on Ctrl+C
    tokio::signal::ctrl_c().await.ok();
    info!("shutdown_signal_received");
    let _ = shutdown_tx.send(true);

    // Give tasks a moment to observe the signal
    tokio::time::sleep(Duration::from_millis(200)).await;

    info!("occupancy-engine shutdown complete");
    Ok(())
}

//! Last-mile shuttle matching gateway binary
//!
//! Wires the matching pipeline together: telemetry ingest feeds the
//! evaluator, the evaluator triggers the coordinator, and the HTTP API
//! carries everything in and out.

use clap::Parser;
use lastmile::infra::{Config, Metrics};
use lastmile::io::{start_api_server, AppState};
use lastmile::services::{
    AreaTopology, DriverDirectory, MatchCoordinator, NotificationService, RiderIntentStore,
    RoutePlanCache, SubscriptionRegistry, TelemetryEvaluator, TelemetryIngest, TripService,
    UserDirectory,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// Last-mile shuttle matching gateway
#[derive(Parser, Debug)]
#[command(name = "lastmile-gateway", version, about)]
struct Args {
    /// Path to TOML configuration file
    #[arg(short, long, default_value = "config/dev.toml")]
    config: String,
}

const SWEEP_INTERVAL_SECS: u64 = 60;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize structured logging with configurable level via RUST_LOG env var
    // Default: INFO, use RUST_LOG=debug for full event visibility
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    info!("lastmile-gateway starting");

    let args = Args::parse();
    let config = Config::load_from_path(&args.config);

    info!(
        config_file = %config.config_file(),
        site = %config.site_id(),
        api_port = %config.api_port(),
        eta_window_minutes = %config.eta_window_minutes(),
        pickup_grace_minutes = %config.pickup_grace_minutes(),
        intent_ttl_minutes = %config.intent_ttl_minutes(),
        route_ttl_minutes = %config.route_ttl_minutes(),
        trigger_refresh_minutes = %config.trigger_refresh_minutes(),
        areas = config.areas().len(),
        "config_loaded"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let metrics = Arc::new(Metrics::new());
    let topology = Arc::new(AreaTopology::from_config(&config));
    let drivers = Arc::new(DriverDirectory::new(topology.clone()));
    let route_cache = Arc::new(RoutePlanCache::new(
        drivers.clone(),
        Duration::from_secs(config.route_ttl_minutes() * 60),
        metrics.clone(),
    ));
    let intents = Arc::new(RiderIntentStore::new(
        chrono::Duration::minutes(config.intent_ttl_minutes()),
        Duration::from_secs(config.station_idle_minutes() * 60),
        metrics.clone(),
    ));
    let registry = Arc::new(SubscriptionRegistry::new(config.subscriber_buffer(), metrics.clone()));
    let notifications = Arc::new(NotificationService::new());
    let trips = Arc::new(TripService::new(notifications.clone()));
    let users = Arc::new(UserDirectory::new());

    let coordinator = Arc::new(MatchCoordinator::new(
        intents.clone(),
        registry.clone(),
        trips.clone(),
        notifications.clone(),
        metrics.clone(),
        chrono::Duration::minutes(config.pickup_grace_minutes()),
    ));
    let evaluator = Arc::new(TelemetryEvaluator::new(
        route_cache.clone(),
        coordinator.clone(),
        metrics.clone(),
        config.eta_window_minutes(),
        chrono::Duration::minutes(config.trigger_refresh_minutes()),
    ));
    let ingest = Arc::new(TelemetryIngest::new(
        evaluator.clone(),
        config.telemetry_capacity(),
        metrics.clone(),
    ));

    // Periodic metrics report
    let report_metrics = metrics.clone();
    let report_evaluator = evaluator.clone();
    let report_registry = registry.clone();
    let metrics_interval = config.metrics_interval_secs();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(metrics_interval));
        loop {
            interval.tick().await;
            let summary = report_metrics
                .report(report_evaluator.active_drivers(), report_registry.count());
            summary.log();
        }
    });

    // Periodic intent maintenance: stale eviction and idle station cleanup
    let sweep_intents = intents.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(SWEEP_INTERVAL_SECS));
        loop {
            interval.tick().await;
            sweep_intents.sweep_idle(chrono::Utc::now());
        }
    });

    let shutdown_signal = shutdown_tx;
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown_signal_received");
        let _ = shutdown_signal.send(true);
    });

    let state = Arc::new(AppState {
        site_id: config.site_id().to_string(),
        ingest,
        evaluator,
        coordinator,
        registry,
        route_cache,
        drivers,
        topology,
        trips,
        notifications,
        users,
        metrics,
    });

    start_api_server(config.api_port(), state, shutdown_rx).await?;

    info!("lastmile-gateway shutdown complete");
    Ok(())
}

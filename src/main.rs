//! Geofence dispatch daemon
//!
//! Receives geofence enter/exit events from the device location layer and
//! sends a push notification through the relay for subscribed regions.
//!
//! Module structure:
//! - `domain/` - Core types (Region, events, decisions, push messages)
//! - `io/` - External interfaces (push relay, HTTP API, MQTT, Prometheus)
//! - `services/` - Pipeline (Registry, Normalizer, Policy, Delivery, Dispatcher)
//! - `infra/` - Infrastructure (Config, Metrics, Observer)

use clap::Parser;
use geofence_dispatch::infra::{Config, Metrics, TracingObserver};
use geofence_dispatch::io::{start_http_api, start_mqtt_subscriber, ApiState, HttpPushRelay};
use geofence_dispatch::services::Dispatcher;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// How long shutdown waits for running deliveries
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Geofence dispatch - push notifications on region enter/exit
#[derive(Parser, Debug)]
#[command(name = "geofence-dispatch", version, about)]
struct Args {
    /// Path to TOML configuration file (else CONFIG_FILE, else config/dev.toml)
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize structured logging with configurable level via RUST_LOG env var
    // Default: INFO, use RUST_LOG=debug for per-event visibility
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    info!(git_hash = %env!("GIT_HASH"), "geofence-dispatch starting");

    let args = Args::parse();
    let config_path = args.config.unwrap_or_else(Config::resolve_config_path);
    let config = Config::load_from_path(&config_path);

    info!(
        config_file = %config.config_file(),
        site = %config.site_id(),
        relay_url = %config.relay_url(),
        retry_base_ms = %config.retry_base_ms(),
        retry_cap_ms = %config.retry_cap_ms(),
        retry_max_attempts = %config.retry_max_attempts(),
        debounce_window_ms = %config.debounce_window_ms(),
        regions = %config.regions().len(),
        token_configured = %config.initial_token().is_some(),
        http_port = %config.http_port(),
        mqtt_enabled = %config.mqtt_enabled(),
        "config_loaded"
    );

    // Create shutdown signal
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Create shared components
    let metrics = Arc::new(Metrics::new());
    let observer = Arc::new(TracingObserver::new(metrics.clone()));
    let relay = Arc::new(HttpPushRelay::new(
        config.relay_url(),
        Duration::from_millis(config.relay_timeout_ms()),
    )?);
    let dispatcher = Arc::new(Dispatcher::from_config(&config, relay, observer)?);
    info!(regions = %dispatcher.registry().len(), "dispatcher_started");

    // Start HTTP API (if port > 0)
    let http_port = config.http_port();
    let http_task = if http_port > 0 {
        let state = Arc::new(ApiState {
            dispatcher: dispatcher.clone(),
            metrics: metrics.clone(),
            site_id: config.site_id().to_string(),
        });
        let bind_address = config.http_bind_address().to_string();
        let http_shutdown = shutdown_rx.clone();
        Some(tokio::spawn(async move {
            if let Err(e) = start_http_api(&bind_address, http_port, state, http_shutdown).await {
                tracing::error!(error = %e, "http_api_error");
            }
        }))
    } else {
        None
    };

    // Start MQTT subscriber (if enabled)
    if config.mqtt_enabled() {
        let mqtt_config = config.clone();
        let mqtt_dispatcher = dispatcher.clone();
        let mqtt_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            if let Err(e) =
                start_mqtt_subscriber(&mqtt_config, mqtt_dispatcher, mqtt_shutdown).await
            {
                tracing::error!(error = %e, "mqtt_subscriber_error");
            }
        });
    }

    // Start metrics reporter
    let metrics_clone = metrics.clone();
    let metrics_interval = config.metrics_interval_secs().max(1);
    let mut reporter_shutdown = shutdown_rx.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(metrics_interval));
        loop {
            tokio::select! {
                _ = interval.tick() => metrics_clone.report().log(),
                changed = reporter_shutdown.changed() => {
                    if changed.is_err() || *reporter_shutdown.borrow() {
                        return;
                    }
                }
            }
        }
    });

    // Wait for Ctrl+C, then signal every task
    tokio::signal::ctrl_c().await.ok();
    info!("shutdown_signal_received");
    let _ = shutdown_tx.send(true);

    if let Some(task) = http_task {
        let _ = task.await;
    }

    let in_flight = dispatcher.in_flight();
    if in_flight > 0 {
        info!(in_flight = %in_flight, grace_ms = %SHUTDOWN_GRACE.as_millis(), "draining_deliveries");
        let remaining = dispatcher.drain(SHUTDOWN_GRACE).await;
        if remaining > 0 {
            warn!(remaining = %remaining, "deliveries_dropped_at_shutdown");
        }
    }

    metrics.report().log();
    info!("geofence-dispatch shutdown complete");
    Ok(())
}

//! Application entry point for the `thermoflow` backend service.
//!
//! This binary orchestrates the full startup sequence for the telemetry
//! metrics API, including:
//! - Loading configuration from environment variables or `.env`
//! - Initializing structured logging/tracing
//! - Connecting the MQTT ingestion client and its packet buffer
//! - Opening the RTDB live queries (aggregate records and settings)
//! - Spawning the session/measurement controller
//! - Mounting all API routes via the `routes` gateway (EMBP pattern)
//! - Binding the Axum HTTP server and serving requests
//!
//! # Environment Variables
//! - `MQTT_HOST` (**required**) – MQTT broker hostname
//! - `RTDB_BASE_URL` (**required**) – RTDB REST base URL
//! - `THERMOFLOW_LOG_LEVEL` (optional) – log verbosity (default: `debug`)
//! - `THERMOFLOW_SPAN_EVENTS` (optional) – span event mode for tracing
//! - see `config.rs` for the full list of optional variables
//!
//! This module follows the Explicit Module Boundary Pattern (EMBP) by
//! delegating configuration parsing to `config`, feed wiring to the
//! component modules, and route registration to `routes`.
use std::{env, io::IsTerminal, net::SocketAddr, sync::Arc};

use axum::Router;
use chrono::Utc;
use dotenvy::dotenv;
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

use anyhow::Result;

use thermoflow::aggregate::{self, AggregateView};
use thermoflow::config;
use thermoflow::controller::{self, EvalState, MetricsSnapshot};
use thermoflow::ingest::IngestClient;
use thermoflow::models::Settings;
use thermoflow::routes::{self, AppState};
use thermoflow::rtdb::RtdbClient;

// ---

#[tokio::main]
async fn main() -> Result<()> {
    // ---
    init_tracing();
    dotenv().ok();

    let cfg = config::load_from_env()?;
    cfg.log_config();

    tracing::info!(
        "Connecting to MQTT broker {}:{}",
        cfg.mqtt_host,
        cfg.mqtt_port
    );
    let ingest = Arc::new(IngestClient::connect(&cfg));

    let rtdb = RtdbClient::new(&cfg);

    // Session/measurement controller over the packet buffer
    let eval = Arc::new(Mutex::new(EvalState::new(Utc::now())));
    let (metrics_tx, metrics_rx) = watch::channel(MetricsSnapshot::default());
    controller::spawn(
        Arc::clone(&ingest),
        Arc::clone(&eval),
        metrics_tx,
        cfg.tick_interval_ms,
    );

    // Aggregate last-N live query
    let (aggregate_tx, aggregate_rx) = watch::channel(AggregateView::default());
    aggregate::spawn_feed(
        rtdb.stream(&cfg.rtdb_data_path, Some(cfg.aggregate_limit)),
        aggregate_tx,
    );

    // Settings document live query, seeded with a one-shot read. A store
    // outage at startup degrades to defaults instead of failing the boot.
    let initial_settings = match rtdb.fetch_settings().await {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!("Could not fetch settings, using defaults: {}", e);
            Settings::default()
        }
    };
    let (settings_tx, settings_rx) = watch::channel(initial_settings);
    aggregate::spawn_settings_feed(rtdb.stream(&cfg.rtdb_settings_path, None), settings_tx);

    // Build app from routes gateway (EMBP)
    let state = AppState {
        config: cfg,
        rtdb,
        ingest,
        eval,
        metrics: metrics_rx,
        aggregate: aggregate_rx,
        settings: settings_rx,
    };
    let app: Router = routes::router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], 8080));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ---

/// Initialize the global tracing subscriber for structured logging.
///
/// This function configures the [`tracing_subscriber`] with:
/// - Log target, file, and line number output enabled
/// - Color output controlled by TTY detection and `FORCE_COLOR` env var:
///   - `FORCE_COLOR=1|true|yes`: force colors on
///   - `FORCE_COLOR=0|false|no`: force colors off
///   - unset or other values: auto-detect TTY
/// - Span event emission mode controlled by the `THERMOFLOW_SPAN_EVENTS` env var:
///   - `"full"`       : emit ENTER, EXIT, and CLOSE events with timing
///   - `"enter_exit"` : emit ENTER and EXIT only
///   - unset or other values: emit CLOSE events only (default)
/// - Log level controlled by the `THERMOFLOW_LOG_LEVEL` env var
///
/// This should be called once at application startup before any logging
/// or tracing macros are invoked. It installs the subscriber globally
/// for the lifetime of the process.
fn init_tracing() {
    // ---
    let span_events = match env::var("THERMOFLOW_SPAN_EVENTS").as_deref() {
        Ok("full") => FmtSpan::FULL,
        Ok("enter_exit") => FmtSpan::ENTER | FmtSpan::EXIT,
        _ => FmtSpan::CLOSE,
    };

    // Determine if we should use colors
    let use_color = match env::var("FORCE_COLOR").as_deref() {
        Ok("1") | Ok("true") | Ok("yes") => true,
        Ok("0") | Ok("false") | Ok("no") => false,
        _ => std::io::stdout().is_terminal(),
    };

    // Use RUST_LOG if available, otherwise fall back to THERMOFLOW_LOG_LEVEL
    let env_filter = if env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let level = match env::var("THERMOFLOW_LOG_LEVEL").ok().as_deref() {
            Some("trace") => "trace",
            Some("debug") => "debug",
            Some("info") => "info",
            Some("warn") => "warn",
            Some("error") => "error",
            _ => "debug",
        };
        EnvFilter::new(format!("{level},rumqttc=warn,hyper=warn"))
    };

    tracing_subscriber::fmt()
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(span_events)
        .with_env_filter(env_filter)
        .with_ansi(use_color)
        .compact()
        .init();
}

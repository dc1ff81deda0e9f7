//! Configuration loader for the `thermoflow` backend service.
//!
//! This module centralizes all runtime configuration values and their defaults,
//! loading from environment variables (with optional `.env` file support
//! provided by the caller). By consolidating configuration logic here, we
//! avoid scattering `env::var` calls throughout the codebase, improving
//!
use std::env;

use anyhow::{anyhow, Result};

/// Parse an optional numeric environment variable with a default value.
macro_rules! parse_env_num {
    ($var_name:expr, $ty:ty, $default:expr) => {
        env::var($var_name)
            .ok()
            .map(|v| v.parse::<$ty>())
            .transpose()
            .map_err(|e| anyhow!("Invalid {}: {}", $var_name, e))?
            .unwrap_or($default)
    };
}

/// Parse a required string environment variable.
macro_rules! require_env {
    ($var_name:expr) => {
        env::var($var_name)
            .map_err(|_| anyhow!("{} must be set in .env or environment", $var_name))?
    };
}

/// Strongly typed application configuration.
///
/// All fields are immutable after loading, ensuring a consistent configuration
/// snapshot for the lifetime of the application. In particular the packet
/// buffer capacity cannot be resized in place; changing it means recreating
/// the ingestion client.
#[derive(Debug, Clone)]
pub struct Config {
    // ---
    /// MQTT broker hostname.
    pub mqtt_host: String,

    /// MQTT broker port (8883 for TLS brokers such as HiveMQ Cloud).
    pub mqtt_port: u16,

    /// Whether to wrap the MQTT connection in TLS.
    pub mqtt_tls: bool,

    /// Broker credentials; both empty means anonymous access.
    pub mqtt_username: String,
    pub mqtt_password: String,

    /// The single telemetry topic to subscribe to.
    pub mqtt_topic: String,

    /// Base URL of the RTDB REST API (no trailing slash).
    pub rtdb_base_url: String,

    /// Collection key holding the aggregated sensor records.
    pub rtdb_data_path: String,

    /// Document key holding the device settings.
    pub rtdb_settings_path: String,

    /// Capacity of the in-memory packet buffer.
    pub stream_buffer_limit: usize,

    /// Number of records requested from the aggregate live query.
    pub aggregate_limit: u32,

    /// Duration of the one-shot measurement window, in milliseconds.
    pub window_duration_ms: i64,

    /// Granularity of the measurement deadline check, in milliseconds.
    pub tick_interval_ms: u64,
}

/// Load configuration from environment variables with defaults.
///
/// Required:
/// - `MQTT_HOST` – MQTT broker hostname
/// - `RTDB_BASE_URL` – RTDB REST base URL
///
/// Optional:
/// - `MQTT_PORT` (default: 8883), `MQTT_TLS` (default: true)
/// - `MQTT_USERNAME` / `MQTT_PASSWORD` (default: empty)
/// - `MQTT_TOPIC` (default: `sensor_data/temp`)
/// - `RTDB_DATA_PATH` (default: `thermistor_sensor_data`)
/// - `RTDB_SETTINGS_PATH` (default: `settings`)
/// - `STREAM_BUFFER_LIMIT` – packet buffer capacity (default: 100)
/// - `AGGREGATE_LIMIT` – live query window size (default: 30)
/// - `WINDOW_DURATION_MS` – measurement window length (default: 60000)
/// - `TICK_INTERVAL_MS` – deadline check granularity (default: 100)
///
/// Returns an error if any required variable is missing or invalid.
pub fn load_from_env() -> Result<Config> {
    // ---
    let mqtt_host = require_env!("MQTT_HOST");
    let rtdb_base_url = require_env!("RTDB_BASE_URL")
        .trim_end_matches('/')
        .to_string();

    let mqtt_tls = !matches!(
        env::var("MQTT_TLS").as_deref(),
        Ok("0") | Ok("false") | Ok("no")
    );

    Ok(Config {
        mqtt_host,
        mqtt_port: parse_env_num!("MQTT_PORT", u16, 8883),
        mqtt_tls,
        mqtt_username: env::var("MQTT_USERNAME").unwrap_or_default(),
        mqtt_password: env::var("MQTT_PASSWORD").unwrap_or_default(),
        mqtt_topic: env::var("MQTT_TOPIC").unwrap_or_else(|_| "sensor_data/temp".into()),
        rtdb_base_url,
        rtdb_data_path: env::var("RTDB_DATA_PATH")
            .unwrap_or_else(|_| "thermistor_sensor_data".into()),
        rtdb_settings_path: env::var("RTDB_SETTINGS_PATH").unwrap_or_else(|_| "settings".into()),
        stream_buffer_limit: parse_env_num!("STREAM_BUFFER_LIMIT", usize, 100),
        aggregate_limit: parse_env_num!("AGGREGATE_LIMIT", u32, 30),
        window_duration_ms: parse_env_num!("WINDOW_DURATION_MS", i64, 60_000),
        tick_interval_ms: parse_env_num!("TICK_INTERVAL_MS", u64, 100),
    })
}

impl Config {
    /// Log the loaded configuration for debugging purposes.
    ///
    /// Masks sensitive information like the broker password while showing
    /// all configuration values that were loaded.
    pub fn log_config(&self) {
        // ---
        let masked_password = if self.mqtt_password.is_empty() {
            "(none)"
        } else {
            "****"
        };

        tracing::info!("Configuration loaded:");
        tracing::info!("  MQTT_HOST           : {}", self.mqtt_host);
        tracing::info!("  MQTT_PORT           : {}", self.mqtt_port);
        tracing::info!("  MQTT_TLS            : {}", self.mqtt_tls);
        tracing::info!("  MQTT_USERNAME       : {}", self.mqtt_username);
        tracing::info!("  MQTT_PASSWORD       : {}", masked_password);
        tracing::info!("  MQTT_TOPIC          : {}", self.mqtt_topic);
        tracing::info!("  RTDB_BASE_URL       : {}", self.rtdb_base_url);
        tracing::info!("  RTDB_DATA_PATH      : {}", self.rtdb_data_path);
        tracing::info!("  RTDB_SETTINGS_PATH  : {}", self.rtdb_settings_path);
        tracing::info!("  STREAM_BUFFER_LIMIT : {}", self.stream_buffer_limit);
        tracing::info!("  AGGREGATE_LIMIT     : {}", self.aggregate_limit);
        tracing::info!("  WINDOW_DURATION_MS  : {}", self.window_duration_ms);
        tracing::info!("  TICK_INTERVAL_MS    : {}", self.tick_interval_ms);
    }
}

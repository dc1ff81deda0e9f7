//! Simple data models for the telemetry stream.

use serde::{Deserialize, Serialize};

// ---

/// Sampling interval the device falls back to when a packet does not
/// declare one, in seconds. Must match the device firmware default.
pub const DEFAULT_READ_INTERVAL: f64 = 2.0;

/// Default alarm thresholds, used until the settings document is seen.
pub const DEFAULT_MIN_TEMP: f64 = 21.0;
pub const DEFAULT_MAX_TEMP: f64 = 27.0;

// ---

/// One decoded telemetry sample from the MQTT stream.
///
/// Created at the ingestion boundary on decode and immutable afterwards.
/// `msg_id` is monotonic per device but may wrap or reset when the device
/// reboots; `timestamp` is epoch milliseconds from the *device* clock, so
/// it is never trusted as an ordering key on the receiving side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Packet {
    // ---
    pub temperature: f64,
    pub msg_id: u64,
    pub timestamp: i64,
    #[serde(default)]
    pub interval: Option<f64>,
}

impl Packet {
    /// The sampling interval this packet declares, falling back to the
    /// firmware default when the field is absent.
    pub fn declared_interval(&self) -> f64 {
        self.interval.unwrap_or(DEFAULT_READ_INTERVAL)
    }
}

/// One entry from the aggregate live query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateRecord {
    // ---
    pub temperature: f64,
    pub alarm_status: String,
    #[serde(default)]
    pub message_id: Option<u64>,
    #[serde(default)]
    pub timestamp: Option<i64>,
    #[serde(default)]
    pub read_interval: Option<f64>,
}

/// The single device settings document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    // ---
    #[serde(default = "default_min_temp")]
    pub min_temp: f64,
    #[serde(default = "default_max_temp")]
    pub max_temp: f64,
    #[serde(default = "default_read_interval")]
    pub read_interval: f64,
    #[serde(default)]
    pub updated_at: Option<i64>,
}

fn default_min_temp() -> f64 {
    DEFAULT_MIN_TEMP
}

fn default_max_temp() -> f64 {
    DEFAULT_MAX_TEMP
}

fn default_read_interval() -> f64 {
    DEFAULT_READ_INTERVAL
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            min_temp: DEFAULT_MIN_TEMP,
            max_temp: DEFAULT_MAX_TEMP,
            read_interval: DEFAULT_READ_INTERVAL,
            updated_at: None,
        }
    }
}

/// Partial-field merge for the settings write path.
///
/// Only the fields that are present are written; the store merges them into
/// the existing document. `updated_at` is stamped by the writer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SettingsUpdate {
    // ---
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_temp: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_temp: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read_interval: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<i64>,
}

impl SettingsUpdate {
    pub fn is_empty(&self) -> bool {
        self.min_temp.is_none() && self.max_temp.is_none() && self.read_interval.is_none()
    }
}

// ---

/// Threshold classification of a temperature against the configured range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Comfort {
    Cold,
    Ideal,
    Hot,
}

impl Settings {
    /// Classify a temperature against the alarm thresholds.
    ///
    /// Values exactly on a threshold are still `Ideal`; only crossing the
    /// threshold trips the classification, matching the device alarm logic.
    pub fn classify(&self, temperature: f64) -> Comfort {
        // ---
        if temperature > self.max_temp {
            Comfort::Hot
        } else if temperature < self.min_temp {
            Comfort::Cold
        } else {
            Comfort::Ideal
        }
    }
}

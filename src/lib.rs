//! Library gateway for the `thermoflow` backend service.
//!
//! The service ingests two live feeds for a single thermistor device and
//! derives real-time operational metrics from them:
//! - An MQTT stream of raw telemetry packets (`ingest`), buffered in a
//!   bounded newest-first buffer (`buffer`).
//! - A push-based "last N records" live query from the RTDB store
//!   (`rtdb` + `aggregate`), delivered as full-snapshot replacements.
//!
//! The `controller` module layers session tracking, a one-shot measurement
//! window, and inter-arrival latency derivation over the packet buffer.
//! Derived state is served by the `routes` gateway (EMBP pattern): each
//! route file exports a subrouter, `routes::router` merges them, and the
//! binary in `main.rs` only talks to this gateway.

pub mod aggregate;
pub mod buffer;
pub mod config;
pub mod controller;
pub mod errors;
pub mod ingest;
pub mod models;
pub mod routes;
pub mod rtdb;

// ---

pub use config::Config;
pub use errors::{StreamError, StreamResult};
pub use models::{AggregateRecord, Comfort, Packet, Settings, SettingsUpdate};

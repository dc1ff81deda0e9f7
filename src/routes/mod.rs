use std::sync::Arc;

use axum::Router;
use parking_lot::Mutex;
use tokio::sync::watch;

use crate::aggregate::AggregateView;
use crate::config::Config;
use crate::controller::{EvalState, MetricsSnapshot};
use crate::ingest::IngestClient;
use crate::models::Settings;
use crate::rtdb::RtdbClient;

mod evaluation;
mod health;
mod metrics;
mod settings;

// ---

/// Shared application state handed to every route.
///
/// Derived values arrive through `watch` receivers: handlers only ever
/// borrow the latest published snapshot, never touch the buffer directly.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub rtdb: RtdbClient,
    pub ingest: Arc<IngestClient>,
    pub eval: Arc<Mutex<EvalState>>,
    pub metrics: watch::Receiver<MetricsSnapshot>,
    pub aggregate: watch::Receiver<AggregateView>,
    pub settings: watch::Receiver<Settings>,
}

pub fn router(state: AppState) -> Router {
    // ---
    Router::new()
        .merge(metrics::router())
        .merge(settings::router())
        .merge(evaluation::router())
        .merge(health::router())
        .with_state(state)
}

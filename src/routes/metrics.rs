//! Derived metrics endpoint.
//!
//! Serves the latest published state of both feeds in one response: the
//! stream-side metrics (session count, latency series, measurement window)
//! and the aggregate-side view (current value, status, history) with each
//! temperature evaluated against the current alarm thresholds.

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;
use tracing::debug;

use super::AppState;
use crate::aggregate::AggregateView;
use crate::controller::MetricsSnapshot;
use crate::models::{AggregateRecord, Comfort, Settings};

// ---

pub fn router() -> Router<AppState> {
    // ---
    Router::new().route("/metrics", get(handler))
}

/// One history row with its threshold evaluation attached.
#[derive(Debug, Serialize)]
struct HistoryRow {
    #[serde(flatten)]
    record: AggregateRecord,
    evaluation: Comfort,
}

#[derive(Debug, Serialize)]
struct AggregateReport {
    current_temp: Option<f64>,
    status: String,
    evaluation: Option<Comfort>,
    average: Option<f64>,
    trend: Vec<f64>,
    history: Vec<HistoryRow>,
}

#[derive(Debug, Serialize)]
struct MetricsResponse {
    connected: bool,
    stream: MetricsSnapshot,
    aggregate: AggregateReport,
    settings: Settings,
}

async fn handler(State(state): State<AppState>) -> Json<MetricsResponse> {
    // ---
    let stream = state.metrics.borrow().clone();
    let aggregate = state.aggregate.borrow().clone();
    let settings = state.settings.borrow().clone();

    debug!(
        "GET /metrics - connected={} buffered={} history={}",
        stream.connected,
        stream.buffered,
        aggregate.history.len()
    );

    Json(MetricsResponse {
        connected: stream.connected,
        aggregate: report(aggregate, &settings),
        stream,
        settings,
    })
}

fn report(view: AggregateView, settings: &Settings) -> AggregateReport {
    // ---
    AggregateReport {
        current_temp: view.current_value,
        evaluation: view.current_value.map(|t| settings.classify(t)),
        status: view.status_label,
        average: view.average,
        trend: view.trend,
        history: view
            .history
            .into_iter()
            .map(|record| HistoryRow {
                evaluation: settings.classify(record.temperature),
                record,
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn test_report_evaluates_each_row() {
        // ---
        let mut view = AggregateView::default();
        view.apply_snapshot(vec![
            AggregateRecord {
                temperature: 30.0,
                alarm_status: "ACTIVE".into(),
                message_id: None,
                timestamp: None,
                read_interval: None,
            },
            AggregateRecord {
                temperature: 24.0,
                alarm_status: "INACTIVE".into(),
                message_id: None,
                timestamp: None,
                read_interval: None,
            },
        ]);

        let report = report(view, &Settings::default());

        assert_eq!(report.current_temp, Some(24.0));
        assert_eq!(report.evaluation, Some(Comfort::Ideal));
        // History is newest first: 24.0 then 30.0
        assert_eq!(report.history[0].evaluation, Comfort::Ideal);
        assert_eq!(report.history[1].evaluation, Comfort::Hot);
    }
}

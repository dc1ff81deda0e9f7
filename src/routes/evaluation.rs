//! Measurement window and session reset endpoints.
//!
//! `POST /evaluation/start` arms the one-shot measurement window; while a
//! run is active the request is rejected with 409 and nothing changes.
//! `POST /evaluation/reset` restores the default read interval in the
//! store and, only once that write succeeded, zeroes the session counters
//! and drops the buffered packets.

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::post, Json, Router};
use chrono::Utc;
use serde::Serialize;
use tracing::{error, info};

use super::AppState;
use crate::errors::{ErrorBody, StreamError};
use crate::models::{SettingsUpdate, DEFAULT_READ_INTERVAL};

// ---

pub fn router() -> Router<AppState> {
    // ---
    Router::new()
        .route("/evaluation/start", post(start))
        .route("/evaluation/reset", post(reset))
}

#[derive(Serialize)]
struct StartResponse {
    deadline_ms: i64,
    duration_ms: i64,
}

async fn start(State(state): State<AppState>) -> impl IntoResponse {
    // ---
    let now_ms = Utc::now().timestamp_millis();
    let duration_ms = state.config.window_duration_ms;
    let head = state.ingest.head_msg_id();

    let started = state.eval.lock().window.start(now_ms, duration_ms, head);
    match started {
        Ok(deadline_ms) => {
            info!(
                "Measurement window armed: {} ms, deadline {}",
                duration_ms, deadline_ms
            );
            (
                StatusCode::OK,
                Json(StartResponse {
                    deadline_ms,
                    duration_ms,
                }),
            )
                .into_response()
        }
        Err(e @ StreamError::WindowActive) => {
            (StatusCode::CONFLICT, Json(ErrorBody::from(&e))).into_response()
        }
        Err(e) => {
            error!("Measurement start failed: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, Json(ErrorBody::from(&e))).into_response()
        }
    }
}

async fn reset(State(state): State<AppState>) -> impl IntoResponse {
    // ---
    let patch = SettingsUpdate {
        read_interval: Some(DEFAULT_READ_INTERVAL),
        ..Default::default()
    };

    // Local counters only reset once the store accepted the new interval,
    // mirroring the write-then-reset order of the evaluation workflow.
    if let Err(e) = state.rtdb.update_settings(&patch).await {
        error!("Reset write failed: {}", e);
        return (StatusCode::BAD_GATEWAY, Json(ErrorBody::from(&e))).into_response();
    }

    state.eval.lock().session.reset(Utc::now());
    state.ingest.clear();
    info!("Evaluation session reset to defaults");

    (StatusCode::OK, Json(serde_json::json!({"status": "ok"}))).into_response()
}

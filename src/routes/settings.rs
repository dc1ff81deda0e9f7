//! Settings write path.
//!
//! `POST /settings` merges the provided fields into the device settings
//! document in the store; `PUT /settings` replaces the document wholesale,
//! which is how the settings form saves. The device itself picks the change
//! up on its next cycle; the session controller never reads the document
//! for its reset decision, it only sees the new interval once packets
//! start declaring it.
//!
//! Write failures are reported to the caller as a failed request; there is
//! no automatic retry here, re-attempting is the caller's decision.

use axum::{
    extract::State, http::StatusCode, response::IntoResponse, routing::post, Json, Router,
};
use tracing::{error, info};

use super::AppState;
use crate::errors::{ErrorBody, StreamError};
use crate::models::{Settings, SettingsUpdate};

// ---

pub fn router() -> Router<AppState> {
    // ---
    Router::new().route("/settings", post(merge).put(replace))
}

async fn merge(
    State(state): State<AppState>,
    Json(patch): Json<SettingsUpdate>,
) -> impl IntoResponse {
    // ---
    if patch.is_empty() {
        let e = StreamError::InvalidConfig("settings update carries no fields".into());
        return (StatusCode::BAD_REQUEST, Json(ErrorBody::from(&e))).into_response();
    }

    info!(
        "POST /settings - min={:?} max={:?} interval={:?}",
        patch.min_temp, patch.max_temp, patch.read_interval
    );

    respond(state.rtdb.update_settings(&patch).await)
}

async fn replace(
    State(state): State<AppState>,
    Json(settings): Json<Settings>,
) -> impl IntoResponse {
    // ---
    info!(
        "PUT /settings - min={} max={} interval={}",
        settings.min_temp, settings.max_temp, settings.read_interval
    );

    respond(state.rtdb.put_settings(&settings).await)
}

fn respond(written: crate::errors::StreamResult<()>) -> axum::response::Response {
    // ---
    match written {
        Ok(()) => (StatusCode::OK, Json(serde_json::json!({"status": "ok"}))).into_response(),
        Err(e) => {
            error!("Settings write failed: {}", e);
            (StatusCode::BAD_GATEWAY, Json(ErrorBody::from(&e))).into_response()
        }
    }
}

use std::sync::Arc;

use crate::state::AppState;
use axum::{Json, extract::State, response::IntoResponse, response::Response};

/// Returns and clears every record buffered since the last call.
pub async fn records(State(state): State<Arc<AppState>>) -> Response {
    Json(state.records.drain()).into_response()
}

pub async fn anomalies(State(state): State<Arc<AppState>>) -> Response {
    Json(state.service.anomalies()).into_response()
}

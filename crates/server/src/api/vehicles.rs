use std::sync::Arc;

use crate::{
    dto::{FixBatch, IngestDto, VehicleDto},
    state::AppState,
};
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use tracing::error;

pub async fn post_fixes(
    State(state): State<Arc<AppState>>,
    Json(batch): Json<FixBatch>,
) -> Result<Response, StatusCode> {
    let fixes = batch.into_vec();
    let worker = state.clone();
    let results = tokio::task::spawn_blocking(move || worker.service.ingest_batch(fixes))
        .await
        .map_err(|err| {
            error!("Ingest task failed: {err}");
            StatusCode::INTERNAL_SERVER_ERROR
        })?;
    Ok(Json(IngestDto::from(results)).into_response())
}

pub async fn vehicles(State(state): State<Arc<AppState>>) -> Response {
    let snapshot = state.service.snapshot();
    let result: Vec<_> = state
        .service
        .vehicles()
        .iter()
        .map(|track| VehicleDto::from(track, &snapshot.network))
        .collect();
    Json(result).into_response()
}

pub async fn vehicle(
    Path(id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Result<Response, StatusCode> {
    let track = state.service.vehicle(&id).ok_or(StatusCode::NOT_FOUND)?;
    let snapshot = state.service.snapshot();
    Ok(Json(VehicleDto::from(&track, &snapshot.network)).into_response())
}

pub async fn etas(
    Path(id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Result<Response, StatusCode> {
    let etas = state.service.etas(&id).ok_or(StatusCode::NOT_FOUND)?;
    Ok(Json(etas).into_response())
}

pub async fn evict(
    Path(id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Result<Response, StatusCode> {
    let record = state
        .service
        .evict(&id)
        .map_err(|_| StatusCode::NOT_FOUND)?;
    Ok(Json(record).into_response())
}

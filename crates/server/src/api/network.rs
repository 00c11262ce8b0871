use crate::state::AppState;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures_util::StreamExt;
use headway::prelude::*;
use reqwest::header::ACCEPT_ENCODING;
use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::{fs::File, io::AsyncWriteExt};
use tracing::{error, info};

const DOWNLOAD_NAME: &str = "headway-feed.zip";

/// Reads the feed again from disk and swaps the network.
pub async fn reload(State(state): State<Arc<AppState>>) -> Result<Response, StatusCode> {
    let path = state.feed_path.read().await.clone();
    swap_network(&state, path).await?;
    Ok(().into_response())
}

/// Downloads a zipped feed from `q` and swaps the network to it.
pub async fn fetch_url(
    Query(params): Query<HashMap<String, String>>,
    State(state): State<Arc<AppState>>,
) -> Result<Response, StatusCode> {
    let Some(q) = params.get("q") else {
        return Err(StatusCode::BAD_REQUEST);
    };
    let response = reqwest::Client::new()
        .get(q)
        .header(ACCEPT_ENCODING, "gzip, deflate")
        .send()
        .await
        .map_err(|err| {
            error!("Failed to fetch: {err}");
            StatusCode::BAD_REQUEST
        })?;

    if !response.status().is_success() {
        let body = response.text().await.unwrap_or_default();
        error!("Response is not success: {body}");
        return Err(StatusCode::BAD_REQUEST);
    }

    let target = download_path(&*state.feed_path.read().await);
    let staging = staging_path(&target);
    let mut file = File::create(&staging).await.map_err(|err| {
        error!("Failed to create file: {err}");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let data = chunk.map_err(|err| {
            error!("Failed to fetch chunk: {err}");
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

        file.write_all(&data).await.map_err(|err| {
            error!("Failed to write to file: {err}");
            StatusCode::INTERNAL_SERVER_ERROR
        })?;
    }

    file.flush().await.map_err(|err| {
        error!("Failed to flush file: {err}");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    install(&state, staging, target).await?;
    Ok(().into_response())
}

/// Swaps the network to the downloaded feed, then moves it over `target`.
/// A feed that fails to load is deleted and the current one stays on disk.
async fn install(state: &Arc<AppState>, staging: PathBuf, target: PathBuf) -> Result<(), StatusCode> {
    if let Err(status) = swap_network(state, staging.clone()).await {
        if let Err(err) = tokio::fs::remove_file(&staging).await {
            error!("Failed to remove {}: {err}", staging.display());
        }
        return Err(status);
    }
    tokio::fs::rename(&staging, &target).await.map_err(|err| {
        error!("Failed to move feed to {}: {err}", target.display());
        StatusCode::INTERNAL_SERVER_ERROR
    })?;
    *state.feed_path.write().await = target;
    Ok(())
}

/// A zip feed is overwritten in place. A directory feed gets a zip next to it.
fn download_path(current: &Path) -> PathBuf {
    if current.is_dir() {
        current.with_file_name(DOWNLOAD_NAME)
    } else {
        current.to_path_buf()
    }
}

/// Downloads land next to the target until they have been loaded.
fn staging_path(target: &Path) -> PathBuf {
    let mut name = target.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    target.with_file_name(name)
}

async fn swap_network(state: &Arc<AppState>, path: PathBuf) -> Result<(), StatusCode> {
    let worker = state.clone();
    tokio::task::spawn_blocking(move || {
        let data = FeedReader::default().from_path(&path).load().map_err(|err| {
            error!("Failed to read feed {}: {err}", path.display());
            StatusCode::UNPROCESSABLE_ENTITY
        })?;
        worker
            .service
            .reload(data)
            .map_err(|_| StatusCode::UNPROCESSABLE_ENTITY)?;
        info!("Network reloaded from {}", path.display());
        Ok(())
    })
    .await
    .map_err(|err| {
        error!("Reload task failed: {err}");
        StatusCode::INTERNAL_SERVER_ERROR
    })?
}

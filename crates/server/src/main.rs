mod api;
mod dto;
mod state;

use crate::state::AppState;
use axum::routing::{get, post};
use headway::prelude::*;
use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::{Duration, Instant},
};
use tracing::{debug, error, info};

const PORT: u32 = 3000;
const SWEEP_INTERVAL: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt().init();

    info!("Starting server...");
    let args: Vec<_> = std::env::args().collect();
    if args.len() < 2 {
        error!("Usage: headway-server <feed zip or directory> [config.json]");
        std::process::exit(1);
    }
    let path = Path::new(&args[1])
        .canonicalize()
        .unwrap_or_else(|err| fail(format!("Invalid feed path {}: {err}", args[1])));
    let config = match args.get(2) {
        Some(config_path) => read_config(config_path).unwrap_or_else(|err| fail(err)),
        None => Config::default(),
    };

    info!("Loading feed...");
    let now = Instant::now();
    let data = FeedReader::default()
        .from_path(&path)
        .load()
        .unwrap_or_else(|err| fail(format!("Failed to read feed: {err}")));
    let state = AppState::new(path, config, data)
        .map(Arc::new)
        .unwrap_or_else(|err| fail(format!("Failed to build route network: {err}")));
    info!("Loading feed took {:?}", now.elapsed());

    spawn_sweeper(state.clone());

    let app = axum::Router::new()
        .route("/fixes", post(api::post_fixes))
        .route("/vehicles", get(api::vehicles))
        .route("/vehicles/{id}", get(api::vehicle).delete(api::evict))
        .route("/vehicles/{id}/etas", get(api::etas))
        .route("/records", get(api::records))
        .route("/anomalies", get(api::anomalies))
        .route("/network/reload", post(api::reload))
        .route("/network/fetch", get(api::fetch_url))
        .with_state(state);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", PORT))
        .await
        .unwrap_or_else(|err| fail(format!("Failed to bind port {PORT}: {err}")));
    info!("Listening to port {PORT}");
    if let Err(err) = axum::serve(listener, app).await {
        error!("Server stopped: {err}");
    }
}

fn spawn_sweeper(state: Arc<AppState>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(SWEEP_INTERVAL);
        loop {
            interval.tick().await;
            let moved = sweep(&state, Timestamp::now()).await;
            if moved > 0 {
                debug!("Sweep moved {moved} vehicles");
            }
        }
    });
}

/// Runs one sweep on the blocking pool. Returns the number of transitions.
async fn sweep(state: &Arc<AppState>, now: Timestamp) -> usize {
    let worker = state.clone();
    tokio::task::spawn_blocking(move || worker.service.sweep(now).len())
        .await
        .unwrap_or_else(|err| {
            error!("Sweep task failed: {err}");
            0
        })
}

fn read_config(path: &str) -> Result<Config, String> {
    let path = PathBuf::from(path);
    let text = std::fs::read_to_string(&path)
        .map_err(|err| format!("Failed to read config {}: {err}", path.display()))?;
    serde_json::from_str(&text)
        .map_err(|err| format!("Invalid config {}: {err}", path.display()))
}

fn fail(message: String) -> ! {
    error!("{message}");
    std::process::exit(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sweep_runs_off_the_async_workers() {
        let origin = Coordinate::new(59.0, 18.0);
        let data = NetworkData::from(vec![RouteData {
            id: "R".into(),
            stops: vec![
                StopData {
                    id: "A".into(),
                    coordinate: origin,
                    ..Default::default()
                },
                StopData {
                    id: "B".into(),
                    coordinate: origin.with_offset(800.0, 0.0),
                    ..Default::default()
                },
            ],
            ..Default::default()
        }]);
        let state = Arc::new(AppState::new(PathBuf::from("feed"), Config::default(), data).unwrap());
        state
            .service
            .ingest(&Fix::new("bus", Timestamp::from_seconds(0), origin))
            .unwrap();

        assert_eq!(sweep(&state, Timestamp::from_seconds(10)).await, 0);
        assert_eq!(sweep(&state, Timestamp::from_seconds(120)).await, 1);
        assert_eq!(state.records.drain().len(), 2);
    }
}

use headway::prelude::*;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StopDto {
    pub id: String,
    pub name: Option<String>,
    pub coordinate: Coordinate,
    pub distance_meters: f64,
}

impl StopDto {
    pub fn from(stop: &Stop) -> Self {
        Self {
            id: stop.id.to_string(),
            name: stop.name.as_deref().map(str::to_string),
            coordinate: stop.coordinate,
            distance_meters: stop.distance.as_meters(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VehicleDto {
    pub id: String,
    pub lifecycle: Lifecycle,
    pub route_id: Option<String>,
    pub route_name: Option<String>,
    pub coordinate: Coordinate,
    pub matched_coordinate: Option<Coordinate>,
    pub progress_meters: f64,
    pub speed_mps: f64,
    pub confidence: f64,
    pub last_seen: Timestamp,
    pub next_stop: Option<StopDto>,
}

impl VehicleDto {
    pub fn from(track: &VehicleTrack, network: &RouteNetwork) -> Self {
        let route = track.route_idx(network).and_then(|idx| network.route(idx));
        let next_stop = route.and_then(|route| {
            network
                .stops_by_route_idx(route.index)
                .iter()
                .find(|stop| stop.distance >= track.progress)
                .map(StopDto::from)
        });
        Self {
            id: track.vehicle_id.to_string(),
            lifecycle: track.lifecycle,
            route_id: track.route_id.as_deref().map(str::to_string),
            route_name: route
                .and_then(|route| route.short_name.as_ref().or(route.long_name.as_ref()))
                .map(|name| name.to_string()),
            coordinate: track.coordinate,
            matched_coordinate: track.matched_coordinate,
            progress_meters: track.progress.as_meters(),
            speed_mps: track.speed,
            confidence: track.confidence,
            last_seen: track.last_seen,
            next_stop,
        }
    }
}

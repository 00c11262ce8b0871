use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
    time::Instant,
};

use rayon::prelude::*;
use tracing::{debug, warn};

use crate::{
    network::{
        Error, Projection, Route, RouteNetwork, RouteSpeeds, Segment, Slice, SpeedProfile,
        SpeedRecord, Stop, Topology,
    },
    shared::geo::{Coordinate, Distance},
};

/// Shape points closer than this to the previous point are dropped.
const MIN_SEGMENT_LENGTH: Distance = Distance::from_meters(0.01);
/// A projected stop may lie this far off the forward part of the route
/// before an earlier, closer part of the route is considered the real one.
const STOP_SNAP_TOLERANCE: Distance = Distance::from_meters(50.0);
const PROGRESS_TOLERANCE: Distance = Distance::from_meters(1.0);

#[derive(Debug, Clone, Default)]
pub struct StopData {
    pub id: String,
    pub name: Option<String>,
    pub coordinate: Coordinate,
    /// Distance along the route. Projected onto the shape when missing.
    pub distance: Option<Distance>,
}

#[derive(Debug, Clone, Default)]
pub struct RouteData {
    pub id: String,
    pub short_name: Option<String>,
    pub long_name: Option<String>,
    /// Stops in calling order.
    pub stops: Vec<StopData>,
    /// Route geometry. The stop coordinates are used when empty.
    pub shape: Vec<Coordinate>,
}

/// Everything needed to build a [`RouteNetwork`].
#[derive(Debug, Clone, Default)]
pub struct NetworkData {
    pub routes: Vec<RouteData>,
    pub speeds: Vec<SpeedRecord>,
}

impl From<Vec<RouteData>> for NetworkData {
    fn from(routes: Vec<RouteData>) -> Self {
        Self {
            routes,
            speeds: Vec::new(),
        }
    }
}

struct BuiltRoute {
    id: Arc<str>,
    short_name: Option<Arc<str>>,
    long_name: Option<Arc<str>>,
    stops: Vec<Stop>,
    segments: Vec<Segment>,
    length: Distance,
}

impl RouteNetwork {
    pub fn load(routes: Vec<RouteData>) -> Result<Self, Error> {
        Self::from_data(routes.into())
    }

    /// Validates the routes and lays them out in the network arena.
    /// Routes are built in parallel; the first invalid route aborts the load.
    pub fn from_data(data: NetworkData) -> Result<Self, Error> {
        debug!("Building route network...");
        let now = Instant::now();
        if data.routes.is_empty() {
            return Err(Error::Empty);
        }

        let mut seen: HashSet<&str> = HashSet::new();
        for route in data.routes.iter() {
            if route.id.is_empty() {
                return Err(Error::InvalidTopology {
                    route: "".into(),
                    reason: Topology::EmptyId,
                });
            }
            if !seen.insert(route.id.as_str()) {
                return Err(Error::InvalidTopology {
                    route: route.id.as_str().into(),
                    reason: Topology::DuplicateRoute,
                });
            }
        }

        let built: Vec<BuiltRoute> = data
            .routes
            .into_par_iter()
            .map(build_route)
            .collect::<Result<_, _>>()?;

        let mut network = RouteNetwork::default();
        let mut routes: Vec<Route> = Vec::with_capacity(built.len());
        let mut stops: Vec<Stop> = Vec::new();
        let mut segments: Vec<Segment> = Vec::new();
        let mut stop_lookup: HashMap<Arc<str>, Vec<u32>> = HashMap::new();
        for (route_idx, route) in built.into_iter().enumerate() {
            let route_idx = route_idx as u32;
            let stop_slice = Slice {
                start_idx: stops.len() as u32,
                count: route.stops.len() as u32,
            };
            let segment_slice = Slice {
                start_idx: segments.len() as u32,
                count: route.segments.len() as u32,
            };

            for mut stop in route.stops {
                stop.index = stops.len() as u32;
                stop.route_idx = route_idx;
                stop_lookup
                    .entry(stop.id.clone())
                    .or_default()
                    .push(stop.index);
                stops.push(stop);
            }
            for mut segment in route.segments {
                segment.index = segments.len() as u32;
                segment.route_idx = route_idx;
                segments.push(segment);
            }

            network.route_lookup.insert(route.id.clone(), route_idx);
            routes.push(Route {
                index: route_idx,
                id: route.id,
                short_name: route.short_name,
                long_name: route.long_name,
                stops: stop_slice,
                segments: segment_slice,
                length: route.length,
            });
        }

        network.speeds = build_speeds(&network.route_lookup, routes.len(), data.speeds);
        network.routes = routes.into();
        network.stops = stops.into();
        network.segments = segments.into();
        network.stop_lookup = stop_lookup
            .into_iter()
            .map(|(id, indexes)| (id, indexes.into()))
            .collect();
        debug!(
            "Building route network with {} routes and {} segments took {:?}",
            network.routes.len(),
            network.segments.len(),
            now.elapsed()
        );
        Ok(network)
    }
}

fn build_route(data: RouteData) -> Result<BuiltRoute, Error> {
    let id: Arc<str> = data.id.into();
    let invalid = |reason: Topology| Error::InvalidTopology {
        route: id.clone(),
        reason,
    };

    if data.stops.len() < 2 {
        return Err(invalid(Topology::TooFewStops(data.stops.len())));
    }
    if let Some(stop) = data.stops.iter().find(|stop| !stop.coordinate.is_valid()) {
        return Err(invalid(Topology::InvalidCoordinate(stop.coordinate)));
    }

    let shape = if data.shape.is_empty() {
        data.stops.iter().map(|stop| stop.coordinate).collect()
    } else {
        data.shape
    };
    if let Some(point) = shape.iter().find(|point| !point.is_valid()) {
        return Err(invalid(Topology::InvalidCoordinate(*point)));
    }

    let mut points: Vec<Coordinate> = Vec::with_capacity(shape.len());
    for point in shape {
        if points
            .last()
            .is_none_or(|last| last.distance(&point) > MIN_SEGMENT_LENGTH)
        {
            points.push(point);
        }
    }
    if points.len() < 2 {
        return Err(invalid(Topology::TooFewShapePoints));
    }

    let mut traveled = Distance::ZERO;
    let segments: Vec<Segment> = points
        .windows(2)
        .enumerate()
        .map(|(i, pair)| {
            let (start, end) = (pair[0], pair[1]);
            let start_distance = traveled;
            traveled += start.distance(&end);
            Segment {
                index: u32::MAX,
                route_idx: u32::MAX,
                inner_idx: i as u32,
                start,
                end,
                start_distance,
                end_distance: traveled,
                bearing: start.bearing(&end),
            }
        })
        .collect();
    let length = traveled;

    let mut previous = Distance::ZERO;
    let mut stops: Vec<Stop> = Vec::with_capacity(data.stops.len());
    for (sequence, stop) in data.stops.into_iter().enumerate() {
        let stop_id: Arc<str> = stop.id.into();
        let non_monotonic = || Topology::NonMonotonicStops {
            stop: stop_id.clone(),
            sequence: sequence as u32,
        };
        let distance = match stop.distance {
            Some(distance) => {
                let distance = distance.min(length);
                if distance < previous {
                    return Err(invalid(non_monotonic()));
                }
                distance
            }
            None => locate_stop(&segments, &stop.coordinate, previous)
                .ok_or_else(|| invalid(non_monotonic()))?,
        };
        previous = distance;
        stops.push(Stop {
            index: u32::MAX,
            id: stop_id,
            name: stop.name.map(|name| name.into()),
            coordinate: stop.coordinate,
            route_idx: u32::MAX,
            sequence: sequence as u32,
            distance,
        });
    }

    Ok(BuiltRoute {
        id,
        short_name: data.short_name.map(|name| name.into()),
        long_name: data.long_name.map(|name| name.into()),
        stops,
        segments,
        length,
    })
}

/// Finds the stop's distance along the route, never going back past `previous`.
/// Returns `None` when the stop clearly belongs to an earlier part of the route.
fn locate_stop(segments: &[Segment], coordinate: &Coordinate, previous: Distance) -> Option<Distance> {
    let closest = |a: &Projection, b: &Projection| a.distance.total_cmp(&b.distance);
    let forward = segments
        .iter()
        .filter(|segment| segment.end_distance >= previous)
        .map(|segment| {
            let projection = segment.project(coordinate);
            if projection.progress >= previous {
                projection
            } else {
                let clamped = segment.coordinate_at(previous);
                Projection {
                    offset: previous - segment.start_distance,
                    distance: clamped.distance(coordinate),
                    progress: previous,
                    coordinate: clamped,
                }
            }
        })
        .min_by(closest)?;
    let global = segments
        .iter()
        .map(|segment| segment.project(coordinate))
        .min_by(closest)?;

    if global.progress + PROGRESS_TOLERANCE < previous
        && forward.distance > global.distance + STOP_SNAP_TOLERANCE
    {
        return None;
    }
    Some(forward.progress.max(previous))
}

fn build_speeds(
    route_lookup: &HashMap<Arc<str>, u32>,
    route_count: usize,
    records: Vec<SpeedRecord>,
) -> SpeedProfile {
    let mut speeds = vec![RouteSpeeds::default(); route_count];
    for record in records {
        let Some(route_idx) = route_lookup.get(record.route_id.as_str()) else {
            warn!("Ignoring speed for unknown route {}", record.route_id);
            continue;
        };
        if !record.speed_mps.is_finite() || record.speed_mps <= 0.0 {
            warn!(
                "Ignoring invalid speed {} for route {}",
                record.speed_mps, record.route_id
            );
            continue;
        }
        let route = &mut speeds[*route_idx as usize];
        match record.hour {
            Some(hour) if (hour as usize) < route.hourly.len() => {
                route.hourly[hour as usize] = Some(record.speed_mps)
            }
            Some(hour) => warn!("Ignoring speed for hour {hour} on route {}", record.route_id),
            None => route.average = Some(record.speed_mps),
        }
    }
    SpeedProfile::new(speeds)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn straight_route(id: &str, stops: &[(&str, f64)]) -> RouteData {
        let origin = Coordinate::new(59.0, 18.0);
        RouteData {
            id: id.into(),
            stops: stops
                .iter()
                .map(|(id, east)| StopData {
                    id: id.to_string(),
                    coordinate: origin.with_offset(*east, 0.0),
                    ..Default::default()
                })
                .collect(),
            shape: vec![
                origin,
                origin.with_offset(600.0, 0.0),
                origin.with_offset(1200.0, 0.0),
            ],
            ..Default::default()
        }
    }

    #[test]
    fn load_lays_out_arena() {
        let network = RouteNetwork::load(vec![
            straight_route("R1", &[("A", 0.0), ("B", 500.0), ("C", 1200.0)]),
            straight_route("R2", &[("B", 500.0), ("D", 900.0)]),
        ])
        .unwrap();

        assert_eq!(network.routes.len(), 2);
        assert_eq!(network.segments.len(), 4);
        let r2 = network.route_by_id("R2").unwrap();
        assert_eq!(r2.segments, Slice { start_idx: 2, count: 2 });
        assert_eq!(network.stops_by_id("B").len(), 2);

        let stops = network.stops_of("R1").unwrap();
        assert!((stops[1].distance.as_meters() - 500.0).abs() < 0.5);
        assert!((stops[2].distance.as_meters() - 1200.0).abs() < 0.5);
        assert_eq!(stops[2].sequence, 2);
    }

    #[test]
    fn segments_are_contiguous() {
        let network =
            RouteNetwork::load(vec![straight_route("R", &[("A", 0.0), ("B", 1200.0)])]).unwrap();
        let segments = network.segments_of("R").unwrap();
        for pair in segments.windows(2) {
            assert_eq!(pair[0].end_distance, pair[1].start_distance);
        }
        assert_eq!(segments.last().unwrap().end_distance, network.routes[0].length);
    }

    #[test]
    fn rejects_single_stop_route() {
        let result = RouteNetwork::load(vec![straight_route("R", &[("A", 0.0)])]);
        assert!(matches!(
            result,
            Err(Error::InvalidTopology {
                reason: Topology::TooFewStops(1),
                ..
            })
        ));
    }

    #[test]
    fn rejects_decreasing_stop_distances() {
        let mut route = straight_route("R", &[("A", 0.0), ("B", 500.0), ("C", 300.0)]);
        route.stops[0].distance = Some(Distance::from_meters(0.0));
        route.stops[1].distance = Some(Distance::from_meters(500.0));
        route.stops[2].distance = Some(Distance::from_meters(300.0));
        let result = RouteNetwork::load(vec![route]);
        assert!(matches!(
            result,
            Err(Error::InvalidTopology {
                reason: Topology::NonMonotonicStops { sequence: 2, .. },
                ..
            })
        ));
    }

    #[test]
    fn rejects_stops_projected_backwards() {
        let route = straight_route("R", &[("A", 0.0), ("B", 900.0), ("C", 200.0)]);
        let result = RouteNetwork::load(vec![route]);
        assert!(matches!(
            result,
            Err(Error::InvalidTopology {
                reason: Topology::NonMonotonicStops { .. },
                ..
            })
        ));
    }

    #[test]
    fn rejects_duplicates_and_empty() {
        let route = straight_route("R", &[("A", 0.0), ("B", 900.0)]);
        assert!(matches!(
            RouteNetwork::load(vec![route.clone(), route]),
            Err(Error::InvalidTopology {
                reason: Topology::DuplicateRoute,
                ..
            })
        ));
        assert_eq!(RouteNetwork::load(vec![]).unwrap_err(), Error::Empty);
    }

    #[test]
    fn stop_coordinates_become_shape() {
        let mut route = straight_route("R", &[("A", 0.0), ("B", 400.0), ("C", 1000.0)]);
        route.shape.clear();
        let network = RouteNetwork::load(vec![route]).unwrap();
        assert_eq!(network.segments.len(), 2);
        assert!((network.routes[0].length.as_meters() - 1000.0).abs() < 0.5);
    }

    #[test]
    fn distance_along_route() {
        let network =
            RouteNetwork::load(vec![straight_route("R", &[("A", 0.0), ("B", 1200.0)])]).unwrap();
        let point = Coordinate::new(59.0, 18.0).with_offset(750.0, 20.0);
        let distance = network.distance_along_route("R", &point).unwrap();
        assert!((distance.as_meters() - 750.0).abs() < 0.5);
        assert!(network.distance_along_route("missing", &point).is_none());
    }

    #[test]
    fn speeds_for_unknown_routes_are_ignored() {
        let data = NetworkData {
            routes: vec![straight_route("R", &[("A", 0.0), ("B", 1200.0)])],
            speeds: vec![
                SpeedRecord {
                    route_id: "R".into(),
                    hour: Some(8),
                    speed_mps: 7.0,
                },
                SpeedRecord {
                    route_id: "X".into(),
                    hour: None,
                    speed_mps: 3.0,
                },
            ],
        };
        let network = RouteNetwork::from_data(data).unwrap();
        assert_eq!(network.speeds.speed(0, 8), Some(7.0));
        assert_eq!(network.speeds.speed(0, 9), Some(7.0));
    }
}

use std::{collections::HashMap, sync::Arc};

mod entities;
mod load;
mod speed;
pub use entities::*;
pub use load::*;
pub use speed::*;

use thiserror::Error;

use crate::shared::geo::{Coordinate, Distance};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("Route {route} has invalid topology: {reason}")]
    InvalidTopology { route: Arc<str>, reason: Topology },
    #[error("Network contains no routes")]
    Empty,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum Topology {
    #[error("route id is empty")]
    EmptyId,
    #[error("route id is used more than once")]
    DuplicateRoute,
    #[error("route has {0} stops, at least 2 are required")]
    TooFewStops(usize),
    #[error("route geometry has fewer than 2 distinct points")]
    TooFewShapePoints,
    #[error("stop {stop} at sequence {sequence} lies before the previous stop")]
    NonMonotonicStops { stop: Arc<str>, sequence: u32 },
    #[error("coordinate {0} is outside the valid range")]
    InvalidCoordinate(Coordinate),
}

/// Validated, immutable route/stop/segment arena.
///
/// Everything is stored in flat arrays and cross referenced by index,
/// so a network can be shared between threads without locking.
#[derive(Debug, Clone, Default)]
pub struct RouteNetwork {
    pub routes: Box<[Route]>,
    pub stops: Box<[Stop]>,
    pub segments: Box<[Segment]>,
    pub speeds: SpeedProfile,

    route_lookup: HashMap<Arc<str>, u32>,
    stop_lookup: HashMap<Arc<str>, Box<[u32]>>,
}

impl RouteNetwork {
    /// Get a route with the given id.
    /// If no route is found with the given id None is returned.
    pub fn route_by_id(&self, id: &str) -> Option<&Route> {
        let index = self.route_lookup.get(id)?;
        Some(&self.routes[*index as usize])
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    pub fn route(&self, index: u32) -> Option<&Route> {
        self.routes.get(index as usize)
    }

    pub fn segment(&self, index: u32) -> Option<&Segment> {
        self.segments.get(index as usize)
    }

    pub fn stop(&self, index: u32) -> Option<&Stop> {
        self.stops.get(index as usize)
    }

    /// Every route stop with the given physical stop id, one per serving route.
    pub fn stops_by_id(&self, id: &str) -> Vec<&Stop> {
        self.stop_lookup
            .get(id)
            .map(|indexes| {
                indexes
                    .iter()
                    .map(|index| &self.stops[*index as usize])
                    .collect()
            })
            .unwrap_or_default()
    }

    /// The first route stop with the given id, in route load order.
    pub fn stop_by_id(&self, id: &str) -> Option<&Stop> {
        let index = self.stop_lookup.get(id)?.first()?;
        self.stops.get(*index as usize)
    }

    pub fn segments_by_route_idx(&self, route_idx: u32) -> &[Segment] {
        self.route(route_idx)
            .map(|route| &self.segments[route.segments.range()])
            .unwrap_or_default()
    }

    pub fn stops_by_route_idx(&self, route_idx: u32) -> &[Stop] {
        self.route(route_idx)
            .map(|route| &self.stops[route.stops.range()])
            .unwrap_or_default()
    }

    /// Ordered segments of a route.
    pub fn segments_of(&self, route_id: &str) -> Option<&[Segment]> {
        let route = self.route_by_id(route_id)?;
        Some(&self.segments[route.segments.range()])
    }

    /// Ordered stops of a route.
    pub fn stops_of(&self, route_id: &str) -> Option<&[Stop]> {
        let route = self.route_by_id(route_id)?;
        Some(&self.stops[route.stops.range()])
    }

    /// Closest point on the route's polyline to `point`.
    pub fn project_onto_route(&self, route_id: &str, point: &Coordinate) -> Option<Projection> {
        self.segments_of(route_id)?
            .iter()
            .map(|segment| segment.project(point))
            .min_by(|a, b| a.distance.total_cmp(&b.distance))
    }

    /// Distance from the route start to the closest point on the route.
    pub fn distance_along_route(&self, route_id: &str, point: &Coordinate) -> Option<Distance> {
        self.project_onto_route(route_id, point)
            .map(|projection| projection.progress)
    }

    /// Segment of the route covering `progress`, clamped to the route ends.
    pub fn segment_at(&self, route_idx: u32, progress: Distance) -> Option<&Segment> {
        let segments = self.segments_by_route_idx(route_idx);
        let position = segments.partition_point(|segment| segment.end_distance < progress);
        segments.get(position).or(segments.last())
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

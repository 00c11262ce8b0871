//! Grid bucketing over route segments.
//!
//! Every segment is registered in each grid cell its bounding box touches.
//! A query only visits the cells inside the search radius, so its cost
//! depends on local density instead of the size of the whole network.

use std::{collections::HashMap, time::Instant};

use tracing::debug;

use crate::{
    network::{Projection, RouteNetwork, Segment},
    shared::geo::{Coordinate, Distance},
};

type Cell = (i32, i32);

/// A segment near a queried coordinate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    pub segment_idx: u32,
    pub route_idx: u32,
    pub projection: Projection,
}

impl Candidate {
    pub fn distance(&self) -> Distance {
        self.projection.distance
    }
}

#[derive(Debug, Clone, Default)]
pub struct SpatialIndex {
    cell_size: Distance,
    cells: HashMap<Cell, Box<[u32]>>,
}

impl SpatialIndex {
    pub fn build(network: &RouteNetwork, cell_size: Distance) -> Self {
        debug!("Building segment grid...");
        let now = Instant::now();
        let mut cells: HashMap<Cell, Vec<u32>> = HashMap::new();
        network.segments.iter().for_each(|segment| {
            let (ax, ay) = segment.start.to_grid(cell_size);
            let (bx, by) = segment.end.to_grid(cell_size);
            for x in ax.min(bx)..=ax.max(bx) {
                for y in ay.min(by)..=ay.max(by) {
                    cells.entry((x, y)).or_default().push(segment.index);
                }
            }
        });
        let cells: HashMap<Cell, Box<[u32]>> = cells
            .into_iter()
            .map(|(cell, segments)| (cell, segments.into()))
            .collect();
        debug!(
            "Building segment grid with {} cells took {:?}",
            cells.len(),
            now.elapsed()
        );
        Self { cell_size, cells }
    }

    /// Segments within `radius` of `point`, closest first, drawn from at
    /// most `max_results` distinct routes. Every in-range segment of a kept
    /// route is returned, so a route passing the point twice keeps both passes.
    /// Returns an empty list when nothing is in range.
    pub fn nearest(
        &self,
        network: &RouteNetwork,
        point: &Coordinate,
        radius: Distance,
        max_results: usize,
    ) -> Vec<Candidate> {
        if max_results == 0 {
            return Vec::new();
        }
        let mut routes: Vec<u32> = Vec::with_capacity(max_results);
        self.within(network, point, radius)
            .into_iter()
            .filter(|candidate| {
                if routes.contains(&candidate.route_idx) {
                    return true;
                }
                if routes.len() < max_results {
                    routes.push(candidate.route_idx);
                    return true;
                }
                false
            })
            .collect()
    }

    /// Segments of one route within `radius` of `point`, closest first.
    pub fn nearest_on_route(
        &self,
        network: &RouteNetwork,
        point: &Coordinate,
        radius: Distance,
        route_idx: u32,
    ) -> Vec<Candidate> {
        let mut candidates = self.within(network, point, radius);
        candidates.retain(|candidate| candidate.route_idx == route_idx);
        candidates
    }

    fn within(&self, network: &RouteNetwork, point: &Coordinate, radius: Distance) -> Vec<Candidate> {
        if !point.is_valid() || self.cell_size.as_meters() <= 0.0 {
            return Vec::new();
        }
        let (reach_x, reach_y) = self.reach(point, radius);
        let (origin_x, origin_y) = point.to_grid(self.cell_size);

        let mut segment_idxs: Vec<u32> = (-reach_x..=reach_x)
            .flat_map(|x| (-reach_y..=reach_y).map(move |y| (origin_x + x, origin_y + y)))
            .filter_map(|cell| self.cells.get(&cell))
            .flat_map(|segments| segments.iter().copied())
            .collect();
        segment_idxs.sort_unstable();
        segment_idxs.dedup();

        let mut candidates: Vec<Candidate> = segment_idxs
            .into_iter()
            .filter_map(|idx| network.segment(idx))
            .map(|segment: &Segment| Candidate {
                segment_idx: segment.index,
                route_idx: segment.route_idx,
                projection: segment.project(point),
            })
            .filter(|candidate| candidate.distance() <= radius)
            .collect();
        candidates.sort_by(|a, b| {
            a.distance()
                .total_cmp(&b.distance())
                .then(a.segment_idx.cmp(&b.segment_idx))
        });
        candidates
    }

    /// Number of cells to visit on each side of the origin cell.
    /// A degree of longitude shrinks with latitude, so the east-west reach grows.
    /// The extra cell absorbs the difference between the grid's fixed
    /// metres-per-degree and the haversine distance.
    fn reach(&self, point: &Coordinate, radius: Distance) -> (i32, i32) {
        let cell = self.cell_size.as_meters();
        let radius = radius.as_meters().max(0.0);
        let lon_scale = point.latitude.to_radians().cos().max(0.01);
        let reach_x = (radius / (cell * lon_scale)).ceil() as i32 + 1;
        let reach_y = (radius / cell).ceil() as i32 + 1;
        (reach_x, reach_y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::{RouteData, StopData};

    fn network() -> RouteNetwork {
        let origin = Coordinate::new(59.0, 18.0);
        let route = |id: &str, north: f64| RouteData {
            id: id.into(),
            stops: vec![
                StopData {
                    id: format!("{id}-A"),
                    coordinate: origin.with_offset(0.0, north),
                    ..Default::default()
                },
                StopData {
                    id: format!("{id}-B"),
                    coordinate: origin.with_offset(2000.0, north),
                    ..Default::default()
                },
            ],
            shape: (0..=4)
                .map(|i| origin.with_offset(i as f64 * 500.0, north))
                .collect(),
            ..Default::default()
        };
        RouteNetwork::load(vec![route("north", 60.0), route("south", -20.0)]).unwrap()
    }

    #[test]
    fn nearest_orders_by_distance() {
        let network = network();
        let index = SpatialIndex::build(&network, Distance::from_meters(100.0));
        let point = Coordinate::new(59.0, 18.0).with_offset(1250.0, 0.0);

        let candidates = index.nearest(&network, &point, Distance::from_meters(75.0), 10);
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].route_idx, 1);
        assert!((candidates[0].distance().as_meters() - 20.0).abs() < 0.5);
        assert_eq!(candidates[1].route_idx, 0);
        assert!((candidates[1].distance().as_meters() - 60.0).abs() < 0.5);
    }

    #[test]
    fn nearest_respects_radius_and_limit() {
        let network = network();
        let index = SpatialIndex::build(&network, Distance::from_meters(100.0));
        let point = Coordinate::new(59.0, 18.0).with_offset(1250.0, 0.0);

        let candidates = index.nearest(&network, &point, Distance::from_meters(30.0), 10);
        assert_eq!(candidates.len(), 1);

        let candidates = index.nearest(&network, &point, Distance::from_meters(75.0), 1);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].route_idx, 1);
    }

    #[test]
    fn limit_counts_routes_not_segments() {
        let origin = Coordinate::new(59.0, 18.0);
        let routes: Vec<RouteData> = (0..10)
            .map(|i| RouteData {
                id: format!("shared-{i}"),
                stops: vec![
                    StopData {
                        id: format!("shared-{i}-A"),
                        coordinate: origin,
                        ..Default::default()
                    },
                    StopData {
                        id: format!("shared-{i}-B"),
                        coordinate: origin.with_offset(400.0, 0.0),
                        ..Default::default()
                    },
                ],
                shape: (0..=40)
                    .map(|step| origin.with_offset(step as f64 * 10.0, 0.0))
                    .collect(),
                ..Default::default()
            })
            .collect();
        let network = RouteNetwork::load(routes).unwrap();
        let index = SpatialIndex::build(&network, Distance::from_meters(100.0));
        let point = origin.with_offset(205.0, 3.0);

        let candidates = index.nearest(&network, &point, Distance::from_meters(30.0), 8);
        let mut routes: Vec<u32> = candidates.iter().map(|c| c.route_idx).collect();
        routes.sort_unstable();
        routes.dedup();
        assert_eq!(routes, (0..8).collect::<Vec<u32>>());
        assert!(candidates.len() > 8);

        let own = index.nearest_on_route(&network, &point, Distance::from_meters(30.0), 9);
        assert!(!own.is_empty());
        assert!(own.iter().all(|c| c.route_idx == 9));
        assert!(own[0].distance().as_meters() < 4.0);
    }

    #[test]
    fn nearest_is_empty_far_away() {
        let network = network();
        let index = SpatialIndex::build(&network, Distance::from_meters(100.0));
        let point = Coordinate::new(59.0, 18.0).with_offset(1000.0, 5000.0);
        assert!(index
            .nearest(&network, &point, Distance::from_meters(75.0), 10)
            .is_empty());
    }

    #[test]
    fn long_segments_are_found_from_their_middle() {
        let network = network();
        let index = SpatialIndex::build(&network, Distance::from_meters(50.0));
        let point = Coordinate::new(59.0, 18.0).with_offset(250.0, 55.0);
        let candidates = index.nearest(&network, &point, Distance::from_meters(10.0), 10);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].segment_idx, 0);
    }
}

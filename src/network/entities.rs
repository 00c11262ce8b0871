use std::{ops::Range, sync::Arc};

use crate::shared::geo::{Coordinate, Distance};

/// Metadata describing a contiguous range within one of the network's flat arrays.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slice {
    /// The index where the range begins.
    pub start_idx: u32,
    /// The number of entries in the range.
    pub count: u32,
}

impl Slice {
    pub fn range(&self) -> Range<usize> {
        let start = self.start_idx as usize;
        start..start + self.count as usize
    }
}

/// A line that vehicles are matched against.
#[derive(Debug, Default, Clone)]
pub struct Route {
    /// The global internal index used for O(1) array lookups in the network.
    pub index: u32,
    /// The unique external identifier.
    pub id: Arc<str>,
    pub short_name: Option<Arc<str>>,
    pub long_name: Option<Arc<str>>,
    /// Range of this route's stops in [`RouteNetwork::stops`](super::RouteNetwork).
    pub stops: Slice,
    /// Range of this route's segments in [`RouteNetwork::segments`](super::RouteNetwork).
    pub segments: Slice,
    /// Length of the full polyline.
    pub length: Distance,
}

/// A place where a route calls, positioned along that route.
///
/// A physical stop served by several routes appears once per route.
#[derive(Debug, Default, Clone)]
pub struct Stop {
    /// The global internal index for this route stop.
    pub index: u32,
    /// Unique external identifier for the physical stop.
    pub id: Arc<str>,
    /// Human-readable name (e.g., "Main St & 4th Ave").
    pub name: Option<Arc<str>>,
    pub coordinate: Coordinate,
    /// Pointer to the parent [`Route`].
    pub route_idx: u32,
    /// Zero-based position of this stop within its route.
    pub sequence: u32,
    /// Cumulative distance from the start of the route.
    pub distance: Distance,
}

/// A straight piece of a route between two consecutive shape points.
#[derive(Debug, Default, Clone)]
pub struct Segment {
    /// Global index in the network's segment array.
    pub index: u32,
    /// Pointer to the parent [`Route`].
    pub route_idx: u32,
    /// Zero-based position of this segment within its route.
    pub inner_idx: u32,
    pub start: Coordinate,
    pub end: Coordinate,
    /// Cumulative route distance at `start`.
    pub start_distance: Distance,
    /// Cumulative route distance at `end`.
    pub end_distance: Distance,
    /// Compass bearing from `start` to `end` in degrees.
    pub bearing: f64,
}

/// Where a coordinate lands when dropped perpendicular onto a segment.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct Projection {
    /// Distance from the segment start to the projected point.
    pub offset: Distance,
    /// Perpendicular distance between the coordinate and the segment.
    pub distance: Distance,
    /// Cumulative route distance at the projected point.
    pub progress: Distance,
    pub coordinate: Coordinate,
}

impl Segment {
    pub fn length(&self) -> Distance {
        self.end_distance - self.start_distance
    }

    /// Projects `point` onto the segment, clamped to its end points.
    pub fn project(&self, point: &Coordinate) -> Projection {
        let (px, py) = point.offset_from(&self.start);
        let (ex, ey) = self.end.offset_from(&self.start);
        let len_2 = ex * ex + ey * ey;
        let t = if len_2 == 0.0 {
            0.0
        } else {
            ((px * ex + py * ey) / len_2).clamp(0.0, 1.0)
        };
        let (cx, cy) = (t * ex, t * ey);
        let distance = Distance::from_meters(f64::hypot(px - cx, py - cy));
        let offset = self.length().scale(t);
        Projection {
            offset,
            distance,
            progress: self.start_distance + offset,
            coordinate: self.start.with_offset(cx, cy),
        }
    }

    /// Coordinate at `progress` along the route, clamped to this segment.
    pub fn coordinate_at(&self, progress: Distance) -> Coordinate {
        let length = self.length().as_meters();
        if length <= 0.0 {
            return self.start;
        }
        let t = ((progress - self.start_distance).as_meters() / length).clamp(0.0, 1.0);
        let (ex, ey) = self.end.offset_from(&self.start);
        self.start.with_offset(t * ex, t * ey)
    }
}

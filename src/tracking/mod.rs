use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    config::TrackConfig,
    fix::Fix,
    matcher::{Anchor, Match, Prior},
    network::RouteNetwork,
    shared::{
        geo::{Coordinate, Distance},
        time::Timestamp,
    },
};

/// Where a vehicle is in its life as seen by the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Lifecycle {
    /// No fix has been applied yet.
    Unseen,
    Tracking,
    /// Silent for longer than the stale timeout. Kept for display only.
    Stale,
    /// Silent for longer than the evict timeout. Removed from the tracker.
    Evicted,
}

/// How a fix changed the track.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Matched,
    /// A large backward jump with a confident match restarted the route.
    Reset,
    Unmatched,
    OutlierRejected,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackCounters {
    pub outliers: u64,
    pub unmatched: u64,
    pub resets: u64,
}

/// Per-vehicle tracking state.
///
/// The route is kept by id rather than index so the state stays meaningful
/// when the network is swapped for a newer one.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VehicleTrack {
    pub vehicle_id: Arc<str>,
    pub route_id: Option<Arc<str>>,
    /// Segment index within the matched route.
    pub segment_idx: Option<u32>,
    pub progress: Distance,
    /// Smoothed speed in metres per second.
    pub speed: f64,
    pub confidence: f64,
    /// The latest fix that passed the outlier check was matched.
    pub on_route: bool,
    pub lifecycle: Lifecycle,
    /// Last reported raw position that passed the outlier check.
    pub coordinate: Coordinate,
    /// Position on the route matching `progress`.
    pub matched_coordinate: Option<Coordinate>,
    /// Time of the last accepted match.
    pub last_update: Timestamp,
    /// Time of the last in-order fix of any kind.
    pub last_seen: Timestamp,
    pub counters: TrackCounters,
    #[serde(skip)]
    anchor: Option<Anchor>,
    #[serde(skip)]
    speed_samples: u32,
    #[serde(skip)]
    pub(crate) evicted: bool,
}

impl VehicleTrack {
    pub fn new(vehicle_id: Arc<str>) -> Self {
        Self {
            vehicle_id,
            route_id: None,
            segment_idx: None,
            progress: Distance::ZERO,
            speed: 0.0,
            confidence: 0.0,
            on_route: false,
            lifecycle: Lifecycle::Unseen,
            coordinate: Coordinate::default(),
            matched_coordinate: None,
            last_update: Timestamp::default(),
            last_seen: Timestamp::default(),
            counters: TrackCounters::default(),
            anchor: None,
            speed_samples: 0,
            evicted: false,
        }
    }

    pub fn is_matched(&self) -> bool {
        self.route_id.is_some()
    }

    /// Index of the matched route in `network`, if it still exists there.
    pub fn route_idx(&self, network: &RouteNetwork) -> Option<u32> {
        let route = network.route_by_id(self.route_id.as_deref()?)?;
        Some(route.index)
    }

    pub fn prior(&self, network: &RouteNetwork) -> Prior {
        Prior {
            anchor: self.anchor,
            route_idx: self.route_idx(network),
            progress: self.progress,
            speed: self.speed,
            updated: self.last_update,
        }
    }

    pub fn apply_match(
        &mut self,
        network: &RouteNetwork,
        fix: &Fix,
        matched: &Match,
        config: &TrackConfig,
    ) -> Applied {
        let Some(route) = network.route(matched.route_idx) else {
            return self.apply_unmatched(fix, config);
        };
        let same_route = self.route_id.as_deref() == Some(route.id.as_ref());
        let elapsed = (fix.timestamp - self.last_update).as_seconds_f64();

        let mut applied = Applied::Matched;
        let sample = if same_route {
            let delta = matched.progress - self.progress;
            if delta >= Distance::ZERO {
                self.progress = matched.progress;
                self.segment_idx = Some(matched.segment_inner);
                (elapsed > 0.0).then(|| delta.as_meters() / elapsed)
            } else if delta.abs() >= config.reset_distance
                && matched.spatial_confidence >= config.reset_confidence
            {
                debug!(
                    "Vehicle {} restarted route {} ({:.0}m -> {:.0}m)",
                    self.vehicle_id,
                    route.id,
                    self.progress.as_meters(),
                    matched.progress.as_meters()
                );
                self.progress = matched.progress;
                self.segment_idx = Some(matched.segment_inner);
                self.speed = 0.0;
                self.speed_samples = 0;
                self.counters.resets += 1;
                applied = Applied::Reset;
                None
            } else {
                None
            }
        } else {
            self.route_id = Some(route.id.clone());
            self.progress = matched.progress;
            self.segment_idx = Some(matched.segment_inner);
            None
        };
        if let Some(sample) = sample.or(fix.speed) {
            self.smooth_speed(sample, config.speed_smoothing);
        }

        self.matched_coordinate = network
            .segment_at(route.index, self.progress)
            .map(|segment| segment.coordinate_at(self.progress));
        self.confidence = matched.confidence;
        self.on_route = true;
        self.lifecycle = Lifecycle::Tracking;
        self.last_update = fix.timestamp;
        self.accept_position(fix);
        applied
    }

    /// Keeps the previous route and progress but trusts them less.
    pub fn apply_unmatched(&mut self, fix: &Fix, config: &TrackConfig) -> Applied {
        self.confidence *= config.confidence_decay;
        self.counters.unmatched += 1;
        self.on_route = false;
        if self.lifecycle == Lifecycle::Unseen {
            self.lifecycle = Lifecycle::Tracking;
            self.last_update = fix.timestamp;
        }
        self.accept_position(fix);
        Applied::Unmatched
    }

    /// The fix is discarded; only the confidence and counters change.
    pub fn apply_outlier(&mut self, fix: &Fix, config: &TrackConfig) -> Applied {
        self.confidence *= config.confidence_decay;
        self.counters.outliers += 1;
        self.last_seen = self.last_seen.max(fix.timestamp);
        Applied::OutlierRejected
    }

    /// Moves the lifecycle forward for a vehicle that went quiet.
    /// Returns the new lifecycle when it changed.
    pub fn expire(&mut self, now: Timestamp, config: &TrackConfig) -> Option<Lifecycle> {
        let silence = now - self.last_seen;
        if silence > config.evict_timeout {
            if self.lifecycle == Lifecycle::Evicted {
                return None;
            }
            self.lifecycle = Lifecycle::Evicted;
            self.confidence = 0.0;
            return Some(Lifecycle::Evicted);
        }
        if silence > config.stale_timeout && self.lifecycle == Lifecycle::Tracking {
            self.lifecycle = Lifecycle::Stale;
            self.confidence = 0.0;
            return Some(Lifecycle::Stale);
        }
        None
    }

    fn accept_position(&mut self, fix: &Fix) {
        self.coordinate = fix.coordinate();
        self.anchor = Some(Anchor {
            coordinate: self.coordinate,
            timestamp: fix.timestamp,
        });
        self.last_seen = self.last_seen.max(fix.timestamp);
    }

    fn smooth_speed(&mut self, sample: f64, weight: f64) {
        if !sample.is_finite() {
            return;
        }
        if self.speed_samples == 0 {
            self.speed = sample;
        } else {
            self.speed = weight * sample + (1.0 - weight) * self.speed;
        }
        self.speed_samples = self.speed_samples.saturating_add(1);
    }
}

//! Resolves a raw fix to a place on the route network.
//!
//! Candidates come from the [`SpatialIndex`] and are ranked by a weighted
//! score of perpendicular distance, continuity with the vehicle's previous
//! match and agreement with the reported heading. The best candidate is
//! the one with the lowest score, not the one closest to the fix.

use std::cmp::Ordering;

use tracing::trace;

use crate::{
    config::MatchConfig,
    fix::Fix,
    network::RouteNetwork,
    shared::{
        geo::{Coordinate, Distance, heading_difference},
        time::Timestamp,
    },
    spatial::{Candidate, SpatialIndex},
};

/// Last raw position accepted for a vehicle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Anchor {
    pub coordinate: Coordinate,
    pub timestamp: Timestamp,
}

/// What the matcher knows about a vehicle before the new fix.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Prior {
    pub anchor: Option<Anchor>,
    /// Route of the previous match, resolved against the current network.
    pub route_idx: Option<u32>,
    pub progress: Distance,
    /// Smoothed speed in metres per second.
    pub speed: f64,
    /// Time of the previous accepted match.
    pub updated: Timestamp,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Match {
    pub route_idx: u32,
    /// Global segment index.
    pub segment_idx: u32,
    /// Segment index within the route.
    pub segment_inner: u32,
    pub progress: Distance,
    /// Perpendicular distance between the fix and the route.
    pub distance: Distance,
    /// The fix snapped onto the segment.
    pub coordinate: Coordinate,
    pub score: f64,
    pub confidence: f64,
    /// Confidence from geometry alone, ignoring continuity with the prior.
    pub spatial_confidence: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MatchOutcome {
    Matched(Match),
    /// Nothing plausible nearby, or the best candidate was too weak.
    Unmatched { best_confidence: Option<f64> },
    /// The fix implies a jump faster than the configured ceiling.
    Outlier { implied_speed: f64 },
}

struct Scored {
    candidate: Candidate,
    score: f64,
    spatial: f64,
}

pub struct MapMatcher<'a> {
    network: &'a RouteNetwork,
    index: &'a SpatialIndex,
    config: &'a MatchConfig,
}

impl<'a> MapMatcher<'a> {
    pub fn new(network: &'a RouteNetwork, index: &'a SpatialIndex, config: &'a MatchConfig) -> Self {
        Self {
            network,
            index,
            config,
        }
    }

    pub fn match_fix(&self, fix: &Fix, prior: &Prior) -> MatchOutcome {
        if let Some(implied_speed) = self.outlier_speed(fix, prior) {
            return MatchOutcome::Outlier { implied_speed };
        }

        let point = fix.coordinate();
        let radius = self.search_radius(fix);
        let mut candidates = self.candidates(&point, radius, prior);
        if candidates.is_empty() {
            let expanded = radius.scale(self.config.expansion_factor);
            trace!("No candidates within {radius:?}, retrying with {expanded:?}");
            candidates = self.candidates(&point, expanded, prior);
        }

        let best = candidates
            .into_iter()
            .filter_map(|candidate| self.score(candidate, fix, prior))
            .min_by(|a, b| {
                a.score
                    .total_cmp(&b.score)
                    .then(a.candidate.distance().total_cmp(&b.candidate.distance()))
                    .then(a.candidate.segment_idx.cmp(&b.candidate.segment_idx))
            });
        let Some(best) = best else {
            return MatchOutcome::Unmatched {
                best_confidence: None,
            };
        };

        let confidence = 1.0 / (1.0 + best.score);
        if confidence < self.config.min_confidence {
            return MatchOutcome::Unmatched {
                best_confidence: Some(confidence),
            };
        }

        let segment_inner = self
            .network
            .segment(best.candidate.segment_idx)
            .map(|segment| segment.inner_idx)
            .unwrap_or_default();
        MatchOutcome::Matched(Match {
            route_idx: best.candidate.route_idx,
            segment_idx: best.candidate.segment_idx,
            segment_inner,
            progress: best.candidate.projection.progress,
            distance: best.candidate.distance(),
            coordinate: best.candidate.projection.coordinate,
            score: best.score,
            confidence,
            spatial_confidence: 1.0 / (1.0 + best.spatial),
        })
    }

    /// Radius widened by the reported accuracy, bounded by the configured maximum.
    pub fn search_radius(&self, fix: &Fix) -> Distance {
        let accuracy = Distance::from_meters(fix.accuracy.unwrap_or_default())
            .scale(self.config.accuracy_factor);
        let ceiling = self.config.max_search_radius.max(self.config.search_radius);
        self.config.search_radius.max(accuracy).min(ceiling)
    }

    /// Nearby segments from the closest routes, plus the prior route's own
    /// segments when a crowded corridor pushed it out of the closest set.
    fn candidates(&self, point: &Coordinate, radius: Distance, prior: &Prior) -> Vec<Candidate> {
        let mut candidates =
            self.index
                .nearest(self.network, point, radius, self.config.max_candidates);
        let Some(route_idx) = prior.route_idx else {
            return candidates;
        };
        if !candidates
            .iter()
            .any(|candidate| candidate.route_idx == route_idx)
        {
            candidates.extend(
                self.index
                    .nearest_on_route(self.network, point, radius, route_idx),
            );
        }
        candidates
    }

    fn jitter(&self, fix: &Fix) -> Distance {
        fix.accuracy
            .map(Distance::from_meters)
            .unwrap_or(self.config.default_accuracy)
    }

    /// Implied speed since the last accepted position, if it breaks the ceiling.
    fn outlier_speed(&self, fix: &Fix, prior: &Prior) -> Option<f64> {
        let anchor = prior.anchor?;
        let moved = anchor.coordinate.distance(&fix.coordinate());
        let excess = (moved - self.jitter(fix)).as_meters();
        if excess <= 0.0 {
            return None;
        }
        let elapsed = (fix.timestamp - anchor.timestamp).as_seconds_f64();
        let implied_speed = if elapsed > 0.0 {
            excess / elapsed
        } else {
            f64::INFINITY
        };
        (implied_speed > self.config.outlier_speed).then_some(implied_speed)
    }

    /// Lower is better. `None` when the candidate is physically implausible.
    fn score(&self, candidate: Candidate, fix: &Fix, prior: &Prior) -> Option<Scored> {
        let radius = self.config.search_radius.as_meters().max(f64::EPSILON);
        let distance = candidate.distance().as_meters() / radius;
        let continuity = self.continuity(&candidate, fix, prior)?;
        let heading = self.heading(&candidate, fix);

        let spatial =
            self.config.distance_weight * distance + self.config.heading_weight * heading;
        Some(Scored {
            candidate,
            score: spatial + self.config.continuity_weight * continuity,
            spatial,
        })
    }

    fn continuity(&self, candidate: &Candidate, fix: &Fix, prior: &Prior) -> Option<f64> {
        let Some(route_idx) = prior.route_idx else {
            return Some(0.0);
        };
        if route_idx != candidate.route_idx {
            return Some(self.config.route_switch_penalty);
        }

        let radius = self.config.search_radius.as_meters().max(f64::EPSILON);
        let delta = (candidate.projection.progress - prior.progress).as_meters();
        let elapsed = (fix.timestamp - prior.updated).as_seconds_f64().max(0.0);

        match delta.partial_cmp(&0.0) {
            Some(Ordering::Greater) | Some(Ordering::Equal) => {
                let excess = delta - self.jitter(fix).as_meters();
                if excess > 0.0 {
                    let implied = if elapsed > 0.0 {
                        excess / elapsed
                    } else {
                        f64::INFINITY
                    };
                    if implied > self.config.outlier_speed {
                        return None;
                    }
                }
                let expected = prior.speed.max(0.0) * elapsed;
                Some(((delta - expected).abs() / (radius + expected)).min(1.0))
            }
            _ if -delta <= self.config.backtrack_tolerance.as_meters() => Some(0.0),
            _ => Some((-delta / radius).min(1.0)),
        }
    }

    fn heading(&self, candidate: &Candidate, fix: &Fix) -> f64 {
        let Some(heading) = fix.heading else {
            return 0.0;
        };
        if fix
            .speed
            .is_some_and(|speed| speed < self.config.heading_min_speed)
        {
            return 0.0;
        }
        self.network
            .segment(candidate.segment_idx)
            .map(|segment| heading_difference(heading, segment.bearing) / 180.0)
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::{RouteData, StopData};

    fn origin() -> Coordinate {
        Coordinate::new(59.0, 18.0)
    }

    fn route(id: &str, north: f64, reverse: bool) -> RouteData {
        let mut shape: Vec<Coordinate> = (0..=4)
            .map(|i| origin().with_offset(i as f64 * 500.0, north))
            .collect();
        if reverse {
            shape.reverse();
        }
        RouteData {
            id: id.into(),
            stops: vec![
                StopData {
                    id: format!("{id}-first"),
                    coordinate: shape[0],
                    ..Default::default()
                },
                StopData {
                    id: format!("{id}-last"),
                    coordinate: shape[4],
                    ..Default::default()
                },
            ],
            shape,
            ..Default::default()
        }
    }

    fn setup(routes: Vec<RouteData>) -> (RouteNetwork, SpatialIndex, MatchConfig) {
        let network = RouteNetwork::load(routes).unwrap();
        let index = SpatialIndex::build(&network, Distance::from_meters(100.0));
        (network, index, MatchConfig::default())
    }

    fn fix_at(east: f64, north: f64, seconds: i64) -> Fix {
        Fix::new(
            "bus",
            Timestamp::from_seconds(seconds),
            origin().with_offset(east, north),
        )
    }

    #[test]
    fn matches_single_nearby_segment() {
        let (network, index, config) = setup(vec![route("R", 0.0, false)]);
        let matcher = MapMatcher::new(&network, &index, &config);
        let MatchOutcome::Matched(matched) = matcher.match_fix(&fix_at(720.0, 12.0, 0), &Prior::default())
        else {
            panic!("expected a match");
        };
        assert_eq!(matched.segment_inner, 1);
        assert!((matched.progress.as_meters() - 720.0).abs() < 0.5);
        assert!(matched.confidence >= config.min_confidence);
    }

    #[test]
    fn unmatched_when_far_from_every_route() {
        let (network, index, config) = setup(vec![route("R", 0.0, false)]);
        let matcher = MapMatcher::new(&network, &index, &config);
        let outcome = matcher.match_fix(&fix_at(720.0, 400.0, 0), &Prior::default());
        assert_eq!(
            outcome,
            MatchOutcome::Unmatched {
                best_confidence: None
            }
        );
    }

    #[test]
    fn expands_radius_once() {
        let (network, index, config) = setup(vec![route("R", 0.0, false)]);
        let matcher = MapMatcher::new(&network, &index, &config);
        let outcome = matcher.match_fix(&fix_at(720.0, 100.0, 0), &Prior::default());
        assert!(matches!(outcome, MatchOutcome::Matched(_)));
    }

    #[test]
    fn heading_breaks_tie_between_directions() {
        let (network, index, config) =
            setup(vec![route("east", 5.0, false), route("west", -5.0, true)]);
        let matcher = MapMatcher::new(&network, &index, &config);

        let fix = fix_at(1100.0, 0.0, 0).with_heading(270.0).with_speed(8.0);
        let MatchOutcome::Matched(matched) = matcher.match_fix(&fix, &Prior::default()) else {
            panic!("expected a match");
        };
        assert_eq!(network.routes[matched.route_idx as usize].id.as_ref(), "west");

        let fix = fix_at(1100.0, 0.0, 0).with_heading(90.0).with_speed(8.0);
        let MatchOutcome::Matched(matched) = matcher.match_fix(&fix, &Prior::default()) else {
            panic!("expected a match");
        };
        assert_eq!(network.routes[matched.route_idx as usize].id.as_ref(), "east");
    }

    #[test]
    fn continuity_beats_raw_distance() {
        let (network, index, config) =
            setup(vec![route("A", 10.0, false), route("B", -25.0, false)]);
        let matcher = MapMatcher::new(&network, &index, &config);
        let prior = Prior {
            anchor: Some(Anchor {
                coordinate: origin().with_offset(900.0, -25.0),
                timestamp: Timestamp::from_seconds(0),
            }),
            route_idx: Some(1),
            progress: Distance::from_meters(900.0),
            speed: 10.0,
            updated: Timestamp::from_seconds(0),
        };

        // Closer to A, but B continues the previous match.
        let MatchOutcome::Matched(matched) = matcher.match_fix(&fix_at(1000.0, 0.0, 10), &prior)
        else {
            panic!("expected a match");
        };
        assert_eq!(matched.route_idx, 1);
    }

    #[test]
    fn keeps_prior_route_on_crowded_corridor() {
        let routes: Vec<RouteData> = (0..10).map(|i| route(&format!("R{i}"), 0.0, false)).collect();
        let (network, index, config) = setup(routes);
        assert!(network.routes.len() > config.max_candidates);
        let matcher = MapMatcher::new(&network, &index, &config);
        let prior = Prior {
            anchor: Some(Anchor {
                coordinate: origin().with_offset(100.0, 0.0),
                timestamp: Timestamp::from_seconds(0),
            }),
            route_idx: Some(9),
            progress: Distance::from_meters(100.0),
            speed: 10.0,
            updated: Timestamp::from_seconds(0),
        };

        let MatchOutcome::Matched(matched) = matcher.match_fix(&fix_at(200.0, 0.0, 10), &prior)
        else {
            panic!("expected a match");
        };
        assert_eq!(matched.route_idx, 9);
        assert!((matched.progress.as_meters() - 200.0).abs() < 0.5);
    }

    #[test]
    fn rejects_implausible_jump() {
        let (network, index, config) = setup(vec![route("R", 0.0, false)]);
        let matcher = MapMatcher::new(&network, &index, &config);
        let prior = Prior {
            anchor: Some(Anchor {
                coordinate: origin().with_offset(100.0, 0.0),
                timestamp: Timestamp::from_seconds(10),
            }),
            route_idx: Some(0),
            progress: Distance::from_meters(100.0),
            speed: 10.0,
            updated: Timestamp::from_seconds(10),
        };
        let outcome = matcher.match_fix(&fix_at(1900.0, 0.0, 11), &prior);
        let MatchOutcome::Outlier { implied_speed } = outcome else {
            panic!("expected an outlier, got {outcome:?}");
        };
        assert!(implied_speed > config.outlier_speed);
    }

    #[test]
    fn same_timestamp_jitter_is_not_an_outlier() {
        let (network, index, config) = setup(vec![route("R", 0.0, false)]);
        let matcher = MapMatcher::new(&network, &index, &config);
        let prior = Prior {
            anchor: Some(Anchor {
                coordinate: origin().with_offset(100.0, 0.0),
                timestamp: Timestamp::from_seconds(10),
            }),
            ..Default::default()
        };
        let outcome = matcher.match_fix(&fix_at(105.0, 3.0, 10), &prior);
        assert!(matches!(outcome, MatchOutcome::Matched(_)));
    }

    #[test]
    fn accuracy_widens_radius_up_to_maximum() {
        let (network, index, config) = setup(vec![route("R", 0.0, false)]);
        let matcher = MapMatcher::new(&network, &index, &config);
        let fix = fix_at(0.0, 0.0, 0);
        assert_eq!(matcher.search_radius(&fix), config.search_radius);
        assert_eq!(
            matcher.search_radius(&fix.clone().with_accuracy(100.0)),
            Distance::from_meters(150.0)
        );
        assert_eq!(
            matcher.search_radius(&fix.with_accuracy(1000.0)),
            config.max_search_radius
        );
    }
}

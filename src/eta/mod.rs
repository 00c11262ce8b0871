use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::{
    config::EtaConfig,
    network::RouteNetwork,
    shared::{
        geo::Distance,
        time::{Duration, Timestamp},
    },
    tracking::{Lifecycle, VehicleTrack},
};

/// Predicted arrival of a vehicle at one downstream stop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EtaPrediction {
    pub vehicle_id: Arc<str>,
    pub stop_id: Arc<str>,
    pub stop_sequence: u32,
    #[serde(rename = "remainingMeters")]
    pub remaining: Distance,
    #[serde(rename = "predictedTimestamp")]
    pub predicted: Timestamp,
    /// Half-width of the confidence band.
    #[serde(rename = "confidenceBandMs")]
    pub band: Duration,
    /// `false` once the vehicle has gone stale or lost the route.
    pub valid: bool,
    /// The vehicle is within the arrival threshold of the stop.
    pub arriving: bool,
    /// The historical speed was used instead of the vehicle's own.
    pub fallback: bool,
}

impl EtaPrediction {
    pub fn earliest(&self) -> Timestamp {
        self.predicted - self.band
    }

    pub fn latest(&self) -> Timestamp {
        self.predicted + self.band
    }
}

pub struct EtaEstimator<'a> {
    config: &'a EtaConfig,
}

impl<'a> EtaEstimator<'a> {
    pub fn new(config: &'a EtaConfig) -> Self {
        Self { config }
    }

    /// One prediction per stop at or beyond the vehicle's progress.
    /// Vehicles without a route on `network` get none.
    pub fn estimate(&self, network: &RouteNetwork, track: &VehicleTrack) -> Vec<EtaPrediction> {
        let Some(route_idx) = track.route_idx(network) else {
            return Vec::new();
        };
        let (speed, fallback) = self.speed(network, route_idx, track);
        let valid = track.lifecycle == Lifecycle::Tracking && track.on_route;

        network
            .stops_by_route_idx(route_idx)
            .iter()
            .filter(|stop| stop.distance >= track.progress)
            .map(|stop| {
                let remaining = stop.distance - track.progress;
                let eta_secs = remaining.as_meters() / speed;
                EtaPrediction {
                    vehicle_id: track.vehicle_id.clone(),
                    stop_id: stop.id.clone(),
                    stop_sequence: stop.sequence,
                    remaining,
                    predicted: track.last_update + Duration::from_seconds_f64(eta_secs),
                    band: self.band(eta_secs, remaining, track.confidence, fallback),
                    valid,
                    arriving: eta_secs <= self.config.arriving_threshold.as_seconds_f64(),
                    fallback,
                }
            })
            .collect()
    }

    /// Speed to divide by, and whether it came from the fallback.
    fn speed(&self, network: &RouteNetwork, route_idx: u32, track: &VehicleTrack) -> (f64, bool) {
        if track.speed >= self.config.stationary_speed {
            return (track.speed.max(self.config.min_speed), false);
        }
        let historical = network
            .speeds
            .speed(route_idx, track.last_update.hour_of_day())
            .unwrap_or(self.config.default_speed);
        (historical.max(self.config.min_speed), true)
    }

    fn band(&self, eta_secs: f64, remaining: Distance, confidence: f64, fallback: bool) -> Duration {
        let share = self.config.base_band + self.config.per_km_band * remaining.as_kilometers();
        let uncertainty = 2.0 - confidence.clamp(0.0, 1.0);
        let fallback = if fallback {
            self.config.fallback_band_factor
        } else {
            1.0
        };
        Duration::from_seconds_f64(self.config.min_band + eta_secs * share * uncertainty * fallback)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::TrackConfig,
        fix::Fix,
        matcher::Match,
        network::{NetworkData, RouteData, SpeedRecord, StopData},
        shared::geo::Coordinate,
    };

    fn network(speeds: Vec<SpeedRecord>) -> RouteNetwork {
        let origin = Coordinate::new(59.0, 18.0);
        let stop = |id: &str, east: f64| StopData {
            id: id.into(),
            coordinate: origin.with_offset(east, 0.0),
            distance: Some(Distance::from_meters(east)),
            ..Default::default()
        };
        RouteNetwork::from_data(NetworkData {
            routes: vec![RouteData {
                id: "R".into(),
                stops: vec![stop("A", 0.0), stop("B", 500.0), stop("C", 1200.0)],
                shape: vec![origin, origin.with_offset(1500.0, 0.0)],
                ..Default::default()
            }],
            speeds,
        })
        .unwrap()
    }

    fn track_at(network: &RouteNetwork, progress: f64, speed: Option<f64>) -> VehicleTrack {
        let mut track = VehicleTrack::new("bus".into());
        let mut fix = Fix::new("bus", Timestamp::from_seconds(1000), Coordinate::default());
        fix.speed = speed;
        track.apply_match(network, &fix, &track_match(progress), &TrackConfig::default());
        track
    }

    fn track_match(progress: f64) -> Match {
        Match {
            route_idx: 0,
            segment_idx: 0,
            segment_inner: 0,
            progress: Distance::from_meters(progress),
            distance: Distance::ZERO,
            coordinate: Coordinate::default(),
            score: 0.0,
            confidence: 0.9,
            spatial_confidence: 0.9,
        }
    }

    #[test]
    fn arrival_is_distance_over_speed() {
        let network = network(vec![]);
        let track = track_at(&network, 480.0, Some(12.0));
        let config = EtaConfig::default();
        let etas = EtaEstimator::new(&config).estimate(&network, &track);

        assert_eq!(etas.len(), 2);
        assert_eq!(etas[0].stop_id.as_ref(), "B");
        let expected_b = 1000.0 + 20.0 / 12.0;
        let expected_c = 1000.0 + 720.0 / 12.0;
        assert!((etas[0].predicted.as_millis() as f64 / 1000.0 - expected_b).abs() < 0.002);
        assert!((etas[1].predicted.as_millis() as f64 / 1000.0 - expected_c).abs() < 0.002);
        assert!(etas.iter().all(|eta| eta.valid && !eta.fallback));
        assert!(etas[0].arriving);
        assert!(etas[1].arriving);
    }

    #[test]
    fn band_widens_with_distance() {
        let network = network(vec![]);
        let track = track_at(&network, 0.0, Some(5.0));
        let config = EtaConfig::default();
        let etas = EtaEstimator::new(&config).estimate(&network, &track);
        assert_eq!(etas.len(), 3);
        assert!(etas[0].band <= etas[1].band);
        assert!(etas[1].band < etas[2].band);
        assert!(etas[2].earliest() < etas[2].predicted);
        assert!(etas[2].latest() > etas[2].predicted);
    }

    #[test]
    fn stationary_vehicle_uses_historical_speed() {
        let hour = Timestamp::from_seconds(1000).hour_of_day();
        let network = network(vec![SpeedRecord {
            route_id: "R".into(),
            hour: Some(hour),
            speed_mps: 8.0,
        }]);
        let track = track_at(&network, 400.0, Some(0.0));
        let config = EtaConfig::default();
        let etas = EtaEstimator::new(&config).estimate(&network, &track);
        assert!(etas.iter().all(|eta| eta.fallback));
        let expected = 1000.0 + 100.0 / 8.0;
        assert!((etas[0].predicted.as_millis() as f64 / 1000.0 - expected).abs() < 0.002);
    }

    #[test]
    fn stationary_vehicle_without_history_uses_default_speed() {
        let network = network(vec![]);
        let track = track_at(&network, 400.0, None);
        let config = EtaConfig::default();
        let etas = EtaEstimator::new(&config).estimate(&network, &track);
        let expected = 1000.0 + 100.0 / config.default_speed;
        assert!((etas[0].predicted.as_millis() as f64 / 1000.0 - expected).abs() < 0.002);
    }

    #[test]
    fn stale_predictions_are_invalid() {
        let network = network(vec![]);
        let mut track = track_at(&network, 100.0, Some(10.0));
        track.expire(Timestamp::from_seconds(1200), &TrackConfig::default());
        let config = EtaConfig::default();
        let etas = EtaEstimator::new(&config).estimate(&network, &track);
        assert!(!etas.is_empty());
        assert!(etas.iter().all(|eta| !eta.valid));
    }

    #[test]
    fn unmatched_fix_invalidates_predictions() {
        let network = network(vec![]);
        let mut track = track_at(&network, 100.0, Some(10.0));
        let config = EtaConfig::default();
        let later = Fix::new("bus", Timestamp::from_seconds(1010), Coordinate::default());
        track.apply_unmatched(&later, &TrackConfig::default());

        let etas = EtaEstimator::new(&config).estimate(&network, &track);
        assert_eq!(etas.len(), 2);
        assert!(etas.iter().all(|eta| !eta.valid));

        let again = Fix::new("bus", Timestamp::from_seconds(1020), Coordinate::default());
        track.apply_match(&network, &again, &track_match(200.0), &TrackConfig::default());
        let etas = EtaEstimator::new(&config).estimate(&network, &track);
        assert!(etas.iter().all(|eta| eta.valid));
    }

    #[test]
    fn unmatched_vehicle_has_no_predictions() {
        let network = network(vec![]);
        let track = VehicleTrack::new("bus".into());
        let config = EtaConfig::default();
        assert!(EtaEstimator::new(&config).estimate(&network, &track).is_empty());
    }
}

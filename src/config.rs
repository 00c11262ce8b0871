use serde::{Deserialize, Serialize};

use crate::shared::{geo::Distance, time::Duration};

/// Every tunable of the engine. Distances are metres, durations are
/// milliseconds and speeds are metres per second when deserialized.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub matcher: MatchConfig,
    pub tracking: TrackConfig,
    pub eta: EtaConfig,
    pub index: IndexConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchConfig {
    /// Base radius for candidate segments.
    pub search_radius: Distance,
    /// Upper bound for the accuracy widened radius.
    pub max_search_radius: Distance,
    /// Reported accuracy is multiplied by this before it can widen the radius.
    pub accuracy_factor: f64,
    /// Radius multiplier for the single retry when nothing was found.
    pub expansion_factor: f64,
    /// Number of closest routes whose segments are scored.
    pub max_candidates: usize,
    /// Implied speeds above this are GPS outliers.
    pub outlier_speed: f64,
    /// Position jitter assumed when a fix reports no accuracy.
    pub default_accuracy: Distance,
    pub min_confidence: f64,
    pub distance_weight: f64,
    pub continuity_weight: f64,
    pub heading_weight: f64,
    /// Backward movement along the route that is treated as noise.
    pub backtrack_tolerance: Distance,
    /// Continuity cost of leaving the previously matched route.
    pub route_switch_penalty: f64,
    /// Headings reported below this speed are ignored.
    pub heading_min_speed: f64,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            search_radius: Distance::from_meters(75.0),
            max_search_radius: Distance::from_meters(300.0),
            accuracy_factor: 1.5,
            expansion_factor: 2.0,
            max_candidates: 8,
            outlier_speed: 45.0,
            default_accuracy: Distance::from_meters(15.0),
            min_confidence: 0.3,
            distance_weight: 1.0,
            continuity_weight: 1.0,
            heading_weight: 0.5,
            backtrack_tolerance: Distance::from_meters(30.0),
            route_switch_penalty: 0.5,
            heading_min_speed: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackConfig {
    /// Silence after which a vehicle turns stale.
    pub stale_timeout: Duration,
    /// Silence after which a vehicle is removed.
    pub evict_timeout: Duration,
    /// Weight of the newest sample in the speed moving average.
    pub speed_smoothing: f64,
    /// Confidence multiplier for unmatched and rejected fixes.
    pub confidence_decay: f64,
    /// A backward jump at least this long may restart the route.
    pub reset_distance: Distance,
    /// Match confidence required to accept a route restart.
    pub reset_confidence: f64,
}

impl Default for TrackConfig {
    fn default() -> Self {
        Self {
            stale_timeout: Duration::from_seconds(90),
            evict_timeout: Duration::from_minutes(10),
            speed_smoothing: 0.3,
            confidence_decay: 0.5,
            reset_distance: Distance::from_meters(200.0),
            reset_confidence: 0.7,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EtaConfig {
    /// Lowest speed ever divided by.
    pub min_speed: f64,
    /// Smoothed speeds below this use the historical fallback.
    pub stationary_speed: f64,
    /// Fallback when no historical speed exists for the route.
    pub default_speed: f64,
    /// Smallest band half-width in seconds.
    pub min_band: f64,
    /// Band half-width as a share of the time to arrival.
    pub base_band: f64,
    /// Extra share per kilometre of remaining distance.
    pub per_km_band: f64,
    pub fallback_band_factor: f64,
    pub arriving_threshold: Duration,
}

impl Default for EtaConfig {
    fn default() -> Self {
        Self {
            min_speed: 1.0,
            stationary_speed: 0.5,
            default_speed: 5.5,
            min_band: 5.0,
            base_band: 0.1,
            per_km_band: 0.05,
            fallback_band_factor: 1.5,
            arriving_threshold: Duration::from_minutes(2),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    pub cell_size: Distance,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            cell_size: Distance::from_meters(250.0),
        }
    }
}

#[test]
fn partial_config_keeps_defaults() {
    let config: Config =
        serde_json::from_str(r#"{"matcher": {"outlier_speed": 30.0}, "tracking": {"stale_timeout": 60000}}"#)
            .unwrap();
    assert_eq!(config.matcher.outlier_speed, 30.0);
    assert_eq!(config.matcher.search_radius, Distance::from_meters(75.0));
    assert_eq!(config.tracking.stale_timeout, Duration::from_seconds(60));
    assert_eq!(config.tracking.evict_timeout, Duration::from_minutes(10));
    assert_eq!(config.eta, EtaConfig::default());
}

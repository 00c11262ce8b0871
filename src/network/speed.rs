use serde::{Deserialize, Serialize};

const HOURS: usize = 24;

/// One historical speed observation as supplied by the reference data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeedRecord {
    pub route_id: String,
    /// Hour of day in UTC. `None` means an all-day average.
    pub hour: Option<u8>,
    pub speed_mps: f64,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct RouteSpeeds {
    pub hourly: [Option<f64>; HOURS],
    pub average: Option<f64>,
}

/// Historical average speeds per route and hour of day.
///
/// Indexed by route index so lookups on the estimation path are array reads.
#[derive(Debug, Default, Clone)]
pub struct SpeedProfile {
    routes: Box<[RouteSpeeds]>,
}

impl SpeedProfile {
    pub(crate) fn new(routes: Vec<RouteSpeeds>) -> Self {
        let routes = routes
            .into_iter()
            .map(|mut speeds| {
                if speeds.average.is_none() {
                    let known: Vec<f64> = speeds.hourly.iter().flatten().copied().collect();
                    if !known.is_empty() {
                        speeds.average = Some(known.iter().sum::<f64>() / known.len() as f64);
                    }
                }
                speeds
            })
            .collect();
        Self { routes }
    }

    /// Route and hour first, then the route's all-day average.
    pub fn speed(&self, route_idx: u32, hour: u8) -> Option<f64> {
        let speeds = self.routes.get(route_idx as usize)?;
        speeds
            .hourly
            .get(hour as usize)
            .copied()
            .flatten()
            .or(speeds.average)
    }
}

#[test]
fn speed_lookup_order_test() {
    let mut speeds = RouteSpeeds::default();
    speeds.hourly[8] = Some(4.0);
    speeds.hourly[17] = Some(6.0);
    let profile = SpeedProfile::new(vec![speeds, RouteSpeeds::default()]);

    assert_eq!(profile.speed(0, 8), Some(4.0));
    assert_eq!(profile.speed(0, 3), Some(5.0));
    assert_eq!(profile.speed(1, 8), None);
    assert_eq!(profile.speed(7, 8), None);
}

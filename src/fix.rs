use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::shared::{geo::Coordinate, time::Timestamp};

/// Why a fix was refused before matching.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Invalid {
    #[error("vehicle id is empty")]
    VehicleId,
    #[error("timestamp is outside the supported range")]
    Timestamp,
    #[error("coordinate is outside the valid range")]
    Coordinate,
    #[error("accuracy must be a non-negative number")]
    Accuracy,
    #[error("speed must be a non-negative number")]
    Speed,
    #[error("heading must be a finite number")]
    Heading,
}

/// One raw GPS observation for a vehicle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fix {
    pub vehicle_id: String,
    /// Milliseconds since the unix epoch.
    pub timestamp: Timestamp,
    #[serde(rename = "lat")]
    pub latitude: f64,
    #[serde(rename = "lon")]
    pub longitude: f64,
    /// Accuracy radius in metres.
    #[serde(default, rename = "accuracyMeters")]
    pub accuracy: Option<f64>,
    /// Reported ground speed in metres per second.
    #[serde(default, rename = "speedMps")]
    pub speed: Option<f64>,
    /// Reported compass heading in degrees.
    #[serde(default, rename = "headingDegrees")]
    pub heading: Option<f64>,
}

impl Fix {
    pub fn new(vehicle_id: impl Into<String>, timestamp: Timestamp, coordinate: Coordinate) -> Self {
        Self {
            vehicle_id: vehicle_id.into(),
            timestamp,
            latitude: coordinate.latitude,
            longitude: coordinate.longitude,
            accuracy: None,
            speed: None,
            heading: None,
        }
    }

    pub fn with_accuracy(mut self, meters: f64) -> Self {
        self.accuracy = Some(meters);
        self
    }

    pub fn with_speed(mut self, mps: f64) -> Self {
        self.speed = Some(mps);
        self
    }

    pub fn with_heading(mut self, degrees: f64) -> Self {
        self.heading = Some(degrees);
        self
    }

    pub fn coordinate(&self) -> Coordinate {
        Coordinate::new(self.latitude, self.longitude)
    }

    pub fn validate(&self) -> Result<(), Invalid> {
        if self.vehicle_id.is_empty() {
            return Err(Invalid::VehicleId);
        }
        if !self.timestamp.is_valid() {
            return Err(Invalid::Timestamp);
        }
        if !self.coordinate().is_valid() {
            return Err(Invalid::Coordinate);
        }
        if self.accuracy.is_some_and(|value| !value.is_finite() || value < 0.0) {
            return Err(Invalid::Accuracy);
        }
        if self.speed.is_some_and(|value| !value.is_finite() || value < 0.0) {
            return Err(Invalid::Speed);
        }
        if self.heading.is_some_and(|value| !value.is_finite()) {
            return Err(Invalid::Heading);
        }
        Ok(())
    }
}

#[test]
fn fix_deserializes_from_wire_names() {
    let fix: Fix = serde_json::from_str(
        r#"{"vehicleId":"bus-7","timestamp":1700000000000,"lat":59.3,"lon":18.1,"accuracyMeters":12.0,"headingDegrees":90.0}"#,
    )
    .unwrap();
    assert_eq!(fix.vehicle_id, "bus-7");
    assert_eq!(fix.timestamp, Timestamp::from_millis(1_700_000_000_000));
    assert_eq!(fix.accuracy, Some(12.0));
    assert_eq!(fix.speed, None);
    assert_eq!(fix.heading, Some(90.0));
}

#[test]
fn fix_validation() {
    let fix = Fix::new("bus", Timestamp::from_seconds(1), Coordinate::new(59.0, 18.0));
    assert_eq!(fix.validate(), Ok(()));
    assert_eq!(
        fix.clone().with_speed(-1.0).validate(),
        Err(Invalid::Speed)
    );
    assert_eq!(
        fix.clone().with_accuracy(f64::NAN).validate(),
        Err(Invalid::Accuracy)
    );
    let mut far = fix.clone();
    far.latitude = 91.0;
    assert_eq!(far.validate(), Err(Invalid::Coordinate));
    let mut late = fix.clone();
    late.timestamp = Timestamp::from_millis(i64::MAX - 1);
    assert_eq!(late.validate(), Err(Invalid::Timestamp));
    let mut anonymous = fix;
    anonymous.vehicle_id.clear();
    assert_eq!(anonymous.validate(), Err(Invalid::VehicleId));
}

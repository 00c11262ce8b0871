use std::{
    cmp,
    fmt::Display,
    ops::{Add, AddAssign, Sub},
};

use serde::{Deserialize, Serialize};

pub(crate) const EARTH_RADIUS: Distance = Distance::from_kilometers(6371.0);
pub(crate) const LONGITUDE_DISTANCE: Distance = Distance::from_meters(111_320.0);
pub(crate) const LATITUDE_DISTANCE: Distance = Distance::from_meters(110_540.0);

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Distance(f64);

impl PartialEq for Distance {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl PartialOrd for Distance {
    fn partial_cmp(&self, other: &Self) -> Option<cmp::Ordering> {
        self.0.partial_cmp(&other.0)
    }
}

impl Add for Distance {
    type Output = Self;
    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl AddAssign for Distance {
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0
    }
}

impl Sub for Distance {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Self(self.0 - rhs.0)
    }
}

impl From<f64> for Distance {
    fn from(value: f64) -> Self {
        Self::from_meters(value)
    }
}

impl Distance {
    pub const ZERO: Distance = Distance(0.0);

    pub const fn from_meters(distance: f64) -> Self {
        Self(distance)
    }

    pub const fn from_kilometers(distance: f64) -> Self {
        Self(distance * 1000.0)
    }

    pub const fn as_meters(&self) -> f64 {
        self.0
    }

    pub const fn as_kilometers(&self) -> f64 {
        self.0 / 1000.0
    }

    pub fn max(self, other: Self) -> Self {
        Self(self.0.max(other.0))
    }

    pub fn min(self, other: Self) -> Self {
        Self(self.0.min(other.0))
    }

    pub fn abs(self) -> Self {
        Self(self.0.abs())
    }

    pub fn scale(self, factor: f64) -> Self {
        Self(self.0 * factor)
    }

    /// Compares two distances, treating NaN as equal so it can be used for sorting.
    pub fn total_cmp(&self, other: &Self) -> cmp::Ordering {
        self.0.total_cmp(&other.0)
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl Display for Coordinate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!("{}, {}", self.latitude, self.longitude))
    }
}

impl Coordinate {
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Checks that both axes are finite and inside the WGS84 range.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }

    /// Great circle distance using the haversine formula.
    pub fn distance(&self, coord: &Self) -> Distance {
        let dist_lat = f64::to_radians(coord.latitude - self.latitude);
        let dist_lon = f64::to_radians(coord.longitude - self.longitude);
        let a = f64::powi(f64::sin(dist_lat / 2.0), 2)
            + f64::cos(f64::to_radians(self.latitude))
                * f64::cos(f64::to_radians(coord.latitude))
                * f64::sin(dist_lon / 2.0)
                * f64::sin(dist_lon / 2.0);
        let c = 2.0 * f64::atan2(f64::sqrt(a), f64::sqrt(1.0 - a));
        Distance::from_meters(EARTH_RADIUS.as_meters() * c)
    }

    /// Initial compass bearing towards `coord` in degrees, `[0, 360)`.
    pub fn bearing(&self, coord: &Self) -> f64 {
        let lat_a = self.latitude.to_radians();
        let lat_b = coord.latitude.to_radians();
        let dist_lon = (coord.longitude - self.longitude).to_radians();
        let y = dist_lon.sin() * lat_b.cos();
        let x = lat_a.cos() * lat_b.sin() - lat_a.sin() * lat_b.cos() * dist_lon.cos();
        y.atan2(x).to_degrees().rem_euclid(360.0)
    }

    /// Offset of this coordinate from `origin` in metres on a local
    /// equirectangular plane, returned as `(east, north)`.
    pub fn offset_from(&self, origin: &Self) -> (f64, f64) {
        let r = EARTH_RADIUS.as_meters();
        let east = (self.longitude - origin.longitude).to_radians()
            * r
            * origin.latitude.to_radians().cos();
        let north = (self.latitude - origin.latitude).to_radians() * r;
        (east, north)
    }

    /// Inverse of [`Coordinate::offset_from`].
    pub fn with_offset(&self, east: f64, north: f64) -> Self {
        let r = EARTH_RADIUS.as_meters();
        let latitude = self.latitude + (north / r).to_degrees();
        let longitude =
            self.longitude + (east / (r * self.latitude.to_radians().cos())).to_degrees();
        Self {
            latitude,
            longitude,
        }
    }

    pub fn to_grid(&self, cell_size: Distance) -> (i32, i32) {
        let x = (self.longitude * LONGITUDE_DISTANCE.as_meters() / cell_size.as_meters()).floor()
            as i32;
        let y =
            (self.latitude * LATITUDE_DISTANCE.as_meters() / cell_size.as_meters()).floor() as i32;
        (x, y)
    }
}

/// Smallest absolute difference between two compass headings, `[0, 180]`.
pub fn heading_difference(a: f64, b: f64) -> f64 {
    let diff = (a - b).rem_euclid(360.0);
    if diff > 180.0 { 360.0 - diff } else { diff }
}

#[test]
fn distance_test() {
    let coord_a = Coordinate::new(48.85800943005911, 2.3514350059357927);
    let coord_b = Coordinate::new(51.5052389927712, -0.12495407345099824);
    let d = coord_a.distance(&coord_b);
    assert!((d.as_kilometers() - 343.5).abs() < 2.0);
}

#[test]
fn distance_eq_test() {
    let dist_a = Distance::from_meters(1000.0);
    let dist_b = Distance::from_kilometers(1.0);
    assert_eq!(dist_a, dist_b)
}

#[test]
fn distance_cmp_test() {
    let dist_a = Distance::from_meters(1000.0);
    let dist_b = Distance::from_kilometers(0.5);
    assert!(dist_a > dist_b)
}

#[test]
fn offset_round_trip_test() {
    let origin = Coordinate::new(59.33, 18.06);
    let moved = origin.with_offset(120.0, -340.0);
    let (east, north) = moved.offset_from(&origin);
    assert!((east - 120.0).abs() < 0.01);
    assert!((north + 340.0).abs() < 0.01);
}

#[test]
fn bearing_test() {
    let origin = Coordinate::new(0.0, 0.0);
    assert!((origin.bearing(&Coordinate::new(1.0, 0.0)) - 0.0).abs() < 1e-6);
    assert!((origin.bearing(&Coordinate::new(0.0, 1.0)) - 90.0).abs() < 1e-6);
    assert!((origin.bearing(&Coordinate::new(-1.0, 0.0)) - 180.0).abs() < 1e-6);
}

#[test]
fn heading_difference_test() {
    assert_eq!(heading_difference(10.0, 350.0), 20.0);
    assert_eq!(heading_difference(90.0, 270.0), 180.0);
    assert_eq!(heading_difference(45.0, 45.0), 0.0);
}

//! Live vehicle tracking on a transit route network.
//!
//! GPS fixes are matched onto route segments, turned into per-vehicle
//! progress and speed, and used to predict arrivals at the stops ahead.
//! [`service::TrackingService`] ties the pieces together.

pub mod config;
pub mod eta;
pub mod feed;
pub mod fix;
pub mod matcher;
pub mod network;
pub mod service;
pub mod shared;
pub mod spatial;
pub mod tracking;

pub mod prelude {
    pub use crate::config::{Config, EtaConfig, IndexConfig, MatchConfig, TrackConfig};
    pub use crate::eta::{EtaEstimator, EtaPrediction};
    pub use crate::feed::FeedReader;
    pub use crate::fix::Fix;
    pub use crate::matcher::{MapMatcher, Match, MatchOutcome, Prior};
    pub use crate::network::{
        NetworkData, Route, RouteData, RouteNetwork, Segment, SpeedProfile, SpeedRecord, Stop,
        StopData,
    };
    pub use crate::service::{
        Anomalies, FixOutcome, RecordKind, Sink, Snapshot, TrackingRecord, TrackingService,
    };
    pub use crate::shared::geo::{Coordinate, Distance};
    pub use crate::shared::time::{Duration, Timestamp};
    pub use crate::spatial::SpatialIndex;
    pub use crate::tracking::{Lifecycle, VehicleTrack};
}

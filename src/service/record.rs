use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::{
    eta::EtaPrediction,
    shared::{geo::Coordinate, time::Timestamp},
    tracking::{Applied, Lifecycle},
};

/// Why a record was published.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Matched,
    /// Matched, and the vehicle started its route over.
    Reset,
    Unmatched,
    OutlierRejected,
    Stale,
    Evicted,
}

impl From<Applied> for RecordKind {
    fn from(value: Applied) -> Self {
        match value {
            Applied::Matched => Self::Matched,
            Applied::Reset => Self::Reset,
            Applied::Unmatched => Self::Unmatched,
            Applied::OutlierRejected => Self::OutlierRejected,
        }
    }
}

/// Result published for each processed fix and each lifecycle transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackingRecord {
    pub vehicle_id: Arc<str>,
    /// Fix time, or sweep time for lifecycle transitions.
    pub timestamp: Timestamp,
    pub kind: RecordKind,
    pub lifecycle: Lifecycle,
    /// Last accepted raw position.
    pub coordinate: Coordinate,
    pub matched_coordinate: Option<Coordinate>,
    #[serde(rename = "matchedRouteId")]
    pub route_id: Option<Arc<str>>,
    pub segment_index: Option<u32>,
    pub progress_meters: f64,
    pub speed_mps: f64,
    /// Between 0 and 1.
    pub confidence: f64,
    pub etas: Vec<EtaPrediction>,
}

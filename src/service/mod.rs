//! Orchestrates matching, tracking and arrival estimation for a fleet.
//!
//! Every vehicle owns its own [`VehicleTrack`] behind a mutex, so fixes for
//! different vehicles are processed in parallel while fixes for the same
//! vehicle are applied one at a time. The route network is held as an
//! immutable [`Snapshot`] that can be replaced while the service runs.

mod record;
mod sink;
mod snapshot;

pub use record::*;
pub use sink::*;
pub use snapshot::*;

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex, MutexGuard, RwLock,
        atomic::{AtomicU64, Ordering},
    },
};

use rayon::prelude::*;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{
    config::Config,
    eta::{EtaEstimator, EtaPrediction},
    fix::{self, Fix},
    matcher::{MapMatcher, MatchOutcome},
    network::{self, NetworkData, RouteNetwork},
    shared::time::Timestamp,
    tracking::{Applied, Lifecycle, VehicleTrack},
};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("Fix for {vehicle} at {timestamp} is older than its last fix at {last_seen}")]
    OutOfOrderFix {
        vehicle: Arc<str>,
        timestamp: Timestamp,
        last_seen: Timestamp,
    },
    #[error("Fix for {vehicle} is invalid: {reason}")]
    InvalidFix {
        vehicle: Arc<str>,
        reason: fix::Invalid,
    },
    #[error("Vehicle {0} is not tracked")]
    UnknownVehicleOnEvict(Arc<str>),
}

/// What happened to an ingested fix.
#[derive(Debug, Clone, PartialEq)]
pub struct FixOutcome {
    pub applied: Applied,
    pub record: TrackingRecord,
}

impl FixOutcome {
    pub fn is_matched(&self) -> bool {
        matches!(self.applied, Applied::Matched | Applied::Reset)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Anomalies {
    pub out_of_order: u64,
    pub invalid: u64,
    pub outliers: u64,
    pub unmatched: u64,
    pub unknown_evictions: u64,
}

#[derive(Debug, Default)]
struct AnomalyCounters {
    out_of_order: AtomicU64,
    invalid: AtomicU64,
    outliers: AtomicU64,
    unmatched: AtomicU64,
    unknown_evictions: AtomicU64,
}

impl AnomalyCounters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn read(&self) -> Anomalies {
        Anomalies {
            out_of_order: self.out_of_order.load(Ordering::Relaxed),
            invalid: self.invalid.load(Ordering::Relaxed),
            outliers: self.outliers.load(Ordering::Relaxed),
            unmatched: self.unmatched.load(Ordering::Relaxed),
            unknown_evictions: self.unknown_evictions.load(Ordering::Relaxed),
        }
    }
}

type Entry = Arc<Mutex<VehicleTrack>>;

pub struct TrackingService {
    config: Config,
    snapshot: RwLock<Arc<Snapshot>>,
    vehicles: RwLock<HashMap<Arc<str>, Entry>>,
    sinks: Vec<Arc<dyn Sink>>,
    anomalies: AnomalyCounters,
}

impl TrackingService {
    pub fn new(config: Config, data: NetworkData) -> Result<Self, network::Error> {
        let snapshot = Snapshot::build(data, &config.index)?;
        Ok(Self::from_snapshot(config, snapshot))
    }

    pub fn with_network(config: Config, network: RouteNetwork) -> Self {
        let snapshot = Snapshot::from_network(network, &config.index);
        Self::from_snapshot(config, snapshot)
    }

    fn from_snapshot(config: Config, snapshot: Snapshot) -> Self {
        info!(
            "Tracking on {} routes, {} segments",
            snapshot.network.routes.len(),
            snapshot.network.segment_count()
        );
        Self {
            config,
            snapshot: RwLock::new(Arc::new(snapshot)),
            vehicles: RwLock::default(),
            sinks: Vec::new(),
            anomalies: AnomalyCounters::default(),
        }
    }

    /// Registers a sink that receives every published record.
    pub fn with_sink(mut self, sink: Arc<dyn Sink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The network currently used for matching.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.snapshot
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn ingest(&self, fix: &Fix) -> Result<FixOutcome, Error> {
        let vehicle: Arc<str> = fix.vehicle_id.as_str().into();
        if let Err(reason) = fix.validate() {
            AnomalyCounters::bump(&self.anomalies.invalid);
            warn!("Dropping fix for {vehicle}: {reason}");
            return Err(Error::InvalidFix { vehicle, reason });
        }

        let snapshot = self.snapshot();
        loop {
            let entry = self.entry(&vehicle);
            let mut track = lock(&entry);
            if track.evicted {
                // Removed by a sweep between the lookup and the lock.
                continue;
            }
            if track.lifecycle != Lifecycle::Unseen && fix.timestamp < track.last_seen {
                AnomalyCounters::bump(&self.anomalies.out_of_order);
                warn!(
                    "Out of order fix for {vehicle}: {} is before {}",
                    fix.timestamp, track.last_seen
                );
                return Err(Error::OutOfOrderFix {
                    vehicle,
                    timestamp: fix.timestamp,
                    last_seen: track.last_seen,
                });
            }

            let applied = self.apply(&snapshot, &mut track, fix);
            let record = self.record(&snapshot, &track, applied.into(), fix.timestamp);
            drop(track);

            self.publish(&record);
            return Ok(FixOutcome { applied, record });
        }
    }

    /// Ingests fixes for many vehicles at once.
    ///
    /// Fixes are grouped by vehicle and keep their relative order within a
    /// group; groups run in parallel. Results are returned per group in the
    /// order each vehicle first appears.
    pub fn ingest_batch(&self, fixes: Vec<Fix>) -> Vec<Result<FixOutcome, Error>> {
        let mut order: HashMap<String, usize> = HashMap::new();
        let mut groups: Vec<Vec<Fix>> = Vec::new();
        for fix in fixes {
            let slot = *order.entry(fix.vehicle_id.clone()).or_insert_with(|| {
                groups.push(Vec::new());
                groups.len() - 1
            });
            groups[slot].push(fix);
        }

        groups
            .into_par_iter()
            .flat_map_iter(|group| {
                group
                    .into_iter()
                    .map(|fix| self.ingest(&fix))
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    /// Moves quiet vehicles to STALE, and removes those past the evict
    /// timeout. Returns a record per transition.
    pub fn sweep(&self, now: Timestamp) -> Vec<TrackingRecord> {
        let snapshot = self.snapshot();
        let entries: Vec<(Arc<str>, Entry)> = self
            .vehicles
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .map(|(id, entry)| (id.clone(), entry.clone()))
            .collect();

        let records: Vec<TrackingRecord> = entries
            .par_iter()
            .filter_map(|(id, entry)| {
                let mut track = lock(entry);
                if track.evicted {
                    return None;
                }
                let lifecycle = track.expire(now, &self.config.tracking)?;
                let kind = match lifecycle {
                    Lifecycle::Stale => {
                        info!("Vehicle {id} went stale");
                        RecordKind::Stale
                    }
                    Lifecycle::Evicted => {
                        info!("Evicting vehicle {id}");
                        track.evicted = true;
                        self.unregister(id, entry);
                        RecordKind::Evicted
                    }
                    _ => return None,
                };
                Some(self.record(&snapshot, &track, kind, now))
            })
            .collect();

        records.iter().for_each(|record| self.publish(record));
        records
    }

    /// Removes a vehicle right away.
    pub fn evict(&self, vehicle_id: &str) -> Result<TrackingRecord, Error> {
        let unknown = || {
            AnomalyCounters::bump(&self.anomalies.unknown_evictions);
            debug!("Ignoring eviction of unknown vehicle {vehicle_id}");
            Error::UnknownVehicleOnEvict(vehicle_id.into())
        };
        let entry = self.lookup(vehicle_id).ok_or_else(unknown)?;

        let mut track = lock(&entry);
        if track.evicted {
            return Err(unknown());
        }
        track.evicted = true;
        track.lifecycle = Lifecycle::Evicted;
        track.confidence = 0.0;
        self.unregister(&track.vehicle_id, &entry);
        info!("Evicted vehicle {vehicle_id}");

        let record = self.record(&self.snapshot(), &track, RecordKind::Evicted, track.last_seen);
        drop(track);
        self.publish(&record);
        Ok(record)
    }

    /// Replaces the route network. On failure the current one stays.
    pub fn reload(&self, data: NetworkData) -> Result<(), network::Error> {
        match Snapshot::build(data, &self.config.index) {
            Ok(snapshot) => {
                let routes = snapshot.network.routes.len();
                *self
                    .snapshot
                    .write()
                    .unwrap_or_else(|poisoned| poisoned.into_inner()) = Arc::new(snapshot);
                info!("Swapped route network, now {routes} routes");
                Ok(())
            }
            Err(err) => {
                error!("Reload failed, keeping current route network: {err}");
                Err(err)
            }
        }
    }

    pub fn vehicle(&self, vehicle_id: &str) -> Option<VehicleTrack> {
        let entry = self.lookup(vehicle_id)?;
        let track = lock(&entry);
        (!track.evicted).then(|| track.clone())
    }

    pub fn vehicles(&self) -> Vec<VehicleTrack> {
        let entries: Vec<Entry> = self
            .vehicles
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .values()
            .cloned()
            .collect();
        let mut tracks: Vec<VehicleTrack> = entries
            .iter()
            .map(|entry| lock(entry).clone())
            .filter(|track| !track.evicted)
            .collect();
        tracks.sort_by(|a, b| a.vehicle_id.cmp(&b.vehicle_id));
        tracks
    }

    /// Current predictions for a vehicle's upcoming stops.
    pub fn etas(&self, vehicle_id: &str) -> Option<Vec<EtaPrediction>> {
        let entry = self.lookup(vehicle_id)?;
        let track = lock(&entry);
        if track.evicted {
            return None;
        }
        let snapshot = self.snapshot();
        Some(EtaEstimator::new(&self.config.eta).estimate(&snapshot.network, &track))
    }

    pub fn anomalies(&self) -> Anomalies {
        self.anomalies.read()
    }

    pub fn len(&self) -> usize {
        self.vehicles
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn apply(&self, snapshot: &Snapshot, track: &mut VehicleTrack, fix: &Fix) -> Applied {
        let prior = track.prior(&snapshot.network);
        let matcher = MapMatcher::new(&snapshot.network, &snapshot.index, &self.config.matcher);
        let config = &self.config.tracking;
        match matcher.match_fix(fix, &prior) {
            MatchOutcome::Matched(matched) => {
                track.apply_match(&snapshot.network, fix, &matched, config)
            }
            MatchOutcome::Unmatched { best_confidence } => {
                AnomalyCounters::bump(&self.anomalies.unmatched);
                debug!(
                    "No match for {} (best confidence {best_confidence:?})",
                    track.vehicle_id
                );
                track.apply_unmatched(fix, config)
            }
            MatchOutcome::Outlier { implied_speed } => {
                AnomalyCounters::bump(&self.anomalies.outliers);
                warn!(
                    "Rejected fix for {}: implies {implied_speed:.1} m/s",
                    track.vehicle_id
                );
                track.apply_outlier(fix, config)
            }
        }
    }

    fn record(
        &self,
        snapshot: &Snapshot,
        track: &VehicleTrack,
        kind: RecordKind,
        timestamp: Timestamp,
    ) -> TrackingRecord {
        let etas = match kind {
            RecordKind::Evicted => Vec::new(),
            _ => EtaEstimator::new(&self.config.eta).estimate(&snapshot.network, track),
        };
        TrackingRecord {
            vehicle_id: track.vehicle_id.clone(),
            timestamp,
            kind,
            lifecycle: track.lifecycle,
            coordinate: track.coordinate,
            matched_coordinate: track.matched_coordinate,
            route_id: track.route_id.clone(),
            segment_index: track.segment_idx,
            progress_meters: track.progress.as_meters(),
            speed_mps: track.speed,
            confidence: track.confidence,
            etas,
        }
    }

    fn publish(&self, record: &TrackingRecord) {
        for sink in &self.sinks {
            sink.publish(record);
        }
    }

    fn lookup(&self, vehicle_id: &str) -> Option<Entry> {
        self.vehicles
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(vehicle_id)
            .cloned()
    }

    fn entry(&self, vehicle_id: &Arc<str>) -> Entry {
        if let Some(entry) = self.lookup(vehicle_id) {
            return entry;
        }
        self.vehicles
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .entry(vehicle_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(VehicleTrack::new(vehicle_id.clone()))))
            .clone()
    }

    /// Removes `entry` from the registry unless it was already replaced.
    fn unregister(&self, vehicle_id: &str, entry: &Entry) {
        let mut vehicles = self
            .vehicles
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if vehicles
            .get(vehicle_id)
            .is_some_and(|current| Arc::ptr_eq(current, entry))
        {
            vehicles.remove(vehicle_id);
        }
    }
}

fn lock(entry: &Entry) -> MutexGuard<'_, VehicleTrack> {
    entry.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

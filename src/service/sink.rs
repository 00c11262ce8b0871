use std::sync::{Mutex, mpsc};

use crate::service::TrackingRecord;

/// Receives every record the service publishes.
///
/// Implementations are called on the ingesting thread while no tracker
/// lock is held, and must not block for long.
pub trait Sink: Send + Sync {
    fn publish(&self, record: &TrackingRecord);
}

impl Sink for mpsc::Sender<TrackingRecord> {
    fn publish(&self, record: &TrackingRecord) {
        // A dropped receiver only means nobody is listening anymore.
        let _ = self.send(record.clone());
    }
}

impl Sink for Mutex<Vec<TrackingRecord>> {
    fn publish(&self, record: &TrackingRecord) {
        let mut records = self.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        records.push(record.clone());
    }
}

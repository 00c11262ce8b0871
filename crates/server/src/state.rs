use crossbeam_queue::ArrayQueue;
use headway::{network, prelude::*};
use std::{path::PathBuf, sync::Arc};
use tokio::sync::RwLock;

const RECORD_CAPACITY: usize = 4096;

/// Bounded buffer of published records. The oldest record is dropped when full.
pub struct RecordQueue(ArrayQueue<TrackingRecord>);

impl RecordQueue {
    pub fn new(capacity: usize) -> Self {
        Self(ArrayQueue::new(capacity))
    }

    pub fn drain(&self) -> Vec<TrackingRecord> {
        std::iter::from_fn(|| self.0.pop()).collect()
    }
}

impl Sink for RecordQueue {
    fn publish(&self, record: &TrackingRecord) {
        self.0.force_push(record.clone());
    }
}

pub struct AppState {
    pub feed_path: RwLock<PathBuf>,
    pub service: TrackingService,
    pub records: Arc<RecordQueue>,
}

impl AppState {
    pub fn new(feed_path: PathBuf, config: Config, data: NetworkData) -> Result<Self, network::Error> {
        let records = Arc::new(RecordQueue::new(RECORD_CAPACITY));
        let service = TrackingService::new(config, data)?.with_sink(records.clone());
        Ok(Self {
            feed_path: RwLock::new(feed_path),
            service,
            records,
        })
    }
}

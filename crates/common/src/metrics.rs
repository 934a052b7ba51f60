use std::path::Path;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tracing::info;

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct FlushRecord {
    pub flush_id: u64,
    pub timestamp_ms: u64,
    pub snapshot_count: usize,
    pub subscribers: usize,
    pub delivered: usize,
    pub dropped: usize,
    pub flush_ns: u64,
}

/// Per-flush statistics. Cloning shares the underlying list.
#[derive(Clone, Default)]
pub struct FlushRecorder {
    records: Arc<Mutex<Vec<FlushRecord>>>,
}

impl FlushRecorder {
    pub fn new() -> Self {
        Self {
            records: Arc::new(Mutex::new(Vec::with_capacity(1_024))),
        }
    }

    pub fn record(&self, record: FlushRecord) {
        self.records
            .lock()
            .expect("flush recorder lock poisoned")
            .push(record);
    }

    pub fn get_results(&self) -> Vec<FlushRecord> {
        self.records.lock().expect("flush recorder lock poisoned").clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().expect("flush recorder lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn save_to_csv(&self, path: impl AsRef<Path>) -> Result<(), csv::Error> {
        let records = self.get_results();
        let mut wtr = csv::Writer::from_path(path.as_ref())?;
        for record in &records {
            wtr.serialize(record)?;
        }
        wtr.flush()?;
        info!(count = records.len(), path = %path.as_ref().display(), "saved flush records");
        Ok(())
    }
}

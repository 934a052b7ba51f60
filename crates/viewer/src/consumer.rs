use common::{RetentionWindow, SensorBatch, SensorId};
use tracing::debug;

use crate::history::{HistoryStore, SensorHistory};

/// Per-subscriber rolling history of the selected sensors.
///
/// Histories are change-driven: a reading equal to the sensor's last
/// retained value is not stored. Every history is re-filtered against the
/// active retention window after each batch and on window changes.
#[derive(Debug)]
pub struct StreamConsumer {
    selected: Vec<SensorId>,
    retention: RetentionWindow,
    histories: HistoryStore,
    dirty: bool,
}

impl StreamConsumer {
    pub fn new(selected: Vec<SensorId>, retention: RetentionWindow) -> Self {
        Self {
            selected: dedup(selected),
            retention,
            histories: HistoryStore::default(),
            dirty: false,
        }
    }

    pub fn selected(&self) -> &[SensorId] {
        &self.selected
    }

    pub fn retention(&self) -> RetentionWindow {
        self.retention
    }

    pub fn histories(&self) -> &HistoryStore {
        &self.histories
    }

    pub fn history(&self, sensor: &str) -> Option<&SensorHistory> {
        self.histories.get(sensor)
    }

    /// True when changes are waiting for a reconciliation.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn take_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }

    /// Folds a batch into the selected histories. Returns whether any
    /// retained trace changed.
    pub fn ingest(&mut self, batch: &SensorBatch, now_ms: u64) -> bool {
        let mut appended = 0usize;
        for snapshot in batch.snapshots() {
            for sensor in &self.selected {
                let Some(value) = snapshot.reading(sensor) else {
                    continue;
                };
                if self.histories.record(sensor, snapshot.timestamp, value) {
                    appended += 1;
                }
            }
        }
        let trimmed = self.trim(now_ms);
        debug!(snapshots = batch.len(), appended, trimmed, "ingested batch");

        let changed = appended > 0 || trimmed > 0;
        self.dirty |= changed;
        changed
    }

    /// Replaces the selection. Histories of deselected sensors are
    /// discarded. Returns whether the selection changed.
    pub fn set_selection(&mut self, sensors: Vec<SensorId>) -> bool {
        let sensors = dedup(sensors);
        if sensors == self.selected {
            return false;
        }
        self.histories.retain_sensors(&sensors);
        self.selected = sensors;
        self.dirty = true;
        true
    }

    /// Switches the window and re-filters immediately. Data already trimmed
    /// is not recovered when the window widens.
    pub fn set_retention(&mut self, window: RetentionWindow, now_ms: u64) -> bool {
        let changed = window != self.retention;
        self.retention = window;
        let trimmed = self.trim(now_ms);
        self.dirty |= changed || trimmed > 0;
        changed || trimmed > 0
    }

    pub fn clear(&mut self) {
        if !self.histories.is_empty() {
            self.dirty = true;
        }
        self.histories.clear();
    }

    fn trim(&mut self, now_ms: u64) -> usize {
        self.histories.trim_before(self.retention.cutoff(now_ms))
    }
}

fn dedup(sensors: Vec<SensorId>) -> Vec<SensorId> {
    let mut unique: Vec<SensorId> = Vec::with_capacity(sensors.len());
    for sensor in sensors {
        if !unique.contains(&sensor) {
            unique.push(sensor);
        }
    }
    unique
}

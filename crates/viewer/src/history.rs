use std::collections::btree_map;
use std::collections::BTreeMap;

use common::SensorId;

/// One retained `(timestamp, value)` pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub timestamp: u64,
    pub value: f64,
}

impl Sample {
    pub fn new(timestamp: u64, value: f64) -> Self {
        Self { timestamp, value }
    }

    pub fn as_point(&self) -> [f64; 2] {
        [self.timestamp as f64, self.value]
    }
}

/// Change-driven trace for one sensor, strictly ascending by timestamp.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SensorHistory {
    samples: Vec<Sample>,
}

impl SensorHistory {
    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn last(&self) -> Option<&Sample> {
        self.samples.last()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Appends only when the value differs from the last retained one.
    /// Readings not newer than the last entry (redelivered or reordered)
    /// are ignored. Returns whether the trace grew.
    pub fn record(&mut self, timestamp: u64, value: f64) -> bool {
        match self.samples.last() {
            Some(last) if timestamp <= last.timestamp => false,
            Some(last) if last.value == value => false,
            _ => {
                self.samples.push(Sample::new(timestamp, value));
                true
            }
        }
    }

    /// Drops every sample older than `cutoff`. Returns how many were removed.
    pub fn trim_before(&mut self, cutoff: u64) -> usize {
        let stale = self.samples.partition_point(|s| s.timestamp < cutoff);
        self.samples.drain(..stale);
        stale
    }
}

#[derive(Debug, Clone, Default)]
pub struct HistoryStore {
    histories: BTreeMap<SensorId, SensorHistory>,
}

impl HistoryStore {
    pub fn get(&self, sensor: &str) -> Option<&SensorHistory> {
        self.histories.get(sensor)
    }

    pub fn samples(&self, sensor: &str) -> &[Sample] {
        self.histories.get(sensor).map(|h| h.samples()).unwrap_or(&[])
    }

    pub fn record(&mut self, sensor: &SensorId, timestamp: u64, value: f64) -> bool {
        match self.histories.get_mut(sensor) {
            Some(history) => history.record(timestamp, value),
            None => self
                .histories
                .entry(sensor.clone())
                .or_default()
                .record(timestamp, value),
        }
    }

    pub fn trim_before(&mut self, cutoff: u64) -> usize {
        self.histories.values_mut().map(|h| h.trim_before(cutoff)).sum()
    }

    pub fn retain_sensors(&mut self, keep: &[SensorId]) {
        self.histories.retain(|id, _| keep.contains(id));
    }

    pub fn clear(&mut self) {
        self.histories.clear();
    }

    pub fn len(&self) -> usize {
        self.histories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.histories.is_empty()
    }

    pub fn iter(&self) -> btree_map::Iter<'_, SensorId, SensorHistory> {
        self.histories.iter()
    }
}

use std::collections::VecDeque;
use std::mem;
use std::sync::{Arc, Mutex};

use crate::config::TelemetryConfig;
use crate::SensorSnapshot;

/// Pending snapshots between flush ticks.
///
/// `drain_and_reset` is the only operation that removes data. It takes the
/// whole pending sequence and leaves the buffer empty under one lock, so a
/// concurrent `append` lands either in this drain or in the next one.
pub trait SnapshotBuffer: Send + Sync {
    /// Adds a snapshot. Returns the snapshot evicted by the overflow policy, if any.
    fn append(&self, snapshot: SensorSnapshot) -> Option<SensorSnapshot>;
    fn drain_and_reset(&self) -> Vec<SensorSnapshot>;
    fn pending(&self) -> usize;
}

/// Unbounded buffer: mutex-guarded swap with an empty `Vec`.
#[derive(Clone, Default)]
pub struct MutexBuffer {
    pending: Arc<Mutex<Vec<SensorSnapshot>>>,
}

impl MutexBuffer {
    pub fn new() -> Self {
        Self {
            pending: Arc::new(Mutex::new(Vec::with_capacity(16))),
        }
    }
}

impl SnapshotBuffer for MutexBuffer {
    fn append(&self, snapshot: SensorSnapshot) -> Option<SensorSnapshot> {
        self.pending
            .lock()
            .expect("snapshot buffer lock poisoned")
            .push(snapshot);
        None
    }

    fn drain_and_reset(&self) -> Vec<SensorSnapshot> {
        let mut pending = self.pending.lock().expect("snapshot buffer lock poisoned");
        let capacity = pending.capacity();
        mem::replace(&mut *pending, Vec::with_capacity(capacity))
    }

    fn pending(&self) -> usize {
        self.pending.lock().expect("snapshot buffer lock poisoned").len()
    }
}

/// Bounded buffer with a drop-oldest overflow policy.
#[derive(Clone)]
pub struct BoundedBuffer {
    pending: Arc<Mutex<VecDeque<SensorSnapshot>>>,
    capacity: usize,
}

impl BoundedBuffer {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "bounded buffer needs a non-zero capacity");
        Self {
            pending: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity,
        }
    }
}

impl SnapshotBuffer for BoundedBuffer {
    fn append(&self, snapshot: SensorSnapshot) -> Option<SensorSnapshot> {
        let mut pending = self.pending.lock().expect("snapshot buffer lock poisoned");
        let evicted = if pending.len() == self.capacity {
            pending.pop_front()
        } else {
            None
        };
        pending.push_back(snapshot);
        evicted
    }

    fn drain_and_reset(&self) -> Vec<SensorSnapshot> {
        let mut pending = self.pending.lock().expect("snapshot buffer lock poisoned");
        pending.drain(..).collect()
    }

    fn pending(&self) -> usize {
        self.pending.lock().expect("snapshot buffer lock poisoned").len()
    }
}

pub fn buffer_from_config(config: &TelemetryConfig) -> Arc<dyn SnapshotBuffer> {
    match config.buffer_capacity {
        Some(capacity) => Arc::new(BoundedBuffer::new(capacity)),
        None => Arc::new(MutexBuffer::new()),
    }
}

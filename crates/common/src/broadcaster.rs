use std::sync::{Arc, Mutex};
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::buffer::SnapshotBuffer;
use crate::diagnostics::PipelineDiagnostics;
use crate::error::DeliveryError;
use crate::metrics::{FlushRecord, FlushRecorder};
use crate::{SensorBatch, SensorSnapshot};

pub type ConnectionId = u64;

/// Per-connection outbound channel. Must not block: a slow subscriber
/// reports `Full` and is disconnected instead of stalling the flush loop.
pub trait BatchSink: Send {
    fn try_deliver(&mut self, batch: &Arc<SensorBatch>) -> Result<(), DeliveryError>;
}

#[derive(Debug, Default, Clone)]
pub struct BroadcastReport {
    pub batch: Option<Arc<SensorBatch>>,
    pub delivered: usize,
    pub dropped: Vec<ConnectionId>,
}

impl BroadcastReport {
    pub fn snapshot_count(&self) -> usize {
        self.batch.as_ref().map_or(0, |b| b.len())
    }
}

/// Connected subscribers in connect order.
pub struct Broadcaster<S> {
    subscribers: Vec<(ConnectionId, S)>,
    next_id: ConnectionId,
    diagnostics: Arc<PipelineDiagnostics>,
}

impl<S: BatchSink> Broadcaster<S> {
    pub fn new(diagnostics: Arc<PipelineDiagnostics>) -> Self {
        Self {
            subscribers: Vec::new(),
            next_id: 1,
            diagnostics,
        }
    }

    pub fn connect(&mut self, sink: S) -> ConnectionId {
        let id = self.next_id;
        self.next_id += 1;
        self.subscribers.push((id, sink));
        self.diagnostics.record_connect();
        info!(connection = id, subscribers = self.subscribers.len(), "subscriber connected");
        id
    }

    /// Drops the subscriber's sink. Returns `false` if it was already gone.
    pub fn disconnect(&mut self, id: ConnectionId) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|(conn, _)| *conn != id);
        let removed = self.subscribers.len() != before;
        if removed {
            self.diagnostics.record_disconnect();
            info!(connection = id, subscribers = self.subscribers.len(), "subscriber disconnected");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    pub fn connection_ids(&self) -> Vec<ConnectionId> {
        self.subscribers.iter().map(|(id, _)| *id).collect()
    }

    /// Wraps a drained sequence into a batch and delivers it. An empty
    /// drain sends nothing.
    pub fn broadcast(&mut self, snapshots: Vec<SensorSnapshot>) -> BroadcastReport {
        match SensorBatch::new(snapshots) {
            Some(batch) => self.deliver(Arc::new(batch)),
            None => {
                self.diagnostics.record_empty_flush();
                BroadcastReport::default()
            }
        }
    }

    /// Sends the same batch to every subscriber. Failed subscribers are
    /// disconnected; the rest still receive the batch.
    pub fn deliver(&mut self, batch: Arc<SensorBatch>) -> BroadcastReport {
        let mut report = BroadcastReport {
            batch: Some(Arc::clone(&batch)),
            ..Default::default()
        };
        let diagnostics = &self.diagnostics;

        self.subscribers.retain_mut(|(id, sink)| match sink.try_deliver(&batch) {
            Ok(()) => {
                diagnostics.record_delivery();
                report.delivered += 1;
                true
            }
            Err(err) => {
                warn!(connection = *id, error = %err, "delivery failed, dropping subscriber");
                diagnostics.record_delivery_failure();
                diagnostics.record_disconnect();
                report.dropped.push(*id);
                false
            }
        });

        self.diagnostics.record_flush();
        debug!(
            snapshots = batch.len(),
            delivered = report.delivered,
            dropped = report.dropped.len(),
            "batch flushed"
        );
        report
    }
}

/// One flush tick: drain, then deliver, without yielding in between.
/// Non-empty batches are recorded under `flush_id`.
pub fn flush_once<S: BatchSink>(
    buffer: &dyn SnapshotBuffer,
    broadcaster: &Mutex<Broadcaster<S>>,
    recorder: &FlushRecorder,
    flush_id: u64,
    timestamp_ms: u64,
) -> BroadcastReport {
    let started = Instant::now();
    let drained = buffer.drain_and_reset();

    let mut broadcaster = broadcaster.lock().expect("broadcaster lock poisoned");
    let subscribers = broadcaster.len();
    let report = broadcaster.broadcast(drained);
    drop(broadcaster);

    if report.batch.is_some() {
        recorder.record(FlushRecord {
            flush_id,
            timestamp_ms,
            snapshot_count: report.snapshot_count(),
            subscribers,
            delivered: report.delivered,
            dropped: report.dropped.len(),
            flush_ns: started.elapsed().as_nanos() as u64,
        });
    }
    report
}

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Lock-free pipeline counters shared by the producer loops and the transport.
#[derive(Default)]
pub struct PipelineDiagnostics {
    pub snapshots_generated: AtomicU64,
    pub source_failures: AtomicU64,
    pub batches_flushed: AtomicU64,
    pub empty_flushes: AtomicU64,
    pub overflow_drops: AtomicU64,
    pub deliveries: AtomicU64,
    pub delivery_failures: AtomicU64,
    pub connects: AtomicU64,
    pub disconnects: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DiagnosticsSnapshot {
    pub snapshots_generated: u64,
    pub source_failures: u64,
    pub batches_flushed: u64,
    pub empty_flushes: u64,
    pub overflow_drops: u64,
    pub deliveries: u64,
    pub delivery_failures: u64,
    pub connects: u64,
    pub disconnects: u64,
}

impl PipelineDiagnostics {
    pub fn record_snapshot(&self) {
        self.snapshots_generated.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_source_failure(&self) {
        self.source_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_flush(&self) {
        self.batches_flushed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_empty_flush(&self) {
        self.empty_flushes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_overflow_drop(&self) {
        self.overflow_drops.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_delivery(&self) {
        self.deliveries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_delivery_failure(&self) {
        self.delivery_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_connect(&self) {
        self.connects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            snapshots_generated: self.snapshots_generated.load(Ordering::Relaxed),
            source_failures: self.source_failures.load(Ordering::Relaxed),
            batches_flushed: self.batches_flushed.load(Ordering::Relaxed),
            empty_flushes: self.empty_flushes.load(Ordering::Relaxed),
            overflow_drops: self.overflow_drops.load(Ordering::Relaxed),
            deliveries: self.deliveries.load(Ordering::Relaxed),
            delivery_failures: self.delivery_failures.load(Ordering::Relaxed),
            connects: self.connects.load(Ordering::Relaxed),
            disconnects: self.disconnects.load(Ordering::Relaxed),
        }
    }
}

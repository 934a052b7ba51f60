use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize, Serializer};

pub mod broadcaster;
pub mod buffer;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod metrics;
pub mod protocol;
pub mod retention;
pub mod source;

pub use broadcaster::{flush_once, BatchSink, BroadcastReport, Broadcaster, ConnectionId};
pub use buffer::{buffer_from_config, BoundedBuffer, MutexBuffer, SnapshotBuffer};
pub use config::TelemetryConfig;
pub use diagnostics::{DiagnosticsSnapshot, PipelineDiagnostics};
pub use error::{ConfigError, DeliveryError, ProtocolError, RetentionParseError, SourceError};
pub use metrics::{FlushRecord, FlushRecorder};
pub use protocol::{ClientMessage, SensorSubscription, ServerEvent};
pub use retention::RetentionWindow;
pub use source::{SampleGenerator, SampleSource};

pub type SensorId = String;

/// Ids for a configured sensor count: `sensor_0 .. sensor_{n-1}`.
pub fn sensor_ids(count: usize) -> Vec<SensorId> {
    (0..count).map(|i| format!("sensor_{i}")).collect()
}

/// Wall-clock time in epoch milliseconds.
pub fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// One timestamped reading of every sensor that produced a value this tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorSnapshot {
    pub timestamp: u64,
    #[serde(rename = "sensors")]
    pub readings: BTreeMap<SensorId, f64>,
}

impl SensorSnapshot {
    pub fn new(timestamp: u64, readings: BTreeMap<SensorId, f64>) -> Self {
        Self { timestamp, readings }
    }

    pub fn reading(&self, sensor: &str) -> Option<f64> {
        self.readings.get(sensor).copied()
    }
}

/// Snapshots drained from the buffer in one flush. Never empty, timestamps
/// strictly ascending.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "Vec<SensorSnapshot>")]
pub struct SensorBatch {
    snapshots: Vec<SensorSnapshot>,
}

impl SensorBatch {
    /// Wraps a drained sequence. Returns `None` for an empty drain, which
    /// callers treat as "nothing to send".
    pub fn new(snapshots: Vec<SensorSnapshot>) -> Option<Self> {
        if snapshots.is_empty() {
            None
        } else {
            Some(Self { snapshots })
        }
    }

    pub fn snapshots(&self) -> &[SensorSnapshot] {
        &self.snapshots
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

}

impl TryFrom<Vec<SensorSnapshot>> for SensorBatch {
    type Error = ProtocolError;

    fn try_from(snapshots: Vec<SensorSnapshot>) -> Result<Self, Self::Error> {
        if let Some(pos) = snapshots
            .windows(2)
            .position(|pair| pair[1].timestamp <= pair[0].timestamp)
        {
            return Err(ProtocolError::OutOfOrder { index: pos + 1 });
        }
        SensorBatch::new(snapshots).ok_or(ProtocolError::EmptyBatch)
    }
}

impl Serialize for SensorBatch {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.snapshots.serialize(serializer)
    }
}

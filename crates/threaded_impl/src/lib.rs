//! Std-thread producer with the same contract as the tokio pipeline: one
//! sampler thread, one flusher thread, one mutex-guarded buffer between them.

pub mod flusher;
pub mod sampler;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender, TrySendError};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use tracing::info;

use common::{
    buffer_from_config, epoch_millis, BatchSink, Broadcaster, ConfigError, ConnectionId,
    DeliveryError, DiagnosticsSnapshot, FlushRecorder, PipelineDiagnostics, SampleGenerator, SampleSource,
    SensorBatch, SnapshotBuffer, TelemetryConfig,
};

#[derive(Debug, Clone, Copy)]
pub struct ThreadClock {
    start: Instant,
    epoch_at_start: u64,
}

impl ThreadClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            epoch_at_start: epoch_millis(),
        }
    }

    pub fn start(&self) -> Instant {
        self.start
    }

    pub fn now_millis(&self) -> u64 {
        self.epoch_at_start + self.start.elapsed().as_millis() as u64
    }
}

impl Default for ThreadClock {
    fn default() -> Self {
        Self::new()
    }
}

pub struct SyncChannelSink(SyncSender<Arc<SensorBatch>>);

impl BatchSink for SyncChannelSink {
    fn try_deliver(&mut self, batch: &Arc<SensorBatch>) -> Result<(), DeliveryError> {
        self.0.try_send(Arc::clone(batch)).map_err(|err| match err {
            TrySendError::Full(_) => DeliveryError::Full,
            TrySendError::Disconnected(_) => DeliveryError::Closed,
        })
    }
}

#[derive(Clone)]
pub struct PipelineHandle {
    broadcaster: Arc<Mutex<Broadcaster<SyncChannelSink>>>,
    buffer: Arc<dyn SnapshotBuffer>,
    diagnostics: Arc<PipelineDiagnostics>,
    recorder: FlushRecorder,
    queue_capacity: usize,
}

impl PipelineHandle {
    pub fn connect(&self) -> (ConnectionId, Receiver<Arc<SensorBatch>>) {
        let (tx, rx) = sync_channel(self.queue_capacity);
        let id = self
            .broadcaster
            .lock()
            .expect("broadcaster lock poisoned")
            .connect(SyncChannelSink(tx));
        (id, rx)
    }

    pub fn disconnect(&self, id: ConnectionId) -> bool {
        self.broadcaster
            .lock()
            .expect("broadcaster lock poisoned")
            .disconnect(id)
    }

    pub fn subscriber_count(&self) -> usize {
        self.broadcaster.lock().expect("broadcaster lock poisoned").len()
    }

    pub fn pending_snapshots(&self) -> usize {
        self.buffer.pending()
    }

    pub fn diagnostics(&self) -> DiagnosticsSnapshot {
        self.diagnostics.snapshot()
    }

    pub fn recorder(&self) -> &FlushRecorder {
        &self.recorder
    }
}

pub struct Pipeline {
    handle: PipelineHandle,
    sampler: JoinHandle<()>,
    flusher: JoinHandle<()>,
    stop_sampler: Arc<AtomicBool>,
    stop_flusher: Arc<AtomicBool>,
}

impl Pipeline {
    pub fn handle(&self) -> PipelineHandle {
        self.handle.clone()
    }

    /// Stops sampling, performs a final flush and drops every subscriber.
    pub fn shutdown(self) -> PipelineHandle {
        self.stop_sampler.store(true, Ordering::Release);
        self.sampler.thread().unpark();
        let _ = self.sampler.join();

        self.stop_flusher.store(true, Ordering::Release);
        self.flusher.thread().unpark();
        let _ = self.flusher.join();

        let mut broadcaster = self
            .handle
            .broadcaster
            .lock()
            .expect("broadcaster lock poisoned");
        for id in broadcaster.connection_ids() {
            broadcaster.disconnect(id);
        }
        drop(broadcaster);

        info!(diagnostics = ?self.handle.diagnostics(), "threaded pipeline stopped");
        self.handle
    }
}

/// Validates the config, then starts the sampler and flusher threads.
pub fn start_pipeline(
    config: &TelemetryConfig,
    source: Box<dyn SampleSource>,
) -> Result<Pipeline, ConfigError> {
    config.validate()?;

    let diagnostics = Arc::new(PipelineDiagnostics::default());
    let buffer = buffer_from_config(config);
    let broadcaster = Arc::new(Mutex::new(Broadcaster::new(Arc::clone(&diagnostics))));
    let recorder = FlushRecorder::new();
    let clock = ThreadClock::new();
    let stop_sampler = Arc::new(AtomicBool::new(false));
    let stop_flusher = Arc::new(AtomicBool::new(false));

    let sampler = {
        let generator = SampleGenerator::new(config.sensor_ids(), source, Arc::clone(&diagnostics));
        let buffer = Arc::clone(&buffer);
        let diagnostics = Arc::clone(&diagnostics);
        let stop = Arc::clone(&stop_sampler);
        let period = config.sample_period();
        thread::Builder::new()
            .name("telemetry-sampler".into())
            .spawn(move || sampler::run_sampler_thread(generator, buffer, period, clock, diagnostics, stop))
            .expect("failed to spawn sampler thread")
    };

    let flusher = {
        let buffer = Arc::clone(&buffer);
        let broadcaster = Arc::clone(&broadcaster);
        let recorder = recorder.clone();
        let stop = Arc::clone(&stop_flusher);
        let period = config.flush_period();
        thread::Builder::new()
            .name("telemetry-flusher".into())
            .spawn(move || flusher::run_flusher_thread(buffer, broadcaster, recorder, period, clock, stop))
            .expect("failed to spawn flusher thread")
    };

    info!(
        sensors = config.sensor_count,
        sample_period_ms = config.sample_period_ms,
        flush_period_ms = config.flush_period_ms,
        "threaded pipeline started"
    );

    Ok(Pipeline {
        handle: PipelineHandle {
            broadcaster,
            buffer,
            diagnostics,
            recorder,
            queue_capacity: config.subscriber_queue_capacity,
        },
        sampler,
        flusher,
        stop_sampler,
        stop_flusher,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::source::SineSource;
    use std::time::Duration;

    fn fast_config() -> TelemetryConfig {
        TelemetryConfig {
            sample_period_ms: 10,
            flush_period_ms: 50,
            subscriber_queue_capacity: 256,
            ..TelemetryConfig::default()
        }
    }

    #[test]
    fn every_generated_snapshot_is_delivered_once_in_order() {
        let pipeline = start_pipeline(&fast_config(), Box::new(SineSource::default())).unwrap();
        let (_, rx) = pipeline.handle().connect();
        thread::sleep(Duration::from_millis(300));
        let handle = pipeline.shutdown();

        let timestamps: Vec<u64> = rx
            .iter()
            .flat_map(|batch| batch.snapshots().iter().map(|s| s.timestamp).collect::<Vec<_>>())
            .collect();

        assert!(!timestamps.is_empty());
        assert_eq!(timestamps.len() as u64, handle.diagnostics().snapshots_generated);
        assert!(timestamps.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(handle.pending_snapshots(), 0);
        assert!(!handle.recorder().is_empty());
    }

    #[test]
    fn dropped_receiver_is_disconnected_on_next_flush() {
        let pipeline = start_pipeline(&fast_config(), Box::new(SineSource::default())).unwrap();
        let handle = pipeline.handle();
        let (_, rx) = handle.connect();
        let (_, _kept) = handle.connect();
        drop(rx);

        thread::sleep(Duration::from_millis(150));
        assert_eq!(handle.subscriber_count(), 1);
        assert!(handle.diagnostics().delivery_failures >= 1);
        pipeline.shutdown();
    }

    #[test]
    fn invalid_config_starts_no_threads() {
        let zero_queue = TelemetryConfig {
            subscriber_queue_capacity: 0,
            ..fast_config()
        };
        let zero_buffer = TelemetryConfig {
            buffer_capacity: Some(0),
            ..fast_config()
        };
        let zero_flush = TelemetryConfig {
            flush_period_ms: 0,
            ..fast_config()
        };

        for config in [zero_queue, zero_buffer, zero_flush] {
            let result = start_pipeline(&config, Box::new(SineSource::default()));
            assert!(matches!(result, Err(ConfigError::Invalid(_))));
        }
    }
}

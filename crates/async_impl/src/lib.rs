//! Tokio producer: a sample loop and a flush loop sharing one snapshot
//! buffer, with a broadcaster fanning each batch out to bounded
//! per-subscriber channels.

pub mod flusher;
pub mod generator;
pub mod server;

use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::info;

use common::{
    buffer_from_config, epoch_millis, BatchSink, Broadcaster, ConfigError, ConnectionId,
    DeliveryError, DiagnosticsSnapshot, FlushRecorder, PipelineDiagnostics, SampleGenerator, SampleSource,
    SensorBatch, SnapshotBuffer, TelemetryConfig,
};

/// Epoch-millisecond timestamps derived from a monotonic start instant, so
/// snapshot timestamps never go backwards within one pipeline run.
#[derive(Debug, Clone, Copy)]
pub struct PipelineClock {
    start: Instant,
    epoch_at_start: u64,
}

impl PipelineClock {
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

impl Default for PipelineClock {
    fn default() -> Self {
        Self::new()
    }
}

/// Outbound queue of one connection.
pub struct ChannelSink(mpsc::Sender<Arc<SensorBatch>>);

impl BatchSink for ChannelSink {
    fn try_deliver(&mut self, batch: &Arc<SensorBatch>) -> Result<(), DeliveryError> {
        self.0.try_send(Arc::clone(batch)).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => DeliveryError::Full,
            mpsc::error::TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }
}

/// Cloneable access to a running pipeline for the transport layer.
#[derive(Clone)]
pub struct PipelineHandle {
    broadcaster: Arc<Mutex<Broadcaster<ChannelSink>>>,
    buffer: Arc<dyn SnapshotBuffer>,
    diagnostics: Arc<PipelineDiagnostics>,
    recorder: FlushRecorder,
    queue_capacity: usize,
}

impl PipelineHandle {
    /// Registers a subscriber with an empty queue. Dropping the receiver is
    /// detected on the next flush.
    pub fn connect(&self) -> (ConnectionId, mpsc::Receiver<Arc<SensorBatch>>) {
        let (tx, rx) = mpsc::channel(self.queue_capacity);
        let id = self
            .broadcaster
            .lock()
            .expect("broadcaster lock poisoned")
            .connect(ChannelSink(tx));
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
    stop_sampler: Arc<Notify>,
    stop_flusher: Arc<Notify>,
}

impl Pipeline {
    pub fn handle(&self) -> PipelineHandle {
        self.handle.clone()
    }

    /// Stops sampling, flushes whatever is still buffered, then drops every
    /// subscriber so their receivers close.
    pub async fn shutdown(self) -> PipelineHandle {
        self.stop_sampler.notify_one();
        let _ = self.sampler.await;
        self.stop_flusher.notify_one();
        let _ = self.flusher.await;

        let mut broadcaster = self
            .handle
            .broadcaster
            .lock()
            .expect("broadcaster lock poisoned");
        for id in broadcaster.connection_ids() {
            broadcaster.disconnect(id);
        }
        drop(broadcaster);

        info!(diagnostics = ?self.handle.diagnostics(), "pipeline stopped");
        self.handle
    }
}

/// Starts both loops on the current tokio runtime. The config is validated
/// first; nothing is spawned for a rejected one.
pub fn spawn_pipeline(
    config: &TelemetryConfig,
    source: Box<dyn SampleSource>,
) -> Result<Pipeline, ConfigError> {
    config.validate()?;

    let diagnostics = Arc::new(PipelineDiagnostics::default());
    let buffer = buffer_from_config(config);
    let broadcaster = Arc::new(Mutex::new(Broadcaster::new(Arc::clone(&diagnostics))));
    let recorder = FlushRecorder::new();
    let clock = PipelineClock::new();
    let stop_sampler = Arc::new(Notify::new());
    let stop_flusher = Arc::new(Notify::new());

    let generator = SampleGenerator::new(config.sensor_ids(), source, Arc::clone(&diagnostics));
    let sampler = tokio::spawn(generator::run_sample_loop(
        generator,
        Arc::clone(&buffer),
        config.sample_period(),
        clock,
        Arc::clone(&diagnostics),
        Arc::clone(&stop_sampler),
    ));
    let flusher = tokio::spawn(flusher::run_flush_loop(
        Arc::clone(&buffer),
        Arc::clone(&broadcaster),
        recorder.clone(),
        config.flush_period(),
        clock,
        Arc::clone(&stop_flusher),
    ));

    info!(
        sensors = config.sensor_count,
        sample_period_ms = config.sample_period_ms,
        flush_period_ms = config.flush_period_ms,
        "async pipeline started"
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

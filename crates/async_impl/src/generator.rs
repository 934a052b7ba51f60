use std::sync::Arc;

use tokio::sync::Notify;
use tokio::time::{sleep_until, Duration};
use tracing::{debug, info};

use common::{PipelineDiagnostics, SampleGenerator, SnapshotBuffer};

use crate::PipelineClock;

/// Samples every sensor once per `period` and appends the snapshot to the
/// buffer. Runs until `stop` is notified; never waits on downstream.
pub async fn run_sample_loop(
    mut generator: SampleGenerator,
    buffer: Arc<dyn SnapshotBuffer>,
    period: Duration,
    clock: PipelineClock,
    diagnostics: Arc<PipelineDiagnostics>,
    stop: Arc<Notify>,
) {
    info!(
        sensors = generator.sensors().len(),
        period_ms = period.as_millis() as u64,
        "sample loop started"
    );
    let mut next_tick = clock.start() + period;

    loop {
        tokio::select! {
            _ = stop.notified() => break,
            _ = sleep_until(next_tick) => {}
        }

        let snapshot = generator.sample(clock.now_millis());
        if let Some(evicted) = buffer.append(snapshot) {
            diagnostics.record_overflow_drop();
            debug!(timestamp = evicted.timestamp, "buffer full, dropped oldest snapshot");
        }
        next_tick += period;
    }

    info!("sample loop stopped");
}

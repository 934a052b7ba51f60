use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{debug, info};

use common::{PipelineDiagnostics, SampleGenerator, SnapshotBuffer};

use crate::ThreadClock;

pub fn run_sampler_thread(
    mut generator: SampleGenerator,
    buffer: Arc<dyn SnapshotBuffer>,
    period: Duration,
    clock: ThreadClock,
    diagnostics: Arc<PipelineDiagnostics>,
    shutdown_flag: Arc<AtomicBool>,
) {
    info!(sensors = generator.sensors().len(), "sampler thread started");
    let mut next_tick = clock.start() + period;

    while !shutdown_flag.load(Ordering::Acquire) {
        let wait = next_tick.saturating_duration_since(std::time::Instant::now());
        if !wait.is_zero() {
            // unparked early on shutdown
            thread::park_timeout(wait);
            continue;
        }

        let snapshot = generator.sample(clock.now_millis());
        if let Some(evicted) = buffer.append(snapshot) {
            diagnostics.record_overflow_drop();
            debug!(timestamp = evicted.timestamp, "buffer full, dropped oldest snapshot");
        }
        next_tick += period;
    }

    info!("sampler thread stopped");
}

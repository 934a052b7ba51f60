use std::sync::{Arc, Mutex};

use tokio::sync::Notify;
use tokio::time::{sleep_until, Duration};
use tracing::info;

use common::{flush_once, Broadcaster, FlushRecorder, SnapshotBuffer};

use crate::{ChannelSink, PipelineClock};

/// Drains the buffer once per `period` and hands the batch to the
/// broadcaster. Performs one last flush when `stop` is notified so nothing
/// appended before shutdown is lost.
pub async fn run_flush_loop(
    buffer: Arc<dyn SnapshotBuffer>,
    broadcaster: Arc<Mutex<Broadcaster<ChannelSink>>>,
    recorder: FlushRecorder,
    period: Duration,
    clock: PipelineClock,
    stop: Arc<Notify>,
) {
    info!(period_ms = period.as_millis() as u64, "flush loop started");
    let mut next_tick = clock.start() + period;
    let mut flush_id = 0u64;

    loop {
        let stopping = tokio::select! {
            _ = stop.notified() => true,
            _ = sleep_until(next_tick) => false,
        };

        flush_id += 1;
        flush_once(&*buffer, &*broadcaster, &recorder, flush_id, clock.now_millis());

        if stopping {
            break;
        }
        next_tick += period;
    }

    info!(flushes = flush_id, "flush loop stopped");
}

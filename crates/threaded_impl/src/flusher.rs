use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use tracing::info;

use common::{flush_once, Broadcaster, FlushRecorder, SnapshotBuffer};

use crate::{SyncChannelSink, ThreadClock};

pub fn run_flusher_thread(
    buffer: Arc<dyn SnapshotBuffer>,
    broadcaster: Arc<Mutex<Broadcaster<SyncChannelSink>>>,
    recorder: FlushRecorder,
    period: Duration,
    clock: ThreadClock,
    shutdown_flag: Arc<AtomicBool>,
) {
    info!("flusher thread started");
    let mut next_tick = clock.start() + period;
    let mut flush_id = 0u64;

    loop {
        let stopping = shutdown_flag.load(Ordering::Acquire);
        if !stopping {
            let wait = next_tick.saturating_duration_since(Instant::now());
            if !wait.is_zero() {
                thread::park_timeout(wait);
                continue;
            }
            next_tick += period;
        }

        flush_id += 1;
        flush_once(&*buffer, &*broadcaster, &recorder, flush_id, clock.now_millis());

        if stopping {
            break;
        }
    }

    info!(flushes = flush_id, "flusher thread stopped");
}

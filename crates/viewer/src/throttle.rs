use std::time::Duration;

use tokio::time::Instant;

/// Limits reconciliation to one pass per interval.
///
/// The first change after a quiet period may reconcile at once. Changes
/// inside the interval only arm a trailing redraw at `last_fired + interval`,
/// which then reconciles whatever has accumulated. Nothing re-arms unless new
/// changes arrive.
#[derive(Debug, Clone)]
pub struct RedrawGate {
    interval: Option<Duration>,
    last_fired: Option<Instant>,
    pending: bool,
}

impl RedrawGate {
    /// `None` disables throttling.
    pub fn new(interval: Option<Duration>) -> Self {
        Self {
            interval,
            last_fired: None,
            pending: false,
        }
    }

    /// Notes a change. Returns `true` when the caller should reconcile now.
    pub fn request(&mut self, now: Instant) -> bool {
        match (self.interval, self.last_fired) {
            (Some(interval), Some(last)) if now < last + interval => {
                self.pending = true;
                false
            }
            _ => {
                self.fire(now);
                true
            }
        }
    }

    /// When the armed trailing redraw is due.
    pub fn deadline(&self) -> Option<Instant> {
        if !self.pending {
            return None;
        }
        match (self.interval, self.last_fired) {
            (Some(interval), Some(last)) => Some(last + interval),
            _ => None,
        }
    }

    pub fn fire(&mut self, now: Instant) {
        self.pending = false;
        self.last_fired = Some(now);
    }

    /// An out-of-band reconciliation already covered the pending changes.
    pub fn satisfy(&mut self) {
        self.pending = false;
    }

    pub fn is_pending(&self) -> bool {
        self.pending
    }
}

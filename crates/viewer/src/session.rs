use std::sync::Arc;
use std::time::Duration;

use common::{epoch_millis, RetentionWindow, SensorBatch, SensorId, SensorSubscription};
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info};

use crate::consumer::StreamConsumer;
use crate::reconciler::{ReconcileStats, ViewReconciler};
use crate::render::RenderTarget;
use crate::throttle::RedrawGate;

/// Everything a subscriber reacts to, from the transport or the local UI.
#[derive(Debug, Clone)]
pub enum SubscriberEvent {
    Connected,
    Batch(Arc<SensorBatch>),
    Disconnected,
    SubscriptionUpdate(SensorSubscription),
    SelectionChanged(Vec<SensorId>),
    RetentionChanged(RetentionWindow),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOutcome {
    Unchanged,
    /// Histories changed; the caller decides when to reconcile.
    BatchChanged,
    /// A local operation was reconciled synchronously.
    Reconciled(ReconcileStats),
}

/// One viewer's private state: histories, rendered series and the target
/// they are drawn on.
pub struct SubscriberSession<T> {
    consumer: StreamConsumer,
    reconciler: ViewReconciler,
    target: T,
    connected: bool,
}

impl<T: RenderTarget> SubscriberSession<T> {
    pub fn new(selected: Vec<SensorId>, retention: RetentionWindow, target: T) -> Self {
        Self {
            consumer: StreamConsumer::new(selected, retention),
            reconciler: ViewReconciler::new(),
            target,
            connected: false,
        }
    }

    pub fn consumer(&self) -> &StreamConsumer {
        &self.consumer
    }

    pub fn reconciler(&self) -> &ViewReconciler {
        &self.reconciler
    }

    pub fn target(&self) -> &T {
        &self.target
    }

    pub fn target_mut(&mut self) -> &mut T {
        &mut self.target
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn handle(&mut self, event: SubscriberEvent, now_ms: u64) -> EventOutcome {
        match event {
            SubscriberEvent::Connected => {
                info!("subscriber connected, starting with empty history");
                self.connected = true;
                self.consumer.clear();
                EventOutcome::Reconciled(self.reconcile())
            }
            SubscriberEvent::Disconnected => {
                info!("subscriber disconnected, discarding history");
                self.connected = false;
                self.consumer.clear();
                EventOutcome::Reconciled(self.reconcile())
            }
            SubscriberEvent::Batch(batch) => {
                if !self.connected {
                    debug!("ignoring batch received while disconnected");
                    return EventOutcome::Unchanged;
                }
                if self.consumer.ingest(&batch, now_ms) {
                    EventOutcome::BatchChanged
                } else {
                    EventOutcome::Unchanged
                }
            }
            SubscriberEvent::SubscriptionUpdate(subscription) => {
                if !subscription.is_live() {
                    debug!(
                        start = subscription.start_time,
                        end = ?subscription.end_time,
                        "historical range requested, showing live data only"
                    );
                }
                self.consumer.set_selection(subscription.sensor_ids);
                EventOutcome::Reconciled(self.reconcile())
            }
            SubscriberEvent::SelectionChanged(sensors) => {
                self.consumer.set_selection(sensors);
                EventOutcome::Reconciled(self.reconcile())
            }
            SubscriberEvent::RetentionChanged(window) => {
                self.consumer.set_retention(window, now_ms);
                EventOutcome::Reconciled(self.reconcile())
            }
        }
    }

    /// Handles an event and reconciles batch changes straight away.
    pub fn apply(&mut self, event: SubscriberEvent, now_ms: u64) -> ReconcileStats {
        match self.handle(event, now_ms) {
            EventOutcome::BatchChanged => self.reconcile(),
            EventOutcome::Reconciled(stats) => stats,
            EventOutcome::Unchanged => ReconcileStats::default(),
        }
    }

    pub fn reconcile(&mut self) -> ReconcileStats {
        self.consumer.take_dirty();
        self.reconciler
            .reconcile(self.consumer.selected(), self.consumer.histories(), &mut self.target)
    }
}

/// Drives a session from its event channel until the channel closes.
/// Batch-triggered redraws pass through a [`RedrawGate`]; local operations
/// reconcile immediately.
pub async fn run_subscriber<T: RenderTarget>(
    mut events: mpsc::Receiver<SubscriberEvent>,
    mut session: SubscriberSession<T>,
    redraw_interval: Option<Duration>,
) -> SubscriberSession<T> {
    let mut gate = RedrawGate::new(redraw_interval);

    loop {
        let deadline = gate.deadline();
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                match session.handle(event, epoch_millis()) {
                    EventOutcome::BatchChanged => {
                        if gate.request(Instant::now()) {
                            session.reconcile();
                        }
                    }
                    EventOutcome::Reconciled(_) => gate.satisfy(),
                    EventOutcome::Unchanged => {}
                }
            }
            _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                gate.fire(Instant::now());
                session.reconcile();
            }
        }
    }

    if gate.is_pending() {
        session.reconcile();
    }
    session
}

/// Turns a broadcaster connection into session events: `Connected`, one
/// `Batch` per delivery, then `Disconnected` once the producer drops the
/// connection.
pub async fn forward_batches(
    mut batches: mpsc::Receiver<Arc<SensorBatch>>,
    events: mpsc::Sender<SubscriberEvent>,
) {
    if events.send(SubscriberEvent::Connected).await.is_err() {
        return;
    }
    while let Some(batch) = batches.recv().await {
        if events.send(SubscriberEvent::Batch(batch)).await.is_err() {
            return;
        }
    }
    let _ = events.send(SubscriberEvent::Disconnected).await;
}

/// Relays UI-originated events into the session channel, waiting for room
/// behind queued batches. Sends on the unbounded side never fail while the
/// relay is alive.
pub async fn forward_controls(
    mut controls: mpsc::UnboundedReceiver<SubscriberEvent>,
    events: mpsc::Sender<SubscriberEvent>,
) {
    while let Some(event) = controls.recv().await {
        if events.send(event).await.is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::{RecordingTarget, RenderOp};
    use common::SensorSnapshot;
    use std::collections::BTreeMap;

    fn batch_at(ts: u64, values: &[(&str, f64)]) -> Arc<SensorBatch> {
        let readings: BTreeMap<SensorId, f64> =
            values.iter().map(|(id, v)| (id.to_string(), *v)).collect();
        Arc::new(SensorBatch::new(vec![SensorSnapshot::new(ts, readings)]).unwrap())
    }

    fn ids(names: &[&str]) -> Vec<SensorId> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn session(names: &[&str]) -> SubscriberSession<RecordingTarget> {
        SubscriberSession::new(ids(names), RetentionWindow::OneMinute, RecordingTarget::default())
    }

    #[test]
    fn batches_before_connect_are_ignored() {
        let mut s = session(&["a"]);
        let outcome = s.handle(SubscriberEvent::Batch(batch_at(1_000, &[("a", 1.0)])), 1_000);
        assert_eq!(outcome, EventOutcome::Unchanged);
        assert!(s.consumer().histories().is_empty());
    }

    #[test]
    fn local_selection_change_reconciles_without_waiting() {
        let mut s = session(&["a"]);
        s.apply(SubscriberEvent::Connected, 1_000);
        s.apply(SubscriberEvent::Batch(batch_at(1_000, &[("a", 1.0), ("b", 2.0)])), 1_000);
        s.target_mut().take_ops();

        let outcome = s.handle(SubscriberEvent::SelectionChanged(ids(&["a", "b"])), 1_100);
        match outcome {
            EventOutcome::Reconciled(stats) => assert_eq!(stats.added, 1),
            other => panic!("expected synchronous reconcile, got {other:?}"),
        }
        assert!(s.target().canvas.points("b").is_some());
    }

    #[test]
    fn subscription_update_sets_local_selection() {
        let mut s = session(&["a"]);
        s.apply(SubscriberEvent::Connected, 0);
        s.apply(
            SubscriberEvent::SubscriptionUpdate(SensorSubscription {
                sensor_ids: ids(&["c"]),
                start_time: 0,
                end_time: Some(10),
            }),
            0,
        );
        assert_eq!(s.consumer().selected(), &["c".to_string()]);
        assert!(s.target().canvas.points("a").is_none());
    }

    #[test]
    fn disconnect_discards_state_and_reconnect_starts_empty() {
        let mut s = session(&["a"]);
        s.apply(SubscriberEvent::Connected, 1_000);
        s.apply(SubscriberEvent::Batch(batch_at(1_000, &[("a", 1.0)])), 1_000);
        assert_eq!(s.target().canvas.points("a").map(<[_]>::len), Some(1));

        s.apply(SubscriberEvent::Disconnected, 1_100);
        assert!(!s.is_connected());
        assert_eq!(s.target().canvas.points("a").map(<[_]>::len), Some(0));

        s.apply(SubscriberEvent::Connected, 1_200);
        assert!(s.consumer().histories().is_empty());
    }

    #[test]
    fn isolated_sessions_do_not_share_state() {
        let mut left = session(&["a"]);
        let mut right = session(&["b"]);
        let shared = batch_at(1_000, &[("a", 1.0), ("b", 2.0)]);
        for s in [&mut left, &mut right] {
            s.apply(SubscriberEvent::Connected, 1_000);
            s.apply(SubscriberEvent::Batch(Arc::clone(&shared)), 1_000);
        }
        left.apply(SubscriberEvent::Disconnected, 1_100);

        assert!(right.consumer().history("a").is_none());
        assert_eq!(right.target().canvas.points("b").map(<[_]>::len), Some(1));
        assert!(left.target().canvas.points("b").is_none());
    }

    #[tokio::test]
    async fn control_events_wait_for_room_behind_batches() {
        let (tx, mut rx) = mpsc::channel(1);
        tx.send(SubscriberEvent::Batch(batch_at(1_000, &[("a", 1.0)])))
            .await
            .unwrap();
        assert!(tx.try_send(SubscriberEvent::Connected).is_err());

        let (controls, control_rx) = mpsc::unbounded_channel();
        let relay = tokio::spawn(forward_controls(control_rx, tx));
        controls
            .send(SubscriberEvent::SelectionChanged(ids(&["b"])))
            .unwrap();
        controls
            .send(SubscriberEvent::RetentionChanged(RetentionWindow::FiveMinutes))
            .unwrap();
        drop(controls);

        assert!(matches!(rx.recv().await, Some(SubscriberEvent::Batch(_))));
        match rx.recv().await {
            Some(SubscriberEvent::SelectionChanged(sensors)) => assert_eq!(sensors, ids(&["b"])),
            other => panic!("expected selection change, got {other:?}"),
        }
        assert!(matches!(
            rx.recv().await,
            Some(SubscriberEvent::RetentionChanged(RetentionWindow::FiveMinutes))
        ));
        relay.await.unwrap();
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn throttled_driver_coalesces_batches() {
        let (tx, rx) = mpsc::channel(16);
        let driver = tokio::spawn(run_subscriber(
            rx,
            session(&["a"]),
            Some(Duration::from_millis(250)),
        ));
        let base = epoch_millis();

        tx.send(SubscriberEvent::Connected).await.unwrap();
        for i in 0..4u64 {
            tx.send(SubscriberEvent::Batch(batch_at(base + i, &[("a", i as f64)])))
                .await
                .unwrap();
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        tokio::time::sleep(Duration::from_millis(300)).await;
        drop(tx);

        let finished = driver.await.unwrap();
        let target = finished.target();
        let updates = target
            .ops()
            .iter()
            .filter(|op| matches!(op, RenderOp::Update { .. }))
            .count();
        // leading redraw for the first batch, one trailing redraw for the rest
        assert_eq!(updates, 2);
        assert_eq!(target.canvas.points("a").map(<[_]>::len), Some(4));
    }
}

//! Subscriber side of the telemetry stream: change-driven per-sensor
//! history, retention filtering and minimal view reconciliation.

pub mod consumer;
pub mod history;
pub mod reconciler;
pub mod render;
pub mod session;
pub mod throttle;

pub use consumer::StreamConsumer;
pub use history::{HistoryStore, Sample, SensorHistory};
pub use reconciler::{ReconcileStats, ViewReconciler};
pub use render::{RecordingTarget, RenderOp, RenderTarget, SeriesCanvas, SeriesPatch};
pub use session::{
    forward_batches, forward_controls, run_subscriber, EventOutcome, SubscriberEvent,
    SubscriberSession,
};
pub use throttle::RedrawGate;

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use common::SensorId;

use crate::history::Sample;

/// Change to an already-rendered series.
#[derive(Debug, Clone, PartialEq)]
pub enum SeriesPatch {
    /// Drop `trim_front` points from the start, then append `append`.
    Splice { trim_front: usize, append: Vec<Sample> },
    Replace(Vec<Sample>),
}

impl SeriesPatch {
    /// Smallest patch turning `current` into `desired`, or `None` when the
    /// two traces already match point for point.
    pub fn between(current: &[Sample], desired: &[Sample]) -> Option<SeriesPatch> {
        if current == desired {
            return None;
        }
        let trim_front = match desired.first() {
            Some(first) => current.partition_point(|p| p.timestamp < first.timestamp),
            None => current.len(),
        };
        let kept = &current[trim_front..];
        if (!kept.is_empty() || desired.is_empty()) && desired.starts_with(kept) {
            Some(SeriesPatch::Splice {
                trim_front,
                append: desired[kept.len()..].to_vec(),
            })
        } else {
            Some(SeriesPatch::Replace(desired.to_vec()))
        }
    }

    pub fn apply(&self, points: &mut Vec<Sample>) {
        match self {
            SeriesPatch::Splice { trim_front, append } => {
                points.drain(..(*trim_front).min(points.len()));
                points.extend_from_slice(append);
            }
            SeriesPatch::Replace(replacement) => {
                points.clear();
                points.extend_from_slice(replacement);
            }
        }
    }
}

/// Display surface driven by the reconciler. Series-level calls are
/// followed by at most one `redraw` per reconciliation pass.
pub trait RenderTarget {
    fn add_series(&mut self, sensor: &SensorId, points: &[Sample]);
    fn update_series(&mut self, sensor: &SensorId, patch: &SeriesPatch);
    fn remove_series(&mut self, sensor: &SensorId);
    fn redraw(&mut self);
}

#[derive(Debug, Clone, PartialEq)]
pub enum RenderOp {
    Add { sensor: SensorId, points: Vec<Sample> },
    Update { sensor: SensorId, patch: SeriesPatch },
    Remove { sensor: SensorId },
    Redraw,
}

/// In-memory series set, as a chart would hold it.
#[derive(Debug, Clone, Default)]
pub struct SeriesCanvas {
    series: BTreeMap<SensorId, Vec<Sample>>,
    redraws: u64,
}

impl SeriesCanvas {
    pub fn series(&self) -> &BTreeMap<SensorId, Vec<Sample>> {
        &self.series
    }

    pub fn points(&self, sensor: &str) -> Option<&[Sample]> {
        self.series.get(sensor).map(Vec::as_slice)
    }

    pub fn redraw_count(&self) -> u64 {
        self.redraws
    }
}

impl RenderTarget for SeriesCanvas {
    fn add_series(&mut self, sensor: &SensorId, points: &[Sample]) {
        self.series.insert(sensor.clone(), points.to_vec());
    }

    fn update_series(&mut self, sensor: &SensorId, patch: &SeriesPatch) {
        patch.apply(self.series.entry(sensor.clone()).or_default());
    }

    fn remove_series(&mut self, sensor: &SensorId) {
        self.series.remove(sensor);
    }

    fn redraw(&mut self) {
        self.redraws += 1;
    }
}

/// Canvas that also logs every operation it receives.
#[derive(Debug, Clone, Default)]
pub struct RecordingTarget {
    pub canvas: SeriesCanvas,
    ops: Vec<RenderOp>,
}

impl RecordingTarget {
    pub fn ops(&self) -> &[RenderOp] {
        &self.ops
    }

    pub fn take_ops(&mut self) -> Vec<RenderOp> {
        std::mem::take(&mut self.ops)
    }
}

impl RenderTarget for RecordingTarget {
    fn add_series(&mut self, sensor: &SensorId, points: &[Sample]) {
        self.canvas.add_series(sensor, points);
        self.ops.push(RenderOp::Add {
            sensor: sensor.clone(),
            points: points.to_vec(),
        });
    }

    fn update_series(&mut self, sensor: &SensorId, patch: &SeriesPatch) {
        self.canvas.update_series(sensor, patch);
        self.ops.push(RenderOp::Update {
            sensor: sensor.clone(),
            patch: patch.clone(),
        });
    }

    fn remove_series(&mut self, sensor: &SensorId) {
        self.canvas.remove_series(sensor);
        self.ops.push(RenderOp::Remove {
            sensor: sensor.clone(),
        });
    }

    fn redraw(&mut self) {
        self.canvas.redraw();
        self.ops.push(RenderOp::Redraw);
    }
}

/// Lets a UI thread read the target while the subscriber task writes it.
impl<T: RenderTarget + ?Sized> RenderTarget for Arc<Mutex<T>> {
    fn add_series(&mut self, sensor: &SensorId, points: &[Sample]) {
        self.lock().expect("render target lock poisoned").add_series(sensor, points);
    }

    fn update_series(&mut self, sensor: &SensorId, patch: &SeriesPatch) {
        self.lock().expect("render target lock poisoned").update_series(sensor, patch);
    }

    fn remove_series(&mut self, sensor: &SensorId) {
        self.lock().expect("render target lock poisoned").remove_series(sensor);
    }

    fn redraw(&mut self) {
        self.lock().expect("render target lock poisoned").redraw();
    }
}

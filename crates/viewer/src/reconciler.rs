use std::collections::BTreeMap;

use common::SensorId;
use tracing::trace;

use crate::history::{HistoryStore, Sample};
use crate::render::{RenderTarget, SeriesPatch};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileStats {
    pub added: usize,
    pub updated: usize,
    pub removed: usize,
    pub redrawn: bool,
}

impl ReconcileStats {
    pub fn operations(&self) -> usize {
        self.added + self.updated + self.removed
    }
}

/// Tracks what is on screen and emits the smallest set of series
/// operations needed to match the current selection and histories.
#[derive(Debug, Default)]
pub struct ViewReconciler {
    rendered: BTreeMap<SensorId, Vec<Sample>>,
}

impl ViewReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rendered(&self) -> &BTreeMap<SensorId, Vec<Sample>> {
        &self.rendered
    }

    pub fn rendered_points(&self, sensor: &str) -> Option<&[Sample]> {
        self.rendered.get(sensor).map(Vec::as_slice)
    }

    pub fn reconcile<T: RenderTarget + ?Sized>(
        &mut self,
        selected: &[SensorId],
        histories: &HistoryStore,
        target: &mut T,
    ) -> ReconcileStats {
        let mut stats = ReconcileStats::default();

        let stale: Vec<SensorId> = self
            .rendered
            .keys()
            .filter(|id| !selected.contains(*id))
            .cloned()
            .collect();
        for sensor in stale {
            self.rendered.remove(&sensor);
            target.remove_series(&sensor);
            stats.removed += 1;
        }

        for sensor in selected {
            let desired = histories.samples(sensor);
            match self.rendered.get_mut(sensor) {
                None => {
                    target.add_series(sensor, desired);
                    self.rendered.insert(sensor.clone(), desired.to_vec());
                    stats.added += 1;
                }
                Some(current) => {
                    if let Some(patch) = SeriesPatch::between(current, desired) {
                        target.update_series(sensor, &patch);
                        patch.apply(current);
                        stats.updated += 1;
                    }
                }
            }
        }

        if stats.operations() > 0 {
            target.redraw();
            stats.redrawn = true;
        }
        trace!(?stats, "reconciled view");
        stats
    }
}

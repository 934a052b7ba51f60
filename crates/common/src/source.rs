use std::collections::BTreeMap;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::warn;

use crate::config::{SourceKind, TelemetryConfig};
use crate::diagnostics::PipelineDiagnostics;
use crate::error::SourceError;
use crate::{SensorId, SensorSnapshot};

/// Supplies one sensor value per read. A hardware feed would implement this
/// in place of the simulated sources.
pub trait SampleSource: Send {
    fn read(&mut self, sensor: &SensorId, timestamp_ms: u64) -> Result<f64, SourceError>;
}

/// Uniform values in `[0, 100)`.
pub struct RandomSource {
    rng: StdRng,
}

impl RandomSource {
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl Default for RandomSource {
    fn default() -> Self {
        Self::new()
    }
}

impl SampleSource for RandomSource {
    fn read(&mut self, _sensor: &SensorId, _timestamp_ms: u64) -> Result<f64, SourceError> {
        Ok(self.rng.gen_range(0.0..100.0))
    }
}

/// Deterministic sine around 50 with amplitude 10, phase-shifted per sensor.
#[derive(Debug, Clone, Copy)]
pub struct SineSource {
    pub period_ms: f64,
}

impl Default for SineSource {
    fn default() -> Self {
        Self { period_ms: 10_000.0 }
    }
}

impl SampleSource for SineSource {
    fn read(&mut self, sensor: &SensorId, timestamp_ms: u64) -> Result<f64, SourceError> {
        let index = sensor
            .rsplit('_')
            .next()
            .and_then(|n| n.parse::<u32>().ok())
            .unwrap_or(0);
        let phase = f64::from(index) * 0.7;
        let angle = (timestamp_ms as f64 / self.period_ms) * std::f64::consts::TAU + phase;
        Ok(50.0 + angle.sin() * 10.0)
    }
}

/// Fails a configurable fraction of reads from the wrapped source.
pub struct FlakySource<S> {
    inner: S,
    failure_rate: f64,
    rng: StdRng,
}

impl<S: SampleSource> FlakySource<S> {
    pub fn new(inner: S, failure_rate: f64) -> Self {
        Self::with_rng(inner, failure_rate, StdRng::from_entropy())
    }

    pub fn with_rng(inner: S, failure_rate: f64, rng: StdRng) -> Self {
        Self {
            inner,
            failure_rate: failure_rate.clamp(0.0, 1.0),
            rng,
        }
    }
}

impl<S: SampleSource> SampleSource for FlakySource<S> {
    fn read(&mut self, sensor: &SensorId, timestamp_ms: u64) -> Result<f64, SourceError> {
        if self.rng.gen_bool(self.failure_rate) {
            return Err(SourceError::new(sensor.as_str(), "simulated read timeout"));
        }
        self.inner.read(sensor, timestamp_ms)
    }
}

pub fn source_from_config(config: &TelemetryConfig) -> Box<dyn SampleSource> {
    let rate = config.source_failure_rate;
    match (config.source, rate > 0.0) {
        (SourceKind::Random, false) => Box::new(RandomSource::new()),
        (SourceKind::Random, true) => Box::new(FlakySource::new(RandomSource::new(), rate)),
        (SourceKind::Sine, false) => Box::new(SineSource::default()),
        (SourceKind::Sine, true) => Box::new(FlakySource::new(SineSource::default(), rate)),
    }
}

/// Produces one snapshot per call covering the configured sensors.
pub struct SampleGenerator {
    sensors: Vec<SensorId>,
    source: Box<dyn SampleSource>,
    diagnostics: Arc<PipelineDiagnostics>,
    last_timestamp: Option<u64>,
}

impl SampleGenerator {
    pub fn new(
        sensors: Vec<SensorId>,
        source: Box<dyn SampleSource>,
        diagnostics: Arc<PipelineDiagnostics>,
    ) -> Self {
        Self {
            sensors,
            source,
            diagnostics,
            last_timestamp: None,
        }
    }

    pub fn sensors(&self) -> &[SensorId] {
        &self.sensors
    }

    /// A failed read omits that sensor from this snapshot only. A clock
    /// reading at or before the previous snapshot is moved one millisecond
    /// past it, so consecutive snapshots never share a timestamp.
    pub fn sample(&mut self, timestamp_ms: u64) -> SensorSnapshot {
        let timestamp_ms = match self.last_timestamp {
            Some(last) if timestamp_ms <= last => last + 1,
            _ => timestamp_ms,
        };
        self.last_timestamp = Some(timestamp_ms);
        let mut readings = BTreeMap::new();
        for sensor in &self.sensors {
            match self.source.read(sensor, timestamp_ms) {
                Ok(value) if value.is_finite() => {
                    readings.insert(sensor.clone(), value);
                }
                Ok(value) => {
                    warn!(sensor = %sensor, value, "discarding non-finite reading");
                    self.diagnostics.record_source_failure();
                }
                Err(err) => {
                    warn!(error = %err, "sensor read failed");
                    self.diagnostics.record_source_failure();
                }
            }
        }
        self.diagnostics.record_snapshot();
        SensorSnapshot::new(timestamp_ms, readings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensor_ids;

    struct FailingSensor(&'static str);

    impl SampleSource for FailingSensor {
        fn read(&mut self, sensor: &SensorId, _timestamp_ms: u64) -> Result<f64, SourceError> {
            if sensor == self.0 {
                Err(SourceError::new(sensor.as_str(), "bus error"))
            } else {
                Ok(1.0)
            }
        }
    }

    #[test]
    fn snapshot_is_dense_over_configured_sensors() {
        let mut generator = SampleGenerator::new(
            sensor_ids(3),
            Box::new(RandomSource::with_seed(7)),
            Arc::default(),
        );
        let snapshot = generator.sample(1_234);
        assert_eq!(snapshot.timestamp, 1_234);
        assert_eq!(snapshot.readings.len(), 3);
        assert!(snapshot.readings.values().all(|v| (0.0..100.0).contains(v)));
    }

    #[test]
    fn read_failure_omits_only_that_sensor() {
        let diagnostics = Arc::new(PipelineDiagnostics::default());
        let mut generator = SampleGenerator::new(
            sensor_ids(3),
            Box::new(FailingSensor("sensor_1")),
            Arc::clone(&diagnostics),
        );
        let first = generator.sample(100);
        let second = generator.sample(200);
        assert_eq!(first.reading("sensor_1"), None);
        assert_eq!(first.reading("sensor_0"), Some(1.0));
        assert_eq!(second.readings.len(), 2);

        let counters = diagnostics.snapshot();
        assert_eq!(counters.snapshots_generated, 2);
        assert_eq!(counters.source_failures, 2);
    }

    #[test]
    fn repeated_clock_reading_still_advances_timestamp() {
        let mut generator = SampleGenerator::new(
            sensor_ids(1),
            Box::new(SineSource::default()),
            Arc::default(),
        );
        let stamps: Vec<u64> = [500, 500, 499, 700]
            .into_iter()
            .map(|t| generator.sample(t).timestamp)
            .collect();
        assert_eq!(stamps, vec![500, 501, 502, 700]);
    }

    #[test]
    fn flaky_source_at_full_rate_always_fails() {
        let mut source = FlakySource::with_rng(SineSource::default(), 1.0, StdRng::seed_from_u64(1));
        assert!(source.read(&"sensor_0".to_string(), 0).is_err());
    }

    #[test]
    fn sine_sensors_are_phase_shifted() {
        let mut source = SineSource::default();
        let a = source.read(&"sensor_0".to_string(), 0).unwrap();
        let b = source.read(&"sensor_1".to_string(), 0).unwrap();
        assert_eq!(a, 50.0);
        assert_ne!(a, b);
    }
}

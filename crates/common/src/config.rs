use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::retention::RetentionWindow;
use crate::{sensor_ids, SensorId};

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    #[default]
    Random,
    Sine,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TelemetryConfig {
    pub sensor_count: usize,
    pub sample_period_ms: u64,
    pub flush_period_ms: u64,
    pub listen_addr: String,
    pub allowed_origins: Vec<String>,
    pub subscriber_queue_capacity: usize,
    /// `None` keeps every pending snapshot; `Some(n)` drops the oldest past `n`.
    pub buffer_capacity: Option<usize>,
    pub source: SourceKind,
    pub source_failure_rate: f64,
    /// Minimum gap between redraws on the viewer side. 0 disables throttling.
    pub redraw_interval_ms: u64,
    pub default_retention: RetentionWindow,
    pub log_level: String,
    pub benchmark: BenchmarkConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct BenchmarkConfig {
    pub duration_secs: u64,
    pub subscribers: usize,
}

impl Default for BenchmarkConfig {
    fn default() -> Self {
        Self {
            duration_secs: 5,
            subscribers: 4,
        }
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            sensor_count: 3,
            sample_period_ms: 100,
            flush_period_ms: 500,
            listen_addr: "0.0.0.0:3000".to_string(),
            allowed_origins: vec!["http://localhost:4200".to_string()],
            subscriber_queue_capacity: 64,
            buffer_capacity: None,
            source: SourceKind::Random,
            source_failure_rate: 0.0,
            redraw_interval_ms: 250,
            default_retention: RetentionWindow::OneMinute,
            log_level: "info".to_string(),
            benchmark: BenchmarkConfig::default(),
        }
    }
}

/// Reads a config file, applies `TELEMETRY_*` environment overrides and
/// validates the result.
pub fn load_config(path: impl AsRef<Path>) -> Result<TelemetryConfig, ConfigError> {
    let mut config = TelemetryConfig::from_file(path)?;
    config.apply_env()?;
    config.validate()?;
    Ok(config)
}

impl TelemetryConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|var| env::var(var).ok())
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(v) = lookup("TELEMETRY_SENSOR_COUNT") {
            self.sensor_count = parse_env("TELEMETRY_SENSOR_COUNT", v)?;
        }
        if let Some(v) = lookup("TELEMETRY_SAMPLE_PERIOD_MS") {
            self.sample_period_ms = parse_env("TELEMETRY_SAMPLE_PERIOD_MS", v)?;
        }
        if let Some(v) = lookup("TELEMETRY_FLUSH_PERIOD_MS") {
            self.flush_period_ms = parse_env("TELEMETRY_FLUSH_PERIOD_MS", v)?;
        }
        if let Some(v) = lookup("TELEMETRY_LISTEN_ADDR") {
            self.listen_addr = v;
        }
        if let Some(v) = lookup("TELEMETRY_ALLOWED_ORIGINS") {
            self.allowed_origins = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(v) = lookup("TELEMETRY_LOG_LEVEL") {
            self.log_level = v;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sensor_count == 0 {
            return Err(ConfigError::Invalid("sensor_count must be at least 1".into()));
        }
        if self.sample_period_ms == 0 || self.flush_period_ms == 0 {
            return Err(ConfigError::Invalid("periods must be non-zero".into()));
        }
        if self.subscriber_queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "subscriber_queue_capacity must be at least 1".into(),
            ));
        }
        if self.buffer_capacity == Some(0) {
            return Err(ConfigError::Invalid("buffer_capacity must be at least 1".into()));
        }
        if !(0.0..=1.0).contains(&self.source_failure_rate) {
            return Err(ConfigError::Invalid(
                "source_failure_rate must be within [0, 1]".into(),
            ));
        }
        Ok(())
    }

    pub fn sensor_ids(&self) -> Vec<SensorId> {
        sensor_ids(self.sensor_count)
    }

    pub fn sample_period(&self) -> Duration {
        Duration::from_millis(self.sample_period_ms)
    }

    pub fn flush_period(&self) -> Duration {
        Duration::from_millis(self.flush_period_ms)
    }

    pub fn redraw_interval(&self) -> Option<Duration> {
        (self.redraw_interval_ms > 0).then(|| Duration::from_millis(self.redraw_interval_ms))
    }
}

fn parse_env<T: std::str::FromStr>(var: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::Env { var, value })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn partial_file_falls_back_to_defaults() {
        let config = TelemetryConfig::from_toml("sensor_count = 100\n").unwrap();
        assert_eq!(config.sensor_count, 100);
        assert_eq!(config.sample_period_ms, 100);
        assert_eq!(config.flush_period_ms, 500);
        assert_eq!(config.default_retention, RetentionWindow::OneMinute);
        assert_eq!(config.redraw_interval(), Some(Duration::from_millis(250)));
    }

    #[test]
    fn nested_tables_and_named_windows_parse() {
        let config = TelemetryConfig::from_toml(
            r#"
            source = "sine"
            default_retention = "5m"
            buffer_capacity = 32
            allowed_origins = ["*"]

            [benchmark]
            subscribers = 10
            "#,
        )
        .unwrap();
        assert_eq!(config.source, SourceKind::Sine);
        assert_eq!(config.default_retention, RetentionWindow::FiveMinutes);
        assert_eq!(config.buffer_capacity, Some(32));
        assert_eq!(config.benchmark.subscribers, 10);
        assert_eq!(config.benchmark.duration_secs, 5);
    }

    #[test]
    fn overrides_replace_file_values() {
        let vars: HashMap<&str, &str> = [
            ("TELEMETRY_SENSOR_COUNT", "7"),
            ("TELEMETRY_ALLOWED_ORIGINS", "http://a.test, http://b.test"),
        ]
        .into_iter()
        .collect();
        let mut config = TelemetryConfig::default();
        config
            .apply_overrides(|k| vars.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.sensor_count, 7);
        assert_eq!(config.allowed_origins, vec!["http://a.test", "http://b.test"]);
    }

    #[test]
    fn bad_override_is_reported() {
        let mut config = TelemetryConfig::default();
        let err = config
            .apply_overrides(|k| (k == "TELEMETRY_FLUSH_PERIOD_MS").then(|| "soon".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Env { var: "TELEMETRY_FLUSH_PERIOD_MS", .. }));
    }

    #[test]
    fn validation_rejects_degenerate_values() {
        let mut config = TelemetryConfig::default();
        config.flush_period_ms = 0;
        assert!(config.validate().is_err());

        let mut config = TelemetryConfig::default();
        config.source_failure_rate = 1.5;
        assert!(config.validate().is_err());

        assert!(TelemetryConfig::default().validate().is_ok());
    }
}

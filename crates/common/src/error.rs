use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid value for {var}: {value:?}")]
    Env { var: &'static str, value: String },
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// A single sensor could not be read this tick. Never fatal.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("failed to read {sensor}: {reason}")]
pub struct SourceError {
    pub sensor: String,
    pub reason: String,
}

impl SourceError {
    pub fn new(sensor: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            sensor: sensor.into(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("subscriber channel closed")]
    Closed,
    #[error("subscriber queue full")]
    Full,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("batch contains no snapshots")]
    EmptyBatch,
    #[error("snapshot {index} is older than its predecessor")]
    OutOfOrder { index: usize },
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown retention window {0:?} (expected one of 30s, 1m, 5m, 1h, 1d, 1w, 1mo, 1y, 5y)")]
pub struct RetentionParseError(pub String);

//! Messages carried over the subscriber transport.
//!
//! Outbound: `{"event":"sensor-data-batch","data":[{"timestamp":..,"sensors":{..}}]}`.
//! Inbound `subscribe`/`unsubscribe` requests are part of the contract but the
//! producer does not act on them: every subscriber receives the full batch.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::{SensorBatch, SensorId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerEvent {
    SensorDataBatch(Arc<SensorBatch>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorSubscription {
    pub sensor_ids: Vec<SensorId>,
    /// Epoch milliseconds.
    pub start_time: u64,
    /// Absent means live.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<u64>,
}

impl SensorSubscription {
    pub fn is_live(&self) -> bool {
        self.end_time.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "lowercase")]
pub enum ClientMessage {
    Subscribe(SensorSubscription),
    Unsubscribe(SensorSubscription),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SensorSnapshot;
    use std::collections::BTreeMap;

    #[test]
    fn batch_event_uses_kebab_case_name() {
        let mut readings = BTreeMap::new();
        readings.insert("sensor_2".to_string(), 9.5);
        let batch = SensorBatch::new(vec![SensorSnapshot::new(10, readings)]).unwrap();
        let json = serde_json::to_value(ServerEvent::SensorDataBatch(Arc::new(batch))).unwrap();
        assert_eq!(json["event"], "sensor-data-batch");
        assert_eq!(json["data"][0]["sensors"]["sensor_2"], 9.5);
    }

    #[test]
    fn subscribe_message_parses_camel_case_fields() {
        let raw = r#"{"event":"subscribe","data":{"sensorIds":["sensor_0"],"startTime":1711380200000}}"#;
        let msg: ClientMessage = serde_json::from_str(raw).unwrap();
        match msg {
            ClientMessage::Subscribe(sub) => {
                assert_eq!(sub.sensor_ids, vec!["sensor_0"]);
                assert_eq!(sub.start_time, 1_711_380_200_000);
                assert!(sub.is_live());
            }
            other => panic!("unexpected message {other:?}"),
        }
    }
}

//! Wire topic/payload <-> typed field mapping.
//!
//! Numeric topics carry decimal ASCII text, status topics carry `ON`/`OFF`.
//! Anything that does not decode is dropped without touching state.

use std::collections::HashMap;
use std::sync::OnceLock;

use thiserror::Error;

use crate::state::{FieldUpdate, Relay, SensorKey};
use crate::topics;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TopicField {
    Numeric(SensorKey),
    RelayStatus(Relay),
    DrainMode,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("no field mapped to topic {0}")]
    UnknownTopic(String),
    #[error("payload on {0} is not UTF-8")]
    NotUtf8(String),
    #[error("payload on {topic} is not a number: {payload:?}")]
    NotNumeric { topic: String, payload: String },
}

const TOPIC_FIELDS: [(&str, TopicField); 13] = [
    (topics::SENSOR_WATER, TopicField::Numeric(SensorKey::WaterLevel)),
    (topics::SENSOR_TEMP, TopicField::Numeric(SensorKey::Temperature)),
    (topics::SENSOR_HUMIDITY, TopicField::Numeric(SensorKey::Humidity)),
    (topics::SENSOR_AIR, TopicField::Numeric(SensorKey::AirQuality)),
    (topics::KURAS_STATUS, TopicField::DrainMode),
    (topics::RELAY_1_STATUS, TopicField::RelayStatus(Relay::Condenser)),
    (topics::RELAY_2_STATUS, TopicField::RelayStatus(Relay::WaterPump)),
    (topics::POWER_VOLTAGE, TopicField::Numeric(SensorKey::Voltage)),
    (topics::POWER_CURRENT, TopicField::Numeric(SensorKey::Current)),
    (topics::POWER_POWER, TopicField::Numeric(SensorKey::Power)),
    (topics::POWER_ENERGY, TopicField::Numeric(SensorKey::Energy)),
    (topics::POWER_PF, TopicField::Numeric(SensorKey::PowerFactor)),
    (topics::POWER_FREQUENCY, TopicField::Numeric(SensorKey::Frequency)),
];

fn topic_table() -> &'static HashMap<&'static str, TopicField> {
    static TABLE: OnceLock<HashMap<&'static str, TopicField>> = OnceLock::new();
    TABLE.get_or_init(|| TOPIC_FIELDS.iter().copied().collect())
}

/// Decode an inbound message, or `None` when it should be ignored.
pub fn decode(topic: &str, payload: &[u8]) -> Option<FieldUpdate> {
    try_decode(topic, payload).ok()
}

pub fn try_decode(topic: &str, payload: &[u8]) -> Result<FieldUpdate, DecodeError> {
    let field = topic_table()
        .get(topic)
        .copied()
        .ok_or_else(|| DecodeError::UnknownTopic(topic.to_string()))?;
    let text = std::str::from_utf8(payload).map_err(|_| DecodeError::NotUtf8(topic.to_string()))?;

    match field {
        TopicField::Numeric(key) => parse_number(text)
            .map(|v| FieldUpdate::Sensor(key, v))
            .ok_or_else(|| DecodeError::NotNumeric {
                topic: topic.to_string(),
                payload: text.to_string(),
            }),
        TopicField::RelayStatus(relay) => Ok(FieldUpdate::Relay(relay, is_on(text))),
        TopicField::DrainMode => Ok(FieldUpdate::DrainMode(is_on(text))),
    }
}

fn parse_number(text: &str) -> Option<f64> {
    text.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

// Only the exact literal counts; "on", "1" and "" all read as off.
fn is_on(text: &str) -> bool {
    text == "ON"
}

pub fn on_off(on: bool) -> &'static str {
    if on { "ON" } else { "OFF" }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_catalog_topic_decodes() {
        for topic in topics::DASHBOARD_SUBSCRIPTIONS {
            let payload: &[u8] = if topic.ends_with("/status") { b"ON" } else { b"1.5" };
            assert!(decode(topic, payload).is_some(), "{topic} did not decode");
        }
    }

    #[test]
    fn voltage_scenario() {
        assert_eq!(
            decode("pzem004t/voltage", b"231.47"),
            Some(FieldUpdate::Sensor(SensorKey::Voltage, 231.47))
        );
    }

    #[test]
    fn numeric_garbage_is_rejected() {
        let payloads: [&[u8]; 6] = [b"abc", b"", b"NaN", b"inf", b"12abc", &[0xff, 0xfe]];
        for payload in payloads {
            assert_eq!(decode(topics::SENSOR_TEMP, payload), None);
        }
        assert!(matches!(
            try_decode(topics::SENSOR_TEMP, b"warm"),
            Err(DecodeError::NotNumeric { .. })
        ));
    }

    #[test]
    fn numeric_accepts_surrounding_whitespace() {
        assert_eq!(
            decode(topics::SENSOR_WATER, b" 42\n"),
            Some(FieldUpdate::Sensor(SensorKey::WaterLevel, 42.0))
        );
        assert_eq!(
            decode(topics::POWER_PF, b"-0.5"),
            Some(FieldUpdate::Sensor(SensorKey::PowerFactor, -0.5))
        );
    }

    #[test]
    fn only_exact_on_is_true() {
        assert_eq!(decode("relay/1/status", b"ON"), Some(FieldUpdate::Relay(Relay::Condenser, true)));
        let payloads: [&[u8]; 5] = [b"OFF", b"on", b"1", b"", b"ON "];
        for payload in payloads {
            assert_eq!(decode("relay/2/status", payload), Some(FieldUpdate::Relay(Relay::WaterPump, false)));
            assert_eq!(decode("kuras/status", payload), Some(FieldUpdate::DrainMode(false)));
        }
        assert_eq!(decode("kuras/status", b"ON"), Some(FieldUpdate::DrainMode(true)));
    }

    #[test]
    fn unknown_topics_are_ignored() {
        assert_eq!(decode("sensor/unknown", b"1"), None);
        assert_eq!(decode(topics::POWER_ENERGY_RESET, b"reset"), None);
        assert_eq!(
            try_decode("relay/3/status", b"ON"),
            Err(DecodeError::UnknownTopic("relay/3/status".into()))
        );
    }
}

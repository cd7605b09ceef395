//! Inbound frame decoding.
//!
//! ```text
//! SENSOR:<type>:<value>   -> SensorReading (value as f64, or flagged unparsed)
//! STATUS:<key>:<value>    -> StatusUpdate
//! ERROR:<message>         -> ErrorEvent
//! anything else           -> RawMessage
//! ```

use crate::domain::models::{SensorValue, TelemetryEvent};

const SENSOR_PREFIX: &str = "SENSOR:";
const STATUS_PREFIX: &str = "STATUS:";
const ERROR_PREFIX: &str = "ERROR:";

/// Decode one frame. Never fails; anything malformed comes back as
/// [`TelemetryEvent::RawMessage`].
pub fn parse(frame: &str) -> TelemetryEvent {
    let frame = frame.trim();

    if let Some(rest) = frame.strip_prefix(SENSOR_PREFIX) {
        if let Some((sensor_type, value)) = split_pair(rest) {
            let value = match value.trim().parse::<f64>() {
                Ok(number) => SensorValue::Number(number),
                Err(_) => SensorValue::Unparsed(value.to_string()),
            };
            return TelemetryEvent::SensorReading {
                sensor_type: sensor_type.to_string(),
                value,
            };
        }
    } else if let Some(rest) = frame.strip_prefix(STATUS_PREFIX) {
        if let Some((key, value)) = split_pair(rest) {
            return TelemetryEvent::StatusUpdate {
                key: key.to_string(),
                value: value.to_string(),
            };
        }
    } else if let Some(message) = frame.strip_prefix(ERROR_PREFIX) {
        return TelemetryEvent::ErrorEvent {
            message: message.to_string(),
        };
    }

    TelemetryEvent::RawMessage {
        text: frame.to_string(),
    }
}

/// `<name>:<value>` with a non-empty name; the value keeps any further colons
fn split_pair(rest: &str) -> Option<(&str, &str)> {
    let (name, value) = rest.split_once(':')?;
    (!name.is_empty()).then_some((name, value))
}

//! Anomaly detection over the sensor reading stream.
//!
//! Three detectors run on every reading, always in the same order:
//! [`spike`] (stateless range check), [`drift`] (sustained out-of-range
//! tracking) and [`dropout`] (gap between readings). The [`engine`] drives
//! them and fans emitted events out to the bus and the anomaly log.

pub mod drift;
pub mod dropout;
pub mod engine;
pub mod spike;

pub use self::engine::DetectionEngine;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DetectError {
    #[error("malformed reading: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Failure while handing detected events to the outside world.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Detect(#[from] DetectError),
    #[error("failed to publish anomaly: {0}")]
    Publish(#[source] crate::bus::BusError),
    #[error("failed to append anomaly to log: {0}")]
    Append(#[source] anyhow::Error),
}

/// A monitored reading parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parameter {
    Temperature,
    Pressure,
    Flow,
}

impl Parameter {
    /// Every parameter, in detection order.
    pub const ALL: [Parameter; 3] = [Parameter::Temperature, Parameter::Pressure, Parameter::Flow];

    pub fn as_str(&self) -> &'static str {
        match self {
            Parameter::Temperature => "temperature",
            Parameter::Pressure => "pressure",
            Parameter::Flow => "flow",
        }
    }

    /// Capitalized name used in human-readable anomaly messages.
    pub fn label(&self) -> &'static str {
        match self {
            Parameter::Temperature => "Temperature",
            Parameter::Pressure => "Pressure",
            Parameter::Flow => "Flow",
        }
    }
}

impl std::fmt::Display for Parameter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One telemetry sample as published on the `readings` channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    pub timestamp: DateTime<Utc>,
    pub sensor_id: String,
    pub temperature: f64,
    pub pressure: f64,
    pub flow: f64,
}

impl SensorReading {
    /// Decode a JSON payload. Missing fields and bad timestamps are errors.
    pub fn from_json(payload: &str) -> Result<Self, DetectError> {
        Ok(serde_json::from_str(payload)?)
    }

    pub fn value(&self, param: Parameter) -> f64 {
        match param {
            Parameter::Temperature => self.temperature,
            Parameter::Pressure => self.pressure,
            Parameter::Flow => self.flow,
        }
    }
}

/// Classification of a detected anomaly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnomalyKind {
    Spike,
    Drift,
    Dropout,
}

impl std::fmt::Display for AnomalyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AnomalyKind::Spike => write!(f, "spike"),
            AnomalyKind::Drift => write!(f, "drift"),
            AnomalyKind::Dropout => write!(f, "dropout"),
        }
    }
}

/// A classified anomaly, immutable once emitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyEvent {
    #[serde(rename = "type")]
    pub kind: AnomalyKind,
    pub timestamp: DateTime<Utc>,
    pub sensor_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameter: Option<Parameter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<f64>,
    pub message: String,
}

impl AnomalyEvent {
    pub fn spike(reading: &SensorReading, param: Parameter, value: f64) -> Self {
        Self {
            kind: AnomalyKind::Spike,
            timestamp: reading.timestamp,
            sensor_id: reading.sensor_id.clone(),
            parameter: Some(param),
            value: Some(value),
            duration_seconds: None,
            message: format!("{} spike detected: {:?}", param.label(), value),
        }
    }

    pub fn drift(reading: &SensorReading, param: Parameter, value: f64, duration: f64) -> Self {
        Self {
            kind: AnomalyKind::Drift,
            timestamp: reading.timestamp,
            sensor_id: reading.sensor_id.clone(),
            parameter: Some(param),
            value: Some(value),
            duration_seconds: Some(duration),
            message: format!("{} drift detected for {:.1}s", param.label(), duration),
        }
    }

    pub fn dropout(reading: &SensorReading, gap: f64) -> Self {
        Self {
            kind: AnomalyKind::Dropout,
            timestamp: reading.timestamp,
            sensor_id: reading.sensor_id.clone(),
            parameter: None,
            value: None,
            duration_seconds: Some(gap),
            message: "Sensor dropout detected".to_string(),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(payload: &str) -> Result<Self, DetectError> {
        Ok(serde_json::from_str(payload)?)
    }
}

/// Seconds between two instants, to the microsecond.
pub(crate) fn seconds_between(earlier: DateTime<Utc>, later: DateTime<Utc>) -> f64 {
    let delta = later - earlier;
    match delta.num_microseconds() {
        Some(us) => us as f64 / 1_000_000.0,
        // only spans beyond ~292k years overflow microseconds
        None => delta.num_milliseconds() as f64 / 1000.0,
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::SensorReading;
    use chrono::{DateTime, Duration, TimeZone, Utc};

    pub fn t(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap() + Duration::seconds(secs)
    }

    pub fn t_micros(micros: i64) -> DateTime<Utc> {
        t(0) + Duration::microseconds(micros)
    }

    /// A reading at `t(secs)` with every parameter inside its default ranges.
    pub fn normal(secs: i64) -> SensorReading {
        SensorReading {
            timestamp: t(secs),
            sensor_id: "wtf-pipe-1".to_string(),
            temperature: 22.0,
            pressure: 2.0,
            flow: 50.0,
        }
    }

    pub fn with_flow(secs: i64, flow: f64) -> SensorReading {
        SensorReading { flow, ..normal(secs) }
    }
}

#[cfg(test)]
mod tests {
    use super::testutil::*;
    use super::*;

    #[test]
    fn test_reading_parses_rfc3339_with_z() {
        let r = SensorReading::from_json(
            r#"{"timestamp":"2024-05-01T12:00:00Z","sensor_id":"wtf-pipe-1","temperature":21.5,"pressure":2.1,"flow":60.0}"#,
        )
        .unwrap();
        assert_eq!(r.timestamp, t(0));
        assert_eq!(r.value(Parameter::Pressure), 2.1);
    }

    #[test]
    fn test_reading_missing_field_is_malformed() {
        let err = SensorReading::from_json(
            r#"{"timestamp":"2024-05-01T12:00:00Z","sensor_id":"x","temperature":21.5,"pressure":2.1}"#,
        )
        .unwrap_err();
        assert!(matches!(err, DetectError::Malformed(_)));
    }

    #[test]
    fn test_reading_bad_timestamp_is_malformed() {
        assert!(SensorReading::from_json(
            r#"{"timestamp":"yesterday","sensor_id":"x","temperature":1,"pressure":1,"flow":1}"#
        )
        .is_err());
    }

    #[test]
    fn test_dropout_event_omits_parameter_fields() {
        let event = AnomalyEvent::dropout(&normal(30), 30.0);
        let json: serde_json::Value = serde_json::from_str(&event.to_json().unwrap()).unwrap();

        assert_eq!(json["type"], "dropout");
        assert_eq!(json["duration_seconds"], 30.0);
        assert_eq!(json["message"], "Sensor dropout detected");
        assert!(json.get("parameter").is_none());
        assert!(json.get("value").is_none());
    }

    #[test]
    fn test_event_messages() {
        let r = with_flow(0, 5.0);
        assert_eq!(
            AnomalyEvent::spike(&r, Parameter::Flow, 5.0).message,
            "Flow spike detected: 5.0"
        );
        assert_eq!(
            AnomalyEvent::spike(&r, Parameter::Temperature, 45.0).message,
            "Temperature spike detected: 45.0"
        );
        assert_eq!(
            AnomalyEvent::spike(&r, Parameter::Pressure, 4.25).message,
            "Pressure spike detected: 4.25"
        );
        assert_eq!(
            AnomalyEvent::drift(&r, Parameter::Flow, 5.0, 16.0).message,
            "Flow drift detected for 16.0s"
        );
    }

    #[test]
    fn test_seconds_between_keeps_sub_millisecond_precision() {
        assert_eq!(seconds_between(t(0), t_micros(15_000_500)), 15.0005);
        assert_eq!(seconds_between(t(0), t_micros(10_000_900)), 10.0009);
        assert_eq!(seconds_between(t(0), t_micros(1)), 0.000001);
    }

    #[test]
    fn test_event_json_decodes_back() {
        let event = AnomalyEvent::drift(&with_flow(16, 5.0), Parameter::Flow, 5.0, 16.0);
        let back = AnomalyEvent::from_json(&event.to_json().unwrap()).unwrap();
        assert_eq!(back, event);
    }
}

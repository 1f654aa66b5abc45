//! Telemetry sample types.
//!
//! These types match the JSON frames produced by the vitals feed. They are
//! the common data format between the transport and every consumer.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// One vital-sign reading received from the feed.
///
/// Samples are immutable once received; each new sample supersedes the
/// previous one rather than being merged into it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySample {
    /// Heart rate in beats per minute.
    pub heart_rate: f64,

    /// Blood pressure, serialized as `"systolic/diastolic"`.
    pub bp: BloodPressure,

    /// Signal accuracy percentage in `[0, 100]`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f64>,
}

impl TelemetrySample {
    /// Create a sample without an accuracy reading.
    pub fn new(heart_rate: f64, bp: BloodPressure) -> Self {
        Self {
            heart_rate,
            bp,
            accuracy: None,
        }
    }

    /// Attach an accuracy reading.
    pub fn with_accuracy(mut self, accuracy: f64) -> Self {
        self.accuracy = Some(accuracy);
        self
    }
}

/// A blood pressure reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BloodPressure {
    pub systolic: u16,
    pub diastolic: u16,
}

impl BloodPressure {
    pub fn new(systolic: u16, diastolic: u16) -> Self {
        Self {
            systolic,
            diastolic,
        }
    }
}

impl fmt::Display for BloodPressure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.systolic, self.diastolic)
    }
}

impl FromStr for BloodPressure {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (systolic, diastolic) = s
            .trim()
            .split_once('/')
            .ok_or_else(|| format!("blood pressure '{}' is not systolic/diastolic", s))?;

        let systolic = systolic
            .trim()
            .parse()
            .map_err(|e| format!("invalid systolic value '{}': {}", systolic, e))?;
        let diastolic = diastolic
            .trim()
            .parse()
            .map_err(|e| format!("invalid diastolic value '{}': {}", diastolic, e))?;

        Ok(Self {
            systolic,
            diastolic,
        })
    }
}

impl TryFrom<String> for BloodPressure {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<BloodPressure> for String {
    fn from(bp: BloodPressure) -> Self {
        bp.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blood_pressure_parse() {
        let bp: BloodPressure = "120/80".parse().unwrap();
        assert_eq!(bp, BloodPressure::new(120, 80));
        assert_eq!(bp.to_string(), "120/80");
    }

    #[test]
    fn test_blood_pressure_rejects_garbage() {
        assert!("120".parse::<BloodPressure>().is_err());
        assert!("abc/80".parse::<BloodPressure>().is_err());
        assert!("120/-4".parse::<BloodPressure>().is_err());
    }

    #[test]
    fn test_sample_serializes_bp_as_string() {
        let sample = TelemetrySample::new(72.0, BloodPressure::new(118, 76)).with_accuracy(83.2);
        let json = serde_json::to_value(&sample).unwrap();
        assert_eq!(json["bp"], "118/76");
        assert_eq!(json["heart_rate"], 72.0);
        assert_eq!(json["accuracy"], 83.2);
    }

    #[test]
    fn test_sample_omits_missing_accuracy() {
        let sample = TelemetrySample::new(90.0, BloodPressure::new(110, 70));
        let json = serde_json::to_value(&sample).unwrap();
        assert!(json.get("accuracy").is_none());
    }
}

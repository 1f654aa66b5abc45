//! Rolling heart-rate history for charting.

use std::collections::VecDeque;

use chrono::Local;
use serde::Serialize;

use crate::source::TelemetrySample;

/// Maximum number of points kept in the history.
pub const HISTORY_CAPACITY: usize = 16;

/// One charted point, derived from a sample when it arrived.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryPoint {
    /// Capture time, formatted `HH:MM:SS` in local time.
    pub timestamp: String,
    /// Heart rate at capture time.
    pub value: f64,
}

/// A bounded, arrival-ordered series of [`HistoryPoint`]s.
///
/// Appending beyond [`HISTORY_CAPACITY`] evicts the oldest point.
#[derive(Debug, Clone)]
pub struct RollingHistory {
    points: VecDeque<HistoryPoint>,
}

impl Default for RollingHistory {
    fn default() -> Self {
        Self::new()
    }
}

impl RollingHistory {
    /// Create a new empty history.
    pub fn new() -> Self {
        Self {
            points: VecDeque::with_capacity(HISTORY_CAPACITY + 1),
        }
    }

    /// Record a sample, stamped with the current local time.
    pub fn append(&mut self, sample: &TelemetrySample) {
        let timestamp = Local::now().format("%H:%M:%S").to_string();
        self.append_at(sample, timestamp);
    }

    /// Record a sample with an explicit capture timestamp.
    pub fn append_at(&mut self, sample: &TelemetrySample, timestamp: impl Into<String>) {
        self.points.push_back(HistoryPoint {
            timestamp: timestamp.into(),
            value: sample.heart_rate,
        });
        while self.points.len() > HISTORY_CAPACITY {
            self.points.pop_front();
        }
    }

    /// Copy of the current series, oldest first.
    pub fn snapshot(&self) -> Vec<HistoryPoint> {
        self.points.iter().cloned().collect()
    }

    /// Heart-rate values only, oldest first.
    pub fn values(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.value).collect()
    }

    /// The most recent point.
    pub fn latest(&self) -> Option<&HistoryPoint> {
        self.points.back()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

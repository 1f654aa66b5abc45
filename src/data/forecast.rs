//! Short-term trend forecast derived from the rolling history.

use serde::Serialize;

use super::HistoryPoint;

/// Heart rate assumed when there is no history yet.
const DEFAULT_MEAN_HEART_RATE: f64 = 75.0;

/// Mean heart rate that corresponds to a 100% spike risk.
const SPIKE_REFERENCE_HEART_RATE: f64 = 115.0;

/// Spike risk is never reported above this.
const MAX_SPIKE_RISK: f64 = 99.0;

/// Spike risk above which the forecast is critical.
const CRITICAL_SPIKE_RISK: f64 = 80.0;

/// Overall risk classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RiskLevel {
    Moderate,
    Critical,
}

impl RiskLevel {
    pub fn label(&self) -> &'static str {
        match self {
            RiskLevel::Moderate => "Moderate",
            RiskLevel::Critical => "CRITICAL",
        }
    }
}

/// Spike-risk forecast for the next half hour.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Forecast {
    /// Mean heart rate over the history window.
    pub mean_heart_rate: f64,
    /// Spike probability in percent, one decimal.
    pub spike_risk_pct: f64,
    pub risk_level: RiskLevel,
}

impl Forecast {
    /// Compute the forecast over a history snapshot.
    pub fn from_history(points: &[HistoryPoint]) -> Self {
        let mean_heart_rate = if points.is_empty() {
            DEFAULT_MEAN_HEART_RATE
        } else {
            points.iter().map(|p| p.value).sum::<f64>() / points.len() as f64
        };

        let raw = (mean_heart_rate / SPIKE_REFERENCE_HEART_RATE * 100.0).min(MAX_SPIKE_RISK);
        let spike_risk_pct = (raw * 10.0).round() / 10.0;

        let risk_level = if spike_risk_pct > CRITICAL_SPIKE_RISK {
            RiskLevel::Critical
        } else {
            RiskLevel::Moderate
        };

        Self {
            mean_heart_rate,
            spike_risk_pct,
            risk_level,
        }
    }

    /// Whether the forecast calls for a visual alert.
    pub fn is_alert(&self) -> bool {
        self.risk_level == RiskLevel::Critical
    }

    pub fn recommendation(&self) -> &'static str {
        match self.risk_level {
            RiskLevel::Critical => "IMMEDIATE REVIEW REQUIRED",
            RiskLevel::Moderate => "Maintain settings.",
        }
    }
}

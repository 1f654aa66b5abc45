//! Error types for the telemetry pipeline.
//!
//! None of these are fatal: every one of them is logged and then absorbed
//! by the component that produced it.

use thiserror::Error;

/// Errors produced while decoding a single inbound frame.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DecodeError {
    /// The frame is not a valid telemetry sample.
    #[error("Malformed frame: {reason}")]
    MalformedFrame { reason: String },
}

impl DecodeError {
    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        DecodeError::MalformedFrame {
            reason: reason.into(),
        }
    }
}

/// Errors that can occur when calling the remote stability scorer.
///
/// Every variant is handled by falling back to the local heuristic.
#[derive(Debug, Error)]
pub enum ScoringError {
    /// The scorer could not be reached.
    #[error("Scoring service unavailable: {0}")]
    Unavailable(String),

    /// Timeout waiting for the scorer.
    #[error("Scoring request timed out")]
    Timeout,

    /// The scorer answered with a non-success status.
    #[error("Scoring request failed: {0}")]
    Http(String),

    /// The response body did not contain a numeric score.
    #[error("Failed to parse scoring response: {0}")]
    Parse(String),
}

impl From<reqwest::Error> for ScoringError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ScoringError::Timeout
        } else if err.is_connect() {
            ScoringError::Unavailable(err.to_string())
        } else if err.is_decode() {
            ScoringError::Parse(err.to_string())
        } else {
            ScoringError::Http(err.to_string())
        }
    }
}

/// Errors from starting a progress simulation run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SimulationError {
    /// There is no tokio runtime to drive the tick timer.
    #[error("Progress simulation requires a tokio runtime")]
    NoRuntime,
}

/// A subscriber callback failed during a broadcast.
#[derive(Debug, Error)]
pub enum SubscriberError {
    /// The callback returned an error.
    #[error("Subscriber {id} failed: {source}")]
    Failed {
        id: u64,
        #[source]
        source: anyhow::Error,
    },

    /// The callback panicked.
    #[error("Subscriber {id} panicked: {message}")]
    Panicked { id: u64, message: String },
}

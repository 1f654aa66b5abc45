//! Stability scoring with a local fallback.
//!
//! The score is requested from a remote scorer for every sample. When the
//! scorer cannot be reached, times out, or answers with garbage, a
//! deterministic local heuristic is used instead and the failure is only
//! logged.
//!
//! ## Example
//!
//! ```rust,no_run
//! use vitalwatch::{BloodPressure, StabilityClient, TelemetrySample};
//!
//! #[tokio::main]
//! async fn main() {
//!     let client = StabilityClient::builder()
//!         .endpoint("http://127.0.0.1:8000/neural-sync/stability")
//!         .build();
//!
//!     let sample = TelemetrySample::new(112.0, BloodPressure::new(128, 84));
//!     let score = client.compute_stability(&sample).await;
//!     println!("Stability: {}", score);
//! }
//! ```

use std::fmt;
use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::ScoringError;
use crate::source::TelemetrySample;

/// Heart rate above which the local heuristic reports reduced stability.
const ELEVATED_HEART_RATE: f64 = 100.0;

/// Local heuristic score for an elevated heart rate.
const ELEVATED_SCORE: f64 = 65.0;

/// Local heuristic score otherwise.
const NORMAL_SCORE: f64 = 88.0;

/// A stability score in `[0, 100]`.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize)]
pub struct StabilityScore(f64);

impl StabilityScore {
    /// The score shown before any sample has been scored.
    pub const INITIAL: StabilityScore = StabilityScore(NORMAL_SCORE);

    /// Build a score, clamping into `[0, 100]`. Returns `None` for NaN.
    pub fn new(value: f64) -> Option<Self> {
        if value.is_nan() {
            None
        } else {
            Some(Self(value.clamp(0.0, 100.0)))
        }
    }

    pub fn value(&self) -> f64 {
        self.0
    }
}

impl Default for StabilityScore {
    fn default() -> Self {
        Self::INITIAL
    }
}

impl fmt::Display for StabilityScore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.1}", self.0)
    }
}

/// The local heuristic: 65 when the heart rate exceeds 100, else 88.
pub fn fallback_score(sample: &TelemetrySample) -> StabilityScore {
    if sample.heart_rate > ELEVATED_HEART_RATE {
        StabilityScore(ELEVATED_SCORE)
    } else {
        StabilityScore(NORMAL_SCORE)
    }
}

#[derive(Serialize)]
struct ScoreRequest<'a> {
    vitals: &'a TelemetrySample,
}

#[derive(Deserialize)]
struct ScoreResponse {
    score: f64,
}

/// Client for the remote stability scorer.
#[derive(Debug, Clone)]
pub struct StabilityClient {
    client: Client,
    endpoint: String,
    timeout: Duration,
}

impl StabilityClient {
    /// Create a new builder for configuring the client.
    pub fn builder() -> StabilityClientBuilder {
        StabilityClientBuilder::default()
    }

    /// Score a sample. Never fails.
    ///
    /// Remote scores outside `[0, 100]` are clamped; any remote failure
    /// yields [`fallback_score`].
    pub async fn compute_stability(&self, sample: &TelemetrySample) -> StabilityScore {
        match self.request_score(sample).await {
            Ok(raw) => match StabilityScore::new(raw) {
                Some(score) => {
                    if score.value() != raw {
                        warn!(
                            score = raw,
                            "Remote contract violation: score outside [0, 100], clamping"
                        );
                    }
                    debug!(score = score.value(), "Adopted remote stability score");
                    score
                }
                None => {
                    warn!("Remote contract violation: score is not a number, using local heuristic");
                    fallback_score(sample)
                }
            },
            Err(e) => {
                warn!(
                    endpoint = %self.endpoint,
                    "Stability scorer unavailable, using local heuristic: {}",
                    e
                );
                fallback_score(sample)
            }
        }
    }

    /// Ask the remote scorer for a raw score.
    pub async fn request_score(&self, sample: &TelemetrySample) -> Result<f64, ScoringError> {
        let response = self
            .client
            .post(&self.endpoint)
            .timeout(self.timeout)
            .json(&ScoreRequest { vitals: sample })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ScoringError::Http(format!(
                "scorer returned status {}",
                response.status()
            )));
        }

        let body: ScoreResponse = response
            .json()
            .await
            .map_err(|e| ScoringError::Parse(e.to_string()))?;

        Ok(body.score)
    }

    /// The configured scorer endpoint.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

/// Builder for StabilityClient.
#[derive(Debug, Default)]
pub struct StabilityClientBuilder {
    endpoint: Option<String>,
    timeout: Option<Duration>,
}

impl StabilityClientBuilder {
    /// Set the scorer endpoint (e.g., "http://127.0.0.1:8000/neural-sync/stability").
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Set the request timeout (default: 5 seconds).
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Build the client.
    pub fn build(self) -> StabilityClient {
        StabilityClient {
            client: Client::new(),
            endpoint: self
                .endpoint
                .unwrap_or_else(|| crate::config::DEFAULT_SCORING_URL.to_string()),
            timeout: self.timeout.unwrap_or(Duration::from_secs(5)),
        }
    }
}

//! Derived views over the telemetry stream.
//!
//! ## Submodules
//!
//! - [`duration`]: Parsing and formatting of interval strings (e.g., "3s", "150ms")
//! - [`history`]: Bounded heart-rate history for charting
//! - [`forecast`]: Spike-risk forecast over the history window
//! - [`stability`]: Remote stability scoring with a local fallback
//!
//! ## Data Flow
//!
//! ```text
//! TelemetrySample
//!        │
//!        ├──▶ RollingHistory::append() ──▶ Forecast::from_history()
//!        │
//!        └──▶ StabilityClient::compute_stability() ──▶ StabilityScore
//! ```

pub mod duration;
pub mod forecast;
pub mod history;
pub mod stability;

pub use forecast::{Forecast, RiskLevel};
pub use history::{HistoryPoint, RollingHistory, HISTORY_CAPACITY};
pub use stability::{fallback_score, StabilityClient, StabilityClientBuilder, StabilityScore};

//! # vitalwatch
//!
//! A self-healing client for live vital-sign telemetry.
//!
//! This crate keeps a WebSocket connection to a vitals feed alive, decodes
//! each frame into a typed [`TelemetrySample`], fans samples out to any
//! number of subscribers, and derives the views a monitoring dashboard
//! needs: a bounded heart-rate history, a stability score (remote, with a
//! local fallback) and a short-term spike-risk forecast. A standalone
//! progress simulation engine and a simulated feed server round it out.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                            Dashboard                             │
//! │                                                                  │
//! │  ┌───────────┐   ┌─────────┐   ┌──────────┐   ┌───────────────┐  │
//! │  │ transport │──▶│  codec  │──▶│ registry │──▶│ history       │  │
//! │  │ (socket)  │   │(decode) │   │ (fan-out)│   ├───────────────┤  │
//! │  └─────▲─────┘   └─────────┘   └────┬─────┘   │ stability     │  │
//! │        │ reconnect                  │         ├───────────────┤  │
//! │        └─ every 3s                  └────────▶│ UI consumers  │  │
//! │                                               └───────────────┘  │
//! │  ┌────────────┐                                                  │
//! │  │ simulation │  (standalone, started on demand)                 │
//! │  └────────────┘                                                  │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! - **[`source`]**: Frame codec, subscriber registry and the reconnecting transport
//! - **[`data`]**: Rolling history, forecast, stability scoring and duration parsing
//! - **[`simulation`]**: Timer-driven progress engine with a staged log
//! - **[`feed`]**: Simulated vitals feed server for local testing
//! - **[`app`]**: [`Dashboard`], which wires everything above together
//! - **[`config`]**: Layered settings (defaults, TOML file, environment)
//!
//! ## Usage
//!
//! ### As a CLI tool
//!
//! ```bash
//! # Run a simulated feed
//! vitalwatch serve
//!
//! # Watch it
//! vitalwatch monitor --config vitalwatch.toml -v
//! ```
//!
//! ### As a library
//!
//! ```no_run
//! use vitalwatch::{ReconnectingTransport, SubscriberRegistry};
//!
//! # tokio_test::block_on(async {
//! let registry = SubscriberRegistry::new();
//! let subscription = registry.subscribe(|sample| {
//!     println!("HR {} BP {}", sample.heart_rate, sample.bp);
//!     Ok(())
//! });
//!
//! let transport = ReconnectingTransport::connect("ws://127.0.0.1:8000/ws/vitals", registry);
//! // ...
//! subscription.unsubscribe();
//! transport.shutdown().await;
//! # });
//! ```

pub mod app;
pub mod config;
pub mod data;
pub mod error;
pub mod feed;
pub mod logging;
pub mod simulation;
pub mod source;

// Re-export main types for convenience
pub use app::Dashboard;
pub use config::Settings;
pub use data::{
    fallback_score, Forecast, HistoryPoint, RiskLevel, RollingHistory, StabilityClient,
    StabilityScore, HISTORY_CAPACITY,
};
pub use error::{DecodeError, ScoringError, SimulationError, SubscriberError};
pub use feed::{FeedControl, FeedMode, FeedServer};
pub use simulation::{LogMapping, ProgressEngine, SimulationRun};
pub use source::{
    BloodPressure, ConnectionState, ReconnectingTransport, SubscriberRegistry, Subscription,
    TelemetrySample, TransportBuilder, RECONNECT_DELAY,
};

//! Live telemetry input.
//!
//! A [`ReconnectingTransport`] keeps a WebSocket connection to the vitals
//! feed alive, decodes each frame with [`codec`] and fans the resulting
//! [`TelemetrySample`] out to every callback in its [`SubscriberRegistry`].
//!
//! ```text
//! feed ──frame──▶ transport ──decode──▶ registry ──▶ subscriber 1
//!                                                ├─▶ subscriber 2
//!                                                └─▶ ...
//! ```

pub mod codec;
mod registry;
mod sample;
mod transport;

pub use registry::{SubscriberRegistry, Subscription};
pub use sample::{BloodPressure, TelemetrySample};
pub use transport::{ConnectionState, ReconnectingTransport, TransportBuilder, RECONNECT_DELAY};

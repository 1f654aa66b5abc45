//! In-process fan-out of telemetry samples.
//!
//! The registry owns the set of live consumer callbacks. A broadcast
//! delivers one sample to every callback, synchronously and in registration
//! order, on the task that received the frame.

use std::collections::BTreeMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use tracing::error;

use super::TelemetrySample;
use crate::error::SubscriberError;

type Callback = Arc<dyn Fn(&TelemetrySample) -> anyhow::Result<()> + Send + Sync>;

#[derive(Default)]
struct RegistryState {
    next_id: AtomicU64,
    /// Keyed by a monotonically increasing id, so iteration order is registration order.
    subscribers: RwLock<BTreeMap<u64, Callback>>,
}

/// A set of consumer callbacks that receive every decoded sample.
///
/// Cloning the registry yields another handle to the same set.
///
/// # Example
///
/// ```
/// use vitalwatch::{BloodPressure, SubscriberRegistry, TelemetrySample};
///
/// let registry = SubscriberRegistry::new();
/// let subscription = registry.subscribe(|sample| {
///     println!("heart rate: {}", sample.heart_rate);
///     Ok(())
/// });
///
/// registry.broadcast(&TelemetrySample::new(72.0, BloodPressure::new(120, 80)));
/// subscription.unsubscribe();
/// assert!(registry.is_empty());
/// ```
#[derive(Clone, Default)]
pub struct SubscriberRegistry {
    state: Arc<RegistryState>,
}

impl SubscriberRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a consumer.
    ///
    /// Returns the capability that removes exactly this consumer. Dropping
    /// the returned [`Subscription`] does not unsubscribe.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&TelemetrySample) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = self.state.next_id.fetch_add(1, Ordering::Relaxed);
        self.state.subscribers.write().insert(id, Arc::new(callback));

        Subscription {
            id,
            registry: Arc::downgrade(&self.state),
            active: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Deliver a sample to every registered consumer.
    ///
    /// Iterates over a snapshot of the membership taken when the broadcast
    /// starts, so callbacks may subscribe or unsubscribe freely. A failing
    /// callback is reported and does not stop delivery to the rest.
    ///
    /// Returns the number of callbacks that completed successfully.
    pub fn broadcast(&self, sample: &TelemetrySample) -> usize {
        let snapshot: Vec<(u64, Callback)> = self
            .state
            .subscribers
            .read()
            .iter()
            .map(|(id, callback)| (*id, callback.clone()))
            .collect();

        let mut delivered = 0;
        for (id, callback) in snapshot {
            match invoke(id, &callback, sample) {
                Ok(()) => delivered += 1,
                Err(e) => error!(subscriber = id, "{}", e),
            }
        }
        delivered
    }

    /// Number of registered consumers.
    pub fn len(&self) -> usize {
        self.state.subscribers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for SubscriberRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriberRegistry")
            .field("subscribers", &self.len())
            .finish()
    }
}

fn invoke(id: u64, callback: &Callback, sample: &TelemetrySample) -> Result<(), SubscriberError> {
    match panic::catch_unwind(AssertUnwindSafe(|| callback(sample))) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(source)) => Err(SubscriberError::Failed { id, source }),
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(SubscriberError::Panicked { id, message })
        }
    }
}

/// Capability to remove one consumer from a [`SubscriberRegistry`].
///
/// Clones share the same membership; unsubscribing through any of them is
/// idempotent.
#[derive(Clone)]
pub struct Subscription {
    id: u64,
    registry: Weak<RegistryState>,
    active: Arc<AtomicBool>,
}

impl Subscription {
    /// Remove this consumer. Later calls are no-ops.
    pub fn unsubscribe(&self) {
        if !self.active.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(state) = self.registry.upgrade() {
            state.subscribers.write().remove(&self.id);
        }
    }

    /// Whether this consumer is still registered.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire) && self.registry.strong_count() > 0
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}

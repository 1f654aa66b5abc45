//! Dashboard state wiring.
//!
//! [`Dashboard`] owns the transport and connects its registry to the
//! derived views: the rolling history, the latest vitals, the stability
//! score and the forecast. UI consumers read those through snapshot
//! accessors or `watch` receivers and may add their own subscribers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::config::Settings;
use crate::data::{Forecast, HistoryPoint, RollingHistory, StabilityClient, StabilityScore};
use crate::simulation::ProgressEngine;
use crate::source::{
    ConnectionState, ReconnectingTransport, SubscriberRegistry, Subscription, TelemetrySample,
};

/// Holds the most recently adopted stability score.
///
/// Scores are computed concurrently, one per sample, and can complete out
/// of order. A score is adopted only if no later sample's score has been
/// adopted already.
#[derive(Debug)]
struct ScoreBoard {
    newest: Mutex<u64>,
    score: watch::Sender<StabilityScore>,
}

impl ScoreBoard {
    fn new() -> Self {
        let (score, _) = watch::channel(StabilityScore::INITIAL);
        Self {
            newest: Mutex::new(0),
            score,
        }
    }

    /// Returns whether the score was adopted.
    fn adopt(&self, sequence: u64, score: StabilityScore) -> bool {
        let mut newest = self.newest.lock();
        if sequence <= *newest {
            debug!(sequence, newest = *newest, "Discarding stale stability score");
            return false;
        }
        *newest = sequence;
        self.score.send_replace(score);
        true
    }
}

/// Live view over one vitals feed.
///
/// # Example
///
/// ```rust,no_run
/// use vitalwatch::{Dashboard, Settings};
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let settings = Settings::load(None)?;
///     let dashboard = Dashboard::connect(&settings)?;
///
///     let mut connectivity = dashboard.watch_connectivity();
///     connectivity.changed().await?;
///     println!("{}", dashboard.connectivity());
///
///     dashboard.shutdown().await;
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct Dashboard {
    transport: ReconnectingTransport,
    history: Arc<Mutex<RollingHistory>>,
    vitals: watch::Receiver<Option<TelemetrySample>>,
    scores: Arc<ScoreBoard>,
    progress: ProgressEngine,
    subscriptions: Vec<Subscription>,
}

impl Dashboard {
    /// Wire up the derived views and start connecting to the feed.
    ///
    /// Must be called from within a tokio runtime.
    pub fn connect(settings: &Settings) -> Result<Self> {
        let runtime = Handle::try_current().context("Dashboard requires a tokio runtime")?;

        let scorer = StabilityClient::builder()
            .endpoint(settings.scoring.url.clone())
            .timeout(settings.scoring.timeout()?)
            .build();
        let progress = ProgressEngine::with_settings(
            settings.simulation.tick()?,
            settings.simulation.log_mapping,
        );

        let registry = SubscriberRegistry::new();
        let history = Arc::new(Mutex::new(RollingHistory::new()));
        let (vitals_tx, vitals) = watch::channel(None);
        let scores = Arc::new(ScoreBoard::new());

        // Subscribe before the transport starts so the first frame is seen
        let mut subscriptions = Vec::with_capacity(2);

        let sink = history.clone();
        subscriptions.push(registry.subscribe(move |sample| {
            sink.lock().append(sample);
            vitals_tx.send_replace(Some(sample.clone()));
            Ok(())
        }));

        let board = scores.clone();
        let sequence = Arc::new(AtomicU64::new(0));
        subscriptions.push(registry.subscribe(move |sample| {
            let seq = sequence.fetch_add(1, Ordering::Relaxed) + 1;
            let scorer = scorer.clone();
            let board = board.clone();
            let sample = sample.clone();
            runtime.spawn(async move {
                let score = scorer.compute_stability(&sample).await;
                board.adopt(seq, score);
            });
            Ok(())
        }));

        let transport = ReconnectingTransport::builder()
            .url(settings.feed.url.clone())
            .reconnect_delay(settings.feed.reconnect_delay()?)
            .build(registry);
        info!(feed = %settings.feed.url, scoring = %settings.scoring.url, "Dashboard started");

        Ok(Self {
            transport,
            history,
            vitals,
            scores,
            progress,
            subscriptions,
        })
    }

    pub fn connectivity(&self) -> ConnectionState {
        self.transport.state()
    }

    pub fn watch_connectivity(&self) -> watch::Receiver<ConnectionState> {
        self.transport.watch_state()
    }

    /// Snapshot of the rolling heart-rate history, oldest first.
    pub fn history(&self) -> Vec<HistoryPoint> {
        self.history.lock().snapshot()
    }

    /// Forecast over the current history.
    pub fn forecast(&self) -> Forecast {
        Forecast::from_history(&self.history())
    }

    /// The most recent sample, if any has arrived.
    pub fn latest_vitals(&self) -> Option<TelemetrySample> {
        self.vitals.borrow().clone()
    }

    pub fn watch_vitals(&self) -> watch::Receiver<Option<TelemetrySample>> {
        self.vitals.clone()
    }

    /// Current stability score; [`StabilityScore::INITIAL`] until the first
    /// sample has been scored.
    pub fn stability(&self) -> StabilityScore {
        *self.scores.score.borrow()
    }

    pub fn watch_stability(&self) -> watch::Receiver<StabilityScore> {
        self.scores.score.subscribe()
    }

    /// Register an additional consumer of every decoded sample.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&TelemetrySample) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.transport.registry().subscribe(callback)
    }

    /// Send a payload to the feed. Dropped unless connected.
    pub fn send<T: Serialize + ?Sized>(&self, payload: &T) {
        self.transport.send(payload);
    }

    pub fn progress(&self) -> &ProgressEngine {
        &self.progress
    }

    /// Stop the feed connection. Idempotent.
    pub fn close(&self) {
        self.transport.close();
    }

    /// Close and wait for the connection task to finish.
    pub async fn shutdown(self) {
        for subscription in &self.subscriptions {
            subscription.unsubscribe();
        }
        self.transport.shutdown().await;
    }
}

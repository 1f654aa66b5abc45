//! Simulated vitals feed.
//!
//! Serves a stream of synthetic vital-sign frames over WebSocket, one frame
//! per interval per client. Clients can switch the simulated patient between
//! normal, alert ("code blue") and stabilizing modes by sending a control
//! message on the same socket:
//!
//! ```text
//! {"command": "code_blue"}
//! {"command": "stabilize"}
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use crate::source::{BloodPressure, TelemetrySample};

/// Resting heart rate reported alongside every frame.
pub const BASELINE_HEART_RATE: u32 = 72;

/// Heart rate the stabilizing mode converges on.
pub const STABILIZATION_TARGET: u32 = 75;

const HEATMAP_SIZE: usize = 8;

/// Simulated patient condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FeedMode {
    /// Heart rate varies freely in 60..=110.
    #[default]
    Normal,
    /// Tachycardia, 120..=140.
    Alert,
    /// Heart rate walks toward [`STABILIZATION_TARGET`].
    Stabilizing,
}

/// Control messages accepted from clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum FeedControl {
    CodeBlue,
    Stabilize,
}

impl FeedControl {
    /// The mode this command switches to.
    pub fn mode(&self) -> FeedMode {
        match self {
            FeedControl::CodeBlue => FeedMode::Alert,
            FeedControl::Stabilize => FeedMode::Stabilizing,
        }
    }
}

/// One frame as sent on the wire.
///
/// Carries the sample plus extended fields that telemetry consumers ignore.
#[derive(Debug, Clone, Serialize)]
pub struct FeedFrame {
    #[serde(flatten)]
    pub sample: TelemetrySample,
    pub baseline_ghost: u32,
    pub system_alert: bool,
    pub intervention_active: bool,
    pub neural_heatmap: Vec<Vec<f64>>,
}

/// Produces successive frames for one client.
#[derive(Debug, Clone)]
pub struct VitalsGenerator {
    current_heart_rate: u32,
}

impl Default for VitalsGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl VitalsGenerator {
    pub fn new() -> Self {
        Self::starting_at(80)
    }

    /// Start from a given heart rate (only matters for stabilizing mode).
    pub fn starting_at(heart_rate: u32) -> Self {
        Self {
            current_heart_rate: heart_rate,
        }
    }

    /// Generate the next frame.
    pub fn next_frame<R: Rng + ?Sized>(&mut self, mode: FeedMode, rng: &mut R) -> FeedFrame {
        let heart_rate = match mode {
            FeedMode::Stabilizing => {
                if self.current_heart_rate > STABILIZATION_TARGET {
                    self.current_heart_rate = self
                        .current_heart_rate
                        .saturating_sub(rng.gen_range(1..=3));
                } else if self.current_heart_rate < STABILIZATION_TARGET {
                    self.current_heart_rate += rng.gen_range(1..=2);
                }
                self.current_heart_rate
            }
            FeedMode::Alert => {
                self.current_heart_rate = rng.gen_range(120..=140);
                self.current_heart_rate
            }
            FeedMode::Normal => {
                self.current_heart_rate = rng.gen_range(60..=110);
                self.current_heart_rate
            }
        };

        let bp = BloodPressure::new(rng.gen_range(110..=130), rng.gen_range(70..=90));
        let accuracy = (rng.gen_range(80.5..=84.9_f64) * 10.0).round() / 10.0;
        let neural_heatmap = (0..HEATMAP_SIZE)
            .map(|_| {
                (0..HEATMAP_SIZE)
                    .map(|_| (rng.gen_range(0.1..=0.9_f64) * 100.0).round() / 100.0)
                    .collect()
            })
            .collect();

        FeedFrame {
            sample: TelemetrySample::new(f64::from(heart_rate), bp).with_accuracy(accuracy),
            baseline_ghost: BASELINE_HEART_RATE,
            system_alert: mode == FeedMode::Alert,
            intervention_active: mode == FeedMode::Stabilizing,
            neural_heatmap,
        }
    }
}

/// WebSocket server for the simulated feed.
///
/// The mode is shared by every client of one server.
#[derive(Debug, Clone)]
pub struct FeedServer {
    mode: Arc<RwLock<FeedMode>>,
    interval: Duration,
}

impl FeedServer {
    /// Create a server sending one frame per `interval` to each client.
    pub fn new(interval: Duration) -> Self {
        Self {
            mode: Arc::new(RwLock::new(FeedMode::Normal)),
            interval,
        }
    }

    pub fn mode(&self) -> FeedMode {
        *self.mode.read()
    }

    pub fn set_mode(&self, mode: FeedMode) {
        let previous = std::mem::replace(&mut *self.mode.write(), mode);
        if previous != mode {
            info!(?previous, ?mode, "Feed mode changed");
        }
    }

    /// Bind `addr` and serve until the listener fails.
    pub async fn bind_and_run(self, addr: &str) -> Result<()> {
        let listener = TcpListener::bind(addr).await?;
        self.run(listener).await
    }

    /// Serve clients from an already bound listener.
    pub async fn run(self, listener: TcpListener) -> Result<()> {
        info!("Vitals feed listening on {}", listener.local_addr()?);

        loop {
            let (stream, peer) = listener.accept().await?;
            let server = self.clone();
            tokio::spawn(async move {
                if let Err(e) = server.handle_connection(stream, peer).await {
                    error!(%peer, "Feed connection error: {}", e);
                }
            });
        }
    }

    async fn handle_connection(&self, stream: TcpStream, peer: SocketAddr) -> Result<()> {
        let ws = accept_async(stream).await?;
        let (mut ws_tx, mut ws_rx) = ws.split();
        info!(%peer, "Feed client connected");

        let mut generator = VitalsGenerator::new();
        let mut rng = StdRng::from_entropy();
        let mut ticker = tokio::time::interval(self.interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let frame = generator.next_frame(self.mode(), &mut rng);
                    let text = serde_json::to_string(&frame)?;
                    ws_tx.send(Message::Text(text.into())).await?;
                }
                message = ws_rx.next() => match message {
                    Some(Ok(Message::Text(text))) => self.apply_control(&text),
                    Some(Ok(Message::Close(_))) | None => {
                        info!(%peer, "Feed client disconnected");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(e.into()),
                },
            }
        }

        Ok(())
    }

    fn apply_control(&self, text: &str) {
        match serde_json::from_str::<FeedControl>(text) {
            Ok(control) => {
                debug!(?control, "Feed control received");
                self.set_mode(control.mode());
            }
            Err(e) => warn!("Ignoring unknown feed control message: {}", e),
        }
    }
}

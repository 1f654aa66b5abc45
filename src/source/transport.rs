//! Self-healing WebSocket transport for the vitals feed.
//!
//! The transport owns at most one physical connection at a time. Inbound
//! text frames are decoded and broadcast to a [`SubscriberRegistry`]; when
//! the connection drops, a new attempt is made after a fixed delay, forever,
//! until [`ReconnectingTransport::close`] is called.
//!
//! ```text
//! Connecting ──open──▶ Open ──disconnect──▶ Closed ──delay──▶ Connecting …
//!      │                                       ▲
//!      └──────────────connect error────────────┘
//!
//! close() from any state ──▶ Stopped (terminal)
//! ```

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use super::{codec, SubscriberRegistry, TelemetrySample};
use crate::error::DecodeError;

/// Delay between a disconnect and the next connection attempt.
pub const RECONNECT_DELAY: Duration = Duration::from_millis(3000);

/// Outbound messages that may wait for the socket before new ones are dropped.
pub const OUTBOUND_CAPACITY: usize = 64;

/// Connection lifecycle of a [`ReconnectingTransport`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// A connection attempt is in progress.
    Connecting,
    /// Connected; frames are flowing.
    Open,
    /// Disconnected; a reconnect is scheduled.
    Closed,
    /// Shut down by its owner. No further attempts are made.
    Stopped,
}

impl ConnectionState {
    /// Returns the display label for this state.
    pub fn label(&self) -> &'static str {
        match self {
            ConnectionState::Connecting => "Connecting...",
            ConnectionState::Open => "Connected",
            ConnectionState::Closed => "Disconnected",
            ConnectionState::Stopped => "Stopped",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A long-lived streaming client that reconnects on its own.
///
/// # Example
///
/// ```no_run
/// use vitalwatch::{ReconnectingTransport, SubscriberRegistry};
///
/// # tokio_test::block_on(async {
/// let registry = SubscriberRegistry::new();
/// registry.subscribe(|sample| {
///     println!("HR {}", sample.heart_rate);
///     Ok(())
/// });
///
/// let transport = ReconnectingTransport::connect("ws://127.0.0.1:8000/ws/vitals", registry);
/// // ...
/// transport.close();
/// # });
/// ```
pub struct ReconnectingTransport {
    url: String,
    registry: SubscriberRegistry,
    state_tx: Arc<watch::Sender<ConnectionState>>,
    state_rx: watch::Receiver<ConnectionState>,
    outbound: mpsc::Sender<String>,
    stop_tx: watch::Sender<bool>,
    attempts: Arc<AtomicU64>,
    task: Option<JoinHandle<()>>,
}

impl ReconnectingTransport {
    /// Start connecting to `url` with the default reconnect delay.
    ///
    /// Must be called from within a tokio runtime.
    pub fn connect(url: impl Into<String>, registry: SubscriberRegistry) -> Self {
        Self::builder().url(url).build(registry)
    }

    /// Create a builder for configuring the transport.
    pub fn builder() -> TransportBuilder {
        TransportBuilder::default()
    }

    /// The current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Subscribe to connection state changes.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// The registry frames are broadcast to.
    pub fn registry(&self) -> &SubscriberRegistry {
        &self.registry
    }

    /// Number of connection attempts made so far.
    pub fn connection_attempts(&self) -> u64 {
        self.attempts.load(Ordering::Relaxed)
    }

    /// Send a payload to the feed, best effort.
    ///
    /// Only honored while the transport is [`ConnectionState::Open`];
    /// otherwise the payload is silently dropped. At most
    /// [`OUTBOUND_CAPACITY`] messages wait for the socket; beyond that new
    /// ones are dropped. Nothing is queued across reconnects.
    pub fn send<T: Serialize + ?Sized>(&self, payload: &T) {
        if self.state() != ConnectionState::Open {
            debug!(state = %self.state(), "Dropping outbound message");
            return;
        }

        match serde_json::to_string(payload) {
            Ok(text) => {
                enqueue(&self.outbound, text);
            }
            Err(e) => debug!("Dropping unserializable outbound message: {}", e),
        }
    }

    /// Shut the transport down.
    ///
    /// Cancels any pending reconnect and closes the live connection.
    /// Idempotent.
    pub fn close(&self) {
        if self.state_tx.send_replace(ConnectionState::Stopped) != ConnectionState::Stopped {
            info!(url = %self.url, "Closing vitals transport");
        }
        self.stop_tx.send_replace(true);
    }

    /// Close the transport and wait for its background task to finish.
    pub async fn shutdown(mut self) {
        self.close();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl fmt::Debug for ReconnectingTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReconnectingTransport")
            .field("url", &self.url)
            .field("state", &self.state())
            .finish()
    }
}

impl Drop for ReconnectingTransport {
    fn drop(&mut self) {
        self.close();
    }
}

/// Builder for [`ReconnectingTransport`].
#[derive(Debug, Default)]
pub struct TransportBuilder {
    url: Option<String>,
    reconnect_delay: Option<Duration>,
}

impl TransportBuilder {
    /// Set the feed endpoint (e.g., "ws://127.0.0.1:8000/ws/vitals").
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Set the fixed reconnect delay (default: 3 seconds).
    pub fn reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = Some(delay);
        self
    }

    /// Build the transport and start the first connection attempt.
    pub fn build(self, registry: SubscriberRegistry) -> ReconnectingTransport {
        let url = self
            .url
            .unwrap_or_else(|| crate::config::DEFAULT_FEED_URL.to_string());
        let delay = self.reconnect_delay.unwrap_or(RECONNECT_DELAY);

        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        let state_tx = Arc::new(state_tx);
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_CAPACITY);
        let (stop_tx, stop_rx) = watch::channel(false);
        let attempts = Arc::new(AtomicU64::new(0));

        let worker = ConnectionLoop {
            url: url.clone(),
            delay,
            registry: registry.clone(),
            state: state_tx.clone(),
            outbound: outbound_rx,
            stop: stop_rx,
            attempts: attempts.clone(),
        };
        let task = tokio::spawn(worker.run());

        ReconnectingTransport {
            url,
            registry,
            state_tx,
            state_rx,
            outbound: outbound_tx,
            stop_tx,
            attempts,
            task: Some(task),
        }
    }
}

type FeedStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Why a live session ended.
enum SessionEnd {
    Disconnected(String),
    Stopped,
}

/// The background task driving the state machine.
struct ConnectionLoop {
    url: String,
    delay: Duration,
    registry: SubscriberRegistry,
    state: Arc<watch::Sender<ConnectionState>>,
    outbound: mpsc::Receiver<String>,
    stop: watch::Receiver<bool>,
    attempts: Arc<AtomicU64>,
}

impl ConnectionLoop {
    async fn run(mut self) {
        loop {
            if *self.stop.borrow() {
                break;
            }

            set_state(&self.state, ConnectionState::Connecting);
            self.attempts.fetch_add(1, Ordering::Relaxed);
            debug!(url = %self.url, "Connecting to vitals feed");

            let connected = tokio::select! {
                result = connect_async(self.url.as_str()) => result,
                _ = stopped(&mut self.stop) => break,
            };

            let reason = match connected {
                Ok((ws, _response)) => {
                    // Anything left over from the previous connection is not delivered
                    while self.outbound.try_recv().is_ok() {}

                    set_state(&self.state, ConnectionState::Open);
                    info!(url = %self.url, "Connected to vitals feed");

                    match self.session(ws).await {
                        SessionEnd::Stopped => break,
                        SessionEnd::Disconnected(reason) => reason,
                    }
                }
                Err(e) => e.to_string(),
            };

            set_state(&self.state, ConnectionState::Closed);
            warn!(
                url = %self.url,
                retry_in_ms = self.delay.as_millis() as u64,
                "Vitals feed disconnected: {}",
                reason
            );

            tokio::select! {
                _ = tokio::time::sleep(self.delay) => {}
                _ = stopped(&mut self.stop) => break,
            }
        }

        self.state.send_replace(ConnectionState::Stopped);
        debug!(url = %self.url, "Vitals transport stopped");
    }

    async fn session(&mut self, ws: FeedStream) -> SessionEnd {
        let (mut sink, mut stream) = ws.split();

        loop {
            tokio::select! {
                _ = stopped(&mut self.stop) => {
                    let _ = sink.send(Message::Close(None)).await;
                    return SessionEnd::Stopped;
                }
                Some(text) = self.outbound.recv() => {
                    if let Err(e) = sink.send(Message::Text(text.into())).await {
                        return SessionEnd::Disconnected(format!("send failed: {}", e));
                    }
                }
                message = stream.next() => match message {
                    Some(Ok(Message::Text(text))) => dispatch(&self.registry, codec::decode(&text)),
                    Some(Ok(Message::Binary(bytes))) => {
                        dispatch(&self.registry, codec::decode_bytes(&bytes))
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let reason = frame
                            .map(|f| format!("closed by peer: {}", f.reason))
                            .unwrap_or_else(|| "closed by peer".to_string());
                        return SessionEnd::Disconnected(reason);
                    }
                    // Ping/pong are answered by tungstenite itself
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return SessionEnd::Disconnected(e.to_string()),
                    None => return SessionEnd::Disconnected("stream ended".to_string()),
                },
            }
        }
    }
}

/// Queue an outbound message without waiting. Returns whether it was queued.
fn enqueue(outbound: &mpsc::Sender<String>, text: String) -> bool {
    match outbound.try_send(text) {
        Ok(()) => true,
        Err(mpsc::error::TrySendError::Full(_)) => {
            warn!("Outbound queue full, dropping message");
            false
        }
        Err(mpsc::error::TrySendError::Closed(_)) => false,
    }
}

fn dispatch(registry: &SubscriberRegistry, frame: Result<TelemetrySample, DecodeError>) {
    match frame {
        Ok(sample) => {
            registry.broadcast(&sample);
        }
        Err(e) => warn!("Dropping frame: {}", e),
    }
}

/// Move to `next` unless the transport has already been stopped.
fn set_state(state: &watch::Sender<ConnectionState>, next: ConnectionState) {
    state.send_if_modified(|current| {
        if *current == ConnectionState::Stopped || *current == next {
            return false;
        }
        *current = next;
        true
    });
}

/// Resolves once a stop is requested or the owning transport is dropped.
async fn stopped(stop: &mut watch::Receiver<bool>) {
    let _ = stop.wait_for(|stop| *stop).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::future::Future;
    use std::time::Instant;
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    const TEST_DELAY: Duration = Duration::from_millis(50);

    fn valid_frame(heart_rate: u32) -> String {
        format!(
            r#"{{"heart_rate": {}, "bp": "120/80", "accuracy": 83.1, "neural_heatmap": [[0.2]]}}"#,
            heart_rate
        )
    }

    /// Accept connections one at a time, handing each to `handler` with its index.
    async fn spawn_server<F, Fut>(mut handler: F) -> String
    where
        F: FnMut(usize, WebSocketStream<TcpStream>) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let mut index = 0;
            while let Ok((stream, _)) = listener.accept().await {
                if let Ok(ws) = accept_async(stream).await {
                    handler(index, ws).await;
                    index += 1;
                }
            }
        });

        format!("ws://{}", addr)
    }

    fn collecting_registry() -> (SubscriberRegistry, Arc<Mutex<Vec<f64>>>) {
        let registry = SubscriberRegistry::new();
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = received.clone();
        registry.subscribe(move |sample| {
            sink.lock().push(sample.heart_rate);
            Ok(())
        });
        (registry, received)
    }

    async fn eventually(mut condition: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    async fn wait_for_state(transport: &ReconnectingTransport, wanted: ConnectionState) {
        let mut rx = transport.watch_state();
        tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| *s == wanted))
            .await
            .expect("state not reached in time")
            .unwrap();
    }

    #[test]
    fn test_default_reconnect_delay_is_three_seconds() {
        assert_eq!(RECONNECT_DELAY, Duration::from_millis(3000));
    }

    #[tokio::test]
    async fn test_outbound_queue_is_bounded() {
        let (tx, mut rx) = mpsc::channel(OUTBOUND_CAPACITY);
        for i in 0..OUTBOUND_CAPACITY {
            assert!(enqueue(&tx, i.to_string()));
        }
        assert!(!enqueue(&tx, "overflow".to_string()));

        // Draining frees room again
        assert_eq!(rx.recv().await.unwrap(), "0");
        assert!(enqueue(&tx, "next".to_string()));

        drop(rx);
        assert!(!enqueue(&tx, "closed".to_string()));
    }

    #[tokio::test]
    async fn test_reconnect_waits_fixed_delay_in_closed_state() {
        const DELAY: Duration = Duration::from_millis(200);

        // Accepts TCP, then hangs up before the handshake completes
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    drop(stream);
                });
            }
        });

        let transport = ReconnectingTransport::builder()
            .url(format!("ws://{}", addr))
            .reconnect_delay(DELAY)
            .build(SubscriberRegistry::new());

        let mut state = transport.watch_state();
        let mut trace = vec![(*state.borrow_and_update(), Instant::now())];
        while trace.len() < 6 {
            tokio::time::timeout(Duration::from_secs(5), state.changed())
                .await
                .expect("no state change in time")
                .unwrap();
            trace.push((*state.borrow_and_update(), Instant::now()));
        }

        let states: Vec<ConnectionState> = trace.iter().map(|(s, _)| *s).collect();
        assert_eq!(
            states,
            vec![
                ConnectionState::Connecting,
                ConnectionState::Closed,
                ConnectionState::Connecting,
                ConnectionState::Closed,
                ConnectionState::Connecting,
                ConnectionState::Closed,
            ]
        );

        // Closed -> Connecting gaps are the configured delay every time, no backoff
        for closed in [1, 3] {
            let gap = trace[closed + 1].1 - trace[closed].1;
            assert!(gap >= DELAY - Duration::from_millis(20), "gap {:?}", gap);
            assert!(gap < DELAY + Duration::from_millis(150), "gap {:?}", gap);
        }
        assert_eq!(transport.connection_attempts(), 3);

        transport.shutdown().await;
    }

    #[test]
    fn test_state_labels() {
        assert_eq!(ConnectionState::Connecting.label(), "Connecting...");
        assert_eq!(ConnectionState::Open.to_string(), "Connected");
    }

    #[tokio::test]
    async fn test_frames_broadcast_in_order_and_malformed_frames_dropped() {
        let url = spawn_server(|_, mut ws| async move {
            for frame in [
                valid_frame(70),
                "not valid json".to_string(),
                r#"{"bp": "120/80"}"#.to_string(),
                valid_frame(71),
                valid_frame(72),
            ] {
                ws.send(Message::Text(frame.into())).await.unwrap();
            }
            while let Some(Ok(_)) = ws.next().await {}
        })
        .await;

        let (registry, received) = collecting_registry();
        let transport = ReconnectingTransport::builder()
            .url(url)
            .reconnect_delay(TEST_DELAY)
            .build(registry);

        eventually(|| received.lock().len() == 3).await;
        assert_eq!(*received.lock(), vec![70.0, 71.0, 72.0]);
        assert_eq!(transport.state(), ConnectionState::Open);
        assert_eq!(transport.connection_attempts(), 1);

        transport.shutdown().await;
    }

    #[tokio::test]
    async fn test_reconnects_after_remote_close() {
        let url = spawn_server(|index, mut ws| async move {
            ws.send(Message::Text(valid_frame(60 + index as u32).into()))
                .await
                .unwrap();
            if index == 0 {
                let _ = ws.close(None).await;
            } else {
                while let Some(Ok(_)) = ws.next().await {}
            }
        })
        .await;

        let (registry, received) = collecting_registry();
        let transport = ReconnectingTransport::builder()
            .url(url)
            .reconnect_delay(TEST_DELAY)
            .build(registry);

        eventually(|| received.lock().len() == 2).await;
        assert_eq!(*received.lock(), vec![60.0, 61.0]);
        assert_eq!(transport.connection_attempts(), 2);
        wait_for_state(&transport, ConnectionState::Open).await;

        transport.shutdown().await;
    }

    #[tokio::test]
    async fn test_retries_forever_until_closed() {
        // Reserve a port with nothing listening on it
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let transport = ReconnectingTransport::builder()
            .url(format!("ws://{}", addr))
            .reconnect_delay(Duration::from_millis(20))
            .build(SubscriberRegistry::new());

        eventually(|| transport.connection_attempts() >= 3).await;

        transport.close();
        transport.close();
        assert_eq!(transport.state(), ConnectionState::Stopped);

        // Let the task observe the stop, then check nothing else happens
        tokio::time::sleep(Duration::from_millis(50)).await;
        let attempts = transport.connection_attempts();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(transport.connection_attempts(), attempts);
        assert_eq!(transport.state(), ConnectionState::Stopped);
    }

    #[tokio::test]
    async fn test_send_only_while_open() {
        let (inbound_tx, mut inbound_rx) = mpsc::unbounded_channel::<String>();
        let url = spawn_server(move |_, mut ws| {
            let inbound_tx = inbound_tx.clone();
            async move {
                while let Some(Ok(message)) = ws.next().await {
                    if let Message::Text(text) = message {
                        let _ = inbound_tx.send(text.to_string());
                    }
                }
            }
        })
        .await;

        let transport = ReconnectingTransport::builder()
            .url(url)
            .reconnect_delay(TEST_DELAY)
            .build(SubscriberRegistry::new());

        // Not yet open: dropped, not queued
        transport.send(&serde_json::json!({"command": "early"}));

        wait_for_state(&transport, ConnectionState::Open).await;
        transport.send(&serde_json::json!({"command": "code_blue"}));

        let received = tokio::time::timeout(Duration::from_secs(5), inbound_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received, r#"{"command":"code_blue"}"#);

        transport.close();
        transport.send(&serde_json::json!({"command": "late"}));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(inbound_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_close_stops_live_session() {
        let url = spawn_server(|_, mut ws| async move {
            while let Some(Ok(_)) = ws.next().await {}
        })
        .await;

        let transport = ReconnectingTransport::builder()
            .url(url)
            .reconnect_delay(TEST_DELAY)
            .build(SubscriberRegistry::new());
        wait_for_state(&transport, ConnectionState::Open).await;

        let mut state = transport.watch_state();
        transport.close();
        assert_eq!(*state.borrow_and_update(), ConnectionState::Stopped);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(transport.connection_attempts(), 1);
        assert_eq!(transport.state(), ConnectionState::Stopped);
    }
}

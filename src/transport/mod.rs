//! Streaming transport to the backend over a WebSocket.
//!
//! `send` never blocks and never fails: frames go through a bounded
//! drop-oldest queue that a background driver task flushes in FIFO order
//! whenever a connection is up. The driver reconnects with linear backoff
//! until the attempt ceiling is hit.

pub mod backoff;
pub mod queue;
pub mod state;
pub mod wire;

pub use backoff::Backoff;
pub use queue::OutboundQueue;
pub use state::ConnectionState;
pub use wire::{generate_session_id, InboundMessage, InboundStatus, OutboundMessage};

use futures_util::{Sink, SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Callback for parsed inbound messages.
pub type MessageHandler = Arc<dyn Fn(InboundMessage) + Send + Sync>;

/// Transport tunables.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// `ws://host:port/ws/behaviour`
    pub url: String,
    pub reconnect_delay: Duration,
    pub max_reconnect_attempts: u32,
    pub backoff_cap: u32,
    pub queue_size: usize,
    pub connection_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            url: "ws://localhost:8000/ws/behaviour".to_string(),
            reconnect_delay: Duration::from_millis(3000),
            max_reconnect_attempts: 10,
            backoff_cap: 5,
            queue_size: 100,
            connection_timeout: Duration::from_millis(10_000),
        }
    }
}

/// Errors inside the connection driver. Reported through logs and the
/// connection state, never to the caller of `send`.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Connection timed out after {0:?}")]
    Timeout(Duration),
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("Connection closed by peer")]
    Closed,
    #[error("Failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Outcome of a `send`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendStatus {
    /// Handed to the live connection
    Sent,
    /// Waiting in the outbound queue for a connection
    Queued,
    /// Could not be encoded and was discarded
    Dropped,
}

struct Driver {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

struct Shared {
    config: TransportConfig,
    url: RwLock<String>,
    user_id: RwLock<Option<String>>,
    session_id: String,
    queue: Mutex<OutboundQueue>,
    wake: Notify,
    state: watch::Sender<ConnectionState>,
    handler: RwLock<Option<MessageHandler>>,
}

impl Shared {
    fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Publish a state unless the driver that reports it was cancelled.
    fn set_state(&self, cancel: &CancellationToken, next: ConnectionState) {
        self.state.send_if_modified(|current| {
            if cancel.is_cancelled() || *current == next {
                return false;
            }
            *current = next;
            true
        });
    }

    fn enqueue(&self, frame: String) {
        let mut queue = self.queue.lock();
        if queue.push_back(frame).is_some() {
            tracing::warn!(
                capacity = queue.capacity(),
                "Outbound queue full, dropped oldest message"
            );
        } else {
            tracing::debug!(queue_len = queue.len(), "Message queued");
        }
    }

    fn dispatch(&self, text: &str) {
        match InboundMessage::parse(text) {
            Ok(message) => {
                let handler = self.handler.read().clone();
                if let Some(handler) = handler {
                    handler(message);
                }
            }
            Err(e) => tracing::warn!(error = %e, "Dropping malformed inbound message"),
        }
    }
}

/// Handle to the transport. Clones share one connection and one queue.
#[derive(Clone)]
pub struct Transport {
    shared: Arc<Shared>,
    driver: Arc<Mutex<Option<Driver>>>,
}

impl Transport {
    pub fn new(config: TransportConfig) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let shared = Shared {
            url: RwLock::new(config.url.clone()),
            user_id: RwLock::new(None),
            session_id: generate_session_id(),
            queue: Mutex::new(OutboundQueue::new(config.queue_size)),
            wake: Notify::new(),
            state,
            handler: RwLock::new(None),
            config,
        };
        Self {
            shared: Arc::new(shared),
            driver: Arc::new(Mutex::new(None)),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Observe connection state changes.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    pub fn session_id(&self) -> &str {
        &self.shared.session_id
    }

    pub fn url(&self) -> String {
        self.shared.url.read().clone()
    }

    pub fn set_user_id(&self, user_id: Option<String>) {
        *self.shared.user_id.write() = user_id;
    }

    pub fn user_id(&self) -> Option<String> {
        self.shared.user_id.read().clone()
    }

    /// Register the handler for inbound messages, replacing any previous one.
    pub fn on_message<F>(&self, handler: F)
    where
        F: Fn(InboundMessage) + Send + Sync + 'static,
    {
        *self.shared.handler.write() = Some(Arc::new(handler));
    }

    pub fn queued_len(&self) -> usize {
        self.shared.queue.lock().len()
    }

    /// Point the transport at a new endpoint. A live connection is dropped
    /// so the next connect uses the new URL.
    pub fn update_url(&self, url: impl Into<String>) {
        let url = url.into();
        tracing::info!(url = %url, "Transport endpoint updated");
        *self.shared.url.write() = url;

        if let Some(driver) = self.driver.lock().take() {
            driver.cancel.cancel();
            self.shared.state.send_replace(ConnectionState::Disconnected);
        }
    }

    /// Start connecting unless a connection or attempt is already live.
    ///
    /// Also the way out of `Exhausted` and `Closed`. Must be called from
    /// within a tokio runtime.
    pub fn connect(&self) {
        let mut driver = self.driver.lock();
        if let Some(live) = driver.as_ref() {
            if !live.task.is_finished() {
                return;
            }
        }

        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(e) => {
                tracing::error!(error = %e, "No async runtime, cannot connect");
                return;
            }
        };

        let cancel = CancellationToken::new();
        self.shared.state.send_replace(ConnectionState::Connecting);
        let task = runtime.spawn(run_driver(self.shared.clone(), cancel.clone()));
        *driver = Some(Driver { cancel, task });
    }

    /// Close the connection and stop reconnecting. Queued frames are kept
    /// for the next explicit `connect`.
    pub fn disconnect(&self) {
        if let Some(driver) = self.driver.lock().take() {
            driver.cancel.cancel();
        }
        self.shared.state.send_replace(ConnectionState::Closed);
        tracing::info!("Transport disconnected");
    }

    /// Queue a raw message for delivery.
    ///
    /// Returns `Sent` when a connection is up, `Queued` otherwise. A
    /// disconnected transport starts connecting.
    pub fn send<T: Serialize>(&self, message: &T) -> SendStatus {
        let frame = match serde_json::to_string(message) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::error!(error = %TransportError::Encode(e), "Dropping outbound message");
                return SendStatus::Dropped;
            }
        };

        let state = self.state();
        self.shared.enqueue(frame);
        self.shared.wake.notify_one();

        if state.is_connected() {
            SendStatus::Sent
        } else {
            if state.allows_auto_connect() {
                self.connect();
            }
            SendStatus::Queued
        }
    }

    /// Wrap `event_data` in the session envelope and send it.
    pub fn send_event<T: Serialize>(&self, event_type: &str, event_data: T) -> SendStatus {
        let message = OutboundMessage::new(
            self.user_id(),
            self.shared.session_id.clone(),
            event_type,
            event_data,
        );
        self.send(&message)
    }
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("url", &self.url())
            .field("state", &self.state())
            .field("queued", &self.queued_len())
            .finish()
    }
}

async fn run_driver(shared: Arc<Shared>, cancel: CancellationToken) {
    let backoff = Backoff::new(shared.config.reconnect_delay, shared.config.backoff_cap);
    let max_attempts = shared.config.max_reconnect_attempts;
    let mut attempt: u32 = 0;

    loop {
        shared.set_state(&cancel, ConnectionState::Connecting);
        let url = shared.url.read().clone();
        tracing::info!(url = %url, attempt, "Connecting");

        let connected = tokio::select! {
            _ = cancel.cancelled() => return,
            result = connect(&url, shared.config.connection_timeout) => result,
        };

        match connected {
            Ok(stream) => {
                attempt = 0;
                shared.set_state(&cancel, ConnectionState::Connected);
                tracing::info!(url = %url, "Connected");

                match run_session(&shared, &cancel, stream).await {
                    Ok(()) => return,
                    Err(e) => tracing::warn!(error = %e, "Connection lost"),
                }
            }
            Err(e) => tracing::warn!(error = %e, attempt, "Connection attempt failed"),
        }

        if cancel.is_cancelled() {
            return;
        }
        if attempt >= max_attempts {
            shared.set_state(&cancel, ConnectionState::Exhausted);
            tracing::error!(attempts = attempt, "Max reconnection attempts reached");
            return;
        }

        attempt += 1;
        let delay = backoff.delay(attempt);
        shared.set_state(&cancel, ConnectionState::Reconnecting { attempt });
        tracing::info!(
            attempt,
            max_attempts,
            delay_ms = delay.as_millis() as u64,
            "Reconnecting"
        );

        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

async fn connect(url: &str, timeout: Duration) -> Result<WsStream, TransportError> {
    match tokio::time::timeout(timeout, tokio_tungstenite::connect_async(url)).await {
        Ok(Ok((stream, _response))) => Ok(stream),
        Ok(Err(e)) => Err(e.into()),
        Err(_) => Err(TransportError::Timeout(timeout)),
    }
}

/// Pump one live connection. `Ok` means the caller cancelled; `Err` means
/// the connection dropped and should be retried.
async fn run_session(
    shared: &Shared,
    cancel: &CancellationToken,
    stream: WsStream,
) -> Result<(), TransportError> {
    let (mut writer, mut reader) = stream.split();

    loop {
        flush(shared, &mut writer).await?;

        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = writer.send(Message::Close(None)).await;
                return Ok(());
            }
            _ = shared.wake.notified() => {}
            incoming = reader.next() => match incoming {
                Some(Ok(Message::Text(text))) => shared.dispatch(&text),
                Some(Ok(Message::Close(frame))) => {
                    tracing::info!(?frame, "Server closed connection");
                    return Err(TransportError::Closed);
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e.into()),
                None => return Err(TransportError::Closed),
            },
        }
    }
}

/// Drain the queue in FIFO order. A failed frame goes back to the head and
/// the rest wait for the next connection.
async fn flush<S>(shared: &Shared, writer: &mut S) -> Result<(), TransportError>
where
    S: Sink<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
{
    let mut sent = 0usize;
    loop {
        let next = shared.queue.lock().pop_front();
        let Some(frame) = next else { break };

        if let Err(e) = writer.send(Message::Text(frame.clone().into())).await {
            if !shared.queue.lock().push_front(frame) {
                tracing::warn!("Outbound queue full, dropped unsent message");
            }
            return Err(e.into());
        }
        sent += 1;
    }

    if sent > 1 {
        tracing::debug!(count = sent, "Flushed queued messages");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::pin::Pin;
    use tokio_tungstenite::tungstenite::Error as WsError;

    type TestSink = Pin<Box<dyn Sink<Message, Error = WsError> + Send>>;

    /// Sink that records text frames and fails on send number `fail_at`.
    fn recording_sink(fail_at: Option<usize>) -> (TestSink, Arc<Mutex<Vec<String>>>) {
        let written = Arc::new(Mutex::new(Vec::new()));
        let log = written.clone();
        let sink = futures_util::sink::unfold(0usize, move |count, msg: Message| {
            let log = log.clone();
            async move {
                if Some(count) == fail_at {
                    return Err(WsError::ConnectionClosed);
                }
                if let Message::Text(text) = msg {
                    log.lock().push(text.to_string());
                }
                Ok(count + 1)
            }
        });
        (Box::pin(sink), written)
    }

    fn offline_config() -> TransportConfig {
        TransportConfig {
            // Reserved port, nothing listens here
            url: "ws://127.0.0.1:9/ws/behaviour".to_string(),
            reconnect_delay: Duration::from_secs(60),
            max_reconnect_attempts: 1,
            backoff_cap: 5,
            queue_size: 3,
            connection_timeout: Duration::from_millis(200),
        }
    }

    #[tokio::test]
    async fn test_send_while_disconnected_queues_and_connects() {
        let transport = Transport::new(offline_config());
        assert_eq!(transport.state(), ConnectionState::Disconnected);

        let status = transport.send_event("BEHAVIORAL_VECTOR", serde_json::json!({"n": 1}));
        assert_eq!(status, SendStatus::Queued);
        assert_eq!(transport.queued_len(), 1);
        assert_ne!(transport.state(), ConnectionState::Disconnected);

        transport.disconnect();
    }

    #[tokio::test]
    async fn test_queue_is_bounded() {
        let transport = Transport::new(offline_config());
        transport.disconnect();

        for i in 0..8 {
            assert_eq!(transport.send(&i), SendStatus::Queued);
        }
        assert_eq!(transport.queued_len(), 3);
        // Closed transports do not reconnect on their own
        assert_eq!(transport.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_update_url_resets_to_disconnected() {
        let transport = Transport::new(offline_config());
        transport.connect();
        transport.update_url("ws://127.0.0.1:10/ws/behaviour");

        assert_eq!(transport.url(), "ws://127.0.0.1:10/ws/behaviour");
        assert_eq!(transport.state(), ConnectionState::Disconnected);
        transport.disconnect();
    }

    #[tokio::test]
    async fn test_failed_flush_keeps_remaining_frames_in_order() {
        let transport = Transport::new(TransportConfig::default());
        let shared = &transport.shared;
        for n in 1..=4 {
            shared.enqueue(n.to_string());
        }

        // Connection drops on the second frame
        let (mut broken, written) = recording_sink(Some(1));
        assert!(flush(shared, &mut broken).await.is_err());
        assert_eq!(*written.lock(), vec!["1"]);
        let pending: Vec<String> = shared.queue.lock().iter().cloned().collect();
        assert_eq!(pending, vec!["2", "3", "4"]);

        // Next connection delivers the rest in enqueue order
        let (mut healthy, written) = recording_sink(None);
        flush(shared, &mut healthy).await.unwrap();
        assert_eq!(*written.lock(), vec!["2", "3", "4"]);
        assert_eq!(transport.queued_len(), 0);
    }

    #[test]
    fn test_user_id_and_session() {
        let transport = Transport::new(TransportConfig::default());
        assert!(transport.session_id().starts_with("sess_"));
        assert!(transport.user_id().is_none());
        transport.set_user_id(Some("u-7".to_string()));
        assert_eq!(transport.user_id().as_deref(), Some("u-7"));
    }
}

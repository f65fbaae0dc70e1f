//! Reconnecting WebSocket client
//!
//! Maintains a logical always-available connection over a physically
//! unreliable one. A background loop dials the target, publishes the
//! connection state through a watch channel, and parks until the transport
//! is reported closed; [`ReconnectingClient::send`] and
//! [`ReconnectingClient::recv`] suspend their caller until the client is
//! `Connected`.
//!
//! There is no outbound queue: a send issued while disconnected completes
//! after reconnection rather than being dropped or batched. Callers that
//! need at-least-once delivery across reconnects must layer their own queue
//! on top.
//!
//! Closure is definitive, not polled: whichever `send`/`recv` call first
//! hits the dead transport clears the handle and signals the loop. If
//! "connected" were a flag we polled, this would be the wrong abstraction.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex, Notify};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

use crate::error::{HubError, Result};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

/// Connection state of a [`ReconnectingClient`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Disconnected,
    Connecting,
    Connected,
    /// Terminal, reached only via [`ReconnectingClient::close`]
    Stopped,
}

/// Configuration for a [`ReconnectingClient`]
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// WebSocket URL, e.g. `ws://127.0.0.1:9870`
    pub url: String,
    /// Pause between reconnection attempts
    pub retry_delay: Duration,
}

impl ClientConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            retry_delay: Duration::from_secs(1),
        }
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }
}

/// A client connection that transparently redials after failures.
pub struct ReconnectingClient {
    config: ClientConfig,
    state_tx: Arc<watch::Sender<ClientState>>,
    state_rx: watch::Receiver<ClientState>,
    sink: Arc<Mutex<Option<WsSink>>>,
    stream: Arc<Mutex<Option<WsSource>>>,
    /// Signaled when a caller observes transport closure
    closed: Arc<Notify>,
    running: Arc<AtomicBool>,
    started: AtomicBool,
}

impl ReconnectingClient {
    pub fn new(config: ClientConfig) -> Self {
        let (state_tx, state_rx) = watch::channel(ClientState::Disconnected);
        Self {
            config,
            state_tx: Arc::new(state_tx),
            state_rx,
            sink: Arc::new(Mutex::new(None)),
            stream: Arc::new(Mutex::new(None)),
            closed: Arc::new(Notify::new()),
            running: Arc::new(AtomicBool::new(true)),
            started: AtomicBool::new(false),
        }
    }

    /// Start the background reconnection loop. Idempotent; returns
    /// immediately without waiting for the first successful connection.
    pub fn connect(&self) {
        if self.started.swap(true, Ordering::SeqCst) || !self.running.load(Ordering::SeqCst) {
            return;
        }

        let config = self.config.clone();
        let state_tx = Arc::clone(&self.state_tx);
        let sink = Arc::clone(&self.sink);
        let stream = Arc::clone(&self.stream);
        let closed = Arc::clone(&self.closed);
        let running = Arc::clone(&self.running);

        tokio::spawn(async move {
            while running.load(Ordering::SeqCst) {
                let _ = state_tx.send(ClientState::Connecting);
                match connect_async(config.url.as_str()).await {
                    Ok((ws, _response)) => {
                        let (tx_half, rx_half) = ws.split();
                        *sink.lock().await = Some(tx_half);
                        *stream.lock().await = Some(rx_half);
                        let _ = state_tx.send(ClientState::Connected);
                        tracing::info!("Connected to {}", config.url);

                        // Park until a send/recv reports the transport closed
                        closed.notified().await;

                        // Wake callers parked on this transport before
                        // taking the locks, then discard the handle
                        if running.load(Ordering::SeqCst) {
                            let _ = state_tx.send(ClientState::Disconnected);
                        } else {
                            let _ = state_tx.send(ClientState::Stopped);
                        }
                        *sink.lock().await = None;
                        *stream.lock().await = None;

                        if !running.load(Ordering::SeqCst) {
                            break;
                        }
                        tracing::info!(
                            "Connection to {} lost, retrying in {:?}",
                            config.url,
                            config.retry_delay
                        );
                    }
                    Err(e) => {
                        let _ = state_tx.send(ClientState::Disconnected);
                        tracing::debug!("Connect to {} failed: {}", config.url, e);
                        if !running.load(Ordering::SeqCst) {
                            break;
                        }
                    }
                }
                tokio::time::sleep(config.retry_delay).await;
            }
            let _ = state_tx.send(ClientState::Stopped);
            tracing::debug!("Reconnection loop stopped");
        });
    }

    /// Current connection state.
    pub fn state(&self) -> ClientState {
        *self.state_rx.borrow()
    }

    /// Suspend until the client is `Connected`.
    pub async fn wait_connected(&self) -> Result<()> {
        let mut rx = self.state_rx.clone();
        let state = *rx
            .wait_for(|s| matches!(s, ClientState::Connected | ClientState::Stopped))
            .await
            .map_err(|_| HubError::ClientClosed)?;
        if state == ClientState::Stopped {
            return Err(HubError::ClientClosed);
        }
        Ok(())
    }

    /// Send one message, suspending until the client is `Connected`.
    ///
    /// A transport failure mid-send triggers reconnection and the send is
    /// retried on the next connection; the message is never dropped.
    pub async fn send(&self, msg: Message) -> Result<()> {
        loop {
            self.wait_connected().await?;

            let mut guard = self.sink.lock().await;
            let Some(sink) = guard.as_mut() else {
                // Raced a teardown between the state check and the lock;
                // let the loop publish the state change before re-checking
                drop(guard);
                tokio::task::yield_now().await;
                continue;
            };
            match sink.send(msg.clone()).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    tracing::debug!("Send failed, reconnecting: {}", e);
                    *guard = None;
                    self.closed.notify_one();
                }
            }
        }
    }

    /// Receive the next data message, suspending until `Connected`.
    ///
    /// Control frames (ping/pong) are consumed internally; a close frame or
    /// stream error triggers reconnection and the call keeps waiting.
    pub async fn recv(&self) -> Result<Message> {
        loop {
            self.wait_connected().await?;

            let mut rx = self.state_rx.clone();
            let mut guard = self.stream.lock().await;
            let Some(stream) = guard.as_mut() else {
                drop(guard);
                tokio::task::yield_now().await;
                continue;
            };
            tokio::select! {
                item = stream.next() => match item {
                    Some(Ok(msg @ (Message::Text(_) | Message::Binary(_)))) => {
                        return Ok(msg);
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        tracing::debug!("Transport closed, reconnecting");
                        *guard = None;
                        self.closed.notify_one();
                    }
                    Some(Ok(_)) => {} // ping/pong, keep reading
                    Some(Err(e)) => {
                        tracing::debug!("Receive failed, reconnecting: {}", e);
                        *guard = None;
                        self.closed.notify_one();
                    }
                },
                // State left Connected (teardown or close): release the
                // stream lock so the loop can discard the handle
                _ = rx.changed() => {}
            }
        }
    }

    /// Stop the loop and close any open transport.
    ///
    /// Safe to call once from the owning context; not designed for
    /// concurrent double-close.
    pub fn close(&self) {
        self.running.store(false, Ordering::SeqCst);
        let _ = self.state_tx.send(ClientState::Stopped);
        self.closed.notify_one();
        tracing::info!("Client closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_connect_is_idempotent_and_nonblocking() {
        let client = ReconnectingClient::new(
            ClientConfig::new("ws://127.0.0.1:1").with_retry_delay(Duration::from_millis(50)),
        );
        client.connect();
        client.connect();

        // Nothing is listening: the client cycles between Connecting and
        // Disconnected but never reaches Connected
        let waited = tokio::time::timeout(Duration::from_millis(200), client.wait_connected()).await;
        assert!(waited.is_err());
        assert_ne!(client.state(), ClientState::Connected);

        client.close();
    }

    #[tokio::test]
    async fn test_send_fails_after_close() {
        let client = ReconnectingClient::new(ClientConfig::new("ws://127.0.0.1:1"));
        client.connect();
        client.close();

        let result = client.send(Message::Text("hello".to_string())).await;
        assert!(matches!(result, Err(HubError::ClientClosed)));
        assert_eq!(client.state(), ClientState::Stopped);
    }

    #[tokio::test]
    async fn test_close_without_connect() {
        let client = ReconnectingClient::new(ClientConfig::new("ws://127.0.0.1:1"));
        client.close();
        assert_eq!(client.state(), ClientState::Stopped);

        // connect() after close stays stopped
        client.connect();
        assert!(matches!(
            client.recv().await,
            Err(HubError::ClientClosed)
        ));
    }
}

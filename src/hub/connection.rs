//! WebSocket connection handler
//!
//! One task per connection: accepts the handshake, registers the connection
//! with the hub, then services the inbound message stream and the outbound
//! delivery queue until the transport goes away. Every exit path funnels
//! through cleanup so the registry, channels, and user index never hold a
//! dangling connection.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_tungstenite::{accept_async, tungstenite::Message, WebSocketStream};

use crate::hub::auth::TokenValidator;
use crate::hub::protocol::{ClientRequest, Envelope};
use crate::hub::registry::{ConnectionId, Hub};

/// Handle a single WebSocket connection
pub async fn handle_connection(
    stream: TcpStream,
    hub: Arc<Hub>,
    validator: Arc<dyn TokenValidator>,
) {
    let addr = stream.peer_addr().ok();
    tracing::info!("New connection from {:?}", addr);

    // Accept WebSocket handshake
    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            tracing::error!("WebSocket handshake failed: {}", e);
            return;
        }
    };

    let mut conn = ConnectionState::new(ws_stream, hub, validator);
    let id = conn.id.clone();
    conn.run().await;

    tracing::info!("Connection {} closed from {:?}", id, addr);
}

/// State for a single connection
struct ConnectionState {
    ws: WebSocketStream<TcpStream>,
    hub: Arc<Hub>,
    validator: Arc<dyn TokenValidator>,
    id: ConnectionId,
    /// Delivery queue drained into the socket; the sending half is the
    /// transport handle held by the registry
    outbound: UnboundedReceiver<Message>,
}

impl ConnectionState {
    fn new(
        ws: WebSocketStream<TcpStream>,
        hub: Arc<Hub>,
        validator: Arc<dyn TokenValidator>,
    ) -> Self {
        let (tx, outbound) = tokio::sync::mpsc::unbounded_channel();
        let id = hub.register(tx);
        Self {
            ws,
            hub,
            validator,
            id,
            outbound,
        }
    }

    async fn run(&mut self) {
        if let Err(e) = self.send(&Envelope::welcome(&self.id)).await {
            tracing::error!("Failed to send welcome to {}: {}", self.id, e);
            self.cleanup();
            return;
        }

        loop {
            tokio::select! {
                // Inbound client messages
                msg = self.ws.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            if let Err(e) = self.handle_message(&text).await {
                                tracing::error!("Connection {} write failed: {}", self.id, e);
                                break;
                            }
                        }
                        Some(Ok(Message::Close(_))) => {
                            tracing::info!("Client {} requested close", self.id);
                            break;
                        }
                        Some(Ok(Message::Ping(data))) => {
                            if self.ws.send(Message::Pong(data)).await.is_err() {
                                break;
                            }
                        }
                        Some(Err(e)) => {
                            tracing::error!("WebSocket error on {}: {}", self.id, e);
                            break;
                        }
                        None => break,
                        _ => {}
                    }
                }

                // Broadcast / targeted deliveries queued by the hub
                queued = self.outbound.recv() => {
                    match queued {
                        Some(msg) => {
                            if self.ws.send(msg).await.is_err() {
                                break;
                            }
                        }
                        // Sender dropped: we were evicted
                        None => break,
                    }
                }
            }
        }

        self.cleanup();
    }

    /// Dispatch one inbound text frame.
    ///
    /// Protocol problems (undecodable envelope, unknown type, missing data
    /// field) are reported back and the connection stays open; only a
    /// transport-level write failure is returned as an error.
    async fn handle_message(&mut self, text: &str) -> anyhow::Result<()> {
        let envelope: Envelope = match serde_json::from_str(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::debug!("Undecodable envelope from {}: {}", self.id, e);
                return self.send(&Envelope::error("malformed message", None)).await;
            }
        };
        let request_id = envelope.request_id.clone();

        let request = match ClientRequest::from_envelope(&envelope) {
            Ok(request) => request,
            Err(e) => {
                return self.send(&Envelope::error(&e.to_string(), request_id)).await;
            }
        };

        match request {
            ClientRequest::Ping => {
                self.send(&Envelope::pong(request_id)).await?;
            }

            ClientRequest::Auth { token } => {
                match self.validator.validate(&token) {
                    Some(user) => {
                        self.hub.bind_user(&self.id, &user);
                        tracing::info!("Connection {} authenticated as {}", self.id, user);
                    }
                    None => {
                        self.send(&Envelope::auth_error("invalid token", request_id))
                            .await?;
                    }
                }
            }

            ClientRequest::Subscribe { channel } => {
                self.hub.subscribe(&self.id, &channel);
                self.send(&Envelope::subscribed(&channel, request_id)).await?;
            }

            ClientRequest::Unsubscribe { channel } => {
                self.hub.unsubscribe(&self.id, &channel);
                self.send(&Envelope::unsubscribed(&channel, request_id))
                    .await?;
            }

            ClientRequest::Unknown { kind } => {
                let message = format!("unknown message type '{}'", kind);
                self.send(&Envelope::error(&message, request_id)).await?;
            }
        }

        Ok(())
    }

    async fn send(&mut self, envelope: &Envelope) -> anyhow::Result<()> {
        self.ws.send(Message::Text(envelope.to_json())).await?;
        Ok(())
    }

    fn cleanup(&mut self) {
        self.hub.remove(&self.id);
    }
}

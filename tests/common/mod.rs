//! Common test utilities for relaymesh integration tests
//!
//! This module provides:
//! - `TestHub` for running a daemon instance on an ephemeral port
//! - Raw WebSocket client helpers for driving the wire protocol directly

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use relaymesh::hub::{HubServer, StaticTokenValidator};

pub type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// A daemon instance listening on an ephemeral port.
pub struct TestHub {
    pub server: Arc<HubServer>,
    pub addr: SocketAddr,
    accept_task: JoinHandle<()>,
    conn_tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl TestHub {
    /// Start a hub with a `secret=alice` token on an ephemeral port.
    pub async fn start() -> Self {
        Self::start_on("127.0.0.1:0").await
    }

    /// Start a hub bound to a specific address (used to restart a hub on
    /// the same port for reconnection tests).
    pub async fn start_on(addr: &str) -> Self {
        let validator = Arc::new(StaticTokenValidator::from_pairs(["secret=alice"]));
        let server = Arc::new(HubServer::new(validator).expect("hub server starts"));

        let listener = TcpListener::bind(addr).await.expect("bind test listener");
        let addr = listener.local_addr().unwrap();

        let conn_tasks: Arc<Mutex<Vec<JoinHandle<()>>>> = Arc::new(Mutex::new(Vec::new()));
        let accept_server = Arc::clone(&server);
        let accept_conns = Arc::clone(&conn_tasks);
        let accept_task = tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                let server = Arc::clone(&accept_server);
                let task = tokio::spawn(async move {
                    server.handle(stream).await;
                });
                accept_conns.lock().push(task);
            }
        });

        Self {
            server,
            addr,
            accept_task,
            conn_tasks,
        }
    }

    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Forcibly close every live transport while the endpoint keeps
    /// accepting. Connection tasks are aborted mid-await, so the registry
    /// may briefly hold entries that only clear on the next failed
    /// delivery.
    pub async fn kill_connections(&self) {
        for task in self.conn_tasks.lock().drain(..) {
            task.abort();
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    /// Tear the hub down, force-closing every live connection.
    pub async fn shutdown(self) {
        self.accept_task.abort();
        for task in self.conn_tasks.lock().drain(..) {
            task.abort();
        }
        // Give the runtime a beat to drop the sockets
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

/// Open a raw WebSocket client against the hub.
pub async fn ws_connect(hub: &TestHub) -> WsClient {
    let (ws, _) = connect_async(hub.url()).await.expect("client connects");
    ws
}

/// Send one JSON envelope on a raw client.
pub async fn ws_send(ws: &mut WsClient, json: serde_json::Value) {
    ws.send(Message::Text(json.to_string()))
        .await
        .expect("send succeeds");
}

/// Receive the next text frame as parsed JSON, with a timeout.
pub async fn ws_recv(ws: &mut WsClient) -> serde_json::Value {
    let deadline = Duration::from_secs(5);
    loop {
        let msg = tokio::time::timeout(deadline, ws.next())
            .await
            .expect("message before timeout")
            .expect("stream open")
            .expect("no transport error");
        match msg {
            Message::Text(text) => {
                return serde_json::from_str(&text).expect("valid JSON frame");
            }
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("Unexpected frame: {:?}", other),
        }
    }
}

/// Receive the next text frame, or `None` if the window elapses quietly.
pub async fn ws_try_recv(ws: &mut WsClient, window: Duration) -> Option<serde_json::Value> {
    match tokio::time::timeout(window, ws.next()).await {
        Ok(Some(Ok(Message::Text(text)))) => {
            Some(serde_json::from_str(&text).expect("valid JSON frame"))
        }
        _ => None,
    }
}

/// Connect and consume the welcome envelope, returning the assigned id.
pub async fn ws_connect_welcomed(hub: &TestHub) -> (WsClient, String) {
    let mut ws = ws_connect(hub).await;
    let welcome = ws_recv(&mut ws).await;
    assert_eq!(welcome["type"], "welcome");
    let client_id = welcome["data"]["client_id"]
        .as_str()
        .expect("welcome carries client_id")
        .to_string();
    (ws, client_id)
}

/// Poll until the hub reports `connections` live connections.
pub async fn wait_for_connections(hub: &TestHub, connections: usize) {
    for _ in 0..100 {
        if hub.server.stats().connections == connections {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!(
        "hub never reached {} connections (now {})",
        connections,
        hub.server.stats().connections
    );
}

//! Relaymesh event distribution hub
//!
//! A single daemon that accepts many concurrent WebSocket clients, groups
//! them into named channels, and fans out events sourced from client
//! messages or from the filesystem change watcher.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                     RELAYMESH DAEMON                             │
//! ├──────────────────────────────────────────────────────────────────┤
//! │                                                                  │
//! │  ┌──────────────────────────────────────────────────────────┐   │
//! │  │                   Hub (RwLock'd state)                   │   │
//! │  │                                                          │   │
//! │  │  connections: id ──► outbound queue, user, auth flag     │   │
//! │  │  channels:    name ──► member id set ("global" + lazy)   │   │
//! │  │  users:       user ──► connection id set                 │   │
//! │  └──────────────────────────────────────────────────────────┘   │
//! │                                                                  │
//! │  WebSocket server ──► one task per connection                    │
//! │    - envelope dispatch (ping/auth/subscribe/unsubscribe)         │
//! │    - delivery queue drained into the socket                      │
//! │                                                                  │
//! │  ChangeSource (notify) ──► EventBridge ──► Hub.broadcast         │
//! │    - watch roots double as channel names                         │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Protocol
//!
//! All messages are JSON envelopes over WebSocket:
//!
//! ```json
//! // Client -> Server
//! {"type": "ping", "request_id": "r1"}
//! {"type": "auth", "data": {"token": "..."}}
//! {"type": "subscribe", "data": {"channel": "/srv/docs"}}
//!
//! // Server -> Client
//! {"type": "welcome", "data": {"client_id": "conn_1a2b3c4d", "server_info": {...}}}
//! {"type": "pong", "request_id": "r1"}
//! {"type": "subscribed", "data": {"channel": "/srv/docs"}}
//! {"event_type": "created", "data": {"path": "/srv/docs/x.txt", ...}}
//! ```

pub mod auth;
pub mod connection;
pub mod protocol;
pub mod registry;

use std::path::Path;
use std::sync::Arc;

use crate::error::Result;
use crate::watch::{ChangeSource, EventBridge, WatchRoot};

pub use auth::{StaticTokenValidator, TokenValidator};
pub use connection::handle_connection;
pub use protocol::{ChangeData, ChangeNotification, ClientRequest, Envelope};
pub use registry::{ConnectionId, Hub, HubStats, UserId, GLOBAL_CHANNEL};

/// Owning facade over the hub, the change source, and the bridge task.
///
/// This is the control-plane surface: the daemon (and tests) use it to
/// start watches, query counts, and hand connections off to the hub.
/// Must be created inside a tokio runtime (it spawns the bridge task).
pub struct HubServer {
    hub: Arc<Hub>,
    source: Arc<ChangeSource>,
    validator: Arc<dyn TokenValidator>,
}

impl HubServer {
    /// Wire up the hub, change source, and bridge.
    pub fn new(validator: Arc<dyn TokenValidator>) -> Result<Self> {
        let hub = Arc::new(Hub::new());
        let (source, events) = ChangeSource::new()?;
        let source = Arc::new(source);

        let bridge = EventBridge::new(Arc::clone(&hub), Arc::clone(&source));
        tokio::spawn(bridge.run(events));

        Ok(Self {
            hub,
            source,
            validator,
        })
    }

    /// Shared hub handle for connection tasks.
    pub fn hub(&self) -> Arc<Hub> {
        Arc::clone(&self.hub)
    }

    /// The token validation collaborator.
    pub fn validator(&self) -> Arc<dyn TokenValidator> {
        Arc::clone(&self.validator)
    }

    /// Accept one connection into the hub.
    pub async fn handle(&self, stream: tokio::net::TcpStream) {
        handle_connection(stream, self.hub(), self.validator()).await;
    }

    /// Start watching a directory tree. The root's canonical path becomes
    /// the channel its change events are broadcast on.
    pub fn watch(&self, path: &Path) -> Result<()> {
        self.source.watch(path, true)
    }

    /// Stop forwarding events for a root. Returns whether it was tracked.
    pub fn unwatch(&self, path: &Path) -> bool {
        self.source.unwatch(path)
    }

    /// Tracked watch roots in registration order.
    pub fn watched_roots(&self) -> Vec<WatchRoot> {
        self.source.tracked_roots()
    }

    /// Whether the change source is observing.
    pub fn watcher_running(&self) -> bool {
        self.source.is_running()
    }

    /// Stop the change source. Idempotent.
    pub fn stop_watcher(&self) {
        self.source.stop()
    }

    /// Connection / channel / user counts.
    pub fn stats(&self) -> HubStats {
        self.hub.stats()
    }

    /// The watch-root channels a connection is subscribed to.
    pub fn watched_channels_of(&self, id: &str) -> Vec<String> {
        let roots = self.source.tracked_roots();
        self.hub
            .channels_of(id)
            .into_iter()
            .filter(|channel| roots.iter().any(|r| r.path.display().to_string() == *channel))
            .collect()
    }
}

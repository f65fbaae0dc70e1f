//! Connection registry, channel hub, and user index
//!
//! All shared hub state lives behind a single `RwLock` in [`Hub`]. Every
//! mutation is a short synchronous critical section; no lock is ever held
//! across an await point. Delivery pushes into per-connection outbound
//! queues, so a broadcast never blocks on a slow socket.

use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;
use tokio::sync::mpsc::UnboundedSender;
use tokio_tungstenite::tungstenite::Message;

/// Unique identifier for a live connection
pub type ConnectionId = String;

/// Authenticated user identity
pub type UserId = String;

/// The channel every connection belongs to from register until remove
pub const GLOBAL_CHANNEL: &str = "global";

/// Registry entry for one live connection.
///
/// The outbound sender is the transport handle: the receiving half is
/// drained by the connection's writer task, so a send fails promptly once
/// that task has exited.
struct ConnectionEntry {
    sender: UnboundedSender<Message>,
    user: Option<UserId>,
    authenticated: bool,
}

#[derive(Default)]
struct HubState {
    connections: HashMap<ConnectionId, ConnectionEntry>,
    channels: HashMap<String, HashSet<ConnectionId>>,
    users: HashMap<UserId, HashSet<ConnectionId>>,
}

/// Shared hub state: connection registry, named channels, user index.
pub struct Hub {
    state: RwLock<HubState>,
}

/// Statistics about the hub
#[derive(Debug, Clone)]
pub struct HubStats {
    pub connections: usize,
    pub authenticated: usize,
    pub channels: usize,
    pub users: usize,
}

impl Hub {
    /// Create an empty hub. The `"global"` channel exists from the start.
    pub fn new() -> Self {
        let mut state = HubState::default();
        state.channels.insert(GLOBAL_CHANNEL.to_string(), HashSet::new());
        Self {
            state: RwLock::new(state),
        }
    }

    /// Register a new connection and add it to the `"global"` channel.
    pub fn register(&self, sender: UnboundedSender<Message>) -> ConnectionId {
        let id = format!(
            "conn_{}",
            uuid::Uuid::new_v4().to_string().split('-').next().unwrap()
        );

        let mut state = self.state.write();
        state.connections.insert(
            id.clone(),
            ConnectionEntry {
                sender,
                user: None,
                authenticated: false,
            },
        );
        state
            .channels
            .entry(GLOBAL_CHANNEL.to_string())
            .or_default()
            .insert(id.clone());

        tracing::debug!("Registered connection {}", id);
        id
    }

    /// Remove a connection from the registry, every channel, and the user
    /// index, all under one write lock. Idempotent: removing an unknown id
    /// is a no-op (concurrent double-removal is expected under failure
    /// fan-out).
    pub fn remove(&self, id: &str) {
        let mut state = self.state.write();
        let Some(entry) = state.connections.remove(id) else {
            return;
        };

        for members in state.channels.values_mut() {
            members.remove(id);
        }

        if let Some(user) = entry.user {
            if let Some(conns) = state.users.get_mut(&user) {
                conns.remove(id);
                if conns.is_empty() {
                    state.users.remove(&user);
                }
            }
        }

        tracing::debug!("Removed connection {}", id);
    }

    /// Get the transport handle for a connection.
    pub fn get(&self, id: &str) -> Option<UnboundedSender<Message>> {
        self.state.read().connections.get(id).map(|e| e.sender.clone())
    }

    /// Whether the connection is currently registered.
    pub fn contains(&self, id: &str) -> bool {
        self.state.read().connections.contains_key(id)
    }

    /// Add a connection to a channel, creating the channel lazily.
    /// Idempotent: subscribing twice leaves membership unchanged.
    pub fn subscribe(&self, id: &str, channel: &str) {
        let mut state = self.state.write();
        if !state.connections.contains_key(id) {
            // Membership must never outlive the registry entry
            return;
        }
        state
            .channels
            .entry(channel.to_string())
            .or_default()
            .insert(id.to_string());
    }

    /// Remove a connection from a channel. No-op if not a member.
    pub fn unsubscribe(&self, id: &str, channel: &str) {
        let mut state = self.state.write();
        if let Some(members) = state.channels.get_mut(channel) {
            members.remove(id);
        }
    }

    /// Record a successful authentication for a connection.
    ///
    /// A user may hold several simultaneous connections; each one is added
    /// to the user's connection set.
    pub fn bind_user(&self, id: &str, user: &str) {
        let mut state = self.state.write();
        let Some(entry) = state.connections.get_mut(id) else {
            return;
        };
        entry.user = Some(user.to_string());
        entry.authenticated = true;
        state
            .users
            .entry(user.to_string())
            .or_default()
            .insert(id.to_string());
    }

    /// Send a message to every member of a channel.
    ///
    /// Membership is snapshotted before delivery, so concurrent subscribe /
    /// unsubscribe during the fan-out cannot corrupt the iteration. A failed
    /// delivery evicts that connection and delivery continues to the
    /// remaining members. Broadcasting to an unknown channel delivers to
    /// nobody and is not an error.
    pub fn broadcast(&self, channel: &str, text: &str) -> usize {
        let targets: Vec<(ConnectionId, UnboundedSender<Message>)> = {
            let state = self.state.read();
            let Some(members) = state.channels.get(channel) else {
                tracing::debug!("Broadcast to unknown channel '{}'", channel);
                return 0;
            };
            members
                .iter()
                .filter_map(|id| {
                    state
                        .connections
                        .get(id)
                        .map(|e| (id.clone(), e.sender.clone()))
                })
                .collect()
        };

        self.deliver(targets, text)
    }

    /// Send a message to every connection held by a user, with the same
    /// delivery-with-eviction behavior as [`Hub::broadcast`].
    pub fn send_to_user(&self, user: &str, text: &str) -> usize {
        let targets: Vec<(ConnectionId, UnboundedSender<Message>)> = {
            let state = self.state.read();
            let Some(conns) = state.users.get(user) else {
                return 0;
            };
            conns
                .iter()
                .filter_map(|id| {
                    state
                        .connections
                        .get(id)
                        .map(|e| (id.clone(), e.sender.clone()))
                })
                .collect()
        };

        self.deliver(targets, text)
    }

    /// Push one whole-message write per target; evict targets whose writer
    /// task is gone. Returns the number of successful deliveries.
    fn deliver(&self, targets: Vec<(ConnectionId, UnboundedSender<Message>)>, text: &str) -> usize {
        let mut delivered = 0;
        for (id, sender) in targets {
            match sender.send(Message::Text(text.to_string())) {
                Ok(()) => delivered += 1,
                Err(_) => {
                    tracing::warn!("Delivery to {} failed, evicting", id);
                    self.remove(&id);
                }
            }
        }
        delivered
    }

    /// Channels this connection is currently a member of.
    pub fn channels_of(&self, id: &str) -> Vec<String> {
        let state = self.state.read();
        state
            .channels
            .iter()
            .filter(|(_, members)| members.contains(id))
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Current member count of a channel (0 for unknown channels).
    pub fn member_count(&self, channel: &str) -> usize {
        self.state
            .read()
            .channels
            .get(channel)
            .map(|m| m.len())
            .unwrap_or(0)
    }

    /// Stats about the hub: connection, channel, and user counts.
    pub fn stats(&self) -> HubStats {
        let state = self.state.read();
        HubStats {
            connections: state.connections.len(),
            authenticated: state
                .connections
                .values()
                .filter(|e| e.authenticated)
                .count(),
            channels: state.channels.len(),
            users: state.users.len(),
        }
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Hub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let stats = self.stats();
        f.debug_struct("Hub")
            .field("connections", &stats.connections)
            .field("channels", &stats.channels)
            .field("users", &stats.users)
            .finish()
    }
}

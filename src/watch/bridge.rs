//! Event bridge: filesystem changes → channel broadcasts
//!
//! Consumes the [`ChangeSource`] event stream, resolves which watch root
//! owns each event, and broadcasts the wire notification on the channel
//! named by that root's canonical path.
//!
//! Root resolution is first-match in registration order. With overlapping
//! roots (a root and a nested sub-root both tracked) an event is delivered
//! to exactly one channel, whichever root registered first. Deliberate:
//! callers who want ancestor fan-out must register non-overlapping roots.

use std::path::Path;
use std::sync::Arc;

use tokio::sync::mpsc::UnboundedReceiver;

use crate::hub::protocol::ChangeNotification;
use crate::hub::registry::Hub;
use crate::watch::source::{ChangeSource, FsChangeEvent, WatchRoot};

/// Bridges the change source into hub broadcasts.
pub struct EventBridge {
    hub: Arc<Hub>,
    source: Arc<ChangeSource>,
}

impl EventBridge {
    pub fn new(hub: Arc<Hub>, source: Arc<ChangeSource>) -> Self {
        Self { hub, source }
    }

    /// Drain the event stream until the source is dropped.
    ///
    /// Spawn as a task: `tokio::spawn(bridge.run(rx))`.
    pub async fn run(self, mut rx: UnboundedReceiver<FsChangeEvent>) {
        while let Some(event) = rx.recv().await {
            self.forward(&event);
        }
        tracing::debug!("Change source closed, bridge exiting");
    }

    fn forward(&self, event: &FsChangeEvent) {
        let roots = self.source.tracked_roots();
        let Some(channel) = resolve_root(&roots, &event.path) else {
            tracing::debug!("No tracked root for {:?}, dropping", event.path);
            return;
        };

        let notification = ChangeNotification::from_event(event);
        let delivered = self.hub.broadcast(&channel, &notification.to_json());
        tracing::debug!(
            "Forwarded {:?} {:?} to '{}' ({} subscribers)",
            event.kind,
            event.path,
            channel,
            delivered
        );
    }
}

/// Find the channel for an event path: the first tracked root (registration
/// order) whose path is an ancestor of, or equal to, the event path.
pub fn resolve_root(roots: &[WatchRoot], path: &Path) -> Option<String> {
    roots
        .iter()
        .find(|root| path.starts_with(&root.path))
        .map(|root| root.path.display().to_string())
}

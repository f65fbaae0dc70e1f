//! Relaymesh: real-time event distribution fabric
//!
//! A publish/subscribe hub that accepts many concurrent WebSocket clients,
//! organizes them into named channels, and fans out events sourced either
//! from direct client messages or from a filesystem change watcher. The
//! crate also ships the consumer-side counterpart: a client that
//! transparently reconnects and resumes operation after failures.
//!
//! # Components
//!
//! - [`hub`] — connection registry, channel hub, user index, wire protocol,
//!   and the per-connection dispatch loop
//! - [`watch`] — filesystem change source (`notify`) and the event bridge
//!   that turns changes into channel broadcasts
//! - [`client`] — reconnecting WebSocket client with blocking-until-ready
//!   send/receive
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use relaymesh::hub::{HubServer, StaticTokenValidator};
//!
//! let validator = Arc::new(StaticTokenValidator::from_pairs(["secret=alice"]));
//! let server = Arc::new(HubServer::new(validator)?);
//! server.watch(std::path::Path::new("/srv/docs"))?;
//!
//! let listener = tokio::net::TcpListener::bind("127.0.0.1:9870").await?;
//! loop {
//!     let (stream, _) = listener.accept().await?;
//!     let server = Arc::clone(&server);
//!     tokio::spawn(async move { server.handle(stream).await });
//! }
//! ```

pub mod client;
pub mod error;
pub mod hub;
pub mod watch;

// Re-export commonly used types
pub use client::{ClientConfig, ClientState, ReconnectingClient};
pub use error::{HubError, Result};
pub use hub::{
    handle_connection, ChangeNotification, Envelope, Hub, HubServer, HubStats,
    StaticTokenValidator, TokenValidator, GLOBAL_CHANNEL,
};
pub use watch::{ChangeKind, ChangeSource, EventBridge, FsChangeEvent, WatchRoot};

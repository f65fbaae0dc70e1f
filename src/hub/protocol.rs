//! Hub wire protocol message types
//!
//! Defines the JSON envelope format exchanged with connected clients.
//! Every message in both directions is a single envelope:
//!
//! ```json
//! {"type": "ping", "data": null, "request_id": "r1"}
//! ```
//!
//! `data` and `request_id` are omitted from the serialized form when absent,
//! so a bare `{"type":"pong"}` is a valid envelope.

use serde::{Deserialize, Serialize};

use crate::error::HubError;
use crate::watch::{ChangeKind, FsChangeEvent};

/// A single wire message, either direction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    /// Message type tag (`ping`, `auth`, `subscribe`, ...)
    #[serde(rename = "type")]
    pub kind: String,
    /// Type-specific payload object
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    /// Correlation id echoed back in direct replies
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl Envelope {
    /// Serialize to the single-line JSON wire form.
    pub fn to_json(&self) -> String {
        // Envelope contains only JSON-representable fields
        serde_json::to_string(self).expect("envelope serializes")
    }

    /// Greeting sent to every freshly accepted connection.
    pub fn welcome(client_id: &str) -> Self {
        Self {
            kind: "welcome".to_string(),
            data: Some(serde_json::json!({
                "client_id": client_id,
                "server_info": {
                    "name": env!("CARGO_PKG_NAME"),
                    "version": env!("CARGO_PKG_VERSION"),
                },
            })),
            request_id: None,
        }
    }

    /// Reply to `ping`, echoing the request id.
    pub fn pong(request_id: Option<String>) -> Self {
        Self {
            kind: "pong".to_string(),
            data: None,
            request_id,
        }
    }

    /// Subscription confirmation.
    pub fn subscribed(channel: &str, request_id: Option<String>) -> Self {
        Self {
            kind: "subscribed".to_string(),
            data: Some(serde_json::json!({ "channel": channel })),
            request_id,
        }
    }

    /// Unsubscription confirmation.
    pub fn unsubscribed(channel: &str, request_id: Option<String>) -> Self {
        Self {
            kind: "unsubscribed".to_string(),
            data: Some(serde_json::json!({ "channel": channel })),
            request_id,
        }
    }

    /// Authentication failure reply. The connection stays open.
    pub fn auth_error(message: &str, request_id: Option<String>) -> Self {
        Self {
            kind: "auth_error".to_string(),
            data: Some(serde_json::json!({ "message": message })),
            request_id,
        }
    }

    /// Generic protocol error reply. The connection stays open.
    pub fn error(message: &str, request_id: Option<String>) -> Self {
        Self {
            kind: "error".to_string(),
            data: Some(serde_json::json!({ "message": message })),
            request_id,
        }
    }
}

/// Inbound request decoded from an [`Envelope`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientRequest {
    Ping,
    Auth { token: String },
    Subscribe { channel: String },
    Unsubscribe { channel: String },
    /// Recognized envelope shape but unrecognized type tag
    Unknown { kind: String },
}

impl ClientRequest {
    /// Decode the typed request out of an envelope.
    ///
    /// Returns a protocol error when a recognized type is missing a
    /// required data field; the caller reports it back and keeps the
    /// connection open.
    pub fn from_envelope(envelope: &Envelope) -> std::result::Result<Self, HubError> {
        let field = |name: &str| -> std::result::Result<String, HubError> {
            envelope
                .data
                .as_ref()
                .and_then(|d| d.get(name))
                .and_then(|v| v.as_str())
                .map(|s| s.to_string())
                .ok_or_else(|| HubError::Protocol {
                    message: format!("missing '{}' field in '{}' data", name, envelope.kind),
                })
        };

        match envelope.kind.as_str() {
            "ping" => Ok(Self::Ping),
            "auth" => Ok(Self::Auth {
                token: field("token")?,
            }),
            "subscribe" => Ok(Self::Subscribe {
                channel: field("channel")?,
            }),
            "unsubscribe" => Ok(Self::Unsubscribe {
                channel: field("channel")?,
            }),
            other => Ok(Self::Unknown {
                kind: other.to_string(),
            }),
        }
    }
}

/// Filesystem change notification pushed to watch-root subscribers.
///
/// Uses `event_type` rather than `type` to keep change notifications
/// distinguishable from direct envelope replies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeNotification {
    pub event_type: String,
    pub data: ChangeData,
}

/// Payload of a [`ChangeNotification`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeData {
    pub path: String,
    /// ISO 8601 timestamp
    pub timestamp: String,
    pub is_directory: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_path: Option<String>,
}

impl ChangeNotification {
    /// Build the wire notification for a source-level change event.
    pub fn from_event(event: &FsChangeEvent) -> Self {
        let event_type = match event.kind {
            ChangeKind::Created => "created",
            ChangeKind::Modified => "modified",
            ChangeKind::Deleted => "deleted",
            ChangeKind::Moved => "moved",
        };
        Self {
            event_type: event_type.to_string(),
            data: ChangeData {
                path: event.path.display().to_string(),
                timestamp: event.timestamp.to_rfc3339(),
                is_directory: event.is_directory,
                old_path: event
                    .previous_path
                    .as_ref()
                    .map(|p| p.display().to_string()),
            },
        }
    }

    /// Serialize to the single-line JSON wire form.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("notification serializes")
    }
}

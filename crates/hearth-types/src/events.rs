use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{NotificationKind, UserSummary};

/// Events sent over the WebSocket gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayEvent {
    /// Server confirms successful authentication
    Ready { user_id: Uuid, username: String },

    /// A notification was just persisted for this session's user. Advisory:
    /// the notifications table is the source of truth and clients fetch it
    /// independently of whether this push arrived.
    NotificationNew {
        id: Uuid,
        kind: NotificationKind,
        body: String,
        sender: UserSummary,
        metadata: serde_json::Value,
        created_at: chrono::DateTime<chrono::Utc>,
    },

    /// A user came online or went offline
    PresenceUpdate {
        user_id: Uuid,
        username: String,
        online: bool,
    },
}

/// Commands sent FROM client TO server over WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayCommand {
    /// Authenticate the WebSocket connection
    Identify { token: String },
}

/// Stable channel key addressing all of a user's live sessions.
pub fn channel_key(user_id: Uuid) -> String {
    format!("user_{user_id}")
}

/// Best-effort push of events to a receiver's live sessions. Fire-and-forget:
/// no acknowledgement, no retry, silent no-op when nobody is connected.
///
/// The interaction handlers only ever see this trait, so notification
/// creation is testable without a transport. Canonical definition lives here
/// in hearth-types for the same reason Claims does: one contract consumed by
/// both hearth-api and hearth-gateway.
pub trait EventSink: Send + Sync {
    fn publish(&self, receiver_id: Uuid, event: GatewayEvent);
}

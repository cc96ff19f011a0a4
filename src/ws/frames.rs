// SPDX-License-Identifier: MIT

//! Wire frames for the WebSocket endpoint.
//!
//! Inbound frames are `{id?, event, data}` envelopes demultiplexed by event
//! name; each event's payload parses into a strongly typed structure, and an
//! unknown event name is a validation failure with no side effects. Outbound
//! traffic is either an `ack` envelope (echoing the client-chosen `id`) or a
//! [`ServerEvent`] push frame.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::{ChatMessage, MessageMetadata};

/// Event names, as spoken on the wire.
pub mod events {
    pub const AUTH: &str = "auth";

    pub const SESSION_START: &str = "session:start";
    pub const SESSION_END: &str = "session:end";
    pub const LOCATION_PING: &str = "location:ping";
    pub const LOCATION_SUBSCRIBE: &str = "location:subscribe";

    pub const CHAT_JOIN: &str = "chat:join";
    pub const CHAT_LEAVE: &str = "chat:leave";
    pub const CHAT_SEND: &str = "chat:send";
    pub const CHAT_TYPING: &str = "chat:typing";
    pub const CHAT_READ: &str = "chat:read";
    pub const CHAT_HISTORY: &str = "chat:history";
}

/// Whether the gateway acknowledges this event. `chat:typing` is the single
/// fire-and-forget event; existing clients depend on the asymmetry.
pub fn expects_ack(event: &str) -> bool {
    event != events::CHAT_TYPING
}

/// An inbound frame before payload typing.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientEnvelope {
    /// Client-chosen correlation id, echoed in the ack.
    #[serde(default)]
    pub id: Option<u64>,
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

impl ClientEnvelope {
    /// Parse the payload for the event this envelope claims to carry.
    pub fn payload<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.data.clone())
            .map_err(|e| AppError::Validation(format!("{}: {}", self.event, e)))
    }
}

// ─── Inbound payloads ────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct AuthPayload {
    pub token: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStartPayload {
    #[serde(default)]
    pub resort_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionEndPayload {
    pub session_id: Uuid,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationPingPayload {
    pub session_id: Uuid,
    pub lat: f64,
    pub lon: f64,
    pub altitude: f64,
    pub speed: f64,
    pub accuracy: f64,
    #[serde(default)]
    pub heading: Option<f64>,
    /// Capture time, epoch milliseconds.
    pub timestamp: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationSubscribePayload {
    pub friend_ids: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatTargetPayload {
    #[serde(default)]
    pub group_id: Option<String>,
    #[serde(default)]
    pub recipient_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatLeavePayload {
    pub room_id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSendPayload {
    #[serde(default)]
    pub group_id: Option<String>,
    #[serde(default)]
    pub recipient_id: Option<String>,
    pub content: String,
    #[serde(default)]
    pub metadata: Option<MessageMetadata>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatTypingPayload {
    #[serde(default)]
    pub group_id: Option<String>,
    #[serde(default)]
    pub recipient_id: Option<String>,
    pub is_typing: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatReadPayload {
    pub message_id: Uuid,
    #[serde(default)]
    pub group_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatHistoryPayload {
    #[serde(default)]
    pub group_id: Option<String>,
    #[serde(default)]
    pub recipient_id: Option<String>,
    #[serde(default)]
    pub limit: Option<i64>,
}

// ─── Outbound push frames ────────────────────────────────────────

/// A location update delivered to a nearby friend's connections.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationUpdate {
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    pub lat: f64,
    pub lon: f64,
    pub altitude: f64,
    pub speed: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heading: Option<f64>,
    /// Distance to the receiving friend, meters.
    pub distance: f64,
    /// Capture time, epoch milliseconds.
    pub timestamp: i64,
}

/// A proximity alert delivered to the PINGING user (not the friend).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProximityAlert {
    pub friend_id: String,
    pub friend_name: String,
    pub distance: f64,
    pub lat: f64,
    pub lon: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingUpdate {
    pub room_id: String,
    pub user_id: String,
    pub is_typing: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadReceipt {
    pub message_id: Uuid,
    pub room_id: String,
    pub user_id: String,
    pub read_at: chrono::DateTime<chrono::Utc>,
}

/// Server-initiated frames, tagged the same way clients tag theirs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    #[serde(rename = "location:update")]
    LocationUpdate(LocationUpdate),
    #[serde(rename = "location:proximity")]
    Proximity(ProximityAlert),
    #[serde(rename = "chat:message")]
    ChatMessage(ChatMessage),
    #[serde(rename = "chat:typing")]
    Typing(TypingUpdate),
    #[serde(rename = "chat:read")]
    Read(ReadReceipt),
}

impl ServerEvent {
    pub fn to_wire(&self) -> String {
        // Serialization of these enums cannot fail; the fallback keeps the
        // send path total.
        serde_json::to_string(self).unwrap_or_else(|_| "{\"event\":\"error\"}".to_string())
    }
}

// ─── Acknowledgement payloads ────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct BasicAck {
    pub success: bool,
}

impl BasicAck {
    pub fn ok() -> Self {
        Self { success: true }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStartAck {
    pub success: bool,
    pub session_id: Uuid,
    /// Epoch milliseconds.
    pub start_time: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionEndAck {
    pub success: bool,
    pub summary: crate::models::SessionSummary,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatJoinAck {
    pub success: bool,
    pub room_id: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSendAck {
    pub success: bool,
    pub message_id: Uuid,
    pub sent_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatHistoryAck {
    pub success: bool,
    pub messages: Vec<ChatMessage>,
}

/// Build an acknowledgement frame, echoing the client id when present.
pub fn ack_frame(id: Option<u64>, data: Value) -> String {
    let envelope = match id {
        Some(id) => serde_json::json!({ "event": "ack", "id": id, "data": data }),
        None => serde_json::json!({ "event": "ack", "data": data }),
    };
    envelope.to_string()
}

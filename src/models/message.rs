// SPDX-License-Identifier: MIT

//! Chat messages and their typed metadata variants.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::room::Room;

/// Hard bound on message content length, in characters.
pub const MAX_CONTENT_CHARS: usize = 2000;

/// Optional structured payload attached to a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageMetadata {
    Text,
    Image { url: String },
    Location { lat: f64, lon: f64 },
    MeetupRequest { id: String },
}

/// A chat message. Exactly one of `group_id` / `recipient_id` is set;
/// `sent_at` is server-assigned and monotonic per room. Messages are never
/// deleted by the core; `read_by` is the only field that mutates.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: Uuid,
    pub sender_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recipient_id: Option<String>,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<MessageMetadata>,
    #[serde(default)]
    pub read_by: Vec<String>,
    pub sent_at: DateTime<Utc>,
}

impl ChatMessage {
    /// The room this message belongs to, derived from its target fields.
    pub fn room(&self) -> Option<Room> {
        match (&self.group_id, &self.recipient_id) {
            (Some(g), None) => Some(Room::group(g.clone())),
            (None, Some(r)) => Some(Room::dm(self.sender_id.clone(), r.clone())),
            _ => None,
        }
    }
}

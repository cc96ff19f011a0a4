// SPDX-License-Identifier: MIT

//! Typed room identity.
//!
//! Rooms are derived, never stored: a group room from its group id, a direct
//! room from the canonically ordered pair of user ids. Encoding the identity
//! as a sum type means access checks and channel naming share one source of
//! truth and cannot disagree.
//!
//! The direct-room id joins the two user ids with `_`. User ids come from
//! an external token issuer and may themselves contain underscores, so each
//! id is escaped (`%` → `%25`, `_` → `%5F`) before joining; the single raw
//! underscore in a canonical id is therefore always the separator. Ids free
//! of both characters — the common case — render unchanged.

use crate::error::{AppError, Result};

/// A chat room identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Room {
    /// A group room; membership is proven by a group-members row.
    Group(String),
    /// A direct room between two users, ids canonically ordered;
    /// membership is proven by an accepted friendship.
    Dm(String, String),
}

impl Room {
    pub fn group(group_id: impl Into<String>) -> Self {
        Room::Group(group_id.into())
    }

    /// Direct room for two users, order-independent.
    pub fn dm(a: impl Into<String>, b: impl Into<String>) -> Self {
        let (a, b) = (a.into(), b.into());
        if a <= b {
            Room::Dm(a, b)
        } else {
            Room::Dm(b, a)
        }
    }

    /// Resolve a room from a chat payload's `groupId`/`recipientId` pair.
    /// Exactly one of the two must be present.
    pub fn from_target(
        user_id: &str,
        group_id: Option<&str>,
        recipient_id: Option<&str>,
    ) -> Result<Self> {
        match (group_id, recipient_id) {
            (Some(g), None) if !g.is_empty() => Ok(Room::group(g)),
            (None, Some(r)) if !r.is_empty() && r != user_id => Ok(Room::dm(user_id, r)),
            (None, Some(r)) if r == user_id => Err(AppError::Validation(
                "recipient must differ from sender".to_string(),
            )),
            _ => Err(AppError::Validation(
                "exactly one of groupId or recipientId is required".to_string(),
            )),
        }
    }

    /// Parse a canonical room id string back into its typed form.
    pub fn parse(room_id: &str) -> Option<Self> {
        if let Some(group_id) = room_id.strip_prefix("group:") {
            if group_id.is_empty() {
                return None;
            }
            return Some(Room::Group(group_id.to_string()));
        }
        if let Some(pair) = room_id.strip_prefix("dm:") {
            let (a, b) = pair.split_once('_')?;
            let a = decode_dm_part(a)?;
            let b = decode_dm_part(b)?;
            if a.is_empty() || b.is_empty() || a > b {
                return None;
            }
            return Some(Room::Dm(a, b));
        }
        None
    }

    /// Canonical room id: `group:{groupId}` or `dm:{min}_{max}` with each
    /// user id escaped so the joining underscore is unambiguous.
    pub fn id(&self) -> String {
        match self {
            Room::Group(g) => format!("group:{}", g),
            Room::Dm(a, b) => format!("dm:{}_{}", encode_dm_part(a), encode_dm_part(b)),
        }
    }

    /// For a direct room, the participant that is not `user_id`.
    pub fn dm_counterpart(&self, user_id: &str) -> Option<&str> {
        match self {
            Room::Dm(a, b) if a == user_id => Some(b),
            Room::Dm(a, b) if b == user_id => Some(a),
            _ => None,
        }
    }
}

/// Escape one side of a direct-room pair so the joining `_` stays unique.
fn encode_dm_part(id: &str) -> String {
    id.replace('%', "%25").replace('_', "%5F")
}

/// Strict inverse of [`encode_dm_part`]. A raw `_` or a `%` not followed by
/// one of the two escape codes means the id was never produced by the
/// encoder, so the whole room id is rejected.
fn decode_dm_part(encoded: &str) -> Option<String> {
    let mut out = String::with_capacity(encoded.len());
    let mut chars = encoded.chars();
    while let Some(c) = chars.next() {
        match c {
            '_' => return None,
            '%' => match (chars.next(), chars.next()) {
                (Some('2'), Some('5')) => out.push('%'),
                (Some('5'), Some('F')) => out.push('_'),
                _ => return None,
            },
            other => out.push(other),
        }
    }
    Some(out)
}

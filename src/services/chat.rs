// SPDX-License-Identifier: MIT

//! Realtime chat engine.
//!
//! Rooms are derived identities (`models::room`); authorization is proven
//! against the durable store on every call, with no node-local caching, so
//! revoked access takes effect immediately. Messages write through to the
//! hot cache (newest at the head, bounded length, TTL refreshed on access)
//! and broadcast across the fleet via the backplane.

use std::sync::Arc;

use chrono::Utc;

use crate::cache::{keys, HotCache};
use crate::config::Config;
use crate::db::WarmDb;
use crate::error::{AppError, Result};
use crate::models::message::MAX_CONTENT_CHARS;
use crate::models::{ChatMessage, Room};
use crate::services::jobs::{AfterWritePayload, JobQueue, TOPIC_CHAT_AFTER_WRITE};
use crate::ws::backplane::Backplane;
use crate::ws::frames::{
    BasicAck, ChatHistoryAck, ChatHistoryPayload, ChatJoinAck, ChatLeavePayload, ChatReadPayload,
    ChatSendAck, ChatSendPayload, ChatTargetPayload, ChatTypingPayload, ReadReceipt, ServerEvent,
    TypingUpdate,
};
use crate::ws::registry::{Connection, ConnectionRegistry};

/// Default and maximum `chat:history` page sizes.
pub const DEFAULT_HISTORY_LIMIT: i64 = 50;
pub const MAX_HISTORY_LIMIT: i64 = 100;

pub struct ChatEngine {
    hot: HotCache,
    warm: WarmDb,
    queue: JobQueue,
    backplane: Arc<Backplane>,
    registry: Arc<ConnectionRegistry>,
    cache_size: usize,
    cache_ttl_seconds: i64,
    typing_ttl_seconds: i64,
}

impl ChatEngine {
    pub fn new(
        hot: HotCache,
        warm: WarmDb,
        queue: JobQueue,
        backplane: Arc<Backplane>,
        registry: Arc<ConnectionRegistry>,
        config: &Config,
    ) -> Self {
        Self {
            hot,
            warm,
            queue,
            backplane,
            registry,
            cache_size: config.chat_cache_size,
            cache_ttl_seconds: config.chat_cache_ttl_seconds,
            typing_ttl_seconds: config.typing_ttl_seconds,
        }
    }

    // ─── Join / Leave ────────────────────────────────────────────

    /// `chat:join`. Resolves the canonical room, proves access, and wires
    /// the node into the room's bus channel on first local subscriber.
    pub async fn join(
        &self,
        conn: &Arc<Connection>,
        payload: ChatTargetPayload,
    ) -> Result<ChatJoinAck> {
        let room = Room::from_target(
            &conn.user_id,
            payload.group_id.as_deref(),
            payload.recipient_id.as_deref(),
        )?;
        self.check_access(&conn.user_id, &room).await?;

        let room_id = room.id();
        if self.registry.join_room(conn, &room_id) {
            self.backplane.subscribe_room(&room_id);
        }
        self.hot
            .sadd(&keys::user_rooms(&conn.user_id), &room_id)
            .await?;
        self.hot
            .sadd(&keys::room_members(&room_id), &conn.user_id)
            .await?;

        tracing::debug!(user_id = %conn.user_id, room_id = %room_id, "Joined room");
        Ok(ChatJoinAck {
            success: true,
            room_id,
        })
    }

    /// `chat:leave`. Inverse of join; also clears the typing flag and tells
    /// the room the user stopped typing.
    pub async fn leave(&self, conn: &Arc<Connection>, payload: ChatLeavePayload) -> Result<BasicAck> {
        let room = Room::parse(&payload.room_id)
            .ok_or_else(|| AppError::Validation(format!("bad room id {}", payload.room_id)))?;
        self.leave_room(conn, &room.id()).await?;
        Ok(BasicAck::ok())
    }

    /// Shared leave path, also used by disconnect accounting.
    pub async fn leave_room(&self, conn: &Arc<Connection>, room_id: &str) -> Result<()> {
        if self.registry.leave_room(conn, room_id) {
            self.backplane.unsubscribe_room(room_id);
        }
        self.hot
            .srem(&keys::user_rooms(&conn.user_id), room_id)
            .await?;
        self.hot
            .srem(&keys::room_members(room_id), &conn.user_id)
            .await?;
        self.stop_typing(conn, room_id).await?;

        tracing::debug!(user_id = %conn.user_id, room_id = %room_id, "Left room");
        Ok(())
    }

    // ─── Send / History ──────────────────────────────────────────

    /// `chat:send`, the authoritative algorithm: access check, durable
    /// insert, cache write-through, after-write job, broadcast, implicit
    /// stop-typing.
    pub async fn send(
        &self,
        conn: &Arc<Connection>,
        payload: ChatSendPayload,
    ) -> Result<ChatSendAck> {
        let room = Room::from_target(
            &conn.user_id,
            payload.group_id.as_deref(),
            payload.recipient_id.as_deref(),
        )?;
        self.check_access(&conn.user_id, &room).await?;

        if payload.content.is_empty() {
            return Err(AppError::Validation("empty message content".to_string()));
        }
        if payload.content.chars().count() > MAX_CONTENT_CHARS {
            return Err(AppError::Validation(format!(
                "content exceeds {} characters",
                MAX_CONTENT_CHARS
            )));
        }

        let message = self
            .warm
            .insert_message(
                &conn.user_id,
                payload.group_id.as_deref(),
                payload.recipient_id.as_deref(),
                &payload.content,
                payload.metadata.as_ref(),
            )
            .await?;

        let room_id = room.id();

        // The message is durable; everything past this point is best-effort
        // and must not fail the call.
        if let Err(e) = self.cache_message(&room_id, &message).await {
            tracing::warn!(room_id = %room_id, error = %e, "Message cache write failed");
        }
        if let Err(e) = self
            .queue
            .enqueue(
                TOPIC_CHAT_AFTER_WRITE,
                &AfterWritePayload {
                    message_id: message.id,
                    room_id: room_id.clone(),
                },
            )
            .await
        {
            tracing::warn!(message_id = %message.id, error = %e, "After-write enqueue failed");
        }
        if let Err(e) = self
            .backplane
            .publish_to_room(&room_id, None, ServerEvent::ChatMessage(message.clone()))
            .await
        {
            tracing::warn!(room_id = %room_id, error = %e, "Message broadcast failed");
        }
        // Sending is an implicit "stopped typing"; the message itself is
        // the signal, so no extra typing broadcast.
        if let Err(e) = self
            .hot
            .del(&keys::typing(&room_id, &conn.user_id))
            .await
        {
            tracing::debug!(error = %e, "Typing flag cleanup failed");
        }

        Ok(ChatSendAck {
            success: true,
            message_id: message.id,
            sent_at: message.sent_at,
        })
    }

    /// `chat:history`: hot list first (returned head-newest as cached), on
    /// miss the durable store, warming the cache for the next reader.
    pub async fn history(
        &self,
        conn: &Arc<Connection>,
        payload: ChatHistoryPayload,
    ) -> Result<ChatHistoryAck> {
        let room = Room::from_target(
            &conn.user_id,
            payload.group_id.as_deref(),
            payload.recipient_id.as_deref(),
        )?;
        self.check_access(&conn.user_id, &room).await?;

        let limit = clamp_history_limit(payload.limit);
        let cache_key = keys::chat_messages(&room.id());

        let cached = self.hot.lrange(&cache_key, 0, limit as isize - 1).await?;
        if !cached.is_empty() {
            self.hot.expire(&cache_key, self.cache_ttl_seconds).await?;
            let messages = cached
                .iter()
                .filter_map(|raw| match serde_json::from_str(raw) {
                    Ok(message) => Some(message),
                    Err(e) => {
                        tracing::warn!(error = %e, "Skipping unreadable cached message");
                        None
                    }
                })
                .collect();
            return Ok(ChatHistoryAck {
                success: true,
                messages,
            });
        }

        let newest_first = self.warm.recent_messages(&room, limit).await?;
        if !newest_first.is_empty() {
            if let Err(e) = self.refill_cache(&cache_key, &newest_first).await {
                tracing::warn!(error = %e, "History cache refill failed");
            }
        }

        let mut chronological = newest_first;
        chronological.reverse();
        Ok(ChatHistoryAck {
            success: true,
            messages: chronological,
        })
    }

    // ─── Typing / Read Receipts ──────────────────────────────────

    /// `chat:typing`. Fire-and-forget: no acknowledgement, and a connection
    /// that never joined the room is ignored (local check, no suspension).
    pub async fn typing(&self, conn: &Arc<Connection>, payload: ChatTypingPayload) -> Result<()> {
        let room = Room::from_target(
            &conn.user_id,
            payload.group_id.as_deref(),
            payload.recipient_id.as_deref(),
        )?;
        let room_id = room.id();
        if !conn.in_room(&room_id) {
            return Ok(());
        }

        let flag_key = keys::typing(&room_id, &conn.user_id);
        if payload.is_typing {
            self.hot
                .set_ex(&flag_key, "1", self.typing_ttl_seconds.max(0) as u64)
                .await?;
        } else {
            self.hot.del(&flag_key).await?;
        }

        // Everyone in the room but the typist hears about it.
        self.backplane
            .publish_to_room(
                &room_id,
                Some(conn.id),
                ServerEvent::Typing(TypingUpdate {
                    room_id: room_id.clone(),
                    user_id: conn.user_id.clone(),
                    is_typing: payload.is_typing,
                }),
            )
            .await
    }

    /// `chat:read`. Idempotent: the second call for the same (message,
    /// user) changes nothing and broadcasts nothing.
    pub async fn read(&self, conn: &Arc<Connection>, payload: ChatReadPayload) -> Result<BasicAck> {
        let message = self
            .warm
            .get_message(payload.message_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("message {}", payload.message_id)))?;

        let room = message.room().ok_or_else(|| {
            AppError::Fatal(format!(
                "message {} has no derivable room",
                payload.message_id
            ))
        })?;
        self.check_access(&conn.user_id, &room).await?;

        let changed = self
            .warm
            .append_read_by(message.id, &conn.user_id)
            .await?;

        if changed {
            let room_id = room.id();
            if let Err(e) = self
                .backplane
                .publish_to_room(
                    &room_id,
                    None,
                    ServerEvent::Read(ReadReceipt {
                        message_id: message.id,
                        room_id: room_id.clone(),
                        user_id: conn.user_id.clone(),
                        read_at: Utc::now(),
                    }),
                )
                .await
            {
                tracing::warn!(message_id = %message.id, error = %e, "Read receipt broadcast failed");
            }
        }

        Ok(BasicAck::ok())
    }

    /// Clear the typing flag and tell the room, skipping the connection
    /// itself. Used on leave and on disconnect.
    async fn stop_typing(&self, conn: &Arc<Connection>, room_id: &str) -> Result<()> {
        self.hot
            .del(&keys::typing(room_id, &conn.user_id))
            .await?;
        self.backplane
            .publish_to_room(
                room_id,
                Some(conn.id),
                ServerEvent::Typing(TypingUpdate {
                    room_id: room_id.to_string(),
                    user_id: conn.user_id.clone(),
                    is_typing: false,
                }),
            )
            .await
    }

    // ─── Access ──────────────────────────────────────────────────

    /// Room access rules: a group-members row for group rooms, an accepted
    /// friendship for direct rooms. Always checked against the durable
    /// store; denial reasons never leave the server.
    async fn check_access(&self, user_id: &str, room: &Room) -> Result<()> {
        let allowed = match room {
            Room::Group(group_id) => self.warm.is_group_member(group_id, user_id).await?,
            Room::Dm(_, _) => match room.dm_counterpart(user_id) {
                Some(other) => self.warm.are_friends(user_id, other).await?,
                None => false,
            },
        };
        if allowed {
            Ok(())
        } else {
            Err(AppError::Forbidden(format!(
                "{} may not access {}",
                user_id,
                room.id()
            )))
        }
    }

    // ─── Cache plumbing ──────────────────────────────────────────

    async fn cache_message(&self, room_id: &str, message: &ChatMessage) -> Result<()> {
        let key = keys::chat_messages(room_id);
        let raw = serde_json::to_string(message)
            .map_err(|e| AppError::Internal(anyhow::anyhow!(e)))?;
        self.hot.lpush(&key, &raw).await?;
        self.hot.ltrim(&key, 0, self.cache_size as isize - 1).await?;
        self.hot.expire(&key, self.cache_ttl_seconds).await
    }

    /// Push newest-first rows oldest-first so the list head ends newest.
    async fn refill_cache(&self, cache_key: &str, newest_first: &[ChatMessage]) -> Result<()> {
        for message in newest_first.iter().rev() {
            let raw = serde_json::to_string(message)
                .map_err(|e| AppError::Internal(anyhow::anyhow!(e)))?;
            self.hot.lpush(cache_key, &raw).await?;
        }
        self.hot
            .ltrim(cache_key, 0, self.cache_size as isize - 1)
            .await?;
        self.hot.expire(cache_key, self.cache_ttl_seconds).await
    }
}

/// Clamp a requested history page size into [1, 100], defaulting to 50.
fn clamp_history_limit(requested: Option<i64>) -> i64 {
    requested
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .clamp(1, MAX_HISTORY_LIMIT)
}

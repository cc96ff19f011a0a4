//! PostgreSQL client wrapper with typed operations.
//!
//! The core owns `ski_sessions`, `location_pings`, and `messages`
//! exclusively. Friendships, group memberships, and user display names are
//! read-only lookups against the pre-existing seeded schema — and they are
//! looked up fresh on every authorization check so revoked access takes
//! effect immediately.

use std::collections::HashSet;
use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use uuid::Uuid;

use crate::config::Config;
use crate::error::{AppError, Result};
use crate::models::{ChatMessage, MessageMetadata, PingRecord, Room, SkiSession};

/// Durable-store client.
#[derive(Clone)]
pub struct WarmDb {
    pool: PgPool,
    timeout: Duration,
}

impl WarmDb {
    /// Connect to the durable store.
    pub async fn connect(config: &Config) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(16)
            .acquire_timeout(config.warm_timeout())
            .connect(&config.database_url)
            .await?;

        tracing::info!("Connected to durable store");

        Ok(Self {
            pool,
            timeout: config.warm_timeout(),
        })
    }

    /// Wrap an existing pool (test harnesses).
    pub fn from_pool(pool: PgPool, timeout: Duration) -> Self {
        Self { pool, timeout }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Bound a durable-store call by the configured timeout.
    async fn bounded<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(AppError::Transient(
                "postgres: operation timed out".to_string(),
            )),
        }
    }

    // ─── Session Operations ──────────────────────────────────────

    /// Start a session, pre-closing any prior active session for the user.
    ///
    /// Close-prior and insert run in one transaction so the at-most-one-
    /// active-session invariant holds even under concurrent starts from two
    /// connections of the same user.
    pub async fn start_session(
        &self,
        user_id: &str,
        resort_id: Option<&str>,
    ) -> Result<SkiSession> {
        self.bounded(async {
            let mut tx = self.pool.begin().await?;

            let closed = sqlx::query(
                "UPDATE ski_sessions
                 SET is_active = FALSE, end_time = NOW()
                 WHERE user_id = $1 AND is_active = TRUE",
            )
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

            if closed.rows_affected() > 1 {
                // More than one open session should be impossible; record it
                // loudly but keep going, since this path repairs the state.
                tracing::error!(
                    user_id = %user_id,
                    closed = closed.rows_affected(),
                    "Invariant violation: multiple active sessions closed on start"
                );
            }

            let session = sqlx::query_as::<_, SkiSession>(
                "INSERT INTO ski_sessions
                     (id, user_id, resort_id, start_time, end_time, is_active,
                      total_vertical_m, total_distance_m, max_speed_mps)
                 VALUES ($1, $2, $3, NOW(), NULL, TRUE, 0, 0, 0)
                 RETURNING *",
            )
            .bind(Uuid::new_v4())
            .bind(user_id)
            .bind(resort_id)
            .fetch_one(&mut *tx)
            .await?;

            tx.commit().await?;
            Ok(session)
        })
        .await
    }

    /// End a session owned by `user_id`. Returns the final row with
    /// `end_time` stamped, or NotFound when the session does not exist, is
    /// already closed, or belongs to someone else.
    pub async fn end_session(&self, session_id: Uuid, user_id: &str) -> Result<SkiSession> {
        self.bounded(async {
            sqlx::query_as::<_, SkiSession>(
                "UPDATE ski_sessions
                 SET is_active = FALSE, end_time = NOW()
                 WHERE id = $1 AND user_id = $2 AND is_active = TRUE
                 RETURNING *",
            )
            .bind(session_id)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("active session {}", session_id)))
        })
        .await
    }

    pub async fn get_session(&self, session_id: Uuid) -> Result<Option<SkiSession>> {
        self.bounded(async {
            Ok(sqlx::query_as::<_, SkiSession>(
                "SELECT * FROM ski_sessions WHERE id = $1",
            )
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await?)
        })
        .await
    }

    // ─── Ping Operations ─────────────────────────────────────────

    /// Persist a flushed batch: one multi-row insert of the pings plus one
    /// aggregate update per session, all in a single transaction.
    pub async fn persist_ping_batch(
        &self,
        batch: &[PingRecord],
        deltas: &[(Uuid, SessionDelta)],
    ) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }

        self.bounded(async {
            let mut tx = self.pool.begin().await?;

            let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
                "INSERT INTO location_pings
                     (session_id, user_id, geom, altitude_m, speed_mps,
                      accuracy_m, heading_deg, recorded_at) ",
            );
            builder.push_values(batch, |mut row, ping| {
                row.push_bind(ping.session_id)
                    .push_bind(&ping.user_id)
                    .push("ST_SetSRID(ST_MakePoint(")
                    .push_bind_unseparated(ping.lon)
                    .push_unseparated(", ")
                    .push_bind_unseparated(ping.lat)
                    .push_unseparated("), 4326)")
                    .push_bind(ping.altitude_m)
                    .push_bind(ping.speed_mps)
                    .push_bind(ping.accuracy_m)
                    .push_bind(ping.heading_deg)
                    .push_bind(ping.recorded_at);
            });
            builder.build().execute(&mut *tx).await?;

            for (session_id, delta) in deltas {
                sqlx::query(
                    "UPDATE ski_sessions
                     SET total_distance_m = total_distance_m + $2,
                         total_vertical_m = total_vertical_m + $3,
                         max_speed_mps = GREATEST(max_speed_mps, $4)
                     WHERE id = $1",
                )
                .bind(session_id)
                .bind(delta.additional_distance_m)
                .bind(delta.vertical_descent_m)
                .bind(delta.max_speed_mps)
                .execute(&mut *tx)
                .await?;
            }

            tx.commit().await?;
            Ok(())
        })
        .await
    }

    // ─── Message Operations ──────────────────────────────────────

    /// Insert a message, returning it with the server-assigned id and
    /// `sent_at`.
    pub async fn insert_message(
        &self,
        sender_id: &str,
        group_id: Option<&str>,
        recipient_id: Option<&str>,
        content: &str,
        metadata: Option<&MessageMetadata>,
    ) -> Result<ChatMessage> {
        let metadata_json = metadata
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| AppError::Validation(format!("unserializable metadata: {}", e)))?;

        let id = Uuid::new_v4();
        self.bounded(async {
            let row = sqlx::query(
                "INSERT INTO messages
                     (id, sender_id, group_id, recipient_id, content, metadata,
                      read_by, sent_at)
                 VALUES ($1, $2, $3, $4, $5, $6, '{}', NOW())
                 RETURNING sent_at",
            )
            .bind(id)
            .bind(sender_id)
            .bind(group_id)
            .bind(recipient_id)
            .bind(content)
            .bind(metadata_json.as_deref())
            .fetch_one(&self.pool)
            .await?;
            let sent_at: DateTime<Utc> = row.try_get("sent_at")?;

            // RETURNING only hands back what the server assigned; rebuild
            // the full message from the inputs we just wrote.
            Ok(ChatMessage {
                id,
                sender_id: sender_id.to_string(),
                group_id: group_id.map(String::from),
                recipient_id: recipient_id.map(String::from),
                content: content.to_string(),
                metadata: metadata.cloned(),
                read_by: vec![],
                sent_at,
            })
        })
        .await
    }

    pub async fn get_message(&self, message_id: Uuid) -> Result<Option<ChatMessage>> {
        self.bounded(async {
            let row = sqlx::query("SELECT * FROM messages WHERE id = $1")
                .bind(message_id)
                .fetch_optional(&self.pool)
                .await?;
            row.map(message_from_row).transpose()
        })
        .await
    }

    /// Idempotently add a reader to a message's `read_by` set.
    /// Returns true when the set actually changed.
    pub async fn append_read_by(&self, message_id: Uuid, user_id: &str) -> Result<bool> {
        self.bounded(async {
            let updated = sqlx::query(
                "UPDATE messages
                 SET read_by = array_append(read_by, $2)
                 WHERE id = $1 AND NOT ($2 = ANY(read_by))",
            )
            .bind(message_id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
            Ok(updated.rows_affected() > 0)
        })
        .await
    }

    /// Newest messages for a room, `sent_at` descending.
    pub async fn recent_messages(&self, room: &Room, limit: i64) -> Result<Vec<ChatMessage>> {
        self.bounded(async {
            let rows = match room {
                Room::Group(group_id) => {
                    sqlx::query(
                        "SELECT * FROM messages
                         WHERE group_id = $1
                         ORDER BY sent_at DESC
                         LIMIT $2",
                    )
                    .bind(group_id)
                    .bind(limit)
                    .fetch_all(&self.pool)
                    .await?
                }
                Room::Dm(a, b) => {
                    sqlx::query(
                        "SELECT * FROM messages
                         WHERE group_id IS NULL
                           AND ((sender_id = $1 AND recipient_id = $2)
                             OR (sender_id = $2 AND recipient_id = $1))
                         ORDER BY sent_at DESC
                         LIMIT $3",
                    )
                    .bind(a)
                    .bind(b)
                    .bind(limit)
                    .fetch_all(&self.pool)
                    .await?
                }
            };
            rows.into_iter().map(message_from_row).collect()
        })
        .await
    }

    // ─── Social Graph (read-only) ────────────────────────────────

    /// Ids of every user with an accepted friendship to `user_id`,
    /// direction-agnostic.
    pub async fn accepted_friend_ids(&self, user_id: &str) -> Result<HashSet<String>> {
        self.bounded(async {
            let rows = sqlx::query(
                "SELECT CASE WHEN user_id = $1 THEN friend_id ELSE user_id END AS other
                 FROM friendships
                 WHERE (user_id = $1 OR friend_id = $1) AND status = 'accepted'",
            )
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;
            rows.into_iter()
                .map(|row| row.try_get("other").map_err(AppError::from))
                .collect()
        })
        .await
    }

    /// Whether an accepted friendship exists between the two users.
    pub async fn are_friends(&self, a: &str, b: &str) -> Result<bool> {
        self.bounded(async {
            let row = sqlx::query(
                "SELECT EXISTS (
                     SELECT 1 FROM friendships
                     WHERE ((user_id = $1 AND friend_id = $2)
                         OR (user_id = $2 AND friend_id = $1))
                       AND status = 'accepted'
                 ) AS ok",
            )
            .bind(a)
            .bind(b)
            .fetch_one(&self.pool)
            .await?;
            Ok(row.try_get("ok")?)
        })
        .await
    }

    pub async fn is_group_member(&self, group_id: &str, user_id: &str) -> Result<bool> {
        self.bounded(async {
            let row = sqlx::query(
                "SELECT EXISTS (
                     SELECT 1 FROM group_members
                     WHERE group_id = $1 AND user_id = $2
                 ) AS ok",
            )
            .bind(group_id)
            .bind(user_id)
            .fetch_one(&self.pool)
            .await?;
            Ok(row.try_get("ok")?)
        })
        .await
    }

    pub async fn display_name(&self, user_id: &str) -> Result<Option<String>> {
        self.bounded(async {
            let row = sqlx::query("SELECT display_name FROM users WHERE id = $1")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;
            row.map(|r| r.try_get("display_name").map_err(AppError::from))
                .transpose()
        })
        .await
    }
}

/// Per-session aggregate changes computed from one flush batch.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SessionDelta {
    pub additional_distance_m: f64,
    pub vertical_descent_m: f64,
    pub max_speed_mps: f64,
}

/// Map a `messages` row, tolerating unreadable metadata (the message still
/// delivers, just without its attachment).
fn message_from_row(row: PgRow) -> Result<ChatMessage> {
    let metadata = row
        .try_get::<Option<String>, _>("metadata")?
        .and_then(|raw| match serde_json::from_str(&raw) {
            Ok(parsed) => Some(parsed),
            Err(e) => {
                tracing::warn!(error = %e, "Dropping unreadable message metadata");
                None
            }
        });

    Ok(ChatMessage {
        id: row.try_get("id")?,
        sender_id: row.try_get("sender_id")?,
        group_id: row.try_get("group_id")?,
        recipient_id: row.try_get("recipient_id")?,
        content: row.try_get("content")?,
        metadata,
        read_by: row.try_get("read_by")?,
        sent_at: row.try_get("sent_at")?,
    })
}

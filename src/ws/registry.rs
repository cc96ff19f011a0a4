// SPDX-License-Identifier: MIT

//! Connection accounting.
//!
//! Two maps, as the scaling model requires: a local in-process map from
//! connection handle to its state (lookups never suspend), and the global
//! `connections:{userId}` set in the hot store that makes presence visible
//! across the fleet. A node never holds connections for users it does not
//! locally host.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::cache::{keys, HotCache};
use crate::error::Result;
use crate::ws::frames::ServerEvent;

/// Per-connection state. The outbound sender feeds the connection's pusher
/// task; everything else is bookkeeping for throttling and cleanup.
pub struct Connection {
    pub id: Uuid,
    pub user_id: String,
    sender: mpsc::UnboundedSender<String>,
    rooms: RwLock<HashSet<String>>,
    last_ping: Mutex<Option<Instant>>,
}

impl Connection {
    pub fn new(user_id: impl Into<String>, sender: mpsc::UnboundedSender<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            sender,
            rooms: RwLock::new(HashSet::new()),
            last_ping: Mutex::new(None),
        }
    }

    /// Queue a raw frame for delivery. Returns false when the connection's
    /// pusher task is gone (socket already closing).
    pub fn send_raw(&self, frame: &str) -> bool {
        self.sender.send(frame.to_string()).is_ok()
    }

    pub fn send_event(&self, event: &ServerEvent) -> bool {
        self.send_raw(&event.to_wire())
    }

    /// Ping throttle: a hard floor with no burst credit. Rejected pings do
    /// NOT move the window. Purely in-memory.
    pub fn throttle_allows(&self, now: Instant, window: Duration) -> bool {
        let mut last = self.last_ping.lock().unwrap();
        match *last {
            Some(previous) if now.duration_since(previous) < window => false,
            _ => {
                *last = Some(now);
                true
            }
        }
    }

    pub fn join_room(&self, room_id: &str) {
        self.rooms.write().unwrap().insert(room_id.to_string());
    }

    pub fn leave_room(&self, room_id: &str) {
        self.rooms.write().unwrap().remove(room_id);
    }

    pub fn in_room(&self, room_id: &str) -> bool {
        self.rooms.read().unwrap().contains(room_id)
    }

    pub fn rooms_snapshot(&self) -> Vec<String> {
        self.rooms.read().unwrap().iter().cloned().collect()
    }
}

/// What the gateway needs to know after a connection detaches.
#[derive(Debug)]
pub struct DetachOutcome {
    /// Rooms the connection had joined, for typing-flag cleanup.
    pub rooms: Vec<String>,
    /// True when this was the user's last connection on THIS node.
    pub last_local_for_user: bool,
    /// True when the user now has zero connections fleet-wide; hot presence
    /// must be cleared (without ending the session).
    pub offline_everywhere: bool,
}

/// Registry of local connections plus the cross-node presence set.
pub struct ConnectionRegistry {
    hot: HotCache,
    connections: DashMap<Uuid, Arc<Connection>>,
    user_locals: DashMap<String, HashSet<Uuid>>,
    room_locals: DashMap<String, HashSet<Uuid>>,
}

impl ConnectionRegistry {
    pub fn new(hot: HotCache) -> Self {
        Self {
            hot,
            connections: DashMap::new(),
            user_locals: DashMap::new(),
            room_locals: DashMap::new(),
        }
    }

    /// Register a freshly authenticated connection. Returns the connection
    /// and whether it is the user's first on this node (the caller then
    /// subscribes the node to the user's fan-out channel).
    pub async fn attach(
        &self,
        user_id: &str,
        sender: mpsc::UnboundedSender<String>,
    ) -> Result<(Arc<Connection>, bool)> {
        let conn = Arc::new(Connection::new(user_id, sender));

        self.connections.insert(conn.id, conn.clone());
        let first_local = {
            let mut locals = self.user_locals.entry(user_id.to_string()).or_default();
            let first = locals.is_empty();
            locals.insert(conn.id);
            first
        };

        if let Err(e) = self
            .hot
            .sadd(&keys::connections(user_id), &conn.id.to_string())
            .await
        {
            // Roll the local maps back so a failed attach leaves no ghost.
            self.connections.remove(&conn.id);
            if let Some(mut locals) = self.user_locals.get_mut(user_id) {
                locals.remove(&conn.id);
            }
            return Err(e);
        }

        tracing::debug!(user_id = %user_id, connection = %conn.id, "Connection attached");
        Ok((conn, first_local))
    }

    /// Remove a connection and reconcile local and global presence.
    pub async fn detach(&self, conn: &Arc<Connection>) -> Result<DetachOutcome> {
        self.connections.remove(&conn.id);

        let rooms = conn.rooms_snapshot();
        for room_id in &rooms {
            if let Some(mut members) = self.room_locals.get_mut(room_id) {
                members.remove(&conn.id);
            }
        }

        let last_local_for_user = {
            let mut locals = self
                .user_locals
                .entry(conn.user_id.clone())
                .or_default();
            locals.remove(&conn.id);
            locals.is_empty()
        };
        if last_local_for_user {
            self.user_locals.remove(&conn.user_id);
        }

        let connections_key = keys::connections(&conn.user_id);
        self.hot
            .srem(&connections_key, &conn.id.to_string())
            .await?;
        let offline_everywhere = self.hot.scard(&connections_key).await? == 0;

        tracing::debug!(
            user_id = %conn.user_id,
            connection = %conn.id,
            offline_everywhere,
            "Connection detached"
        );

        Ok(DetachOutcome {
            rooms,
            last_local_for_user,
            offline_everywhere,
        })
    }

    /// Record a room join. Returns true when this node previously had no
    /// subscriber for the room (the caller then subscribes the backplane).
    pub fn join_room(&self, conn: &Arc<Connection>, room_id: &str) -> bool {
        conn.join_room(room_id);
        let mut members = self.room_locals.entry(room_id.to_string()).or_default();
        let first = members.is_empty();
        members.insert(conn.id);
        first
    }

    /// Record a room leave. Returns true when this node no longer has any
    /// subscriber for the room.
    pub fn leave_room(&self, conn: &Arc<Connection>, room_id: &str) -> bool {
        conn.leave_room(room_id);
        match self.room_locals.get_mut(room_id) {
            Some(mut members) => {
                members.remove(&conn.id);
                let empty = members.is_empty();
                drop(members);
                if empty {
                    self.room_locals.remove(room_id);
                }
                empty
            }
            None => true,
        }
    }

    /// Local connections subscribed to a room. Never suspends.
    pub fn connections_in_room(&self, room_id: &str) -> Vec<Arc<Connection>> {
        self.room_locals
            .get(room_id)
            .map(|members| {
                members
                    .iter()
                    .filter_map(|id| self.connections.get(id).map(|c| c.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Local connections of a user. Never suspends.
    pub fn local_connections_for_user(&self, user_id: &str) -> Vec<Arc<Connection>> {
        self.user_locals
            .get(user_id)
            .map(|locals| {
                locals
                    .iter()
                    .filter_map(|id| self.connections.get(id).map(|c| c.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Fleet-wide connection count for a user.
    pub async fn count_for_user(&self, user_id: &str) -> Result<u64> {
        self.hot.scard(&keys::connections(user_id)).await
    }
}

// SPDX-License-Identifier: MIT

//! Cross-node fan-out over the hot store's pub/sub bus.
//!
//! Publish/subscribe is the ONLY cross-node mechanism. Each node holds at
//! most one bus subscription per channel, reference-counted across its local
//! connections; a dedicated listener task owns the pub/sub connection and
//! receives subscription changes over a control channel. Frames published to
//! `room:{roomId}` reach every local connection joined to the room; frames
//! published to `user:{userId}` reach every local connection of that user.

use std::sync::Arc;

use dashmap::DashMap;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::cache::{keys, HotCache};
use crate::error::Result;
use crate::ws::frames::ServerEvent;
use crate::ws::registry::ConnectionRegistry;

/// Subscription changes sent to the listener task.
#[derive(Debug)]
enum BusCommand {
    Subscribe(String),
    Unsubscribe(String),
}

/// The envelope actually carried on the bus. `exclude` names a connection
/// that must not receive the frame (typing broadcasts skip their sender).
#[derive(Debug, Serialize, Deserialize)]
pub struct BusFrame {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exclude: Option<Uuid>,
    pub frame: ServerEvent,
}

/// Node-global publish/subscribe handle. Shared by reference from
/// `AppState`; configured once at process start.
pub struct Backplane {
    hot: HotCache,
    control: mpsc::UnboundedSender<BusCommand>,
    refcounts: DashMap<String, usize>,
}

impl Backplane {
    /// Create the backplane and its listener half. The listener must be
    /// spawned (`listener.run(registry)`) before any subscription matters.
    pub fn new(hot: HotCache) -> (Arc<Self>, BackplaneListener) {
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let listener = BackplaneListener {
            client: hot.client().clone(),
            control: control_rx,
        };
        let backplane = Arc::new(Self {
            hot,
            control: control_tx,
            refcounts: DashMap::new(),
        });
        (backplane, listener)
    }

    fn subscribe(&self, channel: String) {
        let mut count = self.refcounts.entry(channel.clone()).or_insert(0);
        *count += 1;
        if *count == 1 {
            let _ = self.control.send(BusCommand::Subscribe(channel));
        }
    }

    fn unsubscribe(&self, channel: &str) {
        let drop_subscription = match self.refcounts.get_mut(channel) {
            Some(mut count) => {
                *count = count.saturating_sub(1);
                *count == 0
            }
            None => false,
        };
        if drop_subscription {
            self.refcounts.remove(channel);
            let _ = self
                .control
                .send(BusCommand::Unsubscribe(channel.to_string()));
        }
    }

    pub fn subscribe_room(&self, room_id: &str) {
        self.subscribe(keys::room_channel(room_id));
    }

    pub fn unsubscribe_room(&self, room_id: &str) {
        self.unsubscribe(&keys::room_channel(room_id));
    }

    pub fn subscribe_user(&self, user_id: &str) {
        self.subscribe(keys::user_channel(user_id));
    }

    pub fn unsubscribe_user(&self, user_id: &str) {
        self.unsubscribe(&keys::user_channel(user_id));
    }

    /// Broadcast a frame to a room across the fleet.
    pub async fn publish_to_room(
        &self,
        room_id: &str,
        exclude: Option<Uuid>,
        frame: ServerEvent,
    ) -> Result<()> {
        self.publish(&keys::room_channel(room_id), exclude, frame)
            .await
    }

    /// Deliver a frame to whichever node hosts the user's connections.
    pub async fn publish_to_user(&self, user_id: &str, frame: ServerEvent) -> Result<()> {
        self.publish(&keys::user_channel(user_id), None, frame)
            .await
    }

    async fn publish(
        &self,
        channel: &str,
        exclude: Option<Uuid>,
        frame: ServerEvent,
    ) -> Result<()> {
        let envelope = BusFrame { exclude, frame };
        let payload = serde_json::to_string(&envelope)
            .map_err(|e| crate::error::AppError::Internal(anyhow::anyhow!(e)))?;
        self.hot.publish(channel, &payload).await
    }
}

/// The listener half: owns the dedicated pub/sub connection.
pub struct BackplaneListener {
    client: redis::Client,
    control: mpsc::UnboundedReceiver<BusCommand>,
}

impl BackplaneListener {
    /// Run until the bus connection drops. Spawned once per node.
    pub async fn run(self, registry: Arc<ConnectionRegistry>) {
        let pubsub = match self.client.get_async_pubsub().await {
            Ok(pubsub) => pubsub,
            Err(e) => {
                tracing::error!(error = %e, "Failed to open backplane pub/sub connection");
                return;
            }
        };
        let (mut sink, mut stream) = pubsub.split();
        let mut control = self.control;

        // Subscription changes and message delivery run concurrently; the
        // sink half applies commands while the stream half drains the bus.
        tokio::spawn(async move {
            while let Some(command) = control.recv().await {
                let result = match &command {
                    BusCommand::Subscribe(channel) => sink.subscribe(channel).await,
                    BusCommand::Unsubscribe(channel) => sink.unsubscribe(channel).await,
                };
                if let Err(e) = result {
                    tracing::error!(error = %e, command = ?command, "Backplane subscription change failed");
                }
            }
        });

        tracing::info!("Backplane listener running");

        while let Some(message) = stream.next().await {
            let channel = message.get_channel_name().to_string();
            let payload: String = match message.get_payload() {
                Ok(payload) => payload,
                Err(e) => {
                    tracing::warn!(error = %e, channel = %channel, "Unreadable bus payload");
                    continue;
                }
            };
            Self::deliver(&registry, &channel, &payload);
        }

        tracing::warn!("Backplane stream ended; cross-node delivery stopped");
    }

    /// Hand a bus frame to the local connections it addresses. Purely
    /// in-memory; send failures mean the connection is already tearing down.
    fn deliver(registry: &ConnectionRegistry, channel: &str, payload: &str) {
        let envelope: BusFrame = match serde_json::from_str(payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!(error = %e, channel = %channel, "Malformed bus frame");
                return;
            }
        };

        let targets = if let Some(room_id) = channel.strip_prefix(keys::ROOM_CHANNEL_PREFIX) {
            registry.connections_in_room(room_id)
        } else if let Some(user_id) = channel.strip_prefix(keys::USER_CHANNEL_PREFIX) {
            registry.local_connections_for_user(user_id)
        } else {
            tracing::warn!(channel = %channel, "Bus frame on unrecognized channel");
            return;
        };

        let wire = envelope.frame.to_wire();
        for conn in targets {
            if envelope.exclude == Some(conn.id) {
                continue;
            }
            conn.send_raw(&wire);
        }
    }
}

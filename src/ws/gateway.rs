// SPDX-License-Identifier: MIT

//! The WebSocket gateway.
//!
//! One bidirectional connection per client. The handshake verifies the
//! bearer token exactly once — supplied in an `auth` envelope as the first
//! frame, falling back to the `token` query parameter — binds the user id,
//! and registers the handle. After that the gateway is a demultiplexer:
//! frames are processed strictly in arrival order, each acknowledged before
//! the next is handled, and every outcome — including malformed frames and
//! unknown events — becomes a structured ack rather than a closed socket.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use crate::auth::VerifiedUser;
use crate::error::{AppError, Result};
use crate::ws::frames::{self, events, ClientEnvelope};
use crate::ws::registry::Connection;
use crate::AppState;

/// How long the gateway waits for an `auth` frame. A connection that sent a
/// query-parameter token and stays quiet is authenticated with it when this
/// window closes; one that supplied neither is dropped.
const AUTH_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Query parameters accepted on the upgrade request.
#[derive(Debug, Deserialize)]
pub struct ConnectQuery {
    #[serde(default)]
    pub token: Option<String>,
}

/// `GET /ws` upgrade handler.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(query): Query<ConnectQuery>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, query.token))
}

/// Where the verified token came from, for acking the auth frame.
enum AuthSource {
    Query,
    Frame { id: Option<u64> },
}

/// Outcome of a successful handshake.
struct Handshake {
    user: VerifiedUser,
    source: AuthSource,
    /// A non-auth first frame consumed while waiting for the auth envelope
    /// (query-token clients start with a normal event); dispatched after
    /// registration so arrival order is preserved.
    pending: Option<String>,
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, query_token: Option<String>) {
    let (mut sender, mut receiver) = socket.split();

    let Handshake {
        user,
        source,
        pending,
    } = match authenticate(&state, query_token, &mut receiver).await {
        Ok(outcome) => outcome,
        Err(e) => {
            tracing::debug!(error = %e, "Handshake refused");
            let _ = sender
                .send(Message::Text(
                    frames::ack_frame(None, e.ack_value()).into(),
                ))
                .await;
            let _ = sender.close().await;
            return;
        }
    };

    let (tx, rx) = mpsc::unbounded_channel();
    let (conn, first_local) = match state.registry.attach(&user.user_id, tx).await {
        Ok(attached) => attached,
        Err(e) => {
            tracing::error!(user_id = %user.user_id, error = %e, "Connection registration failed");
            let _ = sender.close().await;
            return;
        }
    };
    if first_local {
        state.backplane.subscribe_user(&user.user_id);
    }
    if let AuthSource::Frame { id } = source {
        conn.send_raw(&frames::ack_frame(id, json!({ "success": true })));
    }

    tracing::info!(user_id = %user.user_id, connection = %conn.id, "Client connected");

    // The frame that triggered the query-parameter fallback is handled
    // before the receive loop starts, ack included.
    if let Some(first_frame) = pending {
        handle_frame(&state, &conn, &first_frame).await;
    }

    let mut send_task = pusher_loop(rx, sender);

    let recv_conn = conn.clone();
    let recv_state = state.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(message) = receiver.next().await {
            let message = match message {
                Ok(message) => message,
                Err(e) => {
                    tracing::debug!(error = %e, "WebSocket receive error");
                    break;
                }
            };
            match message {
                Message::Text(text) => handle_frame(&recv_state, &recv_conn, &text).await,
                Message::Close(_) => break,
                Message::Ping(_) | Message::Pong(_) => {}
                Message::Binary(_) => {
                    recv_conn
                        .send_raw(&frames::ack_frame(None, json!({ "success": false })));
                }
            }
        }
    });

    // A closed connection cancels in-flight work for that connection;
    // committed side effects stay committed.
    tokio::select! {
        _ = &mut recv_task => send_task.abort(),
        _ = &mut send_task => recv_task.abort(),
    };

    disconnect(&state, &conn).await;
}

/// Forward queued outbound frames to the socket until either side goes away.
fn pusher_loop(
    mut rx: mpsc::UnboundedReceiver<String>,
    mut sender: SplitSink<WebSocket, Message>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if sender.send(Message::Text(frame.into())).await.is_err() {
                break;
            }
        }
    })
}

/// Resolve the connection's user. The `auth` envelope in the first frame is
/// the primary credential; the `token` query parameter is the fallback for
/// clients that cannot send one. A non-auth first frame from a query-token
/// client is kept and dispatched after registration.
async fn authenticate(
    state: &AppState,
    query_token: Option<String>,
    receiver: &mut SplitStream<WebSocket>,
) -> Result<Handshake> {
    let first_frame = match tokio::time::timeout(AUTH_HANDSHAKE_TIMEOUT, async {
        while let Some(message) = receiver.next().await {
            match message {
                Ok(Message::Text(text)) => return Some(text),
                Ok(Message::Close(_)) | Err(_) => return None,
                Ok(_) => continue,
            }
        }
        None
    })
    .await
    {
        // Socket closed before any frame: nothing to authenticate for.
        Ok(None) => return Err(AppError::Unauthenticated),
        Ok(Some(text)) => Some(text),
        // Quiet client; the query parameter below is all we will get.
        Err(_) => None,
    };

    if let Some(text) = first_frame {
        if let Ok(envelope) = serde_json::from_str::<ClientEnvelope>(&text) {
            if envelope.event == events::AUTH {
                let payload: frames::AuthPayload =
                    envelope.payload().map_err(|_| AppError::Unauthenticated)?;
                let user = state.verifier.verify(&payload.token).await?;
                return Ok(Handshake {
                    user,
                    source: AuthSource::Frame { id: envelope.id },
                    pending: None,
                });
            }
        }
        // First frame is a normal event (or unparseable): fall back to the
        // query parameter and let the demux loop judge the frame itself.
        let token = query_token.ok_or(AppError::Unauthenticated)?;
        let user = state.verifier.verify(&token).await?;
        return Ok(Handshake {
            user,
            source: AuthSource::Query,
            pending: Some(text.to_string()),
        });
    }

    let token = query_token.ok_or(AppError::Unauthenticated)?;
    let user = state.verifier.verify(&token).await?;
    Ok(Handshake {
        user,
        source: AuthSource::Query,
        pending: None,
    })
}

/// Parse, dispatch, and acknowledge a single inbound frame.
async fn handle_frame(state: &AppState, conn: &Arc<Connection>, text: &str) {
    let envelope: ClientEnvelope = match serde_json::from_str(text) {
        Ok(envelope) => envelope,
        Err(e) => {
            tracing::debug!(error = %e, "Malformed frame");
            conn.send_raw(&frames::ack_frame(None, json!({ "success": false })));
            return;
        }
    };

    let id = envelope.id;
    let event = envelope.event.clone();

    match dispatch(state, conn, envelope).await {
        Ok(Some(data)) => {
            conn.send_raw(&frames::ack_frame(id, data));
        }
        Ok(None) => {} // fire-and-forget event
        Err(e) => {
            // ack_value() also logs; fire-and-forget events get the logging
            // but no ack frame.
            let ack = e.ack_value();
            if frames::expects_ack(&event) {
                conn.send_raw(&frames::ack_frame(id, ack));
            }
        }
    }
}

/// Route a frame to its engine. Unknown events fail closed with no side
/// effects.
async fn dispatch(
    state: &AppState,
    conn: &Arc<Connection>,
    envelope: ClientEnvelope,
) -> Result<Option<Value>> {
    match envelope.event.as_str() {
        events::SESSION_START => ack(
            state
                .location
                .start_session(&conn.user_id, envelope.payload()?)
                .await?,
        ),
        events::SESSION_END => ack(
            state
                .location
                .end_session(&conn.user_id, envelope.payload()?)
                .await?,
        ),
        events::LOCATION_PING => ack(state.location.handle_ping(conn, envelope.payload()?).await?),
        events::LOCATION_SUBSCRIBE => ack(
            state
                .location
                .subscribe(&conn.user_id, envelope.payload()?)
                .await?,
        ),

        events::CHAT_JOIN => ack(state.chat.join(conn, envelope.payload()?).await?),
        events::CHAT_LEAVE => ack(state.chat.leave(conn, envelope.payload()?).await?),
        events::CHAT_SEND => ack(state.chat.send(conn, envelope.payload()?).await?),
        events::CHAT_READ => ack(state.chat.read(conn, envelope.payload()?).await?),
        events::CHAT_HISTORY => ack(state.chat.history(conn, envelope.payload()?).await?),
        events::CHAT_TYPING => {
            state.chat.typing(conn, envelope.payload()?).await?;
            Ok(None)
        }

        events::AUTH => Err(AppError::Validation("already authenticated".to_string())),
        unknown => Err(AppError::Validation(format!("unknown event {}", unknown))),
    }
}

fn ack<T: serde::Serialize>(payload: T) -> Result<Option<Value>> {
    serde_json::to_value(payload)
        .map(Some)
        .map_err(|e| AppError::Internal(anyhow::anyhow!(e)))
}

/// Disconnect accounting: room-by-room typing cleanup, then presence
/// reconciliation. Never ends the user's session.
async fn disconnect(state: &AppState, conn: &Arc<Connection>) {
    for room_id in conn.rooms_snapshot() {
        if let Err(e) = state.chat.leave_room(conn, &room_id).await {
            tracing::warn!(room_id = %room_id, error = %e, "Room cleanup on disconnect failed");
        }
    }

    match state.registry.detach(conn).await {
        Ok(outcome) => {
            if outcome.last_local_for_user {
                state.backplane.unsubscribe_user(&conn.user_id);
            }
            if outcome.offline_everywhere {
                if let Err(e) = state.location.clear_presence(&conn.user_id).await {
                    tracing::warn!(user_id = %conn.user_id, error = %e, "Presence cleanup on disconnect failed");
                }
            }
        }
        Err(e) => {
            tracing::error!(user_id = %conn.user_id, error = %e, "Connection detach failed");
        }
    }

    tracing::info!(user_id = %conn.user_id, connection = %conn.id, "Client disconnected");
}

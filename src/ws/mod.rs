pub mod game;
pub mod handlers;
pub mod lobby;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::IntoResponse,
};
use futures::{
    sink::SinkExt,
    stream::{SplitSink, StreamExt},
};
use serde::Deserialize;
use tokio::sync::{broadcast, mpsc};

use crate::protocol::{ClientMessage, ServerMessage};
use crate::state::AppState;
use crate::types::RoomId;

use handlers::Session;

pub const PROTOCOL_VERSION: &str = "1.0";

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// Identity token presented at connect time, saving an ensure_identity
    /// round trip for returning clients
    pub token: Option<String>,
}

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WsQuery>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, params, state))
}

/// One task per connection: forwards the direct channel and the room fanout
/// to the socket, and feeds inbound frames through the dispatcher.
async fn handle_socket(socket: WebSocket, params: WsQuery, state: AppState) {
    let (mut sender, mut receiver) = socket.split();

    let (tx, mut direct_rx) = mpsc::unbounded_channel();
    let mut session = Session::new(tx);
    tracing::debug!(conn_id = %session.conn_id, "WebSocket connected");

    let welcome = ServerMessage::Welcome {
        protocol: PROTOCOL_VERSION.to_string(),
        server_now: chrono::Utc::now().to_rfc3339(),
    };
    if send_json(&mut sender, &welcome).await.is_err() {
        return;
    }

    // A valid token on the query string resolves the identity immediately
    if let Some(token) = &params.token {
        match state.identity.verify(token) {
            Ok(identity_id) => {
                // No nickname is on file for a bare token; the client keeps
                // whatever it last used.
                let msg = ServerMessage::Identity {
                    identity_id: identity_id.clone(),
                    token: token.clone(),
                    nickname: None,
                };
                session.identity_id = Some(identity_id);
                if send_json(&mut sender, &msg).await.is_err() {
                    return;
                }
            }
            Err(e) => {
                tracing::debug!(conn_id = %session.conn_id, "Connect token rejected: {}", e);
            }
        }
    }

    // The room fanout this socket is subscribed to, kept in step with the
    // session's seat after every handled message
    let mut room_rx: Option<broadcast::Receiver<ServerMessage>> = None;
    let mut subscribed_room: Option<RoomId> = None;

    loop {
        if session.room_id != subscribed_room {
            room_rx = match &session.room_id {
                Some(room_id) => match state.runtime(room_id).await {
                    Ok(runtime) => Some(runtime.broadcast.subscribe()),
                    Err(_) => {
                        session.room_id = None;
                        session.player_id = None;
                        None
                    }
                },
                None => None,
            };
            subscribed_room = session.room_id.clone();
        }

        tokio::select! {
            // Messages addressed to this connection alone
            Some(msg) = direct_rx.recv() => {
                if send_json(&mut sender, &msg).await.is_err() {
                    break;
                }
            }

            // Room-wide fanout
            fanout = async {
                match &mut room_rx {
                    Some(rx) => Some(rx.recv().await),
                    // no room: wait forever
                    None => std::future::pending().await,
                }
            } => {
                match fanout {
                    Some(Ok(msg)) => {
                        let destroyed = matches!(msg, ServerMessage::RoomDestroyed { .. });
                        if send_json(&mut sender, &msg).await.is_err() {
                            break;
                        }
                        if destroyed {
                            session.room_id = None;
                            session.player_id = None;
                        }
                    }
                    Some(Err(broadcast::error::RecvError::Lagged(skipped))) => {
                        tracing::warn!(conn_id = %session.conn_id, skipped, "Connection lagged behind room fanout");
                        // resync with a fresh snapshot
                        if let Some(room_id) = &session.room_id {
                            if let Ok(msg) = state.room_state_message(room_id).await {
                                if send_json(&mut sender, &msg).await.is_err() {
                                    break;
                                }
                            }
                        }
                    }
                    Some(Err(broadcast::error::RecvError::Closed)) | None => {
                        // room runtime gone
                        session.room_id = None;
                        session.player_id = None;
                    }
                }
            }

            // Inbound frames
            ws_msg = receiver.next() => {
                match ws_msg {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ClientMessage>(&text) {
                            Ok(client_msg) => {
                                if let Some(reply) =
                                    handlers::handle_message(client_msg, &mut session, &state).await
                                {
                                    if send_json(&mut sender, &reply).await.is_err() {
                                        break;
                                    }
                                }
                            }
                            Err(e) => {
                                tracing::debug!(conn_id = %session.conn_id, "Unparseable client message: {}", e);
                                let error = ServerMessage::Error {
                                    code: "PARSE_ERROR".to_string(),
                                    msg: format!("invalid message format: {}", e),
                                };
                                if send_json(&mut sender, &error).await.is_err() {
                                    break;
                                }
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) => break,
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::debug!(conn_id = %session.conn_id, "WebSocket error: {}", e);
                        break;
                    }
                    None => break,
                }
            }
        }
    }

    // The seat survives the socket; only the connection entry and the
    // connected flag change, and only if this socket still owns the entry.
    if let (Some(room_id), Some(player_id), Some(identity_id)) = (
        session.room_id.clone(),
        session.player_id.clone(),
        session.identity_id.clone(),
    ) {
        let owned = match state.runtime(&room_id).await {
            Ok(runtime) => runtime
                .state
                .lock()
                .await
                .detach(&identity_id, &session.conn_id),
            Err(_) => false,
        };
        if owned {
            if let Err(e) = state.mark_disconnected(&room_id, &player_id).await {
                tracing::debug!(room_id, "Disconnect bookkeeping failed: {}", e);
            }
        }
    }
    tracing::debug!(conn_id = %session.conn_id, "WebSocket closed");
}

async fn send_json(
    sender: &mut SplitSink<WebSocket, Message>,
    msg: &ServerMessage,
) -> Result<(), ()> {
    let json = serde_json::to_string(msg).map_err(|_| ())?;
    sender.send(Message::Text(json.into())).await.map_err(|_| ())
}

//! Handlers for everything outside a running round: identity, the room
//! browser, and lobby membership.

use crate::identity::default_nickname;
use crate::protocol::ServerMessage;
use crate::state::{AppState, Connection};
use crate::types::*;

use super::handlers::{error_reply, Session};

/// Register this socket as the identity's live connection for a room. The
/// connection it displaces (a reconnect from another tab or device) is told
/// it was superseded.
async fn attach_session(state: &AppState, session: &mut Session, room: &Room, player: &Player) {
    if let Ok(runtime) = state.runtime(&room.id).await {
        let replaced = runtime.state.lock().await.attach(
            &player.identity_id,
            Connection {
                conn_id: session.conn_id.clone(),
                tx: session.tx.clone(),
            },
        );
        if let Some(old) = replaced {
            if old.conn_id != session.conn_id {
                tracing::info!(code = %room.code, nickname = %player.nickname, "Connection superseded");
                let _ = old.tx.send(ServerMessage::SessionReplaced);
            }
        }
    }
    session.room_id = Some(room.id.clone());
    session.player_id = Some(player.id.clone());
}

/// Send the joiner their personal catch-up pair: the room snapshot directly,
/// and their recovered session state as the reply.
async fn seated_reply(
    state: &AppState,
    session: &Session,
    room: &Room,
    player: &Player,
) -> Option<ServerMessage> {
    if let Ok(msg) = state.room_state_message(&room.id).await {
        session.send(msg);
    }
    Some(state.session_state_message(room, player).await)
}

pub async fn handle_ensure_identity(
    state: &AppState,
    session: &mut Session,
    token: Option<String>,
    nickname: Option<String>,
) -> Option<ServerMessage> {
    let (identity_id, token) = match token {
        Some(token) => match state.identity.verify(&token) {
            Ok(id) => (id, token),
            Err(e) => {
                // A dead token (rotated secret, tampering) gets a fresh
                // identity rather than a hard failure.
                tracing::debug!("Identity token rejected, minting fresh: {}", e);
                state.identity.mint()
            }
        },
        None => state.identity.mint(),
    };

    let nickname = nickname
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(default_nickname);

    session.identity_id = Some(identity_id.clone());
    Some(ServerMessage::Identity {
        identity_id,
        token,
        nickname: Some(nickname),
    })
}

pub async fn handle_list_rooms(state: &AppState) -> Option<ServerMessage> {
    Some(ServerMessage::RoomList {
        rooms: state.list_rooms().await,
    })
}

#[allow(clippy::too_many_arguments)]
pub async fn handle_create_room(
    state: &AppState,
    session: &mut Session,
    identity_id: &str,
    title: String,
    capacity: u32,
    nickname: String,
    password: Option<String>,
) -> Option<ServerMessage> {
    match state
        .create_room(identity_id, &title, capacity, &nickname, password)
        .await
    {
        Ok((room, player)) => {
            attach_session(state, session, &room, &player).await;
            seated_reply(state, session, &room, &player).await
        }
        Err(e) => error_reply(&e),
    }
}

pub async fn handle_join_room(
    state: &AppState,
    session: &mut Session,
    identity_id: &str,
    code: String,
    nickname: String,
    password: Option<String>,
) -> Option<ServerMessage> {
    match state
        .join_room(&code, identity_id, &nickname, password.as_deref())
        .await
    {
        Ok((room, player, _outcome)) => {
            attach_session(state, session, &room, &player).await;
            seated_reply(state, session, &room, &player).await
        }
        Err(e) => error_reply(&e),
    }
}

pub async fn handle_rejoin_room(
    state: &AppState,
    session: &mut Session,
    identity_id: &str,
    code: String,
) -> Option<ServerMessage> {
    match state.rejoin_room(&code, identity_id).await {
        Ok((room, player)) => {
            attach_session(state, session, &room, &player).await;
            seated_reply(state, session, &room, &player).await
        }
        Err(e) => error_reply(&e),
    }
}

pub async fn handle_set_ready(
    state: &AppState,
    room_id: &str,
    player_id: &str,
    ready: bool,
) -> Option<ServerMessage> {
    match state.set_ready(room_id, player_id, ready).await {
        Ok(_) => None, // broadcast carries the new state
        Err(e) => error_reply(&e),
    }
}

pub async fn handle_leave_room(
    state: &AppState,
    session: &mut Session,
    room_id: &str,
    player_id: &str,
) -> Option<ServerMessage> {
    let result = state.leave_room(room_id, player_id).await;
    session.room_id = None;
    session.player_id = None;
    match result {
        Ok(_) => None,
        Err(e) => error_reply(&e),
    }
}

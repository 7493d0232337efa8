//! WebSocket message dispatch.
//!
//! Session bookkeeping (who this connection is, where it is seated) lives
//! here; the actual work happens in the lobby and game handler modules.
//! Every handler returns the direct reply for the acting connection, if any;
//! room-wide effects ride the room broadcast instead.

use crate::error::ActionError;
use crate::protocol::{ClientMessage, ServerMessage};
use crate::state::{AppState, ConnectionTx};
use crate::types::*;

use super::{game, lobby};

/// Per-connection state, owned by the socket loop. Survives nothing; the
/// identity token is what survives.
pub struct Session {
    /// Distinguishes this socket from a later one holding the same identity
    pub conn_id: String,
    /// Direct line to this connection
    pub tx: ConnectionTx,
    pub identity_id: Option<IdentityId>,
    pub room_id: Option<RoomId>,
    pub player_id: Option<PlayerId>,
}

impl Session {
    pub fn new(tx: ConnectionTx) -> Self {
        Self {
            conn_id: ulid::Ulid::new().to_string(),
            tx,
            identity_id: None,
            room_id: None,
            player_id: None,
        }
    }

    /// Send directly to this connection, outside the request/reply flow
    pub fn send(&self, msg: ServerMessage) {
        let _ = self.tx.send(msg);
    }
}

pub(crate) fn error_reply(e: &ActionError) -> Option<ServerMessage> {
    Some(ServerMessage::Error {
        code: e.code().to_string(),
        msg: e.to_string(),
    })
}

/// Macro to resolve the session's identity or bail with an error reply
macro_rules! require_identity {
    ($session:expr) => {
        match &$session.identity_id {
            Some(id) => id.clone(),
            None => {
                return Some(ServerMessage::Error {
                    code: "UNAUTHORIZED".to_string(),
                    msg: "no identity established, send ensure_identity first".to_string(),
                })
            }
        }
    };
}

/// Macro to resolve the session's seat or bail with an error reply
macro_rules! require_seat {
    ($session:expr) => {
        match (&$session.room_id, &$session.player_id) {
            (Some(room_id), Some(player_id)) => (room_id.clone(), player_id.clone()),
            _ => {
                return Some(ServerMessage::Error {
                    code: "FORBIDDEN".to_string(),
                    msg: "not seated in a room".to_string(),
                })
            }
        }
    };
}

/// Handle one client message and return the direct reply, if any
pub async fn handle_message(
    msg: ClientMessage,
    session: &mut Session,
    state: &AppState,
) -> Option<ServerMessage> {
    match msg {
        ClientMessage::EnsureIdentity { token, nickname } => {
            lobby::handle_ensure_identity(state, session, token, nickname).await
        }

        ClientMessage::ListRooms => lobby::handle_list_rooms(state).await,

        ClientMessage::CreateRoom {
            title,
            capacity,
            nickname,
            password,
        } => {
            let identity_id = require_identity!(session);
            lobby::handle_create_room(state, session, &identity_id, title, capacity, nickname, password)
                .await
        }

        ClientMessage::JoinRoom {
            code,
            nickname,
            password,
        } => {
            let identity_id = require_identity!(session);
            lobby::handle_join_room(state, session, &identity_id, code, nickname, password).await
        }

        ClientMessage::RejoinRoom { code } => {
            let identity_id = require_identity!(session);
            lobby::handle_rejoin_room(state, session, &identity_id, code).await
        }

        ClientMessage::SetReady { ready } => {
            let (room_id, player_id) = require_seat!(session);
            lobby::handle_set_ready(state, &room_id, &player_id, ready).await
        }

        ClientMessage::LeaveRoom => {
            let (room_id, player_id) = require_seat!(session);
            lobby::handle_leave_room(state, session, &room_id, &player_id).await
        }

        ClientMessage::SubmitQuestion { text } => {
            let (room_id, player_id) = require_seat!(session);
            game::handle_submit_question(state, &room_id, &player_id, &text).await
        }

        ClientMessage::SubmitAnswer { text } => {
            let (room_id, player_id) = require_seat!(session);
            game::handle_submit_answer(state, &room_id, &player_id, &text).await
        }

        ClientMessage::SuggestQuestion => {
            let (room_id, _) = require_seat!(session);
            game::handle_suggest_question(state, &room_id).await
        }

        ClientMessage::SuggestAnswer => {
            let (room_id, _) = require_seat!(session);
            game::handle_suggest_answer(state, &room_id).await
        }

        ClientMessage::HostNextRound => {
            let (room_id, player_id) = require_seat!(session);
            game::handle_host_next_round(state, &room_id, &player_id).await
        }

        ClientMessage::HostEndGame => {
            let (room_id, player_id) = require_seat!(session);
            game::handle_host_end_game(state, &room_id, &player_id).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::Store;
    use tokio::sync::mpsc;

    fn session() -> (Session, mpsc::UnboundedReceiver<ServerMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Session::new(tx), rx)
    }

    #[tokio::test]
    async fn test_create_room_requires_identity() {
        let state = AppState::new(Store::in_memory());
        let (mut session, _rx) = session();

        let reply = handle_message(
            ClientMessage::CreateRoom {
                title: "Night".to_string(),
                capacity: 4,
                nickname: "alice".to_string(),
                password: None,
            },
            &mut session,
            &state,
        )
        .await;

        match reply {
            Some(ServerMessage::Error { code, .. }) => assert_eq!(code, "UNAUTHORIZED"),
            other => panic!("unexpected reply: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_room_actions_require_seat() {
        let state = AppState::new(Store::in_memory());
        let (mut session, _rx) = session();
        session.identity_id = Some("ident".to_string());

        for msg in [
            ClientMessage::SetReady { ready: true },
            ClientMessage::SubmitQuestion {
                text: "Why?".to_string(),
            },
            ClientMessage::HostNextRound,
        ] {
            let reply = handle_message(msg, &mut session, &state).await;
            match reply {
                Some(ServerMessage::Error { code, .. }) => assert_eq!(code, "FORBIDDEN"),
                other => panic!("unexpected reply: {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_distinct_sessions_get_distinct_conn_ids() {
        let (a, _rx_a) = session();
        let (b, _rx_b) = session();
        assert_ne!(a.conn_id, b.conn_id);
    }
}

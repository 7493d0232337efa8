//! Handlers for in-round actions: submissions, suggestions, and the host's
//! round controls.

use crate::protocol::ServerMessage;
use crate::state::AppState;
use crate::textgen::{canned_answer, canned_question};
use crate::types::RoomPhase;

use super::handlers::error_reply;

pub async fn handle_submit_question(
    state: &AppState,
    room_id: &str,
    player_id: &str,
    text: &str,
) -> Option<ServerMessage> {
    match state.submit_question(room_id, player_id, text).await {
        Ok(()) => None,
        Err(e) => error_reply(&e),
    }
}

pub async fn handle_submit_answer(
    state: &AppState,
    room_id: &str,
    player_id: &str,
    text: &str,
) -> Option<ServerMessage> {
    match state.submit_answer(room_id, player_id, text).await {
        Ok(()) => None,
        Err(e) => error_reply(&e),
    }
}

/// A question idea for the asking player. Suggestions are advisory; nothing
/// is submitted until the player sends the text back themselves.
pub async fn handle_suggest_question(state: &AppState, room_id: &str) -> Option<ServerMessage> {
    let room = state.store.room(room_id).await?;
    if room.phase != RoomPhase::QuestionSubmit {
        return Some(ServerMessage::Error {
            code: "PHASE".to_string(),
            msg: "question suggestions are only available while questions are collected"
                .to_string(),
        });
    }

    let text = match &state.textgen {
        Some(textgen) => textgen.question(&room.title, room.current_round_no).await,
        None => canned_question(),
    };
    Some(ServerMessage::QuestionSuggestion {
        text: text.text,
        format: text.format,
    })
}

pub async fn handle_suggest_answer(state: &AppState, room_id: &str) -> Option<ServerMessage> {
    let room = state.store.room(room_id).await?;
    let Some(question) = state.current_ask_question(room_id).await else {
        return Some(ServerMessage::Error {
            code: "PHASE".to_string(),
            msg: "answer suggestions are only available while a question is open".to_string(),
        });
    };

    let text = match &state.textgen {
        Some(textgen) => {
            textgen
                .answer(&room.title, room.current_round_no, &question.text)
                .await
        }
        None => canned_answer(),
    };
    Some(ServerMessage::AnswerSuggestion { text: text.text })
}

pub async fn handle_host_next_round(
    state: &AppState,
    room_id: &str,
    player_id: &str,
) -> Option<ServerMessage> {
    match state.host_next_round(room_id, player_id).await {
        Ok(()) => None,
        Err(e) => error_reply(&e),
    }
}

pub async fn handle_host_end_game(
    state: &AppState,
    room_id: &str,
    player_id: &str,
) -> Option<ServerMessage> {
    match state.host_end_game(room_id, player_id).await {
        Ok(()) => None,
        Err(e) => error_reply(&e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ClientMessage;
    use crate::state::Store;
    use crate::ws::handlers::{handle_message, Session};
    use tokio::sync::mpsc;

    async fn seated_pair(state: &AppState) -> (Session, Session) {
        let (tx_a, _rx_a) = mpsc::unbounded_channel();
        let mut alice = Session::new(tx_a);
        handle_message(
            ClientMessage::EnsureIdentity {
                token: None,
                nickname: None,
            },
            &mut alice,
            state,
        )
        .await;
        handle_message(
            ClientMessage::CreateRoom {
                title: "Night".to_string(),
                capacity: 4,
                nickname: "alice".to_string(),
                password: None,
            },
            &mut alice,
            state,
        )
        .await;
        let room = state.store.room(alice.room_id.as_ref().unwrap()).await.unwrap();

        let (tx_b, _rx_b) = mpsc::unbounded_channel();
        let mut bob = Session::new(tx_b);
        handle_message(
            ClientMessage::EnsureIdentity {
                token: None,
                nickname: None,
            },
            &mut bob,
            state,
        )
        .await;
        handle_message(
            ClientMessage::JoinRoom {
                code: room.code,
                nickname: "bob".to_string(),
                password: None,
            },
            &mut bob,
            state,
        )
        .await;
        (alice, bob)
    }

    #[tokio::test]
    async fn test_suggest_question_outside_phase_rejected() {
        let state = AppState::new(Store::in_memory());
        let (mut alice, _bob) = seated_pair(&state).await;

        let reply = handle_message(ClientMessage::SuggestQuestion, &mut alice, &state).await;
        match reply {
            Some(ServerMessage::Error { code, .. }) => assert_eq!(code, "PHASE"),
            other => panic!("unexpected reply: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_suggest_question_falls_back_to_canned() {
        let state = AppState::new(Store::in_memory());
        let (mut alice, mut bob) = seated_pair(&state).await;
        handle_message(ClientMessage::SetReady { ready: true }, &mut alice, &state).await;
        handle_message(ClientMessage::SetReady { ready: true }, &mut bob, &state).await;

        // No textgen configured, so the canned pool answers
        let reply = handle_message(ClientMessage::SuggestQuestion, &mut alice, &state).await;
        match reply {
            Some(ServerMessage::QuestionSuggestion { text, .. }) => assert!(!text.is_empty()),
            other => panic!("unexpected reply: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_suggest_answer_requires_open_question() {
        let state = AppState::new(Store::in_memory());
        let (mut alice, mut bob) = seated_pair(&state).await;
        handle_message(ClientMessage::SetReady { ready: true }, &mut alice, &state).await;
        handle_message(ClientMessage::SetReady { ready: true }, &mut bob, &state).await;

        // Still collecting questions
        let reply = handle_message(ClientMessage::SuggestAnswer, &mut alice, &state).await;
        match reply {
            Some(ServerMessage::Error { code, .. }) => assert_eq!(code, "PHASE"),
            other => panic!("unexpected reply: {:?}", other),
        }

        // Move to ASK via quorum, then a suggestion is available
        handle_message(
            ClientMessage::SubmitQuestion {
                text: "Q-a?".to_string(),
            },
            &mut alice,
            &state,
        )
        .await;
        handle_message(
            ClientMessage::SubmitQuestion {
                text: "Q-b?".to_string(),
            },
            &mut bob,
            &state,
        )
        .await;

        let reply = handle_message(ClientMessage::SuggestAnswer, &mut alice, &state).await;
        match reply {
            Some(ServerMessage::AnswerSuggestion { text }) => assert!(!text.is_empty()),
            other => panic!("unexpected reply: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_non_host_round_controls_rejected() {
        let state = AppState::new(Store::in_memory());
        let (mut alice, mut bob) = seated_pair(&state).await;
        handle_message(ClientMessage::SetReady { ready: true }, &mut alice, &state).await;
        handle_message(ClientMessage::SetReady { ready: true }, &mut bob, &state).await;

        let reply = handle_message(ClientMessage::HostEndGame, &mut bob, &state).await;
        match reply {
            Some(ServerMessage::Error { code, .. }) => assert_eq!(code, "FORBIDDEN"),
            other => panic!("unexpected reply: {:?}", other),
        }

        let reply = handle_message(ClientMessage::HostEndGame, &mut alice, &state).await;
        assert!(reply.is_none());
    }
}

use crate::types::*;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "t", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Mint a fresh identity, or re-validate a held token
    EnsureIdentity {
        token: Option<String>,
        nickname: Option<String>,
    },
    ListRooms,
    CreateRoom {
        title: String,
        capacity: u32,
        nickname: String,
        password: Option<String>,
    },
    JoinRoom {
        code: String,
        nickname: String,
        password: Option<String>,
    },
    /// Re-attach to a room this identity already has a seat in
    RejoinRoom {
        code: String,
    },
    SetReady {
        ready: bool,
    },
    LeaveRoom,
    SubmitQuestion {
        text: String,
    },
    SubmitAnswer {
        text: String,
    },
    /// Ask the text generator for a question idea (QUESTION_SUBMIT only)
    SuggestQuestion,
    /// Ask the text generator for an answer idea (ASK only)
    SuggestAnswer,
    // Host-only messages
    HostNextRound,
    HostEndGame,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "t", rename_all = "snake_case")]
pub enum ServerMessage {
    Welcome {
        protocol: String,
        server_now: String,
    },
    /// Reply to EnsureIdentity (and to a valid `token` query param)
    Identity {
        identity_id: IdentityId,
        token: String,
        /// Absent when the server has no nickname on file for the identity
        /// (token restore at connect time)
        #[serde(skip_serializing_if = "Option::is_none")]
        nickname: Option<String>,
    },
    RoomList {
        rooms: Vec<RoomSummary>,
    },
    /// Full authoritative snapshot: the room plus everyone in it
    RoomState {
        room: RoomSnapshot,
        players: Vec<PlayerInfo>,
    },
    /// Sent to one player on join/rejoin with their own recovered state
    SessionState {
        player_id: PlayerId,
        nickname: String,
        is_ready: bool,
        /// This player's question in the current round, if any
        #[serde(skip_serializing_if = "Option::is_none")]
        your_question: Option<String>,
        /// This player's answer to the current ASK question, if any
        #[serde(skip_serializing_if = "Option::is_none")]
        your_answer: Option<String>,
    },
    PhaseChanged {
        phase: RoomPhase,
        round_no: u32,
        server_now: String,
        deadline: Option<String>,
    },
    AskQuestion {
        question_id: QuestionId,
        text: String,
        /// 1-based position within the round
        number: u32,
        total: u32,
        deadline: String,
        server_now: String,
    },
    /// Anonymized answers for the current question, in reveal order
    Reveal {
        question_id: QuestionId,
        question_text: String,
        cards: Vec<AnswerCard>,
    },
    RoundEnded {
        round_no: u32,
        server_now: String,
    },
    RoomDestroyed {
        code: String,
        reason: String,
    },
    /// Sent to the previous connection when this identity attaches elsewhere
    SessionReplaced,
    QuestionSuggestion {
        text: String,
        format: AnswerFormat,
    },
    AnswerSuggestion {
        text: String,
    },
    Error {
        code: String,
        msg: String,
    },
}

/// Format hint a generated question carries: what kind of answer it expects
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AnswerFormat {
    FreeText,
    YesNo,
}

/// Public room view (password stripped)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomSnapshot {
    pub id: RoomId,
    pub code: String,
    pub title: String,
    pub capacity: u32,
    pub status: RoomStatus,
    pub phase: RoomPhase,
    pub phase_deadline_at: Option<String>,
    pub current_round_no: u32,
    pub host_player_id: PlayerId,
    pub has_password: bool,
}

impl From<&Room> for RoomSnapshot {
    fn from(r: &Room) -> Self {
        Self {
            id: r.id.clone(),
            code: r.code.clone(),
            title: r.title.clone(),
            capacity: r.capacity,
            status: r.status,
            phase: r.phase,
            phase_deadline_at: r.phase_deadline_at.clone(),
            current_round_no: r.current_round_no,
            host_player_id: r.host_player_id.clone(),
            has_password: r.password.is_some(),
        }
    }
}

/// Public player view (identity stripped)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerInfo {
    pub id: PlayerId,
    pub nickname: String,
    pub is_ready: bool,
    pub is_connected: bool,
}

impl From<&Player> for PlayerInfo {
    fn from(p: &Player) -> Self {
        Self {
            id: p.id.clone(),
            nickname: p.nickname.clone(),
            is_ready: p.is_ready,
            is_connected: p.is_connected,
        }
    }
}

/// One revealed answer, identified by shuffled position only
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerCard {
    pub index: u32,
    pub text: String,
}

/// Room list entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomSummary {
    pub code: String,
    pub title: String,
    pub players: u32,
    pub capacity: u32,
    pub status: RoomStatus,
    pub has_password: bool,
    /// False while a round is in flight (no new joins mid-game)
    pub joinable: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_room() -> Room {
        Room {
            id: "room1".to_string(),
            code: "ABCDE".to_string(),
            title: "Test Room".to_string(),
            capacity: 8,
            status: RoomStatus::Lobby,
            phase: RoomPhase::Lobby,
            phase_deadline_at: None,
            current_round_no: 0,
            host_player_id: "p1".to_string(),
            password: Some("hunter2".to_string()),
            created_at: "2025-01-01T00:00:00Z".to_string(),
            last_activity_at: "2025-01-01T00:00:00Z".to_string(),
        }
    }

    #[test]
    fn test_client_message_tags() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"t":"submit_question","text":"Why?"}"#).unwrap();
        assert!(matches!(msg, ClientMessage::SubmitQuestion { ref text } if text == "Why?"));

        let msg: ClientMessage = serde_json::from_str(r#"{"t":"host_next_round"}"#).unwrap();
        assert!(matches!(msg, ClientMessage::HostNextRound));
    }

    #[test]
    fn test_room_snapshot_strips_password() {
        let room = sample_room();
        let snapshot = RoomSnapshot::from(&room);
        assert!(snapshot.has_password);

        let json = serde_json::to_string(&snapshot).unwrap();
        assert!(!json.contains("hunter2"));
    }

    #[test]
    fn test_player_info_strips_identity() {
        let player = Player {
            id: "p1".to_string(),
            room_id: "room1".to_string(),
            identity_id: "super-secret-identity".to_string(),
            nickname: "ada".to_string(),
            is_ready: true,
            is_connected: true,
            joined_at: "2025-01-01T00:00:00Z".to_string(),
        };
        let info = PlayerInfo::from(&player);
        let json = serde_json::to_string(&info).unwrap();
        assert!(!json.contains("super-secret-identity"));
        assert!(json.contains("ada"));
    }

    #[test]
    fn test_server_message_wire_shape() {
        let msg = ServerMessage::PhaseChanged {
            phase: RoomPhase::QuestionSubmit,
            round_no: 1,
            server_now: "2025-01-01T00:00:00Z".to_string(),
            deadline: Some("2025-01-01T00:01:30Z".to_string()),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"t\":\"phase_changed\""));
        assert!(json.contains("\"QUESTION_SUBMIT\""));
    }

    #[test]
    fn test_identity_without_nickname_omits_the_key() {
        let msg = ServerMessage::Identity {
            identity_id: "id-1".to_string(),
            token: "tok".to_string(),
            nickname: None,
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(!json.contains("nickname"));

        let msg = ServerMessage::Identity {
            identity_id: "id-1".to_string(),
            token: "tok".to_string(),
            nickname: Some("ada".to_string()),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"nickname\":\"ada\""));
    }

    #[test]
    fn test_reveal_cards_carry_no_player_ids() {
        let msg = ServerMessage::Reveal {
            question_id: "q1".to_string(),
            question_text: "What is the best sandwich?".to_string(),
            cards: vec![
                AnswerCard {
                    index: 1,
                    text: "BLT".to_string(),
                },
                AnswerCard {
                    index: 2,
                    text: "Reuben".to_string(),
                },
            ],
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(!json.contains("player"));
    }
}

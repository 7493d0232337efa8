use serde::{Deserialize, Serialize};

/// Opaque ID types for type safety
pub type RoomId = String;
pub type PlayerId = String;
pub type IdentityId = String;
pub type RoundId = String;
pub type QuestionId = String;
pub type AnswerId = String;

/// Room-level status: whether a round is in flight
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoomStatus {
    Lobby,
    Playing,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoomPhase {
    Lobby,
    QuestionSubmit,
    Ask,
    Reveal,
    RoundEnd,
}

impl RoomPhase {
    /// Only the two player-input phases carry a persisted deadline.
    /// REVEAL paces itself with a runtime-only timer.
    pub fn has_deadline(&self) -> bool {
        matches!(self, RoomPhase::QuestionSubmit | RoomPhase::Ask)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Room {
    pub id: RoomId,
    /// Short join code, unique across live rooms
    pub code: String,
    pub title: String,
    pub capacity: u32,
    pub status: RoomStatus,
    pub phase: RoomPhase,
    /// ISO timestamp; non-null only while phase is QUESTION_SUBMIT or ASK
    pub phase_deadline_at: Option<String>,
    pub current_round_no: u32,
    pub host_player_id: PlayerId,
    /// Plaintext join password; never leaves the server (stripped from DTOs)
    pub password: Option<String>,
    pub created_at: String,
    pub last_activity_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Player {
    pub id: PlayerId,
    pub room_id: RoomId,
    /// Stable identity surviving reconnects; unique per room
    pub identity_id: IdentityId,
    /// Unique per room
    pub nickname: String,
    pub is_ready: bool,
    pub is_connected: bool,
    pub joined_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Round {
    pub id: RoundId,
    pub room_id: RoomId,
    pub round_no: u32,
    pub started_at: String,
    pub ended_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
    pub id: QuestionId,
    pub round_id: RoundId,
    /// Submitting player; one question per (round, player)
    pub player_id: PlayerId,
    pub text: String,
    /// 1-based ask/reveal position, assigned by the shuffle when
    /// QUESTION_SUBMIT closes; None while the phase is still open
    pub order_no: Option<u32>,
    pub is_used: bool,
    pub submitted_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Answer {
    pub id: AnswerId,
    pub question_id: QuestionId,
    /// Answering player; one answer per (question, player)
    pub player_id: PlayerId,
    pub text: String,
    pub submitted_at: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deadline_phases() {
        assert!(RoomPhase::QuestionSubmit.has_deadline());
        assert!(RoomPhase::Ask.has_deadline());
        assert!(!RoomPhase::Lobby.has_deadline());
        assert!(!RoomPhase::Reveal.has_deadline());
        assert!(!RoomPhase::RoundEnd.has_deadline());
    }

    #[test]
    fn test_phase_serializes_screaming_snake() {
        let json = serde_json::to_string(&RoomPhase::QuestionSubmit).unwrap();
        assert_eq!(json, "\"QUESTION_SUBMIT\"");
        let back: RoomPhase = serde_json::from_str("\"ROUND_END\"").unwrap();
        assert_eq!(back, RoomPhase::RoundEnd);
    }
}

//! The durable store: source of truth for rooms, players, rounds, questions
//! and answers. Tables live in process memory and are written through to a
//! versioned JSON snapshot on disk; every mutating action awaits the write
//! before broadcasting, so clients never see state that is not durable yet.
//!
//! Runtime-only data (armed timers, connection index, reveal author maps)
//! is deliberately excluded — see `state::runtime`.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::{Mutex, RwLock};

use crate::types::*;

/// Schema version for snapshot format compatibility
/// Version 1: initial layout (rooms, players, rounds, questions, answers)
pub const SNAPSHOT_SCHEMA_VERSION: u32 = 1;

/// A serializable snapshot of everything durable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSnapshot {
    /// Schema version for forward compatibility
    pub schema_version: u32,
    /// Snapshot timestamp (ISO8601)
    pub saved_at: String,
    pub rooms: HashMap<RoomId, Room>,
    pub players: HashMap<PlayerId, Player>,
    pub rounds: HashMap<RoundId, Round>,
    pub questions: HashMap<QuestionId, Question>,
    pub answers: HashMap<AnswerId, Answer>,
}

impl StoreSnapshot {
    /// Validate referential integrity before a restore
    pub fn validate(&self) -> Result<(), String> {
        if self.schema_version > SNAPSHOT_SCHEMA_VERSION {
            return Err(format!(
                "Snapshot schema version {} is newer than supported version {}. \
                 Please update the server.",
                self.schema_version, SNAPSHOT_SCHEMA_VERSION
            ));
        }

        for (player_id, player) in &self.players {
            if !self.rooms.contains_key(&player.room_id) {
                return Err(format!(
                    "Player '{}' references room '{}' which doesn't exist",
                    player_id, player.room_id
                ));
            }
        }

        for (round_id, round) in &self.rounds {
            if !self.rooms.contains_key(&round.room_id) {
                return Err(format!(
                    "Round '{}' references room '{}' which doesn't exist",
                    round_id, round.room_id
                ));
            }
        }

        for (question_id, question) in &self.questions {
            if !self.rounds.contains_key(&question.round_id) {
                return Err(format!(
                    "Question '{}' references round '{}' which doesn't exist",
                    question_id, question.round_id
                ));
            }
        }

        for (answer_id, answer) in &self.answers {
            if !self.questions.contains_key(&answer.question_id) {
                return Err(format!(
                    "Answer '{}' references question '{}' which doesn't exist",
                    answer_id, answer.question_id
                ));
            }
        }

        // Host must resolve whenever a room still has players
        for (room_id, room) in &self.rooms {
            let has_players = self.players.values().any(|p| &p.room_id == room_id);
            let host_ok = self
                .players
                .get(&room.host_player_id)
                .is_some_and(|p| &p.room_id == room_id);
            if has_players && !host_ok {
                return Err(format!(
                    "Room '{}' host '{}' does not resolve to one of its players",
                    room_id, room.host_player_id
                ));
            }
        }

        Ok(())
    }
}

/// In-process tables with write-through JSON persistence.
pub struct Store {
    pub rooms: RwLock<HashMap<RoomId, Room>>,
    pub players: RwLock<HashMap<PlayerId, Player>>,
    pub rounds: RwLock<HashMap<RoundId, Round>>,
    pub questions: RwLock<HashMap<QuestionId, Question>>,
    pub answers: RwLock<HashMap<AnswerId, Answer>>,
    /// Snapshot location; None keeps the store memory-only (tests)
    path: Option<PathBuf>,
    /// Serializes snapshot writes (mutations for different rooms may race)
    persist_lock: Mutex<()>,
}

impl Store {
    /// Memory-only store, nothing touches disk
    pub fn in_memory() -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            players: RwLock::new(HashMap::new()),
            rounds: RwLock::new(HashMap::new()),
            questions: RwLock::new(HashMap::new()),
            answers: RwLock::new(HashMap::new()),
            path: None,
            persist_lock: Mutex::new(()),
        }
    }

    /// Open a store backed by `path`, restoring the snapshot if one exists.
    /// A corrupt or non-validating snapshot is logged and skipped — the
    /// server still boots, forfeiting the old state.
    pub async fn open(path: PathBuf) -> Self {
        let store = Self {
            path: Some(path.clone()),
            ..Self::in_memory()
        };

        match tokio::fs::read(&path).await {
            Ok(bytes) => match serde_json::from_slice::<StoreSnapshot>(&bytes) {
                Ok(snapshot) => match store.restore(snapshot).await {
                    Ok(counts) => {
                        tracing::info!(
                            path = %path.display(),
                            rooms = counts,
                            "Store snapshot restored"
                        );
                    }
                    Err(e) => {
                        tracing::error!(path = %path.display(), "Snapshot failed validation, starting empty: {}", e);
                    }
                },
                Err(e) => {
                    tracing::error!(path = %path.display(), "Snapshot unreadable, starting empty: {}", e);
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "No store snapshot yet, starting empty");
            }
            Err(e) => {
                tracing::error!(path = %path.display(), "Failed to read snapshot, starting empty: {}", e);
            }
        }

        store
    }

    /// Assemble the current snapshot
    pub async fn snapshot(&self) -> StoreSnapshot {
        StoreSnapshot {
            schema_version: SNAPSHOT_SCHEMA_VERSION,
            saved_at: chrono::Utc::now().to_rfc3339(),
            rooms: self.rooms.read().await.clone(),
            players: self.players.read().await.clone(),
            rounds: self.rounds.read().await.clone(),
            questions: self.questions.read().await.clone(),
            answers: self.answers.read().await.clone(),
        }
    }

    /// Replace all tables from a validated snapshot. Returns the room count.
    pub async fn restore(&self, snapshot: StoreSnapshot) -> Result<usize, String> {
        snapshot.validate()?;

        let count = snapshot.rooms.len();
        *self.rooms.write().await = snapshot.rooms;
        *self.players.write().await = snapshot.players;
        *self.rounds.write().await = snapshot.rounds;
        *self.questions.write().await = snapshot.questions;
        *self.answers.write().await = snapshot.answers;
        Ok(count)
    }

    /// Write the snapshot to disk (write-to-temp then rename). Must be
    /// awaited before broadcasting the state it reflects.
    pub async fn persist(&self) -> std::io::Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let _guard = self.persist_lock.lock().await;

        let snapshot = self.snapshot().await;
        let bytes = serde_json::to_vec_pretty(&snapshot)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }

    // ---- read helpers ----

    pub async fn room(&self, room_id: &str) -> Option<Room> {
        self.rooms.read().await.get(room_id).cloned()
    }

    pub async fn room_by_code(&self, code: &str) -> Option<Room> {
        self.rooms
            .read()
            .await
            .values()
            .find(|r| r.code.eq_ignore_ascii_case(code))
            .cloned()
    }

    pub async fn player(&self, player_id: &str) -> Option<Player> {
        self.players.read().await.get(player_id).cloned()
    }

    /// Players of a room, longest-tenured first
    pub async fn players_in_room(&self, room_id: &str) -> Vec<Player> {
        let mut players: Vec<Player> = self
            .players
            .read()
            .await
            .values()
            .filter(|p| p.room_id == room_id)
            .cloned()
            .collect();
        players.sort_by(|a, b| {
            parse_ts(&a.joined_at)
                .cmp(&parse_ts(&b.joined_at))
                .then_with(|| a.id.cmp(&b.id))
        });
        players
    }

    pub async fn player_by_identity(&self, room_id: &str, identity_id: &str) -> Option<Player> {
        self.players
            .read()
            .await
            .values()
            .find(|p| p.room_id == room_id && p.identity_id == identity_id)
            .cloned()
    }

    pub async fn round(&self, round_id: &str) -> Option<Round> {
        self.rounds.read().await.get(round_id).cloned()
    }

    pub async fn rounds_for_room(&self, room_id: &str) -> Vec<Round> {
        let mut rounds: Vec<Round> = self
            .rounds
            .read()
            .await
            .values()
            .filter(|r| r.room_id == room_id)
            .cloned()
            .collect();
        rounds.sort_by_key(|r| r.round_no);
        rounds
    }

    pub async fn question(&self, question_id: &str) -> Option<Question> {
        self.questions.read().await.get(question_id).cloned()
    }

    pub async fn questions_for_round(&self, round_id: &str) -> Vec<Question> {
        self.questions
            .read()
            .await
            .values()
            .filter(|q| q.round_id == round_id)
            .cloned()
            .collect()
    }

    pub async fn answers_for_question(&self, question_id: &str) -> Vec<Answer> {
        self.answers
            .read()
            .await
            .values()
            .filter(|a| a.question_id == question_id)
            .cloned()
            .collect()
    }
}

/// Parse a stored ISO timestamp. Stored values are always produced by
/// `Utc::now().to_rfc3339()`; a hand-edited snapshot that breaks the format
/// sorts to the epoch instead of panicking.
pub fn parse_ts(s: &str) -> chrono::DateTime<chrono::Utc> {
    chrono::DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&chrono::Utc))
        .unwrap_or(chrono::DateTime::<chrono::Utc>::UNIX_EPOCH)
}

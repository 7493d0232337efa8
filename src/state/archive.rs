use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::config::ArchiveConfig;
use crate::types::*;

/// Archive schema version, bump on breaking changes
///
/// Version history:
/// - 1: Initial format (room, players, rounds, questions, answers)
pub const ARCHIVE_SCHEMA_VERSION: u32 = 1;

/// Final record of a destroyed room, written once on teardown
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomArchive {
    pub schema_version: u32,
    pub archived_at: String,
    /// Why the room went away ("host_ended", "emptied", "idle_sweep")
    pub reason: String,
    pub room: Room,
    pub players: Vec<Player>,
    pub rounds: Vec<Round>,
    pub questions: Vec<Question>,
    pub answers: Vec<Answer>,
}

impl RoomArchive {
    pub fn new(
        reason: &str,
        room: Room,
        players: Vec<Player>,
        rounds: Vec<Round>,
        questions: Vec<Question>,
        answers: Vec<Answer>,
    ) -> Self {
        Self {
            schema_version: ARCHIVE_SCHEMA_VERSION,
            archived_at: chrono::Utc::now().to_rfc3339(),
            reason: reason.to_string(),
            room,
            players,
            rounds,
            questions,
            answers,
        }
    }

    /// Target file inside `dir`, named by room code and archive time
    pub fn file_path(&self, dir: &std::path::Path) -> PathBuf {
        let stamp = chrono::Utc::now().format("%Y%m%dT%H%M%SZ");
        dir.join(format!("room-{}-{}.json", self.room.code.to_lowercase(), stamp))
    }
}

/// Write the archive off the hot path. Room teardown never waits on disk,
/// so failures are logged and swallowed.
pub fn spawn_archive_write(config: &ArchiveConfig, archive: RoomArchive) {
    let Some(dir) = config.dir.clone() else {
        return;
    };

    tokio::spawn(async move {
        let code = archive.room.code.clone();
        if let Err(e) = write_archive(&dir, &archive).await {
            tracing::warn!(code, "Failed to archive room: {}", e);
        } else {
            tracing::info!(code, "Archived room to {}", dir.display());
        }
    });
}

async fn write_archive(dir: &std::path::Path, archive: &RoomArchive) -> std::io::Result<()> {
    tokio::fs::create_dir_all(dir).await?;
    let json = serde_json::to_vec_pretty(archive)?;
    tokio::fs::write(archive.file_path(dir), json).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_room() -> Room {
        Room {
            id: "room-1".to_string(),
            code: "ABC23".to_string(),
            title: "Test Night".to_string(),
            capacity: 8,
            status: RoomStatus::Lobby,
            phase: RoomPhase::Lobby,
            phase_deadline_at: None,
            current_round_no: 0,
            host_player_id: "p1".to_string(),
            password: None,
            created_at: chrono::Utc::now().to_rfc3339(),
            last_activity_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    #[test]
    fn test_archive_carries_version_and_reason() {
        let archive = RoomArchive::new("host_ended", sample_room(), vec![], vec![], vec![], vec![]);
        assert_eq!(archive.schema_version, ARCHIVE_SCHEMA_VERSION);
        assert_eq!(archive.reason, "host_ended");

        let json = serde_json::to_string(&archive).unwrap();
        let back: RoomArchive = serde_json::from_str(&json).unwrap();
        assert_eq!(back.room.code, "ABC23");
    }

    #[test]
    fn test_archive_file_path_uses_room_code() {
        let archive = RoomArchive::new("emptied", sample_room(), vec![], vec![], vec![], vec![]);
        let path = archive.file_path(std::path::Path::new("/tmp/archives"));
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("room-abc23-"));
        assert!(name.ends_with(".json"));
    }

    #[tokio::test]
    async fn test_write_archive_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let archive = RoomArchive::new("idle_sweep", sample_room(), vec![], vec![], vec![], vec![]);
        write_archive(dir.path(), &archive).await.unwrap();

        let mut entries = tokio::fs::read_dir(dir.path()).await.unwrap();
        let entry = entries.next_entry().await.unwrap().unwrap();
        let bytes = tokio::fs::read(entry.path()).await.unwrap();
        let back: RoomArchive = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(back.reason, "idle_sweep");
    }
}

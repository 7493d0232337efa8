mod archive;
mod room;
mod round;
mod runtime;
mod store;

pub use archive::{RoomArchive, ARCHIVE_SCHEMA_VERSION};
pub use room::{spawn_idle_sweeper, JoinOutcome};
pub use runtime::{Connection, ConnectionTx, RoomRuntime, RuntimeState, TimerPurpose};
pub use store::{parse_ts, Store, StoreSnapshot, SNAPSHOT_SCHEMA_VERSION};

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::config::{ArchiveConfig, GameTimings};
use crate::error::{ActionError, ActionResult};
use crate::identity::IdentityConfig;
use crate::protocol::{PlayerInfo, RoomSnapshot, ServerMessage};
use crate::textgen::TextGenManager;
use crate::types::*;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<Store>,
    /// One runtime per live room; entry lifetime == room lifetime
    pub runtimes: Arc<RwLock<HashMap<RoomId, Arc<RoomRuntime>>>>,
    pub timings: GameTimings,
    pub archive: ArchiveConfig,
    pub identity: IdentityConfig,
    pub textgen: Option<Arc<TextGenManager>>,
}

impl AppState {
    /// State with default timings and no text generation (tests mostly)
    pub fn new(store: Store) -> Self {
        Self::new_with(
            store,
            GameTimings::default(),
            ArchiveConfig::default(),
            IdentityConfig::new(ulid::Ulid::new().to_string()),
            None,
        )
    }

    pub fn new_with(
        store: Store,
        timings: GameTimings,
        archive: ArchiveConfig,
        identity: IdentityConfig,
        textgen: Option<TextGenManager>,
    ) -> Self {
        Self {
            store: Arc::new(store),
            runtimes: Arc::new(RwLock::new(HashMap::new())),
            timings,
            archive,
            identity,
            textgen: textgen.map(Arc::new),
        }
    }

    /// Runtime record for a live room
    pub async fn runtime(&self, room_id: &str) -> ActionResult<Arc<RoomRuntime>> {
        self.runtimes
            .read()
            .await
            .get(room_id)
            .cloned()
            .ok_or_else(|| ActionError::NotFound("room".to_string()))
    }

    pub(crate) async fn insert_runtime(&self, room_id: &str) -> Arc<RoomRuntime> {
        let runtime = Arc::new(RoomRuntime::new());
        self.runtimes
            .write()
            .await
            .insert(room_id.to_string(), runtime.clone());
        runtime
    }

    pub(crate) async fn remove_runtime(&self, room_id: &str) -> Option<Arc<RoomRuntime>> {
        self.runtimes.write().await.remove(room_id)
    }

    /// Fan a message out to every connection attached to a room.
    /// Send errors mean no receivers, which is fine.
    pub async fn broadcast_to_room(&self, room_id: &str, msg: ServerMessage) {
        if let Ok(runtime) = self.runtime(room_id).await {
            let _ = runtime.broadcast.send(msg);
        }
    }

    /// Assemble the authoritative snapshot message for a room
    pub async fn room_state_message(&self, room_id: &str) -> ActionResult<ServerMessage> {
        let room = self
            .store
            .room(room_id)
            .await
            .ok_or_else(|| ActionError::NotFound("room".to_string()))?;
        let players = self.store.players_in_room(room_id).await;

        Ok(ServerMessage::RoomState {
            room: RoomSnapshot::from(&room),
            players: players.iter().map(PlayerInfo::from).collect(),
        })
    }

    /// Broadcast the current snapshot to everyone in the room
    pub async fn broadcast_room_state(&self, room_id: &str) {
        match self.room_state_message(room_id).await {
            Ok(msg) => self.broadcast_to_room(room_id, msg).await,
            Err(e) => tracing::warn!(room_id, "Cannot broadcast room state: {}", e),
        }
    }

    /// Replace the whole durable store with `snapshot` and rebuild every
    /// room runtime from the restored rows. Connections and armed timers do
    /// not survive an import; play resumes on the next player or host action.
    pub async fn import_snapshot(&self, snapshot: StoreSnapshot) -> ActionResult<usize> {
        // Tear down what exists before the rows change underneath it
        let old: Vec<Arc<RoomRuntime>> = self
            .runtimes
            .write()
            .await
            .drain()
            .map(|(_, runtime)| runtime)
            .collect();
        for runtime in &old {
            runtime.state.lock().await.cancel_all_timers();
        }

        let rooms = self
            .store
            .restore(snapshot)
            .await
            .map_err(ActionError::Validation)?;
        self.store.persist().await?;
        self.rebuild_after_restore().await?;
        Ok(rooms)
    }

    /// Recreate a runtime for every room already in the store (process start
    /// after a snapshot restore, or a snapshot import). Armed timers are not
    /// resurrected; play resumes on the next player or host action.
    pub async fn rebuild_after_restore(&self) -> ActionResult<()> {
        // No socket survives a restore; connected flags are stale until
        // players re-attach.
        for player in self.store.players.write().await.values_mut() {
            player.is_connected = false;
        }
        let room_ids: Vec<RoomId> = self.store.rooms.read().await.keys().cloned().collect();
        for room_id in room_ids {
            let runtime = self.insert_runtime(&room_id).await;
            let mut rt = runtime.state.lock().await;
            self.rebuild_runtime_locked(&room_id, &mut rt).await;
        }
        Ok(())
    }

    /// Derive the round-scoped runtime fields from the store so submissions
    /// against an in-flight round keep working after an import.
    async fn rebuild_runtime_locked(&self, room_id: &str, rt: &mut RuntimeState) {
        let Some(room) = self.store.room(room_id).await else {
            return;
        };
        if room.status != RoomStatus::Playing {
            return;
        }
        let Some(round) = self
            .store
            .rounds_for_room(room_id)
            .await
            .into_iter()
            .find(|r| r.round_no == room.current_round_no)
        else {
            return;
        };
        rt.round_id = Some(round.id.clone());

        let mut questions = self.store.questions_for_round(&round.id).await;
        questions.retain(|q| q.order_no.is_some());
        questions.sort_by_key(|q| q.order_no);
        rt.question_ids = questions.iter().map(|q| q.id.clone()).collect();
        rt.question_index = questions
            .iter()
            .position(|q| !q.is_used)
            .unwrap_or(questions.len());
        if matches!(room.phase, RoomPhase::Ask | RoomPhase::Reveal) {
            rt.current_question_id = rt.question_ids.get(rt.question_index).cloned();
        }
    }

    /// Who wrote the card at `reveal_index` of the current question. The
    /// explicit lookup for the follow-up-chat collaborator; this mapping
    /// never rides a broadcast payload.
    pub async fn reveal_author(&self, room_id: &str, reveal_index: u32) -> Option<IdentityId> {
        let runtime = self.runtime(room_id).await.ok()?;
        let rt = runtime.state.lock().await;
        rt.reveal_authors.get(&reveal_index).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_runtime_lookup_unknown_room() {
        let state = AppState::new(Store::in_memory());
        let err = state.runtime("nope").await.unwrap_err();
        assert_eq!(err.code(), "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_broadcast_reaches_subscribers() {
        let state = AppState::new(Store::in_memory());
        let runtime = state.insert_runtime("r1").await;
        let mut rx = runtime.broadcast.subscribe();

        state
            .broadcast_to_room(
                "r1",
                ServerMessage::RoundEnded {
                    round_no: 1,
                    server_now: chrono::Utc::now().to_rfc3339(),
                },
            )
            .await;

        let msg = rx.recv().await.unwrap();
        assert!(matches!(msg, ServerMessage::RoundEnded { round_no: 1, .. }));
    }

    #[tokio::test]
    async fn test_import_snapshot_rebuilds_runtimes() {
        let source = AppState::new(Store::in_memory());
        let (room, _) = source
            .create_room("id-a", "Night", 4, "alice", None)
            .await
            .unwrap();
        let snapshot = source.store.snapshot().await;

        let target = AppState::new(Store::in_memory());
        let rooms = target.import_snapshot(snapshot).await.unwrap();
        assert_eq!(rooms, 1);
        assert!(target.store.room(&room.id).await.is_some());
        assert!(target.runtime(&room.id).await.is_ok());
    }

    #[tokio::test]
    async fn test_import_rejects_invalid_snapshot() {
        let source = AppState::new(Store::in_memory());
        source
            .create_room("id-a", "Night", 4, "alice", None)
            .await
            .unwrap();
        let mut snapshot = source.store.snapshot().await;
        snapshot.players.clear(); // host no longer resolves

        let target = AppState::new(Store::in_memory());
        assert!(target.import_snapshot(snapshot).await.is_err());
    }

    #[tokio::test]
    async fn test_reveal_author_lookup() {
        let state = AppState::new(Store::in_memory());
        let runtime = state.insert_runtime("r1").await;
        runtime
            .state
            .lock()
            .await
            .reveal_authors
            .insert(2, "ident-xyz".to_string());

        assert_eq!(
            state.reveal_author("r1", 2).await.as_deref(),
            Some("ident-xyz")
        );
        assert!(state.reveal_author("r1", 9).await.is_none());
        assert!(state.reveal_author("ghost", 2).await.is_none());
    }
}

use rand::Rng;

use crate::config::SweepConfig;
use crate::error::{ActionError, ActionResult};
use crate::identity::constant_time_eq;
use crate::protocol::{RoomSummary, ServerMessage};
use crate::types::*;

use super::archive::{spawn_archive_write, RoomArchive};
use super::runtime::RuntimeState;
use super::store::parse_ts;
use super::AppState;

/// Characters for join codes, avoiding easily confused ones (0/O, 1/I/L)
const CODE_CHARS: &[u8] = b"ABCDEFGHJKMNPQRSTUVWXYZ23456789";
const CODE_LENGTH: usize = 5;

pub const MIN_CAPACITY: u32 = 2;
pub const MAX_CAPACITY: u32 = 16;

/// How a join resolved: a fresh seat, or an identity reclaiming its old one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    Joined,
    Rejoined,
}

fn generate_room_code() -> String {
    let mut rng = rand::rng();
    (0..CODE_LENGTH)
        .map(|_| {
            let idx = rng.random_range(0..CODE_CHARS.len());
            CODE_CHARS[idx] as char
        })
        .collect()
}

impl AppState {
    fn clean_nickname(&self, nickname: &str) -> ActionResult<String> {
        let nickname = nickname.trim();
        if nickname.is_empty() {
            return Err(ActionError::Validation(
                "nickname must not be empty".to_string(),
            ));
        }
        if nickname.chars().count() > self.timings.max_nickname_chars {
            return Err(ActionError::Validation(format!(
                "nickname longer than {} characters",
                self.timings.max_nickname_chars
            )));
        }
        Ok(nickname.to_string())
    }

    pub(crate) async fn touch_room(&self, room_id: &str) {
        let mut rooms = self.store.rooms.write().await;
        if let Some(room) = rooms.get_mut(room_id) {
            room.last_activity_at = chrono::Utc::now().to_rfc3339();
        }
    }

    /// Create a room and seat the creator as its host
    pub async fn create_room(
        &self,
        identity_id: &str,
        title: &str,
        capacity: u32,
        nickname: &str,
        password: Option<String>,
    ) -> ActionResult<(Room, Player)> {
        let title = title.trim();
        if title.is_empty() {
            return Err(ActionError::Validation(
                "title must not be empty".to_string(),
            ));
        }
        if title.chars().count() > self.timings.max_title_chars {
            return Err(ActionError::Validation(format!(
                "title longer than {} characters",
                self.timings.max_title_chars
            )));
        }
        if !(MIN_CAPACITY..=MAX_CAPACITY).contains(&capacity) {
            return Err(ActionError::Validation(format!(
                "capacity must be between {} and {}",
                MIN_CAPACITY, MAX_CAPACITY
            )));
        }
        let nickname = self.clean_nickname(nickname)?;
        let password = password
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_string);

        let room_id = ulid::Ulid::new().to_string();
        let player_id = ulid::Ulid::new().to_string();
        let now = chrono::Utc::now().to_rfc3339();

        let player = Player {
            id: player_id.clone(),
            room_id: room_id.clone(),
            identity_id: identity_id.to_string(),
            nickname,
            is_ready: false,
            is_connected: true,
            joined_at: now.clone(),
        };

        // Allocate the code and insert under one write guard so concurrent
        // creates cannot claim the same code.
        let room = {
            let mut rooms = self.store.rooms.write().await;
            let code = loop {
                let candidate = generate_room_code();
                if !rooms.values().any(|r| r.code == candidate) {
                    break candidate;
                }
            };
            let room = Room {
                id: room_id.clone(),
                code,
                title: title.to_string(),
                capacity,
                status: RoomStatus::Lobby,
                phase: RoomPhase::Lobby,
                phase_deadline_at: None,
                current_round_no: 0,
                host_player_id: player_id.clone(),
                password,
                created_at: now.clone(),
                last_activity_at: now,
            };
            rooms.insert(room_id.clone(), room.clone());
            room
        };
        self.store
            .players
            .write()
            .await
            .insert(player_id, player.clone());
        self.insert_runtime(&room_id).await;
        self.store.persist().await?;

        tracing::info!(code = %room.code, title = %room.title, host = %player.nickname, "Room created");
        Ok((room, player))
    }

    /// Join a room by code. An identity that already holds a seat here is
    /// reconnected to it (regardless of password or phase); everyone else
    /// goes through the full lobby checks.
    pub async fn join_room(
        &self,
        code: &str,
        identity_id: &str,
        nickname: &str,
        password: Option<&str>,
    ) -> ActionResult<(Room, Player, JoinOutcome)> {
        let found = self
            .store
            .room_by_code(code)
            .await
            .ok_or_else(|| ActionError::NotFound("room".to_string()))?;
        let runtime = self.runtime(&found.id).await?;
        let _rt = runtime.state.lock().await;

        // Re-read under the room guard; nothing can move the row now
        let room = self
            .store
            .room(&found.id)
            .await
            .ok_or_else(|| ActionError::NotFound("room".to_string()))?;

        if let Some(mut existing) = self.store.player_by_identity(&room.id, identity_id).await {
            // Rejoin: take the requested nickname only if it is valid and free
            if let Ok(wanted) = self.clean_nickname(nickname) {
                if !wanted.eq_ignore_ascii_case(&existing.nickname) {
                    let taken = self
                        .store
                        .players_in_room(&room.id)
                        .await
                        .iter()
                        .any(|p| p.id != existing.id && p.nickname.eq_ignore_ascii_case(&wanted));
                    if !taken {
                        existing.nickname = wanted;
                    }
                }
            }
            existing.is_connected = true;
            self.store
                .players
                .write()
                .await
                .insert(existing.id.clone(), existing.clone());
            self.touch_room(&room.id).await;
            self.store.persist().await?;
            self.broadcast_room_state(&room.id).await;

            tracing::info!(code = %room.code, nickname = %existing.nickname, "Player rejoined via join");
            let room = self
                .store
                .room(&room.id)
                .await
                .ok_or_else(|| ActionError::NotFound("room".to_string()))?;
            return Ok((room, existing, JoinOutcome::Rejoined));
        }

        if room.status == RoomStatus::Playing {
            return Err(ActionError::Forbidden(
                "game already started".to_string(),
            ));
        }
        let players = self.store.players_in_room(&room.id).await;
        if players.len() as u32 >= room.capacity {
            return Err(ActionError::RoomFull);
        }
        let nickname = self.clean_nickname(nickname)?;
        if players
            .iter()
            .any(|p| p.nickname.eq_ignore_ascii_case(&nickname))
        {
            return Err(ActionError::Conflict(
                "nickname already taken".to_string(),
            ));
        }
        if let Some(required) = &room.password {
            let given = password.unwrap_or("");
            if !constant_time_eq(given.as_bytes(), required.as_bytes()) {
                return Err(ActionError::Unauthorized(
                    "wrong room password".to_string(),
                ));
            }
        }

        let player = Player {
            id: ulid::Ulid::new().to_string(),
            room_id: room.id.clone(),
            identity_id: identity_id.to_string(),
            nickname,
            is_ready: false,
            is_connected: true,
            joined_at: chrono::Utc::now().to_rfc3339(),
        };
        self.store
            .players
            .write()
            .await
            .insert(player.id.clone(), player.clone());
        self.touch_room(&room.id).await;
        self.store.persist().await?;
        self.broadcast_room_state(&room.id).await;

        tracing::info!(code = %room.code, nickname = %player.nickname, "Player joined");
        let room = self
            .store
            .room(&room.id)
            .await
            .ok_or_else(|| ActionError::NotFound("room".to_string()))?;
        Ok((room, player, JoinOutcome::Joined))
    }

    /// Reattach an identity to its existing seat after a dropped connection.
    /// Unlike `join_room` this never creates a seat.
    pub async fn rejoin_room(&self, code: &str, identity_id: &str) -> ActionResult<(Room, Player)> {
        let found = self
            .store
            .room_by_code(code)
            .await
            .ok_or_else(|| ActionError::NotFound("room".to_string()))?;
        let runtime = self.runtime(&found.id).await?;
        let _rt = runtime.state.lock().await;

        let mut player = self
            .store
            .player_by_identity(&found.id, identity_id)
            .await
            .ok_or_else(|| ActionError::NotFound("player".to_string()))?;
        player.is_connected = true;
        self.store
            .players
            .write()
            .await
            .insert(player.id.clone(), player.clone());
        self.touch_room(&found.id).await;
        self.store.persist().await?;
        self.broadcast_room_state(&found.id).await;

        let room = self
            .store
            .room(&found.id)
            .await
            .ok_or_else(|| ActionError::NotFound("room".to_string()))?;
        tracing::debug!(code = %room.code, nickname = %player.nickname, "Player rejoined");
        Ok((room, player))
    }

    /// Flip a ready flag. Returns whether every seated player is now ready.
    /// When that flips true the first round starts before the room guard is
    /// released, so no competing action can slip in between.
    pub async fn set_ready(
        &self,
        room_id: &str,
        player_id: &str,
        ready: bool,
    ) -> ActionResult<bool> {
        let runtime = self.runtime(room_id).await?;
        let mut rt = runtime.state.lock().await;

        let room = self
            .store
            .room(room_id)
            .await
            .ok_or_else(|| ActionError::NotFound("room".to_string()))?;
        if room.phase != RoomPhase::Lobby {
            return Err(ActionError::Phase(
                "ready can only change in the lobby".to_string(),
            ));
        }
        {
            let mut players = self.store.players.write().await;
            match players.get_mut(player_id) {
                Some(p) if p.room_id == room_id => p.is_ready = ready,
                _ => return Err(ActionError::NotFound("player".to_string())),
            }
        }
        self.touch_room(room_id).await;
        self.store.persist().await?;
        self.broadcast_room_state(room_id).await;

        let players = self.store.players_in_room(room_id).await;
        let all_ready = !players.is_empty() && players.iter().all(|p| p.is_ready);
        if all_ready {
            self.begin_question_submit_locked(room_id, &mut rt).await?;
        }
        Ok(all_ready)
    }

    /// Remove a player's seat. Host rights migrate to the longest-tenured
    /// remaining player; an emptied room is torn down. Returns whether the
    /// room was destroyed.
    pub async fn leave_room(&self, room_id: &str, player_id: &str) -> ActionResult<bool> {
        let runtime = self.runtime(room_id).await?;
        let mut rt = runtime.state.lock().await;

        let room = self
            .store
            .room(room_id)
            .await
            .ok_or_else(|| ActionError::NotFound("room".to_string()))?;
        let player = self
            .store
            .player(player_id)
            .await
            .filter(|p| p.room_id == room_id)
            .ok_or_else(|| ActionError::NotFound("player".to_string()))?;

        self.store.players.write().await.remove(&player.id);
        rt.remove_connection(&player.identity_id);

        let remaining = self.store.players_in_room(room_id).await;
        if remaining.is_empty() {
            tracing::info!(code = %room.code, "Last player left");
            self.destroy_room_locked(room, &mut rt, "emptied").await?;
            return Ok(true);
        }

        if room.host_player_id == player.id {
            // players_in_room sorts by tenure, so the heir is the front
            let heir = &remaining[0];
            {
                let mut rooms = self.store.rooms.write().await;
                if let Some(r) = rooms.get_mut(room_id) {
                    r.host_player_id = heir.id.clone();
                }
            }
            tracing::info!(code = %room.code, new_host = %heir.nickname, "Host left, role migrated");
        }
        self.touch_room(room_id).await;
        self.store.persist().await?;
        self.broadcast_room_state(room_id).await;
        Ok(false)
    }

    /// Connectivity toggles. Disconnection is not departure: the seat, the
    /// ready flag, and any submissions stay exactly as they were.
    pub async fn mark_connected(&self, room_id: &str, player_id: &str) -> ActionResult<()> {
        self.set_connected(room_id, player_id, true).await
    }

    pub async fn mark_disconnected(&self, room_id: &str, player_id: &str) -> ActionResult<()> {
        self.set_connected(room_id, player_id, false).await
    }

    async fn set_connected(
        &self,
        room_id: &str,
        player_id: &str,
        connected: bool,
    ) -> ActionResult<()> {
        let runtime = self.runtime(room_id).await?;
        let _rt = runtime.state.lock().await;

        let changed = {
            let mut players = self.store.players.write().await;
            match players.get_mut(player_id) {
                Some(p) if p.room_id == room_id => {
                    let changed = p.is_connected != connected;
                    p.is_connected = connected;
                    changed
                }
                _ => return Err(ActionError::NotFound("player".to_string())),
            }
        };
        if changed {
            self.store.persist().await?;
            self.broadcast_room_state(room_id).await;
        }
        Ok(())
    }

    /// Lobby browser listing, newest rooms first
    pub async fn list_rooms(&self) -> Vec<RoomSummary> {
        let mut rooms: Vec<Room> = self.store.rooms.read().await.values().cloned().collect();
        rooms.sort_by(|a, b| parse_ts(&b.created_at).cmp(&parse_ts(&a.created_at)));

        let mut summaries = Vec::with_capacity(rooms.len());
        for room in &rooms {
            let players = self.store.players_in_room(&room.id).await.len() as u32;
            summaries.push(RoomSummary {
                code: room.code.clone(),
                title: room.title.clone(),
                players,
                capacity: room.capacity,
                status: room.status,
                has_password: room.password.is_some(),
                joinable: room.status == RoomStatus::Lobby && players < room.capacity,
            });
        }
        summaries
    }

    /// Tear a room down. Every trigger (last leave, host ending a dead room,
    /// idle sweep) funnels through here: archive, notify, delete, forget.
    pub async fn destroy_room(&self, room_id: &str, reason: &str) -> ActionResult<()> {
        let runtime = self.runtime(room_id).await?;
        let mut rt = runtime.state.lock().await;
        let room = self
            .store
            .room(room_id)
            .await
            .ok_or_else(|| ActionError::NotFound("room".to_string()))?;
        self.destroy_room_locked(room, &mut rt, reason).await
    }

    pub(crate) async fn destroy_room_locked(
        &self,
        room: Room,
        rt: &mut RuntimeState,
        reason: &str,
    ) -> ActionResult<()> {
        rt.cancel_all_timers();

        let players = self.store.players_in_room(&room.id).await;
        let rounds = self.store.rounds_for_room(&room.id).await;
        let mut questions = Vec::new();
        for round in &rounds {
            questions.extend(self.store.questions_for_round(&round.id).await);
        }
        let mut answers = Vec::new();
        for question in &questions {
            answers.extend(self.store.answers_for_question(&question.id).await);
        }

        spawn_archive_write(
            &self.archive,
            RoomArchive::new(
                reason,
                room.clone(),
                players,
                rounds.clone(),
                questions.clone(),
                answers,
            ),
        );

        self.broadcast_to_room(
            &room.id,
            ServerMessage::RoomDestroyed {
                code: room.code.clone(),
                reason: reason.to_string(),
            },
        )
        .await;

        // Cascade delete, children first
        {
            let question_ids: std::collections::HashSet<&str> =
                questions.iter().map(|q| q.id.as_str()).collect();
            self.store
                .answers
                .write()
                .await
                .retain(|_, a| !question_ids.contains(a.question_id.as_str()));
        }
        {
            let round_ids: std::collections::HashSet<&str> =
                rounds.iter().map(|r| r.id.as_str()).collect();
            self.store
                .questions
                .write()
                .await
                .retain(|_, q| !round_ids.contains(q.round_id.as_str()));
        }
        self.store
            .rounds
            .write()
            .await
            .retain(|_, r| r.room_id != room.id);
        self.store
            .players
            .write()
            .await
            .retain(|_, p| p.room_id != room.id);
        self.store.rooms.write().await.remove(&room.id);
        self.store.persist().await?;

        self.remove_runtime(&room.id).await;
        tracing::info!(code = %room.code, reason = %reason, "Room destroyed");
        Ok(())
    }
}

/// Background task that destroys rooms idle past the TTL
pub fn spawn_idle_sweeper(state: AppState, config: SweepConfig) {
    tracing::info!(
        ttl_secs = config.room_ttl.as_secs(),
        interval_secs = config.interval.as_secs(),
        "Idle room sweeper running"
    );
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(config.interval);
        // the first tick completes immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            sweep_idle_rooms(&state, config.room_ttl).await;
        }
    });
}

async fn sweep_idle_rooms(state: &AppState, ttl: std::time::Duration) {
    let cutoff = chrono::Utc::now() - chrono::Duration::seconds(ttl.as_secs() as i64);
    let stale: Vec<(RoomId, String)> = state
        .store
        .rooms
        .read()
        .await
        .values()
        .filter(|r| parse_ts(&r.last_activity_at) < cutoff)
        .map(|r| (r.id.clone(), r.code.clone()))
        .collect();

    for (room_id, code) in stale {
        tracing::info!(code = %code, "Idle room timed out");
        if let Err(e) = state.destroy_room(&room_id, "idle_sweep").await {
            tracing::warn!(code = %code, "Idle sweep could not destroy room: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::Store;

    async fn state() -> AppState {
        AppState::new(Store::in_memory())
    }

    #[tokio::test]
    async fn test_create_room_validates_input() {
        let state = state().await;

        let err = state
            .create_room("id-a", "", 4, "alice", None)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "VALIDATION");

        let err = state
            .create_room("id-a", "Night", 1, "alice", None)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "VALIDATION");

        let err = state
            .create_room("id-a", "Night", MAX_CAPACITY + 1, "alice", None)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "VALIDATION");

        let err = state
            .create_room("id-a", "Night", 4, "   ", None)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "VALIDATION");
    }

    #[tokio::test]
    async fn test_create_room_seats_host() {
        let state = state().await;
        let (room, host) = state
            .create_room("id-a", "Game Night", 4, "alice", None)
            .await
            .unwrap();

        assert_eq!(room.code.len(), CODE_LENGTH);
        assert_eq!(room.status, RoomStatus::Lobby);
        assert_eq!(room.phase, RoomPhase::Lobby);
        assert_eq!(room.current_round_no, 0);
        assert!(room.phase_deadline_at.is_none());
        assert_eq!(room.host_player_id, host.id);
        assert!(host.is_connected);
        assert!(!host.is_ready);
        assert!(state.runtime(&room.id).await.is_ok());
    }

    #[tokio::test]
    async fn test_join_checks_capacity_nickname_and_password() {
        let state = state().await;
        let (room, _) = state
            .create_room("id-a", "Night", 2, "alice", Some("sesame".to_string()))
            .await
            .unwrap();

        // wrong password
        let err = state
            .join_room(&room.code, "id-b", "bob", Some("open"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "UNAUTHORIZED");

        // missing password
        let err = state
            .join_room(&room.code, "id-b", "bob", None)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "UNAUTHORIZED");

        // duplicate nickname, case-insensitive
        let err = state
            .join_room(&room.code, "id-b", "ALICE", Some("sesame"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "CONFLICT");

        state
            .join_room(&room.code, "id-b", "bob", Some("sesame"))
            .await
            .unwrap();

        // room is now at capacity 2
        let err = state
            .join_room(&room.code, "id-c", "carol", Some("sesame"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "ROOM_FULL");
    }

    #[tokio::test]
    async fn test_join_unknown_code_not_found() {
        let state = state().await;
        let err = state
            .join_room("ZZZZZ", "id-a", "alice", None)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_join_room_code_is_case_insensitive() {
        let state = state().await;
        let (room, _) = state
            .create_room("id-a", "Night", 4, "alice", None)
            .await
            .unwrap();

        let lower = room.code.to_lowercase();
        let (_, player, outcome) = state
            .join_room(&lower, "id-b", "bob", None)
            .await
            .unwrap();
        assert_eq!(outcome, JoinOutcome::Joined);
        assert_eq!(player.nickname, "bob");
    }

    #[tokio::test]
    async fn test_rejoin_by_identity_reuses_seat() {
        let state = state().await;
        let (room, _) = state
            .create_room("id-a", "Night", 4, "alice", Some("pw".to_string()))
            .await
            .unwrap();
        let (_, bob, _) = state
            .join_room(&room.code, "id-b", "bob", Some("pw"))
            .await
            .unwrap();
        state.set_ready(&room.id, &bob.id, true).await.unwrap();
        state.mark_disconnected(&room.id, &bob.id).await.unwrap();

        // Same identity joins again: no password needed, same seat, state kept
        let (_, back, outcome) = state
            .join_room(&room.code, "id-b", "bob", None)
            .await
            .unwrap();
        assert_eq!(outcome, JoinOutcome::Rejoined);
        assert_eq!(back.id, bob.id);
        assert!(back.is_ready);
        assert!(back.is_connected);
        assert_eq!(state.store.players_in_room(&room.id).await.len(), 2);
    }

    #[tokio::test]
    async fn test_rejoin_rename_only_when_free() {
        let state = state().await;
        let (room, _) = state
            .create_room("id-a", "Night", 4, "alice", None)
            .await
            .unwrap();
        let (_, bob, _) = state
            .join_room(&room.code, "id-b", "bob", None)
            .await
            .unwrap();

        // rename to a taken name is silently ignored
        let (_, back, _) = state
            .join_room(&room.code, "id-b", "alice", None)
            .await
            .unwrap();
        assert_eq!(back.id, bob.id);
        assert_eq!(back.nickname, "bob");

        // rename to a free name sticks
        let (_, back, _) = state
            .join_room(&room.code, "id-b", "robert", None)
            .await
            .unwrap();
        assert_eq!(back.nickname, "robert");
    }

    #[tokio::test]
    async fn test_explicit_rejoin_requires_existing_seat() {
        let state = state().await;
        let (room, _) = state
            .create_room("id-a", "Night", 4, "alice", None)
            .await
            .unwrap();

        let err = state.rejoin_room(&room.code, "id-stranger").await.unwrap_err();
        assert_eq!(err.code(), "NOT_FOUND");

        let (_, player) = state.rejoin_room(&room.code, "id-a").await.unwrap();
        assert_eq!(player.nickname, "alice");
        assert!(player.is_connected);
    }

    #[tokio::test]
    async fn test_disconnect_keeps_seat_and_state() {
        let state = state().await;
        let (room, host) = state
            .create_room("id-a", "Night", 4, "alice", None)
            .await
            .unwrap();

        state.mark_disconnected(&room.id, &host.id).await.unwrap();
        let p = state.store.player(&host.id).await.unwrap();
        assert!(!p.is_connected);

        // idempotent in both directions
        state.mark_disconnected(&room.id, &host.id).await.unwrap();
        state.mark_connected(&room.id, &host.id).await.unwrap();
        state.mark_connected(&room.id, &host.id).await.unwrap();
        let p = state.store.player(&host.id).await.unwrap();
        assert!(p.is_connected);
        assert_eq!(state.store.players_in_room(&room.id).await.len(), 1);
    }

    #[tokio::test]
    async fn test_host_migrates_to_longest_tenured() {
        let state = state().await;
        let (room, alice) = state
            .create_room("id-a", "Night", 4, "alice", None)
            .await
            .unwrap();
        let (_, bob, _) = state
            .join_room(&room.code, "id-b", "bob", None)
            .await
            .unwrap();
        state.join_room(&room.code, "id-c", "carol", None).await.unwrap();

        let destroyed = state.leave_room(&room.id, &alice.id).await.unwrap();
        assert!(!destroyed);

        let room = state.store.room(&room.id).await.unwrap();
        assert_eq!(room.host_player_id, bob.id);
        assert_eq!(state.store.players_in_room(&room.id).await.len(), 2);
    }

    #[tokio::test]
    async fn test_non_host_leave_keeps_host() {
        let state = state().await;
        let (room, alice) = state
            .create_room("id-a", "Night", 4, "alice", None)
            .await
            .unwrap();
        let (_, bob, _) = state
            .join_room(&room.code, "id-b", "bob", None)
            .await
            .unwrap();

        state.leave_room(&room.id, &bob.id).await.unwrap();
        let room = state.store.room(&room.id).await.unwrap();
        assert_eq!(room.host_player_id, alice.id);
    }

    #[tokio::test]
    async fn test_last_leave_destroys_room() {
        let state = state().await;
        let (room, host) = state
            .create_room("id-a", "Night", 4, "alice", None)
            .await
            .unwrap();

        let destroyed = state.leave_room(&room.id, &host.id).await.unwrap();
        assert!(destroyed);
        assert!(state.store.room(&room.id).await.is_none());
        assert!(state.store.players_in_room(&room.id).await.is_empty());
        assert!(state.runtime(&room.id).await.is_err());
    }

    #[tokio::test]
    async fn test_destroy_room_writes_archive() {
        let dir = tempfile::tempdir().unwrap();
        let mut state = state().await;
        state.archive = crate::config::ArchiveConfig {
            dir: Some(dir.path().to_path_buf()),
        };

        let (room, _) = state
            .create_room("id-a", "Night", 4, "alice", None)
            .await
            .unwrap();
        state.destroy_room(&room.id, "idle_sweep").await.unwrap();

        // archive write is spawned; give it a moment
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        let mut entries = tokio::fs::read_dir(dir.path()).await.unwrap();
        let entry = entries.next_entry().await.unwrap().unwrap();
        let bytes = tokio::fs::read(entry.path()).await.unwrap();
        let archive: RoomArchive = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(archive.reason, "idle_sweep");
        assert_eq!(archive.room.id, room.id);
        assert_eq!(archive.players.len(), 1);
    }

    #[tokio::test]
    async fn test_list_rooms_reports_joinable() {
        let state = state().await;
        let (open, _) = state
            .create_room("id-a", "Open", 4, "alice", None)
            .await
            .unwrap();
        let (full, _) = state
            .create_room("id-b", "Tiny", 2, "bea", Some("pw".to_string()))
            .await
            .unwrap();
        state
            .join_room(&full.code, "id-c", "carol", Some("pw"))
            .await
            .unwrap();

        let list = state.list_rooms().await;
        assert_eq!(list.len(), 2);

        let open_entry = list.iter().find(|r| r.code == open.code).unwrap();
        assert!(open_entry.joinable);
        assert!(!open_entry.has_password);
        assert_eq!(open_entry.players, 1);

        let full_entry = list.iter().find(|r| r.code == full.code).unwrap();
        assert!(!full_entry.joinable);
        assert!(full_entry.has_password);
        assert_eq!(full_entry.players, 2);
    }

    #[tokio::test]
    async fn test_idle_sweep_destroys_stale_rooms_only() {
        let state = state().await;
        let (stale, _) = state
            .create_room("id-a", "Old", 4, "alice", None)
            .await
            .unwrap();
        let (fresh, _) = state
            .create_room("id-b", "New", 4, "bob", None)
            .await
            .unwrap();

        // age the stale room past the TTL
        {
            let mut rooms = state.store.rooms.write().await;
            let aged = (chrono::Utc::now() - chrono::Duration::hours(2)).to_rfc3339();
            rooms.get_mut(&stale.id).unwrap().last_activity_at = aged;
        }

        sweep_idle_rooms(&state, std::time::Duration::from_secs(3600)).await;

        assert!(state.store.room(&stale.id).await.is_none());
        assert!(state.store.room(&fresh.id).await.is_some());
    }
}

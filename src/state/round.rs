//! The round/phase orchestrator.
//!
//! Every transition here runs with the room's runtime mutex held, so player
//! actions and deadline callbacks for one room never interleave. Deadline
//! tasks re-validate the phase after taking the lock; a timer that lost the
//! race to a quorum short-circuit finds the phase moved on and does nothing.

use rand::seq::SliceRandom;

use crate::error::{ActionError, ActionResult};
use crate::protocol::{AnswerCard, ServerMessage};
use crate::types::*;

use super::runtime::{RuntimeState, TimerPurpose};
use super::store::parse_ts;
use super::AppState;

fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// The question currently being asked or revealed: lowest shuffled order
/// among the round's unused questions. Derivable from the store alone, so
/// reconnecting clients can be caught up without touching the runtime.
fn current_question(questions: &[Question]) -> Option<&Question> {
    questions
        .iter()
        .filter(|q| q.order_no.is_some() && !q.is_used)
        .min_by_key(|q| q.order_no)
}

impl AppState {
    /// Spawn a deadline task and register it under `purpose`, replacing any
    /// prior timer with that name. The task re-enters through
    /// [`AppState::on_deadline`], which takes the room lock and re-checks
    /// the phase before doing anything.
    fn arm_deadline(&self, rt: &mut RuntimeState, room_id: &str, purpose: TimerPurpose, secs: u32) {
        let state = self.clone();
        let room_id = room_id.to_string();
        let task_room = room_id.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_secs(secs as u64)).await;
            state.on_deadline(&task_room, purpose).await;
        });
        tracing::debug!(room_id, ?purpose, secs, "Deadline armed");
        rt.arm_timer(purpose, handle);
    }

    /// Deadline-task entry point. Phase preconditions are re-validated under
    /// the lock; a stale firing is a no-op.
    pub async fn on_deadline(&self, room_id: &str, purpose: TimerPurpose) {
        let Ok(runtime) = self.runtime(room_id).await else {
            return; // room destroyed while we slept
        };
        let mut rt = runtime.state.lock().await;
        rt.disarm(purpose);

        let Some(room) = self.store.room(room_id).await else {
            return;
        };
        tracing::debug!(code = %room.code, ?purpose, phase = ?room.phase, "Deadline fired");

        let result = match (purpose, room.phase) {
            (TimerPurpose::QuestionSubmitEnd, RoomPhase::QuestionSubmit) => {
                self.close_question_submit_locked(room_id, &mut rt).await
            }
            (TimerPurpose::AnswerEnd, RoomPhase::Ask) => {
                self.begin_reveal_locked(room_id, &mut rt).await
            }
            (TimerPurpose::RevealEnd, RoomPhase::Reveal) => {
                self.advance_after_reveal_locked(room_id, &mut rt).await
            }
            _ => Ok(()), // phase already moved on
        };
        if let Err(e) = result {
            tracing::error!(code = %room.code, ?purpose, "Deadline transition failed: {}", e);
        }
    }

    /// Promote the longest-tenured player if the recorded host no longer
    /// resolves. Leave already migrates the role; this is the reconciliation
    /// net for anything that slipped past it.
    pub(crate) async fn reconcile_host_locked(&self, room_id: &str) -> ActionResult<Room> {
        let room = self
            .store
            .room(room_id)
            .await
            .ok_or_else(|| ActionError::NotFound("room".to_string()))?;
        let players = self.store.players_in_room(room_id).await;
        if players.is_empty() || players.iter().any(|p| p.id == room.host_player_id) {
            return Ok(room);
        }

        let heir = players[0].id.clone();
        tracing::warn!(code = %room.code, new_host = %players[0].nickname, "Host did not resolve, promoting");
        {
            let mut rooms = self.store.rooms.write().await;
            if let Some(r) = rooms.get_mut(room_id) {
                r.host_player_id = heir;
            }
        }
        self.store.persist().await?;
        self.store
            .room(room_id)
            .await
            .ok_or_else(|| ActionError::NotFound("room".to_string()))
    }

    /// Start a round: create the Round row, open QUESTION_SUBMIT with a
    /// fresh deadline, and arm its timer. Caller holds the room lock.
    pub(crate) async fn begin_question_submit_locked(
        &self,
        room_id: &str,
        rt: &mut RuntimeState,
    ) -> ActionResult<()> {
        let room = self.reconcile_host_locked(room_id).await?;

        let round = Round {
            id: ulid::Ulid::new().to_string(),
            room_id: room_id.to_string(),
            round_no: room.current_round_no + 1,
            started_at: now_rfc3339(),
            ended_at: None,
        };
        let deadline =
            (chrono::Utc::now() + chrono::Duration::seconds(self.timings.question_seconds as i64))
                .to_rfc3339();

        rt.reset_round();
        rt.round_id = Some(round.id.clone());

        self.store
            .rounds
            .write()
            .await
            .insert(round.id.clone(), round.clone());
        {
            let mut rooms = self.store.rooms.write().await;
            if let Some(r) = rooms.get_mut(room_id) {
                r.status = RoomStatus::Playing;
                r.phase = RoomPhase::QuestionSubmit;
                r.phase_deadline_at = Some(deadline.clone());
                r.current_round_no = round.round_no;
                r.last_activity_at = now_rfc3339();
            }
        }
        // Armed before the fallible persist: a deadline must never exist
        // without its timer. A firing that races a failed write re-checks
        // the phase under the lock.
        self.arm_deadline(
            rt,
            room_id,
            TimerPurpose::QuestionSubmitEnd,
            self.timings.question_seconds,
        );
        self.store.persist().await?;

        tracing::info!(code = %room.code, round_no = round.round_no, "Round started, collecting questions");
        self.broadcast_to_room(
            room_id,
            ServerMessage::PhaseChanged {
                phase: RoomPhase::QuestionSubmit,
                round_no: round.round_no,
                server_now: now_rfc3339(),
                deadline: Some(deadline),
            },
        )
        .await;
        Ok(())
    }

    /// Upsert this player's question for the open round. Repeat submissions
    /// before the deadline overwrite the same row.
    pub async fn submit_question(
        &self,
        room_id: &str,
        player_id: &str,
        text: &str,
    ) -> ActionResult<()> {
        let runtime = self.runtime(room_id).await?;
        let mut rt = runtime.state.lock().await;

        let room = self
            .store
            .room(room_id)
            .await
            .ok_or_else(|| ActionError::NotFound("room".to_string()))?;
        if room.phase != RoomPhase::QuestionSubmit {
            return Err(ActionError::Phase(
                "questions are not being collected right now".to_string(),
            ));
        }
        self.check_deadline(&room)?;

        let text = clean_text(text, self.timings.max_question_chars, "question")?;
        let player = self
            .store
            .player(player_id)
            .await
            .filter(|p| p.room_id == room_id)
            .ok_or_else(|| ActionError::NotFound("player".to_string()))?;
        let round_id = rt
            .round_id
            .clone()
            .ok_or_else(|| ActionError::NotFound("round".to_string()))?;

        let existing_id = self
            .store
            .questions_for_round(&round_id)
            .await
            .into_iter()
            .find(|q| q.player_id == player.id)
            .map(|q| q.id);
        {
            let mut questions = self.store.questions.write().await;
            match existing_id {
                Some(id) => {
                    if let Some(q) = questions.get_mut(&id) {
                        q.text = text;
                        q.submitted_at = now_rfc3339();
                    }
                }
                None => {
                    let question = Question {
                        id: ulid::Ulid::new().to_string(),
                        round_id: round_id.clone(),
                        player_id: player.id.clone(),
                        text,
                        order_no: None,
                        is_used: false,
                        submitted_at: now_rfc3339(),
                    };
                    questions.insert(question.id.clone(), question);
                }
            }
        }
        self.touch_room(room_id).await;
        self.store.persist().await?;
        tracing::debug!(code = %room.code, nickname = %player.nickname, "Question submitted");

        // Quorum short-circuit: everyone connected has a question in
        let players = self.store.players_in_room(room_id).await;
        let connected: Vec<_> = players.iter().filter(|p| p.is_connected).collect();
        let submitted: std::collections::HashSet<PlayerId> = self
            .store
            .questions_for_round(&round_id)
            .await
            .into_iter()
            .map(|q| q.player_id)
            .collect();
        if !connected.is_empty() && connected.iter().all(|p| submitted.contains(&p.id)) {
            tracing::info!(code = %room.code, "All players submitted questions, closing early");
            self.close_question_submit_locked(room_id, &mut rt).await?;
        }
        Ok(())
    }

    /// Shuffle the round's questions into their ask order and advance: to
    /// ASK on the first question, or straight to ROUND_END when nobody
    /// submitted anything.
    pub(crate) async fn close_question_submit_locked(
        &self,
        room_id: &str,
        rt: &mut RuntimeState,
    ) -> ActionResult<()> {
        rt.cancel_timer(TimerPurpose::QuestionSubmitEnd);

        let round_id = rt
            .round_id
            .clone()
            .ok_or_else(|| ActionError::NotFound("round".to_string()))?;
        let mut questions = self.store.questions_for_round(&round_id).await;
        questions.shuffle(&mut rand::rng());

        {
            let mut table = self.store.questions.write().await;
            for (i, question) in questions.iter().enumerate() {
                if let Some(q) = table.get_mut(&question.id) {
                    q.order_no = Some(i as u32 + 1);
                }
            }
        }

        if questions.is_empty() {
            tracing::info!(room_id, "No questions submitted, skipping to round end");
            return self.enter_round_end_locked(room_id, rt).await;
        }

        rt.question_ids = questions.iter().map(|q| q.id.clone()).collect();
        rt.question_index = 0;
        self.begin_ask_locked(room_id, rt).await
    }

    /// Open ASK on the question under the cursor
    async fn begin_ask_locked(&self, room_id: &str, rt: &mut RuntimeState) -> ActionResult<()> {
        let question_id = rt
            .question_ids
            .get(rt.question_index)
            .cloned()
            .ok_or_else(|| ActionError::NotFound("question".to_string()))?;
        let question = self
            .store
            .question(&question_id)
            .await
            .ok_or_else(|| ActionError::NotFound("question".to_string()))?;
        rt.current_question_id = Some(question_id.clone());
        rt.reveal_authors.clear();

        let deadline =
            (chrono::Utc::now() + chrono::Duration::seconds(self.timings.answer_seconds as i64))
                .to_rfc3339();
        let round_no = {
            let mut rooms = self.store.rooms.write().await;
            let room = rooms
                .get_mut(room_id)
                .ok_or_else(|| ActionError::NotFound("room".to_string()))?;
            room.phase = RoomPhase::Ask;
            room.phase_deadline_at = Some(deadline.clone());
            room.last_activity_at = now_rfc3339();
            room.current_round_no
        };
        self.arm_deadline(
            rt,
            room_id,
            TimerPurpose::AnswerEnd,
            self.timings.answer_seconds,
        );
        self.store.persist().await?;

        tracing::info!(
            room_id,
            number = rt.question_index + 1,
            total = rt.question_ids.len(),
            "Asking question"
        );
        self.broadcast_to_room(
            room_id,
            ServerMessage::PhaseChanged {
                phase: RoomPhase::Ask,
                round_no,
                server_now: now_rfc3339(),
                deadline: Some(deadline.clone()),
            },
        )
        .await;
        self.broadcast_to_room(
            room_id,
            ServerMessage::AskQuestion {
                question_id,
                text: question.text,
                number: rt.question_index as u32 + 1,
                total: rt.question_ids.len() as u32,
                deadline,
                server_now: now_rfc3339(),
            },
        )
        .await;
        Ok(())
    }

    /// Upsert this player's answer to the current question; advance to
    /// REVEAL early once every connected player has answered.
    pub async fn submit_answer(
        &self,
        room_id: &str,
        player_id: &str,
        text: &str,
    ) -> ActionResult<()> {
        let runtime = self.runtime(room_id).await?;
        let mut rt = runtime.state.lock().await;

        let room = self
            .store
            .room(room_id)
            .await
            .ok_or_else(|| ActionError::NotFound("room".to_string()))?;
        if room.phase != RoomPhase::Ask {
            return Err(ActionError::Phase(
                "answers are not being collected right now".to_string(),
            ));
        }
        self.check_deadline(&room)?;

        let text = clean_text(text, self.timings.max_answer_chars, "answer")?;
        let player = self
            .store
            .player(player_id)
            .await
            .filter(|p| p.room_id == room_id)
            .ok_or_else(|| ActionError::NotFound("player".to_string()))?;
        let question_id = rt
            .current_question_id
            .clone()
            .ok_or_else(|| ActionError::NotFound("question".to_string()))?;

        let existing_id = self
            .store
            .answers_for_question(&question_id)
            .await
            .into_iter()
            .find(|a| a.player_id == player.id)
            .map(|a| a.id);
        {
            let mut answers = self.store.answers.write().await;
            match existing_id {
                Some(id) => {
                    if let Some(a) = answers.get_mut(&id) {
                        a.text = text;
                        a.submitted_at = now_rfc3339();
                    }
                }
                None => {
                    let answer = Answer {
                        id: ulid::Ulid::new().to_string(),
                        question_id: question_id.clone(),
                        player_id: player.id.clone(),
                        text,
                        submitted_at: now_rfc3339(),
                    };
                    answers.insert(answer.id.clone(), answer);
                }
            }
        }
        self.touch_room(room_id).await;
        self.store.persist().await?;
        tracing::debug!(code = %room.code, nickname = %player.nickname, "Answer submitted");

        // Quorum short-circuit: everyone connected has answered
        let players = self.store.players_in_room(room_id).await;
        let connected: Vec<_> = players.iter().filter(|p| p.is_connected).collect();
        let answered: std::collections::HashSet<PlayerId> = self
            .store
            .answers_for_question(&question_id)
            .await
            .into_iter()
            .map(|a| a.player_id)
            .collect();
        if !connected.is_empty() && connected.iter().all(|p| answered.contains(&p.id)) {
            tracing::info!(code = %room.code, "All players answered, revealing early");
            self.begin_reveal_locked(room_id, &mut rt).await?;
        }
        Ok(())
    }

    /// Open REVEAL: shuffle the answers into anonymous cards, remember who
    /// wrote which card server-side only, and pace the phase with a
    /// runtime-only timer (`phase_deadline_at` stays null).
    pub(crate) async fn begin_reveal_locked(
        &self,
        room_id: &str,
        rt: &mut RuntimeState,
    ) -> ActionResult<()> {
        rt.cancel_timer(TimerPurpose::AnswerEnd);

        let question_id = rt
            .current_question_id
            .clone()
            .ok_or_else(|| ActionError::NotFound("question".to_string()))?;
        let question = self
            .store
            .question(&question_id)
            .await
            .ok_or_else(|| ActionError::NotFound("question".to_string()))?;

        let mut answers = self.store.answers_for_question(&question_id).await;
        answers.shuffle(&mut rand::rng());

        rt.reveal_authors.clear();
        let mut cards = Vec::with_capacity(answers.len());
        for (i, answer) in answers.iter().enumerate() {
            let index = i as u32 + 1;
            cards.push(AnswerCard {
                index,
                text: answer.text.clone(),
            });
            // A player who already left has no identity to record; the card
            // still shows.
            if let Some(author) = self.store.player(&answer.player_id).await {
                rt.reveal_authors.insert(index, author.identity_id);
            }
        }

        let round_no = {
            let mut rooms = self.store.rooms.write().await;
            let room = rooms
                .get_mut(room_id)
                .ok_or_else(|| ActionError::NotFound("room".to_string()))?;
            room.phase = RoomPhase::Reveal;
            room.phase_deadline_at = None;
            room.last_activity_at = now_rfc3339();
            room.current_round_no
        };
        self.arm_deadline(
            rt,
            room_id,
            TimerPurpose::RevealEnd,
            self.timings.reveal_seconds,
        );
        self.store.persist().await?;

        tracing::info!(room_id, answers = cards.len(), "Revealing answers");
        self.broadcast_to_room(
            room_id,
            ServerMessage::PhaseChanged {
                phase: RoomPhase::Reveal,
                round_no,
                server_now: now_rfc3339(),
                deadline: None,
            },
        )
        .await;
        self.broadcast_to_room(
            room_id,
            ServerMessage::Reveal {
                question_id,
                question_text: question.text,
                cards,
            },
        )
        .await;

        Ok(())
    }

    /// Leave REVEAL: retire the question, then either ask the next one or
    /// close the round.
    pub(crate) async fn advance_after_reveal_locked(
        &self,
        room_id: &str,
        rt: &mut RuntimeState,
    ) -> ActionResult<()> {
        rt.cancel_timer(TimerPurpose::RevealEnd);

        if let Some(question_id) = rt.current_question_id.take() {
            let mut questions = self.store.questions.write().await;
            if let Some(q) = questions.get_mut(&question_id) {
                q.is_used = true;
            }
        }
        rt.reveal_authors.clear();
        rt.question_index += 1;

        if rt.question_index < rt.question_ids.len() {
            self.begin_ask_locked(room_id, rt).await
        } else {
            self.enter_round_end_locked(room_id, rt).await
        }
    }

    /// Close the round: stamp `ended_at`, park the room in ROUND_END with no
    /// deadline, and wait for the host.
    async fn enter_round_end_locked(
        &self,
        room_id: &str,
        rt: &mut RuntimeState,
    ) -> ActionResult<()> {
        rt.cancel_all_timers();

        if let Some(round_id) = &rt.round_id {
            let mut rounds = self.store.rounds.write().await;
            if let Some(r) = rounds.get_mut(round_id) {
                r.ended_at = Some(now_rfc3339());
            }
        }
        let round_no = {
            let mut rooms = self.store.rooms.write().await;
            let room = rooms
                .get_mut(room_id)
                .ok_or_else(|| ActionError::NotFound("room".to_string()))?;
            room.phase = RoomPhase::RoundEnd;
            room.phase_deadline_at = None;
            room.last_activity_at = now_rfc3339();
            room.current_round_no
        };
        self.store.persist().await?;

        tracing::info!(room_id, round_no, "Round ended, waiting for host");
        self.broadcast_to_room(
            room_id,
            ServerMessage::PhaseChanged {
                phase: RoomPhase::RoundEnd,
                round_no,
                server_now: now_rfc3339(),
                deadline: None,
            },
        )
        .await;
        self.broadcast_to_room(
            room_id,
            ServerMessage::RoundEnded {
                round_no,
                server_now: now_rfc3339(),
            },
        )
        .await;
        Ok(())
    }

    /// Host action: start the next round from ROUND_END
    pub async fn host_next_round(&self, room_id: &str, player_id: &str) -> ActionResult<()> {
        let runtime = self.runtime(room_id).await?;
        let mut rt = runtime.state.lock().await;

        let room = self.reconcile_host_locked(room_id).await?;
        if room.host_player_id != player_id {
            return Err(ActionError::Forbidden(
                "only the host can start the next round".to_string(),
            ));
        }
        if room.phase != RoomPhase::RoundEnd {
            return Err(ActionError::Phase(
                "the next round can only start after the current one ends".to_string(),
            ));
        }
        self.begin_question_submit_locked(room_id, &mut rt).await
    }

    /// Host action: stop play and return the room to the lobby. Every ready
    /// flag is reset so a fresh all-ready vote is needed to start again.
    pub async fn host_end_game(&self, room_id: &str, player_id: &str) -> ActionResult<()> {
        let runtime = self.runtime(room_id).await?;
        let mut rt = runtime.state.lock().await;

        let room = self.reconcile_host_locked(room_id).await?;
        if room.host_player_id != player_id {
            return Err(ActionError::Forbidden(
                "only the host can end the game".to_string(),
            ));
        }
        if room.status != RoomStatus::Playing {
            return Err(ActionError::Phase("no game in progress".to_string()));
        }

        // A round cut short still gets its end stamped
        if let Some(round_id) = &rt.round_id {
            let mut rounds = self.store.rounds.write().await;
            if let Some(r) = rounds.get_mut(round_id) {
                if r.ended_at.is_none() {
                    r.ended_at = Some(now_rfc3339());
                }
            }
        }
        rt.reset_round();
        {
            let mut rooms = self.store.rooms.write().await;
            if let Some(r) = rooms.get_mut(room_id) {
                r.status = RoomStatus::Lobby;
                r.phase = RoomPhase::Lobby;
                r.phase_deadline_at = None;
                r.last_activity_at = now_rfc3339();
            }
        }
        {
            let mut players = self.store.players.write().await;
            for p in players.values_mut().filter(|p| p.room_id == room_id) {
                p.is_ready = false;
            }
        }
        self.store.persist().await?;

        tracing::info!(code = %room.code, "Host ended the game");
        self.broadcast_to_room(
            room_id,
            ServerMessage::PhaseChanged {
                phase: RoomPhase::Lobby,
                round_no: room.current_round_no,
                server_now: now_rfc3339(),
                deadline: None,
            },
        )
        .await;
        self.broadcast_room_state(room_id).await;
        Ok(())
    }

    /// Personal recovery payload for a (re)joining connection: the player's
    /// own submissions in the round in flight, if any.
    pub async fn session_state_message(&self, room: &Room, player: &Player) -> ServerMessage {
        let mut your_question = None;
        let mut your_answer = None;

        if room.status == RoomStatus::Playing {
            let round = self
                .store
                .rounds_for_room(&room.id)
                .await
                .into_iter()
                .find(|r| r.round_no == room.current_round_no);
            if let Some(round) = round {
                let questions = self.store.questions_for_round(&round.id).await;
                your_question = questions
                    .iter()
                    .find(|q| q.player_id == player.id)
                    .map(|q| q.text.clone());
                if room.phase == RoomPhase::Ask {
                    if let Some(current) = current_question(&questions) {
                        your_answer = self
                            .store
                            .answers_for_question(&current.id)
                            .await
                            .iter()
                            .find(|a| a.player_id == player.id)
                            .map(|a| a.text.clone());
                    }
                }
            }
        }

        ServerMessage::SessionState {
            player_id: player.id.clone(),
            nickname: player.nickname.clone(),
            is_ready: player.is_ready,
            your_question,
            your_answer,
        }
    }

    /// The question currently open for answers, if the room is in ASK
    pub async fn current_ask_question(&self, room_id: &str) -> Option<Question> {
        let room = self.store.room(room_id).await?;
        if room.phase != RoomPhase::Ask {
            return None;
        }
        let round = self
            .store
            .rounds_for_room(room_id)
            .await
            .into_iter()
            .find(|r| r.round_no == room.current_round_no)?;
        let questions = self.store.questions_for_round(&round.id).await;
        current_question(&questions).cloned()
    }

    fn check_deadline(&self, room: &Room) -> ActionResult<()> {
        match &room.phase_deadline_at {
            Some(deadline) if chrono::Utc::now() > parse_ts(deadline) => Err(ActionError::Phase(
                "the deadline for this phase has passed".to_string(),
            )),
            _ => Ok(()),
        }
    }
}

fn clean_text(text: &str, max_chars: usize, what: &str) -> ActionResult<String> {
    let text = text.trim();
    if text.is_empty() {
        return Err(ActionError::Validation(format!("{} must not be empty", what)));
    }
    if text.chars().count() > max_chars {
        return Err(ActionError::Validation(format!(
            "{} longer than {} characters",
            what, max_chars
        )));
    }
    Ok(text.to_string())
}

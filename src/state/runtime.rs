//! Per-room volatile state: everything too connection- or process-scoped to
//! persist. One record per live room, guarded by that room's own mutex —
//! the serialization point for every mutation touching the room. Lost on
//! crash by design; the durable store can rebuild all of it except live
//! connections and armed timers.

use std::collections::HashMap;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::protocol::ServerMessage;
use crate::types::*;

/// Named per-room timers. One handle per purpose, always replaced, never
/// added alongside — two callbacks racing for the same logical deadline is
/// the bug class this key structure exists to prevent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerPurpose {
    QuestionSubmitEnd,
    AnswerEnd,
    RevealEnd,
}

/// Direct line to one connection, bypassing the room fanout
pub type ConnectionTx = mpsc::UnboundedSender<ServerMessage>;

/// One attached transport. `conn_id` lets a closing socket tell whether it
/// is still the identity's live connection or was already superseded.
#[derive(Clone, Debug)]
pub struct Connection {
    pub conn_id: String,
    pub tx: ConnectionTx,
}

/// Volatile per-room record. Take the owning [`RoomRuntime`] mutex before
/// touching any field.
#[derive(Default, Debug)]
pub struct RuntimeState {
    pub round_id: Option<RoundId>,
    /// Shuffled ask order for the current round
    pub question_ids: Vec<QuestionId>,
    /// Cursor into `question_ids`
    pub question_index: usize,
    pub current_question_id: Option<QuestionId>,
    /// Reveal card index -> answering identity. Never serialized, never
    /// broadcast; read only through the explicit author lookup.
    pub reveal_authors: HashMap<u32, IdentityId>,
    timers: HashMap<TimerPurpose, JoinHandle<()>>,
    connections: HashMap<IdentityId, Connection>,
}

impl RuntimeState {
    /// Arm `purpose`, cancelling whatever was armed under the same name.
    /// Cancel-then-arm is the only scheduling primitive on offer.
    pub fn arm_timer(&mut self, purpose: TimerPurpose, handle: JoinHandle<()>) {
        if let Some(old) = self.timers.insert(purpose, handle) {
            old.abort();
        }
    }

    /// Cancel an armed timer; a cancelled timer never fires
    pub fn cancel_timer(&mut self, purpose: TimerPurpose) {
        if let Some(old) = self.timers.remove(&purpose) {
            old.abort();
        }
    }

    /// Drop a timer entry without aborting it. A fired deadline task calls
    /// this on itself before running the transition, so later cleanup
    /// cannot abort the task mid-flight.
    pub fn disarm(&mut self, purpose: TimerPurpose) {
        self.timers.remove(&purpose);
    }

    pub fn cancel_all_timers(&mut self) {
        for (_, handle) in self.timers.drain() {
            handle.abort();
        }
    }

    pub fn has_timer(&self, purpose: TimerPurpose) -> bool {
        self.timers.contains_key(&purpose)
    }

    /// Clear round-scoped fields and timers; live connections stay attached
    pub fn reset_round(&mut self) {
        self.round_id = None;
        self.question_ids.clear();
        self.question_index = 0;
        self.current_question_id = None;
        self.reveal_authors.clear();
        self.cancel_all_timers();
    }

    /// Attach a connection for `identity`, returning the one it replaces
    /// (if any) so the caller can notify it.
    pub fn attach(&mut self, identity_id: &str, conn: Connection) -> Option<Connection> {
        self.connections.insert(identity_id.to_string(), conn)
    }

    /// Detach only if `conn_id` still owns the entry. A socket that was
    /// already superseded by a reconnect must not knock the new one out.
    pub fn detach(&mut self, identity_id: &str, conn_id: &str) -> bool {
        match self.connections.get(identity_id) {
            Some(conn) if conn.conn_id == conn_id => {
                self.connections.remove(identity_id);
                true
            }
            _ => false,
        }
    }

    pub fn connection(&self, identity_id: &str) -> Option<&Connection> {
        self.connections.get(identity_id)
    }

    /// Drop an identity's entry unconditionally (seat given up, not churn)
    pub fn remove_connection(&mut self, identity_id: &str) -> Option<Connection> {
        self.connections.remove(identity_id)
    }
}

/// One per live room: the broadcast fanout plus the mutex-guarded record
#[derive(Debug)]
pub struct RoomRuntime {
    /// Fan-out to every connection attached to this room
    pub broadcast: broadcast::Sender<ServerMessage>,
    pub state: Mutex<RuntimeState>,
}

impl RoomRuntime {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(256);
        Self {
            broadcast: tx,
            state: Mutex::new(RuntimeState::default()),
        }
    }
}

impl Default for RoomRuntime {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn flag_timer(counter: Arc<AtomicU32>, delay_ms: u64) -> JoinHandle<()> {
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[tokio::test]
    async fn test_rearm_cancels_previous_timer() {
        let mut state = RuntimeState::default();
        let fired = Arc::new(AtomicU32::new(0));

        state.arm_timer(TimerPurpose::AnswerEnd, flag_timer(fired.clone(), 30));
        state.arm_timer(TimerPurpose::AnswerEnd, flag_timer(fired.clone(), 30));

        tokio::time::sleep(Duration::from_millis(80)).await;
        // Only the replacement fired
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancelled_timer_never_fires() {
        let mut state = RuntimeState::default();
        let fired = Arc::new(AtomicU32::new(0));

        state.arm_timer(TimerPurpose::AnswerEnd, flag_timer(fired.clone(), 20));
        state.cancel_timer(TimerPurpose::AnswerEnd);
        assert!(!state.has_timer(TimerPurpose::AnswerEnd));

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_distinct_purposes_are_independent() {
        let mut state = RuntimeState::default();
        let fired = Arc::new(AtomicU32::new(0));

        state.arm_timer(TimerPurpose::AnswerEnd, flag_timer(fired.clone(), 20));
        state.arm_timer(TimerPurpose::RevealEnd, flag_timer(fired.clone(), 20));
        state.cancel_timer(TimerPurpose::AnswerEnd);

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancel_all_timers() {
        let mut state = RuntimeState::default();
        let fired = Arc::new(AtomicU32::new(0));

        state.arm_timer(TimerPurpose::QuestionSubmitEnd, flag_timer(fired.clone(), 20));
        state.arm_timer(TimerPurpose::AnswerEnd, flag_timer(fired.clone(), 20));
        state.cancel_all_timers();

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_attach_returns_replaced_connection() {
        let mut state = RuntimeState::default();
        let (tx1, _rx1) = mpsc::unbounded_channel();
        let (tx2, _rx2) = mpsc::unbounded_channel();

        let first = state.attach(
            "ident",
            Connection {
                conn_id: "c1".to_string(),
                tx: tx1,
            },
        );
        assert!(first.is_none());

        let replaced = state.attach(
            "ident",
            Connection {
                conn_id: "c2".to_string(),
                tx: tx2,
            },
        );
        assert_eq!(replaced.unwrap().conn_id, "c1");
    }

    #[tokio::test]
    async fn test_detach_ignores_stale_conn_id() {
        let mut state = RuntimeState::default();
        let (tx, _rx) = mpsc::unbounded_channel();
        state.attach(
            "ident",
            Connection {
                conn_id: "c2".to_string(),
                tx,
            },
        );

        // The superseded socket ("c1") closing must not detach "c2"
        assert!(!state.detach("ident", "c1"));
        assert!(state.connection("ident").is_some());

        assert!(state.detach("ident", "c2"));
        assert!(state.connection("ident").is_none());
    }

    #[tokio::test]
    async fn test_reset_round_keeps_connections() {
        let mut state = RuntimeState::default();
        let (tx, _rx) = mpsc::unbounded_channel();
        state.attach(
            "ident",
            Connection {
                conn_id: "c1".to_string(),
                tx,
            },
        );
        state.round_id = Some("round1".to_string());
        state.question_ids = vec!["q1".to_string()];
        state.question_index = 1;
        state.reveal_authors.insert(1, "ident".to_string());

        state.reset_round();

        assert!(state.round_id.is_none());
        assert!(state.question_ids.is_empty());
        assert_eq!(state.question_index, 0);
        assert!(state.reveal_authors.is_empty());
        assert!(state.connection("ident").is_some());
    }
}

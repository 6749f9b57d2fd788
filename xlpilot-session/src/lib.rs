#![forbid(unsafe_code)]

//! Refinement sessions and the store that owns them.
//!
//! The store is a sharded map of slots. Each slot wraps its session in its
//! own async mutex, so one session's request never waits on another's, and a
//! second request for a busy session is turned away instead of queued.

use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tracing::{debug, info};
use xlpilot_plan::OperationPlan;
use xlpilot_types::{Answers, ClarificationQuestion, CopilotError, FileId, SessionId, Turn};

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RefineState {
    #[default]
    Collecting,
    AwaitingAnswers,
    Ready,
    Error,
}

/// One dialogue over a fixed set of files.
#[derive(Clone, Debug)]
pub struct Session {
    pub id: SessionId,
    pub file_ids: Vec<FileId>,
    pub answers: Answers,
    /// Questions of the latest clarification round still awaiting answers.
    pub pending_questions: Vec<ClarificationQuestion>,
    /// Every question asked so far, for rendering accumulated answers.
    pub asked: Vec<ClarificationQuestion>,
    /// Most recent plan produced in this session, kept for follow-ups.
    pub last_plan: Option<OperationPlan>,
    /// Plan confirmed for execution. Taken exactly once.
    pub ready_plan: Option<OperationPlan>,
    pub history: Vec<Turn>,
    pub round: u32,
    /// Consecutive clarification replies since the last plan.
    pub clarification_streak: u32,
    pub state: RefineState,
    pub last_error: Option<CopilotError>,
    pub created_at: DateTime<Utc>,
}

impl Session {
    pub fn new(id: SessionId, file_ids: Vec<FileId>) -> Self {
        Self {
            id,
            file_ids,
            answers: Answers::new(),
            pending_questions: Vec::new(),
            asked: Vec::new(),
            last_plan: None,
            ready_plan: None,
            history: Vec::new(),
            round: 0,
            clarification_streak: 0,
            state: RefineState::Collecting,
            last_error: None,
            created_at: Utc::now(),
        }
    }

    /// True when the session was opened for exactly this primary file.
    pub fn is_bound_to(&self, file_id: FileId) -> bool {
        self.file_ids.first() == Some(&file_id)
    }
}

struct Slot {
    session: Arc<Mutex<Session>>,
    touched: StdMutex<Instant>,
}

impl Slot {
    fn touch(&self) {
        *self.touched.lock().unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }

    fn idle_for(&self) -> Duration {
        self.touched.lock().unwrap_or_else(PoisonError::into_inner).elapsed()
    }
}

/// Exclusive access to one session. Dropping it marks the session as used.
pub struct SessionGuard {
    guard: OwnedMutexGuard<Session>,
    slot: Arc<Slot>,
}

impl Deref for SessionGuard {
    type Target = Session;

    fn deref(&self) -> &Session {
        &self.guard
    }
}

impl DerefMut for SessionGuard {
    fn deref_mut(&mut self) -> &mut Session {
        &mut self.guard
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.slot.touch();
    }
}

pub struct SessionStore {
    slots: DashMap<SessionId, Arc<Slot>>,
    ttl: Duration,
}

impl SessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            slots: DashMap::new(),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn create(&self, file_ids: Vec<FileId>) -> SessionId {
        let id = SessionId::new();
        let slot = Slot {
            session: Arc::new(Mutex::new(Session::new(id, file_ids))),
            touched: StdMutex::new(Instant::now()),
        };
        self.slots.insert(id, Arc::new(slot));
        info!(session = %id, "session created");
        id
    }

    /// Locks the session for one request. Fails fast if another request holds it.
    pub fn acquire(&self, id: SessionId) -> Result<SessionGuard, CopilotError> {
        let slot = self
            .slots
            .get(&id)
            .map(|s| Arc::clone(s.value()))
            .ok_or(CopilotError::SessionNotFound(id))?;

        let guard = Arc::clone(&slot.session)
            .try_lock_owned()
            .map_err(|_| CopilotError::SessionBusy(id))?;

        if slot.idle_for() > self.ttl {
            drop(guard);
            self.slots.remove(&id);
            debug!(session = %id, "session expired on access");
            return Err(CopilotError::SessionNotFound(id));
        }
        slot.touch();
        Ok(SessionGuard { guard, slot })
    }

    pub fn touch(&self, id: SessionId) -> bool {
        match self.slots.get(&id) {
            Some(slot) => {
                slot.touch();
                true
            }
            None => false,
        }
    }

    pub fn remove(&self, id: SessionId) -> bool {
        let removed = self.slots.remove(&id).is_some();
        if removed {
            debug!(session = %id, "session removed");
        }
        removed
    }

    /// Drops idle sessions. Sessions with a request in flight are kept.
    pub fn sweep_expired(&self) -> usize {
        let before = self.slots.len();
        self.slots.retain(|_, slot| {
            let in_flight = slot.session.try_lock().is_err();
            in_flight || slot.idle_for() <= self.ttl
        });
        let evicted = before.saturating_sub(self.slots.len());
        if evicted > 0 {
            info!(evicted, remaining = self.slots.len(), "expired sessions evicted");
        }
        evicted
    }

    /// Runs [`SessionStore::sweep_expired`] every `every` until the handle is aborted.
    pub fn spawn_sweeper(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(every);
            tick.tick().await;
            loop {
                tick.tick().await;
                store.sweep_expired();
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn second_request_on_a_session_is_rejected() {
        let store = SessionStore::new(Duration::from_secs(60));
        let id = store.create(vec![FileId::new()]);
        let mut first = store.acquire(id).unwrap();
        first.round += 1;
        assert!(matches!(store.acquire(id), Err(CopilotError::SessionBusy(_))));
        drop(first);
        assert_eq!(store.acquire(id).unwrap().round, 1);
    }

    #[tokio::test]
    async fn sessions_are_independent() {
        let store = SessionStore::new(Duration::from_secs(60));
        let a = store.create(vec![FileId::new()]);
        let b = store.create(vec![FileId::new()]);
        let _held = store.acquire(a).unwrap();
        assert!(store.acquire(b).is_ok());
    }

    #[tokio::test]
    async fn idle_sessions_expire_but_busy_ones_survive() {
        let store = SessionStore::new(Duration::from_millis(20));
        let idle = store.create(vec![FileId::new()]);
        let busy = store.create(vec![FileId::new()]);
        let held = store.acquire(busy).unwrap();

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(store.sweep_expired(), 1);
        assert!(matches!(store.acquire(idle), Err(CopilotError::SessionNotFound(_))));
        drop(held);
        assert!(store.acquire(busy).is_ok());
    }

    #[tokio::test]
    async fn expiry_is_checked_lazily_on_access() {
        let store = SessionStore::new(Duration::from_millis(10));
        let id = store.create(vec![FileId::new()]);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(matches!(store.acquire(id), Err(CopilotError::SessionNotFound(_))));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn sweeper_runs_in_background() {
        let store = Arc::new(SessionStore::new(Duration::from_millis(5)));
        store.create(vec![FileId::new()]);
        let handle = store.spawn_sweeper(Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(60)).await;
        handle.abort();
        assert!(store.is_empty());
    }
}

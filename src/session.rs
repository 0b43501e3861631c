//! Context store: one `Session` per conversation
//!
//! A session owns its `UserContexts` behind a mutex that is only ever
//! `try_lock`ed, so a second turn on the same session fails fast instead of
//! queueing. Sessions never share state.
//!
//! Turns run on their own task. Whoever waits for the outcome can go away
//! (a dropped HTTP request, say) without losing the turn: the turn is
//! cancelled at its next step boundary, and its context and audit record
//! are still written.

use crate::error::OrchestrationError;
use crate::models::{TurnOutcome, UserContexts};
use crate::orchestrator::Orchestrator;
use crate::Result;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

type ActiveTurn = Arc<StdMutex<Option<CancellationToken>>>;

fn lock_active(active_turn: &ActiveTurn) -> MutexGuard<'_, Option<CancellationToken>> {
    active_turn.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct Session {
    id: Uuid,
    created_at: DateTime<Utc>,
    /// Profile restored on reset
    profile: BTreeMap<String, String>,
    user: Arc<Mutex<UserContexts>>,
    active_turn: ActiveTurn,
}

/// Exclusive hold on a session's context for one turn.
///
/// Dropping it clears the cancel handle before the context lock is released,
/// so a later turn never has its handle wiped by an earlier one.
struct TurnLease {
    user: OwnedMutexGuard<UserContexts>,
    active_turn: ActiveTurn,
}

impl Drop for TurnLease {
    fn drop(&mut self) {
        *lock_active(&self.active_turn) = None;
    }
}

/// A turn running on its own task
pub struct RunningTurn {
    token: CancellationToken,
    handle: JoinHandle<TurnOutcome>,
}

impl RunningTurn {
    pub fn cancel_token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Wait for the outcome.
    ///
    /// Dropping this future before it resolves cancels the turn; the task
    /// keeps going to its next step boundary and stores the context.
    pub async fn outcome(self) -> Result<TurnOutcome> {
        let guard = self.token.clone().drop_guard();
        let result = self.handle.await;
        guard.disarm();
        Ok(result?)
    }
}

impl Session {
    pub fn new(profile: BTreeMap<String, String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            user: Arc::new(Mutex::new(UserContexts::with_profile(profile.clone()))),
            profile,
            active_turn: Arc::new(StdMutex::new(None)),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Take the session and start a turn on a new task.
    ///
    /// Fails with `TurnInProgress` when another turn holds the session. The
    /// turn is cancellable through [`Session::cancel`] as soon as this returns.
    pub fn start_turn(&self, orchestrator: Arc<Orchestrator>, message: String) -> Result<RunningTurn> {
        let user = self
            .user
            .clone()
            .try_lock_owned()
            .map_err(|_| OrchestrationError::TurnInProgress(self.id))?;

        let token = CancellationToken::new();
        *lock_active(&self.active_turn) = Some(token.clone());

        let mut lease = TurnLease {
            user,
            active_turn: self.active_turn.clone(),
        };
        let session_id = self.id;
        let turn_token = token.clone();

        let handle = tokio::spawn(async move {
            let outcome = orchestrator
                .run_session_turn(Some(session_id), &message, lease.user.clone(), &turn_token)
                .await;

            *lease.user = outcome.user_contexts.clone();
            debug!(
                session_id = %session_id,
                turns = lease.user.chat_history.len(),
                "Session context updated"
            );
            outcome
        });

        Ok(RunningTurn { token, handle })
    }

    /// Run one turn and keep the updated context
    pub async fn run_turn(&self, orchestrator: &Arc<Orchestrator>, message: &str) -> Result<TurnOutcome> {
        self.start_turn(orchestrator.clone(), message.to_string())?
            .outcome()
            .await
    }

    /// Signal the running turn to stop at its next step boundary.
    /// Returns false when no turn is running.
    pub fn cancel(&self) -> bool {
        match lock_active(&self.active_turn).as_ref() {
            Some(token) => {
                info!(session_id = %self.id, "Cancelling active turn");
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Drop the transcript and restore the profile the session started with
    pub fn reset(&self) -> Result<()> {
        let mut user = self
            .user
            .try_lock()
            .map_err(|_| OrchestrationError::TurnInProgress(self.id))?;

        *user = UserContexts::with_profile(self.profile.clone());
        info!(session_id = %self.id, "Session reset");
        Ok(())
    }

    pub fn snapshot(&self) -> Result<UserContexts> {
        self.user
            .try_lock()
            .map(|user| user.clone())
            .map_err(|_| OrchestrationError::TurnInProgress(self.id))
    }
}

#[derive(Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<Uuid, Arc<Session>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn create(&self, profile: BTreeMap<String, String>) -> Arc<Session> {
        let session = Arc::new(Session::new(profile));
        self.sessions.write().await.insert(session.id(), session.clone());
        info!(session_id = %session.id(), "Session created");
        session
    }

    pub async fn get(&self, id: Uuid) -> Result<Arc<Session>> {
        self.sessions
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(OrchestrationError::SessionNotFound(id))
    }

    pub async fn remove(&self, id: Uuid) -> bool {
        self.sessions.write().await.remove(&id).is_some()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }
}

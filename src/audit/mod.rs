//! Audit log of completed turns
//!
//! Every turn, finished or aborted, leaves a record with a SHA-256 hash of
//! the user context it produced.

use crate::models::{AgentContexts, Plan, TurnOutcome, TurnState, UserContexts};
use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnRecord {
    pub turn_id: Uuid,
    pub session_id: Option<Uuid>,
    pub message: String,
    pub plan: Option<Arc<Plan>>,
    pub state: TurnState,
    pub state_trace: Vec<TurnState>,
    pub abort_reason: Option<String>,
    pub agent_contexts: Arc<AgentContexts>,
    pub user_contexts: Arc<UserContexts>,
    pub context_hash: String,
    pub response: String,
    pub created_at: DateTime<Utc>,
    pub elapsed_ms: u64,
}

impl TurnRecord {
    pub fn from_outcome(session_id: Option<Uuid>, message: &str, outcome: &TurnOutcome) -> Self {
        Self {
            turn_id: outcome.turn_id,
            session_id,
            message: message.to_string(),
            plan: outcome.plan.clone().map(Arc::new),
            state: outcome.state,
            state_trace: outcome.state_trace.clone(),
            abort_reason: outcome.abort_reason.clone(),
            agent_contexts: Arc::new(outcome.agent_contexts.clone()),
            user_contexts: Arc::new(outcome.user_contexts.clone()),
            context_hash: compute_context_hash(&outcome.user_contexts),
            response: outcome.response.clone(),
            created_at: Utc::now(),
            elapsed_ms: outcome.elapsed_ms,
        }
    }
}

/// Audit trail storage
pub struct AuditLog {
    records: Arc<RwLock<HashMap<Uuid, TurnRecord>>>,
}

impl AuditLog {
    pub fn new() -> Self {
        Self {
            records: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn record(&self, record: TurnRecord) -> Result<Uuid> {
        let turn_id = record.turn_id;
        let mut records = self.records.write().await;
        records.insert(turn_id, record);
        Ok(turn_id)
    }

    pub async fn get(&self, turn_id: Uuid) -> Result<Option<TurnRecord>> {
        let records = self.records.read().await;
        Ok(records.get(&turn_id).cloned())
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    /// Turn ids of a session, oldest first
    pub async fn list_for_session(&self, session_id: Uuid) -> Result<Vec<Uuid>> {
        let records = self.records.read().await;

        let mut items: Vec<_> = records
            .values()
            .filter(|record| record.session_id == Some(session_id))
            .map(|record| (record.turn_id, record.created_at))
            .collect();

        items.sort_by_key(|(_, created_at)| *created_at);

        Ok(items.into_iter().map(|(id, _)| id).collect())
    }

    /// Recompute the context hash of a stored turn
    pub async fn verify_integrity(&self, turn_id: Uuid) -> Result<bool> {
        let records = self.records.read().await;

        match records.get(&turn_id) {
            Some(record) => Ok(compute_context_hash(&record.user_contexts) == record.context_hash),
            None => Ok(false),
        }
    }
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::new()
    }
}

/// SHA-256 of the serialized user context, streamed into the hasher
pub fn compute_context_hash(user: &UserContexts) -> String {
    let mut hasher = Sha256::new();

    if serde_json::to_writer(&mut HashWriter(&mut hasher), user).is_err() {
        return String::new();
    }

    hex::encode(hasher.finalize())
}

/// Adapter to allow writing into Sha256 via std::io::Write
struct HashWriter<'a, H: Digest>(&'a mut H);

impl<'a, H: Digest> Write for HashWriter<'a, H> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(user: UserContexts) -> TurnOutcome {
        TurnOutcome {
            turn_id: Uuid::new_v4(),
            response: "응답".to_string(),
            state: TurnState::Done,
            state_trace: vec![TurnState::Planning, TurnState::Done],
            abort_reason: None,
            plan: None,
            user_contexts: user,
            agent_contexts: AgentContexts::default(),
            elapsed_ms: 3,
        }
    }

    #[test]
    fn test_hash_is_stable_and_sensitive() {
        let mut user = UserContexts::default();
        user.add_user_message("안녕");
        let mut other = user.clone();

        assert_eq!(compute_context_hash(&user), compute_context_hash(&user.clone()));
        other.add_user_message("두 번째");
        assert_ne!(compute_context_hash(&user), compute_context_hash(&other));
        assert_eq!(compute_context_hash(&user).len(), 64);
    }

    #[tokio::test]
    async fn test_record_and_verify() {
        let log = AuditLog::new();
        let session = Uuid::new_v4();

        let first = TurnRecord::from_outcome(Some(session), "첫 질문", &outcome(UserContexts::default()));
        let second = TurnRecord::from_outcome(Some(session), "두 번째", &outcome(UserContexts::default()));
        let stray = TurnRecord::from_outcome(None, "세션 없음", &outcome(UserContexts::default()));

        let first_id = log.record(first).await.unwrap();
        let second_id = log.record(second).await.unwrap();
        log.record(stray).await.unwrap();

        assert_eq!(log.len().await, 3);
        assert!(log.verify_integrity(first_id).await.unwrap());
        assert!(!log.verify_integrity(Uuid::new_v4()).await.unwrap());
        assert_eq!(log.list_for_session(session).await.unwrap(), vec![first_id, second_id]);
        assert_eq!(log.get(second_id).await.unwrap().unwrap().message, "두 번째");
    }
}

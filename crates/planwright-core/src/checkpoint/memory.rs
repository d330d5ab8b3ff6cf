use std::collections::{BTreeMap, HashMap};

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{Checkpoint, CheckpointStore, SessionSummary};
use crate::synthesis::AgentOutput;

/// Process-local store. Payloads are kept serialized so loads go through
/// the same migration and digest checks as the durable stores.
#[derive(Debug, Default)]
pub struct InMemoryCheckpointStore {
    checkpoints: RwLock<HashMap<Uuid, Value>>,
    outputs: RwLock<HashMap<Uuid, BTreeMap<(u32, String), AgentOutput>>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a raw payload as-is, bypassing sealing.
    pub async fn insert_raw(&self, session_id: Uuid, payload: Value) {
        self.checkpoints.write().await.insert(session_id, payload);
    }

    /// The raw stored payload for a session.
    pub async fn raw(&self, session_id: Uuid) -> Option<Value> {
        self.checkpoints.read().await.get(&session_id).cloned()
    }

    /// The audit log for a session, ordered by (round, agent id).
    pub async fn agent_outputs(&self, session_id: Uuid) -> Vec<AgentOutput> {
        self.outputs
            .read()
            .await
            .get(&session_id)
            .map(|log| log.values().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn save_checkpoint(&self, checkpoint: &Checkpoint) -> Result<()> {
        let payload = checkpoint.to_value()?;
        self.checkpoints
            .write()
            .await
            .insert(checkpoint.session_id, payload);
        Ok(())
    }

    async fn load_checkpoint(&self, session_id: Uuid) -> Result<Option<Checkpoint>> {
        let Some(payload) = self.raw(session_id).await else {
            return Ok(None);
        };
        Ok(Some(Checkpoint::from_value(payload)?))
    }

    async fn append_agent_outputs(&self, session_id: Uuid, outputs: &[AgentOutput]) -> Result<usize> {
        let mut all = self.outputs.write().await;
        let log = all.entry(session_id).or_default();
        let mut written = 0;
        for output in outputs {
            let key = (output.round, output.agent_id.clone());
            if !log.contains_key(&key) {
                log.insert(key, output.clone());
                written += 1;
            }
        }
        Ok(written)
    }

    async fn load_agent_outputs(&self, session_id: Uuid, round: u32) -> Result<Vec<AgentOutput>> {
        Ok(self
            .outputs
            .read()
            .await
            .get(&session_id)
            .map(|log| {
                log.iter()
                    .filter(|((r, _), _)| *r == round)
                    .map(|(_, output)| output.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn list_sessions(&self, user_id: Option<&str>) -> Result<Vec<SessionSummary>> {
        let payloads: Vec<Value> = self.checkpoints.read().await.values().cloned().collect();
        let mut summaries = Vec::new();
        for payload in payloads {
            match Checkpoint::from_value(payload) {
                Ok(cp) if user_id.is_none_or(|u| u == cp.user_id) => summaries.push(cp.summary()),
                Ok(_) => {}
                Err(e) => tracing::warn!(error = %e, "skipping unreadable checkpoint"),
            }
        }
        summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(summaries)
    }
}

#[cfg(test)]
mod tests {
    use super::super::CheckpointError;
    use super::super::test_support::sealed;
    use super::*;
    use crate::synthesis::test_support::output;

    #[tokio::test]
    async fn save_then_load() {
        let store = InMemoryCheckpointStore::new();
        let cp = sealed("user-1");
        store.save_checkpoint(&cp).await.unwrap();
        assert_eq!(store.load_checkpoint(cp.session_id).await.unwrap(), Some(cp));
        assert!(store.load_checkpoint(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn tampered_payload_surfaces_checkpoint_error() {
        let store = InMemoryCheckpointStore::new();
        let cp = sealed("user-1");
        let mut payload = cp.to_value().unwrap();
        payload["userId"] = Value::from("someone-else");
        payload["roundIndex"] = Value::from(3);
        store.insert_raw(cp.session_id, payload).await;

        let err = store.load_checkpoint(cp.session_id).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CheckpointError>(),
            Some(CheckpointError::DigestMismatch(_))
        ));
    }

    #[tokio::test]
    async fn append_is_idempotent() {
        let store = InMemoryCheckpointStore::new();
        let id = Uuid::new_v4();
        let first = output("a", 1, 0.8, vec![]);
        assert_eq!(store.append_agent_outputs(id, &[first.clone()]).await.unwrap(), 1);

        let mut rewrite = first.clone();
        rewrite.reasoning = "changed".into();
        let second = output("b", 1, 0.8, vec![]);
        assert_eq!(store.append_agent_outputs(id, &[rewrite, second]).await.unwrap(), 1);

        let log = store.agent_outputs(id).await;
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].reasoning, first.reasoning);

        store.append_agent_outputs(id, &[output("a", 2, 0.5, vec![])]).await.unwrap();
        let round_one = store.load_agent_outputs(id, 1).await.unwrap();
        let agents: Vec<&str> = round_one.iter().map(|o| o.agent_id.as_str()).collect();
        assert_eq!(agents, ["a", "b"]);
        assert!(store.load_agent_outputs(Uuid::new_v4(), 1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn list_filters_by_user() {
        let store = InMemoryCheckpointStore::new();
        store.save_checkpoint(&sealed("user-1")).await.unwrap();
        store.save_checkpoint(&sealed("user-2")).await.unwrap();

        assert_eq!(store.list_sessions(None).await.unwrap().len(), 2);
        let mine = store.list_sessions(Some("user-2")).await.unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].user_id, "user-2");
    }
}

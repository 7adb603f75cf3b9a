//! In-memory checkpoint storage for development, testing, and single-process executions.
//!
//! [`InMemoryCheckpointer`] is a reference implementation of [`Checkpointer`] that keeps
//! every checkpoint in a thread-safe `HashMap` keyed by execution id. It is the default
//! used by the workflow engine's test harness and is suitable for any execution whose
//! lifetime doesn't need to survive a process restart.
//!
//! # Architecture
//!
//! ```text
//! InMemoryCheckpointer
//!   Arc<RwLock<HashMap<ExecutionId, Vec<CheckpointEntry>>>>
//!     "exec-1" -> [ CheckpointEntry(step 0), CheckpointEntry(step 1), ... ]
//!     "exec-2" -> [ CheckpointEntry(step 0), ... ]
//! ```
//!
//! Entries are appended in arrival order; [`Checkpointer::list`] returns them most
//! recent first.

use crate::checkpoint::{Checkpoint, CheckpointConfig, CheckpointId, CheckpointMetadata, CheckpointTuple, ExecutionId};
use crate::error::{CheckpointError, Result};
use crate::traits::{require_execution_id, Checkpointer};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

#[derive(Debug, Clone)]
struct CheckpointEntry {
    checkpoint: Checkpoint,
    metadata: CheckpointMetadata,
}

type Storage = Arc<RwLock<HashMap<ExecutionId, Vec<CheckpointEntry>>>>;

/// Thread-safe, process-local [`Checkpointer`] backed by a `HashMap`.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCheckpointer {
    storage: Storage,
}

impl InMemoryCheckpointer {
    pub fn new() -> Self {
        Self {
            storage: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Number of distinct executions with at least one stored checkpoint.
    pub fn execution_count(&self) -> usize {
        self.storage.read().expect("checkpoint storage poisoned").len()
    }

    /// Total number of checkpoints stored across all executions.
    pub fn checkpoint_count(&self) -> usize {
        self.storage
            .read()
            .expect("checkpoint storage poisoned")
            .values()
            .map(|entries| entries.len())
            .sum()
    }

    /// Remove everything. Intended for test isolation between cases sharing a runtime.
    pub fn clear(&self) {
        self.storage.write().expect("checkpoint storage poisoned").clear();
    }
}

#[async_trait]
impl Checkpointer for InMemoryCheckpointer {
    async fn put(
        &self,
        config: &CheckpointConfig,
        checkpoint: Checkpoint,
        metadata: CheckpointMetadata,
    ) -> Result<CheckpointConfig> {
        let execution_id = require_execution_id(config)?.clone();
        let checkpoint_id = checkpoint.id.clone();

        let mut storage = self.storage.write().expect("checkpoint storage poisoned");
        storage
            .entry(execution_id.clone())
            .or_default()
            .push(CheckpointEntry { checkpoint, metadata });

        Ok(CheckpointConfig::new(execution_id).with_checkpoint_id(checkpoint_id))
    }

    async fn get_tuple(&self, config: &CheckpointConfig) -> Result<Option<CheckpointTuple>> {
        let execution_id = require_execution_id(config)?;
        let storage = self.storage.read().expect("checkpoint storage poisoned");

        let Some(entries) = storage.get(execution_id) else {
            return Ok(None);
        };

        let found = match &config.checkpoint_id {
            Some(checkpoint_id) => entries.iter().find(|entry| &entry.checkpoint.id == checkpoint_id),
            None => entries.last(),
        };

        Ok(found.map(|entry| {
            CheckpointTuple::new(
                CheckpointConfig::new(execution_id.clone()).with_checkpoint_id(entry.checkpoint.id.clone()),
                entry.checkpoint.clone(),
                entry.metadata.clone(),
            )
        }))
    }

    async fn list(&self, execution_id: &ExecutionId, limit: Option<usize>) -> Result<Vec<CheckpointTuple>> {
        let storage = self.storage.read().expect("checkpoint storage poisoned");

        let Some(entries) = storage.get(execution_id) else {
            return Ok(Vec::new());
        };

        let mut tuples: Vec<CheckpointTuple> = entries
            .iter()
            .rev()
            .map(|entry| {
                CheckpointTuple::new(
                    CheckpointConfig::new(execution_id.clone()).with_checkpoint_id(entry.checkpoint.id.clone()),
                    entry.checkpoint.clone(),
                    entry.metadata.clone(),
                )
            })
            .collect();

        if let Some(limit) = limit {
            tuples.truncate(limit);
        }

        Ok(tuples)
    }

    async fn delete_execution(&self, execution_id: &ExecutionId) -> Result<()> {
        self.storage.write().expect("checkpoint storage poisoned").remove(execution_id);
        Ok(())
    }

    async fn delete_checkpoint(&self, execution_id: &ExecutionId, checkpoint_id: &CheckpointId) -> Result<()> {
        let mut storage = self.storage.write().expect("checkpoint storage poisoned");
        let entries = storage
            .get_mut(execution_id)
            .ok_or_else(|| CheckpointError::NotFound(execution_id.clone()))?;

        let before = entries.len();
        entries.retain(|entry| &entry.checkpoint.id != checkpoint_id);
        if entries.len() == before {
            return Err(CheckpointError::NotFound(checkpoint_id.clone()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_checkpoint(execution_id: &str, state_name: &str) -> Checkpoint {
        Checkpoint::new(execution_id.to_string(), state_name.to_string(), json!({"n": 1}))
    }

    #[tokio::test]
    async fn put_then_get_tuple_round_trips() {
        let saver = InMemoryCheckpointer::new();
        let config = CheckpointConfig::new("exec-1".to_string());
        let checkpoint = sample_checkpoint("exec-1", "Approve");

        let stored_config = saver
            .put(&config, checkpoint.clone(), CheckpointMetadata::new())
            .await
            .unwrap();

        let tuple = saver.get_tuple(&stored_config).await.unwrap().expect("checkpoint present");
        assert_eq!(tuple.checkpoint.state_name, "Approve");
    }

    #[tokio::test]
    async fn get_tuple_without_checkpoint_id_returns_latest() {
        let saver = InMemoryCheckpointer::new();
        let config = CheckpointConfig::new("exec-1".to_string());

        saver.put(&config, sample_checkpoint("exec-1", "First"), CheckpointMetadata::new()).await.unwrap();
        saver.put(&config, sample_checkpoint("exec-1", "Second"), CheckpointMetadata::new()).await.unwrap();

        let tuple = saver.get_tuple(&config).await.unwrap().expect("checkpoint present");
        assert_eq!(tuple.checkpoint.state_name, "Second");
    }

    #[tokio::test]
    async fn list_returns_most_recent_first_and_respects_limit() {
        let saver = InMemoryCheckpointer::new();
        let config = CheckpointConfig::new("exec-1".to_string());

        for name in ["A", "B", "C"] {
            saver.put(&config, sample_checkpoint("exec-1", name), CheckpointMetadata::new()).await.unwrap();
        }

        let all = saver.list(&"exec-1".to_string(), None).await.unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].checkpoint.state_name, "C");

        let limited = saver.list(&"exec-1".to_string(), Some(1)).await.unwrap();
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].checkpoint.state_name, "C");
    }

    #[tokio::test]
    async fn delete_execution_removes_all_checkpoints() {
        let saver = InMemoryCheckpointer::new();
        let config = CheckpointConfig::new("exec-1".to_string());
        saver.put(&config, sample_checkpoint("exec-1", "A"), CheckpointMetadata::new()).await.unwrap();

        saver.delete_execution(&"exec-1".to_string()).await.unwrap();

        assert!(saver.get_tuple(&config).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_checkpoint_removes_only_that_entry() {
        let saver = InMemoryCheckpointer::new();
        let config = CheckpointConfig::new("exec-1".to_string());
        let first = saver
            .put(&config, sample_checkpoint("exec-1", "A"), CheckpointMetadata::new())
            .await
            .unwrap();
        saver.put(&config, sample_checkpoint("exec-1", "B"), CheckpointMetadata::new()).await.unwrap();

        saver
            .delete_checkpoint(&"exec-1".to_string(), first.checkpoint_id.as_ref().unwrap())
            .await
            .unwrap();

        let remaining = saver.list(&"exec-1".to_string(), None).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].checkpoint.state_name, "B");
    }

    #[tokio::test]
    async fn clear_empties_storage() {
        let saver = InMemoryCheckpointer::new();
        let config = CheckpointConfig::new("exec-1".to_string());
        saver.put(&config, sample_checkpoint("exec-1", "A"), CheckpointMetadata::new()).await.unwrap();

        saver.clear();

        assert_eq!(saver.execution_count(), 0);
        assert_eq!(saver.checkpoint_count(), 0);
    }
}

//! The [`Checkpointer`] trait: persistence abstraction for suspended executions.
//!
//! A `Checkpointer` stores and retrieves [`Checkpoint`]s keyed by execution id, giving
//! the workflow engine (§4.10) a place to park a suspended execution's document, budget
//! counters, retry counters, and trace until a `resume()` call picks it back up.
//!
//! Implement this trait to back executions with Postgres, SQLite, Redis, or any other
//! store; [`crate::memory::InMemoryCheckpointer`] is the reference implementation used
//! for tests and for executions that don't need to survive a process restart.
//!
//! # Example: a Redis-backed checkpointer (sketch)
//!
//! ```rust,ignore
//! struct RedisCheckpointer { client: redis::Client }
//!
//! #[async_trait::async_trait]
//! impl Checkpointer for RedisCheckpointer {
//!     async fn put(&self, config: &CheckpointConfig, checkpoint: Checkpoint, metadata: CheckpointMetadata) -> Result<CheckpointConfig> {
//!         // SET asl:checkpoint:{execution_id}:{checkpoint_id} <json>
//!         // ZADD asl:checkpoints:{execution_id} <ts> <checkpoint_id>
//!         unimplemented!()
//!     }
//!     // ...
//! }
//! ```

use crate::checkpoint::{Checkpoint, CheckpointConfig, CheckpointId, CheckpointMetadata, CheckpointTuple, ExecutionId};
use crate::error::{CheckpointError, Result};
use async_trait::async_trait;

/// Persists and retrieves checkpoints for suspended workflow executions.
///
/// All methods are keyed by `execution_id`; an execution may have many checkpoints
/// over its lifetime (one per suspension), and implementations are expected to keep
/// enough history to satisfy [`Checkpointer::list`], though they are free to prune
/// old checkpoints once an execution reaches a terminal state.
#[async_trait]
pub trait Checkpointer: Send + Sync {
    /// Store a checkpoint, returning the config that addresses it.
    async fn put(
        &self,
        config: &CheckpointConfig,
        checkpoint: Checkpoint,
        metadata: CheckpointMetadata,
    ) -> Result<CheckpointConfig>;

    /// Retrieve a specific checkpoint tuple, or the latest one for the execution if
    /// `config.checkpoint_id` is absent.
    async fn get_tuple(&self, config: &CheckpointConfig) -> Result<Option<CheckpointTuple>>;

    /// Retrieve just the checkpoint (discarding metadata), for callers that don't
    /// need it. Default implementation delegates to [`Checkpointer::get_tuple`].
    async fn get(&self, config: &CheckpointConfig) -> Result<Option<Checkpoint>> {
        Ok(self.get_tuple(config).await?.map(|tuple| tuple.checkpoint))
    }

    /// List checkpoints for an execution, most recent first.
    ///
    /// `limit` caps how many tuples are returned; `None` returns the full history.
    async fn list(&self, execution_id: &ExecutionId, limit: Option<usize>) -> Result<Vec<CheckpointTuple>>;

    /// Delete all checkpoints for an execution.
    ///
    /// Default implementation is a no-op; in-memory and simple backends may not need
    /// explicit cleanup (e.g. a TTL-based store), but durable backends should override
    /// this to reclaim storage once an execution's outcome has been recorded.
    async fn delete_execution(&self, _execution_id: &ExecutionId) -> Result<()> {
        Ok(())
    }

    /// Delete a single checkpoint by id.
    async fn delete_checkpoint(&self, execution_id: &ExecutionId, checkpoint_id: &CheckpointId) -> Result<()>;
}

/// Convenience for backends that want to reject operations missing an execution id.
pub(crate) fn require_execution_id(config: &CheckpointConfig) -> Result<&ExecutionId> {
    config
        .execution_id
        .as_ref()
        .ok_or_else(|| CheckpointError::Invalid("CheckpointConfig.execution_id is required".to_string()))
}

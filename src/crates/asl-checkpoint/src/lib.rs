//! # asl-checkpoint — suspend/resume persistence for Agent State Language executions
//!
//! **Trait-based checkpoint abstractions and a reference in-memory implementation** for
//! persisting and restoring a workflow execution's document at the exact point it was
//! suspended. This crate is what lets an Approval state wait on a human decision, a
//! Debate state pause between turns, or a budget `PauseAndNotify` action hand control
//! back to a caller, without the workflow engine holding the execution open in memory.
//!
//! ## Overview
//!
//! A checkpoint is a snapshot taken whenever a state suspends: it carries the document
//! as it stood when the state was entered, the name of the state to resume at, the
//! budget accountant's running totals, the per-state retry counters, and the trace
//! recorded so far. Resuming an execution means loading the latest checkpoint for an
//! execution id and re-entering the graph at `checkpoint.state_name` with
//! `checkpoint.document` as the working document.
//!
//! This is deliberately simpler than a Pregel-style checkpoint: there is a single JSON
//! document flowing through an ASL workflow, not a set of independently-versioned
//! channels, so there is nothing here resembling channel version tracking or pending
//! per-channel writes.
//!
//! ## Core Concepts
//!
//! ### 1. The `Checkpointer` Trait
//!
//! [`Checkpointer`] defines the interface for checkpoint persistence backends:
//!
//! - **`put()`** — save a checkpoint with its metadata
//! - **`get_tuple()`** / **`get()`** — retrieve a checkpoint by config, or the latest
//!   one for an execution if no specific checkpoint id is given
//! - **`list()`** — query an execution's checkpoint history, most recent first
//! - **`delete_execution()`** / **`delete_checkpoint()`** — reclaim storage
//!
//! ### 2. Checkpoint Structure
//!
//! A [`Checkpoint`] contains:
//! - **Version and identity** — format version, checkpoint id, execution id, timestamp
//! - **Resume point** — the state name and the document at that point
//! - **Budget snapshot** — cumulative cost/tokens and fallback-engaged flag
//! - **Retry counters** — per-state retry attempt counts
//! - **Trace** — the execution trace recorded up to the suspension
//!
//! ### 3. Implementation Strategy
//!
//! This crate provides [`InMemoryCheckpointer`] as the reference implementation, used
//! by the engine's own tests and any execution that doesn't need to outlive the
//! process. For production use, implement [`Checkpointer`] against Postgres, SQLite,
//! Redis, or any other store.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use asl_checkpoint::{Checkpointer, InMemoryCheckpointer, Checkpoint, CheckpointConfig, CheckpointMetadata, CheckpointSource};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let checkpointer = InMemoryCheckpointer::new();
//!
//!     let config = CheckpointConfig::new("exec-123".to_string());
//!     let checkpoint = Checkpoint::new("exec-123".to_string(), "AwaitApproval".to_string(), json!({"orderId": 42}));
//!     let metadata = CheckpointMetadata::new().with_source(CheckpointSource::Suspend);
//!
//!     let saved_config = checkpointer.put(&config, checkpoint, metadata).await?;
//!     println!("checkpoint saved with id: {:?}", saved_config.checkpoint_id);
//!
//!     if let Some(tuple) = checkpointer.get_tuple(&saved_config).await? {
//!         println!("resume at state: {}", tuple.checkpoint.state_name);
//!     }
//!
//!     Ok(())
//! }
//! ```
//!
//! ### Implementing a Custom Backend
//!
//! ```rust,ignore
//! use asl_checkpoint::{Checkpointer, CheckpointConfig, Checkpoint, CheckpointMetadata, CheckpointTuple, Result};
//! use async_trait::async_trait;
//!
//! struct PostgresCheckpointer { pool: sqlx::PgPool }
//!
//! #[async_trait]
//! impl Checkpointer for PostgresCheckpointer {
//!     async fn put(&self, config: &CheckpointConfig, checkpoint: Checkpoint, metadata: CheckpointMetadata) -> Result<CheckpointConfig> {
//!         // INSERT INTO checkpoints (execution_id, checkpoint_id, data, metadata) VALUES (...)
//!         unimplemented!()
//!     }
//!     async fn get_tuple(&self, config: &CheckpointConfig) -> Result<Option<CheckpointTuple>> {
//!         // SELECT ... WHERE execution_id = $1 [AND checkpoint_id = $2] ORDER BY ts DESC LIMIT 1
//!         unimplemented!()
//!     }
//!     async fn list(&self, execution_id: &String, limit: Option<usize>) -> Result<Vec<CheckpointTuple>> {
//!         unimplemented!()
//!     }
//!     async fn delete_checkpoint(&self, execution_id: &String, checkpoint_id: &String) -> Result<()> {
//!         unimplemented!()
//!     }
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │              asl-engine (Workflow Execution)             │
//! │  • interprets one state at a time                        │
//! │  • calls checkpointer.put() on suspend                   │
//! │  • calls checkpointer.get() on resume()                  │
//! └────────────────────┬────────────────────────────────────┘
//!                      │ Checkpointer trait
//!                      ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │              Checkpointer (This Crate)                  │
//! │  • put() / get_tuple() / list() / delete_*()             │
//! └────────────────────┬────────────────────────────────────┘
//!                      │ implemented by
//!         ┌────────────┴──────────┬─────────────┬──────────┐
//!         ▼                       ▼             ▼          ▼
//!  ┌──────────────┐    ┌─────────────────┐  ┌─────────┐  ┌────────┐
//!  │  In-Memory   │    │  PostgreSQL     │  │  SQLite │  │ Custom │
//!  │ (Reference)  │    │ (Production)    │  │  (Dev)  │  │        │
//!  └──────────────┘    └─────────────────┘  └─────────┘  └────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`checkpoint`] — [`Checkpoint`], [`CheckpointConfig`], [`CheckpointMetadata`], [`BudgetSnapshot`]
//! - [`traits`] — the [`Checkpointer`] trait
//! - [`memory`] — [`InMemoryCheckpointer`] reference implementation
//! - [`serializer`] — JSON/bincode serialization protocols for checkpoint payloads
//! - [`error`] — [`CheckpointError`] types

pub mod checkpoint;
pub mod error;
pub mod memory;
pub mod serializer;
pub mod traits;

pub use checkpoint::{
    BudgetSnapshot, Checkpoint, CheckpointConfig, CheckpointId, CheckpointMetadata, CheckpointSource,
    CheckpointTuple, ExecutionId, RetryCounters,
};
pub use error::{CheckpointError, Result};
pub use memory::InMemoryCheckpointer;
pub use serializer::{BincodeSerializer, JsonSerializer, SerializerProtocol};
pub use traits::Checkpointer;

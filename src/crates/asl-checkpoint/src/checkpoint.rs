//! Core checkpoint data structures for suspend/resume of workflow executions.
//!
//! An ASL checkpoint captures exactly what §4.10 of the specification requires to resume
//! a suspended execution: the execution id, the name of the state at which execution
//! paused, the document as it stood at that state's pre-body envelope step, the budget
//! accountant's cumulative counters, the per-state retry counters, and the trace prefix
//! recorded so far. Unlike a Pregel-style checkpoint there is no per-channel version
//! tracking here — ASL has a single document flowing through the graph, not a set of
//! independently-versioned channels, so [`Checkpoint`] stores that document directly.
//!
//! # Quick Start
//!
//! ```rust
//! use asl_checkpoint::{Checkpoint, CheckpointConfig, CheckpointMetadata, CheckpointSource};
//! use serde_json::json;
//!
//! let checkpoint = Checkpoint::new(
//!     "exec-123".to_string(),
//!     "AwaitApproval".to_string(),
//!     json!({"orderId": 42}),
//! );
//!
//! let metadata = CheckpointMetadata::new()
//!     .with_source(CheckpointSource::Suspend)
//!     .with_step(3);
//!
//! let config = CheckpointConfig::new("exec-123".to_string());
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Unique identifier for a stored checkpoint.
pub type CheckpointId = String;

/// Identifier of the workflow execution a checkpoint belongs to.
///
/// Corresponds to `Execution.Id` in the specification's execution context (§3).
pub type ExecutionId = String;

/// Retry counters per state, keyed by state name.
///
/// Each state tracks how many times its currently-selected retry rule has been
/// consumed (§4.5 step 1); the counter resets whenever the state's body succeeds.
pub type RetryCounters = HashMap<String, usize>;

/// Why a checkpoint was produced.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CheckpointSource {
    /// Captured for the initial input to `run()`.
    Input,
    /// Captured because a suspendable state paused execution (Approval, Debate
    /// inter-turn, budget `PauseAndNotify`, an explicit Checkpoint state).
    Suspend,
    /// Captured immediately after a `resume()` call re-entered the graph.
    Resume,
}

/// Metadata describing the circumstances under which a checkpoint was taken.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CheckpointMetadata {
    /// Why this checkpoint exists.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<CheckpointSource>,

    /// Number of states entered before this checkpoint was taken.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<i64>,

    /// Checkpoint id this one was resumed from, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_checkpoint_id: Option<CheckpointId>,

    /// Free-form metadata (e.g. who triggered a pause, which alert fired).
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl CheckpointMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_source(mut self, source: CheckpointSource) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_step(mut self, step: i64) -> Self {
        self.step = Some(step);
        self
    }

    pub fn with_parent_checkpoint_id(mut self, parent_checkpoint_id: CheckpointId) -> Self {
        self.parent_checkpoint_id = Some(parent_checkpoint_id);
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }
}

/// Budget counters captured at the moment of suspension.
///
/// Mirrors the accumulators the Budget Accountant (§4.6) maintains on the execution
/// context: cumulative dollar cost and cumulative token usage, plus whether a
/// fallback model has already been engaged by a crossed `Fallback.Cascade` threshold.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq)]
pub struct BudgetSnapshot {
    pub cost: f64,
    pub tokens: u64,
    pub fallback_engaged: bool,
}

/// A point-in-time snapshot of a suspended workflow execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Checkpoint format version (currently 1).
    pub v: i32,

    /// Unique id of this checkpoint.
    pub id: CheckpointId,

    /// When this checkpoint was produced.
    pub ts: DateTime<Utc>,

    /// Execution this checkpoint belongs to.
    pub execution_id: ExecutionId,

    /// Name of the state execution will resume at.
    pub state_name: String,

    /// The document as of this state's pre-body envelope step (§4.4 step 1-2, before
    /// the body runs). Resuming re-enters the state from this exact point.
    pub document: serde_json::Value,

    /// Budget accountant counters at the time of suspension.
    pub budget: BudgetSnapshot,

    /// Per-state retry counters at the time of suspension.
    pub retry_counters: RetryCounters,

    /// The trace recorded up to and including the suspension event.
    pub trace: Vec<serde_json::Value>,
}

impl Checkpoint {
    pub const CURRENT_VERSION: i32 = 1;

    pub fn new(execution_id: ExecutionId, state_name: String, document: serde_json::Value) -> Self {
        Self {
            v: Self::CURRENT_VERSION,
            id: Uuid::new_v4().to_string(),
            ts: Utc::now(),
            execution_id,
            state_name,
            document,
            budget: BudgetSnapshot::default(),
            retry_counters: RetryCounters::new(),
            trace: Vec::new(),
        }
    }

    pub fn with_budget(mut self, budget: BudgetSnapshot) -> Self {
        self.budget = budget;
        self
    }

    pub fn with_retry_counters(mut self, retry_counters: RetryCounters) -> Self {
        self.retry_counters = retry_counters;
        self
    }

    pub fn with_trace(mut self, trace: Vec<serde_json::Value>) -> Self {
        self.trace = trace;
        self
    }
}

/// Identifies which checkpoint to store or retrieve.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CheckpointConfig {
    /// Execution this checkpoint belongs to. Required for `put`/`get_tuple`/`list`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_id: Option<ExecutionId>,

    /// A specific checkpoint id to retrieve; absent means "the latest for this execution".
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkpoint_id: Option<CheckpointId>,
}

impl CheckpointConfig {
    pub fn new(execution_id: ExecutionId) -> Self {
        Self {
            execution_id: Some(execution_id),
            checkpoint_id: None,
        }
    }

    pub fn with_checkpoint_id(mut self, checkpoint_id: CheckpointId) -> Self {
        self.checkpoint_id = Some(checkpoint_id);
        self
    }
}

/// A checkpoint together with the metadata and config under which it was stored.
#[derive(Debug, Clone)]
pub struct CheckpointTuple {
    pub config: CheckpointConfig,
    pub checkpoint: Checkpoint,
    pub metadata: CheckpointMetadata,
}

impl CheckpointTuple {
    pub fn new(config: CheckpointConfig, checkpoint: Checkpoint, metadata: CheckpointMetadata) -> Self {
        Self {
            config,
            checkpoint,
            metadata,
        }
    }
}

//! The execution context (`$$`) exposed to path expressions, and the per-state retry
//! counters the Error & Retry Engine consults (§3, §4.5).
//!
//! A single [`ExecutionContext`] is created in [`crate::engine::Engine::run`] and lives
//! for the whole execution. Map iterations fork a *child* context via
//! [`ExecutionContext::fork_for_map_item`]: the fork shares the parent's execution id,
//! start time, and budget accountant (§4.6 "Map and Parallel children share them"), but
//! gets its own `State.*` fields and its own `Map.Item.Index`/`Map.Item.Value`.

use crate::budget::Budget;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::sync::{Arc, RwLock};

/// `$$.Map.Item` while interpreting one iteration of a Map state.
#[derive(Debug, Clone)]
pub struct MapItem {
    pub index: usize,
    pub value: Value,
}

#[derive(Debug)]
struct StateCursor {
    name: String,
    entered_time: DateTime<Utc>,
    retry_count: u32,
}

/// Per-run execution context, shared (for the budget) and forked (for per-branch
/// state/retry bookkeeping) across Map iterations and Parallel branches.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    execution_id: String,
    start_time: DateTime<Utc>,
    budget: Arc<Budget>,
    cursor: Arc<RwLock<StateCursor>>,
    map_item: Option<MapItem>,
}

impl ExecutionContext {
    pub fn new(execution_id: String, budget: Arc<Budget>) -> Self {
        Self {
            execution_id,
            start_time: Utc::now(),
            budget,
            cursor: Arc::new(RwLock::new(StateCursor {
                name: String::new(),
                entered_time: Utc::now(),
                retry_count: 0,
            })),
            map_item: None,
        }
    }

    pub fn execution_id(&self) -> &str {
        &self.execution_id
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    pub fn budget(&self) -> &Arc<Budget> {
        &self.budget
    }

    /// Mark that execution entered `state_name`, resetting its retry count and
    /// recording the entry timestamp used for `State.EnteredTime`.
    pub fn enter_state(&self, state_name: &str) {
        let mut cursor = self.cursor.write().expect("execution context cursor poisoned");
        cursor.name = state_name.to_string();
        cursor.entered_time = Utc::now();
        cursor.retry_count = 0;
    }

    pub fn current_state_name(&self) -> String {
        self.cursor.read().expect("execution context cursor poisoned").name.clone()
    }

    pub fn retry_count(&self) -> u32 {
        self.cursor.read().expect("execution context cursor poisoned").retry_count
    }

    pub fn record_retry(&self) {
        self.cursor.write().expect("execution context cursor poisoned").retry_count += 1;
    }

    /// Fork a child context for one Map iteration: same execution id, start time, and
    /// budget accountant, fresh state cursor, `Map.Item` populated.
    pub fn fork_for_map_item(&self, index: usize, value: Value) -> Self {
        Self {
            execution_id: self.execution_id.clone(),
            start_time: self.start_time,
            budget: Arc::clone(&self.budget),
            cursor: Arc::new(RwLock::new(StateCursor {
                name: String::new(),
                entered_time: Utc::now(),
                retry_count: 0,
            })),
            map_item: Some(MapItem { index, value }),
        }
    }

    /// Fork a child context for one Parallel branch: same execution id, start time,
    /// and budget accountant, fresh state cursor, no `Map.Item`.
    pub fn fork_for_branch(&self) -> Self {
        Self {
            execution_id: self.execution_id.clone(),
            start_time: self.start_time,
            budget: Arc::clone(&self.budget),
            cursor: Arc::new(RwLock::new(StateCursor {
                name: String::new(),
                entered_time: Utc::now(),
                retry_count: 0,
            })),
            map_item: None,
        }
    }

    /// Render `$$` as it should appear to path expressions and intrinsics.
    pub fn to_json(&self) -> Value {
        let cursor = self.cursor.read().expect("execution context cursor poisoned");
        let mut root = json!({
            "Execution": {
                "Id": self.execution_id,
                "StartTime": self.start_time.to_rfc3339(),
                "Cost": self.budget.current_cost(),
                "TokensUsed": self.budget.current_tokens(),
            },
            "State": {
                "Name": cursor.name,
                "EnteredTime": cursor.entered_time.to_rfc3339(),
                "RetryCount": cursor.retry_count,
            },
        });

        if let Some(item) = &self.map_item {
            root["Map"] = json!({
                "Item": {
                    "Index": item.index,
                    "Value": item.value,
                }
            });
        }

        root
    }
}

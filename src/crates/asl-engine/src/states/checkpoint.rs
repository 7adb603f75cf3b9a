//! Checkpoint body (§4.4.10): suspend immediately so the engine can capture a
//! resumable snapshot. Snapshot assembly and persistence live in [`crate::engine`],
//! which is the only place with access to the registered `Checkpointer`; this module
//! only contributes the suspension signal. `Engine::resume` never re-invokes this body
//! for the state it resumes at — it skips straight to the Checkpoint state's own
//! `Next`/`End`, since running this unconditional pause again would just suspend a
//! second time.

use crate::error::{AslError, Result};
use crate::workflow::CheckpointState;
use serde_json::Value;

pub fn run(_state: &CheckpointState, state_name: &str) -> Result<Value> {
    Err(AslError::Paused(format!("checkpoint state '{state_name}'")))
}

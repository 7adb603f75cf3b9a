//! Task body (§4.4.1): look up `Agent` in the registry, invoke it, enforce
//! `TimeoutSeconds`.

use crate::agent::{self, AgentRegistry, AgentUsage};
use crate::error::{AslError, Result};
use crate::workflow::TaskState;
use serde_json::Value;
use std::time::Duration;
use tracing::instrument;

/// The raw agent output plus the usage harvested from it (not stripped — §4.4.1).
pub struct TaskOutcome {
    pub result: Value,
    pub usage: AgentUsage,
}

#[instrument(skip(state, params, registry), fields(agent = %state.agent))]
pub async fn run(state: &TaskState, params: Value, registry: &AgentRegistry) -> Result<TaskOutcome> {
    let agent = registry.get(&state.agent)?;

    let result = match state.timeout_seconds {
        Some(secs) => {
            let duration = Duration::from_secs_f64(secs.max(0.0));
            match tokio::time::timeout(duration, agent.execute(params)).await {
                Ok(inner) => inner?,
                Err(_elapsed) => return Err(AslError::Timeout(format!("agent '{}' exceeded {secs}s", state.agent))),
            }
        }
        None => agent.execute(params).await?,
    };

    let usage = agent::peek_usage(&result);
    Ok(TaskOutcome { result, usage })
}

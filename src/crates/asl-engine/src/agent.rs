//! The Agent Registry (C3, §4.4.1): the pluggable boundary between the engine and
//! whatever actually calls an LLM, tool, or sub-process for a Task/Debate state.
//!
//! `Agent` is intentionally minimal — a name and an async `execute` — because the
//! engine's job stops at "call this agent with this input, harvest its usage fields,
//! and feed the result back through `ResultSelector`/`ResultPath`." Everything about
//! how an agent actually does its work (HTTP client, subprocess, in-process closure)
//! lives outside this crate.

use crate::error::{AslError, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Reserved keys an agent may include in its output to report usage back to the
/// budget accountant (§4.6). None are required; a missing key charges zero.
pub const COST_KEY: &str = "_cost";
pub const TOKENS_KEY: &str = "_tokens";
pub const USAGE_KEY: &str = "_usage";

/// Something a Task or Debate state can invoke by name.
#[async_trait]
pub trait Agent: Send + Sync {
    /// The name this agent is registered under; must match the `Agent` field used to
    /// look it up (enforced by [`AgentRegistry::register`], not by the trait itself).
    fn name(&self) -> &str;

    /// Run the agent against `input` (the already-evaluated `Parameters` template) and
    /// return its raw output document. The caller strips [`COST_KEY`]/[`TOKENS_KEY`]/
    /// [`USAGE_KEY`] before applying `ResultSelector`.
    async fn execute(&self, input: Value) -> Result<Value>;
}

impl fmt::Debug for dyn Agent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Agent").field("name", &self.name()).finish()
    }
}

/// Name-indexed lookup table of registered [`Agent`]s, built once at workflow startup
/// and shared (via `Arc`) across every Task/Debate interpretation and every forked
/// Map/Parallel branch.
#[derive(Default, Clone)]
pub struct AgentRegistry {
    agents: HashMap<String, Arc<dyn Agent>>,
}

impl fmt::Debug for AgentRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentRegistry").field("agents", &self.agents.keys().collect::<Vec<_>>()).finish()
    }
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an agent under its own [`Agent::name`].
    pub fn register(&mut self, agent: Arc<dyn Agent>) {
        self.agents.insert(agent.name().to_string(), agent);
    }

    pub fn with_agent(mut self, agent: Arc<dyn Agent>) -> Self {
        self.register(agent);
        self
    }

    /// Look up an agent by name, raising `States.AgentNotFound` on a miss — exactly
    /// the error a Task/Debate interpreter needs to feed into `Retry`/`Catch`.
    pub fn get(&self, name: &str) -> Result<Arc<dyn Agent>> {
        self.agents.get(name).cloned().ok_or_else(|| AslError::AgentNotFound(name.to_string()))
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}

/// Read [`COST_KEY`]/[`TOKENS_KEY`]/[`USAGE_KEY`] from an agent's output without
/// removing them — per §4.4.1, the reserved keys are consumed by the Budget
/// Accountant but are *not* stripped before `ResultSelector`/`ResultPath` merging, so
/// downstream states may still observe them.
pub fn peek_usage(output: &Value) -> AgentUsage {
    let mut usage = AgentUsage::default();

    if let Some(obj) = output.as_object() {
        if let Some(cost) = obj.get(COST_KEY).and_then(Value::as_f64) {
            usage.cost = cost;
        }
        if let Some(tokens) = obj.get(TOKENS_KEY).and_then(Value::as_u64) {
            usage.tokens = tokens;
        }
        if let Some(nested) = obj.get(USAGE_KEY) {
            if let Some(cost) = nested.get("cost").and_then(Value::as_f64) {
                usage.cost = cost;
            }
            if let Some(tokens) = nested.get("tokens").and_then(Value::as_u64) {
                usage.tokens = tokens;
            }
        }
    }

    usage
}

/// Cost/token usage harvested from an agent's output, to be charged against the
/// execution's [`crate::budget::Budget`].
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AgentUsage {
    pub cost: f64,
    pub tokens: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Echo;

    #[async_trait]
    impl Agent for Echo {
        fn name(&self) -> &str {
            "Echo"
        }

        async fn execute(&self, input: Value) -> Result<Value> {
            Ok(input)
        }
    }

    #[tokio::test]
    async fn registry_dispatches_by_name() {
        let registry = AgentRegistry::new().with_agent(Arc::new(Echo));
        let agent = registry.get("Echo").unwrap();
        let output = agent.execute(json!({"hello": "world"})).await.unwrap();
        assert_eq!(output, json!({"hello": "world"}));
    }

    #[test]
    fn missing_agent_raises_agent_not_found() {
        let registry = AgentRegistry::new();
        let err = registry.get("Missing").unwrap_err();
        assert!(matches!(err, AslError::AgentNotFound(name) if name == "Missing"));
    }

    #[test]
    fn peek_usage_reads_reserved_keys_without_removing_them() {
        let output = json!({"answer": 42, "_cost": 0.02, "_tokens": 150});
        let usage = peek_usage(&output);
        assert_eq!(usage, AgentUsage { cost: 0.02, tokens: 150 });
        assert_eq!(output, json!({"answer": 42, "_cost": 0.02, "_tokens": 150}));
    }

    #[test]
    fn peek_usage_reads_nested_usage_object() {
        let output = json!({"answer": 42, "_usage": {"cost": 0.5, "tokens": 10}});
        let usage = peek_usage(&output);
        assert_eq!(usage, AgentUsage { cost: 0.5, tokens: 10 });
    }

    #[test]
    fn peek_usage_defaults_to_zero_when_absent() {
        let output = json!({"answer": 42});
        let usage = peek_usage(&output);
        assert_eq!(usage, AgentUsage::default());
    }
}

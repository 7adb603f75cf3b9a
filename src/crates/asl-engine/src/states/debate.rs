//! Debate body (§4.4.9): an ordered discussion among named agents across `Rounds`
//! turns. `Communication.Style` governs how a round is run (participants speaking in
//! sequence versus all at once), `VisibleHistory` governs what each participant reads
//! before its turn, and an optional `Arbiter` may end the debate early once it judges
//! consensus reached.

use crate::agent::AgentRegistry;
use crate::error::{AslError, Result};
use crate::workflow::{CommunicationStyle, DebateState, VisibleHistory};
use futures::future::join_all;
use serde_json::{json, Value};

pub async fn run(state: &DebateState, params: Value, registry: &AgentRegistry) -> Result<Value> {
    let participants = state.participant_names();
    if participants.is_empty() {
        return Err(AslError::ValidationError("Debate state has no Participants or Agents".to_string()));
    }

    let topic = state.topic.clone().unwrap_or(params);
    let mut history: Vec<Value> = Vec::new();
    let mut consensus = None;
    let mut decision = None;

    for round in 1..=state.rounds {
        match state.communication.style {
            CommunicationStyle::Simultaneous => run_simultaneous_round(state, &topic, round, &mut history, registry).await?,
            CommunicationStyle::TurnBased | CommunicationStyle::Reactive => run_sequential_round(state, &topic, round, &mut history, registry).await?,
        }

        if let Some((reached, verdict_decision)) = consult_arbiter(state, &topic, round, &history, registry).await? {
            if reached {
                consensus = Some(true);
                decision = verdict_decision;
                break;
            }
        }
    }

    let mut result = serde_json::Map::new();
    result.insert("topic".to_string(), topic);
    result.insert("rounds".to_string(), json!(state.rounds));
    result.insert("participants".to_string(), json!(participants));
    result.insert("history".to_string(), json!(history));
    if let Some(consensus) = consensus {
        result.insert("consensus".to_string(), json!(consensus));
    }
    if let Some(decision) = decision {
        result.insert("decision".to_string(), decision);
    }
    Ok(Value::Object(result))
}

/// Turn-based and reactive rounds run participants in declared order, each one seeing
/// the history accumulated so far — including earlier speakers from the same round.
async fn run_sequential_round(state: &DebateState, topic: &Value, round: u32, history: &mut Vec<Value>, registry: &AgentRegistry) -> Result<()> {
    for name in state.participant_names() {
        let agent = registry.get(&name)?;
        let visible = visible_history(history, state.visible_history, round, &name);
        let response = agent.execute(turn_input(topic, &visible, round, &name)).await?;
        history.push(json!({"round": round, "agent": name, "response": response}));
    }
    Ok(())
}

/// Simultaneous rounds give every participant the same view — history as of the start
/// of the round — and invoke them concurrently, appending responses in declaration
/// order regardless of which agent answers first.
async fn run_simultaneous_round(state: &DebateState, topic: &Value, round: u32, history: &mut Vec<Value>, registry: &AgentRegistry) -> Result<()> {
    let turns = state
        .participant_names()
        .into_iter()
        .map(|name| {
            let agent = registry.get(&name)?;
            let input = turn_input(topic, &visible_history(history, state.visible_history, round, &name), round, &name);
            Ok((name, agent, input))
        })
        .collect::<Result<Vec<_>>>()?;

    let responses = join_all(turns.into_iter().map(|(name, agent, input)| async move { (name, agent.execute(input).await) })).await;

    for (name, response) in responses {
        history.push(json!({"round": round, "agent": name, "response": response?}));
    }
    Ok(())
}

/// `Consensus.Required` plus an `Arbiter` invokes that agent after each round with the
/// history so far; a `{"consensus": true, ...}` verdict ends the debate early.
async fn consult_arbiter(state: &DebateState, topic: &Value, round: u32, history: &[Value], registry: &AgentRegistry) -> Result<Option<(bool, Option<Value>)>> {
    let requires_consensus = state.consensus.as_ref().is_some_and(|c| c.required);
    if !requires_consensus {
        return Ok(None);
    }
    let Some(arbiter_name) = &state.arbiter else { return Ok(None) };

    let arbiter = registry.get(arbiter_name)?;
    let verdict = arbiter.execute(json!({"topic": topic, "round": round, "history": history})).await?;
    let reached = verdict.get("consensus").and_then(Value::as_bool).unwrap_or(false);
    let decision = verdict.get("decision").cloned();
    Ok(Some((reached, decision)))
}

fn visible_history(history: &[Value], mode: VisibleHistory, round: u32, agent: &str) -> Vec<Value> {
    match mode {
        VisibleHistory::None => Vec::new(),
        VisibleHistory::All => history.to_vec(),
        VisibleHistory::PreviousOnly => {
            if round <= 1 {
                Vec::new()
            } else {
                let previous_round = u64::from(round - 1);
                history.iter().filter(|entry| entry["round"].as_u64() == Some(previous_round)).cloned().collect()
            }
        }
        VisibleHistory::OwnOnly => history.iter().filter(|entry| entry["agent"] == agent).cloned().collect(),
    }
}

fn turn_input(topic: &Value, visible_history: &[Value], round: u32, agent: &str) -> Value {
    json!({"topic": topic, "round": round, "agent": agent, "history": visible_history})
}

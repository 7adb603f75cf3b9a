//! The Validator (C9, §4.9): static checks on a workflow document that run once,
//! before `Engine::run`/`Engine::resume` touch the registry or dispatch a single
//! state. A workflow that fails validation never invokes an agent.
//!
//! Checks run in the order listed in §4.9 and return on the first violation, each as
//! a human-readable [`crate::error::AslError::ValidationError`]. Map/Parallel nest
//! their own `Workflow` documents (the iterator, the branches); those are validated
//! recursively with a prefix identifying which nested document a violation came from.

use crate::error::{AslError, Result};
use crate::workflow::{ErrorHandling, StateDefinition, Workflow};
use std::collections::{HashMap, HashSet};

pub fn validate(workflow: &Workflow) -> Result<()> {
    validate_workflow(workflow, "")
}

fn validate_workflow(workflow: &Workflow, prefix: &str) -> Result<()> {
    if !workflow.states.contains_key(&workflow.start_at) {
        return Err(fail(prefix, format!("StartAt '{}' is not defined in States", workflow.start_at)));
    }

    for (name, state) in &workflow.states {
        if name.trim().is_empty() {
            return Err(fail(prefix, "state names must be non-empty".to_string()));
        }

        for target in state.outgoing_names() {
            if !workflow.states.contains_key(target) {
                return Err(fail(prefix, format!("state '{name}' references undefined state '{target}'")));
            }
        }

        validate_transition_shape(name, state, prefix)?;
        validate_type_specific_fields(name, state, prefix)?;
        validate_retry_rules(name, state, prefix)?;
    }

    validate_reachability(workflow, prefix)?;

    for (name, state) in &workflow.states {
        match state {
            StateDefinition::Map(map) => validate_workflow(&map.iterator, &format!("{}.iterator", nested_prefix(prefix, name)))?,
            StateDefinition::Parallel(parallel) => {
                for (index, branch) in parallel.branches.iter().enumerate() {
                    validate_workflow(branch, &format!("{}[{index}]", nested_prefix(prefix, name)))?;
                }
            }
            _ => {}
        }
    }

    Ok(())
}

/// §3's invariant: exactly one of `Next`/`End: true` on any non-terminal, non-Choice
/// state. Choice's own `Default` requirement is structural (`default: String`, not
/// `Option`) and so is already enforced by deserialization.
fn validate_transition_shape(name: &str, state: &StateDefinition, prefix: &str) -> Result<()> {
    if state.is_terminal_type() || state.is_choice() {
        return Ok(());
    }
    let transition = state.transition().expect("non-terminal, non-Choice states carry a Transition");
    match (&transition.next, transition.end) {
        (Some(_), Some(true)) => Err(fail(prefix, format!("state '{name}' declares both Next and End"))),
        (Some(_), _) => Ok(()),
        (None, Some(true)) => Ok(()),
        (None, _) => Err(fail(prefix, format!("state '{name}' has neither Next nor End"))),
    }
}

/// §4.9: "`Type`-specific required fields are present". Fields modeled as non-`Option`
/// (`TaskState::agent`, `MapState::items_path`, `MapState::iterator`,
/// `ChoiceState::default`) are already enforced by deserialization failing outright;
/// what's left to check here is that string fields aren't merely *present* but
/// non-empty, and that collection fields aren't vacuous.
fn validate_type_specific_fields(name: &str, state: &StateDefinition, prefix: &str) -> Result<()> {
    match state {
        StateDefinition::Task(task) if task.agent.trim().is_empty() => Err(fail(prefix, format!("Task '{name}' has an empty Agent"))),
        StateDefinition::Map(map) if map.items_path.trim().is_empty() => Err(fail(prefix, format!("Map '{name}' has an empty ItemsPath"))),
        StateDefinition::Choice(choice) if choice.default.trim().is_empty() => Err(fail(prefix, format!("Choice '{name}' has an empty Default"))),
        StateDefinition::Choice(choice) if choice.choices.is_empty() => Err(fail(prefix, format!("Choice '{name}' has no Choices"))),
        StateDefinition::Parallel(parallel) if parallel.branches.is_empty() => Err(fail(prefix, format!("Parallel '{name}' has no Branches"))),
        StateDefinition::Debate(debate) if debate.participant_names().is_empty() => Err(fail(prefix, format!("Debate '{name}' has no Participants or Agents"))),
        StateDefinition::Debate(debate) if debate.rounds == 0 => Err(fail(prefix, format!("Debate '{name}' has Rounds 0"))),
        _ => Ok(()),
    }
}

/// §3 "Retry rule": `MaxAttempts ≥ 0` is enforced by the field's `u32` type; what
/// remains is `BackoffRate ≥ 1.0` and `IntervalSeconds ≥ 0`.
fn validate_retry_rules(name: &str, state: &StateDefinition, prefix: &str) -> Result<()> {
    let Some(error_handling) = error_handling_of(state) else { return Ok(()) };
    for rule in &error_handling.retry {
        if rule.backoff_rate < 1.0 {
            return Err(fail(prefix, format!("state '{name}' Retry rule has BackoffRate {} < 1.0", rule.backoff_rate)));
        }
        if rule.interval_seconds < 0.0 {
            return Err(fail(prefix, format!("state '{name}' Retry rule has IntervalSeconds {} < 0", rule.interval_seconds)));
        }
        if rule.error_equals.is_empty() {
            return Err(fail(prefix, format!("state '{name}' Retry rule has an empty ErrorEquals")));
        }
    }
    for catch in &error_handling.catch {
        if catch.error_equals.is_empty() {
            return Err(fail(prefix, format!("state '{name}' Catch rule has an empty ErrorEquals")));
        }
    }
    Ok(())
}

fn error_handling_of(state: &StateDefinition) -> Option<&ErrorHandling> {
    match state {
        StateDefinition::Task(s) => Some(&s.error_handling),
        StateDefinition::Map(s) => Some(&s.error_handling),
        StateDefinition::Parallel(s) => Some(&s.error_handling),
        StateDefinition::Approval(s) => Some(&s.error_handling),
        StateDefinition::Debate(s) => Some(&s.error_handling),
        _ => None,
    }
}

/// §4.9: "no reachable cycles that fail to make progress (a reachable state must be
/// able to reach a terminal state *in the type-graph*)". Builds the forward graph from
/// [`StateDefinition::outgoing_names`], then a reverse BFS from every terminal state to
/// find which states can reach one; anything reachable from `StartAt` but outside that
/// set is a dead end.
fn validate_reachability(workflow: &Workflow, prefix: &str) -> Result<()> {
    let reachable = reachable_from(workflow, &workflow.start_at);

    let mut reverse: HashMap<&str, Vec<&str>> = HashMap::new();
    for (name, state) in &workflow.states {
        for target in state.outgoing_names() {
            reverse.entry(target).or_default().push(name.as_str());
        }
    }

    let mut can_reach_terminal: HashSet<&str> = HashSet::new();
    let mut queue: Vec<&str> = Vec::new();
    for (name, state) in &workflow.states {
        if is_terminal(state) {
            can_reach_terminal.insert(name.as_str());
            queue.push(name.as_str());
        }
    }
    while let Some(current) = queue.pop() {
        if let Some(predecessors) = reverse.get(current) {
            for &predecessor in predecessors {
                if can_reach_terminal.insert(predecessor) {
                    queue.push(predecessor);
                }
            }
        }
    }

    for name in &reachable {
        if !can_reach_terminal.contains(name.as_str()) {
            return Err(fail(prefix, format!("state '{name}' is reachable but cannot reach a terminal state")));
        }
    }
    Ok(())
}

fn reachable_from(workflow: &Workflow, start: &str) -> HashSet<String> {
    let mut seen = HashSet::new();
    let mut stack = vec![start.to_string()];
    while let Some(name) = stack.pop() {
        if !seen.insert(name.clone()) {
            continue;
        }
        if let Some(state) = workflow.states.get(&name) {
            for target in state.outgoing_names() {
                if !seen.contains(target) {
                    stack.push(target.to_string());
                }
            }
        }
    }
    seen
}

/// A state ends the workflow either by its type (Succeed/Fail) or by declaring
/// `End: true`; Choice never does either directly; its `Default`/`Choices[].Next`
/// targets carry that instead.
fn is_terminal(state: &StateDefinition) -> bool {
    state.is_terminal_type() || state.transition().is_some_and(|t| t.end == Some(true))
}

fn fail(prefix: &str, message: String) -> AslError {
    if prefix.is_empty() {
        AslError::ValidationError(message)
    } else {
        AslError::ValidationError(format!("{prefix}: {message}"))
    }
}

fn nested_prefix(prefix: &str, state_name: &str) -> String {
    if prefix.is_empty() {
        state_name.to_string()
    } else {
        format!("{prefix}.{state_name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::budget::BudgetLimits;
    use crate::retry::RetryRule;
    use crate::workflow::{CatchRule, ChoiceRule, ChoiceState, FailState, IoPaths, MapState, ParallelState, PassState, ResultFlow, SucceedState, TaskState, Transition};
    use serde_json::json;
    use std::collections::HashMap;

    fn task(agent: &str, next: Option<&str>, end: Option<bool>) -> StateDefinition {
        StateDefinition::Task(TaskState {
            io: IoPaths::default(),
            result_flow: ResultFlow::default(),
            transition: Transition { next: next.map(str::to_string), end },
            error_handling: ErrorHandling::default(),
            agent: agent.to_string(),
            timeout_seconds: None,
            heartbeat_seconds: None,
        })
    }

    fn pass(next: Option<&str>, end: Option<bool>) -> StateDefinition {
        StateDefinition::Pass(PassState { io: IoPaths::default(), result_flow: ResultFlow::default(), transition: Transition { next: next.map(str::to_string), end }, result: None })
    }

    fn succeed() -> StateDefinition {
        StateDefinition::Succeed(SucceedState { io: IoPaths::default() })
    }

    fn workflow_of(start_at: &str, states: Vec<(&str, StateDefinition)>) -> Workflow {
        let states = states.into_iter().map(|(name, state)| (name.to_string(), state)).collect::<HashMap<_, _>>();
        Workflow { start_at: start_at.to_string(), states, version: None, comment: None, budget: None, imports: None }
    }

    #[test]
    fn well_formed_linear_workflow_passes() {
        let workflow = workflow_of("Start", vec![("Start", task("Greeter", Some("End"), None)), ("End", succeed())]);
        assert!(validate(&workflow).is_ok());
    }

    #[test]
    fn missing_start_at_is_rejected() {
        let workflow = workflow_of("Missing", vec![("Start", succeed())]);
        let err = validate(&workflow).unwrap_err();
        assert!(matches!(err, AslError::ValidationError(msg) if msg.contains("StartAt")));
    }

    #[test]
    fn dangling_next_reference_is_rejected() {
        let workflow = workflow_of("Start", vec![("Start", task("Greeter", Some("Nowhere"), None))]);
        let err = validate(&workflow).unwrap_err();
        assert!(matches!(err, AslError::ValidationError(msg) if msg.contains("Nowhere")));
    }

    #[test]
    fn both_next_and_end_is_rejected() {
        let workflow = workflow_of("Start", vec![("Start", task("Greeter", Some("Start"), Some(true)))]);
        let err = validate(&workflow).unwrap_err();
        assert!(matches!(err, AslError::ValidationError(msg) if msg.contains("both Next and End")));
    }

    #[test]
    fn neither_next_nor_end_is_rejected() {
        let workflow = workflow_of("Start", vec![("Start", task("Greeter", None, None))]);
        let err = validate(&workflow).unwrap_err();
        assert!(matches!(err, AslError::ValidationError(msg) if msg.contains("neither Next nor End")));
    }

    #[test]
    fn empty_agent_is_rejected() {
        let workflow = workflow_of("Start", vec![("Start", task("", None, Some(true)))]);
        let err = validate(&workflow).unwrap_err();
        assert!(matches!(err, AslError::ValidationError(msg) if msg.contains("empty Agent")));
    }

    #[test]
    fn backoff_rate_below_one_is_rejected() {
        let mut state = task("Greeter", None, Some(true));
        if let StateDefinition::Task(task_state) = &mut state {
            task_state.error_handling.retry.push(RetryRule::new(vec!["States.ALL".to_string()], 3).with_backoff_rate(0.5));
        }
        let workflow = workflow_of("Start", vec![("Start", state)]);
        let err = validate(&workflow).unwrap_err();
        assert!(matches!(err, AslError::ValidationError(msg) if msg.contains("BackoffRate")));
    }

    #[test]
    fn a_cycle_with_no_escape_is_rejected() {
        let workflow = workflow_of("A", vec![("A", pass(Some("B"), None)), ("B", pass(Some("A"), None))]);
        let err = validate(&workflow).unwrap_err();
        assert!(matches!(err, AslError::ValidationError(msg) if msg.contains("cannot reach a terminal state")));
    }

    #[test]
    fn a_cycle_with_an_escape_hatch_is_accepted() {
        // Choice loops back to Retry or proceeds to Done; both are reachable and Done terminates.
        let choice = StateDefinition::Choice(ChoiceState {
            io: IoPaths::default(),
            choices: vec![ChoiceRule::Leaf(crate::workflow::ChoiceLeaf { variable: "$.ready".to_string(), next: Some("Done".to_string()), operators: [("BooleanEquals".to_string(), json!(true))].into_iter().collect() })],
            default: "Retry".to_string(),
        });
        let workflow = workflow_of("Retry", vec![("Retry", choice), ("Done", succeed())]);
        assert!(validate(&workflow).is_ok());
    }

    #[test]
    fn fail_state_with_catch_loop_still_reaches_a_terminal_state() {
        let mut failing = task("AlwaysFails", None, Some(true));
        if let StateDefinition::Task(task_state) = &mut failing {
            task_state.error_handling.catch.push(CatchRule { error_equals: vec!["States.ALL".to_string()], next: "Recover".to_string(), result_path: None });
        }
        let workflow = workflow_of("Start", vec![("Start", failing), ("Recover", succeed())]);
        assert!(validate(&workflow).is_ok());
    }

    #[test]
    fn nested_map_iterator_is_validated_with_a_prefix() {
        let inner = workflow_of("Inner", vec![("Inner", task("", None, Some(true)))]);
        let map = StateDefinition::Map(MapState {
            io: IoPaths::default(),
            result_flow: ResultFlow::default(),
            transition: Transition { next: None, end: Some(true) },
            error_handling: ErrorHandling::default(),
            items_path: "$.items".to_string(),
            max_concurrency: None,
            item_selector: None,
            iterator: Box::new(inner),
            tolerated_failure_count: None,
            tolerated_failure_percentage: None,
        });
        let workflow = workflow_of("Start", vec![("Start", map)]);
        let err = validate(&workflow).unwrap_err();
        assert!(matches!(err, AslError::ValidationError(msg) if msg.contains("Start.iterator") && msg.contains("empty Agent")));
    }

    #[test]
    fn nested_parallel_branch_is_validated_with_an_indexed_prefix() {
        let branch = workflow_of("Branch", vec![("Branch", task("", None, Some(true)))]);
        let parallel = StateDefinition::Parallel(ParallelState {
            io: IoPaths::default(),
            result_flow: ResultFlow::default(),
            transition: Transition { next: None, end: Some(true) },
            error_handling: ErrorHandling::default(),
            branches: vec![branch],
            max_concurrency: None,
        });
        let workflow = workflow_of("Start", vec![("Start", parallel)]);
        let err = validate(&workflow).unwrap_err();
        assert!(matches!(err, AslError::ValidationError(msg) if msg.contains("Start[0]")));
    }

    #[test]
    fn fail_state_needs_no_transition() {
        let fail_state = StateDefinition::Fail(FailState { error: Some("Boom".to_string()), cause: None, error_path: None, cause_path: None, comment: None });
        let workflow = workflow_of("Start", vec![("Start", fail_state)]);
        assert!(validate(&workflow).is_ok());
    }

    #[test]
    fn workflow_budget_field_does_not_interfere_with_validation() {
        let mut workflow = workflow_of("Start", vec![("Start", succeed())]);
        workflow.budget = Some(BudgetLimits::default());
        assert!(validate(&workflow).is_ok());
    }
}

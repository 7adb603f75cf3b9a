//! The workflow document model (§3): the `serde`-deserializable shape of a parsed
//! JSON state machine, independent of how it gets interpreted.
//!
//! State variants are a tagged enum (`Type` discriminator) rather than a trait
//! hierarchy — "tagged variants replace inheritance" per the design notes — so
//! `validator.rs` and `engine.rs` both match over one closed set instead of dispatching
//! through dynamic trait objects for data that never changes shape at runtime.

use crate::budget::BudgetLimits;
use crate::retry::RetryRule;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Top-level parsed workflow document (§3 "Workflow").
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Workflow {
    pub start_at: String,
    pub states: HashMap<String, StateDefinition>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default)]
    pub budget: Option<BudgetLimits>,
    #[serde(default)]
    pub imports: Option<Value>,
}

/// `{ErrorEquals: [name…], Next: state, ResultPath?: path}` (§3 "Catch rule").
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct CatchRule {
    pub error_equals: Vec<String>,
    pub next: String,
    #[serde(default)]
    pub result_path: Option<Value>,
}

impl CatchRule {
    pub fn matches(&self, error_name: &str) -> bool {
        self.error_equals.iter().any(|e| e == error_name || e == "States.ALL")
    }
}

/// Fields present on every state variant's envelope (§4.4 steps 1 and 5).
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct IoPaths {
    #[serde(default)]
    pub input_path: Option<Value>,
    #[serde(default)]
    pub output_path: Option<Value>,
    #[serde(default)]
    pub comment: Option<String>,
}

/// `Next`/`End` — present on every non-terminal, non-Choice state (§3 invariant).
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Transition {
    #[serde(default)]
    pub next: Option<String>,
    #[serde(default)]
    pub end: Option<bool>,
}

/// `Parameters`/`ResultSelector`/`ResultPath` — the data-flow fields of states whose
/// body produces a `result` (§4.4 steps 2 and 4).
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ResultFlow {
    #[serde(default)]
    pub parameters: Option<Value>,
    #[serde(default)]
    pub result_selector: Option<Value>,
    #[serde(default)]
    pub result_path: Option<Value>,
}

/// `Retry`/`Catch` — attached to any state whose body may raise (§4.4.11).
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ErrorHandling {
    #[serde(default)]
    pub retry: Vec<RetryRule>,
    #[serde(default)]
    pub catch: Vec<CatchRule>,
}

/// The state-type discriminated union (§3 "State definition", §4.4).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "Type")]
pub enum StateDefinition {
    Task(TaskState),
    Choice(ChoiceState),
    Map(MapState),
    Parallel(ParallelState),
    Pass(PassState),
    Wait(WaitState),
    Succeed(SucceedState),
    Fail(FailState),
    Approval(ApprovalState),
    Debate(DebateState),
    Checkpoint(CheckpointState),
}

impl StateDefinition {
    /// Every outgoing edge this state can statically reach, for the validator's
    /// reference-resolution and reachability checks (§4.9).
    pub fn outgoing_names(&self) -> Vec<&str> {
        match self {
            StateDefinition::Task(s) => s.transition.next.as_deref().into_iter().chain(s.error_handling.catch.iter().map(|c| c.next.as_str())).collect(),
            StateDefinition::Map(s) => s.transition.next.as_deref().into_iter().chain(s.error_handling.catch.iter().map(|c| c.next.as_str())).collect(),
            StateDefinition::Parallel(s) => s.transition.next.as_deref().into_iter().chain(s.error_handling.catch.iter().map(|c| c.next.as_str())).collect(),
            StateDefinition::Pass(s) => s.transition.next.as_deref().into_iter().collect(),
            StateDefinition::Wait(s) => s.transition.next.as_deref().into_iter().collect(),
            StateDefinition::Approval(s) => {
                let mut names: Vec<&str> = s.transition.next.as_deref().into_iter().chain(s.error_handling.catch.iter().map(|c| c.next.as_str())).collect();
                if let Some(choices) = &s.choices {
                    names.extend(choices.iter().flat_map(ChoiceRule::referenced_names));
                }
                if let Some(default) = &s.default {
                    names.push(default.as_str());
                }
                names
            }
            StateDefinition::Debate(s) => s.transition.next.as_deref().into_iter().chain(s.error_handling.catch.iter().map(|c| c.next.as_str())).collect(),
            StateDefinition::Checkpoint(s) => s.transition.next.as_deref().into_iter().collect(),
            StateDefinition::Choice(s) => {
                let mut names: Vec<&str> = s.choices.iter().flat_map(ChoiceRule::referenced_names).collect();
                names.push(s.default.as_str());
                names
            }
            StateDefinition::Succeed(_) | StateDefinition::Fail(_) => Vec::new(),
        }
    }

    pub fn is_terminal_type(&self) -> bool {
        matches!(self, StateDefinition::Succeed(_) | StateDefinition::Fail(_))
    }

    pub fn is_choice(&self) -> bool {
        matches!(self, StateDefinition::Choice(_))
    }

    pub fn transition(&self) -> Option<&Transition> {
        match self {
            StateDefinition::Task(s) => Some(&s.transition),
            StateDefinition::Map(s) => Some(&s.transition),
            StateDefinition::Parallel(s) => Some(&s.transition),
            StateDefinition::Pass(s) => Some(&s.transition),
            StateDefinition::Wait(s) => Some(&s.transition),
            StateDefinition::Approval(s) => Some(&s.transition),
            StateDefinition::Debate(s) => Some(&s.transition),
            StateDefinition::Checkpoint(s) => Some(&s.transition),
            StateDefinition::Choice(_) | StateDefinition::Succeed(_) | StateDefinition::Fail(_) => None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct TaskState {
    #[serde(flatten)]
    pub io: IoPaths,
    #[serde(flatten)]
    pub result_flow: ResultFlow,
    #[serde(flatten)]
    pub transition: Transition,
    #[serde(flatten)]
    pub error_handling: ErrorHandling,
    pub agent: String,
    #[serde(default)]
    pub timeout_seconds: Option<f64>,
    #[serde(default)]
    pub heartbeat_seconds: Option<f64>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct PassState {
    #[serde(flatten)]
    pub io: IoPaths,
    #[serde(flatten)]
    pub result_flow: ResultFlow,
    #[serde(flatten)]
    pub transition: Transition,
    #[serde(default)]
    pub result: Option<Value>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ChoiceState {
    #[serde(flatten)]
    pub io: IoPaths,
    pub choices: Vec<ChoiceRule>,
    pub default: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct WaitState {
    #[serde(flatten)]
    pub io: IoPaths,
    #[serde(flatten)]
    pub transition: Transition,
    #[serde(default)]
    pub seconds: Option<f64>,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub seconds_path: Option<String>,
    #[serde(default)]
    pub timestamp_path: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct SucceedState {
    #[serde(flatten)]
    pub io: IoPaths,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct FailState {
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub cause: Option<String>,
    #[serde(default)]
    pub error_path: Option<String>,
    #[serde(default)]
    pub cause_path: Option<String>,
    #[serde(default)]
    pub comment: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct MapState {
    #[serde(flatten)]
    pub io: IoPaths,
    #[serde(flatten)]
    pub result_flow: ResultFlow,
    #[serde(flatten)]
    pub transition: Transition,
    #[serde(flatten)]
    pub error_handling: ErrorHandling,
    pub items_path: String,
    #[serde(default)]
    pub max_concurrency: Option<u32>,
    #[serde(default)]
    pub item_selector: Option<Value>,
    pub iterator: Box<Workflow>,
    #[serde(default)]
    pub tolerated_failure_count: Option<u32>,
    #[serde(default)]
    pub tolerated_failure_percentage: Option<f64>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ParallelState {
    #[serde(flatten)]
    pub io: IoPaths,
    #[serde(flatten)]
    pub result_flow: ResultFlow,
    #[serde(flatten)]
    pub transition: Transition,
    #[serde(flatten)]
    pub error_handling: ErrorHandling,
    pub branches: Vec<Workflow>,
    #[serde(default)]
    pub max_concurrency: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct EditableSpec {
    pub fields: Vec<String>,
    #[serde(default)]
    pub result_path: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct EscalationStep {
    pub after_seconds: f64,
    pub notify: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ApprovalState {
    #[serde(flatten)]
    pub io: IoPaths,
    #[serde(flatten)]
    pub result_flow: ResultFlow,
    #[serde(flatten)]
    pub transition: Transition,
    #[serde(flatten)]
    pub error_handling: ErrorHandling,
    pub prompt: Value,
    pub options: Vec<String>,
    #[serde(default)]
    pub editable: Option<EditableSpec>,
    #[serde(default)]
    pub timeout_seconds: Option<f64>,
    #[serde(default)]
    pub escalation: Vec<EscalationStep>,
    #[serde(default)]
    pub choices: Option<Vec<ChoiceRule>>,
    #[serde(default)]
    pub default: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CommunicationStyle {
    #[default]
    TurnBased,
    Simultaneous,
    Reactive,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum VisibleHistory {
    #[default]
    All,
    PreviousOnly,
    OwnOnly,
    None,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct CommunicationSpec {
    #[serde(default)]
    pub style: CommunicationStyle,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ConsensusSpec {
    #[serde(default)]
    pub required: bool,
}

/// Debate state (§4.4.9). The source mixes a `Participants`-array surface syntax with
/// an `Agents` + `Topic` one; both are accepted and normalized via
/// [`DebateState::participant_names`], per the decision recorded in DESIGN.md.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct DebateState {
    #[serde(flatten)]
    pub io: IoPaths,
    #[serde(flatten)]
    pub result_flow: ResultFlow,
    #[serde(flatten)]
    pub transition: Transition,
    #[serde(flatten)]
    pub error_handling: ErrorHandling,
    #[serde(default)]
    pub participants: Option<Vec<String>>,
    #[serde(default)]
    pub agents: Option<Vec<String>>,
    #[serde(default)]
    pub topic: Option<Value>,
    pub rounds: u32,
    #[serde(default)]
    pub communication: CommunicationSpec,
    #[serde(default)]
    pub visible_history: VisibleHistory,
    #[serde(default)]
    pub consensus: Option<ConsensusSpec>,
    #[serde(default)]
    pub arbiter: Option<String>,
}

impl DebateState {
    /// The ordered agent names to invite, under either surface syntax.
    pub fn participant_names(&self) -> Vec<String> {
        self.participants.clone().or_else(|| self.agents.clone()).unwrap_or_default()
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct CheckpointState {
    #[serde(flatten)]
    pub io: IoPaths,
    #[serde(flatten)]
    pub transition: Transition,
}

/// One entry of a `Choices` list, or a nested sub-condition of `And`/`Or`/`Not`
/// (§4.4.3). `Next` is only meaningful on entries that are direct children of a
/// state's `Choices` array; nested sub-conditions carry it but interpreters ignore it.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum ChoiceRule {
    And(AndRule),
    Or(OrRule),
    Not(NotRule),
    Leaf(ChoiceLeaf),
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct AndRule {
    pub and: Vec<ChoiceRule>,
    #[serde(default)]
    pub next: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct OrRule {
    pub or: Vec<ChoiceRule>,
    #[serde(default)]
    pub next: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct NotRule {
    pub not: Box<ChoiceRule>,
    #[serde(default)]
    pub next: Option<String>,
}

/// A leaf choice condition: `{Variable: <path>, <Op>: <operand>, Next?: state}`. The
/// operator itself is one of the names in §4.4.3 and is captured generically since its
/// key is data, not a fixed field name; `choice.rs` looks it up by name at evaluation
/// time.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ChoiceLeaf {
    pub variable: String,
    #[serde(default)]
    pub next: Option<String>,
    #[serde(flatten)]
    pub operators: Map<String, Value>,
}

impl ChoiceRule {
    pub fn next(&self) -> Option<&str> {
        match self {
            ChoiceRule::And(r) => r.next.as_deref(),
            ChoiceRule::Or(r) => r.next.as_deref(),
            ChoiceRule::Not(r) => r.next.as_deref(),
            ChoiceRule::Leaf(r) => r.next.as_deref(),
        }
    }

    /// Every state name directly reachable from this rule, including nested
    /// sub-conditions (the validator resolves all of them, even though only the
    /// outermost `Next` is ever actually taken).
    pub fn referenced_names(&self) -> Vec<&str> {
        match self {
            ChoiceRule::And(r) => r.next.as_deref().into_iter().chain(r.and.iter().flat_map(ChoiceRule::referenced_names)).collect(),
            ChoiceRule::Or(r) => r.next.as_deref().into_iter().chain(r.or.iter().flat_map(ChoiceRule::referenced_names)).collect(),
            ChoiceRule::Not(r) => r.next.as_deref().into_iter().chain(r.not.referenced_names()).collect(),
            ChoiceRule::Leaf(r) => r.next.as_deref().into_iter().collect(),
        }
    }
}

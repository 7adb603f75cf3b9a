//! The Workflow Engine (C8, §4.8): the top-level `run`/`resume` driver, the shared
//! envelope every state interpreter runs inside (`InputPath` → `Parameters` → body →
//! `ResultSelector` → `ResultPath` → `OutputPath` → transition, §4.4), and the
//! Error & Retry Engine's retry/catch loop (§4.5) wrapped around each body invocation.
//!
//! Everything type-specific about a state lives in `states::*`; this module owns
//! everything every state has in common, because only the owner of the original state
//! input can re-invoke a body with it unchanged across retries (§4.4.11).

use crate::agent::AgentRegistry;
use crate::budget::{Budget, ChargeOutcome, OnExceed};
use crate::context::ExecutionContext;
use crate::error::{AslError, Result};
use crate::handlers::{AlertNotifier, ApprovalHandler, ApprovalResponse, TracingAlertNotifier};
use crate::path::{self, Path};
use crate::retry::RetryState;
use crate::states::{self, BodyOutput, NextState};
use crate::validator;
use crate::workflow::{ApprovalState, ChoiceState, ErrorHandling, IoPaths, MapState, ParallelState, ResultFlow, StateDefinition, TaskState, Workflow};
use async_trait::async_trait;
use asl_checkpoint::{BudgetSnapshot, Checkpoint, CheckpointConfig, CheckpointMetadata, CheckpointSource, Checkpointer};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::instrument;
use uuid::Uuid;

/// Read-only collaborators threaded through every state interpretation: the agent
/// registry, the approval handler, and the alert notifier. Cheap to clone (every field
/// is an `Arc`), so Map/Parallel fork one copy per child branch (§4.7).
#[derive(Clone)]
pub struct Deps {
    pub registry: Arc<AgentRegistry>,
    pub approval: Arc<dyn ApprovalHandler>,
    pub alerts: Arc<dyn AlertNotifier>,
}

impl Deps {
    pub fn new(registry: Arc<AgentRegistry>, approval: Arc<dyn ApprovalHandler>, alerts: Arc<dyn AlertNotifier>) -> Self {
        Self { registry, approval, alerts }
    }
}

/// Raised when an Approval state has no registered handler; distinct from a handler
/// that legitimately declines, so tests that never touch Approval don't need to stub
/// one out.
struct NoApprovalHandler;

#[async_trait]
impl ApprovalHandler for NoApprovalHandler {
    async fn on_approval(&self, state_name: &str, _prompt: Value, _options: &[String]) -> Result<ApprovalResponse> {
        Err(AslError::ValidationError(format!("state '{state_name}' is an Approval but no ApprovalHandler is registered")))
    }
}

pub fn no_approval_handler() -> Arc<dyn ApprovalHandler> {
    Arc::new(NoApprovalHandler)
}

/// The append-only execution trace (§4.8 "Exposes the trace as an ordered sequence").
/// Cheap to clone and share across Map/Parallel children — appends from concurrent
/// branches interleave under a single lock, matching §5's "trace is a partial order"
/// guarantee without needing a lock-free structure.
#[derive(Debug, Clone)]
pub struct Trace {
    entries: Arc<Mutex<Vec<Value>>>,
}

impl Trace {
    pub fn new() -> Self {
        Self { entries: Arc::new(Mutex::new(Vec::new())) }
    }

    fn push(&self, entry: Value) {
        self.entries.lock().expect("trace lock poisoned").push(entry);
    }

    pub fn workflow_start(&self, execution_id: &str) {
        self.push(json!({"event": "workflow_start", "executionId": execution_id}));
    }

    pub fn state_enter(&self, state_name: &str) {
        self.push(json!({"event": "state_enter", "state": state_name}));
    }

    pub fn state_exit(&self, state_name: &str) {
        self.push(json!({"event": "state_exit", "state": state_name}));
    }

    pub fn state_error(&self, state_name: &str, error: &str, cause: &str) {
        self.push(json!({"event": "state_error", "state": state_name, "error": error, "cause": cause}));
    }

    pub fn state_retry(&self, state_name: &str, attempt: u32, delay_seconds: f64) {
        self.push(json!({"event": "state_retry", "state": state_name, "attempt": attempt, "delaySeconds": delay_seconds}));
    }

    pub fn budget_warning(&self, message: &str) {
        self.push(json!({"event": "budget_warning", "message": message}));
    }

    pub fn workflow_complete(&self) {
        self.push(json!({"event": "workflow_complete"}));
    }

    pub fn workflow_failed(&self, error: &str, cause: &str) {
        self.push(json!({"event": "workflow_failed", "error": error, "cause": cause}));
    }

    /// Append checkpoint-restored entries verbatim when resuming (§4.10 "trace prefix").
    pub fn extend(&self, entries: Vec<Value>) {
        self.entries.lock().expect("trace lock poisoned").extend(entries);
    }

    pub fn entries(&self) -> Vec<Value> {
        self.entries.lock().expect("trace lock poisoned").clone()
    }
}

impl Default for Trace {
    fn default() -> Self {
        Self::new()
    }
}

/// Tunables with no per-workflow field of their own (§10.3): applied only when the
/// workflow document itself leaves the corresponding field unset. Nested Map/Parallel
/// iterator workflows (run via [`run_workflow`]) always use [`EngineConfig::default`] —
/// these defaults are an `Engine`-level concern, not threaded through `Arc<Workflow>`
/// recursion.
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub default_max_concurrency: Option<u32>,
    pub default_timeout_seconds: Option<f64>,
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_default_max_concurrency(mut self, max_concurrency: u32) -> Self {
        self.default_max_concurrency = Some(max_concurrency);
        self
    }

    pub fn with_default_timeout(mut self, timeout_seconds: f64) -> Self {
        self.default_timeout_seconds = Some(timeout_seconds);
        self
    }
}

/// Per-state cost/token attribution (§6 `costBreakdown`).
#[derive(Debug, Clone, Serialize)]
pub struct StateCost {
    pub cost: f64,
    pub tokens: u64,
}

/// The external result shape (§6 "Result"). `paused` is a supplement to the documented
/// schema (§7 "Pause outcomes yield... `paused=true`"): `checkpoint.is_some()` already
/// implies it, but callers that only care about control flow shouldn't have to parse a
/// checkpoint blob to notice a pause.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowResult {
    pub success: bool,
    pub output: Option<Value>,
    pub error: Option<String>,
    pub cause: Option<String>,
    pub paused: bool,
    pub trace: Vec<Value>,
    pub duration_ms: u64,
    pub cost: f64,
    pub tokens: u64,
    pub cost_breakdown: HashMap<String, StateCost>,
    pub checkpoint: Option<Value>,
}

/// What a state body produced plus where to go next, after the shared envelope steps.
struct StateOutcome {
    document: Value,
    next: NextState,
}

/// The pre-body input of whichever state is currently being interpreted at the top
/// level, captured so a pause can be turned into a resumable checkpoint (§4.10). Only
/// [`Engine::run`]/[`Engine::resume`] populate this; nested Map/Parallel recursion
/// (via [`run_workflow`]) runs without one, so a pause inside a branch surfaces as an
/// ordinary branch failure rather than a resumable sub-checkpoint — documented in
/// DESIGN.md as a scope simplification, since a nested iteration has no independent
/// resume entry point of its own.
struct PauseCapture {
    state_name: String,
    document: Value,
}

/// The Workflow Engine (§4.8): owns agent registry, approval handler, alert notifier,
/// and (optionally) a checkpointer, bound to one parsed [`Workflow`] document.
pub struct Engine {
    workflow: Arc<Workflow>,
    registry: Arc<AgentRegistry>,
    approval: Arc<dyn ApprovalHandler>,
    alerts: Arc<dyn AlertNotifier>,
    checkpointer: Option<Arc<dyn Checkpointer>>,
    config: EngineConfig,
}

impl Engine {
    pub fn new(workflow: Workflow, registry: AgentRegistry) -> Self {
        Self {
            workflow: Arc::new(workflow),
            registry: Arc::new(registry),
            approval: no_approval_handler(),
            alerts: Arc::new(TracingAlertNotifier),
            checkpointer: None,
            config: EngineConfig::default(),
        }
    }

    pub fn with_approval_handler(mut self, handler: Arc<dyn ApprovalHandler>) -> Self {
        self.approval = handler;
        self
    }

    pub fn with_alert_notifier(mut self, notifier: Arc<dyn AlertNotifier>) -> Self {
        self.alerts = notifier;
        self
    }

    pub fn with_checkpointer(mut self, checkpointer: Arc<dyn Checkpointer>) -> Self {
        self.checkpointer = Some(checkpointer);
        self
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// `run(input) → Result` (§4.8 step 1-4): fresh execution id, `StartAt` as the
    /// entry state, `input` as the initial document.
    ///
    /// Runs the Validator (§4.9) first — a workflow document that fails static
    /// validation never reaches the registry, never dispatches a state body, and
    /// never invokes an agent.
    #[instrument(skip(self, input))]
    pub async fn run(&self, input: Value) -> WorkflowResult {
        if let Err(err) = validator::validate(&self.workflow) {
            return self.validation_failure(err);
        }

        let execution_id = Uuid::new_v4().to_string();
        let budget = Arc::new(Budget::new(self.workflow.budget.clone().unwrap_or_default()));
        let ctx = ExecutionContext::new(execution_id, budget);
        let trace = Trace::new();
        trace.workflow_start(ctx.execution_id());

        let deps = Deps::new(Arc::clone(&self.registry), Arc::clone(&self.approval), Arc::clone(&self.alerts));
        let start_at = self.workflow.start_at.clone();

        self.drive(start_at, input, ctx, deps, trace).await
    }

    /// `resume(checkpoint)` (§4.10): rebuild the execution context from a previously
    /// captured checkpoint and re-enter at its saved state with its saved document.
    ///
    /// A Checkpoint state's body (§4.4.10) always pauses so the engine can take the
    /// snapshot in the first place; re-entering it on resume would just pause again.
    /// So resuming *past* a Checkpoint state skips straight to its own `Next`/`End`
    /// instead of re-running its body — every other suspendable state (Approval
    /// escalation, budget `PauseAndNotify`) re-enters and re-runs normally, since its
    /// body may now behave differently (a response is available, budget has headroom).
    #[instrument(skip(self, checkpoint), fields(execution_id = %checkpoint.execution_id, state = %checkpoint.state_name))]
    pub async fn resume(&self, checkpoint: Checkpoint) -> WorkflowResult {
        if let Err(err) = validator::validate(&self.workflow) {
            return self.validation_failure(err);
        }

        let budget = Arc::new(Budget::new(self.workflow.budget.clone().unwrap_or_default()));
        // Restoring via a single charge() call is a simplification: any Alerts/Fallback
        // threshold that had already fired before the original pause may fire again,
        // since charge()'s "already fired" bookkeeping always starts fresh. Documented
        // in DESIGN.md rather than engineered around.
        budget.charge(checkpoint.budget.cost, checkpoint.budget.tokens);

        let ctx = ExecutionContext::new(checkpoint.execution_id.clone(), budget);
        let trace = Trace::new();
        trace.extend(checkpoint.trace.clone());

        let deps = Deps::new(Arc::clone(&self.registry), Arc::clone(&self.approval), Arc::clone(&self.alerts));

        let (start_state, document) = match self.advance_past_checkpoint(&checkpoint.state_name, checkpoint.document.clone()) {
            Ok(pair) => pair,
            Err(err) => return self.immediate_failure(err, &trace, &ctx),
        };

        self.drive(start_state, document, ctx, deps, trace).await
    }

    /// If `state_name` names a Checkpoint state, apply its own `OutputPath` and resolve
    /// its `Next`/`End` so resume continues past it rather than re-pausing on it. Any
    /// other state name (Approval, Task, ...) resumes unchanged.
    fn advance_past_checkpoint(&self, state_name: &str, document: Value) -> Result<(String, Value)> {
        match self.workflow.states.get(state_name) {
            Some(StateDefinition::Checkpoint(checkpoint)) => {
                let filtered = path::filter(&document, checkpoint.io.output_path.as_ref())?;
                let next = match &checkpoint.transition.next {
                    Some(next) => next.clone(),
                    None => return Ok((state_name.to_string(), filtered)),
                };
                Ok((next, filtered))
            }
            _ => Ok((state_name.to_string(), document)),
        }
    }

    /// A Validator (§4.9) rejection, raised before any execution context exists.
    fn validation_failure(&self, err: AslError) -> WorkflowResult {
        WorkflowResult {
            success: false,
            output: None,
            error: Some(err.state_error_name().to_string()),
            cause: Some(err.cause()),
            paused: false,
            trace: Vec::new(),
            duration_ms: 0,
            cost: 0.0,
            tokens: 0,
            cost_breakdown: HashMap::new(),
            checkpoint: None,
        }
    }

    fn immediate_failure(&self, err: AslError, trace: &Trace, ctx: &ExecutionContext) -> WorkflowResult {
        WorkflowResult {
            success: false,
            output: None,
            error: Some(err.state_error_name().to_string()),
            cause: Some(err.cause()),
            paused: false,
            trace: trace.entries(),
            duration_ms: 0,
            cost: ctx.budget().current_cost(),
            tokens: ctx.budget().current_tokens(),
            cost_breakdown: HashMap::new(),
            checkpoint: None,
        }
    }

    async fn drive(&self, start_state: String, input: Value, ctx: ExecutionContext, deps: Deps, trace: Trace) -> WorkflowResult {
        let started = Instant::now();
        let mut capture: Option<PauseCapture> = None;

        let outcome = execute_from(&self.workflow, &start_state, input, &ctx, &deps, &trace, &self.config, &mut capture).await;

        let duration_ms = started.elapsed().as_millis() as u64;
        let cost = ctx.budget().current_cost();
        let tokens = ctx.budget().current_tokens();
        let cost_breakdown = ctx.budget().state_breakdown().into_iter().map(|(name, (cost, tokens))| (name, StateCost { cost, tokens })).collect();

        match outcome {
            Ok(document) => {
                trace.workflow_complete();
                WorkflowResult {
                    success: true,
                    output: Some(document),
                    error: None,
                    cause: None,
                    paused: false,
                    trace: trace.entries(),
                    duration_ms,
                    cost,
                    tokens,
                    cost_breakdown,
                    checkpoint: None,
                }
            }
            Err(err) if err.is_pause() => {
                let checkpoint_value = self.capture_checkpoint(&ctx, &trace, capture, cost, tokens).await;
                WorkflowResult {
                    success: false,
                    output: None,
                    error: Some(err.state_error_name().to_string()),
                    cause: Some(err.cause()),
                    paused: true,
                    trace: trace.entries(),
                    duration_ms,
                    cost,
                    tokens,
                    cost_breakdown,
                    checkpoint: checkpoint_value,
                }
            }
            Err(err) => {
                trace.workflow_failed(err.state_error_name(), &err.cause());
                WorkflowResult {
                    success: false,
                    output: None,
                    error: Some(err.state_error_name().to_string()),
                    cause: Some(err.cause()),
                    paused: false,
                    trace: trace.entries(),
                    duration_ms,
                    cost,
                    tokens,
                    cost_breakdown,
                    checkpoint: None,
                }
            }
        }
    }

    async fn capture_checkpoint(&self, ctx: &ExecutionContext, trace: &Trace, capture: Option<PauseCapture>, cost: f64, tokens: u64) -> Option<Value> {
        let (checkpointer, capture) = match (&self.checkpointer, capture) {
            (Some(checkpointer), Some(capture)) => (checkpointer, capture),
            _ => return None,
        };

        let snapshot = Checkpoint::new(ctx.execution_id().to_string(), capture.state_name, capture.document)
            .with_budget(BudgetSnapshot { cost, tokens, fallback_engaged: ctx.budget().active_fallback().is_some() })
            .with_trace(trace.entries());

        let config = CheckpointConfig::new(ctx.execution_id().to_string());
        let metadata = CheckpointMetadata::new().with_source(CheckpointSource::Suspend);

        match checkpointer.put(&config, snapshot, metadata).await {
            Ok(saved) => Some(json!({"executionId": saved.execution_id, "checkpointId": saved.checkpoint_id})),
            Err(checkpoint_err) => {
                tracing::warn!(error = %checkpoint_err, "failed to persist checkpoint on pause");
                None
            }
        }
    }
}

/// Run an embedded sub-workflow (Map iterator, Parallel branch) to completion, sharing
/// the parent's registry/approval/alerts and budget accountant but never a pause
/// capture slot — see [`PauseCapture`].
pub async fn run_workflow(workflow: Arc<Workflow>, input: Value, ctx: ExecutionContext, deps: Deps, trace: Trace) -> Result<Value> {
    let config = EngineConfig::default();
    let mut capture = None;
    execute_from(&workflow, &workflow.start_at, input, &ctx, &deps, &trace, &config, &mut capture).await
}

/// The shared interpretation loop (§4.8 step 2): walk states by name until a terminal
/// type ends it or an uncaught error escapes.
async fn execute_from(
    workflow: &Workflow,
    start_state: &str,
    input: Value,
    ctx: &ExecutionContext,
    deps: &Deps,
    trace: &Trace,
    config: &EngineConfig,
    capture: &mut Option<PauseCapture>,
) -> Result<Value> {
    let mut current_name = start_state.to_string();
    let mut document = input;

    loop {
        let state = workflow
            .states
            .get(&current_name)
            .ok_or_else(|| AslError::ValidationError(format!("state '{current_name}' is not defined in this workflow")))?;

        ctx.enter_state(&current_name);
        trace.state_enter(&current_name);

        match state {
            StateDefinition::Succeed(succeed) => {
                let output = path::filter(&document, succeed.io.output_path.as_ref())?;
                trace.state_exit(&current_name);
                return Ok(output);
            }
            StateDefinition::Fail(fail) => {
                let (error, cause) = states::succeed_fail::resolve_fail(fail, &document)?;
                trace.state_error(&current_name, &error, &cause);
                return Err(AslError::Agent { name: error, cause });
            }
            StateDefinition::Choice(choice) => match run_choice(choice, &document, ctx) {
                Ok((next, output)) => {
                    trace.state_exit(&current_name);
                    document = output;
                    current_name = next;
                    continue;
                }
                Err(err) => {
                    trace.state_error(&current_name, err.state_error_name(), &err.cause());
                    return Err(err);
                }
            },
            _ => {}
        }

        match interpret_state(state, &current_name, document.clone(), ctx, deps, trace, config, capture).await {
            Ok(outcome) => {
                trace.state_exit(&current_name);
                document = outcome.document;
                match outcome.next {
                    NextState::Goto(name) => current_name = name,
                    NextState::End => return Ok(document),
                    NextState::Succeed => return Ok(document),
                    NextState::Fail { error, cause } => {
                        trace.state_error(&current_name, &error, &cause);
                        return Err(AslError::Agent { name: error, cause });
                    }
                }
            }
            Err(err) => return Err(err),
        }
    }
}

fn run_choice(choice: &ChoiceState, document: &Value, ctx: &ExecutionContext) -> Result<(String, Value)> {
    let filtered = path::filter(document, choice.io.input_path.as_ref())?;
    let next = states::choice::run(&choice.choices, &choice.default, &filtered, &ctx.to_json())?;
    let output = path::filter(&filtered, choice.io.output_path.as_ref())?;
    Ok((next, output))
}

/// The shared envelope around one state's body (§4.4 steps 1-5), wrapped in the
/// Error & Retry Engine's retry/catch loop (§4.5). Only reached for state types whose
/// transition isn't computed from their own body (everything but Choice/Succeed/Fail,
/// which `execute_from` handles directly).
#[instrument(skip_all, fields(state = %state_name))]
async fn interpret_state(
    state: &StateDefinition,
    state_name: &str,
    input: Value,
    ctx: &ExecutionContext,
    deps: &Deps,
    trace: &Trace,
    config: &EngineConfig,
    capture: &mut Option<PauseCapture>,
) -> Result<StateOutcome> {
    let filtered_input = path::filter(&input, envelope_io(state).input_path.as_ref())?;

    let result_flow = envelope_result_flow(state);
    let params = match result_flow.and_then(|rf| rf.parameters.as_ref()) {
        Some(template) => path::evaluate_template(template, &filtered_input, &ctx.to_json())?,
        None => filtered_input.clone(),
    };

    let error_handling = envelope_error_handling(state);
    let mut retry_state = RetryState::new();

    *capture = Some(PauseCapture { state_name: state_name.to_string(), document: filtered_input.clone() });

    loop {
        match run_body(state, state_name, params.clone(), ctx, deps, trace, config).await {
            Ok(body_output) => {
                *capture = None;
                return finish_success(state, body_output, &filtered_input, ctx);
            }
            // A pause bypasses Retry/Catch entirely (§7 "Pause outcomes"); leave
            // `capture` populated so the top-level driver can snapshot it.
            Err(err) if err.is_pause() => return Err(err),
            Err(err) => {
                let error_name = err.state_error_name().to_string();
                let cause = err.cause();
                trace.state_error(state_name, &error_name, &cause);

                if let Some(error_handling) = error_handling {
                    if let Some((rule_index, rule)) = RetryState::select_rule(&error_handling.retry, &error_name) {
                        let attempt = retry_state.attempts_for(rule_index);
                        if rule.should_retry(attempt) {
                            retry_state.record_attempt(rule_index);
                            ctx.record_retry();
                            let delay = rule.duration_for_attempt(attempt);
                            trace.state_retry(state_name, attempt, delay.as_secs_f64());
                            tokio::time::sleep(delay).await;
                            continue;
                        }
                    }

                    if let Some(catch) = error_handling.catch.iter().find(|c| c.matches(&error_name)) {
                        let record = json!({"Error": error_name, "Cause": cause});
                        let document = merge_at_result_path(&filtered_input, catch.result_path.as_ref(), record)?;
                        *capture = None;
                        return Ok(StateOutcome { document, next: NextState::Goto(catch.next.clone()) });
                    }
                }

                *capture = None;
                return Err(err);
            }
        }
    }
}

/// Dispatch to the type-specific body (§4.4), applying `EngineConfig`'s defaults when
/// the state document itself leaves `TimeoutSeconds`/`MaxConcurrency` unset.
async fn run_body(state: &StateDefinition, state_name: &str, params: Value, ctx: &ExecutionContext, deps: &Deps, trace: &Trace, config: &EngineConfig) -> Result<BodyOutput> {
    match state {
        StateDefinition::Task(task) => {
            let effective = apply_task_defaults(task, config);
            let outcome = states::task::run(&effective, params, &deps.registry).await?;
            ctx.budget().record_state_cost(state_name, outcome.usage.cost, outcome.usage.tokens);
            let charge_outcome = ctx.budget().charge(outcome.usage.cost, outcome.usage.tokens);
            handle_charge_outcome(charge_outcome, deps, trace).await?;
            if ctx.budget().on_exceed() == OnExceed::Fail {
                ctx.budget().exceeded_error()?;
            }
            Ok(BodyOutput::Result(outcome.result))
        }
        StateDefinition::Pass(pass) => Ok(BodyOutput::Result(states::pass::run(pass, params)?)),
        StateDefinition::Wait(wait) => {
            states::wait::run(wait, &params).await?;
            Ok(BodyOutput::PassThrough)
        }
        StateDefinition::Map(map) => {
            let effective = apply_map_defaults(map, config);
            states::map::run(&effective, params, ctx, deps, trace).await.map(BodyOutput::Result)
        }
        StateDefinition::Parallel(parallel) => {
            let effective = apply_parallel_defaults(parallel, config);
            states::parallel::run(&effective, params, ctx, deps, trace).await.map(BodyOutput::Result)
        }
        StateDefinition::Approval(approval) => run_approval_body(approval, state_name, params, ctx, deps).await,
        StateDefinition::Debate(debate) => states::debate::run(debate, params, &deps.registry).await.map(BodyOutput::Result),
        StateDefinition::Checkpoint(checkpoint) => states::checkpoint::run(checkpoint, state_name).map(BodyOutput::Result),
        StateDefinition::Choice(_) | StateDefinition::Succeed(_) | StateDefinition::Fail(_) => {
            unreachable!("Choice/Succeed/Fail never reach the generic envelope")
        }
    }
}

async fn run_approval_body(state: &ApprovalState, state_name: &str, params: Value, ctx: &ExecutionContext, deps: &Deps) -> Result<BodyOutput> {
    let prompt = path::evaluate_template(&state.prompt, &params, &ctx.to_json())?;
    let response = states::approval::run(state, state_name, prompt, &deps.approval).await?;
    let response_doc = states::approval::response_to_value(&response);
    let document = apply_editable_edits(state, response_doc)?;

    match &state.choices {
        Some(choices) => {
            let default = state
                .default
                .as_deref()
                .ok_or_else(|| AslError::ValidationError(format!("Approval '{state_name}' declares Choices but no Default")))?;
            let next = states::choice::run(choices, default, &document, &ctx.to_json())?;
            Ok(BodyOutput::Decided { document, next })
        }
        None => Ok(BodyOutput::Result(document)),
    }
}

/// Write `response.edits` into the approval's own response document at
/// `Editable.ResultPath` (absent path merges the edits in wholesale, per the default
/// `ResultPath` convention). Declared `Editable.Fields` are not enforced as an
/// allow-list here; tightening that is recorded as an open item in DESIGN.md.
fn apply_editable_edits(state: &ApprovalState, response_doc: Value) -> Result<Value> {
    let Some(editable) = &state.editable else { return Ok(response_doc) };
    let Some(edits) = response_doc.get("edits").cloned() else { return Ok(response_doc) };

    match &editable.result_path {
        Some(path_expr) => {
            let path = Path::parse(path_expr)?;
            path::merge(&response_doc, &path, edits)
        }
        None => Ok(edits),
    }
}

async fn handle_charge_outcome(outcome: ChargeOutcome, deps: &Deps, trace: &Trace) -> Result<()> {
    match outcome {
        ChargeOutcome::Ok => Ok(()),
        ChargeOutcome::AlertCrossed { notify } => {
            let message = format!("budget alert threshold crossed; notify {notify:?}");
            deps.alerts.on_alert("warning", &message).await;
            trace.budget_warning(&message);
            Ok(())
        }
        ChargeOutcome::FallbackEngaged { use_model, action } => {
            trace.budget_warning(&format!("fallback cascade engaged: model={use_model:?} action={action:?}"));
            Ok(())
        }
        ChargeOutcome::ExceededContinue => {
            trace.budget_warning("budget exceeded; continuing per OnExceed policy");
            Ok(())
        }
        ChargeOutcome::ExceededPause => Err(AslError::Paused("budget exceeded; OnExceed: PauseAndNotify".to_string())),
    }
}

fn apply_task_defaults(task: &TaskState, config: &EngineConfig) -> TaskState {
    match (task.timeout_seconds, config.default_timeout_seconds) {
        (None, Some(default)) => TaskState { timeout_seconds: Some(default), ..task.clone() },
        _ => task.clone(),
    }
}

/// §4.4.6: `MaxConcurrency` absent defaults to 1 (sequential), unless `EngineConfig`
/// overrides the engine-wide default.
fn apply_map_defaults(map: &MapState, config: &EngineConfig) -> MapState {
    if map.max_concurrency.is_some() {
        return map.clone();
    }
    MapState { max_concurrency: Some(config.default_max_concurrency.unwrap_or(1)), ..map.clone() }
}

/// §4.4.7: `MaxConcurrency` absent defaults to the branch count, computed by
/// `states::parallel::run` itself; only override it here when `EngineConfig` declares
/// its own ceiling.
fn apply_parallel_defaults(parallel: &ParallelState, config: &EngineConfig) -> ParallelState {
    match (parallel.max_concurrency, config.default_max_concurrency) {
        (None, Some(default)) => ParallelState { max_concurrency: Some(default), ..parallel.clone() },
        _ => parallel.clone(),
    }
}

fn envelope_io(state: &StateDefinition) -> &IoPaths {
    match state {
        StateDefinition::Task(s) => &s.io,
        StateDefinition::Map(s) => &s.io,
        StateDefinition::Parallel(s) => &s.io,
        StateDefinition::Pass(s) => &s.io,
        StateDefinition::Wait(s) => &s.io,
        StateDefinition::Approval(s) => &s.io,
        StateDefinition::Debate(s) => &s.io,
        StateDefinition::Checkpoint(s) => &s.io,
        StateDefinition::Succeed(s) => &s.io,
        StateDefinition::Choice(s) => &s.io,
        StateDefinition::Fail(_) => unreachable!("Fail has no IoPaths and never reaches the generic envelope"),
    }
}

fn envelope_result_flow(state: &StateDefinition) -> Option<&ResultFlow> {
    match state {
        StateDefinition::Task(s) => Some(&s.result_flow),
        StateDefinition::Map(s) => Some(&s.result_flow),
        StateDefinition::Parallel(s) => Some(&s.result_flow),
        StateDefinition::Pass(s) => Some(&s.result_flow),
        StateDefinition::Approval(s) => Some(&s.result_flow),
        StateDefinition::Debate(s) => Some(&s.result_flow),
        _ => None,
    }
}

fn envelope_error_handling(state: &StateDefinition) -> Option<&ErrorHandling> {
    match state {
        StateDefinition::Task(s) => Some(&s.error_handling),
        StateDefinition::Map(s) => Some(&s.error_handling),
        StateDefinition::Parallel(s) => Some(&s.error_handling),
        StateDefinition::Approval(s) => Some(&s.error_handling),
        StateDefinition::Debate(s) => Some(&s.error_handling),
        _ => None,
    }
}

fn resolve_next(state: &StateDefinition) -> NextState {
    let transition = state.transition().expect("resolve_next called on a state without a Transition");
    match &transition.next {
        Some(name) => NextState::Goto(name.clone()),
        None => NextState::End,
    }
}

fn finish_success(state: &StateDefinition, body_output: BodyOutput, filtered_input: &Value, ctx: &ExecutionContext) -> Result<StateOutcome> {
    match body_output {
        BodyOutput::PassThrough => {
            let output = path::filter(filtered_input, envelope_io(state).output_path.as_ref())?;
            Ok(StateOutcome { document: output, next: resolve_next(state) })
        }
        BodyOutput::Result(result) => {
            let output = apply_result_flow(state, filtered_input, result, ctx)?;
            Ok(StateOutcome { document: output, next: resolve_next(state) })
        }
        BodyOutput::Decided { document, next } => {
            let output = apply_result_flow(state, filtered_input, document, ctx)?;
            Ok(StateOutcome { document: output, next: NextState::Goto(next) })
        }
    }
}

/// `ResultSelector` → `ResultPath` → `OutputPath` (§4.4 steps 4-5), shared by every
/// body that produces a result document.
fn apply_result_flow(state: &StateDefinition, filtered_input: &Value, result: Value, ctx: &ExecutionContext) -> Result<Value> {
    let result_flow = envelope_result_flow(state);

    let selected = match result_flow.and_then(|rf| rf.result_selector.as_ref()) {
        Some(template) => path::evaluate_template(template, &result, &ctx.to_json())?,
        None => result,
    };

    let merged = merge_at_result_path(filtered_input, result_flow.and_then(|rf| rf.result_path.as_ref()), selected)?;
    path::filter(&merged, envelope_io(state).output_path.as_ref())
}

/// `ResultPath` merge semantics (§3, AWS States Language convention this spec
/// mirrors): absent means `"$"` (the result replaces the whole document); an explicit
/// JSON `null` discards the result, keeping `base_document` unchanged; a string merges
/// at that path. Shared by the normal result-flow `ResultPath` and `Catch.ResultPath`.
fn merge_at_result_path(base_document: &Value, result_path: Option<&Value>, value: Value) -> Result<Value> {
    match result_path {
        None => Ok(value),
        Some(Value::Null) => Ok(base_document.clone()),
        Some(Value::String(expr)) => {
            let path = Path::parse(expr)?;
            path::merge(base_document, &path, value)
        }
        Some(other) => Err(AslError::ValidationError(format!("ResultPath must be a string or null, got {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::RetryRule;
    use crate::workflow::{CatchRule, PassState, TaskState, Transition};
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::HashMap as Map;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Greeter;

    #[async_trait]
    impl crate::agent::Agent for Greeter {
        fn name(&self) -> &str {
            "Greeter"
        }

        async fn execute(&self, input: Value) -> Result<Value> {
            let name = input["name"].as_str().unwrap_or("stranger");
            Ok(json!({"greeting": format!("Hello, {name}!")}))
        }
    }

    fn hello_world_workflow() -> Workflow {
        let mut states = Map::new();
        states.insert(
            "SayHello".to_string(),
            StateDefinition::Task(TaskState {
                io: IoPaths::default(),
                result_flow: ResultFlow { parameters: Some(json!({"name.$": "$.userName"})), ..Default::default() },
                transition: Transition { next: None, end: Some(true) },
                error_handling: ErrorHandling::default(),
                agent: "Greeter".to_string(),
                timeout_seconds: None,
                heartbeat_seconds: None,
            }),
        );
        Workflow { start_at: "SayHello".to_string(), states, version: None, comment: None, budget: None, imports: None }
    }

    #[tokio::test]
    async fn hello_world_task_produces_expected_greeting() {
        let registry = AgentRegistry::new().with_agent(Arc::new(Greeter));
        let engine = Engine::new(hello_world_workflow(), registry);

        let result = engine.run(json!({"userName": "Alice"})).await;

        assert!(result.success);
        assert_eq!(result.output, Some(json!({"greeting": "Hello, Alice!"})));
        assert!(result.trace.iter().any(|e| e["event"] == "workflow_complete"));
    }

    struct FlakyThenSucceeds {
        calls: AtomicU32,
    }

    #[async_trait]
    impl crate::agent::Agent for FlakyThenSucceeds {
        fn name(&self) -> &str {
            "Flaky"
        }

        async fn execute(&self, _input: Value) -> Result<Value> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call < 3 {
                Err(AslError::Agent { name: "TransientError".to_string(), cause: format!("attempt {call} failed") })
            } else {
                Ok(json!({"success": true}))
            }
        }
    }

    fn flaky_retry_workflow() -> Workflow {
        let mut states = Map::new();
        states.insert(
            "CallFlaky".to_string(),
            StateDefinition::Task(TaskState {
                io: IoPaths::default(),
                result_flow: ResultFlow::default(),
                transition: Transition { next: None, end: Some(true) },
                error_handling: ErrorHandling {
                    retry: vec![RetryRule::new(vec!["TransientError".to_string()], 5).with_interval_seconds(0.0)],
                    catch: vec![],
                },
                agent: "Flaky".to_string(),
                timeout_seconds: None,
                heartbeat_seconds: None,
            }),
        );
        Workflow { start_at: "CallFlaky".to_string(), states, version: None, comment: None, budget: None, imports: None }
    }

    #[tokio::test]
    async fn retry_exhausts_transient_failures_then_succeeds() {
        let agent = Arc::new(FlakyThenSucceeds { calls: AtomicU32::new(0) });
        let registry = AgentRegistry::new().with_agent(Arc::clone(&agent) as Arc<dyn crate::agent::Agent>);
        let engine = Engine::new(flaky_retry_workflow(), registry);

        let result = engine.run(json!({})).await;

        assert!(result.success);
        assert_eq!(agent.calls.load(Ordering::SeqCst), 3);
        let error_events = result.trace.iter().filter(|e| e["event"] == "state_error").count();
        assert_eq!(error_events, 2);
    }

    fn catch_workflow() -> Workflow {
        let mut states = Map::new();
        states.insert(
            "CallFlaky".to_string(),
            StateDefinition::Task(TaskState {
                io: IoPaths::default(),
                result_flow: ResultFlow::default(),
                transition: Transition { next: None, end: Some(true) },
                error_handling: ErrorHandling { retry: vec![], catch: vec![CatchRule { error_equals: vec!["States.ALL".to_string()], next: "Recover".to_string(), result_path: Some(Value::String("$.error".to_string())) }] },
                agent: "AlwaysFails".to_string(),
                timeout_seconds: None,
                heartbeat_seconds: None,
            }),
        );
        states.insert(
            "Recover".to_string(),
            StateDefinition::Pass(PassState { io: IoPaths::default(), result_flow: ResultFlow::default(), transition: Transition { next: None, end: Some(true) }, result: None }),
        );
        Workflow { start_at: "CallFlaky".to_string(), states, version: None, comment: None, budget: None, imports: None }
    }

    struct AlwaysFails;

    #[async_trait]
    impl crate::agent::Agent for AlwaysFails {
        fn name(&self) -> &str {
            "AlwaysFails"
        }

        async fn execute(&self, _input: Value) -> Result<Value> {
            Err(AslError::Agent { name: "PermanentError".to_string(), cause: "nope".to_string() })
        }
    }

    #[tokio::test]
    async fn uncaught_error_is_routed_to_catch_and_transitions_to_recovery() {
        let registry = AgentRegistry::new().with_agent(Arc::new(AlwaysFails));
        let engine = Engine::new(catch_workflow(), registry);

        let result = engine.run(json!({"input": "data"})).await;

        assert!(result.success);
        assert_eq!(result.output.unwrap()["error"]["Error"], json!("PermanentError"));
    }

    fn checkpoint_then_pass_workflow() -> Workflow {
        let mut states = Map::new();
        states.insert(
            "Snapshot".to_string(),
            StateDefinition::Checkpoint(crate::workflow::CheckpointState { io: IoPaths::default(), transition: Transition { next: Some("AfterResume".to_string()), end: None } }),
        );
        states.insert(
            "AfterResume".to_string(),
            StateDefinition::Pass(PassState { io: IoPaths::default(), result_flow: ResultFlow::default(), transition: Transition { next: None, end: Some(true) }, result: Some(json!({"resumed": true})) }),
        );
        Workflow { start_at: "Snapshot".to_string(), states, version: None, comment: None, budget: None, imports: None }
    }

    #[tokio::test]
    async fn checkpoint_state_pauses_and_resume_continues_past_it() {
        let checkpointer: Arc<dyn Checkpointer> = Arc::new(asl_checkpoint::InMemoryCheckpointer::new());
        let engine = Engine::new(checkpoint_then_pass_workflow(), AgentRegistry::new()).with_checkpointer(Arc::clone(&checkpointer));

        let paused = engine.run(json!({"orderId": 42})).await;
        assert!(!paused.success);
        assert!(paused.paused);
        let checkpoint_value = paused.checkpoint.expect("checkpoint captured on pause");
        let execution_id = checkpoint_value["executionId"].as_str().unwrap().to_string();

        let tuple = checkpointer
            .get_tuple(&asl_checkpoint::CheckpointConfig::new(execution_id))
            .await
            .unwrap()
            .expect("checkpoint persisted");
        assert_eq!(tuple.checkpoint.state_name, "Snapshot");

        let resumed = engine.resume(tuple.checkpoint).await;
        assert!(resumed.success);
        assert_eq!(resumed.output, Some(json!({"resumed": true})));
    }

    #[tokio::test]
    async fn validation_failure_never_invokes_an_agent() {
        struct PanicsIfCalled;

        #[async_trait]
        impl crate::agent::Agent for PanicsIfCalled {
            fn name(&self) -> &str {
                "Greeter"
            }

            async fn execute(&self, _input: Value) -> Result<Value> {
                panic!("a workflow that fails validation must never dispatch to an agent");
            }
        }

        let mut workflow = hello_world_workflow();
        workflow.start_at = "NoSuchState".to_string();
        let registry = AgentRegistry::new().with_agent(Arc::new(PanicsIfCalled));
        let engine = Engine::new(workflow, registry);

        let result = engine.run(json!({"userName": "Alice"})).await;

        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("States.ValidationError"));
        assert!(result.trace.is_empty());
    }

    #[test]
    fn merge_at_result_path_default_replaces_whole_document() {
        let merged = merge_at_result_path(&json!({"old": true}), None, json!({"new": true})).unwrap();
        assert_eq!(merged, json!({"new": true}));
    }

    #[test]
    fn merge_at_result_path_null_discards_result() {
        let merged = merge_at_result_path(&json!({"old": true}), Some(&Value::Null), json!({"new": true})).unwrap();
        assert_eq!(merged, json!({"old": true}));
    }

    #[test]
    fn merge_at_result_path_string_merges_at_path() {
        let merged = merge_at_result_path(&json!({"old": true}), Some(&Value::String("$.result".to_string())), json!(42)).unwrap();
        assert_eq!(merged, json!({"old": true, "result": 42}));
    }
}

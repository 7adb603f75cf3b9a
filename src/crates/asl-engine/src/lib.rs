//! # asl-engine - Agent State Language workflow interpreter
//!
//! A Rust interpreter for Agent State Language (ASL), a JSON-based declarative
//! workflow format for orchestrating multi-agent systems. An ASL document describes a
//! state machine: a `StartAt` state, a map of named states, and for each state where it
//! goes next. This crate parses that document and drives it to completion (or pause, or
//! failure), calling out to user-supplied [`Agent`] implementations wherever the
//! document names one.
//!
//! ## Overview
//!
//! `asl-engine` provides:
//!
//! - **Ten cooperating components** (§2 of the design): a path engine, an intrinsic
//!   function evaluator, an agent registry, one interpreter per state type, a
//!   retry/catch engine, a budget accountant, a concurrency coordinator, the workflow
//!   engine that ties the rest together, a static pre-execution validator, and
//!   checkpoint/resume built on [`asl_checkpoint`].
//! - **Nine state types** - Task, Choice, Map, Parallel, Pass, Wait, Succeed, Fail,
//!   Approval, Debate, and Checkpoint, matching [`StateDefinition`]'s tagged variants.
//! - **Deterministic replay** - every execution produces an ordered [`Trace`], and any
//!   suspension point can be captured as a checkpoint and resumed later.
//! - **Cost and token budgets** - a workflow-level [`Budget`] that can fail, pause, or
//!   cascade to a fallback agent once a limit is crossed.
//! - **Human-in-the-loop** - an Approval state escalates through notify/pause/fail
//!   steps via a user-supplied [`ApprovalHandler`].
//!
//! ## Core Concepts
//!
//! ### 1. Workflow - the parsed document
//!
//! [`Workflow`] is the deserialized ASL document: a `StartAt` name, a map of
//! [`StateDefinition`] variants keyed by state name, and an optional top-level
//! [`BudgetLimits`]. It implements `Deserialize` directly off the wire format (§3); there
//! is no separate builder API; callers construct a `Workflow` from JSON and hand it to
//! [`Engine::new`].
//!
//! ### 2. Engine - the top-level driver
//!
//! [`Engine::run`] validates the workflow (§4.9), then walks states from `StartAt`,
//! running each one through the shared envelope (`InputPath` → `Parameters` → body →
//! `ResultSelector` → `ResultPath` → `OutputPath` → transition) with `Retry`/`Catch`
//! wrapped around the body call. [`Engine::resume`] rebuilds an [`ExecutionContext`] from
//! a captured [`asl_checkpoint::Checkpoint`] and re-enters at its saved state.
//!
//! ### 3. Checkpointing & resume
//!
//! A Checkpoint state (or a budget `PauseAndNotify`, or an Approval escalating past its
//! first step) suspends execution and, when an [`asl_checkpoint::Checkpointer`] is
//! registered via [`Engine::with_checkpointer`], persists a [`asl_checkpoint::Checkpoint`]
//! capturing the document, budget spend, retry counters, and trace so far. Resuming a
//! Checkpoint state skips straight past it to its own `Next`/`End`; every other
//! suspendable state re-enters and re-runs its body.
//!
//! ### 4. Human-in-the-loop
//!
//! An Approval state pauses for an externally supplied [`ApprovalHandler`], escalating
//! through notify/pause/fail steps on timeout, and may route on an embedded `Choices`
//! list evaluated against the handler's response rather than the state's own
//! `Next`/`End`.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use asl_engine::{Engine, Workflow, AgentRegistry};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() {
//!     let workflow: Workflow = serde_json::from_value(json!({
//!         "StartAt": "Greet",
//!         "States": {
//!             "Greet": {
//!                 "Type": "Task",
//!                 "Agent": "Greeter",
//!                 "End": true
//!             }
//!         }
//!     })).unwrap();
//!
//!     let registry = AgentRegistry::new(); // .with_agent(Arc::new(MyGreeter))
//!     let engine = Engine::new(workflow, registry);
//!     let result = engine.run(json!({"userName": "Alice"})).await;
//!     println!("success: {}, output: {:?}", result.success, result.output);
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//!                    ┌─────────────────────────────────────┐
//!                    │              Workflow                │
//!                    │   StartAt, States, Budget (§3)       │
//!                    └──────────────┬──────────────────────┘
//!                                   │
//!                                   ▼
//!                    ┌─────────────────────────────────────┐
//!                    │         Engine::run / resume         │
//!                    │  validate → drive → envelope (§4.8)  │
//!                    └──────────────┬──────────────────────┘
//!                                   │
//!          ┌────────────┬───────────┼───────────┬────────────┐
//!          ▼            ▼           ▼           ▼            ▼
//!     ┌─────────┐  ┌──────────┐ ┌────────┐ ┌──────────┐ ┌───────────┐
//!     │  path   │  │intrinsics│ │ states │ │  retry   │ │  budget   │
//!     │ (C1)    │  │  (C2)    │ │ (C4)   │ │  (C5)    │ │  (C6)     │
//!     └─────────┘  └──────────┘ └───┬────┘ └──────────┘ └───────────┘
//!                                   │
//!                        ┌──────────┴───────────┐
//!                        ▼                      ▼
//!                  ┌───────────┐         ┌──────────────┐
//!                  │concurrency│         │    agent     │
//!                  │   (C7)    │         │    (C3)      │
//!                  └───────────┘         └──────────────┘
//!                                   │
//!                                   ▼
//!                        ┌──────────────────────┐
//!                        │   asl_checkpoint      │
//!                        │ Checkpointer (C10)    │
//!                        └──────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! ### Core APIs (start here)
//! - [`workflow`] - [`Workflow`] and the [`StateDefinition`] tagged-variant model
//! - [`engine`] - [`Engine`], [`WorkflowResult`], [`Trace`], [`Deps`]
//! - [`validator`] - static pre-execution checks (§4.9)
//!
//! ### Evaluation primitives
//! - [`path`] - JSONPath-subset selection, merging, and templating (§4.1)
//! - [`intrinsics`] - `States.*` intrinsic functions (§4.2)
//!
//! ### Agents and policy
//! - [`agent`] - the [`Agent`] trait and [`AgentRegistry`] (§4.3)
//! - [`retry`] - `Retry`/`Catch` rules and backoff (§4.5)
//! - [`budget`] - cost/token accounting and `OnExceed` policy (§4.6)
//! - [`concurrency`] - Map/Parallel fan-out helpers (§4.7)
//! - [`handlers`] - [`ApprovalHandler`] and [`AlertNotifier`] traits
//! - [`context`] - [`ExecutionContext`], the per-execution budget/scope handle
//!
//! ### State interpreters
//! - [`states`] - one module per state type (Task, Choice, Map, Parallel, Pass, Wait,
//!   Succeed/Fail, Approval, Debate, Checkpoint); see [`states::BodyOutput`]
//!
//! ### Errors
//! - [`error`] - [`AslError`] and the crate's [`Result`] alias
//!
//! ## Common Patterns
//!
//! ### 1. Task with retry and catch
//!
//! ```json
//! {
//!   "Type": "Task",
//!   "Agent": "Researcher",
//!   "Retry": [{"ErrorEquals": ["States.RateLimitExceeded"], "MaxAttempts": 3, "BackoffRate": 2.0}],
//!   "Catch": [{"ErrorEquals": ["States.ALL"], "Next": "HandleFailure"}],
//!   "Next": "Summarize"
//! }
//! ```
//!
//! ### 2. Budget-aware fan-out
//!
//! ```json
//! {
//!   "Type": "Parallel",
//!   "Branches": [{"StartAt": "A", "States": {"A": {"Type": "Task", "Agent": "X", "End": true}}}],
//!   "Next": "Merge"
//! }
//! ```
//!
//! ### 3. Human approval gate
//!
//! ```json
//! {
//!   "Type": "Approval",
//!   "Prompt": "Approve this action?",
//!   "Escalation": [{"After": "PT60S", "Action": "pause"}],
//!   "Next": "Execute"
//! }
//! ```
//!
//! ### 4. Checkpoint and resume
//!
//! ```rust,ignore
//! let result = engine.run(input).await;
//! if let Some(checkpoint) = result.checkpoint {
//!     // persisted via the registered Checkpointer; later:
//!     let resumed = engine.resume(checkpoint).await;
//! }
//! ```
//!
//! ## Performance Characteristics
//!
//! - **Memory**: the document is cloned at state boundaries where `ResultPath`/
//!   `OutputPath` require it; no copy-on-write sharing across the trace.
//! - **Concurrency**: Map/Parallel children run on tokio tasks bounded by
//!   `MaxConcurrency` (§4.7); a `Semaphore` enforces the cap.
//! - **Checkpointing**: O(document size) serialization cost per suspension, delegated to
//!   [`asl_checkpoint`]'s configurable [`asl_checkpoint::SerializerProtocol`].
//! - **Validation**: O(states + edges) reachability analysis, run once per `run`/`resume`
//!   call before any agent is invoked.
//!
//! ## See Also
//!
//! - [`asl_checkpoint`] - the [`asl_checkpoint::Checkpointer`] trait and its
//!   in-memory implementation

pub mod agent;
pub mod budget;
pub mod concurrency;
pub mod context;
pub mod engine;
pub mod error;
pub mod handlers;
pub mod intrinsics;
pub mod path;
pub mod retry;
pub mod states;
pub mod validator;
pub mod workflow;

pub use agent::{peek_usage, Agent, AgentRegistry, AgentUsage};
pub use budget::{AlertRule, Budget, BudgetLimits, ChargeOutcome, FallbackCascadeRule, OnExceed};
pub use concurrency::{FailureTolerance, FanOutOutcome};
pub use context::{ExecutionContext, MapItem};
pub use engine::{no_approval_handler, run_workflow, Deps, Engine, EngineConfig, StateCost, Trace, WorkflowResult};
pub use error::{AslError, Result};
pub use handlers::{ApprovalHandler, ApprovalResponse, AlertNotifier, TracingAlertNotifier};
pub use intrinsics::evaluate as evaluate_intrinsic;
pub use path::{evaluate_template, select, select_str, Path};
pub use retry::{JitterStrategy, RetryRule, RetryState};
pub use states::{BodyOutput, NextState};
pub use validator::validate;
pub use workflow::{
    AndRule, ApprovalState, CatchRule, ChoiceLeaf, ChoiceRule, ChoiceState, CommunicationSpec,
    CommunicationStyle, ConsensusSpec, CheckpointState, DebateState, EditableSpec, ErrorHandling,
    EscalationStep, FailState, IoPaths, MapState, NotRule, OrRule, ParallelState, PassState,
    ResultFlow, StateDefinition, SucceedState, TaskState, Transition, VisibleHistory, WaitState,
    Workflow,
};

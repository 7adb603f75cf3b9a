//! The State Interpreters (C4, §4.4): one module per state variant, each implementing
//! only the type-specific *body* (§4.4 step 3). The shared envelope around every body
//! — `InputPath` → `Parameters` → body → `ResultSelector` → `ResultPath` → `OutputPath`
//! → transition — lives in [`crate::engine`], which is also where `Retry`/`Catch`
//! wraps the body call (§4.4.11: retries re-invoke the body with the *original* state
//! input, which only the envelope owner can guarantee).

pub mod approval;
pub mod checkpoint;
pub mod choice;
pub mod debate;
pub mod map;
pub mod parallel;
pub mod pass;
pub mod succeed_fail;
pub mod task;
pub mod wait;

use serde_json::Value;

/// What a state's body produced, before the shared `ResultSelector`/`ResultPath`
/// envelope steps run.
#[derive(Debug)]
pub enum BodyOutput {
    /// The body produced a `result` value subject to `ResultSelector`/`ResultPath`
    /// merging (Task, Pass, Map, Parallel, Approval, Debate, Checkpoint).
    Result(Value),
    /// The body has no result concept; the post-body document equals the state input
    /// verbatim (Choice, Wait).
    PassThrough,
    /// The body both produced a result document and already decided the next state
    /// from it (Approval with embedded `Choices`, evaluated against the response
    /// rather than against the state's own `Next`/`End`). The document still runs
    /// through the normal `ResultSelector`/`ResultPath`/`OutputPath` steps; only the
    /// transition is taken from here instead of from the state's own `Transition`.
    Decided { document: Value, next: String },
}

/// Where execution goes after this state. Most variants resolve this from their own
/// `Next`/`End` fields; Choice and Fail compute it from the body's outcome instead.
#[derive(Debug, Clone)]
pub enum NextState {
    Goto(String),
    End,
    Succeed,
    Fail { error: String, cause: String },
}

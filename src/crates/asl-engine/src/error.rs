//! Error types for workflow validation and execution.
//!
//! All fallible operations in this crate return [`Result<T>`], a thin alias over
//! [`AslError`]. Every variant that represents one of the engine-defined error names
//! from the `States.*` hierarchy exposes that exact dotted string through
//! [`AslError::state_error_name`], so `Retry`/`Catch` matching (see `retry.rs`) compares
//! against a single source of truth rather than re-deriving the name from `Display`.
//!
//! # Error Hierarchy
//!
//! ```text
//! AslError
//! ├── Timeout               - States.Timeout
//! ├── TaskFailed            - States.TaskFailed
//! ├── AgentNotFound         - States.AgentNotFound
//! ├── ParameterPathFailure  - States.ParameterPathFailure
//! ├── ResultPathMismatch    - States.ResultPathMismatch
//! ├── IntrinsicFailure      - States.IntrinsicFailure
//! ├── BudgetExceeded        - States.BudgetExceeded
//! ├── Permissions           - States.Permissions
//! ├── ValidationError       - States.ValidationError
//! ├── RateLimitExceeded     - States.RateLimitExceeded
//! ├── Agent                 - agent-defined error name, passed through verbatim
//! ├── Checkpoint            - asl_checkpoint::CheckpointError
//! ├── Serialization         - serde_json::Error
//! ├── Cancelled             - cooperative cancellation of a suspension point
//! └── Paused                - a suspension request (budget PauseAndNotify, Approval
//!                             escalation); not a States.* name, never matched by
//!                             Retry/Catch
//! ```

use thiserror::Error;

/// Result type for all fallible operations in this crate.
pub type Result<T> = std::result::Result<T, AslError>;

/// The unified error type raised by the path engine, intrinsic evaluator, state
/// interpreters, retry/catch machinery, budget accountant, and workflow engine.
#[derive(Error, Debug)]
pub enum AslError {
    /// A state's `TimeoutSeconds` elapsed, a Wait was cancelled by timeout, or an
    /// Approval timed out.
    #[error("States.Timeout: {0}")]
    Timeout(String),

    /// An agent raised without a specific error name.
    #[error("States.TaskFailed: {0}")]
    TaskFailed(String),

    /// `Agent` named by a Task/Debate state has no entry in the registry.
    #[error("States.AgentNotFound: no agent registered under '{0}'")]
    AgentNotFound(String),

    /// A required `.$` path resolved to undefined.
    #[error("States.ParameterPathFailure: {path} did not resolve against the current document")]
    ParameterPathFailure {
        /// The path expression that failed to resolve.
        path: String,
    },

    /// `merge()` was asked to write through a path whose shape does not admit it
    /// (e.g. an array index past the end).
    #[error("States.ResultPathMismatch: cannot write {path} into the current document")]
    ResultPathMismatch {
        /// The `ResultPath` that could not be applied.
        path: String,
    },

    /// Intrinsic parse or evaluation error: unknown function name, arity mismatch, or
    /// a type error within a specific function's contract.
    #[error("States.IntrinsicFailure: {0}")]
    IntrinsicFailure(String),

    /// Budget crossed with `OnExceed: Fail`.
    #[error("States.BudgetExceeded: {0}")]
    BudgetExceeded(String),

    /// A tool/agent call was denied by the declared allow/deny list. Enforcement of
    /// the list itself is external; the core only reports the denial.
    #[error("States.Permissions: {0}")]
    Permissions(String),

    /// The validator rejected the workflow document before execution began.
    #[error("States.ValidationError: {0}")]
    ValidationError(String),

    /// An agent signalled a rate limit; the retry engine applies the matching policy.
    #[error("States.RateLimitExceeded: {0}")]
    RateLimitExceeded(String),

    /// An agent-defined error name (anything not beginning with `States.`), carrying
    /// its cause as supplied by the agent.
    #[error("{name}: {cause}")]
    Agent {
        /// The error name the agent raised.
        name: String,
        /// Human-readable cause.
        cause: String,
    },

    /// Failure persisting or loading a checkpoint.
    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] asl_checkpoint::CheckpointError),

    /// A document or template failed to (de)serialize.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A suspension point (agent call, Wait, Approval, retry backoff, Debate turn) was
    /// cancelled cooperatively, typically because a sibling branch failed first.
    #[error("execution cancelled: {0}")]
    Cancelled(String),

    /// Execution must suspend into a checkpoint rather than fail or continue: a
    /// budget `OnExceed: PauseAndNotify`, or an Approval escalating past its first
    /// notify step. Deliberately excluded from `state_error_name`'s `States.*`
    /// taxonomy (§7) — it is never matched by a `Retry`/`Catch` rule, so the envelope
    /// propagates it unconditionally, the same as [`AslError::Cancelled`].
    #[error("execution paused: {0}")]
    Paused(String),
}

impl AslError {
    /// The exact `States.*` dotted name this error corresponds to, for matching
    /// against `ErrorEquals` lists in Retry/Catch rules. Agent-raised errors return
    /// their own name unchanged; `States.ALL` is never produced here since it is a
    /// sentinel matched against, never raised.
    pub fn state_error_name(&self) -> &str {
        match self {
            AslError::Timeout(_) => "States.Timeout",
            AslError::TaskFailed(_) => "States.TaskFailed",
            AslError::AgentNotFound(_) => "States.AgentNotFound",
            AslError::ParameterPathFailure { .. } => "States.ParameterPathFailure",
            AslError::ResultPathMismatch { .. } => "States.ResultPathMismatch",
            AslError::IntrinsicFailure(_) => "States.IntrinsicFailure",
            AslError::BudgetExceeded(_) => "States.BudgetExceeded",
            AslError::Permissions(_) => "States.Permissions",
            AslError::ValidationError(_) => "States.ValidationError",
            AslError::RateLimitExceeded(_) => "States.RateLimitExceeded",
            AslError::Agent { name, .. } => name,
            AslError::Checkpoint(_) => "States.Checkpoint",
            AslError::Serialization(_) => "States.Serialization",
            AslError::Cancelled(_) => "States.Cancelled",
            AslError::Paused(_) => "States.Paused",
        }
    }

    /// The human-readable cause, independent of the error name — what `Catch`
    /// merges into `Cause` on the error record (§4.5 step 2).
    pub fn cause(&self) -> String {
        match self {
            AslError::Agent { cause, .. } => cause.clone(),
            other => other.to_string(),
        }
    }

    /// Whether this error is a suspension request rather than a raised error: it must
    /// bypass `Retry`/`Catch` entirely and propagate straight to the top of the
    /// execution (§7 "Pause outcomes").
    pub fn is_pause(&self) -> bool {
        matches!(self, AslError::Paused(_))
    }

    pub fn parameter_path_failure(path: impl Into<String>) -> Self {
        AslError::ParameterPathFailure { path: path.into() }
    }

    pub fn result_path_mismatch(path: impl Into<String>) -> Self {
        AslError::ResultPathMismatch { path: path.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_error_name_matches_dotted_table() {
        assert_eq!(AslError::Timeout("x".into()).state_error_name(), "States.Timeout");
        assert_eq!(AslError::AgentNotFound("Greeter".into()).state_error_name(), "States.AgentNotFound");
        assert_eq!(
            AslError::parameter_path_failure("$.missing").state_error_name(),
            "States.ParameterPathFailure"
        );
    }

    #[test]
    fn agent_errors_preserve_their_own_name() {
        let err = AslError::Agent {
            name: "TransientError".to_string(),
            cause: "upstream timed out".to_string(),
        };
        assert_eq!(err.state_error_name(), "TransientError");
        assert_eq!(err.cause(), "upstream timed out");
    }
}

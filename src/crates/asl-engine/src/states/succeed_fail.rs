//! Succeed and Fail bodies (§4.4.5): both terminal, neither has a `Next`.

use crate::error::{AslError, Result};
use crate::path::Path;
use crate::workflow::FailState;
use serde_json::Value;

/// Resolve `Fail`'s `{Error, Cause}`, literal or via `ErrorPath`/`CausePath`.
pub fn resolve_fail(state: &FailState, doc: &Value) -> Result<(String, String)> {
    let error = match (&state.error, &state.error_path) {
        (Some(literal), _) => literal.clone(),
        (None, Some(path_expr)) => resolve_string_path(path_expr, doc)?,
        (None, None) => "States.TaskFailed".to_string(),
    };

    let cause = match (&state.cause, &state.cause_path) {
        (Some(literal), _) => literal.clone(),
        (None, Some(path_expr)) => resolve_string_path(path_expr, doc)?,
        (None, None) => String::new(),
    };

    Ok((error, cause))
}

fn resolve_string_path(path_expr: &str, doc: &Value) -> Result<String> {
    let path = Path::parse(path_expr)?;
    let value = crate::path::select(doc, &path).ok_or_else(|| AslError::parameter_path_failure(path_expr.to_string()))?;
    Ok(match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    })
}

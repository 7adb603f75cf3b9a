//! Pass body (§4.4.2): no agent call. Its `result` is the literal `Result` field, or
//! the already-evaluated `params` if `Result` is absent.

use crate::error::Result;
use crate::workflow::PassState;
use serde_json::Value;

pub fn run(state: &PassState, params: Value) -> Result<Value> {
    Ok(state.result.clone().unwrap_or(params))
}

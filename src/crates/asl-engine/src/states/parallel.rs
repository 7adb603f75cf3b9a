//! Parallel body (§4.4.7): run every branch against the same input document,
//! collecting results in *declaration* order regardless of completion order. Shares
//! the bounded fan-out coordinator with Map (`concurrency::run_bounded`), but never
//! tolerates a failure — the first branch failure always aborts its peers.

use crate::concurrency::{self, FailureTolerance};
use crate::context::ExecutionContext;
use crate::engine::{self, Deps, Trace};
use crate::error::Result;
use crate::workflow::ParallelState;
use serde_json::Value;
use std::sync::Arc;

pub async fn run(state: &ParallelState, params: Value, ctx: &ExecutionContext, deps: &Deps, trace: &Trace) -> Result<Value> {
    let branches: Vec<Arc<crate::workflow::Workflow>> = state.branches.iter().cloned().map(Arc::new).collect();
    let max_concurrency = state.max_concurrency.or(Some(branches.len() as u32));

    let outcome = concurrency::run_bounded(branches.len(), max_concurrency, FailureTolerance::default(), |index| {
        let workflow = Arc::clone(&branches[index]);
        let input = params.clone();
        let child_ctx = ctx.fork_for_branch();
        let deps = deps.clone();
        let trace = trace.clone();

        async move { engine::run_workflow(workflow, input, child_ctx, deps, trace).await }
    })
    .await;

    if let Some(failure) = outcome.failure {
        return Err(failure);
    }

    let results: Vec<Value> = outcome.results.into_iter().map(|r| r.unwrap_or(Value::Null)).collect();
    Ok(Value::Array(results))
}

//! Map body (§4.4.6): run an embedded iterator sub-workflow once per item of
//! `ItemsPath`, sharing budget counters but forking a fresh document and execution
//! context per iteration, and reassembling results in input order.

use crate::concurrency::{self, FailureTolerance};
use crate::context::ExecutionContext;
use crate::engine::{self, Deps, Trace};
use crate::error::{AslError, Result};
use crate::path::{self, Path};
use crate::workflow::MapState;
use serde_json::Value;
use std::sync::Arc;

pub async fn run(state: &MapState, params: Value, ctx: &ExecutionContext, deps: &Deps, trace: &Trace) -> Result<Value> {
    let items_path = Path::parse(&state.items_path)?;
    let items = path::select(&params, &items_path)
        .and_then(Value::as_array)
        .cloned()
        .ok_or_else(|| AslError::ValidationError(format!("ItemsPath '{}' did not resolve to an array", state.items_path)))?;

    let iterator = Arc::new((*state.iterator).clone());
    let tolerance = FailureTolerance { count: state.tolerated_failure_count, percentage: state.tolerated_failure_percentage };

    let outcome = concurrency::run_bounded(items.len(), state.max_concurrency, tolerance, |index| {
        let item = items[index].clone();
        let child_ctx = ctx.fork_for_map_item(index, item.clone());
        let item_selector = state.item_selector.clone();
        let iterator = Arc::clone(&iterator);
        let deps = deps.clone();
        let trace = trace.clone();

        async move {
            let iterator_input = match item_selector {
                Some(template) => path::evaluate_template(&template, &item, &child_ctx.to_json())?,
                None => item,
            };
            engine::run_workflow(iterator, iterator_input, child_ctx, deps, trace).await
        }
    })
    .await;

    if let Some(failure) = outcome.failure {
        return Err(failure);
    }

    let results: Vec<Value> = outcome.results.into_iter().map(|r| r.unwrap_or(Value::Null)).collect();
    Ok(Value::Array(results))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AgentRegistry;
    use crate::budget::{Budget, BudgetLimits};
    use crate::handlers::TracingAlertNotifier;
    use crate::workflow::{ErrorHandling, IoPaths, PassState, ResultFlow, StateDefinition, Transition, Workflow};
    use serde_json::json;
    use std::collections::HashMap;

    fn doubling_map_state(max_concurrency: Option<u32>) -> MapState {
        let mut states = HashMap::new();
        states.insert(
            "Double".to_string(),
            StateDefinition::Pass(PassState {
                io: IoPaths::default(),
                result_flow: ResultFlow { parameters: Some(json!({"doubled.$": "States.MathMultiply($$.Map.Item.Value, 2)"})), ..Default::default() },
                transition: Transition { next: None, end: Some(true) },
                result: None,
            }),
        );
        let iterator = Workflow { start_at: "Double".to_string(), states, version: None, comment: None, budget: None, imports: None };

        MapState {
            io: IoPaths::default(),
            result_flow: ResultFlow::default(),
            transition: Transition { next: None, end: Some(true) },
            error_handling: ErrorHandling::default(),
            items_path: "$.items".to_string(),
            max_concurrency,
            item_selector: None,
            iterator: Box::new(iterator),
            tolerated_failure_count: None,
            tolerated_failure_percentage: None,
        }
    }

    fn test_deps() -> Deps {
        Deps { registry: Arc::new(AgentRegistry::new()), approval: engine::no_approval_handler(), alerts: Arc::new(TracingAlertNotifier) }
    }

    #[tokio::test]
    async fn map_over_items_doubles_each_with_ordering_preserved() {
        let state = doubling_map_state(Some(1));
        let ctx = ExecutionContext::new("exec-1".to_string(), Arc::new(Budget::new(BudgetLimits::default())));
        let deps = test_deps();
        let trace = Trace::new();

        let output = run(&state, json!({"items": [1, 2, 3]}), &ctx, &deps, &trace).await.unwrap();
        assert_eq!(output, json!([{"doubled": 2.0}, {"doubled": 4.0}, {"doubled": 6.0}]));
    }

    #[tokio::test]
    async fn map_requires_items_path_to_resolve_to_an_array() {
        let state = doubling_map_state(None);
        let ctx = ExecutionContext::new("exec-1".to_string(), Arc::new(Budget::new(BudgetLimits::default())));
        let deps = test_deps();
        let trace = Trace::new();

        let err = run(&state, json!({"items": "not an array"}), &ctx, &deps, &trace).await.unwrap_err();
        assert!(matches!(err, AslError::ValidationError(_)));
    }
}

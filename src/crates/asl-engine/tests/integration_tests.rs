//! End-to-end workflow scenarios exercised only through the crate's public API: a
//! workflow document parsed from JSON, an `AgentRegistry`, and `Engine::run`/`resume`.
//! Each test below mirrors one of the specification's concrete scenarios.

use asl_engine::{Agent, AgentRegistry, Engine, EngineConfig, Result, Workflow};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

struct Greeter;

#[async_trait]
impl Agent for Greeter {
    fn name(&self) -> &str {
        "Greeter"
    }

    async fn execute(&self, input: Value) -> Result<Value> {
        let name = input["name"].as_str().unwrap_or("stranger");
        Ok(json!({"greeting": format!("Hello, {name}!")}))
    }
}

#[tokio::test]
async fn hello_world_task_greets_by_name() {
    let workflow: Workflow = serde_json::from_value(json!({
        "StartAt": "SayHello",
        "States": {
            "SayHello": {
                "Type": "Task",
                "Agent": "Greeter",
                "Parameters": {"name.$": "$.userName"},
                "End": true
            }
        }
    }))
    .unwrap();

    let registry = AgentRegistry::new().with_agent(Arc::new(Greeter));
    let engine = Engine::new(workflow, registry);
    let result = engine.run(json!({"userName": "Alice"})).await;

    assert!(result.success);
    assert_eq!(result.output, Some(json!({"greeting": "Hello, Alice!"})));
}

#[tokio::test]
async fn choice_routes_on_numeric_thresholds() {
    let workflow: Workflow = serde_json::from_value(json!({
        "StartAt": "Route",
        "States": {
            "Route": {
                "Type": "Choice",
                "Choices": [
                    {"Variable": "$.value", "NumericGreaterThan": 100, "Next": "HighValue"},
                    {"Variable": "$.value", "NumericLessThan": 50, "Next": "LowValue"}
                ],
                "Default": "MediumValue"
            },
            "HighValue": {"Type": "Pass", "Result": {"category": "high"}, "End": true},
            "LowValue": {"Type": "Pass", "Result": {"category": "low"}, "End": true},
            "MediumValue": {"Type": "Pass", "Result": {"category": "medium"}, "End": true}
        }
    }))
    .unwrap();

    for (value, expected) in [(150, "high"), (25, "low"), (75, "medium")] {
        let engine = Engine::new(workflow.clone(), AgentRegistry::new());
        let result = engine.run(json!({"value": value})).await;
        assert!(result.success);
        assert_eq!(result.output, Some(json!({"category": expected})));
    }
}

#[tokio::test]
async fn parallel_branches_preserve_declaration_order() {
    let workflow: Workflow = serde_json::from_value(json!({
        "StartAt": "Fan",
        "States": {
            "Fan": {
                "Type": "Parallel",
                "Branches": [
                    {"StartAt": "A", "States": {"A": {"Type": "Pass", "Result": {"branch": 1}, "End": true}}},
                    {"StartAt": "B", "States": {"B": {"Type": "Pass", "Result": {"branch": 2}, "End": true}}},
                    {"StartAt": "C", "States": {"C": {"Type": "Pass", "Result": {"branch": 3}, "End": true}}}
                ],
                "End": true
            }
        }
    }))
    .unwrap();

    let engine = Engine::new(workflow, AgentRegistry::new());
    let result = engine.run(json!({})).await;

    assert!(result.success);
    assert_eq!(result.output, Some(json!([{"branch": 1}, {"branch": 2}, {"branch": 3}])));
}

struct FlakyThenSucceeds {
    calls: AtomicU32,
}

#[async_trait]
impl Agent for FlakyThenSucceeds {
    fn name(&self) -> &str {
        "Flaky"
    }

    async fn execute(&self, _input: Value) -> Result<Value> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call < 3 {
            Err(asl_engine::AslError::Agent { name: "TransientError".to_string(), cause: format!("attempt {call}") })
        } else {
            Ok(json!({"success": true}))
        }
    }
}

#[tokio::test]
async fn retry_exhausts_transient_errors_then_succeeds() {
    let workflow: Workflow = serde_json::from_value(json!({
        "StartAt": "CallFlaky",
        "States": {
            "CallFlaky": {
                "Type": "Task",
                "Agent": "Flaky",
                "Retry": [{"ErrorEquals": ["TransientError"], "MaxAttempts": 5, "IntervalSeconds": 0, "BackoffRate": 2.0}],
                "End": true
            }
        }
    }))
    .unwrap();

    let agent = Arc::new(FlakyThenSucceeds { calls: AtomicU32::new(0) });
    let registry = AgentRegistry::new().with_agent(agent.clone());
    let engine = Engine::new(workflow, registry);
    let result = engine.run(json!({})).await;

    assert!(result.success);
    assert_eq!(result.output, Some(json!({"success": true})));
    assert_eq!(agent.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn budget_exceeded_stops_before_the_third_task() {
    let counter = Arc::new(AtomicU32::new(0));

    struct CountingSpender {
        cost: f64,
        tokens: u64,
        calls: Arc<AtomicU32>,
    }

    #[async_trait]
    impl Agent for CountingSpender {
        fn name(&self) -> &str {
            "Spender"
        }

        async fn execute(&self, _input: Value) -> Result<Value> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(json!({"_cost": self.cost, "_tokens": self.tokens}))
        }
    }

    let workflow: Workflow = serde_json::from_value(json!({
        "StartAt": "First",
        "Budget": {"MaxCost": 1.0, "OnExceed": "Fail"},
        "States": {
            "First": {"Type": "Task", "Agent": "Spender", "Next": "Second"},
            "Second": {"Type": "Task", "Agent": "Spender", "Next": "Third"},
            "Third": {"Type": "Task", "Agent": "Spender", "End": true}
        }
    }))
    .unwrap();

    let registry =
        AgentRegistry::new().with_agent(Arc::new(CountingSpender { cost: 0.50, tokens: 1000, calls: counter.clone() }));
    let engine = Engine::new(workflow, registry);
    let result = engine.run(json!({})).await;

    assert!(!result.success);
    assert_eq!(result.error.as_deref(), Some("States.BudgetExceeded"));
    assert_eq!(counter.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn map_doubles_each_item_with_bounded_concurrency() {
    let workflow: Workflow = serde_json::from_value(json!({
        "StartAt": "DoubleAll",
        "States": {
            "DoubleAll": {
                "Type": "Map",
                "ItemsPath": "$.items",
                "MaxConcurrency": 1,
                "Iterator": {
                    "StartAt": "Double",
                    "States": {
                        "Double": {
                            "Type": "Pass",
                            "Parameters": {"doubled.$": "States.MathMultiply($$.Map.Item.Value, 2)"},
                            "End": true
                        }
                    }
                },
                "End": true
            }
        }
    }))
    .unwrap();

    let engine = Engine::new(workflow, AgentRegistry::new());
    let result = engine.run(json!({"items": [1, 2, 3]})).await;

    assert!(result.success);
    assert_eq!(result.output, Some(json!([{"doubled": 2.0}, {"doubled": 4.0}, {"doubled": 6.0}])));
}

#[tokio::test]
async fn intrinsic_chain_formats_and_counts() {
    let workflow: Workflow = serde_json::from_value(json!({
        "StartAt": "Describe",
        "States": {
            "Describe": {
                "Type": "Pass",
                "Parameters": {
                    "greeting.$": "States.Format('Hello, {}!', $.name)",
                    "count.$": "States.ArrayLength($.items)"
                },
                "End": true
            }
        }
    }))
    .unwrap();

    let engine = Engine::new(workflow, AgentRegistry::new());
    let result = engine.run(json!({"name": "World", "items": [1, 2, 3, 4, 5]})).await;

    assert!(result.success);
    let output = result.output.unwrap();
    assert_eq!(output["greeting"], json!("Hello, World!"));
    assert_eq!(output["count"], json!(5));
}

#[tokio::test]
async fn engine_config_caps_default_map_concurrency() {
    let workflow: Workflow = serde_json::from_value(json!({
        "StartAt": "Iterate",
        "States": {
            "Iterate": {
                "Type": "Map",
                "ItemsPath": "$.items",
                "Iterator": {
                    "StartAt": "Identity",
                    "States": {"Identity": {"Type": "Pass", "End": true}}
                },
                "End": true
            }
        }
    }))
    .unwrap();

    let engine = Engine::new(workflow, AgentRegistry::new()).with_config(EngineConfig::new().with_default_max_concurrency(2));
    let result = engine.run(json!({"items": [1, 2, 3, 4]})).await;

    assert!(result.success);
    assert_eq!(result.output, Some(json!([1, 2, 3, 4])));
}

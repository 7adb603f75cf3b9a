//! Approval body (§4.4.8): publish a rendered prompt to the registered
//! [`crate::handlers::ApprovalHandler`] and await its response.
//!
//! Escalation and the hard `Timeout` race against the handler's response. A reasonable
//! reading of §4.4.8 and §7's "Pause outcomes" is that crossing an `Escalation` step
//! notifies the escalation channel and suspends the execution into a checkpoint
//! (`AslError::Paused`) rather than failing outright, while exhausting the hard
//! `Timeout` with no response at all — escalated or not — raises `States.Timeout`,
//! subject to the state's own `Retry`/`Catch` like any other error.

use crate::error::{AslError, Result};
use crate::handlers::{ApprovalHandler, ApprovalResponse};
use crate::workflow::ApprovalState;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;

#[instrument(skip(state, prompt, handler), fields(options = ?state.options))]
pub async fn run(state: &ApprovalState, state_name: &str, prompt: Value, handler: &Arc<dyn ApprovalHandler>) -> Result<ApprovalResponse> {
    let response_fut = handler.on_approval(state_name, prompt, &state.options);

    if let Some(first) = state.escalation.first() {
        let escalate_after = Duration::from_secs_f64(first.after_seconds.max(0.0));
        tokio::select! {
            biased;
            resolved = response_fut => resolved,
            _ = tokio::time::sleep(escalate_after) => {
                handler.on_escalation(state_name, &first.notify).await?;
                Err(AslError::Paused(format!("approval '{state_name}' escalated to {:?}; awaiting response", first.notify)))
            }
        }
    } else if let Some(timeout_secs) = state.timeout_seconds {
        match tokio::time::timeout(Duration::from_secs_f64(timeout_secs.max(0.0)), response_fut).await {
            Ok(resolved) => resolved,
            Err(_elapsed) => Err(AslError::Timeout(format!("approval '{state_name}' exceeded {timeout_secs}s"))),
        }
    } else {
        response_fut.await
    }
}

/// The response as a document, the shape Approval's result-flow merges (§4.4.8:
/// `{approval, comment?, edits?}`).
pub fn response_to_value(response: &ApprovalResponse) -> Value {
    let mut obj = serde_json::Map::new();
    obj.insert("approval".to_string(), Value::String(response.approval.clone()));
    if let Some(comment) = &response.comment {
        obj.insert("comment".to_string(), Value::String(comment.clone()));
    }
    if let Some(edits) = &response.edits {
        obj.insert("edits".to_string(), edits.clone());
    }
    Value::Object(obj)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::{EscalationStep, ErrorHandling, IoPaths, ResultFlow, Transition};
    use async_trait::async_trait;

    struct ImmediateApproval(&'static str);

    #[async_trait]
    impl ApprovalHandler for ImmediateApproval {
        async fn on_approval(&self, _state_name: &str, _prompt: Value, _options: &[String]) -> Result<ApprovalResponse> {
            Ok(ApprovalResponse { approval: self.0.to_string(), comment: None, edits: None })
        }
    }

    struct NeverResponds;

    #[async_trait]
    impl ApprovalHandler for NeverResponds {
        async fn on_approval(&self, _state_name: &str, _prompt: Value, _options: &[String]) -> Result<ApprovalResponse> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            unreachable!("approval handler should have been cancelled by the race")
        }
    }

    fn approval_state(timeout_seconds: Option<f64>, escalation: Vec<EscalationStep>) -> ApprovalState {
        ApprovalState {
            io: IoPaths::default(),
            result_flow: ResultFlow::default(),
            transition: Transition { next: None, end: Some(true) },
            error_handling: ErrorHandling::default(),
            prompt: Value::String("approve?".to_string()),
            options: vec!["approve".to_string(), "reject".to_string()],
            editable: None,
            timeout_seconds,
            escalation,
            choices: None,
            default: None,
        }
    }

    #[tokio::test]
    async fn immediate_response_short_circuits_timeout_and_escalation() {
        let state = approval_state(Some(30.0), vec![]);
        let handler: Arc<dyn ApprovalHandler> = Arc::new(ImmediateApproval("approve"));
        let response = run(&state, "Review", Value::Null, &handler).await.unwrap();
        assert_eq!(response.approval, "approve");
    }

    #[tokio::test(start_paused = true)]
    async fn hard_timeout_with_no_response_raises_states_timeout() {
        let state = approval_state(Some(5.0), vec![]);
        let handler: Arc<dyn ApprovalHandler> = Arc::new(NeverResponds);
        let err = run(&state, "Review", Value::Null, &handler).await.unwrap_err();
        assert!(matches!(err, AslError::Timeout(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn escalation_before_response_pauses_rather_than_fails() {
        let state = approval_state(None, vec![EscalationStep { after_seconds: 5.0, notify: vec!["oncall".to_string()] }]);
        let handler: Arc<dyn ApprovalHandler> = Arc::new(NeverResponds);
        let err = run(&state, "Review", Value::Null, &handler).await.unwrap_err();
        assert!(err.is_pause());
    }

    #[test]
    fn response_to_value_includes_edits_and_comment_when_present() {
        let response = ApprovalResponse {
            approval: "approve".to_string(),
            comment: Some("looks good".to_string()),
            edits: Some(serde_json::json!({"amount": 100})),
        };
        let value = response_to_value(&response);
        assert_eq!(value["approval"], "approve");
        assert_eq!(value["comment"], "looks good");
        assert_eq!(value["edits"]["amount"], 100);
    }
}

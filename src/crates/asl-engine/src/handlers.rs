//! The two external-callback interfaces the engine invokes but does not implement
//! (§6): the Approval handler (human-in-the-loop response channel) and the Alert
//! notifier (Budget Accountant threshold callback). Both are out of scope per §1 —
//! the core only defines and consumes the contract.

use crate::error::Result;
use async_trait::async_trait;
use serde_json::Value;

/// A human (or automation) response to an Approval state's published prompt (§4.4.8,
/// §6 "Approval handler interface").
#[derive(Debug, Clone)]
pub struct ApprovalResponse {
    pub approval: String,
    pub comment: Option<String>,
    pub edits: Option<Value>,
}

/// Registered once per execution; an Approval state awaits this after publishing its
/// rendered prompt.
#[async_trait]
pub trait ApprovalHandler: Send + Sync {
    async fn on_approval(&self, state_name: &str, prompt: Value, options: &[String]) -> Result<ApprovalResponse>;

    /// Invoked for each `Escalation` step before the hard timeout elapses. Default
    /// implementation does nothing further than what `on_approval`'s own timeout
    /// handling already provides.
    async fn on_escalation(&self, _state_name: &str, _notify: &[String]) -> Result<()> {
        Ok(())
    }
}

/// Invoked by the Budget Accountant (§4.6) when an `Alerts.At` threshold is newly
/// crossed.
#[async_trait]
pub trait AlertNotifier: Send + Sync {
    async fn on_alert(&self, level: &str, message: &str);
}

/// The default notifier when no handler is registered: emit a structured `tracing`
/// event rather than silently dropping the alert.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAlertNotifier;

#[async_trait]
impl AlertNotifier for TracingAlertNotifier {
    async fn on_alert(&self, level: &str, message: &str) {
        tracing::warn!(level, message, "budget alert");
    }
}

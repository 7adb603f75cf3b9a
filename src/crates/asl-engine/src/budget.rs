//! The Budget Accountant (C6, §4.6): cumulative cost/token tracking, alert thresholds,
//! fallback-model cascades, and the `OnExceed` policy.
//!
//! Mirrors the workspace's existing execution-context pattern of an `Arc<RwLock<_>>`
//! counter struct (see `context.rs`, grounded in the teacher's `managed.rs`), generalized
//! here to dollars and tokens instead of a step count, plus the threshold-crossing logic
//! §4.6 describes.

use crate::error::{AslError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;
use tracing::warn;

/// What happens when `MaxCost` or `MaxTokens` is exceeded.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub enum OnExceed {
    /// Raise `States.BudgetExceeded` (subject to Catch).
    #[default]
    Fail,
    /// Suspend into a checkpoint rather than failing outright.
    PauseAndNotify,
    /// Log a warning trace entry and keep going.
    Continue,
    /// Keep going, but flip subsequent Tasks to the fallback model.
    UseFallback,
}

/// One step of a `Fallback.Cascade` list: at a given budget percentage, switch to a
/// different model or apply a quality-reduction action.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FallbackCascadeRule {
    /// Percentage of `MaxCost`/`MaxTokens` (0-100) at which this rule engages.
    pub at_percent: f64,
    #[serde(default)]
    pub use_model: Option<String>,
    #[serde(default)]
    pub action: Option<String>,
}

/// One step of an `Alerts` list: notify when cumulative spend crosses a percentage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AlertRule {
    pub at_percent: f64,
    pub notify: Vec<String>,
}

/// The `Budget` record attached at workflow or state scope (§3).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BudgetLimits {
    #[serde(default)]
    pub max_cost: Option<f64>,
    #[serde(default)]
    pub max_tokens: Option<u64>,
    #[serde(default)]
    pub on_exceed: OnExceed,
    #[serde(default)]
    pub fallback_cascade: Vec<FallbackCascadeRule>,
    #[serde(default)]
    pub alerts: Vec<AlertRule>,
}

/// What happened as a result of a `charge()` call, for the engine to act on.
#[derive(Debug, Clone, PartialEq)]
pub enum ChargeOutcome {
    /// Nothing notable crossed.
    Ok,
    /// An alert threshold was newly crossed; these recipients should be notified.
    AlertCrossed { notify: Vec<String> },
    /// A fallback cascade rule was newly crossed; subsequent Tasks should pass
    /// `_model` (or apply the named quality-reduction action).
    FallbackEngaged { use_model: Option<String>, action: Option<String> },
    /// The budget was exceeded and `OnExceed: Continue` applies; proceed, but a
    /// warning trace entry should be recorded.
    ExceededContinue,
    /// The budget was exceeded and `OnExceed: PauseAndNotify` applies; the caller
    /// should suspend into a checkpoint.
    ExceededPause,
}

/// Cumulative cost/token counters for one execution, shared by every Map iteration and
/// Parallel branch spawned from it (§4.6 "Budget counters are global per execution").
#[derive(Debug)]
pub struct Budget {
    limits: BudgetLimits,
    cost: RwLock<f64>,
    tokens: RwLock<u64>,
    alerts_fired: RwLock<Vec<bool>>,
    cascade_fired: RwLock<Vec<bool>>,
    fallback_active: RwLock<Option<FallbackCascadeRule>>,
    per_state: RwLock<HashMap<String, (f64, u64)>>,
}

impl Budget {
    pub fn new(limits: BudgetLimits) -> Self {
        let alerts_fired = vec![false; limits.alerts.len()];
        let cascade_fired = vec![false; limits.fallback_cascade.len()];
        Self {
            limits,
            cost: RwLock::new(0.0),
            tokens: RwLock::new(0),
            alerts_fired: RwLock::new(alerts_fired),
            cascade_fired: RwLock::new(cascade_fired),
            fallback_active: RwLock::new(None),
            per_state: RwLock::new(HashMap::new()),
        }
    }

    pub fn on_exceed(&self) -> OnExceed {
        self.limits.on_exceed
    }

    /// Attribute a charge to a specific state name, for the Result's `costBreakdown`
    /// (§6). Only the Task interpreter calls this (§9 open question 3: non-Task
    /// states never charge).
    pub fn record_state_cost(&self, state_name: &str, cost: f64, tokens: u64) {
        let mut per_state = self.per_state.write().expect("budget per-state lock poisoned");
        let entry = per_state.entry(state_name.to_string()).or_insert((0.0, 0));
        entry.0 += cost;
        entry.1 += tokens;
    }

    pub fn state_breakdown(&self) -> HashMap<String, (f64, u64)> {
        self.per_state.read().expect("budget per-state lock poisoned").clone()
    }

    pub fn current_cost(&self) -> f64 {
        *self.cost.read().expect("budget cost lock poisoned")
    }

    pub fn current_tokens(&self) -> u64 {
        *self.tokens.read().expect("budget tokens lock poisoned")
    }

    /// The fallback model/action currently engaged, if any `Fallback.Cascade` rule has
    /// fired. Task interpreters consult this to set `_model` on outgoing parameters.
    pub fn active_fallback(&self) -> Option<FallbackCascadeRule> {
        self.fallback_active.read().expect("budget fallback lock poisoned").clone()
    }

    fn percent_of_max_cost(&self, cost: f64) -> Option<f64> {
        self.limits.max_cost.filter(|m| *m > 0.0).map(|max| (cost / max) * 100.0)
    }

    fn percent_of_max_tokens(&self, tokens: u64) -> Option<f64> {
        self.limits.max_tokens.filter(|m| *m > 0).map(|max| (tokens as f64 / *max as f64) * 100.0)
    }

    /// Highest of the cost-percentage and token-percentage readings, used to evaluate
    /// `Alerts.At` and `Fallback.Cascade.When: BudgetAtNPercent` thresholds.
    fn current_percent(&self, cost: f64, tokens: u64) -> f64 {
        self.percent_of_max_cost(cost).into_iter().chain(self.percent_of_max_tokens(tokens)).fold(0.0, f64::max)
    }

    /// Apply a Task's `_cost`/`_tokens` charge (§4.6). Returns the outcome the engine
    /// must act on; `exceeded()` with `OnExceed::Fail` is surfaced as an error by the
    /// caller via [`Budget::exceeded_error`] rather than from here, since raising is
    /// the caller's job (retry/catch needs to see it as a normal state error).
    pub fn charge(&self, cost: f64, tokens: u64) -> ChargeOutcome {
        let (new_cost, new_tokens) = {
            let mut cost_guard = self.cost.write().expect("budget cost lock poisoned");
            let mut tokens_guard = self.tokens.write().expect("budget tokens lock poisoned");
            *cost_guard += cost;
            *tokens_guard += tokens;
            (*cost_guard, *tokens_guard)
        };

        let percent = self.current_percent(new_cost, new_tokens);

        if let Some(notify) = self.newly_crossed_alert(percent) {
            return ChargeOutcome::AlertCrossed { notify };
        }

        if let Some((use_model, action)) = self.newly_crossed_cascade(percent) {
            return ChargeOutcome::FallbackEngaged { use_model, action };
        }

        if self.is_exceeded(new_cost, new_tokens) {
            return match self.limits.on_exceed {
                OnExceed::Fail => ChargeOutcome::Ok, // caller raises via exceeded_error()
                OnExceed::PauseAndNotify => ChargeOutcome::ExceededPause,
                OnExceed::Continue => {
                    warn!(cost = new_cost, tokens = new_tokens, "budget exceeded, continuing per OnExceed: Continue");
                    ChargeOutcome::ExceededContinue
                }
                OnExceed::UseFallback => ChargeOutcome::ExceededContinue,
            };
        }

        ChargeOutcome::Ok
    }

    fn newly_crossed_alert(&self, percent: f64) -> Option<Vec<String>> {
        let mut fired = self.alerts_fired.write().expect("budget alerts lock poisoned");
        for (rule, already_fired) in self.limits.alerts.iter().zip(fired.iter_mut()) {
            if !*already_fired && percent >= rule.at_percent {
                *already_fired = true;
                return Some(rule.notify.clone());
            }
        }
        None
    }

    fn newly_crossed_cascade(&self, percent: f64) -> Option<(Option<String>, Option<String>)> {
        let mut fired = self.cascade_fired.write().expect("budget cascade lock poisoned");
        for (rule, already_fired) in self.limits.fallback_cascade.iter().zip(fired.iter_mut()) {
            if !*already_fired && percent >= rule.at_percent {
                *already_fired = true;
                *self.fallback_active.write().expect("budget fallback lock poisoned") = Some(rule.clone());
                return Some((rule.use_model.clone(), rule.action.clone()));
            }
        }
        None
    }

    fn is_exceeded(&self, cost: f64, tokens: u64) -> bool {
        self.limits.max_cost.is_some_and(|max| cost >= max) || self.limits.max_tokens.is_some_and(|max| tokens >= max)
    }

    /// Whether the budget is currently over either limit, for callers that need to
    /// check without charging (e.g. re-checking before the next Task).
    pub fn is_currently_exceeded(&self) -> bool {
        self.is_exceeded(self.current_cost(), self.current_tokens())
    }

    pub fn exceeded_error(&self) -> Result<()> {
        if self.is_currently_exceeded() {
            return Err(AslError::BudgetExceeded(format!(
                "cost={:.2} tokens={} exceeds configured limits",
                self.current_cost(),
                self.current_tokens()
            )));
        }
        Ok(())
    }
}

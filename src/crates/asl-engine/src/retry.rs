//! Retry rules — exponential backoff for Task, Map, Parallel, Approval, and Debate
//! state bodies that raise a typed error matched by `ErrorEquals` (§4.5 step 1).
//!
//! # Backoff formula
//!
//! ```text
//! delay = min(IntervalSeconds × BackoffRate ^ attempt, MaxIntervalSeconds ?? ∞)
//! if JitterStrategy == Full: delay *= uniform(0, 1)
//! ```
//!
//! This is the formula the specification fixes in §4.5; it differs from a plain
//! `±50%` multiplicative jitter in that `Full` jitter can drive the delay all the way
//! down to zero rather than only ever shrinking or growing it by half.
//!
//! # Quick Start
//!
//! ```rust
//! use asl_engine::retry::{JitterStrategy, RetryRule};
//!
//! let rule = RetryRule::new(vec!["States.ALL".to_string()], 3)
//!     .with_interval_seconds(1.0)
//!     .with_backoff_rate(2.0)
//!     .with_max_interval_seconds(30.0)
//!     .with_jitter(JitterStrategy::Full);
//!
//! for attempt in 0..rule.max_attempts {
//!     if !rule.should_retry(attempt) {
//!         break;
//!     }
//!     let delay = rule.delay_for_attempt(attempt);
//!     assert!(delay <= 30.0);
//! }
//! ```

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Whether backoff delay is perturbed by randomness before use.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum JitterStrategy {
    /// No jitter; delay is exactly the computed backoff value.
    #[default]
    None,
    /// Multiply the computed delay by a uniform random value in `[0, 1)`.
    Full,
}

/// A single ordered entry in a state's `Retry` list (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RetryRule {
    /// Error names this rule matches; `States.ALL` matches anything.
    pub error_equals: Vec<String>,
    pub max_attempts: u32,
    pub interval_seconds: f64,
    pub backoff_rate: f64,
    #[serde(default)]
    pub max_interval_seconds: Option<f64>,
    #[serde(default)]
    pub jitter_strategy: JitterStrategy,
}

impl RetryRule {
    pub fn new(error_equals: Vec<String>, max_attempts: u32) -> Self {
        Self {
            error_equals,
            max_attempts,
            interval_seconds: 1.0,
            backoff_rate: 2.0,
            max_interval_seconds: None,
            jitter_strategy: JitterStrategy::None,
        }
    }

    pub fn with_interval_seconds(mut self, interval_seconds: f64) -> Self {
        self.interval_seconds = interval_seconds;
        self
    }

    pub fn with_backoff_rate(mut self, backoff_rate: f64) -> Self {
        self.backoff_rate = backoff_rate;
        self
    }

    pub fn with_max_interval_seconds(mut self, max_interval_seconds: f64) -> Self {
        self.max_interval_seconds = Some(max_interval_seconds);
        self
    }

    pub fn with_jitter(mut self, jitter_strategy: JitterStrategy) -> Self {
        self.jitter_strategy = jitter_strategy;
        self
    }

    /// Whether this rule matches a raised error name (`E` in §4.5).
    pub fn matches(&self, error_name: &str) -> bool {
        self.error_equals.iter().any(|e| e == error_name || e == "States.ALL")
    }

    /// Whether another attempt is permitted after `attempt` prior attempts (0-indexed).
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Delay in seconds before the given (0-indexed) retry attempt, per the formula
    /// documented on this module.
    pub fn delay_for_attempt(&self, attempt: u32) -> f64 {
        let raw = self.interval_seconds * self.backoff_rate.powi(attempt as i32);
        let capped = match self.max_interval_seconds {
            Some(cap) => raw.min(cap),
            None => raw,
        };

        match self.jitter_strategy {
            JitterStrategy::None => capped,
            JitterStrategy::Full => capped * rand::thread_rng().gen_range(0.0..1.0),
        }
    }

    /// [`RetryRule::delay_for_attempt`] as a [`Duration`], clamped at zero.
    pub fn duration_for_attempt(&self, attempt: u32) -> Duration {
        Duration::from_secs_f64(self.delay_for_attempt(attempt).max(0.0))
    }
}

/// Per-state retry bookkeeping: which rule is active (by index into the state's
/// `Retry` list) and how many attempts have been consumed against it.
#[derive(Debug, Clone, Default)]
pub struct RetryState {
    pub attempts_by_rule: Vec<u32>,
}

impl RetryState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Select the first rule matching `error_name`, returning its index.
    pub fn select_rule<'a>(rules: &'a [RetryRule], error_name: &str) -> Option<(usize, &'a RetryRule)> {
        rules.iter().enumerate().find(|(_, rule)| rule.matches(error_name))
    }

    pub fn attempts_for(&self, rule_index: usize) -> u32 {
        self.attempts_by_rule.get(rule_index).copied().unwrap_or(0)
    }

    pub fn record_attempt(&mut self, rule_index: usize) {
        if self.attempts_by_rule.len() <= rule_index {
            self.attempts_by_rule.resize(rule_index + 1, 0);
        }
        self.attempts_by_rule[rule_index] += 1;
    }

    pub fn reset(&mut self) {
        self.attempts_by_rule.clear();
    }
}

//! The Concurrency Coordinator (C7, §4.7): bounded fan-out for Map iterations and
//! Parallel branches, sharing one ordering/cancellation/tolerance policy between both.
//!
//! Fan-out is a `tokio::task::JoinSet` gated by a `tokio::sync::Semaphore` permit per
//! in-flight sub-execution, the same primitive pairing the design notes call out for
//! `MaxConcurrency`. Results are reassembled in *input* order regardless of completion
//! order (§5 ordering guarantee (b)); on the first failure that exceeds tolerance, the
//! coordinator aborts the remaining `JoinSet` tasks and awaits their completion before
//! returning, so no sub-execution is left running once the caller observes the error.

use crate::error::{AslError, Result};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// `ToleratedFailureCount`/`ToleratedFailurePercentage` (§4.4.6). Per the decision in
/// DESIGN.md (§9 open question), exceeding *either* threshold aborts the Map.
#[derive(Debug, Clone, Copy, Default)]
pub struct FailureTolerance {
    pub count: Option<u32>,
    pub percentage: Option<f64>,
}

impl FailureTolerance {
    /// Whether `failures` out of `total` sub-executions is still within tolerance.
    /// Parallel never tolerates failures, so its tolerance is always the default,
    /// under which a single failure (the first) always exceeds it.
    pub fn is_within(&self, failures: u32, total: usize) -> bool {
        if let Some(max_count) = self.count {
            if failures > max_count {
                return false;
            }
        } else if failures > 0 {
            return false;
        }

        if let Some(max_percent) = self.percentage {
            let percent = if total == 0 { 0.0 } else { (failures as f64 / total as f64) * 100.0 };
            if percent > max_percent {
                return false;
            }
        }

        true
    }
}

/// The result of running a bounded fan-out: per-slot results (in input order, `None`
/// where a tolerated failure produced a sentinel), and the first failure to exceed
/// tolerance, if any.
pub struct FanOutOutcome<T> {
    pub results: Vec<Option<T>>,
    pub failure: Option<AslError>,
}

/// Run `total` independent sub-executions (produced by `make_task`) with at most
/// `max_concurrency` in flight at once, collecting results in input order. Stops
/// spawning new work and cancels in-flight work once `tolerance` is exceeded.
pub async fn run_bounded<F, Fut, T>(total: usize, max_concurrency: Option<u32>, tolerance: FailureTolerance, make_task: F) -> FanOutOutcome<T>
where
    F: Fn(usize) -> Fut,
    Fut: Future<Output = Result<T>> + Send + 'static,
    T: Send + 'static,
{
    let mut results: Vec<Option<T>> = (0..total).map(|_| None).collect();

    if total == 0 {
        return FanOutOutcome { results, failure: None };
    }

    let permits = max_concurrency.filter(|n| *n > 0).map(|n| n as usize).unwrap_or(total).max(1);
    let semaphore = Arc::new(Semaphore::new(permits));
    let mut join_set: JoinSet<(usize, Result<T>)> = JoinSet::new();
    let mut failures = 0u32;
    let mut first_failure: Option<AslError> = None;
    let mut next_index = 0usize;

    // Prime the pipeline up to `permits` in-flight sub-executions.
    while next_index < total && join_set.len() < permits {
        spawn_one(&mut join_set, &semaphore, next_index, make_task(next_index));
        next_index += 1;
    }

    while let Some(joined) = join_set.join_next().await {
        let (index, outcome) = match joined {
            Ok(pair) => pair,
            Err(join_err) if join_err.is_cancelled() => continue,
            Err(join_err) => (usize::MAX, Err(AslError::Cancelled(join_err.to_string()))),
        };

        match outcome {
            Ok(value) => {
                if index < results.len() {
                    results[index] = Some(value);
                }
            }
            Err(err) => {
                failures += 1;
                if first_failure.is_none() {
                    first_failure = Some(err);
                }
                if !tolerance.is_within(failures, total) {
                    join_set.abort_all();
                    while join_set.join_next().await.is_some() {}
                    break;
                }
            }
        }

        if next_index < total && first_failure.is_none() {
            spawn_one(&mut join_set, &semaphore, next_index, make_task(next_index));
            next_index += 1;
        }
    }

    let failure = if tolerance.is_within(failures, total) { None } else { first_failure };

    FanOutOutcome { results, failure }
}

fn spawn_one<Fut, T>(join_set: &mut JoinSet<(usize, Result<T>)>, semaphore: &Arc<Semaphore>, index: usize, fut: Fut)
where
    Fut: Future<Output = Result<T>> + Send + 'static,
    T: Send + 'static,
{
    let semaphore = Arc::clone(semaphore);
    join_set.spawn(async move {
        let _permit = semaphore.acquire_owned().await.expect("semaphore closed unexpectedly");
        (index, fut.await)
    });
}

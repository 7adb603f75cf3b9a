//! Wait body (§4.4.4): suspend for a fixed or path-resolved duration, or until an
//! absolute timestamp. Negative durations clamp to zero. Output equals input
//! (handled by the shared envelope treating Wait as [`super::BodyOutput::PassThrough`]).

use crate::error::{AslError, Result};
use crate::path::Path;
use crate::workflow::WaitState;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::time::Duration;

fn resolve_seconds(state: &WaitState, doc: &Value) -> Result<f64> {
    if let Some(seconds) = state.seconds {
        return Ok(seconds);
    }
    if let Some(path_expr) = &state.seconds_path {
        let path = Path::parse(path_expr)?;
        let value = crate::path::select(doc, &path).ok_or_else(|| AslError::parameter_path_failure(path_expr.clone()))?;
        return value.as_f64().ok_or_else(|| AslError::ValidationError(format!("{path_expr} did not resolve to a number")));
    }
    if let Some(timestamp) = &state.timestamp {
        return Ok(seconds_until(timestamp)?);
    }
    if let Some(path_expr) = &state.timestamp_path {
        let path = Path::parse(path_expr)?;
        let value = crate::path::select(doc, &path).ok_or_else(|| AslError::parameter_path_failure(path_expr.clone()))?;
        let timestamp = value.as_str().ok_or_else(|| AslError::ValidationError(format!("{path_expr} did not resolve to a timestamp string")))?;
        return seconds_until(timestamp);
    }
    Err(AslError::ValidationError("Wait state has none of Seconds/SecondsPath/Timestamp/TimestampPath".to_string()))
}

fn seconds_until(timestamp: &str) -> Result<f64> {
    let target = DateTime::parse_from_rfc3339(timestamp)
        .map_err(|e| AslError::ValidationError(format!("invalid Timestamp '{timestamp}': {e}")))?
        .with_timezone(&Utc);
    Ok((target - Utc::now()).num_milliseconds() as f64 / 1000.0)
}

/// Run the wait, returning once the duration (clamped at zero) elapses.
pub async fn run(state: &WaitState, doc: &Value) -> Result<()> {
    let seconds = resolve_seconds(state, doc)?.max(0.0);
    tokio::time::sleep(Duration::from_secs_f64(seconds)).await;
    Ok(())
}

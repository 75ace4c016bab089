//! Probe history endpoints

use axum::{
    Json,
    extract::{Path, Query, State},
};
use chrono::{Duration, Utc};
use serde::Deserialize;

use crate::TaskId;
use crate::api::{
    error::{ApiError, ApiResult},
    state::ApiState,
    types::ProbeResultsResponse,
};
use crate::storage::ProbeQuery;

const DEFAULT_RANGE: &str = "24h";

#[derive(Debug, Deserialize)]
pub struct RangeQuery {
    /// Look-back window such as `1h`, `24h` or `7d`
    range: Option<String>,
}

/// Parse a look-back window, `None` if it is not `<n>m`, `<n>h` or `<n>d`
pub fn parse_range(range: &str) -> Option<Duration> {
    let range = range.trim();
    let unit = range.chars().last()?;
    let value: i64 = range[..range.len() - unit.len_utf8()]
        .parse()
        .ok()
        .filter(|v| *v > 0)?;

    match unit {
        'm' => Duration::try_minutes(value),
        'h' => Duration::try_hours(value),
        'd' => Duration::try_days(value),
        _ => None,
    }
}

/// GET /api/v1/tasks/:id/results
///
/// Probe results of one task for charting; an invalid range falls back to 24h
pub async fn get_results(
    State(state): State<ApiState>,
    Path(task_id): Path<TaskId>,
    Query(params): Query<RangeQuery>,
) -> ApiResult<Json<ProbeResultsResponse>> {
    if state.backend.get_task(task_id).await?.is_none() {
        return Err(ApiError::NotFound(format!("task {task_id} not found")));
    }

    let now = Utc::now();
    let requested = params.range.as_deref().and_then(|range| {
        let since = now.checked_sub_signed(parse_range(range)?)?;
        Some((range.to_string(), since))
    });
    let (range, since) =
        requested.unwrap_or_else(|| (DEFAULT_RANGE.to_string(), now - Duration::hours(24)));

    let results = state
        .backend
        .query_probe_results(ProbeQuery { task_id, since })
        .await?;

    Ok(Json(ProbeResultsResponse {
        task_id,
        range,
        count: results.len(),
        results,
    }))
}

//! Host endpoints

use axum::{
    Json,
    extract::{Path, Query, State},
};
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::HostId;
use crate::api::{
    error::{ApiError, ApiResult},
    state::ApiState,
    types::{HostSummary, HostsResponse, SnapshotsResponse, StatusLogsResponse},
};
use crate::storage::QueryRange;

const DEFAULT_PAGE_SIZE: u32 = 20;
const MAX_PAGE_SIZE: u32 = 500;

/// Query parameters for snapshot time range
#[derive(Debug, Deserialize)]
pub struct SnapshotQuery {
    /// Start time (ISO 8601 format, default: 24 hours ago)
    start: Option<DateTime<Utc>>,

    /// End time (ISO 8601 format, default: now)
    end: Option<DateTime<Utc>>,

    /// Max results (default: 1000)
    limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    page: Option<u32>,
    page_size: Option<u32>,
}

/// GET /api/v1/hosts
///
/// All registered hosts with status and monthly traffic
pub async fn list_hosts(State(state): State<ApiState>) -> ApiResult<Json<HostsResponse>> {
    let hosts: Vec<HostSummary> = state
        .backend
        .list_hosts()
        .await?
        .into_iter()
        .map(HostSummary::from)
        .collect();

    Ok(Json(HostsResponse {
        count: hosts.len(),
        hosts,
    }))
}

async fn ensure_host(state: &ApiState, host_id: HostId) -> ApiResult<()> {
    match state.backend.get_host(host_id).await? {
        Some(_) => Ok(()),
        None => Err(ApiError::NotFound(format!("host {host_id} not found"))),
    }
}

/// GET /api/v1/hosts/:id/snapshots
pub async fn get_snapshots(
    State(state): State<ApiState>,
    Path(host_id): Path<HostId>,
    Query(params): Query<SnapshotQuery>,
) -> ApiResult<Json<SnapshotsResponse>> {
    ensure_host(&state, host_id).await?;

    let end = params.end.unwrap_or_else(Utc::now);
    let start = params.start.unwrap_or_else(|| end - Duration::hours(24));
    if start > end {
        return Err(ApiError::InvalidRequest(
            "start must not be after end".to_string(),
        ));
    }

    let snapshots = state
        .backend
        .query_snapshots(QueryRange {
            host_id,
            start,
            end,
            limit: Some(params.limit.unwrap_or(1000)),
        })
        .await?;

    Ok(Json(SnapshotsResponse {
        host_id,
        start: start.to_rfc3339(),
        end: end.to_rfc3339(),
        count: snapshots.len(),
        snapshots,
    }))
}

/// GET /api/v1/hosts/:id/status-logs
pub async fn get_status_logs(
    State(state): State<ApiState>,
    Path(host_id): Path<HostId>,
    Query(params): Query<PageQuery>,
) -> ApiResult<Json<StatusLogsResponse>> {
    ensure_host(&state, host_id).await?;

    let page = params.page.unwrap_or(1).max(1);
    let page_size = params
        .page_size
        .unwrap_or(DEFAULT_PAGE_SIZE)
        .clamp(1, MAX_PAGE_SIZE);

    let logs = state
        .backend
        .query_status_events(host_id, page, page_size)
        .await?;

    Ok(Json(StatusLogsResponse {
        host_id,
        items: logs.items,
        total: logs.total,
        page: logs.page,
        page_size: logs.page_size,
    }))
}

/// POST /api/v1/hosts/:id/monitor/stop
pub async fn stop_monitoring(
    State(state): State<ApiState>,
    Path(host_id): Path<HostId>,
) -> ApiResult<Json<Value>> {
    state.ingestor.stop_monitoring(host_id).await?;

    Ok(Json(json!({
        "host_id": host_id,
        "monitor_enabled": false,
    })))
}

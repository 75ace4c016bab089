//! Agent endpoints, authenticated by the host's monitor secret

use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
};
use serde_json::{Value, json};
use tracing::debug;

use crate::api::{
    error::{ApiError, ApiResult},
    middleware::auth::AgentSecret,
    state::ApiState,
    types::ReportResponse,
};
use crate::{ProbeResult, Pulse, TasksResponse};

/// POST /api/v1/agent/pulse
pub async fn post_pulse(
    State(state): State<ApiState>,
    AgentSecret(secret): AgentSecret,
    body: Result<Json<Pulse>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let Json(pulse) = body.map_err(|e| ApiError::InvalidRequest(e.body_text()))?;

    let receipt = state.ingestor.ingest(pulse, &secret).await?;
    debug!("accepted pulse from host {}", receipt.host_id);

    Ok(Json(json!({
        "status": "ok",
        "host_status": receipt.status,
    })))
}

/// GET /api/v1/agent/tasks
pub async fn get_tasks(
    State(state): State<ApiState>,
    AgentSecret(secret): AgentSecret,
) -> ApiResult<Json<TasksResponse>> {
    let tasks = state.ingestor.tasks_for(&secret).await?;
    Ok(Json(TasksResponse { tasks }))
}

/// POST /api/v1/agent/report
pub async fn post_report(
    State(state): State<ApiState>,
    AgentSecret(secret): AgentSecret,
    body: Result<Json<Vec<ProbeResult>>, JsonRejection>,
) -> ApiResult<Json<ReportResponse>> {
    let Json(results) = body.map_err(|e| ApiError::InvalidRequest(e.body_text()))?;

    let accepted = state.ingestor.record_report(&secret, results).await?;
    Ok(Json(ReportResponse { accepted }))
}

//! System statistics endpoint

use axum::{Json, extract::State};

use crate::api::{error::ApiResult, state::ApiState, types::StatsResponse};

/// GET /api/v1/stats
///
/// Returns live viewer and accountant counts plus storage actor statistics
pub async fn get_stats(State(state): State<ApiState>) -> ApiResult<Json<StatsResponse>> {
    let storage = state.storage.get_stats().await.unwrap_or_default();

    Ok(Json(StatsResponse {
        timestamp: chrono::Utc::now().to_rfc3339(),
        viewers: state.hub.viewer_count().await,
        accountants: state.ingestor.accountant_count().await,
        storage,
    }))
}

//! REST API and WebSocket server of the hub
//!
//! ## Architecture
//!
//! - **Axum** web framework with Tower middleware
//! - **Actor handles** for ingestion, storage statistics and the live hub
//! - **WebSocket** for real-time telemetry streaming
//!
//! ## Endpoints
//!
//! Agent routes, authenticated with the host's monitor secret:
//!
//! - `POST /api/v1/agent/pulse` - Resource pulse
//! - `GET /api/v1/agent/tasks` - Active-check task set
//! - `POST /api/v1/agent/report` - Batch of probe results
//!
//! Viewer routes, behind the optional admin token:
//!
//! - `GET /api/v1/health` - Health check
//! - `GET /api/v1/stats` - System statistics
//! - `GET /api/v1/hosts` - Registered hosts with traffic state
//! - `GET /api/v1/hosts/{id}/snapshots` - Downsampled pulse history
//! - `GET /api/v1/hosts/{id}/status-logs` - Paginated status changes
//! - `POST /api/v1/hosts/{id}/monitor/stop` - Stop monitoring a host
//! - `GET /api/v1/tasks/{id}/results` - Probe history
//! - `WS /api/v1/stream` - Real-time telemetry streaming

pub mod error;
pub mod middleware;
pub mod routes;
pub mod state;
pub mod types;
pub mod websocket;

pub use error::{ApiError, ApiResult};
pub use state::ApiState;
pub use types::{
    HealthResponse, HostSummary, HostsResponse, ProbeResultsResponse, ReportResponse,
    SnapshotsResponse, StatsResponse, StatusLogsResponse,
};

use std::net::SocketAddr;

use axum::{
    Router,
    routing::{get, post},
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::ApiSettings;

/// API server configuration
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Bind address (e.g., "0.0.0.0:8080")
    pub bind_addr: SocketAddr,

    /// Optional token guarding the viewer routes
    pub auth_token: Option<String>,

    /// Enable CORS for dashboards
    pub enable_cors: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            auth_token: None,
            enable_cors: true,
        }
    }
}

impl From<&ApiSettings> for ApiConfig {
    fn from(settings: &ApiSettings) -> Self {
        Self {
            bind_addr: settings.bind_addr,
            auth_token: settings.admin_token.clone().filter(|t| !t.is_empty()),
            enable_cors: settings.enable_cors,
        }
    }
}

/// Build the full router
///
/// Agent routes carry their own credentials, so the admin token only guards
/// the viewer routes.
pub fn router(config: &ApiConfig, state: ApiState) -> Router {
    let agent = Router::new()
        .route("/api/v1/agent/pulse", post(routes::agent::post_pulse))
        .route("/api/v1/agent/tasks", get(routes::agent::get_tasks))
        .route("/api/v1/agent/report", post(routes::agent::post_report));

    let mut viewer = Router::new()
        .route("/api/v1/health", get(routes::health::health_check))
        .route("/api/v1/stats", get(routes::stats::get_stats))
        .route("/api/v1/hosts", get(routes::hosts::list_hosts))
        .route(
            "/api/v1/hosts/:id/snapshots",
            get(routes::hosts::get_snapshots),
        )
        .route(
            "/api/v1/hosts/:id/status-logs",
            get(routes::hosts::get_status_logs),
        )
        .route(
            "/api/v1/hosts/:id/monitor/stop",
            post(routes::hosts::stop_monitoring),
        )
        .route("/api/v1/tasks/:id/results", get(routes::tasks::get_results))
        .route("/api/v1/stream", get(websocket::websocket_handler));

    if let Some(token) = config.auth_token.clone() {
        viewer = viewer.route_layer(axum::middleware::from_fn_with_state(
            token,
            middleware::auth::auth_middleware,
        ));
    }

    let mut app = agent
        .merge(viewer)
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    if config.enable_cors {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
        app = app.layer(cors);
    }

    app
}

/// Spawn the API server
///
/// This starts an Axum HTTP server in a background task.
/// Returns the server's local address.
pub async fn spawn_api_server(config: ApiConfig, state: ApiState) -> anyhow::Result<SocketAddr> {
    info!("starting API server on {}", config.bind_addr);

    let app = router(&config, state);

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    let addr = listener.local_addr()?;

    info!("API server listening on {}", addr);

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!("API server error: {}", e);
        }
    });

    Ok(addr)
}

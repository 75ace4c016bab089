//! HTTP surface of the hub
//!
//! These tests verify that:
//! - Agent routes authenticate with the host's monitor secret
//! - Viewer routes sit behind the admin token (header or query parameter)
//! - Malformed input maps to 400 and unknown resources to 404

use chrono::{Duration, Utc};
use hostpulse::{
    ProbeResult, TasksResponse,
    api::{HealthResponse, HostsResponse, ProbeResultsResponse, StatsResponse, StatusLogsResponse},
    config::HostSettings,
};
use pretty_assertions::assert_eq;
use reqwest::StatusCode;
use serde_json::{Value, json};

use crate::helpers::*;

const ADMIN: &str = "admin-token";

struct Api {
    hub: TestHub,
    base: String,
    client: reqwest::Client,
}

impl Api {
    async fn start(hosts: Vec<hostpulse::storage::HostRegistration>) -> Self {
        let hub = spawn_hub(hosts).await;
        for host_id in [1, 2] {
            if hub.backend.get_host(host_id).await.unwrap().is_some() {
                hub.backend
                    .upsert_tasks(host_id, vec![ping_task(host_id, host_id * 10, 30)])
                    .await
                    .unwrap();
            }
        }
        let addr = spawn_api(&hub, Some(ADMIN)).await;

        Self {
            hub,
            base: format!("http://{addr}"),
            client: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base)
    }

    async fn admin_get(&self, path: &str) -> reqwest::Response {
        self.client
            .get(self.url(path))
            .bearer_auth(ADMIN)
            .send()
            .await
            .unwrap()
    }

    async fn send_pulse(&self, secret: &str, body: Value) -> reqwest::Response {
        self.client
            .post(self.url("/api/v1/agent/pulse"))
            .bearer_auth(secret)
            .json(&body)
            .send()
            .await
            .unwrap()
    }
}

fn pulse_json(host_id: u64, net_rx: u64) -> Value {
    serde_json::to_value(pulse(host_id, net_rx, 0)).unwrap()
}

#[tokio::test]
async fn test_pulse_authentication() {
    let api = Api::start(vec![default_host(1)]).await;

    let ok = api.send_pulse(&secret_of(1), pulse_json(1, 10)).await;
    assert_eq!(ok.status(), StatusCode::OK);
    let body: Value = ok.json().await.unwrap();
    assert_eq!(body, json!({"status": "ok", "host_status": "online"}));

    let wrong_secret = api.send_pulse("guess", pulse_json(1, 10)).await;
    assert_eq!(wrong_secret.status(), StatusCode::FORBIDDEN);

    let unknown_host = api.send_pulse(&secret_of(1), pulse_json(99, 10)).await;
    assert_eq!(unknown_host.status(), StatusCode::NOT_FOUND);

    let anonymous = api
        .client
        .post(api.url("/api/v1/agent/pulse"))
        .json(&pulse_json(1, 10))
        .send()
        .await
        .unwrap();
    assert_eq!(anonymous.status(), StatusCode::UNAUTHORIZED);

    let malformed = api
        .send_pulse(&secret_of(1), json!({"host_id": "one", "cpu": "lots"}))
        .await;
    assert_eq!(malformed.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_agent_task_sync_and_report() {
    let api = Api::start(vec![default_host(1), default_host(2)]).await;
    let secret = secret_of(1);

    api.send_pulse(&secret, pulse_json(1, 10)).await;

    let tasks: TasksResponse = api
        .client
        .get(api.url("/api/v1/agent/tasks"))
        .bearer_auth(&secret)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(tasks.tasks.len(), 1);
    assert_eq!(tasks.tasks[0].id, 10);

    // host 2 never pulsed, so it is not monitored yet
    let unmonitored = api
        .client
        .get(api.url("/api/v1/agent/tasks"))
        .bearer_auth(secret_of(2))
        .send()
        .await
        .unwrap();
    assert_eq!(unmonitored.status(), StatusCode::UNAUTHORIZED);

    let result = |task_id| ProbeResult {
        task_id,
        success: true,
        latency_ms: 12.0,
        packet_loss_pct: 0.0,
        observed_at: Utc::now(),
    };
    let report: Value = api
        .client
        .post(api.url("/api/v1/agent/report"))
        .bearer_auth(&secret)
        .json(&vec![result(10), result(20)])
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(report, json!({"accepted": 1}));

    api.hub.storage.flush().await.unwrap();
    let history: ProbeResultsResponse = api
        .admin_get("/api/v1/tasks/10/results?range=1h")
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(history.range, "1h");
    assert_eq!(history.count, 1);
    assert!(history.results[0].result.success);
}

#[tokio::test]
async fn test_admin_token_guards_viewer_routes() {
    let api = Api::start(vec![default_host(1)]).await;

    let missing = api.client.get(api.url("/api/v1/hosts")).send().await.unwrap();
    assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);

    let wrong = api
        .client
        .get(api.url("/api/v1/hosts"))
        .bearer_auth("nope")
        .send()
        .await
        .unwrap();
    assert_eq!(wrong.status(), StatusCode::FORBIDDEN);

    let header = api.admin_get("/api/v1/hosts").await;
    assert_eq!(header.status(), StatusCode::OK);

    let query = api
        .client
        .get(api.url(&format!("/api/v1/hosts?token={ADMIN}")))
        .send()
        .await
        .unwrap();
    assert_eq!(query.status(), StatusCode::OK);

    let hosts: HostsResponse = query.json().await.unwrap();
    assert_eq!(hosts.count, 1);
    assert_eq!(hosts.hosts[0].name, "host-1");
}

#[tokio::test]
async fn test_health_and_stats() {
    let api = Api::start(vec![default_host(1)]).await;
    api.send_pulse(&secret_of(1), pulse_json(1, 10)).await;

    let health: HealthResponse = api.admin_get("/api/v1/health").await.json().await.unwrap();
    assert_eq!(health.status, "ok");
    assert!(health.storage_healthy);

    let stats: StatsResponse = api.admin_get("/api/v1/stats").await.json().await.unwrap();
    assert_eq!(stats.accountants, 1);
    assert_eq!(stats.viewers, 0);
}

#[tokio::test]
async fn test_hosts_list_traffic_figures() {
    let settings = HostSettings {
        traffic_limit: 1_000_000,
        traffic_used_adjustment: 42,
        ..Default::default()
    };
    let api = Api::start(vec![registration(1, "edge", "s", settings)]).await;

    api.send_pulse("s", pulse_json(1, 1000)).await;
    api.send_pulse("s", pulse_json(1, 3500)).await;
    api.hub.storage.flush().await.unwrap();

    let hosts: HostsResponse = api.admin_get("/api/v1/hosts").await.json().await.unwrap();
    let host = &hosts.hosts[0];
    assert_eq!(host.net_monthly_rx, 2500);
    assert_eq!(host.net_traffic_limit, 1_000_000);
    assert_eq!(host.net_traffic_used_adjustment, 42);
    assert!(host.monitor_enabled);
    assert!(host.last_seen.is_some());
}

#[tokio::test]
async fn test_status_logs_paging() {
    let api = Api::start(vec![default_host(1)]).await;
    let secret = secret_of(1);
    let now = Utc::now();

    // three transitions: online, offline, online
    api.hub
        .ingestor
        .ingest_at(pulse(1, 1, 1), &secret, now - Duration::minutes(10), now.date_naive())
        .await
        .unwrap();
    api.hub.ingestor.sweep_offline(now).await.unwrap();
    api.send_pulse(&secret, pulse_json(1, 2)).await;
    api.hub.storage.flush().await.unwrap();

    let page: StatusLogsResponse = api
        .admin_get("/api/v1/hosts/1/status-logs?page=1&page_size=2")
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(page.total, 3);
    assert_eq!(page.items.len(), 2);
    assert_eq!(page.page_size, 2);

    let last: StatusLogsResponse = api
        .admin_get("/api/v1/hosts/1/status-logs?page=2&page_size=2")
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(last.items.len(), 1);
    assert_eq!(last.page, 2);

    let unknown = api.admin_get("/api/v1/hosts/9/status-logs").await;
    assert_eq!(unknown.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_snapshot_range_validation() {
    let api = Api::start(vec![default_host(1)]).await;
    api.send_pulse(&secret_of(1), pulse_json(1, 10)).await;
    api.hub.storage.flush().await.unwrap();

    let snapshots: Value = api
        .admin_get("/api/v1/hosts/1/snapshots")
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(snapshots["count"], 1);

    let inverted = api
        .admin_get("/api/v1/hosts/1/snapshots?start=2026-01-02T00:00:00Z&end=2026-01-01T00:00:00Z")
        .await;
    assert_eq!(inverted.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_probe_history_range_fallback() {
    let api = Api::start(vec![default_host(1)]).await;

    let fallback: ProbeResultsResponse = api
        .admin_get("/api/v1/tasks/10/results?range=forever")
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(fallback.range, "24h");
    assert_eq!(fallback.count, 0);

    let unknown = api.admin_get("/api/v1/tasks/777/results").await;
    assert_eq!(unknown.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_stop_monitoring_route() {
    let api = Api::start(vec![default_host(1)]).await;
    api.send_pulse(&secret_of(1), pulse_json(1, 10)).await;

    let stopped: Value = api
        .client
        .post(api.url("/api/v1/hosts/1/monitor/stop"))
        .bearer_auth(ADMIN)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(stopped, json!({"host_id": 1, "monitor_enabled": false}));

    let tasks = api
        .client
        .get(api.url("/api/v1/agent/tasks"))
        .bearer_auth(secret_of(1))
        .send()
        .await
        .unwrap();
    assert_eq!(tasks.status(), StatusCode::UNAUTHORIZED);

    let unknown = api
        .client
        .post(api.url("/api/v1/hosts/5/monitor/stop"))
        .bearer_auth(ADMIN)
        .send()
        .await
        .unwrap();
    assert_eq!(unknown.status(), StatusCode::NOT_FOUND);
}

//! Agent side: task sync, probe scheduling and batched reports

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use hostpulse::{
    ProbeKind, ProbeResult, Task, TaskId,
    actors::scheduler::{SchedulerConfig, SchedulerHandle},
    client::HubClient,
    probe::{ProbeExecutor, ProbeOutcome},
};
use serde_json::{Value, json};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Prober that succeeds instantly and remembers which tasks ran
#[derive(Default)]
struct CountingProber {
    runs: Mutex<Vec<TaskId>>,
}

impl CountingProber {
    fn runs_of(&self, task_id: TaskId) -> usize {
        self.runs
            .lock()
            .unwrap()
            .iter()
            .filter(|id| **id == task_id)
            .count()
    }
}

#[async_trait]
impl ProbeExecutor for CountingProber {
    async fn probe(&self, _kind: ProbeKind, _target: &str, _port: Option<u16>) -> ProbeOutcome {
        ProbeOutcome {
            success: true,
            latency_ms: 1.0,
            packet_loss_pct: 0.0,
        }
    }

    async fn run_task(&self, task: &Task) -> ProbeResult {
        self.runs.lock().unwrap().push(task.id);
        self.probe(task.kind, &task.target, task.port)
            .await
            .into_result(task.id)
    }
}

fn tasks_body(tasks: Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({ "tasks": tasks }))
}

fn fast_config() -> SchedulerConfig {
    SchedulerConfig {
        sync_interval: Duration::from_millis(150),
        tick_interval: Duration::from_millis(20),
        flush_interval: Duration::from_secs(60),
        ..Default::default()
    }
}

async fn reported_results(server: &MockServer) -> Vec<ProbeResult> {
    server
        .received_requests()
        .await
        .unwrap()
        .into_iter()
        .filter(|r| r.url.path() == "/api/v1/agent/report")
        .flat_map(|r| serde_json::from_slice::<Vec<ProbeResult>>(&r.body).unwrap())
        .collect()
}

#[tokio::test]
async fn test_removed_task_stops_running() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/v1/agent/tasks"))
        .and(header("authorization", "Bearer agent-secret"))
        .respond_with(tasks_body(json!([
            { "id": 1, "kind": "ping", "target": "192.0.2.1", "frequency": 1 }
        ])))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/agent/tasks"))
        .respond_with(tasks_body(json!([])))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/agent/report"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "accepted": 1 })))
        .mount(&server)
        .await;

    let prober = Arc::new(CountingProber::default());
    let client = HubClient::new(server.uri(), "agent-secret").unwrap();
    let scheduler = SchedulerHandle::spawn(client, prober.clone(), fast_config());

    // long enough for a second run if the task were still scheduled
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(prober.runs_of(1), 1);
    assert!(scheduler.current_tasks().is_empty());

    // the pending result goes out with the final flush
    scheduler.shutdown().await;
    let reported = reported_results(&server).await;
    assert_eq!(reported.len(), 1);
    assert_eq!(reported[0].task_id, 1);
    assert!(reported[0].success);
}

#[tokio::test]
async fn test_failed_sync_keeps_previous_tasks() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/v1/agent/tasks"))
        .respond_with(tasks_body(json!([
            { "id": 7, "kind": "tcping", "target": "192.0.2.7", "port": 443, "frequency": 60 }
        ])))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/agent/tasks"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/agent/report"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let prober = Arc::new(CountingProber::default());
    let client = HubClient::new(server.uri(), "agent-secret").unwrap();
    let scheduler = SchedulerHandle::spawn(client, prober.clone(), fast_config());

    tokio::time::sleep(Duration::from_millis(600)).await;
    let tasks = scheduler.current_tasks();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].port, Some(443));
    assert_eq!(prober.runs_of(7), 1);

    // a rejected report is dropped, shutdown still completes
    scheduler.shutdown().await;
    assert_eq!(reported_results(&server).await.len(), 1);
}

#[cfg(feature = "api")]
mod against_hub {
    use super::*;
    use crate::helpers::*;
    use hostpulse::actors::pulse_reporter::PulseReporterHandle;

    #[tokio::test]
    async fn test_agent_reports_into_hub() {
        let hub = spawn_hub(vec![default_host(1)]).await;
        hub.backend
            .upsert_tasks(1, vec![ping_task(1, 10, 60)])
            .await
            .unwrap();
        let addr = spawn_api(&hub, Some("admin")).await;
        let client = HubClient::new(format!("http://{addr}"), secret_of(1)).unwrap();

        // the first pulse switches monitoring on, which the task sync needs
        let reporter = PulseReporterHandle::spawn(client.clone(), 1, Duration::from_millis(100));
        let mut monitored = false;
        for _ in 0..50 {
            if hub.backend.get_host(1).await.unwrap().unwrap().monitor_enabled {
                monitored = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert!(monitored, "no pulse reached the hub");

        let prober = Arc::new(CountingProber::default());
        let scheduler = SchedulerHandle::spawn(client, prober.clone(), fast_config());
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(prober.runs_of(10), 1);

        scheduler.shutdown().await;
        reporter.shutdown().await;
        hub.storage.flush().await.unwrap();

        let history = hub
            .backend
            .query_probe_results(hostpulse::storage::ProbeQuery {
                task_id: 10,
                since: chrono::Utc::now() - chrono::Duration::hours(1),
            })
            .await
            .unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].host_id, 1);

        let record = hub.backend.get_host(1).await.unwrap().unwrap();
        assert!(record.state.last_pulse_at.is_some());
        assert_eq!(record.agent_version.as_deref(), Some(env!("CARGO_PKG_VERSION")));

        hub.shutdown().await;
    }
}

//! Hub restarts on top of a SQLite database

use std::sync::Arc;

use chrono::{Duration, Utc};
use hostpulse::{
    accounting::HostStatus,
    config::{AccountingConfig, Config},
    storage::{QueryRange, StorageBackend, seed_registry, sqlite::SqliteBackend},
};
use pretty_assertions::assert_eq;
use serde_json::json;
use tempfile::tempdir;

use crate::helpers::*;

fn config(reset_day: u32) -> Config {
    serde_json::from_value(json!({
        "storage": { "backend": "sqlite" },
        "hosts": [
            {
                "id": 1,
                "name": "edge",
                "secret": "s3cret",
                "reset_day": reset_day,
                "traffic_limit": 1000000,
                "tasks": [
                    { "id": 10, "kind": "ping", "target": "192.0.2.1", "frequency": 30 }
                ]
            }
        ]
    }))
    .unwrap()
}

async fn open(path: &std::path::Path, config: &Config) -> Arc<dyn StorageBackend> {
    let backend: Arc<dyn StorageBackend> = Arc::new(SqliteBackend::new(path).await.unwrap());
    seed_registry(backend.as_ref(), config).await.unwrap();
    backend
}

#[tokio::test]
async fn test_traffic_state_survives_restart() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("hostpulse.db");
    let config = config(0);

    let first = spawn_hub_with(open(&db, &config).await, vec![], AccountingConfig::default()).await;
    first.ingestor.ingest(pulse(1, 1000, 100), "s3cret").await.unwrap();
    first.ingestor.ingest(pulse(1, 4000, 600), "s3cret").await.unwrap();
    first.storage.flush().await.unwrap();
    first.shutdown().await;

    // seeding again refreshes the registry but keeps derived state
    let second = spawn_hub_with(open(&db, &config).await, vec![], AccountingConfig::default()).await;
    let record = second.backend.get_host(1).await.unwrap().unwrap();
    assert!(record.monitor_enabled);
    assert_eq!(record.state.monthly_rx, 3000);
    assert_eq!(record.state.monthly_tx, 500);
    assert_eq!(record.state.last_raw_rx, 4000);
    assert_eq!(record.state.status, HostStatus::Online);
    assert_eq!(record.settings.traffic_limit, 1_000_000);

    let receipt = second.ingestor.ingest(pulse(1, 4500, 700), "s3cret").await.unwrap();
    assert_eq!((receipt.monthly_rx, receipt.monthly_tx), (3500, 600));

    let tasks = second.ingestor.tasks_for("s3cret").await.unwrap();
    assert_eq!(tasks.len(), 1);

    second.shutdown().await;
}

#[tokio::test]
async fn test_host_left_online_is_swept_after_restart() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("hostpulse.db");
    let config = config(0);
    let then = Utc::now() - Duration::minutes(30);

    let first = spawn_hub_with(open(&db, &config).await, vec![], AccountingConfig::default()).await;
    first
        .ingestor
        .ingest_at(pulse(1, 10, 10), "s3cret", then, then.date_naive())
        .await
        .unwrap();
    first.storage.flush().await.unwrap();
    first.shutdown().await;

    let second = spawn_hub_with(open(&db, &config).await, vec![], AccountingConfig::default()).await;
    assert_eq!(second.ingestor.accountant_count().await, 0);

    let flipped = second.ingestor.sweep_offline(Utc::now()).await.unwrap();
    assert_eq!(flipped.len(), 1);
    settle().await;
    assert_eq!(second.notifier.titles().await, vec!["Host Offline: edge"]);

    second.storage.flush().await.unwrap();
    let record = second.backend.get_host(1).await.unwrap().unwrap();
    assert_eq!(record.state.status, HostStatus::Offline);

    let events = second.backend.query_status_events(1, 1, 10).await.unwrap();
    assert_eq!(events.total, 2);
    assert_eq!(events.items[0].status, HostStatus::Offline);

    second.shutdown().await;
}

#[tokio::test]
async fn test_snapshots_and_probe_results_are_queryable() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("hostpulse.db");
    let config = config(0);
    let start = Utc::now() - Duration::minutes(10);

    let hub = spawn_hub_with(open(&db, &config).await, vec![], AccountingConfig::default()).await;
    for minute in 0..3 {
        hub.ingestor
            .ingest_at(
                pulse(1, 1000 + minute * 10, 0),
                "s3cret",
                start + Duration::minutes(minute as i64),
                start.date_naive(),
            )
            .await
            .unwrap();
    }

    let result = hostpulse::ProbeResult {
        task_id: 10,
        success: false,
        latency_ms: 0.0,
        packet_loss_pct: 100.0,
        observed_at: Utc::now(),
    };
    assert_eq!(hub.ingestor.record_report("s3cret", vec![result]).await.unwrap(), 1);
    hub.storage.flush().await.unwrap();

    let snapshots = hub
        .backend
        .query_snapshots(QueryRange {
            host_id: 1,
            start: start - Duration::minutes(1),
            end: Utc::now(),
            limit: Some(1000),
        })
        .await
        .unwrap();
    assert_eq!(snapshots.len(), 3);
    assert!(snapshots.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
    assert_eq!(snapshots[2].monthly_rx, 20);

    let results = hub
        .backend
        .query_probe_results(hostpulse::storage::ProbeQuery {
            task_id: 10,
            since: start,
        })
        .await
        .unwrap();
    assert_eq!(results.len(), 1);
    assert!(!results[0].result.success);

    hub.shutdown().await;
}

//! Pulses flowing from ingestion through accounting into storage and viewers

use assert_matches::assert_matches;
use chrono::{Duration, NaiveDate, Utc};
use hostpulse::{
    InterfaceCounters,
    accounting::{HostStatus, HostTrafficState},
    actors::messages::HubEvent,
    config::HostSettings,
    ingest::IngestError,
    storage::QueryRange,
};
use pretty_assertions::assert_eq;

use crate::helpers::*;

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

#[tokio::test]
async fn test_monthly_counters_follow_raw_counters() {
    let hub = spawn_hub(vec![default_host(1)]).await;
    seed_state(
        hub.backend.as_ref(),
        1,
        HostTrafficState {
            monthly_rx: 500,
            last_raw_rx: 1000,
            ..Default::default()
        },
    )
    .await;
    let (_, mut viewer) = hub.hub.connect().await;
    let now = Utc::now();
    let today = date(2026, 3, 10);

    let receipt = hub
        .ingestor
        .ingest_at(pulse(1, 1500, 0), &secret_of(1), now, today)
        .await
        .unwrap();
    assert_eq!(receipt.monthly_rx, 1000);

    // agent restarted, the raw counter starts over
    let receipt = hub
        .ingestor
        .ingest_at(pulse(1, 400, 0), &secret_of(1), now, today)
        .await
        .unwrap();
    assert_eq!(receipt.monthly_rx, 1400);

    let mut seen = Vec::new();
    for _ in 0..2 {
        match viewer.recv().await.unwrap() {
            HubEvent::HostTelemetryUpdated(t) => seen.push(t.net_monthly_rx),
            other => panic!("unexpected event {other:?}"),
        }
    }
    assert_eq!(seen, vec![1000, 1400]);

    hub.storage.flush().await.unwrap();
    let record = hub.backend.get_host(1).await.unwrap().unwrap();
    assert_eq!(record.state.monthly_rx, 1400);
    assert_eq!(record.state.last_raw_rx, 400);
    assert_eq!(record.state.status, HostStatus::Online);

    hub.shutdown().await;
}

#[tokio::test]
async fn test_allow_listed_interfaces_with_fallback() {
    let settings = HostSettings {
        net_interface: "eth0".to_string(),
        ..Default::default()
    };
    let hub = spawn_hub(vec![registration(1, "edge", "s", settings)]).await;
    let now = Utc::now();
    let today = date(2026, 3, 10);

    let with_eth0 = |eth0_rx: u64, total_rx: u64| {
        let mut p = pulse(1, total_rx, 0);
        p.interfaces = vec![
            InterfaceCounters {
                name: "eth0".to_string(),
                rx: eth0_rx,
                tx: 0,
            },
            InterfaceCounters {
                name: "docker0".to_string(),
                rx: total_rx - eth0_rx,
                tx: 0,
            },
        ];
        p
    };

    hub.ingestor.ingest_at(with_eth0(100, 1000), "s", now, today).await.unwrap();
    let receipt = hub
        .ingestor
        .ingest_at(with_eth0(150, 5000), "s", now, today)
        .await
        .unwrap();
    assert_eq!(receipt.monthly_rx, 50);

    // eth0 vanished from the pulse, the totals take over
    let receipt = hub
        .ingestor
        .ingest_at(pulse(1, 5200, 0), "s", now, today)
        .await
        .unwrap();
    assert_eq!(receipt.monthly_rx, 50 + 5200 - 150);

    hub.shutdown().await;
}

#[tokio::test]
async fn test_reset_day_runs_once_per_day() {
    let settings = HostSettings {
        reset_day: 15,
        ..Default::default()
    };
    let hub = spawn_hub(vec![registration(1, "edge", "s", settings)]).await;
    seed_state(
        hub.backend.as_ref(),
        1,
        HostTrafficState {
            monthly_rx: 5000,
            monthly_tx: 7000,
            last_raw_rx: 100,
            last_raw_tx: 100,
            traffic_alerted: true,
            ..Default::default()
        },
    )
    .await;
    let now = Utc::now();

    let receipt = hub
        .ingestor
        .ingest_at(pulse(1, 150, 100), "s", now, date(2026, 3, 15))
        .await
        .unwrap();
    assert_eq!((receipt.monthly_rx, receipt.monthly_tx), (50, 0));

    let receipt = hub
        .ingestor
        .ingest_at(pulse(1, 200, 100), "s", now, date(2026, 3, 15))
        .await
        .unwrap();
    assert_eq!(receipt.monthly_rx, 100);

    let receipt = hub
        .ingestor
        .ingest_at(pulse(1, 300, 100), "s", now, date(2026, 3, 16))
        .await
        .unwrap();
    assert_eq!(receipt.monthly_rx, 200);

    hub.storage.flush().await.unwrap();
    let record = hub.backend.get_host(1).await.unwrap().unwrap();
    assert_eq!(record.state.last_reset_date, Some(date(2026, 3, 15)));
    assert!(!record.state.traffic_alerted);

    hub.shutdown().await;
}

#[tokio::test]
async fn test_reset_day_clamps_to_short_month() {
    let settings = HostSettings {
        reset_day: 31,
        ..Default::default()
    };
    let hub = spawn_hub(vec![registration(1, "edge", "s", settings)]).await;
    seed_state(
        hub.backend.as_ref(),
        1,
        HostTrafficState {
            monthly_rx: 9000,
            last_raw_rx: 10,
            ..Default::default()
        },
    )
    .await;

    let receipt = hub
        .ingestor
        .ingest_at(pulse(1, 20, 0), "s", Utc::now(), date(2026, 2, 28))
        .await
        .unwrap();
    assert_eq!(receipt.monthly_rx, 10);

    hub.shutdown().await;
}

#[tokio::test]
async fn test_hosts_are_accounted_independently() {
    let hosts: Vec<_> = (1..=5).map(default_host).collect();
    let hub = spawn_hub(hosts).await;

    let mut joins = Vec::new();
    for host_id in 1..=5u64 {
        let ingestor = hub.ingestor.clone();
        joins.push(tokio::spawn(async move {
            for i in 1..=20u64 {
                ingestor
                    .ingest(pulse(host_id, i * 1000 * host_id, i), &secret_of(host_id))
                    .await
                    .unwrap();
            }
        }));
    }
    for join in joins {
        join.await.unwrap();
    }

    assert_eq!(hub.ingestor.accountant_count().await, 5);

    hub.storage.flush().await.unwrap();
    for host_id in 1..=5u64 {
        let record = hub.backend.get_host(host_id).await.unwrap().unwrap();
        assert_eq!(record.state.monthly_rx, 19 * 1000 * host_id);
        assert_eq!(record.state.monthly_tx, 19);
    }

    hub.shutdown().await;
}

#[tokio::test]
async fn test_offline_and_back_online() {
    let hub = spawn_hub(vec![default_host(1)]).await;
    let secret = secret_of(1);
    let now = Utc::now();
    let today = now.date_naive();

    hub.ingestor
        .ingest_at(pulse(1, 10, 10), &secret, now - Duration::minutes(10), today)
        .await
        .unwrap();
    settle().await;

    let flipped = hub.ingestor.sweep_offline(now).await.unwrap();
    assert_eq!(flipped.len(), 1);
    assert_eq!(flipped[0].1.to, HostStatus::Offline);
    assert!(hub.ingestor.sweep_offline(now).await.unwrap().is_empty());
    settle().await;

    let receipt = hub
        .ingestor
        .ingest_at(pulse(1, 20, 20), &secret, now + Duration::seconds(1), today)
        .await
        .unwrap();
    assert_eq!(receipt.status, HostStatus::Online);
    settle().await;

    assert_eq!(
        hub.notifier.titles().await,
        vec![
            "Host Back Online: host-1",
            "Host Offline: host-1",
            "Host Back Online: host-1",
        ]
    );

    hub.storage.flush().await.unwrap();
    let page = hub.backend.query_status_events(1, 1, 10).await.unwrap();
    assert_eq!(page.total, 3);
    let statuses: Vec<_> = page.items.iter().map(|e| e.status).collect();
    assert_eq!(
        statuses,
        vec![HostStatus::Online, HostStatus::Offline, HostStatus::Online]
    );

    hub.shutdown().await;
}

#[tokio::test]
async fn test_offline_notifications_can_be_disabled() {
    let settings = HostSettings {
        notify_offline_enabled: false,
        ..Default::default()
    };
    let hub = spawn_hub(vec![registration(1, "quiet", "s", settings)]).await;
    let now = Utc::now();

    hub.ingestor
        .ingest_at(pulse(1, 1, 1), "s", now - Duration::minutes(5), now.date_naive())
        .await
        .unwrap();
    assert_eq!(hub.ingestor.sweep_offline(now).await.unwrap().len(), 1);
    settle().await;

    assert!(hub.notifier.titles().await.is_empty());
    hub.shutdown().await;
}

#[tokio::test]
async fn test_snapshots_are_downsampled() {
    let hub = spawn_hub(vec![default_host(1)]).await;
    let secret = secret_of(1);
    let start = Utc::now() - Duration::minutes(5);
    let today = start.date_naive();

    for offset in [0, 10, 30, 61, 90] {
        hub.ingestor
            .ingest_at(pulse(1, 100, 100), &secret, start + Duration::seconds(offset), today)
            .await
            .unwrap();
    }

    hub.storage.flush().await.unwrap();
    let snapshots = hub
        .backend
        .query_snapshots(QueryRange {
            host_id: 1,
            start: start - Duration::minutes(1),
            end: Utc::now(),
            limit: None,
        })
        .await
        .unwrap();

    assert_eq!(snapshots.len(), 2);
    assert_eq!(snapshots[1].timestamp, start + Duration::seconds(61));

    hub.shutdown().await;
}

#[tokio::test]
async fn test_stop_monitoring_evicts_host() {
    let hub = spawn_hub(vec![default_host(1)]).await;
    let secret = secret_of(1);
    hub.ingestor.ingest(pulse(1, 1, 1), &secret).await.unwrap();

    let (_, mut viewer) = hub.hub.connect().await;
    hub.ingestor.stop_monitoring(1).await.unwrap();

    assert_eq!(
        viewer.recv().await.unwrap(),
        HubEvent::HostRemoved { host_id: 1 }
    );
    assert_matches!(
        hub.ingestor.tasks_for(&secret).await,
        Err(IngestError::Unauthorized)
    );
    assert_matches!(
        hub.ingestor.stop_monitoring(42).await,
        Err(IngestError::NotFound(42))
    );

    // a fresh pulse switches monitoring back on
    hub.ingestor.ingest(pulse(1, 2, 2), &secret).await.unwrap();
    assert!(hub.backend.get_host(1).await.unwrap().unwrap().monitor_enabled);

    hub.shutdown().await;
}

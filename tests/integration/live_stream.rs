//! Live viewers connected through the WebSocket stream

use std::time::Duration;

use hostpulse::{
    actors::messages::HubEvent,
    viewer::{LiveStreamClient, ViewerEvent},
};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::timeout;

use crate::helpers::*;

const TOKEN: &str = "viewer-token";

async fn next_event(events: &mut UnboundedReceiver<ViewerEvent>) -> ViewerEvent {
    timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("timed out waiting for a viewer event")
        .expect("stream client stopped")
}

async fn wait_for_viewers(hub: &TestHub, expected: usize) {
    for _ in 0..100 {
        if hub.hub.viewer_count().await == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("hub never reached {expected} viewers");
}

#[tokio::test]
async fn test_viewer_receives_telemetry_and_removals() {
    let hub = spawn_hub(vec![default_host(1)]).await;
    let addr = spawn_api(&hub, Some(TOKEN)).await;

    let mut events = LiveStreamClient::new(&format!("http://{addr}"), Some(TOKEN)).connect();
    assert_eq!(next_event(&mut events).await, ViewerEvent::Connected);
    wait_for_viewers(&hub, 1).await;

    hub.ingestor.ingest(pulse(1, 100, 200), &secret_of(1)).await.unwrap();
    match next_event(&mut events).await {
        ViewerEvent::Hub(HubEvent::HostTelemetryUpdated(telemetry)) => {
            assert_eq!(telemetry.pulse.host_id, 1);
            assert_eq!(telemetry.name, "host-1");
            assert_eq!(telemetry.pulse.net_tx, 200);
        }
        other => panic!("unexpected event {other:?}"),
    }

    hub.ingestor.stop_monitoring(1).await.unwrap();
    assert_eq!(
        next_event(&mut events).await,
        ViewerEvent::Hub(HubEvent::HostRemoved { host_id: 1 })
    );

    hub.shutdown().await;
}

#[tokio::test]
async fn test_wrong_token_is_refused() {
    let hub = spawn_hub(vec![]).await;
    let addr = spawn_api(&hub, Some(TOKEN)).await;

    let mut events = LiveStreamClient::new(&format!("http://{addr}"), Some("nope")).connect();
    match next_event(&mut events).await {
        ViewerEvent::Disconnected(reason) => assert!(!reason.is_empty()),
        other => panic!("unexpected event {other:?}"),
    }
    assert_eq!(hub.hub.viewer_count().await, 0);

    hub.shutdown().await;
}

#[tokio::test]
async fn test_hub_shutdown_ends_stream() {
    let hub = spawn_hub(vec![]).await;
    let addr = spawn_api(&hub, None).await;

    let mut events = LiveStreamClient::new(&format!("http://{addr}"), None).connect();
    assert_eq!(next_event(&mut events).await, ViewerEvent::Connected);
    wait_for_viewers(&hub, 1).await;

    hub.hub.shutdown().await;
    match next_event(&mut events).await {
        ViewerEvent::Disconnected(_) => {}
        other => panic!("unexpected event {other:?}"),
    }
}

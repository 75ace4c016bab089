//! Shared fixtures for the integration tests

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hostpulse::{
    HostId, ProbeKind, Pulse, Task, TaskId,
    accounting::HostTrafficState,
    actors::{
        hub::{DEFAULT_VIEWER_QUEUE, HubHandle},
        storage::{RetentionPolicy, StorageHandle},
    },
    alerts::{NotificationTarget, Notifier},
    config::{AccountingConfig, HostSettings},
    ingest::PulseIngestor,
    storage::{HostRegistration, HostStateUpdate, MemoryBackend, StorageBackend, TaskRow},
};
use tokio::sync::Mutex;

/// Notifier that only remembers what it was asked to send
#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<(HostId, String, String)>>,
}

impl RecordingNotifier {
    pub async fn titles(&self) -> Vec<String> {
        self.sent
            .lock()
            .await
            .iter()
            .map(|(_, title, _)| title.clone())
            .collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, target: &NotificationTarget, title: &str, message: &str) {
        self.sent
            .lock()
            .await
            .push((target.host_id, title.to_string(), message.to_string()));
    }
}

/// A hub without the HTTP layer
pub struct TestHub {
    pub backend: Arc<dyn StorageBackend>,
    pub storage: StorageHandle,
    pub hub: HubHandle,
    pub notifier: Arc<RecordingNotifier>,
    pub ingestor: Arc<PulseIngestor>,
}

impl TestHub {
    pub async fn shutdown(&self) {
        self.ingestor.shutdown().await;
        self.hub.shutdown().await;
        self.storage.shutdown().await;
    }
}

/// Registered but not yet monitored, the first pulse switches monitoring on
pub fn registration(id: HostId, name: &str, secret: &str, settings: HostSettings) -> HostRegistration {
    HostRegistration {
        id,
        name: name.to_string(),
        secret: secret.to_string(),
        monitor_enabled: false,
        settings,
    }
}

pub fn secret_of(id: HostId) -> String {
    format!("secret-{id}")
}

/// Registration with default settings and the secret from [`secret_of`]
pub fn default_host(id: HostId) -> HostRegistration {
    registration(id, &format!("host-{id}"), &secret_of(id), HostSettings::default())
}

pub fn pulse(host_id: HostId, net_rx: u64, net_tx: u64) -> Pulse {
    Pulse {
        host_id,
        uptime: 3600,
        cpu: 12.5,
        mem_used: 512,
        mem_total: 1024,
        disk_used: 10,
        disk_total: 100,
        net_rx,
        net_tx,
        ..Default::default()
    }
}

pub fn ping_task(host_id: HostId, id: TaskId, frequency: u64) -> TaskRow {
    TaskRow {
        host_id,
        label: None,
        task: Task {
            id,
            kind: ProbeKind::Ping,
            target: "192.0.2.1".to_string(),
            port: None,
            frequency,
        },
    }
}

pub async fn spawn_hub(hosts: Vec<HostRegistration>) -> TestHub {
    spawn_hub_with(Arc::new(MemoryBackend::new()), hosts, AccountingConfig::default()).await
}

pub async fn spawn_hub_with(
    backend: Arc<dyn StorageBackend>,
    hosts: Vec<HostRegistration>,
    policy: AccountingConfig,
) -> TestHub {
    for host in hosts {
        backend.register_host(host).await.unwrap();
    }

    let storage = StorageHandle::spawn(backend.clone(), RetentionPolicy::default());
    let hub = HubHandle::spawn(DEFAULT_VIEWER_QUEUE);
    let notifier = Arc::new(RecordingNotifier::default());
    let ingestor = Arc::new(PulseIngestor::new(
        backend.clone(),
        storage.clone(),
        hub.clone(),
        notifier.clone(),
        policy,
    ));

    TestHub {
        backend,
        storage,
        hub,
        notifier,
        ingestor,
    }
}

/// Overwrite the derived state of a host before any accountant exists
pub async fn seed_state(backend: &dyn StorageBackend, host_id: HostId, state: HostTrafficState) {
    backend
        .update_host_states(vec![HostStateUpdate {
            host_id,
            state,
            agent_version: None,
        }])
        .await
        .unwrap();
}

/// Give detached notification tasks a chance to run
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

#[cfg(feature = "api")]
pub async fn spawn_api(hub: &TestHub, auth_token: Option<&str>) -> std::net::SocketAddr {
    use hostpulse::api::{ApiConfig, ApiState, spawn_api_server};

    let state = ApiState::new(
        hub.backend.clone(),
        hub.storage.clone(),
        hub.hub.clone(),
        hub.ingestor.clone(),
    );
    let config = ApiConfig {
        bind_addr: "127.0.0.1:0".parse().unwrap(),
        auth_token: auth_token.map(str::to_string),
        enable_cors: true,
    };

    spawn_api_server(config, state).await.unwrap()
}

//! In-memory storage backend (no persistence)
//!
//! Useful for tests and for hubs that only care about the live stream.
//! All data is lost on restart.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::debug;

use super::backend::{HealthStatus, StorageBackend};
use super::error::{StorageError, StorageResult};
use super::schema::{
    HostRecord, HostRegistration, HostStateUpdate, ProbeQuery, ProbeResultRow, QueryRange,
    SnapshotRow, StatusEventRow, StatusPage, TaskRow,
};
use crate::{HostId, TaskId};

#[derive(Default)]
struct Inner {
    hosts: BTreeMap<HostId, HostRecord>,
    tasks: BTreeMap<TaskId, TaskRow>,
    probe_results: Vec<ProbeResultRow>,
    snapshots: Vec<SnapshotRow>,
    status_events: Vec<StatusEventRow>,
}

/// In-memory storage backend
#[derive(Default)]
pub struct MemoryBackend {
    inner: RwLock<Inner>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn register_host(&self, host: HostRegistration) -> StorageResult<()> {
        let mut inner = self.inner.write().await;
        match inner.hosts.get_mut(&host.id) {
            Some(existing) => {
                existing.name = host.name;
                existing.secret = host.secret;
                existing.monitor_enabled = existing.monitor_enabled || host.monitor_enabled;
                existing.settings = host.settings;
            }
            None => {
                inner.hosts.insert(host.id, host.into_record());
            }
        }
        Ok(())
    }

    async fn get_host(&self, id: HostId) -> StorageResult<Option<HostRecord>> {
        Ok(self.inner.read().await.hosts.get(&id).cloned())
    }

    async fn find_host_by_secret(&self, secret: &str) -> StorageResult<Option<HostRecord>> {
        let inner = self.inner.read().await;
        Ok(inner.hosts.values().find(|h| h.secret == secret).cloned())
    }

    async fn list_hosts(&self) -> StorageResult<Vec<HostRecord>> {
        Ok(self.inner.read().await.hosts.values().cloned().collect())
    }

    async fn update_host_states(&self, updates: Vec<HostStateUpdate>) -> StorageResult<()> {
        let mut inner = self.inner.write().await;
        for update in updates {
            let host = inner
                .hosts
                .get_mut(&update.host_id)
                .ok_or(StorageError::UnknownHost(update.host_id))?;
            host.state = update.state;
            if update.agent_version.is_some() {
                host.agent_version = update.agent_version;
            }
        }
        Ok(())
    }

    async fn set_monitor_enabled(&self, id: HostId, enabled: bool) -> StorageResult<()> {
        let mut inner = self.inner.write().await;
        let host = inner.hosts.get_mut(&id).ok_or(StorageError::UnknownHost(id))?;
        host.monitor_enabled = enabled;
        Ok(())
    }

    async fn upsert_tasks(&self, host_id: HostId, tasks: Vec<TaskRow>) -> StorageResult<()> {
        let mut inner = self.inner.write().await;
        inner.tasks.retain(|_, t| t.host_id != host_id);
        for task in tasks {
            inner.tasks.insert(task.task.id, task);
        }
        Ok(())
    }

    async fn list_tasks(&self, host_id: HostId) -> StorageResult<Vec<TaskRow>> {
        let inner = self.inner.read().await;
        Ok(inner
            .tasks
            .values()
            .filter(|t| t.host_id == host_id)
            .cloned()
            .collect())
    }

    async fn get_task(&self, id: TaskId) -> StorageResult<Option<TaskRow>> {
        Ok(self.inner.read().await.tasks.get(&id).cloned())
    }

    async fn insert_probe_results(&self, results: Vec<ProbeResultRow>) -> StorageResult<()> {
        self.inner.write().await.probe_results.extend(results);
        Ok(())
    }

    async fn query_probe_results(&self, query: ProbeQuery) -> StorageResult<Vec<ProbeResultRow>> {
        let inner = self.inner.read().await;
        let mut rows: Vec<ProbeResultRow> = inner
            .probe_results
            .iter()
            .filter(|r| r.result.task_id == query.task_id && r.result.observed_at >= query.since)
            .cloned()
            .collect();
        rows.sort_by_key(|r| r.result.observed_at);
        Ok(rows)
    }

    async fn cleanup_probe_results(&self, before: DateTime<Utc>) -> StorageResult<usize> {
        let mut inner = self.inner.write().await;
        let len = inner.probe_results.len();
        inner.probe_results.retain(|r| r.result.observed_at >= before);
        Ok(len - inner.probe_results.len())
    }

    async fn insert_snapshots(&self, snapshots: Vec<SnapshotRow>) -> StorageResult<()> {
        self.inner.write().await.snapshots.extend(snapshots);
        Ok(())
    }

    async fn query_snapshots(&self, query: QueryRange) -> StorageResult<Vec<SnapshotRow>> {
        debug!("querying in-memory snapshots for host {}", query.host_id);

        let inner = self.inner.read().await;
        let mut rows: Vec<SnapshotRow> = inner
            .snapshots
            .iter()
            .filter(|s| {
                s.host_id == query.host_id && s.timestamp >= query.start && s.timestamp <= query.end
            })
            .cloned()
            .collect();
        rows.sort_by_key(|s| s.timestamp);
        rows.truncate(query.limit.unwrap_or(usize::MAX));
        Ok(rows)
    }

    async fn cleanup_snapshots(&self, before: DateTime<Utc>) -> StorageResult<usize> {
        let mut inner = self.inner.write().await;
        let len = inner.snapshots.len();
        inner.snapshots.retain(|s| s.timestamp >= before);
        Ok(len - inner.snapshots.len())
    }

    async fn insert_status_events(&self, events: Vec<StatusEventRow>) -> StorageResult<()> {
        self.inner.write().await.status_events.extend(events);
        Ok(())
    }

    async fn query_status_events(
        &self,
        host_id: HostId,
        page: u32,
        page_size: u32,
    ) -> StorageResult<StatusPage> {
        let inner = self.inner.read().await;
        let mut events: Vec<StatusEventRow> = inner
            .status_events
            .iter()
            .filter(|e| e.host_id == host_id)
            .cloned()
            .collect();
        // stable sort keeps insertion order for equal timestamps, reverse for newest first
        events.sort_by_key(|e| e.timestamp);
        events.reverse();

        let total = events.len() as u64;
        let offset = (page.max(1) as usize - 1) * page_size as usize;
        let items = events
            .into_iter()
            .skip(offset)
            .take(page_size as usize)
            .collect();

        Ok(StatusPage {
            items,
            total,
            page: page.max(1),
            page_size,
        })
    }

    async fn health_check(&self) -> StorageResult<HealthStatus> {
        let inner = self.inner.read().await;
        Ok(HealthStatus {
            healthy: true,
            message: "In-memory storage operational".to_string(),
            metadata: HashMap::from([
                ("backend".to_string(), "memory".to_string()),
                ("hosts".to_string(), inner.hosts.len().to_string()),
            ]),
        })
    }

    async fn get_stats(&self) -> StorageResult<String> {
        let inner = self.inner.read().await;
        Ok(format!(
            "In-Memory: {} hosts, {} snapshots, {} probe results, {} status events",
            inner.hosts.len(),
            inner.snapshots.len(),
            inner.probe_results.len(),
            inner.status_events.len()
        ))
    }

    async fn close(&self) -> StorageResult<()> {
        debug!("closing in-memory backend (no-op)");
        Ok(())
    }
}

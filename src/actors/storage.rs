//! StorageActor - ordered, batched writes to the persistence store
//!
//! ## Batching Strategy
//!
//! Writes are buffered and flushed together:
//! - **Size trigger**: flush once 100 writes are pending
//! - **Time trigger**: flush every second
//!
//! Host-state writes are coalesced per host. Only the latest state of a host
//! matters, so a burst of pulses costs one `UPDATE` per flush.
//!
//! Retention cleanup runs hourly: probe results older than the probe
//! retention window and snapshots older than the snapshot retention window
//! are deleted.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, oneshot};
use tokio::time;
use tracing::{debug, error, info, instrument, trace, warn};

use super::messages::{StorageCommand, StorageStats};
use crate::config::StorageConfig;
use crate::storage::{
    HostStateUpdate, ProbeResultRow, SnapshotRow, StatusEventRow, StorageBackend,
};
use crate::HostId;

/// Batch size trigger - flush after this many pending writes
const BATCH_SIZE_TRIGGER: usize = 100;

/// Batch time trigger - flush after this duration
const BATCH_TIME_TRIGGER: Duration = Duration::from_secs(1);

/// Cleanup interval - run retention cleanup hourly
const CLEANUP_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// How long persisted history is kept
#[derive(Debug, Clone, Copy)]
pub struct RetentionPolicy {
    /// Snapshot retention, `None` keeps snapshots forever
    pub snapshot_days: Option<u32>,
    pub probe_result_hours: u32,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            snapshot_days: Some(30),
            probe_result_hours: 24,
        }
    }
}

impl From<&StorageConfig> for RetentionPolicy {
    fn from(config: &StorageConfig) -> Self {
        match config {
            StorageConfig::None => RetentionPolicy::default(),
            StorageConfig::Sqlite {
                retention_days,
                probe_retention_hours,
                ..
            } => RetentionPolicy {
                snapshot_days: (*retention_days > 0).then_some(*retention_days),
                probe_result_hours: (*probe_retention_hours).max(1),
            },
        }
    }
}

pub struct StorageActor {
    backend: Arc<dyn StorageBackend>,

    /// Latest state per host, waiting to be flushed
    host_states: HashMap<HostId, HostStateUpdate>,

    snapshots: Vec<SnapshotRow>,

    status_events: Vec<StatusEventRow>,

    probe_results: Vec<ProbeResultRow>,

    command_rx: mpsc::Receiver<StorageCommand>,

    retention: RetentionPolicy,

    flush_count: u64,

    failed_flushes: u64,

    last_cleanup_time: Option<chrono::DateTime<Utc>>,

    total_snapshots_deleted: u64,

    total_probe_results_deleted: u64,
}

impl StorageActor {
    pub fn new(
        command_rx: mpsc::Receiver<StorageCommand>,
        backend: Arc<dyn StorageBackend>,
        retention: RetentionPolicy,
    ) -> Self {
        debug!("creating storage actor with retention {retention:?}");

        Self {
            backend,
            host_states: HashMap::new(),
            snapshots: Vec::new(),
            status_events: Vec::new(),
            probe_results: Vec::new(),
            command_rx,
            retention,
            flush_count: 0,
            failed_flushes: 0,
            last_cleanup_time: None,
            total_snapshots_deleted: 0,
            total_probe_results_deleted: 0,
        }
    }

    fn pending(&self) -> usize {
        self.host_states.len()
            + self.snapshots.len()
            + self.status_events.len()
            + self.probe_results.len()
    }

    /// Run the actor's main loop
    #[instrument(skip(self))]
    pub async fn run(mut self) {
        debug!("starting storage actor");

        let mut flush_interval = time::interval(BATCH_TIME_TRIGGER);
        let mut cleanup_interval = time::interval(CLEANUP_INTERVAL);

        loop {
            tokio::select! {
                _ = flush_interval.tick() => {
                    if self.pending() > 0 {
                        trace!("time-based flush triggered ({} writes)", self.pending());
                        self.flush().await;
                    }
                }

                _ = cleanup_interval.tick() => {
                    self.run_cleanup().await;
                }

                cmd = self.command_rx.recv() => {
                    match cmd {
                        Some(StorageCommand::Shutdown) => {
                            debug!("received shutdown command");
                            break;
                        }
                        Some(cmd) => self.handle_command(cmd).await,
                        None => {
                            warn!("command channel closed, shutting down");
                            break;
                        }
                    }
                }
            }
        }

        if self.pending() > 0 {
            debug!("final flush before shutdown ({} writes)", self.pending());
            self.flush().await;
        }

        debug!("closing backend");
        if let Err(e) = self.backend.close().await {
            error!("error closing backend: {}", e);
        }

        debug!("storage actor stopped");
    }

    async fn handle_command(&mut self, cmd: StorageCommand) {
        match cmd {
            StorageCommand::RecordHostState(mut update) => {
                let previous = self.host_states.remove(&update.host_id);
                // a coalesced write must not lose a version change carried by an earlier one
                if update.agent_version.is_none() {
                    update.agent_version = previous.and_then(|p| p.agent_version);
                }
                self.host_states.insert(update.host_id, update);
            }
            StorageCommand::RecordSnapshot(snapshot) => self.snapshots.push(snapshot),
            StorageCommand::RecordStatusEvent(event) => self.status_events.push(event),
            StorageCommand::RecordProbeResults(results) => self.probe_results.extend(results),

            StorageCommand::SetMonitorEnabled {
                host_id,
                enabled,
                respond_to,
            } => {
                let result = self
                    .backend
                    .set_monitor_enabled(host_id, enabled)
                    .await
                    .map_err(Into::into);
                let _ = respond_to.send(result);
            }

            StorageCommand::Flush { respond_to } => {
                debug!("manual flush requested");
                let result = self.flush().await;
                let _ = respond_to.send(result);
            }

            StorageCommand::GetStats { respond_to } => {
                let stats = self.get_stats().await;
                let _ = respond_to.send(stats);
            }

            StorageCommand::Shutdown => {}
        }

        if self.pending() >= BATCH_SIZE_TRIGGER {
            trace!("size-based flush triggered ({} writes)", self.pending());
            self.flush().await;
        }
    }

    /// Write everything pending, in the order state -> events -> snapshots -> probe results
    async fn flush(&mut self) -> anyhow::Result<()> {
        let states: Vec<HostStateUpdate> = self.host_states.drain().map(|(_, u)| u).collect();
        let events = std::mem::take(&mut self.status_events);
        let snapshots = std::mem::take(&mut self.snapshots);
        let results = std::mem::take(&mut self.probe_results);

        let mut first_error = None;

        if let Err(e) = self.backend.update_host_states(states).await {
            error!("failed to flush host states: {}", e);
            first_error.get_or_insert(e);
        }
        if let Err(e) = self.backend.insert_status_events(events).await {
            error!("failed to flush status events: {}", e);
            first_error.get_or_insert(e);
        }
        if let Err(e) = self.backend.insert_snapshots(snapshots).await {
            error!("failed to flush snapshots: {}", e);
            first_error.get_or_insert(e);
        }
        if let Err(e) = self.backend.insert_probe_results(results).await {
            error!("failed to flush probe results: {}", e);
            first_error.get_or_insert(e);
        }

        self.flush_count += 1;
        match first_error {
            None => {
                trace!("flush #{} complete", self.flush_count);
                Ok(())
            }
            Some(e) => {
                self.failed_flushes += 1;
                Err(e.into())
            }
        }
    }

    async fn run_cleanup(&mut self) {
        let now = Utc::now();

        let probe_cutoff = now - chrono::Duration::hours(i64::from(self.retention.probe_result_hours));
        match self.backend.cleanup_probe_results(probe_cutoff).await {
            Ok(deleted) => {
                self.total_probe_results_deleted += deleted as u64;
                if deleted > 0 {
                    info!("retention cleanup: deleted {} old probe results", deleted);
                }
            }
            Err(e) => error!("failed to cleanup old probe results: {}", e),
        }

        if let Some(days) = self.retention.snapshot_days {
            let snapshot_cutoff = now - chrono::Duration::days(i64::from(days));
            match self.backend.cleanup_snapshots(snapshot_cutoff).await {
                Ok(deleted) => {
                    self.total_snapshots_deleted += deleted as u64;
                    if deleted > 0 {
                        info!("retention cleanup: deleted {} old snapshots", deleted);
                    }
                }
                Err(e) => error!("failed to cleanup old snapshots: {}", e),
            }
        }

        self.last_cleanup_time = Some(now);
    }

    async fn get_stats(&self) -> StorageStats {
        let backend = match self.backend.get_stats().await {
            Ok(stats) => stats,
            Err(e) => format!("unavailable: {e}"),
        };

        StorageStats {
            pending_writes: self.pending(),
            flush_count: self.flush_count,
            failed_flushes: self.failed_flushes,
            last_cleanup_time: self.last_cleanup_time,
            total_snapshots_deleted: self.total_snapshots_deleted,
            total_probe_results_deleted: self.total_probe_results_deleted,
            backend,
        }
    }
}

/// Handle for controlling the StorageActor
#[derive(Clone)]
pub struct StorageHandle {
    sender: mpsc::Sender<StorageCommand>,
}

impl StorageHandle {
    pub fn spawn(backend: Arc<dyn StorageBackend>, retention: RetentionPolicy) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(1024);

        let actor = StorageActor::new(cmd_rx, backend, retention);
        tokio::spawn(actor.run());

        Self { sender: cmd_tx }
    }

    async fn send(&self, cmd: StorageCommand) {
        if self.sender.send(cmd).await.is_err() {
            warn!("storage actor is gone, dropping write");
        }
    }

    pub async fn record_host_state(&self, update: HostStateUpdate) {
        self.send(StorageCommand::RecordHostState(update)).await;
    }

    pub async fn record_snapshot(&self, snapshot: SnapshotRow) {
        self.send(StorageCommand::RecordSnapshot(snapshot)).await;
    }

    pub async fn record_status_event(&self, event: StatusEventRow) {
        self.send(StorageCommand::RecordStatusEvent(event)).await;
    }

    pub async fn record_probe_results(&self, results: Vec<ProbeResultRow>) {
        if results.is_empty() {
            return;
        }
        self.send(StorageCommand::RecordProbeResults(results)).await;
    }

    pub async fn set_monitor_enabled(&self, host_id: HostId, enabled: bool) -> anyhow::Result<()> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(StorageCommand::SetMonitorEnabled {
                host_id,
                enabled,
                respond_to: tx,
            })
            .await?;

        rx.await?
    }

    /// Manually flush the write buffer
    pub async fn flush(&self) -> anyhow::Result<()> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(StorageCommand::Flush { respond_to: tx })
            .await?;

        rx.await?
    }

    /// Get storage statistics
    pub async fn get_stats(&self) -> Option<StorageStats> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(StorageCommand::GetStats { respond_to: tx })
            .await
            .ok()?;

        rx.await.ok()
    }

    /// Shutdown the storage actor
    pub async fn shutdown(&self) {
        let _ = self.sender.send(StorageCommand::Shutdown).await;
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

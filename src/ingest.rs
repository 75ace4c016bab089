//! Ingestion of agent traffic: pulses, task syncs and probe reports
//!
//! A pulse is authenticated against the host registry and sequenced through the
//! host's accountant, which also publishes it to the live hub. Notifications go
//! out once the accountant has replied. Nothing after authentication can fail
//! the pulse.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Local, NaiveDate, Utc};
use tracing::{debug, info, instrument, warn};

use crate::accounting::{HostStatus, StatusTransition, offline_threshold};
use crate::actors::accountant::AccountantRegistry;
use crate::actors::hub::HubHandle;
use crate::actors::messages::HostContext;
use crate::actors::storage::StorageHandle;
use crate::alerts::{self, NotificationTarget, Notifier};
use crate::config::AccountingConfig;
use crate::storage::{HostRecord, ProbeResultRow, StorageBackend, StorageError};
use crate::{HostId, ProbeResult, Pulse, Task};

#[derive(Debug)]
pub enum IngestError {
    /// No host with the id the pulse claims
    NotFound(HostId),

    /// The host exists but the secret does not match
    Forbidden(HostId),

    /// No monitored host owns the presented secret
    Unauthorized,

    Storage(StorageError),

    /// An internal actor is gone (the hub is shutting down)
    Unavailable(String),
}

impl fmt::Display for IngestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IngestError::NotFound(id) => write!(f, "host {id} not found"),
            IngestError::Forbidden(id) => write!(f, "invalid secret for host {id}"),
            IngestError::Unauthorized => write!(f, "unknown or unmonitored host secret"),
            IngestError::Storage(e) => write!(f, "storage error: {e}"),
            IngestError::Unavailable(msg) => write!(f, "service unavailable: {msg}"),
        }
    }
}

impl std::error::Error for IngestError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            IngestError::Storage(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StorageError> for IngestError {
    fn from(err: StorageError) -> Self {
        IngestError::Storage(err)
    }
}

/// What the hub made of an accepted pulse
#[derive(Debug, Clone, PartialEq)]
pub struct IngestReceipt {
    pub host_id: HostId,
    pub status: HostStatus,
    pub monthly_rx: u64,
    pub monthly_tx: u64,
    pub snapshot_saved: bool,
}

fn notification_target(record: &HostRecord) -> NotificationTarget {
    NotificationTarget {
        host_id: record.id,
        host_name: record.name.clone(),
        channels: record.settings.notify_channels.clone(),
    }
}

/// Deliver a notification without holding up the caller
fn spawn_notification(
    notifier: &Arc<dyn Notifier>,
    target: NotificationTarget,
    (title, message): (String, String),
) {
    let notifier = notifier.clone();
    tokio::spawn(async move {
        notifier.notify(&target, &title, &message).await;
    });
}

pub struct PulseIngestor {
    backend: Arc<dyn StorageBackend>,
    storage: StorageHandle,
    hub: HubHandle,
    notifier: Arc<dyn Notifier>,
    accountants: AccountantRegistry,
}

impl PulseIngestor {
    pub fn new(
        backend: Arc<dyn StorageBackend>,
        storage: StorageHandle,
        hub: HubHandle,
        notifier: Arc<dyn Notifier>,
        policy: AccountingConfig,
    ) -> Self {
        Self {
            accountants: AccountantRegistry::new(policy, storage.clone(), hub.clone()),
            backend,
            storage,
            hub,
            notifier,
        }
    }

    /// Accept a pulse received right now
    pub async fn ingest(&self, pulse: Pulse, secret: &str) -> Result<IngestReceipt, IngestError> {
        let now = Utc::now();
        self.ingest_at(pulse, secret, now, Local::now().date_naive())
            .await
    }

    /// Accept a pulse with an explicit clock
    ///
    /// `today` is the local calendar date the reset-day rule runs against.
    #[instrument(skip(self, pulse, secret), fields(host_id = pulse.host_id))]
    pub async fn ingest_at(
        &self,
        pulse: Pulse,
        secret: &str,
        now: DateTime<Utc>,
        today: NaiveDate,
    ) -> Result<IngestReceipt, IngestError> {
        let host_id = pulse.host_id;
        let record = self
            .backend
            .get_host(host_id)
            .await?
            .ok_or(IngestError::NotFound(host_id))?;

        if record.secret != secret {
            warn!("rejecting pulse for host {host_id}: secret mismatch");
            return Err(IngestError::Forbidden(host_id));
        }

        if !record.monitor_enabled {
            info!("first pulse from host {host_id}, enabling monitoring");
            if let Err(e) = self.storage.set_monitor_enabled(host_id, true).await {
                warn!("failed to enable monitoring for host {host_id}: {e:#}");
            }
        }

        let accountant = self.accountants.get_or_spawn(&record).await;
        let context = HostContext {
            name: record.name.clone(),
            settings: record.settings.clone(),
        };
        let report = accountant
            .process(pulse, context, now, today)
            .await
            .map_err(|e| IngestError::Unavailable(format!("{e:#}")))?;

        let target = notification_target(&record);
        if let Some(alert) = &report.outcome.traffic_alert {
            info!("host {host_id} crossed {}% of its traffic limit", alert.percent);
            let content = alerts::traffic_warning(&target, alert);
            spawn_notification(&self.notifier, target.clone(), content);
        }
        if let Some(transition) = &report.transition
            && transition.to == HostStatus::Online
            && record.settings.notify_offline_enabled
        {
            let content = alerts::back_online(&target);
            spawn_notification(&self.notifier, target.clone(), content);
        }

        Ok(IngestReceipt {
            host_id,
            status: report.state.status,
            monthly_rx: report.state.monthly_rx,
            monthly_tx: report.state.monthly_tx,
            snapshot_saved: report.snapshot_saved,
        })
    }

    /// Resolve the monitored host that owns `secret`
    async fn monitored_host(&self, secret: &str) -> Result<HostRecord, IngestError> {
        match self.backend.find_host_by_secret(secret).await? {
            Some(record) if record.monitor_enabled => Ok(record),
            _ => Err(IngestError::Unauthorized),
        }
    }

    /// Task set for the agent presenting `secret`
    pub async fn tasks_for(&self, secret: &str) -> Result<Vec<Task>, IngestError> {
        let record = self.monitored_host(secret).await?;
        let tasks = self.backend.list_tasks(record.id).await?;
        debug!("handing {} tasks to host {}", tasks.len(), record.id);

        Ok(tasks.into_iter().map(|row| row.task).collect())
    }

    /// Queue a batch of probe results; results for foreign tasks are dropped
    ///
    /// Returns the number of accepted results.
    pub async fn record_report(
        &self,
        secret: &str,
        results: Vec<ProbeResult>,
    ) -> Result<usize, IngestError> {
        let record = self.monitored_host(secret).await?;
        if results.is_empty() {
            return Ok(0);
        }

        let owned: HashSet<_> = self
            .backend
            .list_tasks(record.id)
            .await?
            .into_iter()
            .map(|row| row.task.id)
            .collect();

        let total = results.len();
        let rows: Vec<ProbeResultRow> = results
            .into_iter()
            .filter(|r| owned.contains(&r.task_id))
            .map(|result| ProbeResultRow {
                host_id: record.id,
                result,
            })
            .collect();

        if rows.len() < total {
            warn!(
                "dropped {} results of host {} for tasks it does not own",
                total - rows.len(),
                record.id
            );
        }

        let accepted = rows.len();
        self.storage.record_probe_results(rows).await;
        Ok(accepted)
    }

    /// Flip every monitored host whose pulses stopped to offline
    #[instrument(skip(self))]
    pub async fn sweep_offline(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<(HostId, StatusTransition)>, IngestError> {
        let mut flipped = Vec::new();

        for record in self.backend.list_hosts().await? {
            if !record.monitor_enabled {
                continue;
            }

            // hosts that never pulsed since start only matter if they were left online
            let accountant = match self.accountants.get(record.id).await {
                Some(handle) => handle,
                None if record.state.status == HostStatus::Online => {
                    self.accountants.get_or_spawn(&record).await
                }
                None => continue,
            };

            let transition = match accountant.check_stale(record.settings.clone(), now).await {
                Ok(Some(transition)) => transition,
                Ok(None) => continue,
                Err(e) => {
                    warn!("stale check for host {} failed: {e:#}", record.id);
                    continue;
                }
            };

            if record.settings.notify_offline_enabled {
                let target = notification_target(&record);
                let minutes = offline_threshold(&record.settings).num_minutes();
                let content = alerts::offline(&target, minutes);
                spawn_notification(&self.notifier, target, content);
            }
            flipped.push((record.id, transition));
        }

        Ok(flipped)
    }

    /// Stop monitoring a host and evict it from live viewers
    pub async fn stop_monitoring(&self, host_id: HostId) -> Result<(), IngestError> {
        if self.backend.get_host(host_id).await?.is_none() {
            return Err(IngestError::NotFound(host_id));
        }

        self.storage
            .set_monitor_enabled(host_id, false)
            .await
            .map_err(|e| IngestError::Unavailable(format!("{e:#}")))?;
        self.hub.remove_host(host_id).await;

        info!("stopped monitoring host {host_id}");
        Ok(())
    }

    pub async fn accountant_count(&self) -> usize {
        self.accountants.len().await
    }

    pub async fn shutdown(&self) {
        self.accountants.shutdown_all().await;
    }
}

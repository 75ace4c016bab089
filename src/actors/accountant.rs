//! HostAccountant - per-host sequencing of the accounting engine
//!
//! Each monitored host gets its own actor that owns the authoritative
//! [`HostTrafficState`]. Pulses of one host are processed strictly in the
//! order they reach the actor; different hosts never wait on each other.
//!
//! The actor feeds the storage actor's queue and the live hub, so viewers see
//! a host's updates in the order its pulses were accounted. Notifications are
//! driven by the caller once the actor has replied.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, NaiveDate, Utc};
use tokio::sync::{RwLock, mpsc, oneshot};
use tracing::{debug, info, instrument, trace, warn};

use super::hub::HubHandle;
use super::messages::{AccountantCommand, HostContext, HostTelemetry, PulseReport};
use super::storage::StorageHandle;
use crate::accounting::{
    HostTrafficState, InterfaceSelection, StatusTransition, offline_threshold, select_counters,
};
use crate::config::{AccountingConfig, HostSettings};
use crate::storage::{HostRecord, HostStateUpdate, SnapshotRow, StatusEventRow};
use crate::{HostId, Pulse};

pub struct HostAccountant {
    host_id: HostId,

    state: HostTrafficState,

    agent_version: Option<String>,

    /// Consecutive pulses seen while not online
    online_streak: u32,

    /// Whether the last pulse had to fall back to aggregate totals
    interface_fallback: bool,

    last_snapshot_at: Option<DateTime<Utc>>,

    policy: AccountingConfig,

    storage: StorageHandle,

    hub: HubHandle,

    command_rx: mpsc::Receiver<AccountantCommand>,
}

impl HostAccountant {
    pub fn new(
        record: &HostRecord,
        policy: AccountingConfig,
        storage: StorageHandle,
        hub: HubHandle,
        command_rx: mpsc::Receiver<AccountantCommand>,
    ) -> Self {
        Self {
            host_id: record.id,
            state: record.state.clone(),
            agent_version: record.agent_version.clone(),
            online_streak: 0,
            interface_fallback: false,
            last_snapshot_at: None,
            policy,
            storage,
            hub,
            command_rx,
        }
    }

    #[instrument(skip(self), fields(host_id = self.host_id))]
    pub async fn run(mut self) {
        debug!("starting accountant");

        while let Some(cmd) = self.command_rx.recv().await {
            match cmd {
                AccountantCommand::Process {
                    pulse,
                    context,
                    now,
                    today,
                    respond_to,
                } => {
                    let report = self.process(*pulse, context, now, today).await;
                    let _ = respond_to.send(report);
                }
                AccountantCommand::CheckStale {
                    settings,
                    now,
                    respond_to,
                } => {
                    let transition = self.check_stale(&settings, now).await;
                    let _ = respond_to.send(transition);
                }
                AccountantCommand::GetState { respond_to } => {
                    let _ = respond_to.send(self.state.clone());
                }
                AccountantCommand::Shutdown => break,
            }
        }

        debug!("accountant stopped");
    }

    async fn process(
        &mut self,
        pulse: Pulse,
        context: HostContext,
        now: DateTime<Utc>,
        today: NaiveDate,
    ) -> PulseReport {
        let settings = &context.settings;

        let selection = InterfaceSelection::parse(&settings.net_interface);
        let counters = select_counters(&pulse, &selection);
        if counters.fell_back != self.interface_fallback {
            if counters.fell_back {
                warn!(
                    "none of the interfaces '{}' are reported by host {}, using totals",
                    settings.net_interface, self.host_id
                );
            } else {
                info!("configured interfaces of host {} are back", self.host_id);
            }
            self.interface_fallback = counters.fell_back;
        }

        let outcome = self.state.apply_counters(counters, settings, today);
        if outcome.reset {
            info!("monthly traffic of host {} reset on {}", self.host_id, today);
        }

        let transition =
            self.state
                .mark_pulse(now, &mut self.online_streak, self.policy.online_after_pulses);

        let changed_version = match &pulse.agent_version {
            Some(version) if !version.is_empty() && self.agent_version.as_ref() != Some(version) => {
                debug!("host {} now runs agent {}", self.host_id, version);
                self.agent_version = Some(version.clone());
                Some(version.clone())
            }
            _ => None,
        };

        trace!(
            "host {}: monthly rx={} (+{}) tx={} (+{}), raw rx={} tx={}",
            self.host_id,
            self.state.monthly_rx,
            outcome.delta_rx,
            self.state.monthly_tx,
            outcome.delta_tx,
            self.state.last_raw_rx,
            self.state.last_raw_tx
        );

        self.storage
            .record_host_state(HostStateUpdate {
                host_id: self.host_id,
                state: self.state.clone(),
                agent_version: changed_version,
            })
            .await;

        if let Some(transition) = &transition {
            self.record_transition(transition).await;
        }

        let snapshot_due = self.last_snapshot_at.is_none_or(|last| {
            now.signed_duration_since(last).num_seconds()
                >= self.policy.snapshot_interval_secs as i64
        });
        if snapshot_due {
            self.storage
                .record_snapshot(SnapshotRow::from_pulse(&pulse, &self.state, now))
                .await;
            self.last_snapshot_at = Some(now);
        }

        self.hub
            .update(HostTelemetry::new(pulse, context.name, settings, &self.state, now))
            .await;

        PulseReport {
            state: self.state.clone(),
            counters,
            outcome,
            transition,
            snapshot_saved: snapshot_due,
        }
    }

    async fn check_stale(
        &mut self,
        settings: &HostSettings,
        now: DateTime<Utc>,
    ) -> Option<StatusTransition> {
        let transition = self.state.check_stale(now, offline_threshold(settings))?;
        self.online_streak = 0;

        info!("host {} stopped sending pulses, marking it offline", self.host_id);
        self.storage
            .record_host_state(HostStateUpdate {
                host_id: self.host_id,
                state: self.state.clone(),
                agent_version: None,
            })
            .await;
        self.record_transition(&transition).await;

        Some(transition)
    }

    async fn record_transition(&self, transition: &StatusTransition) {
        info!(
            "host {} is now {} (was {})",
            self.host_id, transition.to, transition.from
        );
        self.storage
            .record_status_event(StatusEventRow {
                host_id: self.host_id,
                status: transition.to,
                timestamp: transition.at,
            })
            .await;
    }
}

/// Handle for a HostAccountant
#[derive(Clone)]
pub struct AccountantHandle {
    sender: mpsc::Sender<AccountantCommand>,
    pub host_id: HostId,
}

impl AccountantHandle {
    pub fn spawn(
        record: &HostRecord,
        policy: AccountingConfig,
        storage: StorageHandle,
        hub: HubHandle,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(64);

        let actor = HostAccountant::new(record, policy, storage, hub, cmd_rx);
        tokio::spawn(actor.run());

        Self {
            sender: cmd_tx,
            host_id: record.id,
        }
    }

    pub async fn process(
        &self,
        pulse: Pulse,
        context: HostContext,
        now: DateTime<Utc>,
        today: NaiveDate,
    ) -> anyhow::Result<PulseReport> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(AccountantCommand::Process {
                pulse: Box::new(pulse),
                context,
                now,
                today,
                respond_to: tx,
            })
            .await
            .context("failed to send Process command")?;

        rx.await.context("failed to receive pulse report")
    }

    pub async fn check_stale(
        &self,
        settings: HostSettings,
        now: DateTime<Utc>,
    ) -> anyhow::Result<Option<StatusTransition>> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(AccountantCommand::CheckStale {
                settings,
                now,
                respond_to: tx,
            })
            .await
            .context("failed to send CheckStale command")?;

        rx.await.context("failed to receive stale check result")
    }

    pub async fn state(&self) -> anyhow::Result<HostTrafficState> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(AccountantCommand::GetState { respond_to: tx })
            .await
            .context("failed to send GetState command")?;

        rx.await.context("failed to receive state")
    }

    pub async fn shutdown(&self) {
        let _ = self.sender.send(AccountantCommand::Shutdown).await;
    }
}

/// Lazily spawned accountants, one per host
///
/// The lock only guards lookup and insertion, never a pulse.
#[derive(Clone)]
pub struct AccountantRegistry {
    accountants: Arc<RwLock<HashMap<HostId, AccountantHandle>>>,
    policy: AccountingConfig,
    storage: StorageHandle,
    hub: HubHandle,
}

impl AccountantRegistry {
    pub fn new(policy: AccountingConfig, storage: StorageHandle, hub: HubHandle) -> Self {
        Self {
            accountants: Arc::new(RwLock::new(HashMap::new())),
            policy,
            storage,
            hub,
        }
    }

    pub async fn get(&self, host_id: HostId) -> Option<AccountantHandle> {
        self.accountants.read().await.get(&host_id).cloned()
    }

    /// The accountant of `record`'s host, seeded from the record on first use
    pub async fn get_or_spawn(&self, record: &HostRecord) -> AccountantHandle {
        if let Some(handle) = self.get(record.id).await {
            return handle;
        }

        let mut accountants = self.accountants.write().await;
        accountants
            .entry(record.id)
            .or_insert_with(|| {
                debug!("spawning accountant for host {}", record.id);
                AccountantHandle::spawn(record, self.policy, self.storage.clone(), self.hub.clone())
            })
            .clone()
    }

    pub async fn len(&self) -> usize {
        self.accountants.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn shutdown_all(&self) {
        let accountants: Vec<AccountantHandle> =
            self.accountants.write().await.drain().map(|(_, h)| h).collect();
        for handle in accountants {
            handle.shutdown().await;
        }
    }
}

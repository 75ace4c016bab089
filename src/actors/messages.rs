//! Message types for actor communication
//!
//! ## Design Principles
//!
//! 1. **Commands**: Request/response messages sent to specific actors via mpsc
//! 2. **Events**: what the hub fans out to live viewers
//! 3. **Request/Response**: oneshot channels carried inside commands

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};

use crate::accounting::{
    AccountingOutcome, HostStatus, HostTrafficState, SelectedCounters, StatusTransition,
};
use crate::config::{HostSettings, TrafficCounterMode};
use crate::storage::{HostStateUpdate, ProbeResultRow, SnapshotRow, StatusEventRow};
use crate::{HostId, Pulse};

/// An accepted pulse enriched with the authoritative accounting results
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostTelemetry {
    #[serde(flatten)]
    pub pulse: Pulse,
    pub name: String,
    pub status: HostStatus,
    pub net_monthly_rx: u64,
    pub net_monthly_tx: u64,
    pub net_traffic_limit: u64,
    pub net_traffic_used_adjustment: u64,
    pub net_traffic_counter_mode: TrafficCounterMode,
    pub received_at: DateTime<Utc>,
}

impl HostTelemetry {
    pub fn new(
        pulse: Pulse,
        name: String,
        settings: &HostSettings,
        state: &HostTrafficState,
        received_at: DateTime<Utc>,
    ) -> Self {
        Self {
            pulse,
            name,
            status: state.status,
            net_monthly_rx: state.monthly_rx,
            net_monthly_tx: state.monthly_tx,
            net_traffic_limit: settings.traffic_limit,
            net_traffic_used_adjustment: settings.traffic_used_adjustment,
            net_traffic_counter_mode: settings.traffic_counter_mode,
            received_at,
        }
    }
}

/// Events pushed to live viewers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HubEvent {
    HostTelemetryUpdated(HostTelemetry),
    HostRemoved { host_id: HostId },
}

impl HubEvent {
    pub fn host_id(&self) -> HostId {
        match self {
            HubEvent::HostTelemetryUpdated(telemetry) => telemetry.pulse.host_id,
            HubEvent::HostRemoved { host_id } => *host_id,
        }
    }
}

/// Identifier the hub assigns to one live-viewer connection
pub type ViewerId = u64;

/// Commands that can be sent to the HubActor
#[derive(Debug)]
pub enum HubCommand {
    /// Add a viewer. Registering an id twice keeps the first registration.
    Register {
        viewer_id: ViewerId,
        sender: mpsc::Sender<HubEvent>,
    },

    /// Remove a viewer, unknown ids are ignored
    Unregister { viewer_id: ViewerId },

    /// Broadcast fresh telemetry to every viewer
    Update(Box<HostTelemetry>),

    /// Tell viewers to evict a host
    RemoveHost { host_id: HostId },

    ViewerCount {
        respond_to: oneshot::Sender<usize>,
    },

    Shutdown,
}

/// Registry view of a host handed to its accountant with every pulse
#[derive(Debug, Clone)]
pub struct HostContext {
    pub name: String,
    pub settings: HostSettings,
}

/// What the accountant did with one pulse
#[derive(Debug, Clone)]
pub struct PulseReport {
    pub state: HostTrafficState,
    pub counters: SelectedCounters,
    pub outcome: AccountingOutcome,
    pub transition: Option<StatusTransition>,
    pub snapshot_saved: bool,
}

/// Commands that can be sent to a HostAccountant
#[derive(Debug)]
pub enum AccountantCommand {
    /// Run the accounting steps for one pulse
    Process {
        pulse: Box<Pulse>,
        context: HostContext,
        now: DateTime<Utc>,
        today: NaiveDate,
        respond_to: oneshot::Sender<PulseReport>,
    },

    /// Flip the host offline if its last pulse is too old
    CheckStale {
        settings: HostSettings,
        now: DateTime<Utc>,
        respond_to: oneshot::Sender<Option<StatusTransition>>,
    },

    GetState {
        respond_to: oneshot::Sender<HostTrafficState>,
    },

    Shutdown,
}

/// Commands that can be sent to the StorageActor
///
/// Writes are applied in the order they were sent.
#[derive(Debug)]
pub enum StorageCommand {
    /// Latest derived state of a host (coalesced, last write wins)
    RecordHostState(HostStateUpdate),

    RecordSnapshot(SnapshotRow),

    RecordStatusEvent(StatusEventRow),

    RecordProbeResults(Vec<ProbeResultRow>),

    /// Toggle monitoring right away
    SetMonitorEnabled {
        host_id: HostId,
        enabled: bool,
        respond_to: oneshot::Sender<anyhow::Result<()>>,
    },

    /// Manually flush write buffer to storage
    Flush {
        respond_to: oneshot::Sender<anyhow::Result<()>>,
    },

    /// Get storage statistics
    GetStats {
        respond_to: oneshot::Sender<StorageStats>,
    },

    /// Gracefully shut down the storage actor
    Shutdown,
}

/// Storage statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageStats {
    /// Writes waiting for the next flush
    pub pending_writes: usize,

    /// Number of flush operations performed
    pub flush_count: u64,

    /// Batches the backend rejected
    pub failed_flushes: u64,

    pub last_cleanup_time: Option<DateTime<Utc>>,

    pub total_snapshots_deleted: u64,

    pub total_probe_results_deleted: u64,

    /// Backend-specific summary
    pub backend: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_hub_event_wire_format() {
        let removed = serde_json::to_value(HubEvent::HostRemoved { host_id: 4 }).unwrap();
        assert_eq!(removed, serde_json::json!({"type": "host_removed", "host_id": 4}));

        let telemetry = HostTelemetry::new(
            Pulse {
                host_id: 4,
                net_rx: 10,
                ..Default::default()
            },
            "edge".to_string(),
            &HostSettings {
                traffic_limit: 1000,
                ..Default::default()
            },
            &HostTrafficState {
                monthly_rx: 7,
                status: HostStatus::Online,
                ..Default::default()
            },
            Utc::now(),
        );
        let event = HubEvent::HostTelemetryUpdated(telemetry);
        let value = serde_json::to_value(&event).unwrap();

        assert_eq!(value["type"], "host_telemetry_updated");
        assert_eq!(value["host_id"], 4);
        assert_eq!(value["net_rx"], 10);
        assert_eq!(value["net_monthly_rx"], 7);
        assert_eq!(value["net_traffic_limit"], 1000);
        assert_eq!(value["status"], "online");
        assert_eq!(value["net_traffic_counter_mode"], "total");

        let decoded: HubEvent = serde_json::from_value(value).unwrap();
        assert_eq!(decoded, event);
    }
}

//! Records written to and read from the persistence store
//!
//! ## Layout
//!
//! Host rows mix two kinds of columns:
//! - **Registry columns** (name, secret, settings) come from the hub
//!   configuration and are rewritten on every start.
//! - **Derived columns** (traffic counters, status, last pulse) belong to the
//!   accounting engine and survive restarts untouched by seeding.
//!
//! Per-host settings are stored as one JSON document so new knobs do not need
//! a migration; everything that is filtered or ordered on is a typed column.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::accounting::{HostStatus, HostTrafficState};
use crate::config::{HostEntry, HostSettings};
use crate::{HostId, ProbeResult, Pulse, Task, TaskId};

/// A host as known to the registry, including its derived traffic state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostRecord {
    pub id: HostId,
    pub name: String,
    #[serde(skip_serializing, default)]
    pub secret: String,
    pub monitor_enabled: bool,
    pub agent_version: Option<String>,
    pub settings: HostSettings,
    pub state: HostTrafficState,
}

/// Registry columns of a host, as seeded from configuration
#[derive(Debug, Clone, PartialEq)]
pub struct HostRegistration {
    pub id: HostId,
    pub name: String,
    pub secret: String,
    pub monitor_enabled: bool,
    pub settings: HostSettings,
}

impl From<&HostEntry> for HostRegistration {
    fn from(entry: &HostEntry) -> Self {
        Self {
            id: entry.id,
            name: entry.name.clone(),
            secret: entry.secret.clone(),
            monitor_enabled: entry.monitor_enabled,
            settings: entry.settings.clone(),
        }
    }
}

impl HostRegistration {
    /// A fresh record for this registration with empty traffic state
    pub fn into_record(self) -> HostRecord {
        HostRecord {
            id: self.id,
            name: self.name,
            secret: self.secret,
            monitor_enabled: self.monitor_enabled,
            agent_version: None,
            settings: self.settings,
            state: HostTrafficState::default(),
        }
    }
}

/// Coalesced write of a host's derived state
#[derive(Debug, Clone, PartialEq)]
pub struct HostStateUpdate {
    pub host_id: HostId,
    pub state: HostTrafficState,
    /// Only written when present
    pub agent_version: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRow {
    pub host_id: HostId,
    pub label: Option<String>,
    #[serde(flatten)]
    pub task: Task,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeResultRow {
    pub host_id: HostId,
    #[serde(flatten)]
    pub result: ProbeResult,
}

/// Downsampled resource snapshot of one host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotRow {
    pub host_id: HostId,
    pub timestamp: DateTime<Utc>,
    pub cpu: f32,
    pub mem_used: u64,
    pub mem_total: u64,
    pub disk_used: u64,
    pub disk_total: u64,
    pub net_rx: u64,
    pub net_tx: u64,
    pub monthly_rx: u64,
    pub monthly_tx: u64,
}

impl SnapshotRow {
    pub fn from_pulse(pulse: &Pulse, state: &HostTrafficState, timestamp: DateTime<Utc>) -> Self {
        Self {
            host_id: pulse.host_id,
            timestamp,
            cpu: pulse.cpu,
            mem_used: pulse.mem_used,
            mem_total: pulse.mem_total,
            disk_used: pulse.disk_used,
            disk_total: pulse.disk_total,
            net_rx: pulse.net_rx,
            net_tx: pulse.net_tx,
            monthly_rx: state.monthly_rx,
            monthly_tx: state.monthly_tx,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusEventRow {
    pub host_id: HostId,
    pub status: HostStatus,
    pub timestamp: DateTime<Utc>,
}

/// One page of status events, newest first
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusPage {
    pub items: Vec<StatusEventRow>,
    pub total: u64,
    pub page: u32,
    pub page_size: u32,
}

/// Query parameters for fetching snapshots within a time range
#[derive(Debug, Clone)]
pub struct QueryRange {
    pub host_id: HostId,

    /// Start of time range (inclusive)
    pub start: DateTime<Utc>,

    /// End of time range (inclusive)
    pub end: DateTime<Utc>,

    /// Maximum number of results to return
    pub limit: Option<usize>,
}

/// Probe history query for a single task
#[derive(Debug, Clone)]
pub struct ProbeQuery {
    pub task_id: TaskId,
    pub since: DateTime<Utc>,
}

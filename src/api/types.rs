//! Shared API response types
//!
//! The viewer client decodes the same types, so they derive both serde traits.

use serde::{Deserialize, Serialize};

use crate::accounting::HostStatus;
use crate::actors::messages::StorageStats;
use crate::config::TrafficCounterMode;
use crate::storage::{HostRecord, ProbeResultRow, SnapshotRow, StatusEventRow};
use crate::{HostId, TaskId};

/// Response for GET /api/v1/health
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
    pub storage_healthy: bool,
    pub storage_message: String,
}

/// Response for GET /api/v1/stats
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsResponse {
    pub timestamp: String,
    pub viewers: usize,
    pub accountants: usize,
    pub storage: StorageStats,
}

/// One host as listed by GET /api/v1/hosts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostSummary {
    pub id: HostId,
    pub name: String,
    pub monitor_enabled: bool,
    pub status: HostStatus,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_version: Option<String>,

    /// Last pulse (RFC 3339 timestamp)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<String>,

    pub net_monthly_rx: u64,
    pub net_monthly_tx: u64,
    pub net_traffic_limit: u64,
    pub net_traffic_used_adjustment: u64,
    pub net_traffic_counter_mode: TrafficCounterMode,
}

impl From<HostRecord> for HostSummary {
    fn from(record: HostRecord) -> Self {
        Self {
            id: record.id,
            name: record.name,
            monitor_enabled: record.monitor_enabled,
            status: record.state.status,
            agent_version: record.agent_version,
            last_seen: record.state.last_pulse_at.map(|t| t.to_rfc3339()),
            net_monthly_rx: record.state.monthly_rx,
            net_monthly_tx: record.state.monthly_tx,
            net_traffic_limit: record.settings.traffic_limit,
            net_traffic_used_adjustment: record.settings.traffic_used_adjustment,
            net_traffic_counter_mode: record.settings.traffic_counter_mode,
        }
    }
}

/// Response for GET /api/v1/hosts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostsResponse {
    pub hosts: Vec<HostSummary>,
    pub count: usize,
}

/// Response for GET /api/v1/hosts/:id/snapshots
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotsResponse {
    pub host_id: HostId,
    pub start: String,
    pub end: String,
    pub count: usize,
    pub snapshots: Vec<SnapshotRow>,
}

/// Response for GET /api/v1/hosts/:id/status-logs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusLogsResponse {
    pub host_id: HostId,
    pub items: Vec<StatusEventRow>,
    pub total: u64,
    pub page: u32,
    pub page_size: u32,
}

/// Response for GET /api/v1/tasks/:id/results
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeResultsResponse {
    pub task_id: TaskId,
    pub range: String,
    pub count: usize,
    pub results: Vec<ProbeResultRow>,
}

/// Response for POST /api/v1/agent/report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportResponse {
    pub accepted: usize,
}

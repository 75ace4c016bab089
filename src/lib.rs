pub mod accounting;
pub mod actors;
pub mod alerts;
pub mod client;
pub mod config;
pub mod discord;
pub mod ingest;
pub mod probe;
pub mod storage;
pub mod util;

#[cfg(feature = "api")]
pub mod api;

#[cfg(feature = "viewer")]
pub mod viewer;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier of a monitored host (assigned by the host registry)
pub type HostId = u64;

/// Identifier of an active-check task
pub type TaskId = u64;

/// Frequency applied to tasks which do not carry one
pub const DEFAULT_TASK_FREQUENCY_SECS: u64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeKind {
    Ping,
    Tcping,
}

impl ProbeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProbeKind::Ping => "ping",
            ProbeKind::Tcping => "tcping",
        }
    }
}

impl std::fmt::Display for ProbeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ProbeKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ping" => Ok(ProbeKind::Ping),
            "tcping" => Ok(ProbeKind::Tcping),
            other => anyhow::bail!("unknown probe kind '{other}'"),
        }
    }
}

/// An active reachability check the agent runs on its own schedule.
///
/// The server is the only source of truth for tasks; the agent replaces its
/// whole set on every sync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub kind: ProbeKind,
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    /// Seconds between two runs (0 means "use the default")
    #[serde(default)]
    pub frequency: u64,
}

impl Task {
    pub fn frequency_secs(&self) -> u64 {
        if self.frequency == 0 {
            DEFAULT_TASK_FREQUENCY_SECS
        } else {
            self.frequency
        }
    }
}

/// Body of `GET /api/v1/agent/tasks`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TasksResponse {
    pub tasks: Vec<Task>,
}

/// Outcome of one probe run, reported to the hub in batches
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeResult {
    pub task_id: TaskId,
    pub success: bool,
    pub latency_ms: f64,
    pub packet_loss_pct: f64,
    #[serde(default = "Utc::now")]
    pub observed_at: DateTime<Utc>,
}

/// Raw counters of a single network interface
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceCounters {
    pub name: String,
    pub rx: u64,
    pub tx: u64,
}

/// Periodic resource snapshot pushed by an agent
///
/// `net_rx`/`net_tx` are raw cumulative counters (since boot or agent start),
/// not deltas. The hub turns them into monthly usage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Pulse {
    pub host_id: HostId,
    /// Seconds since boot
    pub uptime: u64,
    /// Global CPU usage in percent
    pub cpu: f32,
    pub mem_used: u64,
    pub mem_total: u64,
    pub disk_used: u64,
    pub disk_total: u64,
    pub net_rx: u64,
    pub net_tx: u64,
    #[serde(default)]
    pub interfaces: Vec<InterfaceCounters>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
}

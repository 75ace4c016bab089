use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::{HostId, Task};

/// Storage backend configuration
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StorageConfig {
    /// In-memory storage (no persistence)
    #[serde(rename = "none")]
    None,

    /// SQLite database (default for most deployments)
    Sqlite {
        /// Path to the SQLite database file
        #[serde(default = "default_sqlite_path")]
        path: PathBuf,

        /// Retention period in days for downsampled pulse snapshots
        #[serde(default = "default_retention_days")]
        retention_days: u32,

        /// Retention period in hours for probe results
        #[serde(default = "default_probe_retention_hours")]
        probe_retention_hours: u32,
    },
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::Sqlite {
            path: default_sqlite_path(),
            retention_days: default_retention_days(),
            probe_retention_hours: default_probe_retention_hours(),
        }
    }
}

fn default_sqlite_path() -> PathBuf {
    PathBuf::from("./hostpulse.db")
}

fn default_retention_days() -> u32 {
    30
}

fn default_probe_retention_hours() -> u32 {
    24
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct Config {
    #[serde(default)]
    pub api: ApiSettings,

    /// Storage configuration (optional - defaults to SQLite)
    pub storage: Option<StorageConfig>,

    #[serde(default)]
    pub accounting: AccountingConfig,

    /// Named notification channels hosts can refer to
    #[serde(default)]
    pub notifications: Vec<NotificationChannel>,

    /// Hosts seeded into the registry on startup
    #[serde(default)]
    pub hosts: Vec<HostEntry>,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct ApiSettings {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,

    /// Bearer token for viewer/admin routes (agent routes use host secrets)
    pub admin_token: Option<String>,

    #[serde(default = "default_true")]
    pub enable_cors: bool,

    /// Outbound queue length per live viewer before it gets disconnected
    #[serde(default = "default_viewer_queue")]
    pub viewer_queue_capacity: usize,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            admin_token: None,
            enable_cors: true,
            viewer_queue_capacity: default_viewer_queue(),
        }
    }
}

fn default_bind_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

fn default_viewer_queue() -> usize {
    64
}

#[derive(Debug, Clone, Copy, serde::Deserialize)]
pub struct AccountingConfig {
    /// Minimum spacing between two persisted snapshots of one host
    #[serde(default = "default_snapshot_interval")]
    pub snapshot_interval_secs: u64,

    /// Consecutive pulses required before a host that is not online flips to online
    #[serde(default = "default_online_after_pulses")]
    pub online_after_pulses: u32,

    /// How often the offline sweeper looks for stale hosts
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

impl Default for AccountingConfig {
    fn default() -> Self {
        Self {
            snapshot_interval_secs: default_snapshot_interval(),
            online_after_pulses: default_online_after_pulses(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

fn default_snapshot_interval() -> u64 {
    60
}

fn default_online_after_pulses() -> u32 {
    1
}

fn default_sweep_interval() -> u64 {
    30
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct NotificationChannel {
    pub name: String,
    #[serde(flatten)]
    pub alert: Alert,
}

#[derive(Debug, Clone, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Alert {
    Discord(Discord),
    Webhook(Webhook),
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct Webhook {
    pub url: String,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct Discord {
    pub url: String,
    pub user_id: Option<String>,
}

/// Which counters the viewer-facing usage figure is based on
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrafficCounterMode {
    #[default]
    Total,
    Rx,
    Tx,
}

impl TrafficCounterMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrafficCounterMode::Total => "total",
            TrafficCounterMode::Rx => "rx",
            TrafficCounterMode::Tx => "tx",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "rx" => TrafficCounterMode::Rx,
            "tx" => TrafficCounterMode::Tx,
            _ => TrafficCounterMode::Total,
        }
    }
}

/// Per-host configuration read by the accounting engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostSettings {
    /// Interface allow-list, comma separated. Empty or `auto` uses pulse totals.
    #[serde(default)]
    pub net_interface: String,

    /// Day of month (1-31) on which monthly traffic resets, 0 disables resets
    #[serde(default)]
    pub reset_day: u32,

    /// Monthly traffic limit in bytes, 0 disables the limit
    #[serde(default)]
    pub traffic_limit: u64,

    /// Passed through to viewers
    #[serde(default)]
    pub traffic_used_adjustment: u64,

    /// Passed through to viewers
    #[serde(default)]
    pub traffic_counter_mode: TrafficCounterMode,

    #[serde(default = "default_true")]
    pub notify_offline_enabled: bool,

    /// Minutes without a pulse before the host counts as offline (0 means 1)
    #[serde(default = "default_offline_threshold")]
    pub notify_offline_threshold: u32,

    #[serde(default = "default_true")]
    pub notify_traffic_enabled: bool,

    /// Usage percentage that triggers the traffic warning (0 means 90)
    #[serde(default = "default_traffic_threshold")]
    pub notify_traffic_threshold: u32,

    /// Names of notification channels; empty selects all configured channels
    #[serde(default)]
    pub notify_channels: Vec<String>,
}

impl Default for HostSettings {
    fn default() -> Self {
        Self {
            net_interface: String::new(),
            reset_day: 0,
            traffic_limit: 0,
            traffic_used_adjustment: 0,
            traffic_counter_mode: TrafficCounterMode::Total,
            notify_offline_enabled: true,
            notify_offline_threshold: default_offline_threshold(),
            notify_traffic_enabled: true,
            notify_traffic_threshold: default_traffic_threshold(),
            notify_channels: Vec::new(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_offline_threshold() -> u32 {
    1
}

fn default_traffic_threshold() -> u32 {
    90
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct HostEntry {
    pub id: HostId,
    pub name: String,
    pub secret: String,

    /// Monitoring also switches on implicitly with the first pulse
    #[serde(default)]
    pub monitor_enabled: bool,

    #[serde(flatten)]
    pub settings: HostSettings,

    #[serde(default)]
    pub tasks: Vec<TaskEntry>,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct TaskEntry {
    #[serde(flatten)]
    pub task: Task,
    pub label: Option<String>,
}

impl Config {
    /// Reject configurations the hub cannot run with
    pub fn validate(&self) -> anyhow::Result<()> {
        let mut ids = HashSet::new();
        let mut secrets = HashSet::new();
        let mut task_ids = HashSet::new();

        for host in &self.hosts {
            if !ids.insert(host.id) {
                anyhow::bail!("duplicate host id {}", host.id);
            }
            if host.secret.is_empty() {
                anyhow::bail!("host {} has an empty secret", host.id);
            }
            if !secrets.insert(host.secret.as_str()) {
                anyhow::bail!("host {} reuses the secret of another host", host.id);
            }
            if host.settings.reset_day > 31 {
                anyhow::bail!(
                    "host {}: reset_day must be within 1-31 (or 0), got {}",
                    host.id,
                    host.settings.reset_day
                );
            }
            for entry in &host.tasks {
                if !task_ids.insert(entry.task.id) {
                    anyhow::bail!("duplicate task id {}", entry.task.id);
                }
                if entry.task.kind == crate::ProbeKind::Tcping && entry.task.port.is_none() {
                    anyhow::bail!("tcping task {} needs a port", entry.task.id);
                }
            }
        }

        for channel in &self.notifications {
            if self
                .notifications
                .iter()
                .filter(|other| other.name == channel.name)
                .count()
                > 1
            {
                anyhow::bail!("duplicate notification channel '{}'", channel.name);
            }
        }

        Ok(())
    }
}

pub fn read_config_file(path: &str) -> anyhow::Result<Config> {
    let file_content = std::fs::read_to_string(path)?;
    let config: Config = serde_json::from_str(&file_content)
        .map_err(|e| anyhow::anyhow!("Invalid configuration file provided: {e}"))?;
    config.validate()?;
    trace!("loaded config: {config:?}");
    Ok(config)
}

//! PulseReporter - samples local resources and pushes them to the hub

use std::time::Duration;

use sysinfo::{Disks, Networks, System};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, instrument, trace, warn};

use crate::client::HubClient;
use crate::{HostId, InterfaceCounters, Pulse};

pub const DEFAULT_PULSE_INTERVAL: Duration = Duration::from_secs(3);

fn is_loopback(name: &str) -> bool {
    name == "lo" || name.starts_with("lo0") || name.to_ascii_lowercase().contains("loopback")
}

/// Counter totals over every non-loopback interface
pub fn aggregate_counters(interfaces: &[InterfaceCounters]) -> (u64, u64) {
    interfaces
        .iter()
        .filter(|i| !is_loopback(&i.name))
        .fold((0u64, 0u64), |(rx, tx), i| {
            (rx.saturating_add(i.rx), tx.saturating_add(i.tx))
        })
}

/// Keeps sysinfo handles alive between samples so CPU usage has a baseline
pub struct ResourceSampler {
    host_id: HostId,
    system: System,
    disks: Disks,
    networks: Networks,
}

impl ResourceSampler {
    pub fn new(host_id: HostId) -> Self {
        let mut system = System::new();
        system.refresh_cpu_usage();
        system.refresh_memory();

        Self {
            host_id,
            system,
            disks: Disks::new_with_refreshed_list(),
            networks: Networks::new_with_refreshed_list(),
        }
    }

    pub fn sample(&mut self) -> Pulse {
        self.system.refresh_cpu_usage();
        self.system.refresh_memory();
        self.disks.refresh(true);
        self.networks.refresh(true);

        // the disk mounted closest to the filesystem root
        let (disk_used, disk_total) = self
            .disks
            .list()
            .iter()
            .min_by_key(|disk| disk.mount_point().as_os_str().len())
            .map(|disk| {
                let total = disk.total_space();
                (total.saturating_sub(disk.available_space()), total)
            })
            .unwrap_or_default();

        let mut interfaces: Vec<InterfaceCounters> = self
            .networks
            .iter()
            .map(|(name, data)| InterfaceCounters {
                name: name.clone(),
                rx: data.total_received(),
                tx: data.total_transmitted(),
            })
            .collect();
        interfaces.sort_by(|a, b| a.name.cmp(&b.name));
        let (net_rx, net_tx) = aggregate_counters(&interfaces);

        Pulse {
            host_id: self.host_id,
            uptime: System::uptime(),
            cpu: self.system.global_cpu_usage(),
            mem_used: self.system.used_memory(),
            mem_total: self.system.total_memory(),
            disk_used,
            disk_total,
            net_rx,
            net_tx,
            interfaces,
            agent_version: Some(env!("CARGO_PKG_VERSION").to_string()),
            os: System::long_os_version(),
            hostname: System::host_name(),
        }
    }
}

#[instrument(skip_all, fields(host_id = host_id))]
async fn report_loop(
    client: HubClient,
    host_id: HostId,
    period: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    debug!("starting pulse reporter");

    let mut sampler = ResourceSampler::new(host_id);
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let pulse = sampler.sample();
                trace!("pulse: cpu={:.1}% rx={} tx={}", pulse.cpu, pulse.net_rx, pulse.net_tx);
                if let Err(e) = client.send_pulse(&pulse).await {
                    warn!("failed to send pulse: {e:#}");
                }
            }
            _ = shutdown_rx.changed() => break,
        }
    }

    debug!("pulse reporter stopped");
}

pub struct PulseReporterHandle {
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl PulseReporterHandle {
    pub fn spawn(client: HubClient, host_id: HostId, period: Duration) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let join = tokio::spawn(report_loop(client, host_id, period, shutdown_rx));

        Self { shutdown_tx, join }
    }

    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        let _ = self.join.await;
    }
}

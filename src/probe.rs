//! Active reachability checks run by the agent.
//!
//! Failures never surface as errors here. A failed ping yields
//! [`ProbeOutcome::failed`], a failed tcping [`ProbeOutcome::unreachable`].

use std::process::Stdio;
use std::sync::LazyLock;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use regex::Regex;
use tokio::net::TcpStream;
use tokio::process::Command;
use tracing::{debug, trace};

use crate::{ProbeKind, ProbeResult, Task, TaskId};

/// Number of echo requests per ping run
pub const PING_COUNT: u32 = 3;

/// Upper bound for a single probe run
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProbeOutcome {
    pub success: bool,
    pub latency_ms: f64,
    pub packet_loss_pct: f64,
}

impl ProbeOutcome {
    pub fn failed() -> Self {
        Self {
            success: false,
            latency_ms: 0.0,
            packet_loss_pct: 100.0,
        }
    }

    /// A refused or timed out connection; tcping has no notion of loss
    pub fn unreachable() -> Self {
        Self {
            success: false,
            latency_ms: 0.0,
            packet_loss_pct: 0.0,
        }
    }

    pub fn into_result(self, task_id: TaskId) -> ProbeResult {
        ProbeResult {
            task_id,
            success: self.success,
            latency_ms: self.latency_ms,
            packet_loss_pct: self.packet_loss_pct,
            observed_at: Utc::now(),
        }
    }
}

#[async_trait]
pub trait ProbeExecutor: Send + Sync + 'static {
    async fn probe(&self, kind: ProbeKind, target: &str, port: Option<u16>) -> ProbeOutcome;

    async fn run_task(&self, task: &Task) -> ProbeResult {
        self.probe(task.kind, &task.target, task.port)
            .await
            .into_result(task.id)
    }
}

/// Probes through the operating system: the `ping` utility and plain TCP connects
#[derive(Debug, Clone)]
pub struct SystemProber {
    ping_count: u32,
    timeout: Duration,
}

impl Default for SystemProber {
    fn default() -> Self {
        Self {
            ping_count: PING_COUNT,
            timeout: PROBE_TIMEOUT,
        }
    }
}

impl SystemProber {
    pub fn new(ping_count: u32, timeout: Duration) -> Self {
        Self {
            ping_count: ping_count.max(1),
            timeout,
        }
    }

    fn ping_command(&self, target: &str) -> Command {
        let mut cmd = Command::new("ping");
        let count = self.ping_count.to_string();

        if cfg!(windows) {
            let deadline = self.timeout.as_millis().to_string();
            cmd.args(["-n", &count, "-w", &deadline, target]);
        } else if cfg!(any(target_os = "macos", target_os = "freebsd")) {
            let deadline = self.timeout.as_secs().max(1).to_string();
            cmd.args(["-n", "-c", &count, "-i", "0.5", "-t", &deadline, target]);
        } else {
            let deadline = self.timeout.as_secs().max(1).to_string();
            cmd.args(["-n", "-c", &count, "-i", "0.5", "-w", &deadline, target]);
        }

        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        cmd
    }

    pub async fn ping(&self, target: &str) -> ProbeOutcome {
        let child = match self.ping_command(target).spawn() {
            Ok(child) => child,
            Err(e) => {
                debug!("could not spawn ping for {target}: {e}");
                return ProbeOutcome::failed();
            }
        };

        // the utility enforces its own deadline, this only guards against a hung process
        let grace = self.timeout + Duration::from_secs(1);
        let output = match tokio::time::timeout(grace, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                debug!("ping for {target} failed: {e}");
                return ProbeOutcome::failed();
            }
            Err(_) => {
                debug!("ping for {target} overran its deadline");
                return ProbeOutcome::failed();
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        trace!("ping output for {target}: {stdout}");

        parse_ping_output(&stdout)
            .map(PingSummary::outcome)
            .unwrap_or_else(ProbeOutcome::failed)
    }

    pub async fn tcping(&self, target: &str, port: Option<u16>) -> ProbeOutcome {
        let Some(port) = port else {
            debug!("tcping to {target} has no port");
            return ProbeOutcome::unreachable();
        };

        let start = Instant::now();
        match tokio::time::timeout(self.timeout, TcpStream::connect((target, port))).await {
            Ok(Ok(_stream)) => ProbeOutcome {
                success: true,
                latency_ms: start.elapsed().as_secs_f64() * 1000.0,
                packet_loss_pct: 0.0,
            },
            Ok(Err(e)) => {
                debug!("tcping to {target}:{port} failed: {e}");
                ProbeOutcome::unreachable()
            }
            Err(_) => {
                debug!("tcping to {target}:{port} timed out");
                ProbeOutcome::unreachable()
            }
        }
    }
}

#[async_trait]
impl ProbeExecutor for SystemProber {
    async fn probe(&self, kind: ProbeKind, target: &str, port: Option<u16>) -> ProbeOutcome {
        match kind {
            ProbeKind::Ping => self.ping(target).await,
            ProbeKind::Tcping => self.tcping(target, port).await,
        }
    }
}

/// Summary block of a `ping` run
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PingSummary {
    pub transmitted: u32,
    pub received: u32,
    pub avg_rtt_ms: Option<f64>,
}

impl PingSummary {
    pub fn outcome(self) -> ProbeOutcome {
        if self.transmitted == 0 || self.received == 0 {
            return ProbeOutcome::failed();
        }

        let received = self.received.min(self.transmitted);
        let lost = self.transmitted - received;

        ProbeOutcome {
            success: true,
            latency_ms: self.avg_rtt_ms.unwrap_or(0.0),
            packet_loss_pct: f64::from(lost) * 100.0 / f64::from(self.transmitted),
        }
    }
}

static UNIX_COUNTS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d+) packets transmitted, (\d+) (?:packets )?received").expect("valid regex")
});

static UNIX_RTT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"= [\d.]+/([\d.]+)/[\d.]+").expect("valid regex")
});

static WINDOWS_COUNTS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Sent = (\d+), Received = (\d+)").expect("valid regex")
});

static WINDOWS_AVG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Average = (\d+)ms").expect("valid regex"));

/// Extract counts and average round-trip time from Linux, BSD/macOS or Windows output
pub fn parse_ping_output(output: &str) -> Option<PingSummary> {
    if let Some(counts) = UNIX_COUNTS.captures(output) {
        let transmitted = counts[1].parse().ok()?;
        let received = counts[2].parse().ok()?;
        let avg_rtt_ms = UNIX_RTT
            .captures(output)
            .and_then(|rtt| rtt[1].parse().ok());

        return Some(PingSummary {
            transmitted,
            received,
            avg_rtt_ms,
        });
    }

    if let Some(counts) = WINDOWS_COUNTS.captures(output) {
        let transmitted = counts[1].parse().ok()?;
        let received = counts[2].parse().ok()?;
        let avg_rtt_ms = WINDOWS_AVG
            .captures(output)
            .and_then(|avg| avg[1].parse().ok());

        return Some(PingSummary {
            transmitted,
            received,
            avg_rtt_ms,
        });
    }

    None
}

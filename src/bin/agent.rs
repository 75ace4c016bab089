use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use hostpulse::{
    HostId,
    actors::{
        pulse_reporter::PulseReporterHandle,
        scheduler::{SchedulerConfig, SchedulerHandle},
    },
    client::HubClient,
    probe::SystemProber,
    util::{get_host_id, get_secret, get_server_url},
};
use tracing::{info, level_filters::LevelFilter, trace};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Parser)]
#[command(name = "hostpulse-agent")]
#[command(about = "Reports resource pulses and probe results to a hostpulse hub", long_about = None)]
struct Args {
    /// Hub base URL [env: HOSTPULSE_SERVER]
    #[arg(long)]
    server: Option<String>,

    /// Monitor secret of this host [env: HOSTPULSE_SECRET]
    #[arg(long)]
    secret: Option<String>,

    /// Host id assigned by the hub [env: HOSTPULSE_HOST_ID]
    #[arg(long)]
    id: Option<HostId>,

    /// Seconds between task syncs
    #[arg(long, default_value_t = 60)]
    sync_interval: u64,

    /// Seconds between scheduler ticks
    #[arg(long, default_value_t = 1)]
    tick_interval: u64,

    /// Seconds between probe result reports
    #[arg(long, default_value_t = 30)]
    flush_interval: u64,

    /// Seconds between resource pulses
    #[arg(long, default_value_t = 3)]
    pulse_interval: u64,
}

fn init() {
    dotenv::dotenv().ok();

    let filter = filter::Targets::new().with_targets(vec![
        ("hostpulse", LevelFilter::DEBUG),
        ("hostpulse_agent", LevelFilter::TRACE),
    ]);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(true),
        )
        .with(filter)
        .init();
}

fn secs(value: u64) -> Duration {
    Duration::from_secs(value.max(1))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init();
    let args = Args::parse();
    trace!("started with args: {args:?}");

    let server = args.server.unwrap_or_else(get_server_url);
    let secret = args
        .secret
        .or_else(get_secret)
        .context("no monitor secret given (--secret or HOSTPULSE_SECRET)")?;
    let host_id = args
        .id
        .or_else(get_host_id)
        .context("no host id given (--id or HOSTPULSE_HOST_ID)")?;

    let client = HubClient::new(&server, secret)?;
    let scheduler = SchedulerHandle::spawn(
        client.clone(),
        Arc::new(SystemProber::default()),
        SchedulerConfig {
            sync_interval: secs(args.sync_interval),
            tick_interval: secs(args.tick_interval),
            flush_interval: secs(args.flush_interval),
            ..Default::default()
        },
    );
    let reporter = PulseReporterHandle::spawn(client, host_id, secs(args.pulse_interval));
    info!("agent for host {host_id} reporting to {server}");

    tokio::signal::ctrl_c().await?;
    info!("shutting down");

    reporter.shutdown().await;
    scheduler.shutdown().await;

    Ok(())
}

//! Prints the hub's live stream as one JSON line per event

use clap::Parser;
use hostpulse::viewer::{LiveStreamClient, ViewerEvent};
use tracing::{info, level_filters::LevelFilter, warn};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "hostpulse-tail")]
#[command(about = "Follow live host telemetry from a hostpulse hub", long_about = None)]
struct Args {
    /// API server URL
    #[arg(short, long, value_name = "URL", default_value = "http://127.0.0.1:8080")]
    url: String,

    /// API authentication token
    #[arg(short, long, value_name = "TOKEN", env = "HOSTPULSE_ADMIN_TOKEN")]
    token: Option<String>,
}

fn init() {
    let filter = filter::Targets::new().with_targets(vec![
        ("hostpulse", LevelFilter::INFO),
        ("hostpulse_tail", LevelFilter::INFO),
    ]);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact(),
        )
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init();
    let args = Args::parse();

    let mut events = LiveStreamClient::new(&args.url, args.token.as_deref()).connect();

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(ViewerEvent::Hub(event)) => println!("{}", serde_json::to_string(&event)?),
                Some(ViewerEvent::Connected) => info!("connected to {}", args.url),
                Some(ViewerEvent::Disconnected(reason)) => warn!("disconnected: {reason}"),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    Ok(())
}

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use hostpulse::{
    actors::{hub::HubHandle, storage::RetentionPolicy, storage::StorageHandle, sweeper::SweeperHandle},
    alerts::AlertManager,
    api::{ApiConfig, ApiState, spawn_api_server},
    config::read_config_file,
    ingest::PulseIngestor,
    storage::{open_backend, seed_registry},
};
use tracing::{info, level_filters::LevelFilter, trace};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Parser)]
#[command(name = "hostpulse-hub")]
#[command(about = "Collects agent pulses and streams them to viewers", long_about = None)]
struct Args {
    /// Config file
    #[arg(short)]
    file: String,
}

fn init() {
    let filter = filter::Targets::new().with_targets(vec![
        ("hostpulse", LevelFilter::DEBUG),
        ("hostpulse_hub", LevelFilter::TRACE),
        ("tower_http", LevelFilter::DEBUG),
    ]);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init();
    let args = Args::parse();
    trace!("started with args: {args:?}");

    let config = read_config_file(&args.file)?;
    let storage_config = config.storage.clone().unwrap_or_default();

    let backend = open_backend(&storage_config).await?;
    seed_registry(backend.as_ref(), &config).await?;

    let storage = StorageHandle::spawn(backend.clone(), RetentionPolicy::from(&storage_config));
    let hub = HubHandle::spawn(config.api.viewer_queue_capacity);
    let notifier = Arc::new(AlertManager::new(config.notifications.clone()));
    let ingestor = Arc::new(PulseIngestor::new(
        backend.clone(),
        storage.clone(),
        hub.clone(),
        notifier,
        config.accounting,
    ));
    let sweeper = SweeperHandle::spawn(
        ingestor.clone(),
        Duration::from_secs(config.accounting.sweep_interval_secs),
    );

    let state = ApiState::new(backend, storage.clone(), hub.clone(), ingestor.clone());
    let addr = spawn_api_server(ApiConfig::from(&config.api), state).await?;
    info!("hub ready on {addr} with {} hosts", config.hosts.len());

    tokio::signal::ctrl_c().await?;
    info!("shutting down");

    sweeper.shutdown().await;
    ingestor.shutdown().await;
    hub.shutdown().await;
    storage.flush().await?;
    storage.shutdown().await;

    Ok(())
}

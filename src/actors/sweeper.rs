//! OfflineSweeper - periodic staleness check over all monitored hosts

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, error, info, instrument};

use crate::ingest::PulseIngestor;

#[derive(Debug)]
enum SweeperCommand {
    SweepNow,
    Shutdown,
}

pub struct OfflineSweeper {
    ingestor: Arc<PulseIngestor>,
    period: Duration,
    command_rx: mpsc::Receiver<SweeperCommand>,
}

impl OfflineSweeper {
    fn new(
        ingestor: Arc<PulseIngestor>,
        period: Duration,
        command_rx: mpsc::Receiver<SweeperCommand>,
    ) -> Self {
        Self {
            ingestor,
            period,
            command_rx,
        }
    }

    #[instrument(skip(self), fields(period_secs = self.period.as_secs()))]
    async fn run(mut self) {
        debug!("starting offline sweeper");

        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // the first tick completes immediately, skip it so fresh hubs do not sweep before any pulse
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => self.sweep().await,
                Some(cmd) = self.command_rx.recv() => match cmd {
                    SweeperCommand::SweepNow => self.sweep().await,
                    SweeperCommand::Shutdown => break,
                },
                else => break,
            }
        }

        debug!("offline sweeper stopped");
    }

    async fn sweep(&self) {
        match self.ingestor.sweep_offline(Utc::now()).await {
            Ok(flipped) if flipped.is_empty() => {}
            Ok(flipped) => info!("{} hosts went offline", flipped.len()),
            Err(e) => error!("offline sweep failed: {e}"),
        }
    }
}

#[derive(Clone)]
pub struct SweeperHandle {
    sender: mpsc::Sender<SweeperCommand>,
}

impl SweeperHandle {
    pub fn spawn(ingestor: Arc<PulseIngestor>, period: Duration) -> Self {
        let (tx, rx) = mpsc::channel(8);
        let sweeper = OfflineSweeper::new(ingestor, period.max(Duration::from_secs(1)), rx);
        tokio::spawn(sweeper.run());

        Self { sender: tx }
    }

    /// Run a sweep outside the regular schedule
    pub async fn sweep_now(&self) {
        let _ = self.sender.send(SweeperCommand::SweepNow).await;
    }

    pub async fn shutdown(&self) {
        let _ = self.sender.send(SweeperCommand::Shutdown).await;
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

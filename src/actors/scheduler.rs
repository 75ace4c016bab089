//! Agent scheduler - task sync, probe execution and result reporting
//!
//! Three loops run side by side:
//!
//! ```text
//! sync loop ──watch(Vec<Task>)──► exec loop ──spawn──► probe ──mpsc──► ReportBuffer ──POST──► hub
//!    ▲                                                                      │
//!    └──────────────────────────── GET tasks ◄───────────────── hub ◄───────┘
//! ```
//!
//! The task set is replaced wholesale on every successful sync. Results are
//! owned by a single aggregator and shipped in batches; a failed batch is
//! dropped.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval};
use tracing::{debug, error, info, instrument, trace, warn};

use crate::client::HubClient;
use crate::probe::ProbeExecutor;
use crate::{ProbeResult, Task, TaskId};

#[derive(Debug, Clone, Copy)]
pub struct SchedulerConfig {
    pub sync_interval: Duration,
    pub tick_interval: Duration,
    pub flush_interval: Duration,
    /// Capacity of the channel between probes and the report buffer
    pub result_queue: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            sync_interval: Duration::from_secs(60),
            tick_interval: Duration::from_secs(1),
            flush_interval: Duration::from_secs(30),
            result_queue: 256,
        }
    }
}

/// When each task last started
#[derive(Debug, Default)]
pub struct LastRuns {
    runs: HashMap<TaskId, Instant>,
}

impl LastRuns {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tasks due at `now`, marked as started
    ///
    /// Entries of tasks missing from `tasks` are forgotten.
    pub fn take_due(&mut self, tasks: &[Task], now: Instant) -> Vec<Task> {
        let live: HashSet<TaskId> = tasks.iter().map(|t| t.id).collect();
        self.runs.retain(|id, _| live.contains(id));

        let mut due = Vec::new();
        for task in tasks {
            let frequency = Duration::from_secs(task.frequency_secs());
            let is_due = self
                .runs
                .get(&task.id)
                .is_none_or(|last| now.saturating_duration_since(*last) >= frequency);

            if is_due {
                self.runs.insert(task.id, now);
                due.push(task.clone());
            }
        }
        due
    }

    pub fn len(&self) -> usize {
        self.runs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }
}

#[instrument(skip_all)]
async fn sync_loop(
    client: HubClient,
    tasks_tx: watch::Sender<Vec<Task>>,
    mut shutdown_rx: watch::Receiver<bool>,
    period: Duration,
) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => match client.fetch_tasks().await {
                Ok(tasks) => {
                    debug!("synced {} tasks", tasks.len());
                    tasks_tx.send_replace(tasks);
                }
                Err(e) => warn!("task sync failed, keeping previous tasks: {e:#}"),
            },
            _ = shutdown_rx.changed() => break,
        }
    }

    debug!("sync loop stopped");
}

#[instrument(skip_all)]
async fn exec_loop(
    tasks_rx: watch::Receiver<Vec<Task>>,
    prober: Arc<dyn ProbeExecutor>,
    results_tx: mpsc::Sender<ProbeResult>,
    mut shutdown_rx: watch::Receiver<bool>,
    period: Duration,
) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut last_runs = LastRuns::new();

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let tasks = tasks_rx.borrow().clone();
                for task in last_runs.take_due(&tasks, Instant::now()) {
                    trace!("running {} task {} against {}", task.kind, task.id, task.target);
                    let prober = prober.clone();
                    let results_tx = results_tx.clone();
                    tokio::spawn(async move {
                        let result = prober.run_task(&task).await;
                        if results_tx.send(result).await.is_err() {
                            debug!("report buffer is gone, dropping result of task {}", task.id);
                        }
                    });
                }
            }
            _ = shutdown_rx.changed() => break,
        }
    }

    debug!("exec loop stopped");
}

/// Owns pending probe results and ships them in batches
pub struct ReportBuffer {
    client: HubClient,
    results_rx: mpsc::Receiver<ProbeResult>,
    pending: Vec<ProbeResult>,
    shutdown_rx: watch::Receiver<bool>,
    period: Duration,
}

impl ReportBuffer {
    fn new(
        client: HubClient,
        results_rx: mpsc::Receiver<ProbeResult>,
        shutdown_rx: watch::Receiver<bool>,
        period: Duration,
    ) -> Self {
        Self {
            client,
            results_rx,
            pending: Vec::new(),
            shutdown_rx,
            period,
        }
    }

    #[instrument(skip_all)]
    async fn run(mut self) {
        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            tokio::select! {
                Some(result) = self.results_rx.recv() => self.pending.push(result),
                _ = ticker.tick() => self.flush().await,
                _ = self.shutdown_rx.changed() => break,
            }
        }

        while let Ok(result) = self.results_rx.try_recv() {
            self.pending.push(result);
        }
        self.flush().await;
        debug!("report buffer stopped");
    }

    async fn flush(&mut self) {
        let batch = std::mem::take(&mut self.pending);
        if batch.is_empty() {
            return;
        }

        match self.client.report_results(&batch).await {
            Ok(()) => info!("reported {} probe results", batch.len()),
            Err(e) => error!("dropping {} probe results: {e:#}", batch.len()),
        }
    }
}

/// Handle for the three scheduler loops
pub struct SchedulerHandle {
    shutdown_tx: watch::Sender<bool>,
    tasks_rx: watch::Receiver<Vec<Task>>,
    joins: Vec<JoinHandle<()>>,
}

impl SchedulerHandle {
    pub fn spawn(client: HubClient, prober: Arc<dyn ProbeExecutor>, config: SchedulerConfig) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (tasks_tx, tasks_rx) = watch::channel(Vec::new());
        let (results_tx, results_rx) = mpsc::channel(config.result_queue.max(1));

        let buffer = ReportBuffer::new(
            client.clone(),
            results_rx,
            shutdown_rx.clone(),
            config.flush_interval,
        );

        let joins = vec![
            tokio::spawn(sync_loop(
                client,
                tasks_tx,
                shutdown_rx.clone(),
                config.sync_interval,
            )),
            tokio::spawn(exec_loop(
                tasks_rx.clone(),
                prober,
                results_tx,
                shutdown_rx,
                config.tick_interval,
            )),
            tokio::spawn(buffer.run()),
        ];

        Self {
            shutdown_tx,
            tasks_rx,
            joins,
        }
    }

    /// The task set currently scheduled
    pub fn current_tasks(&self) -> Vec<Task> {
        self.tasks_rx.borrow().clone()
    }

    /// Stop all loops; pending results get one last flush attempt
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        for join in self.joins {
            if let Err(e) = join.await {
                error!("scheduler loop panicked: {e}");
            }
        }
    }
}

//! HubActor - fans accepted telemetry out to live viewers
//!
//! The actor is the only owner of the viewer set; registration, removal and
//! broadcast are all serialized through its command channel.
//!
//! Every viewer gets its own bounded queue. Delivery uses `try_send`, so a
//! slow viewer never holds up the others: once its queue is full the hub drops
//! its sender, which ends the viewer's stream after the buffered events.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, instrument, trace, warn};

use super::messages::{HostTelemetry, HubCommand, HubEvent, ViewerId};
use crate::HostId;

/// Default outbound queue length per viewer
pub const DEFAULT_VIEWER_QUEUE: usize = 64;

pub struct HubActor {
    viewers: HashMap<ViewerId, mpsc::Sender<HubEvent>>,
    command_rx: mpsc::Receiver<HubCommand>,
}

impl HubActor {
    pub fn new(command_rx: mpsc::Receiver<HubCommand>) -> Self {
        Self {
            viewers: HashMap::new(),
            command_rx,
        }
    }

    #[instrument(skip(self))]
    pub async fn run(mut self) {
        debug!("starting hub actor");

        while let Some(cmd) = self.command_rx.recv().await {
            match cmd {
                HubCommand::Register { viewer_id, sender } => {
                    if self.viewers.contains_key(&viewer_id) {
                        debug!("viewer {viewer_id} is already registered");
                        continue;
                    }
                    self.viewers.insert(viewer_id, sender);
                    info!("viewer {viewer_id} registered ({} live)", self.viewers.len());
                }
                HubCommand::Unregister { viewer_id } => {
                    if self.viewers.remove(&viewer_id).is_some() {
                        info!("viewer {viewer_id} unregistered ({} live)", self.viewers.len());
                    }
                }
                HubCommand::Update(telemetry) => {
                    self.broadcast(HubEvent::HostTelemetryUpdated(*telemetry));
                }
                HubCommand::RemoveHost { host_id } => {
                    self.broadcast(HubEvent::HostRemoved { host_id });
                }
                HubCommand::ViewerCount { respond_to } => {
                    let _ = respond_to.send(self.viewers.len());
                }
                HubCommand::Shutdown => {
                    debug!("received shutdown command");
                    break;
                }
            }
        }

        // dropping the senders ends every viewer stream
        self.viewers.clear();
        debug!("hub actor stopped");
    }

    fn broadcast(&mut self, event: HubEvent) {
        trace!(
            "broadcasting event for host {} to {} viewers",
            event.host_id(),
            self.viewers.len()
        );

        self.viewers
            .retain(|viewer_id, sender| match sender.try_send(event.clone()) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    warn!("viewer {viewer_id} is not keeping up, disconnecting it");
                    false
                }
                Err(TrySendError::Closed(_)) => {
                    debug!("viewer {viewer_id} went away");
                    false
                }
            });
    }
}

/// Handle for the HubActor
#[derive(Clone)]
pub struct HubHandle {
    sender: mpsc::Sender<HubCommand>,
    next_viewer_id: Arc<AtomicU64>,
    queue_capacity: usize,
}

impl HubHandle {
    pub fn spawn(queue_capacity: usize) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(1024);

        let actor = HubActor::new(cmd_rx);
        tokio::spawn(actor.run());

        Self {
            sender: cmd_tx,
            next_viewer_id: Arc::new(AtomicU64::new(1)),
            queue_capacity: queue_capacity.max(1),
        }
    }

    async fn send(&self, cmd: HubCommand) {
        if self.sender.send(cmd).await.is_err() {
            debug!("hub actor is gone");
        }
    }

    /// Register a new viewer and return its id and event stream
    pub async fn connect(&self) -> (ViewerId, mpsc::Receiver<HubEvent>) {
        let viewer_id = self.next_viewer_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.queue_capacity);
        self.register(viewer_id, tx).await;
        (viewer_id, rx)
    }

    pub async fn register(&self, viewer_id: ViewerId, sender: mpsc::Sender<HubEvent>) {
        self.send(HubCommand::Register { viewer_id, sender }).await;
    }

    pub async fn unregister(&self, viewer_id: ViewerId) {
        self.send(HubCommand::Unregister { viewer_id }).await;
    }

    pub async fn update(&self, telemetry: HostTelemetry) {
        self.send(HubCommand::Update(Box::new(telemetry))).await;
    }

    pub async fn remove_host(&self, host_id: HostId) {
        self.send(HubCommand::RemoveHost { host_id }).await;
    }

    pub async fn viewer_count(&self) -> usize {
        let (tx, rx) = oneshot::channel();
        if self
            .sender
            .send(HubCommand::ViewerCount { respond_to: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }

    pub async fn shutdown(&self) {
        self.send(HubCommand::Shutdown).await;
    }
}

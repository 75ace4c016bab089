//! API shared state containing actor handles

use std::sync::Arc;

use crate::actors::{hub::HubHandle, storage::StorageHandle};
use crate::ingest::PulseIngestor;
use crate::storage::StorageBackend;

/// Shared state passed to all API handlers
#[derive(Clone)]
pub struct ApiState {
    /// Read side of the persistence store
    pub backend: Arc<dyn StorageBackend>,

    /// Handle to storage actor for write-queue statistics
    pub storage: StorageHandle,

    /// Live distribution hub, for stream connections
    pub hub: HubHandle,

    /// Pulse, task and report ingestion
    pub ingestor: Arc<PulseIngestor>,
}

impl ApiState {
    pub fn new(
        backend: Arc<dyn StorageBackend>,
        storage: StorageHandle,
        hub: HubHandle,
        ingestor: Arc<PulseIngestor>,
    ) -> Self {
        Self {
            backend,
            storage,
            hub,
            ingestor,
        }
    }
}

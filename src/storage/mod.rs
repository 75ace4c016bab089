//! Persistence store for the host registry and telemetry history
//!
//! ## Design
//!
//! - **Trait-based**: `StorageBackend` allows swapping implementations
//! - **Async**: all operations are async for use from Tokio actors
//! - **Batch-oriented**: the `StorageActor` groups writes before they land here
//!
//! ## Backends
//!
//! - **SQLite** (default): embedded database with sqlx migrations
//! - **In-Memory**: no persistence, for tests and throwaway hubs

pub mod backend;
pub mod error;
pub mod memory;
pub mod schema;
#[cfg(feature = "storage-sqlite")]
pub mod sqlite;

use std::sync::Arc;

use tracing::info;

pub use backend::{HealthStatus, StorageBackend};
pub use error::{StorageError, StorageResult};
pub use memory::MemoryBackend;
pub use schema::{
    HostRecord, HostRegistration, HostStateUpdate, ProbeQuery, ProbeResultRow, QueryRange,
    SnapshotRow, StatusEventRow, StatusPage, TaskRow,
};

use crate::Task;
use crate::config::{Config, StorageConfig};

/// Open the backend selected by the configuration
pub async fn open_backend(config: &StorageConfig) -> StorageResult<Arc<dyn StorageBackend>> {
    match config {
        StorageConfig::None => {
            info!("using in-memory storage, nothing will be persisted");
            Ok(Arc::new(MemoryBackend::new()))
        }
        #[cfg(feature = "storage-sqlite")]
        StorageConfig::Sqlite { path, .. } => Ok(Arc::new(sqlite::SqliteBackend::new(path).await?)),
        #[cfg(not(feature = "storage-sqlite"))]
        StorageConfig::Sqlite { .. } => Err(StorageError::ConnectionFailed(
            "built without the storage-sqlite feature".to_string(),
        )),
    }
}

/// Write the configured hosts and their tasks into the registry
pub async fn seed_registry(backend: &dyn StorageBackend, config: &Config) -> StorageResult<()> {
    for entry in &config.hosts {
        backend.register_host(HostRegistration::from(entry)).await?;

        let tasks = entry
            .tasks
            .iter()
            .map(|t| TaskRow {
                host_id: entry.id,
                label: t.label.clone(),
                // agents are never served a zero frequency
                task: Task {
                    frequency: t.task.frequency_secs(),
                    ..t.task.clone()
                },
            })
            .collect();
        backend.upsert_tasks(entry.id, tasks).await?;
    }

    info!("seeded {} hosts into the registry", config.hosts.len());
    Ok(())
}

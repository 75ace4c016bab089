//! Storage backend trait definition
//!
//! This module defines the core `StorageBackend` trait that all
//! storage implementations must implement.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::error::StorageResult;
use super::schema::{
    HostRecord, HostRegistration, HostStateUpdate, ProbeQuery, ProbeResultRow, QueryRange,
    SnapshotRow, StatusEventRow, StatusPage, TaskRow,
};
use crate::{HostId, TaskId};

/// Health status of the storage backend
#[derive(Debug, Clone)]
pub struct HealthStatus {
    /// Is the backend operational?
    pub healthy: bool,

    /// Human-readable status message
    pub message: String,

    /// Additional backend-specific metadata
    pub metadata: std::collections::HashMap<String, String>,
}

/// Trait for persistent storage backends
///
/// The trait is designed to be:
///
/// - **Async**: All methods are async for compatibility with Tokio
/// - **Batch-oriented**: writes arrive in batches from the `StorageActor`
/// - **Queryable**: time-range and paginated reads for dashboards
///
/// Implementations must be `Send + Sync` as they are shared between the
/// storage actor, the ingestion path and the API.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    // ========================================================================
    // Host registry
    // ========================================================================

    /// Insert a host or refresh its registry columns.
    ///
    /// Derived traffic state of an existing host is left untouched.
    async fn register_host(&self, host: HostRegistration) -> StorageResult<()>;

    async fn get_host(&self, id: HostId) -> StorageResult<Option<HostRecord>>;

    /// Resolve a host by its monitor secret
    async fn find_host_by_secret(&self, secret: &str) -> StorageResult<Option<HostRecord>>;

    /// All hosts ordered by id
    async fn list_hosts(&self) -> StorageResult<Vec<HostRecord>>;

    /// Apply coalesced state writes in one transaction
    async fn update_host_states(&self, updates: Vec<HostStateUpdate>) -> StorageResult<()>;

    async fn set_monitor_enabled(&self, id: HostId, enabled: bool) -> StorageResult<()>;

    // ========================================================================
    // Network tasks
    // ========================================================================

    /// Replace the task set of a host
    async fn upsert_tasks(&self, host_id: HostId, tasks: Vec<TaskRow>) -> StorageResult<()>;

    async fn list_tasks(&self, host_id: HostId) -> StorageResult<Vec<TaskRow>>;

    async fn get_task(&self, id: TaskId) -> StorageResult<Option<TaskRow>>;

    // ========================================================================
    // Probe results
    // ========================================================================

    async fn insert_probe_results(&self, results: Vec<ProbeResultRow>) -> StorageResult<()>;

    /// Results of one task since a point in time, oldest first
    async fn query_probe_results(&self, query: ProbeQuery) -> StorageResult<Vec<ProbeResultRow>>;

    /// Returns the number of rows deleted.
    async fn cleanup_probe_results(&self, before: DateTime<Utc>) -> StorageResult<usize>;

    // ========================================================================
    // Snapshots and status events
    // ========================================================================

    async fn insert_snapshots(&self, snapshots: Vec<SnapshotRow>) -> StorageResult<()>;

    /// Snapshots of one host within a time range, oldest first
    async fn query_snapshots(&self, query: QueryRange) -> StorageResult<Vec<SnapshotRow>>;

    /// Returns the number of rows deleted.
    async fn cleanup_snapshots(&self, before: DateTime<Utc>) -> StorageResult<usize>;

    async fn insert_status_events(&self, events: Vec<StatusEventRow>) -> StorageResult<()>;

    /// Status history of a host, newest first. `page` starts at 1.
    async fn query_status_events(
        &self,
        host_id: HostId,
        page: u32,
        page_size: u32,
    ) -> StorageResult<StatusPage>;

    // ========================================================================
    // Maintenance
    // ========================================================================

    /// Check backend health
    ///
    /// Performs a lightweight operation to verify the backend
    /// is operational (e.g., ping database, check file access).
    async fn health_check(&self) -> StorageResult<HealthStatus>;

    /// Human readable statistics about the backend
    async fn get_stats(&self) -> StorageResult<String>;

    /// Close the backend and release resources
    async fn close(&self) -> StorageResult<()>;
}

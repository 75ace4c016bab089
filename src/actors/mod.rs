//! Actor-based telemetry pipeline
//!
//! Each actor runs as an independent async task and is driven through a
//! cloneable handle wrapping its command channel.
//!
//! ## Hub side
//!
//! ```text
//!   agent pulse ──► PulseIngestor ──► HostAccountant (one per host)
//!                        │                    │
//!                        │                    └──► StorageActor ──► StorageBackend
//!                        ├──► Notifier (spawned)
//!                        └──► HubActor ──► viewer queues (one per connection)
//!
//!   OfflineSweeper ──► HostAccountant::check_stale
//! ```
//!
//! ## Agent side
//!
//! ```text
//!   sync loop ──watch──► exec loop ──► probes ──mpsc──► ReportBuffer ──► hub
//!   PulseReporter ──────────────────────────────────────────────────► hub
//! ```
//!
//! ## Communication Patterns
//!
//! 1. **Commands**: Each actor has an mpsc command channel for control messages
//! 2. **Fan-out**: the hub actor owns one bounded queue per viewer
//! 3. **Request/Response**: oneshot channels for synchronous queries

pub mod accountant;
pub mod hub;
pub mod messages;
pub mod pulse_reporter;
pub mod scheduler;
pub mod storage;
pub mod sweeper;

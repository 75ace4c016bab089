//! SQLite storage backend implementation
//!
//! - **Embedded**: no separate database server required
//! - **WAL mode**: readers (API queries) do not block the storage actor's writes
//! - **Migrations**: schema versioning with sqlx, see `migrations/`
//!
//! Unsigned counters are stored as `INTEGER` by reinterpreting them as `i64`,
//! which round-trips losslessly. Timestamps are Unix milliseconds.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Pool, Row, Sqlite};
use tracing::{debug, info, instrument, warn};

use super::backend::{HealthStatus, StorageBackend};
use super::error::{StorageError, StorageResult};
use super::schema::{
    HostRecord, HostRegistration, HostStateUpdate, ProbeQuery, ProbeResultRow, QueryRange,
    SnapshotRow, StatusEventRow, StatusPage, TaskRow,
};
use crate::accounting::{HostStatus, HostTrafficState};
use crate::{HostId, ProbeResult, Task, TaskId};

const HOST_COLUMNS: &str = "id, name, secret, monitor_enabled, agent_version, settings, \
     monthly_rx, monthly_tx, last_raw_rx, last_raw_tx, last_reset_date, traffic_alerted, \
     status, last_pulse_at";

/// SQLite storage backend
pub struct SqliteBackend {
    pool: Pool<Sqlite>,
    db_path: String,
}

impl SqliteBackend {
    /// Create a new SQLite backend
    ///
    /// Creates the database file if it doesn't exist and runs migrations.
    #[instrument(skip_all)]
    pub async fn new(db_path: impl AsRef<Path>) -> StorageResult<Self> {
        let db_path_str = db_path.as_ref().to_string_lossy().to_string();

        info!("initializing SQLite backend at: {}", db_path_str);

        let options = SqliteConnectOptions::new()
            .filename(&db_path_str)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::ConnectionFailed(e.to_string()))?;

        debug!("running database migrations");
        sqlx::migrate!("./migrations").run(&pool).await?;
        info!("database migrations complete");

        Ok(Self {
            pool,
            db_path: db_path_str,
        })
    }

    fn timestamp_to_millis(dt: &DateTime<Utc>) -> i64 {
        dt.timestamp_millis()
    }

    fn millis_to_timestamp(millis: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(millis).unwrap_or_else(Utc::now)
    }

    fn host_from_row(row: &SqliteRow) -> StorageResult<HostRecord> {
        let settings: String = row.try_get("settings")?;
        let last_reset_date = row
            .try_get::<Option<String>, _>("last_reset_date")?
            .and_then(|d| NaiveDate::parse_from_str(&d, "%Y-%m-%d").ok());
        let status: String = row.try_get("status")?;

        Ok(HostRecord {
            id: row.try_get::<i64, _>("id")? as u64,
            name: row.try_get("name")?,
            secret: row.try_get("secret")?,
            monitor_enabled: row.try_get("monitor_enabled")?,
            agent_version: row.try_get("agent_version")?,
            settings: serde_json::from_str(&settings)?,
            state: HostTrafficState {
                monthly_rx: row.try_get::<i64, _>("monthly_rx")? as u64,
                monthly_tx: row.try_get::<i64, _>("monthly_tx")? as u64,
                last_raw_rx: row.try_get::<i64, _>("last_raw_rx")? as u64,
                last_raw_tx: row.try_get::<i64, _>("last_raw_tx")? as u64,
                last_reset_date,
                traffic_alerted: row.try_get("traffic_alerted")?,
                status: HostStatus::parse(&status),
                last_pulse_at: row
                    .try_get::<Option<i64>, _>("last_pulse_at")?
                    .map(Self::millis_to_timestamp),
            },
        })
    }

    fn task_from_row(row: &SqliteRow) -> StorageResult<TaskRow> {
        let kind: String = row.try_get("kind")?;
        Ok(TaskRow {
            host_id: row.try_get::<i64, _>("host_id")? as u64,
            label: row.try_get("label")?,
            task: Task {
                id: row.try_get::<i64, _>("id")? as u64,
                kind: kind
                    .parse()
                    .map_err(|e: anyhow::Error| StorageError::SerializationError(e.to_string()))?,
                target: row.try_get("target")?,
                port: row
                    .try_get::<Option<i64>, _>("port")?
                    .and_then(|p| u16::try_from(p).ok()),
                frequency: row.try_get::<i64, _>("frequency")? as u64,
            },
        })
    }

    fn snapshot_from_row(row: &SqliteRow) -> StorageResult<SnapshotRow> {
        Ok(SnapshotRow {
            host_id: row.try_get::<i64, _>("host_id")? as u64,
            timestamp: Self::millis_to_timestamp(row.try_get("timestamp")?),
            cpu: row.try_get("cpu")?,
            mem_used: row.try_get::<i64, _>("mem_used")? as u64,
            mem_total: row.try_get::<i64, _>("mem_total")? as u64,
            disk_used: row.try_get::<i64, _>("disk_used")? as u64,
            disk_total: row.try_get::<i64, _>("disk_total")? as u64,
            net_rx: row.try_get::<i64, _>("net_rx")? as u64,
            net_tx: row.try_get::<i64, _>("net_tx")? as u64,
            monthly_rx: row.try_get::<i64, _>("monthly_rx")? as u64,
            monthly_tx: row.try_get::<i64, _>("monthly_tx")? as u64,
        })
    }
}

#[async_trait]
impl StorageBackend for SqliteBackend {
    #[instrument(skip(self, host), fields(host_id = host.id))]
    async fn register_host(&self, host: HostRegistration) -> StorageResult<()> {
        let settings = serde_json::to_string(&host.settings)?;

        sqlx::query(
            r#"
            INSERT INTO hosts (id, name, secret, monitor_enabled, settings)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT (id) DO UPDATE SET
                name = excluded.name,
                secret = excluded.secret,
                monitor_enabled = MAX(hosts.monitor_enabled, excluded.monitor_enabled),
                settings = excluded.settings
            "#,
        )
        .bind(host.id as i64)
        .bind(&host.name)
        .bind(&host.secret)
        .bind(host.monitor_enabled)
        .bind(settings)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_host(&self, id: HostId) -> StorageResult<Option<HostRecord>> {
        let sql = format!("SELECT {HOST_COLUMNS} FROM hosts WHERE id = ?");
        let row = sqlx::query(&sql)
            .bind(id as i64)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::host_from_row).transpose()
    }

    async fn find_host_by_secret(&self, secret: &str) -> StorageResult<Option<HostRecord>> {
        let sql = format!("SELECT {HOST_COLUMNS} FROM hosts WHERE secret = ?");
        let row = sqlx::query(&sql)
            .bind(secret)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::host_from_row).transpose()
    }

    async fn list_hosts(&self) -> StorageResult<Vec<HostRecord>> {
        let sql = format!("SELECT {HOST_COLUMNS} FROM hosts ORDER BY id ASC");
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;

        rows.iter().map(Self::host_from_row).collect()
    }

    #[instrument(skip(self, updates), fields(count = updates.len()))]
    async fn update_host_states(&self, updates: Vec<HostStateUpdate>) -> StorageResult<()> {
        if updates.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;

        for update in updates {
            let state = &update.state;
            let result = sqlx::query(
                r#"
                UPDATE hosts SET
                    monthly_rx = ?, monthly_tx = ?,
                    last_raw_rx = ?, last_raw_tx = ?,
                    last_reset_date = ?, traffic_alerted = ?,
                    status = ?, last_pulse_at = ?,
                    agent_version = COALESCE(?, agent_version)
                WHERE id = ?
                "#,
            )
            .bind(state.monthly_rx as i64)
            .bind(state.monthly_tx as i64)
            .bind(state.last_raw_rx as i64)
            .bind(state.last_raw_tx as i64)
            .bind(state.last_reset_date.map(|d| d.format("%Y-%m-%d").to_string()))
            .bind(state.traffic_alerted)
            .bind(state.status.as_str())
            .bind(state.last_pulse_at.as_ref().map(Self::timestamp_to_millis))
            .bind(update.agent_version.as_deref())
            .bind(update.host_id as i64)
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() == 0 {
                return Err(StorageError::UnknownHost(update.host_id));
            }
        }

        tx.commit().await?;
        Ok(())
    }

    async fn set_monitor_enabled(&self, id: HostId, enabled: bool) -> StorageResult<()> {
        let result = sqlx::query("UPDATE hosts SET monitor_enabled = ? WHERE id = ?")
            .bind(enabled)
            .bind(id as i64)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::UnknownHost(id));
        }
        Ok(())
    }

    #[instrument(skip(self, tasks), fields(count = tasks.len()))]
    async fn upsert_tasks(&self, host_id: HostId, tasks: Vec<TaskRow>) -> StorageResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM network_tasks WHERE host_id = ?")
            .bind(host_id as i64)
            .execute(&mut *tx)
            .await?;

        for row in tasks {
            sqlx::query(
                r#"
                INSERT INTO network_tasks (id, host_id, kind, target, port, frequency, label)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT (id) DO UPDATE SET
                    host_id = excluded.host_id,
                    kind = excluded.kind,
                    target = excluded.target,
                    port = excluded.port,
                    frequency = excluded.frequency,
                    label = excluded.label
                "#,
            )
            .bind(row.task.id as i64)
            .bind(host_id as i64)
            .bind(row.task.kind.as_str())
            .bind(&row.task.target)
            .bind(row.task.port.map(i64::from))
            .bind(row.task.frequency as i64)
            .bind(row.label.as_deref())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn list_tasks(&self, host_id: HostId) -> StorageResult<Vec<TaskRow>> {
        let rows = sqlx::query(
            "SELECT id, host_id, kind, target, port, frequency, label \
             FROM network_tasks WHERE host_id = ? ORDER BY id ASC",
        )
        .bind(host_id as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::task_from_row).collect()
    }

    async fn get_task(&self, id: TaskId) -> StorageResult<Option<TaskRow>> {
        let row = sqlx::query(
            "SELECT id, host_id, kind, target, port, frequency, label \
             FROM network_tasks WHERE id = ?",
        )
        .bind(id as i64)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::task_from_row).transpose()
    }

    #[instrument(skip(self, results), fields(count = results.len()))]
    async fn insert_probe_results(&self, results: Vec<ProbeResultRow>) -> StorageResult<()> {
        if results.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for row in results {
            sqlx::query(
                r#"
                INSERT INTO probe_results
                    (task_id, host_id, success, latency_ms, packet_loss_pct, observed_at)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(row.result.task_id as i64)
            .bind(row.host_id as i64)
            .bind(row.result.success)
            .bind(row.result.latency_ms)
            .bind(row.result.packet_loss_pct)
            .bind(Self::timestamp_to_millis(&row.result.observed_at))
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        Ok(())
    }

    async fn query_probe_results(&self, query: ProbeQuery) -> StorageResult<Vec<ProbeResultRow>> {
        let rows = sqlx::query(
            r#"
            SELECT task_id, host_id, success, latency_ms, packet_loss_pct, observed_at
            FROM probe_results
            WHERE task_id = ? AND observed_at >= ?
            ORDER BY observed_at ASC
            "#,
        )
        .bind(query.task_id as i64)
        .bind(Self::timestamp_to_millis(&query.since))
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(ProbeResultRow {
                    host_id: row.try_get::<i64, _>("host_id")? as u64,
                    result: ProbeResult {
                        task_id: row.try_get::<i64, _>("task_id")? as u64,
                        success: row.try_get("success")?,
                        latency_ms: row.try_get("latency_ms")?,
                        packet_loss_pct: row.try_get("packet_loss_pct")?,
                        observed_at: Self::millis_to_timestamp(row.try_get("observed_at")?),
                    },
                })
            })
            .collect()
    }

    #[instrument(skip(self), fields(before = %before))]
    async fn cleanup_probe_results(&self, before: DateTime<Utc>) -> StorageResult<usize> {
        let result = sqlx::query("DELETE FROM probe_results WHERE observed_at < ?")
            .bind(Self::timestamp_to_millis(&before))
            .execute(&self.pool)
            .await?;

        let deleted = result.rows_affected() as usize;
        info!("deleted {} old probe results", deleted);
        Ok(deleted)
    }

    #[instrument(skip(self, snapshots), fields(count = snapshots.len()))]
    async fn insert_snapshots(&self, snapshots: Vec<SnapshotRow>) -> StorageResult<()> {
        if snapshots.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for s in snapshots {
            sqlx::query(
                r#"
                INSERT INTO pulse_snapshots (
                    host_id, timestamp, cpu, mem_used, mem_total, disk_used, disk_total,
                    net_rx, net_tx, monthly_rx, monthly_tx
                )
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(s.host_id as i64)
            .bind(Self::timestamp_to_millis(&s.timestamp))
            .bind(s.cpu)
            .bind(s.mem_used as i64)
            .bind(s.mem_total as i64)
            .bind(s.disk_used as i64)
            .bind(s.disk_total as i64)
            .bind(s.net_rx as i64)
            .bind(s.net_tx as i64)
            .bind(s.monthly_rx as i64)
            .bind(s.monthly_tx as i64)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        Ok(())
    }

    #[instrument(skip(self), fields(host_id = query.host_id))]
    async fn query_snapshots(&self, query: QueryRange) -> StorageResult<Vec<SnapshotRow>> {
        let limit_clause = query
            .limit
            .map(|l| format!("LIMIT {}", l))
            .unwrap_or_default();

        let sql = format!(
            r#"
            SELECT host_id, timestamp, cpu, mem_used, mem_total, disk_used, disk_total,
                   net_rx, net_tx, monthly_rx, monthly_tx
            FROM pulse_snapshots
            WHERE host_id = ? AND timestamp >= ? AND timestamp <= ?
            ORDER BY timestamp ASC
            {}
            "#,
            limit_clause
        );

        let rows = sqlx::query(&sql)
            .bind(query.host_id as i64)
            .bind(Self::timestamp_to_millis(&query.start))
            .bind(Self::timestamp_to_millis(&query.end))
            .fetch_all(&self.pool)
            .await?;

        let results: Vec<SnapshotRow> = rows
            .iter()
            .map(Self::snapshot_from_row)
            .collect::<StorageResult<_>>()?;
        debug!("query returned {} snapshots", results.len());
        Ok(results)
    }

    #[instrument(skip(self), fields(before = %before))]
    async fn cleanup_snapshots(&self, before: DateTime<Utc>) -> StorageResult<usize> {
        let result = sqlx::query("DELETE FROM pulse_snapshots WHERE timestamp < ?")
            .bind(Self::timestamp_to_millis(&before))
            .execute(&self.pool)
            .await?;

        let deleted = result.rows_affected() as usize;
        info!("deleted {} old snapshots", deleted);
        Ok(deleted)
    }

    async fn insert_status_events(&self, events: Vec<StatusEventRow>) -> StorageResult<()> {
        if events.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for event in events {
            sqlx::query("INSERT INTO status_events (host_id, status, timestamp) VALUES (?, ?, ?)")
                .bind(event.host_id as i64)
                .bind(event.status.as_str())
                .bind(Self::timestamp_to_millis(&event.timestamp))
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        Ok(())
    }

    async fn query_status_events(
        &self,
        host_id: HostId,
        page: u32,
        page_size: u32,
    ) -> StorageResult<StatusPage> {
        let page = page.max(1);

        let (total,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM status_events WHERE host_id = ?")
            .bind(host_id as i64)
            .fetch_one(&self.pool)
            .await?;

        let rows = sqlx::query(
            r#"
            SELECT host_id, status, timestamp
            FROM status_events
            WHERE host_id = ?
            ORDER BY timestamp DESC, id DESC
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(host_id as i64)
        .bind(i64::from(page_size))
        .bind(i64::from(page - 1) * i64::from(page_size))
        .fetch_all(&self.pool)
        .await?;

        let items = rows
            .iter()
            .map(|row| {
                let status: String = row.try_get("status")?;
                Ok(StatusEventRow {
                    host_id: row.try_get::<i64, _>("host_id")? as u64,
                    status: HostStatus::parse(&status),
                    timestamp: Self::millis_to_timestamp(row.try_get("timestamp")?),
                })
            })
            .collect::<StorageResult<_>>()?;

        Ok(StatusPage {
            items,
            total: total as u64,
            page,
            page_size,
        })
    }

    #[instrument(skip(self))]
    async fn health_check(&self) -> StorageResult<HealthStatus> {
        match sqlx::query("SELECT 1").fetch_one(&self.pool).await {
            Ok(_) => {
                let mut metadata = HashMap::new();
                metadata.insert("backend".to_string(), "sqlite".to_string());
                metadata.insert("db_path".to_string(), self.db_path.clone());

                Ok(HealthStatus {
                    healthy: true,
                    message: "SQLite backend operational".to_string(),
                    metadata,
                })
            }
            Err(e) => {
                warn!("health check failed: {}", e);
                Ok(HealthStatus {
                    healthy: false,
                    message: format!("health check failed: {}", e),
                    metadata: HashMap::new(),
                })
            }
        }
    }

    #[instrument(skip(self))]
    async fn get_stats(&self) -> StorageResult<String> {
        let (hosts,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM hosts")
            .fetch_one(&self.pool)
            .await?;
        let (snapshots,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM pulse_snapshots")
            .fetch_one(&self.pool)
            .await?;
        let (results,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM probe_results")
            .fetch_one(&self.pool)
            .await?;

        let file_size = std::fs::metadata(&self.db_path)
            .map(|m| m.len())
            .unwrap_or(0);
        let file_size_mb = file_size as f64 / 1_000_000.0;

        Ok(format!(
            "SQLite: {} hosts, {} snapshots, {} probe results, {:.2} MB on disk",
            hosts, snapshots, results, file_size_mb
        ))
    }

    async fn close(&self) -> StorageResult<()> {
        info!("closing SQLite backend");
        self.pool.close().await;
        Ok(())
    }
}

//! `SQLite`-backed implementation of [`WorkloadStore`].
//!
//! Uses a single `Mutex<Connection>` for thread safety; every trait method
//! holds the lock for its whole duration, which makes each one atomic.
//! The [`StreamTrackingStore`](crate::StreamTrackingStore) impl for the same
//! type lives in `tracking.rs`.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{
    params, params_from_iter, Connection, OptionalExtension, Row, Transaction, TransactionBehavior,
};
use syncwork_types::workload::{
    MutexPolicy, NewWorkload, QueueStats, StatusChange, Workload, WorkloadFilter, WorkloadId,
    WorkloadPriority, WorkloadStatus, WorkloadType,
};
use uuid::Uuid;

use crate::backend::{InsertOutcome, WorkloadStore, SUPERSEDED_SOURCE};
use crate::error::{self, StateError};

/// How long a writer waits for another connection's write lock.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Idempotent DDL for all tables.
const CREATE_TABLES: &str = r"
CREATE TABLE IF NOT EXISTS workloads (
    id TEXT PRIMARY KEY,
    workload_type TEXT NOT NULL,
    priority INTEGER NOT NULL DEFAULT 0,
    status TEXT NOT NULL,
    mutex_key TEXT,
    labels TEXT NOT NULL DEFAULT '{}',
    input_payload TEXT NOT NULL,
    log_path TEXT NOT NULL,
    auto_id TEXT NOT NULL UNIQUE,
    dataplane_group TEXT NOT NULL DEFAULT '',
    dataplane_id TEXT,
    signal_input TEXT,
    start_time_ms INTEGER,
    deadline TEXT,
    last_heartbeat_at TEXT,
    termination_source TEXT,
    termination_reason TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_workloads_mutex_status ON workloads (mutex_key, status);
CREATE INDEX IF NOT EXISTS idx_workloads_queue ON workloads (status, dataplane_group, priority, created_at);

CREATE TABLE IF NOT EXISTS stream_generations (
    connection_id TEXT NOT NULL,
    stream_name TEXT NOT NULL,
    stream_namespace TEXT NOT NULL DEFAULT '',
    generation_id INTEGER NOT NULL,
    start_job_id INTEGER NOT NULL,
    created_at TEXT NOT NULL,
    PRIMARY KEY (connection_id, stream_name, stream_namespace, generation_id)
);

CREATE TABLE IF NOT EXISTS stream_refreshes (
    connection_id TEXT NOT NULL,
    stream_name TEXT NOT NULL,
    stream_namespace TEXT NOT NULL DEFAULT '',
    refresh_type TEXT NOT NULL,
    created_at TEXT NOT NULL,
    PRIMARY KEY (connection_id, stream_name, stream_namespace)
);
";

const WORKLOAD_COLUMNS: &str = "id, workload_type, priority, status, mutex_key, labels, \
     input_payload, log_path, auto_id, dataplane_group, dataplane_id, signal_input, \
     start_time_ms, deadline, last_heartbeat_at, termination_source, termination_reason, \
     created_at, updated_at";

const ACTIVE_STATUSES_SQL: &str = "('pending', 'claimed', 'launched', 'running')";

const SUPERSEDED_REASON: &str = "Superseded by a newer workload holding the same mutex key";

/// `SQLite`-backed storage for workloads and stream tracking.
///
/// Create with [`SqliteStore::open`] for file-backed persistence or
/// [`SqliteStore::in_memory`] for tests.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create a `SQLite` database at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Io`] if the directory can't be created,
    /// or [`StateError::Sqlite`] if the database can't be opened.
    pub fn open(path: &Path) -> error::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch(CREATE_TABLES)?;
        tracing::debug!(path = %path.display(), "Opened workload store");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory `SQLite` store (for testing).
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Sqlite`] if the in-memory database can't be
    /// initialized.
    pub fn in_memory() -> error::Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(CREATE_TABLES)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Start a write transaction. The write lock is taken up front so a
    /// second process waits on the busy timeout instead of failing its
    /// lock upgrade halfway through.
    pub(crate) fn write_tx(conn: &mut Connection) -> error::Result<Transaction<'_>> {
        Ok(conn.transaction_with_behavior(TransactionBehavior::Immediate)?)
    }

    /// Acquire the connection lock.
    pub(crate) fn lock_conn(&self) -> error::Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StateError::LockPoisoned)
    }
}

// ---------------------------------------------------------------------------
// Column codecs
// ---------------------------------------------------------------------------

/// Fixed-width UTC format so lexicographic order matches time order.
pub(crate) fn to_db_time(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn from_db_time(column: &'static str, raw: &str) -> error::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| StateError::Corrupt {
            column,
            value: raw.to_string(),
        })
}

fn opt_time(column: &'static str, raw: Option<String>) -> error::Result<Option<DateTime<Utc>>> {
    raw.map(|r| from_db_time(column, &r)).transpose()
}

/// Raw column values of one `workloads` row.
struct WorkloadRow {
    id: String,
    workload_type: String,
    priority: i64,
    status: String,
    mutex_key: Option<String>,
    labels: String,
    input_payload: String,
    log_path: String,
    auto_id: String,
    dataplane_group: String,
    dataplane_id: Option<String>,
    signal_input: Option<String>,
    start_time_ms: Option<i64>,
    deadline: Option<String>,
    last_heartbeat_at: Option<String>,
    termination_source: Option<String>,
    termination_reason: Option<String>,
    created_at: String,
    updated_at: String,
}

impl WorkloadRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            workload_type: row.get(1)?,
            priority: row.get(2)?,
            status: row.get(3)?,
            mutex_key: row.get(4)?,
            labels: row.get(5)?,
            input_payload: row.get(6)?,
            log_path: row.get(7)?,
            auto_id: row.get(8)?,
            dataplane_group: row.get(9)?,
            dataplane_id: row.get(10)?,
            signal_input: row.get(11)?,
            start_time_ms: row.get(12)?,
            deadline: row.get(13)?,
            last_heartbeat_at: row.get(14)?,
            termination_source: row.get(15)?,
            termination_reason: row.get(16)?,
            created_at: row.get(17)?,
            updated_at: row.get(18)?,
        })
    }

    fn into_workload(self) -> error::Result<Workload> {
        let workload_type =
            WorkloadType::parse(&self.workload_type).ok_or_else(|| StateError::Corrupt {
                column: "workload_type",
                value: self.workload_type.clone(),
            })?;
        let status = WorkloadStatus::parse(&self.status).ok_or_else(|| StateError::Corrupt {
            column: "status",
            value: self.status.clone(),
        })?;
        let auto_id = Uuid::parse_str(&self.auto_id).map_err(|_| StateError::Corrupt {
            column: "auto_id",
            value: self.auto_id.clone(),
        })?;
        let labels: BTreeMap<String, String> = serde_json::from_str(&self.labels)?;

        Ok(Workload {
            id: WorkloadId::new(self.id),
            workload_type,
            priority: WorkloadPriority::from_int(self.priority),
            status,
            mutex_key: self.mutex_key,
            labels,
            input_payload: self.input_payload,
            log_path: self.log_path,
            auto_id,
            dataplane_group: self.dataplane_group,
            dataplane_id: self.dataplane_id,
            signal_input: self.signal_input,
            start_time_ms: self.start_time_ms,
            deadline: opt_time("deadline", self.deadline)?,
            last_heartbeat_at: opt_time("last_heartbeat_at", self.last_heartbeat_at)?,
            termination_source: self.termination_source,
            termination_reason: self.termination_reason,
            created_at: from_db_time("created_at", &self.created_at)?,
            updated_at: from_db_time("updated_at", &self.updated_at)?,
        })
    }
}

/// Run `SELECT <columns> FROM workloads <tail>` and decode every row.
fn select_workloads<P: rusqlite::Params>(
    conn: &Connection,
    tail: &str,
    params: P,
) -> error::Result<Vec<Workload>> {
    let sql = format!("SELECT {WORKLOAD_COLUMNS} FROM workloads {tail}");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params, WorkloadRow::read)?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?.into_workload()?);
    }
    Ok(out)
}

/// `column IN (?n, ...)` with placeholders numbered after `offset`.
fn in_clause(column: &str, count: usize, offset: usize) -> String {
    let placeholders: Vec<String> = (1..=count).map(|i| format!("?{}", offset + i)).collect();
    format!("{column} IN ({})", placeholders.join(", "))
}

fn where_sql(clauses: &[String]) -> String {
    if clauses.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", clauses.join(" AND "))
    }
}

/// Append optional `dataplane_group` / `priority` filters for pending queues.
fn queue_filters(
    dataplane_group: Option<&str>,
    priority: Option<WorkloadPriority>,
) -> (Vec<String>, Vec<String>) {
    let mut clauses = vec!["status = 'pending'".to_string()];
    let mut values = Vec::new();
    if let Some(group) = dataplane_group {
        values.push(group.to_string());
        clauses.push(format!("dataplane_group = ?{}", values.len()));
    }
    if let Some(priority) = priority {
        values.push(priority.as_int().to_string());
        clauses.push(format!("priority = CAST(?{} AS INTEGER)", values.len()));
    }
    (clauses, values)
}

impl WorkloadStore for SqliteStore {
    fn insert(&self, workload: &NewWorkload, policy: MutexPolicy) -> error::Result<InsertOutcome> {
        let mut conn = self.lock_conn()?;
        let tx = Self::write_tx(&mut conn)?;

        let replayed = select_workloads(
            &tx,
            "WHERE auto_id = ?1",
            [workload.auto_id.to_string()],
        )?;
        if let Some(existing) = replayed.into_iter().next() {
            return Ok(InsertOutcome::Replayed(existing));
        }

        let id_taken: bool = tx.query_row(
            "SELECT EXISTS(SELECT 1 FROM workloads WHERE id = ?1)",
            [workload.id.as_str()],
            |row| row.get(0),
        )?;
        if id_taken {
            return Ok(InsertOutcome::IdConflict);
        }

        let now = Utc::now();
        let now_db = to_db_time(now);
        let mut superseded = Vec::new();

        if let Some(key) = &workload.mutex_key {
            let holders = select_workloads(
                &tx,
                &format!("WHERE mutex_key = ?1 AND status IN {ACTIVE_STATUSES_SQL} ORDER BY created_at"),
                [key.as_str()],
            )?;
            if let Some(first) = holders.first() {
                if policy == MutexPolicy::Reject {
                    return Ok(InsertOutcome::MutexHeld(first.id.clone()));
                }
                for holder in holders {
                    tx.execute(
                        "UPDATE workloads SET status = ?1, termination_source = ?2, \
                         termination_reason = ?3, updated_at = ?4 WHERE id = ?5",
                        params![
                            WorkloadStatus::Failure.as_str(),
                            SUPERSEDED_SOURCE,
                            SUPERSEDED_REASON,
                            now_db,
                            holder.id.as_str(),
                        ],
                    )?;
                    superseded.push(Workload {
                        status: WorkloadStatus::Failure,
                        termination_source: Some(SUPERSEDED_SOURCE.to_string()),
                        termination_reason: Some(SUPERSEDED_REASON.to_string()),
                        updated_at: now,
                        ..holder
                    });
                }
            }
        }

        let labels = serde_json::to_string(&workload.labels)?;
        tx.execute(
            "INSERT INTO workloads (id, workload_type, priority, status, mutex_key, labels, \
             input_payload, log_path, auto_id, dataplane_group, signal_input, start_time_ms, \
             deadline, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?14)",
            params![
                workload.id.as_str(),
                workload.workload_type.as_str(),
                workload.priority.as_int(),
                WorkloadStatus::Pending.as_str(),
                workload.mutex_key,
                labels,
                workload.input_payload,
                workload.log_path,
                workload.auto_id.to_string(),
                workload.dataplane_group,
                workload.signal_input,
                workload.start_time_ms,
                workload.deadline.map(to_db_time),
                now_db,
            ],
        )?;
        tx.commit()?;

        Ok(InsertOutcome::Created { superseded })
    }

    fn get(&self, id: &WorkloadId) -> error::Result<Option<Workload>> {
        let conn = self.lock_conn()?;
        let row = conn
            .query_row(
                &format!("SELECT {WORKLOAD_COLUMNS} FROM workloads WHERE id = ?1"),
                [id.as_str()],
                WorkloadRow::read,
            )
            .optional()?;
        row.map(WorkloadRow::into_workload).transpose()
    }

    fn compare_and_set_status(
        &self,
        id: &WorkloadId,
        expected: WorkloadStatus,
        next: WorkloadStatus,
        change: &StatusChange,
    ) -> error::Result<bool> {
        let conn = self.lock_conn()?;
        let updated = conn.execute(
            "UPDATE workloads SET status = ?1, updated_at = ?2, \
             deadline = COALESCE(?3, deadline), \
             last_heartbeat_at = COALESCE(?4, last_heartbeat_at), \
             termination_source = COALESCE(?5, termination_source), \
             termination_reason = COALESCE(?6, termination_reason) \
             WHERE id = ?7 AND status = ?8",
            params![
                next.as_str(),
                to_db_time(Utc::now()),
                change.deadline.map(to_db_time),
                change.heartbeat_at.map(to_db_time),
                change.termination_source,
                change.termination_reason,
                id.as_str(),
                expected.as_str(),
            ],
        )?;
        Ok(updated > 0)
    }

    fn claim(
        &self,
        id: &WorkloadId,
        dataplane_id: &str,
        deadline: Option<DateTime<Utc>>,
    ) -> error::Result<bool> {
        let conn = self.lock_conn()?;
        let updated = conn.execute(
            "UPDATE workloads SET status = ?1, dataplane_id = ?2, \
             deadline = COALESCE(?3, deadline), updated_at = ?4 \
             WHERE id = ?5 AND status = ?6",
            params![
                WorkloadStatus::Claimed.as_str(),
                dataplane_id,
                deadline.map(to_db_time),
                to_db_time(Utc::now()),
                id.as_str(),
                WorkloadStatus::Pending.as_str(),
            ],
        )?;
        Ok(updated > 0)
    }

    fn list(&self, filter: &WorkloadFilter) -> error::Result<Vec<Workload>> {
        let mut clauses = Vec::new();
        let mut values: Vec<String> = Vec::new();

        if let Some(ids) = &filter.dataplane_ids {
            clauses.push(in_clause("dataplane_id", ids.len(), values.len()));
            values.extend(ids.iter().cloned());
        }
        if let Some(statuses) = &filter.statuses {
            clauses.push(in_clause("status", statuses.len(), values.len()));
            values.extend(statuses.iter().map(|s| s.as_str().to_string()));
        }
        if let Some(before) = filter.updated_before {
            values.push(to_db_time(before));
            clauses.push(format!("updated_at < ?{}", values.len()));
        }

        let conn = self.lock_conn()?;
        select_workloads(
            &conn,
            &format!("{} ORDER BY created_at, rowid", where_sql(&clauses)),
            params_from_iter(values.iter()),
        )
    }

    fn list_expired_deadline(
        &self,
        dataplane_ids: Option<&[String]>,
        statuses: Option<&[WorkloadStatus]>,
        cutoff: DateTime<Utc>,
    ) -> error::Result<Vec<Workload>> {
        let statuses = statuses.unwrap_or(&WorkloadStatus::ACTIVE);
        let mut values: Vec<String> = vec![to_db_time(cutoff)];
        let mut clauses = vec!["deadline IS NOT NULL".to_string(), "deadline < ?1".to_string()];

        if let Some(ids) = dataplane_ids {
            clauses.push(in_clause("dataplane_id", ids.len(), values.len()));
            values.extend(ids.iter().cloned());
        }
        clauses.push(in_clause("status", statuses.len(), values.len()));
        values.extend(statuses.iter().map(|s| s.as_str().to_string()));

        let conn = self.lock_conn()?;
        select_workloads(
            &conn,
            &format!("{} ORDER BY id", where_sql(&clauses)),
            params_from_iter(values.iter()),
        )
    }

    fn pending(
        &self,
        dataplane_group: Option<&str>,
        priority: Option<WorkloadPriority>,
        limit: usize,
    ) -> error::Result<Vec<Workload>> {
        let (clauses, values) = queue_filters(dataplane_group, priority);
        let conn = self.lock_conn()?;
        select_workloads(
            &conn,
            &format!(
                "{} ORDER BY created_at, rowid LIMIT {limit}",
                where_sql(&clauses)
            ),
            params_from_iter(values.iter()),
        )
    }

    fn count_pending(
        &self,
        dataplane_group: Option<&str>,
        priority: Option<WorkloadPriority>,
    ) -> error::Result<u64> {
        let (clauses, values) = queue_filters(dataplane_group, priority);
        let conn = self.lock_conn()?;
        let count: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM workloads {}", where_sql(&clauses)),
            params_from_iter(values.iter()),
            |row| row.get(0),
        )?;
        Ok(u64::try_from(count).unwrap_or_default())
    }

    fn queue_stats(&self) -> error::Result<Vec<QueueStats>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(
            "SELECT dataplane_group, priority, COUNT(*) FROM workloads \
             WHERE status = 'pending' \
             GROUP BY dataplane_group, priority \
             ORDER BY dataplane_group, priority DESC",
        )?;
        let rows = stmt.query_map([], |row| {
            let group: String = row.get(0)?;
            let priority: i64 = row.get(1)?;
            let count: i64 = row.get(2)?;
            Ok(QueueStats {
                dataplane_group: group,
                priority: WorkloadPriority::from_int(priority),
                enqueued_count: u64::try_from(count).unwrap_or_default(),
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}

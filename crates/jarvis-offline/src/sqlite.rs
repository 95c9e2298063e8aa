//! SQLite operation store.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use jarvis_protocols::Priority;
use rusqlite::{Row, params};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use tokio_rusqlite::Connection;
use tracing::debug;
use uuid::Uuid;

use crate::error::QueueError;
use crate::operation::{OperationStatus, QueuedOperation};
use crate::schema::init_schema;
use crate::store::OperationStore;

const COLUMNS: &str = "id, op_type, payload, timestamp, retry_count, max_retries, priority, \
                       status, next_retry_at, context, last_error, updated_at";

/// SQLite-backed operation store.
pub struct SqliteOperationStore {
    conn: Connection,
}

impl SqliteOperationStore {
    /// Create a new in-memory database.
    pub async fn in_memory() -> Result<Self, QueueError> {
        let conn = Connection::open_in_memory().await.map_err(QueueError::store)?;
        Self::init(conn).await
    }

    /// Open (or create) a file-backed database.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, QueueError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(QueueError::store)?;
        }
        debug!("Opening operation store at {}", path.display());
        let conn = Connection::open(path).await.map_err(QueueError::store)?;
        Self::init(conn).await
    }

    async fn init(conn: Connection) -> Result<Self, QueueError> {
        conn.call(|conn| Ok(init_schema(conn)?))
            .await
            .map_err(QueueError::store)?;
        Ok(Self { conn })
    }

    async fn query(
        &self,
        sql: String,
        param: Option<String>,
    ) -> Result<Vec<QueuedOperation>, QueueError> {
        let rows = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&sql)?;
                let rows = match &param {
                    Some(p) => stmt.query_map([p], OperationRow::from_row)?,
                    None => stmt.query_map([], OperationRow::from_row)?,
                }
                .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
            .map_err(QueueError::store)?;
        rows.into_iter().map(OperationRow::into_operation).collect()
    }
}

/// Fixed-width UTC timestamps so text order matches time order.
fn timestamp(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(field: &str, value: &str) -> Result<DateTime<Utc>, QueueError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| QueueError::Store(format!("invalid {} '{}': {}", field, value, e)))
}

fn parse_json(field: &str, value: &str) -> Result<Value, QueueError> {
    serde_json::from_str(value)
        .map_err(|e| QueueError::Store(format!("invalid {} '{}': {}", field, value, e)))
}

/// Raw column values, decoded outside the connection thread.
struct OperationRow {
    id: String,
    op_type: String,
    payload: String,
    timestamp: String,
    retry_count: i64,
    max_retries: i64,
    priority: i64,
    status: String,
    next_retry_at: String,
    context: String,
    last_error: Option<String>,
    updated_at: String,
}

impl OperationRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            op_type: row.get(1)?,
            payload: row.get(2)?,
            timestamp: row.get(3)?,
            retry_count: row.get(4)?,
            max_retries: row.get(5)?,
            priority: row.get(6)?,
            status: row.get(7)?,
            next_retry_at: row.get(8)?,
            context: row.get(9)?,
            last_error: row.get(10)?,
            updated_at: row.get(11)?,
        })
    }

    fn into_operation(self) -> Result<QueuedOperation, QueueError> {
        let id = Uuid::parse_str(&self.id)
            .map_err(|e| QueueError::Store(format!("invalid id '{}': {}", self.id, e)))?;
        let status = self.status.parse::<OperationStatus>().map_err(QueueError::Store)?;
        Ok(QueuedOperation {
            id,
            op_type: self.op_type,
            payload: parse_json("payload", &self.payload)?,
            timestamp: parse_timestamp("timestamp", &self.timestamp)?,
            retry_count: self.retry_count.max(0) as u32,
            max_retries: self.max_retries.max(0) as u32,
            priority: Priority::from_rank(self.priority),
            status,
            next_retry_at: parse_timestamp("next_retry_at", &self.next_retry_at)?,
            context: parse_json("context", &self.context)?,
            last_error: self.last_error,
            updated_at: parse_timestamp("updated_at", &self.updated_at)?,
        })
    }
}

/// Column values bound for insert and update.
struct OperationParams {
    id: String,
    op_type: String,
    payload: String,
    timestamp: String,
    retry_count: i64,
    max_retries: i64,
    priority: i64,
    status: &'static str,
    next_retry_at: String,
    context: String,
    last_error: Option<String>,
    updated_at: String,
}

impl OperationParams {
    fn new(op: &QueuedOperation) -> Result<Self, QueueError> {
        Ok(Self {
            id: op.id.to_string(),
            op_type: op.op_type.clone(),
            payload: serde_json::to_string(&op.payload).map_err(QueueError::store)?,
            timestamp: timestamp(&op.timestamp),
            retry_count: op.retry_count as i64,
            max_retries: op.max_retries as i64,
            priority: op.priority.rank(),
            status: op.status.as_str(),
            next_retry_at: timestamp(&op.next_retry_at),
            context: serde_json::to_string(&op.context).map_err(QueueError::store)?,
            last_error: op.last_error.clone(),
            updated_at: timestamp(&op.updated_at),
        })
    }
}

#[async_trait]
impl OperationStore for SqliteOperationStore {
    async fn insert(&self, operation: &QueuedOperation) -> Result<(), QueueError> {
        let p = OperationParams::new(operation)?;
        self.conn
            .call(move |conn| {
                conn.execute(
                    &format!(
                        "INSERT INTO operations ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                        COLUMNS
                    ),
                    params![
                        p.id,
                        p.op_type,
                        p.payload,
                        p.timestamp,
                        p.retry_count,
                        p.max_retries,
                        p.priority,
                        p.status,
                        p.next_retry_at,
                        p.context,
                        p.last_error,
                        p.updated_at
                    ],
                )?;
                Ok(())
            })
            .await
            .map_err(QueueError::store)
    }

    async fn update(&self, operation: &QueuedOperation) -> Result<(), QueueError> {
        let p = OperationParams::new(operation)?;
        let id = p.id.clone();
        let changed = self
            .conn
            .call(move |conn| {
                let changed = conn.execute(
                    "UPDATE operations SET op_type = ?2, payload = ?3, timestamp = ?4,
                     retry_count = ?5, max_retries = ?6, priority = ?7, status = ?8,
                     next_retry_at = ?9, context = ?10, last_error = ?11, updated_at = ?12
                     WHERE id = ?1",
                    params![
                        p.id,
                        p.op_type,
                        p.payload,
                        p.timestamp,
                        p.retry_count,
                        p.max_retries,
                        p.priority,
                        p.status,
                        p.next_retry_at,
                        p.context,
                        p.last_error,
                        p.updated_at
                    ],
                )?;
                Ok(changed)
            })
            .await
            .map_err(QueueError::store)?;
        if changed == 0 {
            return Err(QueueError::NotFound(id));
        }
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<QueuedOperation>, QueueError> {
        let sql = format!("SELECT {} FROM operations WHERE id = ?1", COLUMNS);
        Ok(self
            .query(sql, Some(id.to_string()))
            .await?
            .into_iter()
            .next())
    }

    async fn list(&self, status: Option<OperationStatus>) -> Result<Vec<QueuedOperation>, QueueError> {
        match status {
            Some(status) => {
                let sql = format!(
                    "SELECT {} FROM operations WHERE status = ?1 ORDER BY timestamp ASC, rowid ASC",
                    COLUMNS
                );
                self.query(sql, Some(status.as_str().to_string())).await
            }
            None => {
                let sql = format!(
                    "SELECT {} FROM operations ORDER BY timestamp ASC, rowid ASC",
                    COLUMNS
                );
                self.query(sql, None).await
            }
        }
    }

    async fn due(&self, now: DateTime<Utc>) -> Result<Vec<QueuedOperation>, QueueError> {
        let sql = format!(
            "SELECT {} FROM operations
             WHERE status = 'PENDING' AND next_retry_at <= ?1
             ORDER BY priority DESC, timestamp ASC, rowid ASC",
            COLUMNS
        );
        self.query(sql, Some(timestamp(&now))).await
    }

    async fn reset_processing(&self) -> Result<usize, QueueError> {
        let now = timestamp(&Utc::now());
        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let changed = tx.execute(
                    "UPDATE operations SET status = 'PENDING', updated_at = ?1
                     WHERE status = 'PROCESSING'",
                    [&now],
                )?;
                tx.commit()?;
                Ok(changed)
            })
            .await
            .map_err(QueueError::store)
    }

    async fn delete_terminal(&self, before: DateTime<Utc>) -> Result<usize, QueueError> {
        let before = timestamp(&before);
        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let deleted = tx.execute(
                    "DELETE FROM operations
                     WHERE status IN ('COMPLETED', 'FAILED', 'CANCELLED') AND updated_at < ?1",
                    [&before],
                )?;
                tx.commit()?;
                Ok(deleted)
            })
            .await
            .map_err(QueueError::store)
    }

    async fn counts(&self) -> Result<HashMap<OperationStatus, usize>, QueueError> {
        let rows: Vec<(String, i64)> = self
            .conn
            .call(|conn| {
                let mut stmt =
                    conn.prepare("SELECT status, COUNT(*) FROM operations GROUP BY status")?;
                let rows = stmt
                    .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
            .map_err(QueueError::store)?;

        let mut counts = HashMap::new();
        for (status, count) in rows {
            let status = status.parse::<OperationStatus>().map_err(QueueError::Store)?;
            counts.insert(status, count.max(0) as usize);
        }
        Ok(counts)
    }
}

#[cfg(test)]
#[path = "sqlite_tests.rs"]
mod tests;

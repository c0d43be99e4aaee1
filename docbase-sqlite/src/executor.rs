//! `SqlExecutor` over a single shared rusqlite connection.
//!
//! The connection sits behind an async mutex. Plain statements lock it per
//! call; a transaction takes an owned guard for its whole lifetime, so
//! concurrent sessions queue behind an in-flight flush instead of
//! interleaving with it. Dropping an uncommitted transaction rolls it back.

use async_trait::async_trait;
use rusqlite::{ffi, params_from_iter, Connection};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

use docbase_core::error::{DocbaseError, DocbaseResult};
use docbase_core::executor::{SqlExecutor, SqlTransaction, Statement};
use docbase_core::value::{SqlRow, SqlValue};

/// An embedded SQLite backend for docbase.
///
/// Cloning shares the underlying connection.
#[derive(Debug, Clone)]
pub struct SqliteExecutor {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteExecutor {
    /// Opens (or creates) a database file.
    pub fn open(path: impl AsRef<Path>) -> DocbaseResult<Self> {
        let conn = Connection::open(path).map_err(map_err)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
            .map_err(map_err)?;
        debug!("opened sqlite executor");
        Ok(Self::from_connection(conn))
    }

    /// Opens an in-memory database, handy for tests.
    pub fn open_memory() -> DocbaseResult<Self> {
        let conn = Connection::open_in_memory().map_err(map_err)?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")
            .map_err(map_err)?;
        debug!("opened in-memory sqlite executor");
        Ok(Self::from_connection(conn))
    }

    /// Wraps an already configured connection.
    pub fn from_connection(conn: Connection) -> Self {
        Self { conn: Arc::new(Mutex::new(conn)) }
    }
}

#[async_trait]
impl SqlExecutor for SqliteExecutor {
    async fn execute(&self, stmt: &Statement) -> DocbaseResult<u64> {
        let conn = self.conn.lock().await;
        run_execute(&conn, stmt)
    }

    async fn query(&self, stmt: &Statement) -> DocbaseResult<Vec<SqlRow>> {
        let conn = self.conn.lock().await;
        run_query(&conn, stmt)
    }

    async fn begin(&self) -> DocbaseResult<Box<dyn SqlTransaction>> {
        let guard = Arc::clone(&self.conn).lock_owned().await;
        guard
            .execute_batch("BEGIN IMMEDIATE")
            .map_err(map_err)?;
        Ok(Box::new(SqliteTransaction { guard: Some(guard), finished: false }))
    }
}

/// A transaction holding the connection exclusively until it finishes.
pub struct SqliteTransaction {
    guard: Option<OwnedMutexGuard<Connection>>,
    finished: bool,
}

impl SqliteTransaction {
    fn conn(&self) -> &Connection {
        self.guard
            .as_ref()
            .expect("transaction used after completion")
    }
}

#[async_trait]
impl SqlTransaction for SqliteTransaction {
    async fn execute(&mut self, stmt: &Statement) -> DocbaseResult<u64> {
        run_execute(self.conn(), stmt)
    }

    async fn query(&mut self, stmt: &Statement) -> DocbaseResult<Vec<SqlRow>> {
        run_query(self.conn(), stmt)
    }

    async fn commit(mut self: Box<Self>) -> DocbaseResult<()> {
        self.conn().execute_batch("COMMIT").map_err(map_err)?;
        self.finished = true;
        Ok(())
    }

    async fn rollback(mut self: Box<Self>) -> DocbaseResult<()> {
        self.conn().execute_batch("ROLLBACK").map_err(map_err)?;
        self.finished = true;
        Ok(())
    }
}

impl Drop for SqliteTransaction {
    fn drop(&mut self) {
        if !self.finished {
            if let Some(guard) = self.guard.take() {
                let _ = guard.execute_batch("ROLLBACK");
            }
        }
    }
}

fn run_execute(conn: &Connection, stmt: &Statement) -> DocbaseResult<u64> {
    let params: Vec<rusqlite::types::Value> = stmt.params.iter().map(to_sqlite).collect();
    let affected = conn
        .execute(&stmt.sql, params_from_iter(params))
        .map_err(map_err)?;
    Ok(affected as u64)
}

fn run_query(conn: &Connection, stmt: &Statement) -> DocbaseResult<Vec<SqlRow>> {
    let mut prepared = conn.prepare(&stmt.sql).map_err(map_err)?;
    let column_count = prepared.column_count();
    let params: Vec<rusqlite::types::Value> = stmt.params.iter().map(to_sqlite).collect();
    let mapped = prepared
        .query_map(params_from_iter(params), |row| {
            let mut values = Vec::with_capacity(column_count);
            for index in 0..column_count {
                values.push(from_sqlite(row.get_ref(index)?));
            }
            Ok(SqlRow(values))
        })
        .map_err(map_err)?;
    let mut rows = Vec::new();
    for row in mapped {
        rows.push(row.map_err(map_err)?);
    }
    Ok(rows)
}

fn to_sqlite(value: &SqlValue) -> rusqlite::types::Value {
    use rusqlite::types::Value;
    match value {
        SqlValue::Null => Value::Null,
        SqlValue::BigInt(v) => Value::Integer(*v),
        SqlValue::Int(v) => Value::Integer(i64::from(*v)),
        SqlValue::Bool(v) => Value::Integer(i64::from(*v)),
        SqlValue::Text(v) => Value::Text(v.clone()),
        SqlValue::DateTime(v) => {
            // Fixed-width UTC text keeps lexicographic and temporal order
            // in agreement.
            Value::Text(v.to_rfc3339_opts(chrono_secform(), true))
        }
        SqlValue::Double(v) => Value::Real(*v),
        SqlValue::Blob(v) => Value::Blob(v.clone()),
    }
}

fn chrono_secform() -> chrono::SecondsFormat {
    chrono::SecondsFormat::Micros
}

fn from_sqlite(value: rusqlite::types::ValueRef<'_>) -> SqlValue {
    use rusqlite::types::ValueRef;
    match value {
        ValueRef::Null => SqlValue::Null,
        ValueRef::Integer(v) => SqlValue::BigInt(v),
        ValueRef::Real(v) => SqlValue::Double(v),
        ValueRef::Text(bytes) => {
            SqlValue::Text(String::from_utf8_lossy(bytes).into_owned())
        }
        ValueRef::Blob(bytes) => SqlValue::Blob(bytes.to_vec()),
    }
}

fn map_err(err: rusqlite::Error) -> DocbaseError {
    match &err {
        rusqlite::Error::SqliteFailure(failure, _) => match failure.code {
            ffi::ErrorCode::DatabaseBusy | ffi::ErrorCode::DatabaseLocked => {
                DocbaseError::Transient(err.to_string())
            }
            ffi::ErrorCode::ConstraintViolation => match failure.extended_code {
                ffi::SQLITE_CONSTRAINT_PRIMARYKEY | ffi::SQLITE_CONSTRAINT_UNIQUE => {
                    DocbaseError::Concurrency(err.to_string())
                }
                _ => DocbaseError::Backend(err.to_string()),
            },
            _ => DocbaseError::Backend(err.to_string()),
        },
        _ => DocbaseError::Backend(err.to_string()),
    }
}

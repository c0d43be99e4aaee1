//! SQL execution seam between the engine and the backing database.
//!
//! The engine renders SQL through a [`Dialect`](crate::dialect::Dialect) and
//! hands finished [`Statement`]s to a [`SqlExecutor`]. Connection
//! acquisition, pooling and driver specifics live entirely behind this
//! trait; the library never opens sockets itself. `docbase-sqlite` ships one
//! implementation, server backends are supplied by the host application over
//! its own pool.
//!
//! # Thread Safety
//!
//! Executors must be thread-safe (`Send + Sync`) and support concurrent use
//! from multiple sessions. A [`SqlTransaction`] is single-owner and is used
//! by exactly one flush at a time.

use async_trait::async_trait;
use std::fmt::Debug;

use crate::error::DocbaseResult;
use crate::value::{SqlRow, SqlValue};

/// A fully rendered statement: SQL text plus its ordered parameter list.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

impl Statement {
    pub fn new(sql: impl Into<String>, params: Vec<SqlValue>) -> Self {
        Self { sql: sql.into(), params }
    }

    /// A statement with no parameters (DDL, bookkeeping).
    pub fn bare(sql: impl Into<String>) -> Self {
        Self { sql: sql.into(), params: Vec::new() }
    }
}

/// Abstract interface for executing statements against a database.
///
/// Non-transactional calls run on a short-lived or pooled connection at the
/// implementation's discretion. Reads that need isolation go through
/// [`SqlExecutor::begin`].
///
/// # Error classification
///
/// Implementations are responsible for mapping driver errors onto the
/// docbase taxonomy: lock/busy/connection failures to
/// [`DocbaseError::Transient`](crate::error::DocbaseError::Transient),
/// primary-key and unique violations to
/// [`DocbaseError::Concurrency`](crate::error::DocbaseError::Concurrency),
/// anything else to [`DocbaseError::Backend`](crate::error::DocbaseError::Backend).
#[async_trait]
pub trait SqlExecutor: Send + Sync + Debug {
    /// Executes one statement, returning the number of affected rows.
    async fn execute(&self, stmt: &Statement) -> DocbaseResult<u64>;

    /// Executes a query, returning all result rows.
    async fn query(&self, stmt: &Statement) -> DocbaseResult<Vec<SqlRow>>;

    /// Opens a transaction. The transaction rolls back if dropped without an
    /// explicit commit.
    async fn begin(&self) -> DocbaseResult<Box<dyn SqlTransaction>>;
}

/// A database transaction in progress.
///
/// All flush DML runs through one of these so documents, index rows and
/// bookkeeping commit atomically. Dropping an unfinished transaction must
/// roll it back; that is the cancellation path when a flush future is
/// dropped mid-flight.
#[async_trait]
pub trait SqlTransaction: Send {
    /// Executes one statement inside the transaction.
    async fn execute(&mut self, stmt: &Statement) -> DocbaseResult<u64>;

    /// Executes a query inside the transaction.
    async fn query(&mut self, stmt: &Statement) -> DocbaseResult<Vec<SqlRow>>;

    /// Commits the transaction.
    async fn commit(self: Box<Self>) -> DocbaseResult<()>;

    /// Rolls the transaction back.
    async fn rollback(self: Box<Self>) -> DocbaseResult<()>;
}

//! Embedded SQLite backend for docbase.
//!
//! [`SqliteExecutor`] implements the docbase executor seam over a single
//! shared `rusqlite` connection, in memory or on disk. It is the
//! batteries-included backend for tests and embedded deployments; server
//! databases plug in through their own [`SqlExecutor`] implementation over
//! a pooled driver.
//!
//! # Example
//!
//! ```ignore
//! use docbase_core::{DocumentStore, SqliteDialect};
//! use docbase_sqlite::SqliteExecutor;
//! use std::sync::Arc;
//!
//! let executor = SqliteExecutor::open_memory()?;
//! let store = DocumentStore::builder()
//!     .dialect(SqliteDialect)
//!     .executor(Arc::new(executor))
//!     .register::<User>()
//!     .build()?;
//! store.initialize().await?;
//! ```
//!
//! [`SqlExecutor`]: docbase_core::executor::SqlExecutor

mod executor;

pub use executor::{SqliteExecutor, SqliteTransaction};

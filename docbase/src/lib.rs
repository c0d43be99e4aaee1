//! docbase: a document database layered on relational SQL engines.
//!
//! This crate is the primary entry point. It re-exports the engine from
//! `docbase-core` and provides feature-gated access to backends.
//!
//! # Features
//!
//! - **Unit-of-work sessions** - identity mapping, snapshot-based change
//!   tracking, atomic flush of documents and index rows
//! - **User-defined indexes** - map and reduce projections materialized as
//!   plain tables and kept in sync with every mutation
//! - **Compiled queries** - a fluent predicate language translated to
//!   parameterized SQL for SQLite, PostgreSQL, MySQL and SQL Server
//! - **Schema management** - idempotent DDL bootstrap and migration surface
//!
//! # Quick Start
//!
//! ```ignore
//! use docbase::{prelude::*, sqlite::SqliteExecutor};
//! use serde::{Serialize, Deserialize};
//! use std::sync::Arc;
//!
//! #[derive(Debug, Clone, Serialize, Deserialize)]
//! pub struct User {
//!     pub id: DocId,
//!     pub name: String,
//! }
//!
//! impl Document for User {
//!     fn id(&self) -> DocId { self.id }
//!     fn set_id(&mut self, id: DocId) { self.id = id; }
//!     fn document_type() -> &'static str { "user" }
//! }
//!
//! #[tokio::main]
//! async fn main() -> DocbaseResult<()> {
//!     let store = DocumentStore::builder()
//!         .dialect(SqliteDialect)
//!         .executor(Arc::new(SqliteExecutor::open_memory()?))
//!         .register::<User>()
//!         .index(
//!             MapIndex::<User>::new("by_name")
//!                 .column("name", SqlType::Text)
//!                 .rows(|u| vec![IndexRow::new(vec![u.name.as_str().into()])])?,
//!         )
//!         .build()?;
//!     store.initialize().await?;
//!
//!     let mut session = store.create_session();
//!     let mut user = User { id: 0, name: "Alice".into() };
//!     session.save(&mut user)?;
//!     session.save_changes().await?;
//!
//!     let found = session
//!         .query::<User>("by_name")
//!         .filter(col("name").eq("Alice"))
//!         .list()
//!         .await?;
//!     println!("found {} users", found.len());
//!     Ok(())
//! }
//! ```
//!
//! # Backends
//!
//! - [`sqlite`] - embedded SQLite executor (requires the `sqlite` feature)
//! - Server databases - implement
//!   [`SqlExecutor`](docbase_core::executor::SqlExecutor) over your pool

pub mod prelude;

pub use docbase_core::{
    dialect, document, error, executor, filter, identity, index, page, query, schema, session,
    store, value,
};

/// Embedded SQLite backend.
///
/// Only available when the `sqlite` feature is enabled.
#[cfg(feature = "sqlite")]
pub mod sqlite {
    pub use docbase_sqlite::{SqliteExecutor, SqliteTransaction};
}

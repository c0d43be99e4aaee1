//! Core engine of docbase: a document database layered on relational SQL.
//!
//! Applications persist serializable documents into a single wide table and
//! query them through registered index projections, materialized as ordinary
//! tables and kept in sync with every mutation. The moving parts:
//!
//! - [`store`] — process-wide configuration, registries and the session
//!   factory
//! - [`session`] — the unit of work: identity map, snapshot-based change
//!   detection, atomic flush
//! - [`index`] — index declarations; the maintenance pipeline behind them
//!   diffs and applies index rows at flush
//! - [`query`] / [`filter`] — the typed query surface, the SQL compiler
//!   and the date-filter mini-language
//! - [`dialect`] — per-backend SQL rendering (SQLite, PostgreSQL, MySQL,
//!   SQL Server)
//! - [`schema`] — DDL operations and bootstrap
//! - [`executor`] — the seam a backing database plugs into
//!
//! Connection handling lives behind [`executor::SqlExecutor`]; the
//! `docbase-sqlite` crate ships an embedded implementation, server backends
//! are provided by the host over its own pool.

mod compile;
mod engine;
mod ids;
mod tracker;

pub mod dialect;
pub mod document;
pub mod error;
pub mod executor;
pub mod filter;
pub mod identity;
pub mod index;
pub mod page;
pub mod query;
pub mod schema;
pub mod session;
pub mod store;
pub mod value;

pub use dialect::{Dialect, MySqlDialect, PostgresDialect, SqlServerDialect, SqliteDialect};
pub use document::{Codec, DocId, Document, DocumentExt, JsonCodec, UNASSIGNED_ID};
pub use error::{DocbaseError, DocbaseResult};
pub use executor::{SqlExecutor, SqlTransaction, Statement};
pub use filter::{parse_date_filter, DateFilter};
pub use identity::{DocState, IdentityMap};
pub use index::{Aggregate, IndexDef, IndexRow, MapIndex, ReduceIndex};
pub use page::{Page, PageRequest};
pub use query::{asc, col, desc, Expr, OrderBy, Query};
pub use schema::{AlterOp, ColumnDef, SchemaManager, SchemaOp, TableSchema};
pub use session::{Session, SessionQuery};
pub use store::{DocumentStore, DocumentStoreBuilder};
pub use value::{SqlRow, SqlType, SqlValue};

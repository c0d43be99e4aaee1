//! Convenient re-exports of the commonly used docbase types.
//!
//! ```ignore
//! use docbase::prelude::*;
//! ```
//!
//! This pulls in the document trait, the store and session types, query
//! construction helpers, index builders and the error types.

pub use docbase_core::{
    dialect::{Dialect, MySqlDialect, PostgresDialect, SqlServerDialect, SqliteDialect},
    document::{Codec, DocId, Document, DocumentExt, JsonCodec, UNASSIGNED_ID},
    error::{DocbaseError, DocbaseResult},
    executor::{SqlExecutor, SqlTransaction, Statement},
    filter::{parse_date_filter, DateFilter},
    identity::DocState,
    index::{Aggregate, IndexDef, IndexRow, MapIndex, ReduceIndex},
    page::{Page, PageRequest},
    query::{asc, col, desc, Expr, OrderBy, Query},
    schema::{AlterOp, ColumnDef, SchemaManager, SchemaOp, TableSchema},
    session::{Session, SessionQuery},
    store::{DocumentStore, DocumentStoreBuilder},
    value::{SqlRow, SqlType, SqlValue},
};

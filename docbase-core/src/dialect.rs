//! Per-backend SQL rendering.
//!
//! [`Dialect`] is the capability seam the rest of the engine calls for every
//! piece of backend-specific SQL: identifier quoting, parameter placeholder
//! syntax, type names, paging forms, DDL and batch-insert shapes. Dialects
//! are stateless; one is selected at store construction and never changes.

use crate::schema::{ColumnDef, TableSchema};
use crate::value::SqlType;

/// A stateless SQL renderer for one backend.
///
/// All methods are pure string rendering; nothing here touches a connection.
pub trait Dialect: Send + Sync + std::fmt::Debug + 'static {
    /// Short backend name, used in logs and error messages.
    fn name(&self) -> &'static str;

    /// Quotes a single identifier, doubling any embedded quote characters.
    fn quote_ident(&self, ident: &str) -> String;

    /// Renders a possibly schema-qualified table reference.
    fn table_ref(&self, schema: Option<&str>, table: &str) -> String {
        match schema {
            Some(s) => format!("{}.{}", self.quote_ident(s), self.quote_ident(table)),
            None => self.quote_ident(table),
        }
    }

    /// Renders the placeholder for the 1-based parameter `ordinal`.
    fn placeholder(&self, ordinal: usize) -> String;

    /// The backend's type name for a [`SqlType`].
    fn type_name(&self, ty: SqlType) -> String;

    /// Renders the paging clause. Returns an empty string when neither limit
    /// nor offset is requested. Dialects whose paging clause requires an
    /// ORDER BY rely on the query compiler always emitting one.
    fn limit_offset(&self, limit: Option<u64>, offset: Option<u64>) -> String;

    /// The backend's ceiling on bound parameters per statement. Batch DML is
    /// chunked so no statement exceeds this.
    fn max_parameters(&self) -> usize;

    /// The backend's ceiling on rows in a single multi-row INSERT.
    fn max_rows_per_insert(&self) -> usize {
        usize::MAX
    }

    /// Whether `CREATE TABLE IF NOT EXISTS` is understood.
    fn supports_if_not_exists(&self) -> bool {
        true
    }

    /// Renders a CREATE TABLE statement for the given schema.
    fn create_table(&self, table: &TableSchema) -> String {
        let body = self.table_body(table);
        if self.supports_if_not_exists() {
            format!(
                "CREATE TABLE IF NOT EXISTS {} ({})",
                self.quote_ident(&table.name),
                body
            )
        } else {
            format!("CREATE TABLE {} ({})", self.quote_ident(&table.name), body)
        }
    }

    /// Renders the column list of CREATE TABLE. A single key column gets an
    /// inline PRIMARY KEY; a composite key becomes a table constraint.
    fn table_body(&self, table: &TableSchema) -> String {
        let pk_cols: Vec<String> = table
            .columns
            .iter()
            .filter(|c| c.primary_key)
            .map(|c| self.quote_ident(&c.name))
            .collect();
        let composite = pk_cols.len() > 1;
        let cols: Vec<String> = table
            .columns
            .iter()
            .map(|c| self.column_def_in_table(c, composite))
            .collect();
        let mut body = cols.join(", ");
        if composite {
            body.push_str(&format!(", PRIMARY KEY ({})", pk_cols.join(", ")));
        }
        body
    }

    /// Renders one column definition within CREATE TABLE / ADD COLUMN.
    fn column_def(&self, col: &ColumnDef) -> String {
        self.column_def_in_table(col, false)
    }

    fn column_def_in_table(&self, col: &ColumnDef, suppress_inline_pk: bool) -> String {
        let mut def = format!("{} {}", self.quote_ident(&col.name), self.type_name(col.sql_type));
        if col.primary_key && !suppress_inline_pk {
            def.push_str(" PRIMARY KEY");
        } else if !col.nullable || col.primary_key {
            def.push_str(" NOT NULL");
        }
        def
    }

    /// Renders an ALTER TABLE ... ADD COLUMN statement.
    fn add_column(&self, table: &str, col: &ColumnDef) -> String {
        format!(
            "ALTER TABLE {} ADD COLUMN {}",
            self.quote_ident(table),
            self.column_def(col)
        )
    }

    /// Renders an ALTER TABLE ... DROP COLUMN statement.
    fn drop_column(&self, table: &str, column: &str) -> String {
        format!(
            "ALTER TABLE {} DROP COLUMN {}",
            self.quote_ident(table),
            self.quote_ident(column)
        )
    }

    /// Renders a DROP TABLE statement.
    fn drop_table(&self, table: &str) -> String {
        format!("DROP TABLE {}", self.quote_ident(table))
    }

    /// Renders a CREATE INDEX statement. The index name is derived from the
    /// table and column names.
    fn create_index(&self, table: &str, columns: &[&str], unique: bool) -> String {
        let idx_name = format!("idx_{}_{}", table, columns.join("_"));
        let quoted: Vec<String> = columns.iter().map(|c| self.quote_ident(c)).collect();
        format!(
            "CREATE {}INDEX {}{} ON {} ({})",
            if unique { "UNIQUE " } else { "" },
            if self.supports_if_not_exists() { "IF NOT EXISTS " } else { "" },
            self.quote_ident(&idx_name),
            self.quote_ident(table),
            quoted.join(", ")
        )
    }

    /// Renders an ALTER TABLE ... FOREIGN KEY constraint.
    fn create_foreign_key(
        &self,
        table: &str,
        columns: &[&str],
        ref_table: &str,
        ref_columns: &[&str],
    ) -> String {
        let fk_name = format!("fk_{}_{}", table, columns.join("_"));
        let cols: Vec<String> = columns.iter().map(|c| self.quote_ident(c)).collect();
        let refs: Vec<String> = ref_columns.iter().map(|c| self.quote_ident(c)).collect();
        format!(
            "ALTER TABLE {} ADD CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({})",
            self.quote_ident(table),
            self.quote_ident(&fk_name),
            cols.join(", "),
            self.quote_ident(ref_table),
            refs.join(", ")
        )
    }

    /// Renders a multi-row INSERT with sequentially numbered placeholders.
    fn insert_sql(&self, table: &str, columns: &[&str], rows: usize) -> String {
        let quoted: Vec<String> = columns.iter().map(|c| self.quote_ident(c)).collect();
        let mut tuples = Vec::with_capacity(rows);
        let mut ordinal = 1;
        for _ in 0..rows {
            let mut ps = Vec::with_capacity(columns.len());
            for _ in columns {
                ps.push(self.placeholder(ordinal));
                ordinal += 1;
            }
            tuples.push(format!("({})", ps.join(", ")));
        }
        format!(
            "INSERT INTO {} ({}) VALUES {}",
            self.quote_ident(table),
            quoted.join(", "),
            tuples.join(", ")
        )
    }

    /// The statement toggling explicit inserts into identity columns, on
    /// backends that have the concept.
    fn identity_insert(&self, _table: &str, _enable: bool) -> Option<String> {
        None
    }

    /// The statement selecting the default isolation level for the flush
    /// transaction, where one is needed.
    fn isolation_sql(&self) -> Option<&'static str> {
        Some("SET TRANSACTION ISOLATION LEVEL READ COMMITTED")
    }
}

// ---------------------------------------------------------------------------
// SQLite
// ---------------------------------------------------------------------------

/// SQLite: ANSI quoting, `?N` placeholders, 999-parameter default ceiling.
#[derive(Debug, Default, Clone, Copy)]
pub struct SqliteDialect;

impl Dialect for SqliteDialect {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn quote_ident(&self, ident: &str) -> String {
        format!("\"{}\"", ident.replace('"', "\"\""))
    }

    fn placeholder(&self, ordinal: usize) -> String {
        format!("?{ordinal}")
    }

    fn type_name(&self, ty: SqlType) -> String {
        match ty {
            SqlType::BigInt | SqlType::Int | SqlType::Bool => "INTEGER".to_string(),
            SqlType::VarChar(_) | SqlType::Text | SqlType::DateTime | SqlType::Guid => {
                "TEXT".to_string()
            }
            SqlType::Blob => "BLOB".to_string(),
            SqlType::Decimal(_, _) => "NUMERIC".to_string(),
        }
    }

    fn limit_offset(&self, limit: Option<u64>, offset: Option<u64>) -> String {
        match (limit, offset) {
            (Some(l), Some(o)) => format!("LIMIT {l} OFFSET {o}"),
            (Some(l), None) => format!("LIMIT {l}"),
            // SQLite has no offset-without-limit form; -1 means unbounded.
            (None, Some(o)) => format!("LIMIT -1 OFFSET {o}"),
            (None, None) => String::new(),
        }
    }

    fn max_parameters(&self) -> usize {
        999
    }

    fn isolation_sql(&self) -> Option<&'static str> {
        // SQLite transactions are serializable; there is nothing to set.
        None
    }
}

// ---------------------------------------------------------------------------
// PostgreSQL
// ---------------------------------------------------------------------------

/// PostgreSQL 11+: ANSI quoting, `$N` placeholders, 65535 parameters.
#[derive(Debug, Default, Clone, Copy)]
pub struct PostgresDialect;

impl Dialect for PostgresDialect {
    fn name(&self) -> &'static str {
        "postgresql"
    }

    fn quote_ident(&self, ident: &str) -> String {
        format!("\"{}\"", ident.replace('"', "\"\""))
    }

    fn placeholder(&self, ordinal: usize) -> String {
        format!("${ordinal}")
    }

    fn type_name(&self, ty: SqlType) -> String {
        match ty {
            SqlType::BigInt => "BIGINT".to_string(),
            SqlType::Int => "INTEGER".to_string(),
            SqlType::Bool => "BOOLEAN".to_string(),
            SqlType::VarChar(n) => format!("VARCHAR({n})"),
            SqlType::Text => "TEXT".to_string(),
            SqlType::DateTime => "TIMESTAMP".to_string(),
            SqlType::Guid => "UUID".to_string(),
            SqlType::Blob => "BYTEA".to_string(),
            SqlType::Decimal(p, s) => format!("NUMERIC({p},{s})"),
        }
    }

    fn limit_offset(&self, limit: Option<u64>, offset: Option<u64>) -> String {
        match (limit, offset) {
            (Some(l), Some(o)) => format!("LIMIT {l} OFFSET {o}"),
            (Some(l), None) => format!("LIMIT {l}"),
            (None, Some(o)) => format!("OFFSET {o}"),
            (None, None) => String::new(),
        }
    }

    fn max_parameters(&self) -> usize {
        65535
    }
}

// ---------------------------------------------------------------------------
// MySQL
// ---------------------------------------------------------------------------

/// MySQL 8+: backtick quoting, positional `?` placeholders, 65535 parameters.
#[derive(Debug, Default, Clone, Copy)]
pub struct MySqlDialect;

impl Dialect for MySqlDialect {
    fn name(&self) -> &'static str {
        "mysql"
    }

    fn quote_ident(&self, ident: &str) -> String {
        format!("`{}`", ident.replace('`', "``"))
    }

    fn placeholder(&self, _ordinal: usize) -> String {
        "?".to_string()
    }

    fn type_name(&self, ty: SqlType) -> String {
        match ty {
            SqlType::BigInt => "BIGINT".to_string(),
            SqlType::Int => "INT".to_string(),
            SqlType::Bool => "BOOLEAN".to_string(),
            SqlType::VarChar(n) => format!("VARCHAR({n})"),
            SqlType::Text => "LONGTEXT".to_string(),
            SqlType::DateTime => "DATETIME(6)".to_string(),
            SqlType::Guid => "CHAR(36)".to_string(),
            SqlType::Blob => "LONGBLOB".to_string(),
            SqlType::Decimal(p, s) => format!("DECIMAL({p},{s})"),
        }
    }

    fn limit_offset(&self, limit: Option<u64>, offset: Option<u64>) -> String {
        match (limit, offset) {
            (Some(l), Some(o)) => format!("LIMIT {l} OFFSET {o}"),
            (Some(l), None) => format!("LIMIT {l}"),
            // MySQL requires a limit before an offset; the documented idiom
            // is an effectively-unbounded limit.
            (None, Some(o)) => format!("LIMIT 18446744073709551615 OFFSET {o}"),
            (None, None) => String::new(),
        }
    }

    fn max_parameters(&self) -> usize {
        65535
    }

    fn create_index(&self, table: &str, columns: &[&str], unique: bool) -> String {
        // MySQL has no CREATE INDEX IF NOT EXISTS.
        let idx_name = format!("idx_{}_{}", table, columns.join("_"));
        let quoted: Vec<String> = columns.iter().map(|c| self.quote_ident(c)).collect();
        format!(
            "CREATE {}INDEX {} ON {} ({})",
            if unique { "UNIQUE " } else { "" },
            self.quote_ident(&idx_name),
            self.quote_ident(table),
            quoted.join(", ")
        )
    }

    fn isolation_sql(&self) -> Option<&'static str> {
        Some("SET SESSION TRANSACTION ISOLATION LEVEL READ COMMITTED")
    }
}

// ---------------------------------------------------------------------------
// SQL Server
// ---------------------------------------------------------------------------

/// SQL Server 2019+: bracket quoting, `@pN` placeholders, 2100 parameters,
/// OFFSET/FETCH paging, no IF NOT EXISTS.
#[derive(Debug, Default, Clone, Copy)]
pub struct SqlServerDialect;

impl Dialect for SqlServerDialect {
    fn name(&self) -> &'static str {
        "sqlserver"
    }

    fn quote_ident(&self, ident: &str) -> String {
        format!("[{}]", ident.replace(']', "]]"))
    }

    fn placeholder(&self, ordinal: usize) -> String {
        format!("@p{ordinal}")
    }

    fn type_name(&self, ty: SqlType) -> String {
        match ty {
            SqlType::BigInt => "BIGINT".to_string(),
            SqlType::Int => "INT".to_string(),
            SqlType::Bool => "BIT".to_string(),
            SqlType::VarChar(n) => format!("NVARCHAR({n})"),
            SqlType::Text => "NVARCHAR(MAX)".to_string(),
            SqlType::DateTime => "DATETIME2".to_string(),
            SqlType::Guid => "UNIQUEIDENTIFIER".to_string(),
            SqlType::Blob => "VARBINARY(MAX)".to_string(),
            SqlType::Decimal(p, s) => format!("DECIMAL({p},{s})"),
        }
    }

    fn limit_offset(&self, limit: Option<u64>, offset: Option<u64>) -> String {
        match (limit, offset) {
            (Some(l), Some(o)) => format!("OFFSET {o} ROWS FETCH NEXT {l} ROWS ONLY"),
            (Some(l), None) => format!("OFFSET 0 ROWS FETCH NEXT {l} ROWS ONLY"),
            (None, Some(o)) => format!("OFFSET {o} ROWS"),
            (None, None) => String::new(),
        }
    }

    fn max_parameters(&self) -> usize {
        2100
    }

    fn max_rows_per_insert(&self) -> usize {
        1000
    }

    fn supports_if_not_exists(&self) -> bool {
        false
    }

    fn create_table(&self, table: &TableSchema) -> String {
        format!(
            "IF OBJECT_ID(N'{}', N'U') IS NULL CREATE TABLE {} ({})",
            table.name.replace('\'', "''"),
            self.quote_ident(&table.name),
            self.table_body(table)
        )
    }

    fn identity_insert(&self, table: &str, enable: bool) -> Option<String> {
        Some(format!(
            "SET IDENTITY_INSERT {} {}",
            self.quote_ident(table),
            if enable { "ON" } else { "OFF" }
        ))
    }
}

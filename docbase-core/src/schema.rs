//! Table schema model and the schema migration surface.
//!
//! [`SchemaManager`] is the ordered, idempotent DDL API hosting applications
//! use to evolve index tables, and the engine uses to bootstrap its own
//! tables (documents, identifiers, index and bridge tables). Every operation
//! renders through the configured dialect; [`SchemaManager::apply`] runs a
//! batch under a single transaction.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::debug;

use crate::dialect::Dialect;
use crate::error::{DocbaseError, DocbaseResult};
use crate::executor::{SqlExecutor, Statement};
use crate::value::SqlType;

/// One column of a relational table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    pub sql_type: SqlType,
    pub nullable: bool,
    pub primary_key: bool,
}

impl ColumnDef {
    /// A single-column primary key.
    pub fn primary(name: impl Into<String>, sql_type: SqlType) -> Self {
        Self { name: name.into(), sql_type, nullable: false, primary_key: true }
    }

    /// A NOT NULL column.
    pub fn not_null(name: impl Into<String>, sql_type: SqlType) -> Self {
        Self { name: name.into(), sql_type, nullable: false, primary_key: false }
    }

    /// A nullable column.
    pub fn nullable(name: impl Into<String>, sql_type: SqlType) -> Self {
        Self { name: name.into(), sql_type, nullable: true, primary_key: false }
    }

    /// A member of a composite primary key.
    pub fn key_part(name: impl Into<String>, sql_type: SqlType) -> Self {
        Self { name: name.into(), sql_type, nullable: false, primary_key: true }
    }
}

/// An ordered list of columns under a table name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<ColumnDef>,
}

impl TableSchema {
    pub fn new(name: impl Into<String>, columns: Vec<ColumnDef>) -> Self {
        Self { name: name.into(), columns }
    }

    /// Rejects empty tables and duplicate column names.
    pub fn validate(&self) -> DocbaseResult<()> {
        if self.columns.is_empty() {
            return Err(DocbaseError::Configuration(format!(
                "table '{}' must have at least one column",
                self.name
            )));
        }
        let mut seen = HashSet::new();
        for col in &self.columns {
            if !seen.insert(col.name.as_str()) {
                return Err(DocbaseError::Configuration(format!(
                    "table '{}' declares duplicate column '{}'",
                    self.name, col.name
                )));
            }
        }
        Ok(())
    }
}

/// A single table alteration.
#[derive(Debug, Clone)]
pub enum AlterOp {
    AddColumn(ColumnDef),
    DropColumn(String),
}

/// One schema operation, renderable through a dialect.
#[derive(Debug, Clone)]
pub enum SchemaOp {
    CreateTable(TableSchema),
    AlterTable { table: String, ops: Vec<AlterOp> },
    CreateIndex { table: String, columns: Vec<String>, unique: bool },
    DropTable(String),
    CreateForeignKey {
        table: String,
        columns: Vec<String>,
        ref_table: String,
        ref_columns: Vec<String>,
    },
}

/// Ordered, idempotent migration API over an executor and a dialect.
pub struct SchemaManager<'a> {
    executor: &'a dyn SqlExecutor,
    dialect: &'a dyn Dialect,
}

impl<'a> SchemaManager<'a> {
    pub fn new(executor: &'a dyn SqlExecutor, dialect: &'a dyn Dialect) -> Self {
        Self { executor, dialect }
    }

    /// Creates a table, validating the schema first.
    pub async fn create_table(&self, schema: &TableSchema) -> DocbaseResult<()> {
        schema.validate()?;
        let sql = self.dialect.create_table(schema);
        debug!(table = %schema.name, "create table");
        self.executor.execute(&Statement::bare(sql)).await?;
        Ok(())
    }

    /// Applies a list of alterations to one table.
    pub async fn alter_table(&self, table: &str, ops: &[AlterOp]) -> DocbaseResult<()> {
        for op in ops {
            let sql = match op {
                AlterOp::AddColumn(col) => self.dialect.add_column(table, col),
                AlterOp::DropColumn(col) => self.dialect.drop_column(table, col),
            };
            debug!(table, "alter table");
            self.executor.execute(&Statement::bare(sql)).await?;
        }
        Ok(())
    }

    /// Creates a (possibly unique) index over the given columns.
    pub async fn create_index(
        &self,
        table: &str,
        columns: &[&str],
        unique: bool,
    ) -> DocbaseResult<()> {
        let sql = self.dialect.create_index(table, columns, unique);
        debug!(table, ?columns, unique, "create index");
        self.executor.execute(&Statement::bare(sql)).await?;
        Ok(())
    }

    /// Drops a table.
    pub async fn drop_table(&self, table: &str) -> DocbaseResult<()> {
        let sql = self.dialect.drop_table(table);
        debug!(table, "drop table");
        self.executor.execute(&Statement::bare(sql)).await?;
        Ok(())
    }

    /// Adds a foreign key constraint.
    pub async fn create_foreign_key(
        &self,
        table: &str,
        columns: &[&str],
        ref_table: &str,
        ref_columns: &[&str],
    ) -> DocbaseResult<()> {
        let sql = self
            .dialect
            .create_foreign_key(table, columns, ref_table, ref_columns);
        debug!(table, ref_table, "create foreign key");
        self.executor.execute(&Statement::bare(sql)).await?;
        Ok(())
    }

    /// Runs a batch of schema operations inside one transaction, in order.
    pub async fn apply(&self, ops: &[SchemaOp]) -> DocbaseResult<()> {
        let mut tx = self.executor.begin().await?;
        let result = async {
            for op in ops {
                match op {
                    SchemaOp::CreateTable(schema) => {
                        schema.validate()?;
                        tx.execute(&Statement::bare(self.dialect.create_table(schema)))
                            .await?;
                    }
                    SchemaOp::AlterTable { table, ops } => {
                        for alter in ops {
                            let sql = match alter {
                                AlterOp::AddColumn(col) => self.dialect.add_column(table, col),
                                AlterOp::DropColumn(col) => self.dialect.drop_column(table, col),
                            };
                            tx.execute(&Statement::bare(sql)).await?;
                        }
                    }
                    SchemaOp::CreateIndex { table, columns, unique } => {
                        let cols: Vec<&str> = columns.iter().map(String::as_str).collect();
                        tx.execute(&Statement::bare(
                            self.dialect.create_index(table, &cols, *unique),
                        ))
                        .await?;
                    }
                    SchemaOp::DropTable(table) => {
                        tx.execute(&Statement::bare(self.dialect.drop_table(table)))
                            .await?;
                    }
                    SchemaOp::CreateForeignKey { table, columns, ref_table, ref_columns } => {
                        let cols: Vec<&str> = columns.iter().map(String::as_str).collect();
                        let refs: Vec<&str> = ref_columns.iter().map(String::as_str).collect();
                        tx.execute(&Statement::bare(self.dialect.create_foreign_key(
                            table, &cols, ref_table, &refs,
                        )))
                        .await?;
                    }
                }
            }
            Ok(())
        }
        .await;

        match result {
            Ok(()) => tx.commit().await,
            Err(err) => {
                tx.rollback().await.ok();
                Err(err)
            }
        }
    }
}

//! Compilation of query trees into parameterized SQL.
//!
//! The compiler binds a [`Query`] to its primary index, resolves column
//! references against the primary and joined indexes, and writes the
//! predicate through a visitor that appends into a shared buffer and
//! parameter list. All validation (unknown columns, bad joins) happens here,
//! at compile time, never at execution.

use crate::dialect::Dialect;
use crate::error::{DocbaseError, DocbaseResult};
use crate::executor::Statement;
use crate::index::{IndexDef, IndexKind};
use crate::query::{ColumnRef, Expr, Query};
use crate::value::SqlValue;

/// What the compiled statement returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Selection {
    /// Document id, payload and version, joined from the documents table.
    Documents,
    /// Document ids straight off the primary index table.
    Ids,
    /// A single COUNT(*) over the matching index rows.
    Count,
    /// All columns of a reduce index's aggregated table.
    ReducedRows,
}

/// Compiles queries against one primary index and its resolved joins.
pub(crate) struct QueryCompiler<'a> {
    dialect: &'a dyn Dialect,
    documents_table: &'a str,
    prefix: &'a str,
    primary: &'a IndexDef,
    joins: Vec<&'a IndexDef>,
}

impl<'a> QueryCompiler<'a> {
    pub fn new(
        dialect: &'a dyn Dialect,
        documents_table: &'a str,
        prefix: &'a str,
        primary: &'a IndexDef,
        joins: Vec<&'a IndexDef>,
    ) -> Self {
        Self { dialect, documents_table, prefix, primary, joins }
    }

    pub fn compile(&self, query: &Query, selection: Selection) -> DocbaseResult<Statement> {
        match selection {
            Selection::ReducedRows => {
                if !self.primary.is_reduce() {
                    return Err(DocbaseError::QueryCompile(format!(
                        "index '{}' is not a reduce index",
                        self.primary.name()
                    )));
                }
                if !self.joins.is_empty() {
                    return Err(DocbaseError::QueryCompile(
                        "reduced-row queries do not support joins".to_string(),
                    ));
                }
            }
            _ => {
                if self.primary.is_reduce() {
                    return Err(DocbaseError::QueryCompile(format!(
                        "reduce index '{}' cannot drive a document query; \
                         read it with reduced rows instead",
                        self.primary.name()
                    )));
                }
            }
        }
        for join in &self.joins {
            if join.doc_type() != self.primary.doc_type() {
                return Err(DocbaseError::QueryCompile(format!(
                    "cannot join index '{}' (over '{}') to '{}' (over '{}')",
                    join.name(),
                    join.doc_type(),
                    self.primary.name(),
                    self.primary.doc_type()
                )));
            }
        }

        let mut sql = String::new();
        let mut params: Vec<SqlValue> = Vec::new();

        self.write_select(&mut sql, selection);
        self.write_from(&mut sql, selection);

        if let Some(filter) = &query.filter {
            sql.push_str(" WHERE ");
            let mut writer = PredicateWriter {
                compiler: self,
                selection,
                sql: &mut sql,
                params: &mut params,
            };
            writer.write_expr(filter)?;
        }

        if selection != Selection::Count {
            self.write_order(&mut sql, query, selection)?;
            let paging = self.dialect.limit_offset(query.take, query.skip);
            if !paging.is_empty() {
                sql.push(' ');
                sql.push_str(&paging);
            }
        }

        Ok(Statement::new(sql, params))
    }

    fn write_select(&self, sql: &mut String, selection: Selection) {
        let q = |name: &str| self.dialect.quote_ident(name);
        match selection {
            Selection::Documents => {
                sql.push_str(&format!(
                    "SELECT d.{}, d.{}, d.{} ",
                    q("id"),
                    q("content"),
                    q("version")
                ));
            }
            Selection::Ids => {
                sql.push_str(&format!("SELECT i0.{} ", q("document_id")));
            }
            Selection::Count => {
                sql.push_str("SELECT COUNT(*) ");
            }
            Selection::ReducedRows => {
                let cols: Vec<String> = self
                    .primary
                    .columns()
                    .iter()
                    .map(|c| format!("i0.{}", q(&c.name)))
                    .collect();
                sql.push_str(&format!("SELECT {} ", cols.join(", ")));
            }
        }
    }

    fn write_from(&self, sql: &mut String, selection: Selection) {
        let q = |name: &str| self.dialect.quote_ident(name);
        let primary_table = if selection == Selection::ReducedRows {
            self.primary.reduced_table(self.prefix)
        } else {
            self.primary.document_table(self.prefix)
        };
        sql.push_str(&format!("FROM {} i0", q(&primary_table)));
        if selection == Selection::Documents {
            sql.push_str(&format!(
                " INNER JOIN {} d ON d.{} = i0.{}",
                q(self.documents_table),
                q("id"),
                q("document_id")
            ));
        }
        for (n, join) in self.joins.iter().enumerate() {
            let alias = format!("i{}", n + 1);
            sql.push_str(&format!(
                " INNER JOIN {} {alias} ON {alias}.{} = i0.{}",
                q(&join.document_table(self.prefix)),
                q("document_id"),
                q("document_id")
            ));
        }
    }

    fn write_order(
        &self,
        sql: &mut String,
        query: &Query,
        selection: Selection,
    ) -> DocbaseResult<()> {
        let q = |name: &str| self.dialect.quote_ident(name);
        let mut keys: Vec<String> = Vec::new();
        for order in &query.order {
            let (alias, column) = self.resolve(&order.column, selection)?;
            keys.push(format!(
                "{alias}.{}{}",
                q(column),
                if order.descending { " DESC" } else { " ASC" }
            ));
        }
        // A deterministic tail key makes paging stable and satisfies the
        // ORDER BY requirement of OFFSET/FETCH dialects.
        match selection {
            Selection::ReducedRows => {
                for key_col in self.primary.key_columns() {
                    let rendered = format!("i0.{} ASC", q(&key_col.name));
                    if !keys.contains(&rendered) {
                        keys.push(rendered);
                    }
                }
            }
            _ => {
                keys.push(format!("i0.{} ASC", q("document_id")));
            }
        }
        sql.push_str(" ORDER BY ");
        sql.push_str(&keys.join(", "));
        Ok(())
    }

    /// Resolves a column reference to `(alias, column name)`, validating it
    /// exists on the referenced index.
    fn resolve(
        &self,
        column: &ColumnRef,
        selection: Selection,
    ) -> DocbaseResult<(String, &str)> {
        let (def, alias): (&IndexDef, String) = match &column.index {
            None => (self.primary, "i0".to_string()),
            Some(name) if name == self.primary.name() => (self.primary, "i0".to_string()),
            Some(name) => {
                let position = self
                    .joins
                    .iter()
                    .position(|j| j.name() == *name)
                    .ok_or_else(|| {
                        DocbaseError::QueryCompile(format!(
                            "column '{}.{}' references an index that is not joined",
                            name, column.column
                        ))
                    })?;
                (self.joins[position], format!("i{}", position + 1))
            }
        };

        let allowed: Vec<&str> = match (def.kind(), selection) {
            // The reduced table carries every declared column.
            (IndexKind::Reduce { .. }, Selection::ReducedRows) => {
                def.columns().iter().map(|c| c.name.as_str()).collect()
            }
            // A joined reduce index exposes only its bridge columns
            // (document_id plus the group key).
            (IndexKind::Reduce { .. }, _) => def
                .key_columns()
                .iter()
                .map(|c| c.name.as_str())
                .collect(),
            (IndexKind::Map, _) => def.columns().iter().map(|c| c.name.as_str()).collect(),
        };

        let found = allowed
            .iter()
            .find(|name| **name == column.column)
            .copied()
            .ok_or_else(|| {
                DocbaseError::QueryCompile(format!(
                    "index '{}' has no column '{}'",
                    def.name(),
                    column.column
                ))
            })?;
        Ok((alias, found))
    }
}

/// Visitor writing the predicate tree into a buffer and parameter list.
struct PredicateWriter<'w, 'a> {
    compiler: &'w QueryCompiler<'a>,
    selection: Selection,
    sql: &'w mut String,
    params: &'w mut Vec<SqlValue>,
}

impl PredicateWriter<'_, '_> {
    fn write_expr(&mut self, expr: &Expr) -> DocbaseResult<()> {
        match expr {
            Expr::And(list) => self.write_list(list, " AND "),
            Expr::Or(list) => self.write_list(list, " OR "),
            Expr::Not(inner) => {
                self.sql.push_str("NOT ");
                self.write_expr(inner)
            }
            Expr::Compare { column, op, value } => {
                self.write_column(column)?;
                self.sql.push(' ');
                self.sql.push_str(op.sql());
                self.sql.push(' ');
                self.push_param(value.clone());
                Ok(())
            }
            Expr::Between { column, low, high } => {
                self.write_column(column)?;
                self.sql.push_str(" BETWEEN ");
                self.push_param(low.clone());
                self.sql.push_str(" AND ");
                self.push_param(high.clone());
                Ok(())
            }
            Expr::In { column, values } => {
                if values.is_empty() {
                    // IN over nothing matches nothing.
                    self.sql.push_str("1 = 0");
                    return Ok(());
                }
                self.write_column(column)?;
                self.sql.push_str(" IN (");
                for (n, value) in values.iter().enumerate() {
                    if n > 0 {
                        self.sql.push_str(", ");
                    }
                    self.push_param(value.clone());
                }
                self.sql.push(')');
                Ok(())
            }
            Expr::IsNull { column, negated } => {
                self.write_column(column)?;
                self.sql
                    .push_str(if *negated { " IS NOT NULL" } else { " IS NULL" });
                Ok(())
            }
        }
    }

    fn write_list(&mut self, list: &[Expr], separator: &str) -> DocbaseResult<()> {
        self.sql.push('(');
        for (n, expr) in list.iter().enumerate() {
            if n > 0 {
                self.sql.push_str(separator);
            }
            self.write_expr(expr)?;
        }
        self.sql.push(')');
        Ok(())
    }

    fn write_column(&mut self, column: &ColumnRef) -> DocbaseResult<()> {
        let (alias, name) = self.compiler.resolve(column, self.selection)?;
        self.sql.push_str(&alias);
        self.sql.push('.');
        self.sql
            .push_str(&self.compiler.dialect.quote_ident(name));
        Ok(())
    }

    fn push_param(&mut self, value: SqlValue) {
        self.params.push(value);
        let ordinal = self.params.len();
        self.sql
            .push_str(&self.compiler.dialect.placeholder(ordinal));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::{PostgresDialect, SqlServerDialect, SqliteDialect};
    use crate::document::DocId;
    use crate::document::Document;
    use crate::index::{Aggregate, IndexRow, MapIndex, ReduceIndex};
    use crate::query::{col, desc};
    use crate::value::SqlType;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct User {
        id: DocId,
        name: String,
        age: i64,
        tag: String,
    }

    impl Document for User {
        fn id(&self) -> DocId {
            self.id
        }
        fn set_id(&mut self, id: DocId) {
            self.id = id;
        }
        fn document_type() -> &'static str {
            "user"
        }
    }

    fn by_name() -> IndexDef {
        MapIndex::<User>::new("by_name")
            .column("name", SqlType::Text)
            .column("age", SqlType::BigInt)
            .rows(|u| vec![IndexRow::new(vec![u.name.as_str().into(), u.age.into()])])
            .unwrap()
    }

    fn by_tag() -> IndexDef {
        MapIndex::<User>::new("by_tag")
            .column("tag", SqlType::Text)
            .rows(|u| vec![IndexRow::new(vec![u.tag.as_str().into()])])
            .unwrap()
    }

    fn count_by_tag() -> IndexDef {
        ReduceIndex::<User>::new("count_by_tag")
            .key("tag", SqlType::Text)
            .aggregate("n", SqlType::BigInt, Aggregate::Count)
            .rows(|u| vec![IndexRow::new(vec![u.tag.as_str().into(), 1i64.into()])])
            .unwrap()
    }

    #[test]
    fn test_document_query_sqlite() {
        let primary = by_name();
        let compiler =
            QueryCompiler::new(&SqliteDialect, "docbase_documents", "docbase_", &primary, vec![]);
        let mut query = Query::new();
        query.filter = Some(col("name").eq("x"));
        let stmt = compiler.compile(&query, Selection::Documents).unwrap();
        assert_eq!(
            stmt.sql,
            "SELECT d.\"id\", d.\"content\", d.\"version\" \
             FROM \"docbase_by_name_document\" i0 \
             INNER JOIN \"docbase_documents\" d ON d.\"id\" = i0.\"document_id\" \
             WHERE i0.\"name\" = ?1 \
             ORDER BY i0.\"document_id\" ASC"
        );
        assert_eq!(stmt.params, vec![SqlValue::Text("x".into())]);
    }

    #[test]
    fn test_same_tree_pages_per_dialect() {
        let primary = by_name();
        let mut query = Query::new();
        query.order.push(desc("age"));
        query.skip = Some(10);
        query.take = Some(5);

        let pg = QueryCompiler::new(
            &PostgresDialect,
            "docbase_documents",
            "docbase_",
            &primary,
            vec![],
        )
        .compile(&query, Selection::Ids)
        .unwrap();
        assert!(pg.sql.ends_with("ORDER BY i0.\"age\" DESC, i0.\"document_id\" ASC LIMIT 5 OFFSET 10"), "{}", pg.sql);

        let mssql = QueryCompiler::new(
            &SqlServerDialect,
            "docbase_documents",
            "docbase_",
            &primary,
            vec![],
        )
        .compile(&query, Selection::Ids)
        .unwrap();
        assert!(
            mssql
                .sql
                .ends_with("ORDER BY i0.[age] DESC, i0.[document_id] ASC OFFSET 10 ROWS FETCH NEXT 5 ROWS ONLY"),
            "{}",
            mssql.sql
        );
    }

    #[test]
    fn test_join_composes_as_inner_join() {
        let primary = by_name();
        let joined = by_tag();
        let compiler = QueryCompiler::new(
            &SqliteDialect,
            "docbase_documents",
            "docbase_",
            &primary,
            vec![&joined],
        );
        let mut query = Query::new();
        query.joins.push("by_tag".into());
        query.filter = Some(col("name").eq("x").and(col("by_tag.tag").eq("t")));
        let stmt = compiler.compile(&query, Selection::Ids).unwrap();
        assert!(stmt.sql.contains(
            "INNER JOIN \"docbase_by_tag_document\" i1 ON i1.\"document_id\" = i0.\"document_id\""
        ));
        assert!(stmt.sql.contains("(i0.\"name\" = ?1 AND i1.\"tag\" = ?2)"));
    }

    #[test]
    fn test_unknown_column_is_a_compile_error() {
        let primary = by_name();
        let compiler =
            QueryCompiler::new(&SqliteDialect, "docbase_documents", "docbase_", &primary, vec![]);
        let mut query = Query::new();
        query.filter = Some(col("nope").eq(1i64));
        let err = compiler.compile(&query, Selection::Documents).unwrap_err();
        assert!(matches!(err, DocbaseError::QueryCompile(_)), "{err}");
    }

    #[test]
    fn test_unjoined_index_reference_is_a_compile_error() {
        let primary = by_name();
        let compiler =
            QueryCompiler::new(&SqliteDialect, "docbase_documents", "docbase_", &primary, vec![]);
        let mut query = Query::new();
        query.filter = Some(col("by_tag.tag").eq("t"));
        let err = compiler.compile(&query, Selection::Ids).unwrap_err();
        assert!(err.to_string().contains("not joined"));
    }

    #[test]
    fn test_reduce_index_cannot_drive_document_query() {
        let primary = count_by_tag();
        let compiler =
            QueryCompiler::new(&SqliteDialect, "docbase_documents", "docbase_", &primary, vec![]);
        let err = compiler
            .compile(&Query::new(), Selection::Documents)
            .unwrap_err();
        assert!(err.to_string().contains("reduce index"));
    }

    #[test]
    fn test_reduced_rows_selection() {
        let primary = count_by_tag();
        let compiler =
            QueryCompiler::new(&SqliteDialect, "docbase_documents", "docbase_", &primary, vec![]);
        let stmt = compiler.compile(&Query::new(), Selection::ReducedRows).unwrap();
        assert_eq!(
            stmt.sql,
            "SELECT i0.\"tag\", i0.\"n\" FROM \"docbase_count_by_tag_reduced\" i0 \
             ORDER BY i0.\"tag\" ASC"
        );
    }

    #[test]
    fn test_empty_in_matches_nothing() {
        let primary = by_name();
        let compiler =
            QueryCompiler::new(&SqliteDialect, "docbase_documents", "docbase_", &primary, vec![]);
        let mut query = Query::new();
        query.filter = Some(col("name").is_in(Vec::<String>::new()));
        let stmt = compiler.compile(&query, Selection::Count).unwrap();
        assert_eq!(stmt.sql, "SELECT COUNT(*) FROM \"docbase_by_name_document\" i0 WHERE 1 = 0");
        assert!(stmt.params.is_empty());
    }

    #[test]
    fn test_count_ignores_paging() {
        let primary = by_name();
        let compiler =
            QueryCompiler::new(&SqliteDialect, "docbase_documents", "docbase_", &primary, vec![]);
        let mut query = Query::new();
        query.skip = Some(10);
        query.take = Some(5);
        let stmt = compiler.compile(&query, Selection::Count).unwrap();
        assert_eq!(stmt.sql, "SELECT COUNT(*) FROM \"docbase_by_name_document\" i0");
    }
}

//! Index maintenance: turning document deltas into minimal index-table DML.
//!
//! For every registered index and every document touched by a flush, the
//! engine computes the projection of the old payload and of the new payload,
//! diffs the two row sets by full equality, and emits the smallest batch of
//! statements that reconciles the stored rows: DELETE + INSERT for map
//! tables, arithmetic merge/un-merge (or a group rebuild when an aggregate
//! has no inverse) for reduce tables, with the document→group bridge
//! maintained ahead of the reduce-row upserts.

use std::cmp::Ordering;
use tracing::debug;

use crate::dialect::Dialect;
use crate::document::{AnyDocument, Codec, DocId};
use crate::error::{DocbaseError, DocbaseResult};
use crate::executor::{SqlTransaction, Statement};
use crate::index::{Aggregate, IndexDef, IndexKind, IndexRow};
use crate::value::{SqlValue, SqlRow};

/// Inserts rows in chunks that respect the dialect's parameter and row
/// ceilings, all within the supplied transaction.
pub(crate) async fn batch_insert(
    tx: &mut dyn SqlTransaction,
    dialect: &dyn Dialect,
    table: &str,
    columns: &[&str],
    rows: &[Vec<SqlValue>],
) -> DocbaseResult<()> {
    if rows.is_empty() {
        return Ok(());
    }
    let per_row = columns.len().max(1);
    let max_rows = (dialect.max_parameters() / per_row)
        .max(1)
        .min(dialect.max_rows_per_insert());
    for chunk in rows.chunks(max_rows) {
        let sql = dialect.insert_sql(table, columns, chunk.len());
        let params: Vec<SqlValue> = chunk.iter().flatten().cloned().collect();
        tx.execute(&Statement::new(sql, params)).await?;
    }
    Ok(())
}

/// The per-flush index maintenance engine.
pub(crate) struct IndexMaintenance<'a> {
    dialect: &'a dyn Dialect,
    prefix: &'a str,
    documents_table: &'a str,
    codec: &'a dyn Codec,
}

impl<'a> IndexMaintenance<'a> {
    pub fn new(
        dialect: &'a dyn Dialect,
        prefix: &'a str,
        documents_table: &'a str,
        codec: &'a dyn Codec,
    ) -> Self {
        Self { dialect, prefix, documents_table, codec }
    }

    /// Reconciles one index for one document delta. `old_doc` is the
    /// document decoded from its snapshot (`None` for inserts), `new_doc`
    /// the live object (`None` for deletes). Returns the new row set so the
    /// session can cache it on the tracked entry.
    pub async fn apply_document(
        &self,
        tx: &mut dyn SqlTransaction,
        def: &IndexDef,
        id: DocId,
        old_doc: Option<&dyn AnyDocument>,
        new_doc: Option<&dyn AnyDocument>,
    ) -> DocbaseResult<Vec<IndexRow>> {
        let old_rows = match old_doc {
            Some(doc) => def.project(doc)?,
            None => Vec::new(),
        };
        let new_rows = match new_doc {
            Some(doc) => def.project(doc)?,
            None => Vec::new(),
        };
        if old_rows == new_rows {
            return Ok(new_rows);
        }
        match def.kind() {
            IndexKind::Map => {
                self.apply_map(tx, def, id, &old_rows, &new_rows).await?;
            }
            IndexKind::Reduce { key_len, aggregates } => {
                self.apply_reduce(tx, def, id, *key_len, aggregates, &old_rows, &new_rows)
                    .await?;
            }
        }
        Ok(new_rows)
    }

    async fn apply_map(
        &self,
        tx: &mut dyn SqlTransaction,
        def: &IndexDef,
        id: DocId,
        old_rows: &[IndexRow],
        new_rows: &[IndexRow],
    ) -> DocbaseResult<()> {
        let (removed, added) = diff_rows(old_rows, new_rows);
        let table = def.document_table(self.prefix);
        debug!(
            index = def.name(),
            document = id,
            removed = removed.len(),
            added = added.len(),
            "map index delta"
        );

        for row in &removed {
            let stmt = self.delete_row_statement(&table, def, id, row);
            tx.execute(&stmt).await?;
        }

        if !added.is_empty() {
            let mut columns: Vec<&str> = vec!["document_id"];
            columns.extend(def.columns().iter().map(|c| c.name.as_str()));
            let rows: Vec<Vec<SqlValue>> = added
                .into_iter()
                .map(|row| {
                    let mut values = Vec::with_capacity(row.len() + 1);
                    values.push(SqlValue::BigInt(id));
                    values.extend(row.0);
                    values
                })
                .collect();
            batch_insert(tx, self.dialect, &table, &columns, &rows).await?;
        }
        Ok(())
    }

    /// DELETE matching one map row by its full contents plus document id.
    fn delete_row_statement(
        &self,
        table: &str,
        def: &IndexDef,
        id: DocId,
        row: &IndexRow,
    ) -> Statement {
        let q = |name: &str| self.dialect.quote_ident(name);
        let mut params: Vec<SqlValue> = vec![SqlValue::BigInt(id)];
        let mut clauses = vec![format!(
            "{} = {}",
            q("document_id"),
            self.dialect.placeholder(1)
        )];
        for (col, value) in def.columns().iter().zip(row.0.iter()) {
            if value.is_null() {
                clauses.push(format!("{} IS NULL", q(&col.name)));
            } else {
                params.push(value.clone());
                clauses.push(format!(
                    "{} = {}",
                    q(&col.name),
                    self.dialect.placeholder(params.len())
                ));
            }
        }
        Statement::new(
            format!("DELETE FROM {} WHERE {}", q(table), clauses.join(" AND ")),
            params,
        )
    }

    #[allow(clippy::too_many_arguments)]
    async fn apply_reduce(
        &self,
        tx: &mut dyn SqlTransaction,
        def: &IndexDef,
        id: DocId,
        key_len: usize,
        aggregates: &[Aggregate],
        old_rows: &[IndexRow],
        new_rows: &[IndexRow],
    ) -> DocbaseResult<()> {
        let old_groups = group_rows(old_rows, key_len);
        let new_groups = group_rows(new_rows, key_len);
        let mut affected: Vec<Vec<SqlValue>> = Vec::new();
        for (key, _) in old_groups.iter().chain(new_groups.iter()) {
            if !affected.contains(key) {
                affected.push(key.clone());
            }
        }

        let bridge = def.document_table(self.prefix);
        let q = |name: &str| self.dialect.quote_ident(name);

        // Bridge rows first, so contributor counts and rebuilds observe the
        // post-delta membership.
        for key in &affected {
            let was = find_group(&old_groups, key).is_some();
            let is = find_group(&new_groups, key).is_some();
            if was && !is {
                let mut params = vec![SqlValue::BigInt(id)];
                let mut clauses = vec![format!(
                    "{} = {}",
                    q("document_id"),
                    self.dialect.placeholder(1)
                )];
                self.push_key_clauses(def, key, &mut clauses, &mut params);
                tx.execute(&Statement::new(
                    format!("DELETE FROM {} WHERE {}", q(&bridge), clauses.join(" AND ")),
                    params,
                ))
                .await?;
            } else if !was && is {
                let mut columns: Vec<&str> = vec!["document_id"];
                columns.extend(def.key_columns().iter().map(|c| c.name.as_str()));
                let mut values = vec![SqlValue::BigInt(id)];
                values.extend(key.iter().cloned());
                batch_insert(tx, self.dialect, &bridge, &columns, &[values]).await?;
            }
        }

        let invertible = aggregates.iter().all(|a| a.invertible());
        for key in &affected {
            let old_group = find_group(&old_groups, key).map(Vec::as_slice).unwrap_or(&[]);
            let new_group = find_group(&new_groups, key).map(Vec::as_slice).unwrap_or(&[]);
            let contributors = self.count_contributors(tx, def, key).await?;
            if contributors == 0 {
                self.delete_reduced_row(tx, def, key).await?;
                continue;
            }
            if invertible {
                self.merge_invertible(tx, def, key, key_len, aggregates, old_group, new_group)
                    .await?;
            } else {
                self.rebuild_group(tx, def, key, key_len, aggregates).await?;
            }
        }
        Ok(())
    }

    async fn count_contributors(
        &self,
        tx: &mut dyn SqlTransaction,
        def: &IndexDef,
        key: &[SqlValue],
    ) -> DocbaseResult<i64> {
        let q = |name: &str| self.dialect.quote_ident(name);
        let mut params = Vec::new();
        let mut clauses = Vec::new();
        self.push_key_clauses(def, key, &mut clauses, &mut params);
        let rows = tx
            .query(&Statement::new(
                format!(
                    "SELECT COUNT(*) FROM {} WHERE {}",
                    q(&def.document_table(self.prefix)),
                    clauses.join(" AND ")
                ),
                params,
            ))
            .await?;
        Ok(rows.first().and_then(|r| r.i64(0)).unwrap_or(0))
    }

    async fn delete_reduced_row(
        &self,
        tx: &mut dyn SqlTransaction,
        def: &IndexDef,
        key: &[SqlValue],
    ) -> DocbaseResult<()> {
        let q = |name: &str| self.dialect.quote_ident(name);
        let mut params = Vec::new();
        let mut clauses = Vec::new();
        self.push_key_clauses(def, key, &mut clauses, &mut params);
        debug!(index = def.name(), "reduce group emptied, deleting row");
        tx.execute(&Statement::new(
            format!(
                "DELETE FROM {} WHERE {}",
                q(&def.reduced_table(self.prefix)),
                clauses.join(" AND ")
            ),
            params,
        ))
        .await?;
        Ok(())
    }

    /// Applies the additive delta of this document's contributions to the
    /// group row, inserting the row when the document is its first
    /// contributor.
    #[allow(clippy::too_many_arguments)]
    async fn merge_invertible(
        &self,
        tx: &mut dyn SqlTransaction,
        def: &IndexDef,
        key: &[SqlValue],
        key_len: usize,
        aggregates: &[Aggregate],
        old_group: &[IndexRow],
        new_group: &[IndexRow],
    ) -> DocbaseResult<()> {
        let q = |name: &str| self.dialect.quote_ident(name);
        let table = def.reduced_table(self.prefix);
        let value_columns = &def.columns()[key_len..];

        let mut deltas = Vec::with_capacity(aggregates.len());
        for (offset, aggregate) in aggregates.iter().enumerate() {
            deltas.push(column_delta(
                *aggregate,
                old_group,
                new_group,
                key_len + offset,
            )?);
        }

        let mut params: Vec<SqlValue> = Vec::new();
        let mut sets = Vec::with_capacity(value_columns.len());
        for (col, delta) in value_columns.iter().zip(deltas.iter()) {
            params.push(delta.clone());
            sets.push(format!(
                "{} = {} + {}",
                q(&col.name),
                q(&col.name),
                self.dialect.placeholder(params.len())
            ));
        }
        let mut clauses = Vec::new();
        self.push_key_clauses(def, key, &mut clauses, &mut params);
        let affected = tx
            .execute(&Statement::new(
                format!(
                    "UPDATE {} SET {} WHERE {}",
                    q(&table),
                    sets.join(", "),
                    clauses.join(" AND ")
                ),
                params,
            ))
            .await?;

        if affected == 0 {
            // First contributor: the row starts at this document's own
            // aggregate over its new contributions.
            let mut columns: Vec<&str> =
                def.key_columns().iter().map(|c| c.name.as_str()).collect();
            columns.extend(value_columns.iter().map(|c| c.name.as_str()));
            let mut values: Vec<SqlValue> = key.to_vec();
            for (offset, aggregate) in aggregates.iter().enumerate() {
                values.push(aggregate_rows(*aggregate, new_group, key_len + offset)?);
            }
            batch_insert(tx, self.dialect, &table, &columns, &[values]).await?;
        }
        Ok(())
    }

    /// Recomputes a group from scratch: reads the surviving contributors
    /// through the bridge, re-projects their stored payloads and rewrites
    /// the row. Used whenever an aggregate declares no inverse.
    async fn rebuild_group(
        &self,
        tx: &mut dyn SqlTransaction,
        def: &IndexDef,
        key: &[SqlValue],
        key_len: usize,
        aggregates: &[Aggregate],
    ) -> DocbaseResult<()> {
        let q = |name: &str| self.dialect.quote_ident(name);
        let mut params = Vec::new();
        let mut clauses = Vec::new();
        self.push_key_clauses(def, key, &mut clauses, &mut params);
        let rows = tx
            .query(&Statement::new(
                format!(
                    "SELECT {} FROM {} WHERE {}",
                    q("document_id"),
                    q(&def.document_table(self.prefix)),
                    clauses.join(" AND ")
                ),
                params,
            ))
            .await?;
        let contributor_ids: Vec<DocId> =
            rows.iter().filter_map(|r| r.i64(0)).collect();
        if contributor_ids.is_empty() {
            return self.delete_reduced_row(tx, def, key).await;
        }
        debug!(
            index = def.name(),
            contributors = contributor_ids.len(),
            "rebuilding reduce group"
        );

        let mut group_rows: Vec<IndexRow> = Vec::new();
        for chunk in contributor_ids.chunks(self.dialect.max_parameters().max(1)) {
            let placeholders: Vec<String> = (1..=chunk.len())
                .map(|n| self.dialect.placeholder(n))
                .collect();
            let stmt = Statement::new(
                format!(
                    "SELECT {} FROM {} WHERE {} IN ({})",
                    q("content"),
                    q(self.documents_table),
                    q("id"),
                    placeholders.join(", ")
                ),
                chunk.iter().map(|id| SqlValue::BigInt(*id)).collect(),
            );
            for row in tx.query(&stmt).await? {
                let bytes = payload_bytes(&row).ok_or_else(|| {
                    DocbaseError::Backend("document payload column was not readable".to_string())
                })?;
                let value = self.codec.decode(bytes)?;
                let doc = def.decode_document(value)?;
                for projected in def.project(doc.as_ref())? {
                    if projected.0[..key_len] == *key {
                        group_rows.push(projected);
                    }
                }
            }
        }

        let value_columns = &def.columns()[key_len..];
        let mut params: Vec<SqlValue> = Vec::new();
        let mut sets = Vec::with_capacity(value_columns.len());
        for ((offset, aggregate), col) in
            aggregates.iter().enumerate().zip(value_columns.iter())
        {
            params.push(aggregate_rows(*aggregate, &group_rows, key_len + offset)?);
            sets.push(format!(
                "{} = {}",
                q(&col.name),
                self.dialect.placeholder(params.len())
            ));
        }
        let insert_values: Vec<SqlValue> = params.clone();
        let mut clauses = Vec::new();
        self.push_key_clauses(def, key, &mut clauses, &mut params);
        let affected = tx
            .execute(&Statement::new(
                format!(
                    "UPDATE {} SET {} WHERE {}",
                    q(&def.reduced_table(self.prefix)),
                    sets.join(", "),
                    clauses.join(" AND ")
                ),
                params,
            ))
            .await?;
        if affected == 0 {
            let mut columns: Vec<&str> =
                def.key_columns().iter().map(|c| c.name.as_str()).collect();
            columns.extend(value_columns.iter().map(|c| c.name.as_str()));
            let mut values: Vec<SqlValue> = key.to_vec();
            values.extend(insert_values);
            batch_insert(
                tx,
                self.dialect,
                &def.reduced_table(self.prefix),
                &columns,
                &[values],
            )
            .await?;
        }
        Ok(())
    }

    /// Appends `key_col = ?` clauses, continuing the parameter numbering.
    fn push_key_clauses(
        &self,
        def: &IndexDef,
        key: &[SqlValue],
        clauses: &mut Vec<String>,
        params: &mut Vec<SqlValue>,
    ) {
        for (col, value) in def.key_columns().iter().zip(key.iter()) {
            params.push(value.clone());
            clauses.push(format!(
                "{} = {}",
                self.dialect.quote_ident(&col.name),
                self.dialect.placeholder(params.len())
            ));
        }
    }
}

/// The payload cell of a documents-table row, whichever shape the executor
/// returned it in.
fn payload_bytes(row: &SqlRow) -> Option<&[u8]> {
    match row.0.first() {
        Some(SqlValue::Blob(bytes)) => Some(bytes),
        Some(SqlValue::Text(text)) => Some(text.as_bytes()),
        _ => None,
    }
}

/// Multiset diff by full row equality: rows in `old` but not `new` are
/// removed, rows in `new` but not `old` are added.
fn diff_rows(old: &[IndexRow], new: &[IndexRow]) -> (Vec<IndexRow>, Vec<IndexRow>) {
    let mut added: Vec<IndexRow> = new.to_vec();
    let mut removed = Vec::new();
    for row in old {
        if let Some(position) = added.iter().position(|candidate| candidate == row) {
            added.remove(position);
        } else {
            removed.push(row.clone());
        }
    }
    (removed, added)
}

type Grouped = Vec<(Vec<SqlValue>, Vec<IndexRow>)>;

fn group_rows(rows: &[IndexRow], key_len: usize) -> Grouped {
    let mut groups: Grouped = Vec::new();
    for row in rows {
        let key = row.0[..key_len].to_vec();
        match groups.iter_mut().find(|(k, _)| *k == key) {
            Some((_, members)) => members.push(row.clone()),
            None => groups.push((key, vec![row.clone()])),
        }
    }
    groups
}

fn find_group<'g>(groups: &'g Grouped, key: &[SqlValue]) -> Option<&'g Vec<IndexRow>> {
    groups
        .iter()
        .find(|(k, _)| k.as_slice() == key)
        .map(|(_, rows)| rows)
}

/// Numeric accumulator that stays integral until a float contribution
/// appears.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Accum {
    Int(i64),
    Float(f64),
}

impl Accum {
    fn add(self, value: &SqlValue) -> DocbaseResult<Accum> {
        match (self, value) {
            (Accum::Int(acc), SqlValue::BigInt(v)) => Ok(Accum::Int(acc + v)),
            (Accum::Int(acc), SqlValue::Int(v)) => Ok(Accum::Int(acc + i64::from(*v))),
            (Accum::Int(acc), SqlValue::Double(v)) => Ok(Accum::Float(acc as f64 + v)),
            (Accum::Float(acc), SqlValue::BigInt(v)) => Ok(Accum::Float(acc + *v as f64)),
            (Accum::Float(acc), SqlValue::Int(v)) => Ok(Accum::Float(acc + f64::from(*v))),
            (Accum::Float(acc), SqlValue::Double(v)) => Ok(Accum::Float(acc + v)),
            _ => Err(DocbaseError::Configuration(format!(
                "cannot sum non-numeric contribution {value:?}"
            ))),
        }
    }

    fn sub(self, value: &SqlValue) -> DocbaseResult<Accum> {
        let negated = match value {
            SqlValue::BigInt(v) => SqlValue::BigInt(-v),
            SqlValue::Int(v) => SqlValue::Int(-v),
            SqlValue::Double(v) => SqlValue::Double(-v),
            other => other.clone(),
        };
        self.add(&negated)
    }

    fn into_value(self) -> SqlValue {
        match self {
            Accum::Int(v) => SqlValue::BigInt(v),
            Accum::Float(v) => SqlValue::Double(v),
        }
    }
}

/// The additive delta of one value column between two contribution sets.
fn column_delta(
    aggregate: Aggregate,
    old_rows: &[IndexRow],
    new_rows: &[IndexRow],
    column: usize,
) -> DocbaseResult<SqlValue> {
    match aggregate {
        Aggregate::Count => {
            Ok(SqlValue::BigInt(new_rows.len() as i64 - old_rows.len() as i64))
        }
        Aggregate::Sum => {
            let mut accum = Accum::Int(0);
            for row in new_rows {
                accum = accum.add(&row.0[column])?;
            }
            for row in old_rows {
                accum = accum.sub(&row.0[column])?;
            }
            Ok(accum.into_value())
        }
        Aggregate::Min | Aggregate::Max => Err(DocbaseError::Configuration(
            "min/max aggregates have no inverse and cannot merge deltas".to_string(),
        )),
    }
}

/// Aggregates one value column over a full contribution set.
fn aggregate_rows(
    aggregate: Aggregate,
    rows: &[IndexRow],
    column: usize,
) -> DocbaseResult<SqlValue> {
    match aggregate {
        Aggregate::Count => Ok(SqlValue::BigInt(rows.len() as i64)),
        Aggregate::Sum => {
            let mut accum = Accum::Int(0);
            for row in rows {
                accum = accum.add(&row.0[column])?;
            }
            Ok(accum.into_value())
        }
        Aggregate::Min | Aggregate::Max => {
            let mut best: Option<SqlValue> = None;
            for row in rows {
                let value = &row.0[column];
                best = Some(match best {
                    None => value.clone(),
                    Some(current) => {
                        let ordering = compare_values(&current, value)?;
                        let keep_current = match aggregate {
                            Aggregate::Min => ordering != Ordering::Greater,
                            _ => ordering != Ordering::Less,
                        };
                        if keep_current {
                            current
                        } else {
                            value.clone()
                        }
                    }
                });
            }
            best.ok_or_else(|| {
                DocbaseError::Configuration(
                    "cannot aggregate an empty group; the row should have been deleted"
                        .to_string(),
                )
            })
        }
    }
}

fn compare_values(a: &SqlValue, b: &SqlValue) -> DocbaseResult<Ordering> {
    let ordering = match (a, b) {
        (SqlValue::BigInt(x), SqlValue::BigInt(y)) => x.cmp(y),
        (SqlValue::Int(x), SqlValue::Int(y)) => x.cmp(y),
        (SqlValue::BigInt(x), SqlValue::Int(y)) => x.cmp(&i64::from(*y)),
        (SqlValue::Int(x), SqlValue::BigInt(y)) => i64::from(*x).cmp(y),
        (SqlValue::Double(x), SqlValue::Double(y)) => {
            x.partial_cmp(y).unwrap_or(Ordering::Equal)
        }
        (SqlValue::Text(x), SqlValue::Text(y)) => x.cmp(y),
        (SqlValue::DateTime(x), SqlValue::DateTime(y)) => x.cmp(y),
        _ => {
            return Err(DocbaseError::Configuration(format!(
                "values {a:?} and {b:?} are not comparable"
            )))
        }
    };
    Ok(ordering)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(values: Vec<SqlValue>) -> IndexRow {
        IndexRow::new(values)
    }

    #[test]
    fn test_diff_rows_multiset() {
        let old = vec![
            row(vec!["a".into()]),
            row(vec!["a".into()]),
            row(vec!["b".into()]),
        ];
        let new = vec![row(vec!["a".into()]), row(vec!["c".into()])];
        let (removed, added) = diff_rows(&old, &new);
        assert_eq!(removed, vec![row(vec!["a".into()]), row(vec!["b".into()])]);
        assert_eq!(added, vec![row(vec!["c".into()])]);
    }

    #[test]
    fn test_diff_rows_identical_sets_are_quiet() {
        let rows = vec![row(vec!["a".into(), 1i64.into()])];
        let (removed, added) = diff_rows(&rows, &rows);
        assert!(removed.is_empty());
        assert!(added.is_empty());
    }

    #[test]
    fn test_group_rows_by_key_prefix() {
        let rows = vec![
            row(vec!["t".into(), 1i64.into()]),
            row(vec!["t".into(), 2i64.into()]),
            row(vec!["u".into(), 3i64.into()]),
        ];
        let groups = group_rows(&rows, 1);
        assert_eq!(groups.len(), 2);
        assert_eq!(find_group(&groups, &["t".into()]).unwrap().len(), 2);
        assert_eq!(find_group(&groups, &["u".into()]).unwrap().len(), 1);
        assert!(find_group(&groups, &["v".into()]).is_none());
    }

    #[test]
    fn test_count_delta() {
        let old = vec![row(vec!["t".into(), 1i64.into()])];
        let new = vec![
            row(vec!["t".into(), 1i64.into()]),
            row(vec!["t".into(), 1i64.into()]),
            row(vec!["t".into(), 1i64.into()]),
        ];
        let delta = column_delta(Aggregate::Count, &old, &new, 1).unwrap();
        assert_eq!(delta, SqlValue::BigInt(2));
    }

    #[test]
    fn test_sum_delta_can_be_negative() {
        let old = vec![row(vec!["t".into(), 10i64.into()])];
        let new = vec![row(vec!["t".into(), 4i64.into()])];
        let delta = column_delta(Aggregate::Sum, &old, &new, 1).unwrap();
        assert_eq!(delta, SqlValue::BigInt(-6));
    }

    #[test]
    fn test_sum_delta_widens_to_float() {
        let old: Vec<IndexRow> = vec![];
        let new = vec![row(vec!["t".into(), SqlValue::Double(1.5)])];
        let delta = column_delta(Aggregate::Sum, &old, &new, 1).unwrap();
        assert_eq!(delta, SqlValue::Double(1.5));
    }

    #[test]
    fn test_min_max_have_no_delta_path() {
        assert!(column_delta(Aggregate::Min, &[], &[], 1).is_err());
        assert!(column_delta(Aggregate::Max, &[], &[], 1).is_err());
    }

    #[test]
    fn test_aggregate_rows_min_max() {
        let rows = vec![
            row(vec!["t".into(), 5i64.into()]),
            row(vec!["t".into(), 2i64.into()]),
            row(vec!["t".into(), 9i64.into()]),
        ];
        assert_eq!(
            aggregate_rows(Aggregate::Min, &rows, 1).unwrap(),
            SqlValue::BigInt(2)
        );
        assert_eq!(
            aggregate_rows(Aggregate::Max, &rows, 1).unwrap(),
            SqlValue::BigInt(9)
        );
        assert_eq!(
            aggregate_rows(Aggregate::Sum, &rows, 1).unwrap(),
            SqlValue::BigInt(16)
        );
        assert_eq!(
            aggregate_rows(Aggregate::Count, &rows, 1).unwrap(),
            SqlValue::BigInt(3)
        );
    }

    #[test]
    fn test_sum_rejects_non_numeric() {
        let rows = vec![row(vec!["t".into(), "oops".into()])];
        assert!(aggregate_rows(Aggregate::Sum, &rows, 1).is_err());
    }
}

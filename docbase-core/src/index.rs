//! Index descriptors: user-declared projections from documents to rows.
//!
//! A *map* index contributes zero or more rows per document; a *reduce*
//! index groups map output by a key column set and aggregates the remaining
//! columns across all contributing documents. Descriptors are built through
//! the typed [`MapIndex`]/[`ReduceIndex`] builders, then erased into
//! [`IndexDef`]s the store registry dispatches over by document type tag.

use serde_json::Value;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::document::{AnyDocument, Document, DocumentExt};
use crate::error::{DocbaseError, DocbaseResult};
use crate::value::{SqlType, SqlValue};

/// One output row of an index projection, cells in declared column order.
///
/// Rows have no identity beyond their contents; the maintenance engine diffs
/// old and new row sets by full equality.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexRow(pub Vec<SqlValue>);

impl IndexRow {
    pub fn new(values: Vec<SqlValue>) -> Self {
        Self(values)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<SqlValue>> for IndexRow {
    fn from(values: Vec<SqlValue>) -> Self {
        Self(values)
    }
}

impl<T: Into<SqlValue>> FromIterator<T> for IndexRow {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

/// Aggregation function for one reduce-index value column.
///
/// `Count` and `Sum` have an inverse, so document removal can be applied
/// arithmetically. `Min` and `Max` do not; removing a contributor forces the
/// affected group to be re-aggregated from its remaining documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregate {
    /// Counts contributing rows. Projections emit `1` for this column.
    Count,
    /// Sums the emitted integer contribution.
    Sum,
    /// Minimum of the emitted contributions. Not invertible.
    Min,
    /// Maximum of the emitted contributions. Not invertible.
    Max,
}

impl Aggregate {
    /// Whether removal can be applied without re-reading the group.
    pub fn invertible(self) -> bool {
        matches!(self, Aggregate::Count | Aggregate::Sum)
    }
}

/// One typed column of an index table.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexColumn {
    pub name: String,
    pub sql_type: SqlType,
    pub nullable: bool,
}

/// The flavor of an index.
#[derive(Debug, Clone, PartialEq)]
pub enum IndexKind {
    /// Each document contributes a set of rows referencing it by id.
    Map,
    /// Rows are grouped by the first `key_len` columns; each remaining
    /// column carries the aggregate at the same offset in `aggregates`.
    Reduce { key_len: usize, aggregates: Vec<Aggregate> },
}

type Projection = Arc<dyn Fn(&dyn Any) -> Vec<IndexRow> + Send + Sync>;
type Decoder = Arc<dyn Fn(Value) -> DocbaseResult<Box<dyn AnyDocument>> + Send + Sync>;

/// An erased, registered index: column schema, flavor, projection function
/// and a decoder for re-materializing documents of the target type.
pub struct IndexDef {
    name: String,
    doc_type: &'static str,
    columns: Vec<IndexColumn>,
    kind: IndexKind,
    projection: Projection,
    decoder: Decoder,
}

impl fmt::Debug for IndexDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexDef")
            .field("name", &self.name)
            .field("doc_type", &self.doc_type)
            .field("columns", &self.columns)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

impl IndexDef {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn doc_type(&self) -> &'static str {
        self.doc_type
    }

    pub fn columns(&self) -> &[IndexColumn] {
        &self.columns
    }

    pub fn kind(&self) -> &IndexKind {
        &self.kind
    }

    pub fn is_reduce(&self) -> bool {
        matches!(self.kind, IndexKind::Reduce { .. })
    }

    /// Key columns of a reduce index, empty for map indexes.
    pub fn key_columns(&self) -> &[IndexColumn] {
        match self.kind {
            IndexKind::Reduce { key_len, .. } => &self.columns[..key_len],
            IndexKind::Map => &[],
        }
    }

    /// Value columns and their aggregates for a reduce index.
    pub fn value_columns(&self) -> Vec<(&IndexColumn, Aggregate)> {
        match &self.kind {
            IndexKind::Reduce { key_len, aggregates } => self.columns[*key_len..]
                .iter()
                .zip(aggregates.iter().copied())
                .collect(),
            IndexKind::Map => Vec::new(),
        }
    }

    /// The table holding per-document rows: the map rows table, or the
    /// document→group bridge of a reduce index.
    pub fn document_table(&self, prefix: &str) -> String {
        format!("{prefix}{}_document", self.name)
    }

    /// The aggregated rows table of a reduce index.
    pub fn reduced_table(&self, prefix: &str) -> String {
        format!("{prefix}{}_reduced", self.name)
    }

    /// Runs the projection against a tracked document.
    pub(crate) fn project(&self, doc: &dyn AnyDocument) -> DocbaseResult<Vec<IndexRow>> {
        if doc.type_name() != self.doc_type {
            return Err(DocbaseError::Configuration(format!(
                "index '{}' targets '{}' but was given a '{}' document",
                self.name,
                self.doc_type,
                doc.type_name()
            )));
        }
        let rows = (self.projection)(doc.as_any());
        for row in &rows {
            if row.len() != self.columns.len() {
                return Err(DocbaseError::Configuration(format!(
                    "index '{}' projection emitted {} values, expected {}",
                    self.name,
                    row.len(),
                    self.columns.len()
                )));
            }
        }
        Ok(rows)
    }

    /// Re-materializes a document of this index's target type from its
    /// interchange value (used by the reduce rebuild path).
    pub(crate) fn decode_document(&self, value: Value) -> DocbaseResult<Box<dyn AnyDocument>> {
        (self.decoder)(value)
    }
}

fn erase<D: Document>(
    rows: impl Fn(&D) -> Vec<IndexRow> + Send + Sync + 'static,
) -> (Projection, Decoder) {
    let projection: Projection = Arc::new(move |any: &dyn Any| match any.downcast_ref::<D>() {
        Some(doc) => rows(doc),
        None => Vec::new(),
    });
    let decoder: Decoder = Arc::new(|value: Value| {
        let doc = D::from_interchange(value)?;
        Ok(Box::new(doc) as Box<dyn AnyDocument>)
    });
    (projection, decoder)
}

/// Builder for map indexes.
///
/// # Example
///
/// ```ignore
/// let by_name = MapIndex::<User>::new("by_name")
///     .column("name", SqlType::Text)
///     .rows(|u| vec![IndexRow::new(vec![u.name.as_str().into()])])?;
/// ```
pub struct MapIndex<D: Document> {
    name: String,
    columns: Vec<IndexColumn>,
    _marker: std::marker::PhantomData<fn(&D)>,
}

impl<D: Document> MapIndex<D> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            _marker: std::marker::PhantomData,
        }
    }

    /// Adds a NOT NULL column.
    pub fn column(mut self, name: impl Into<String>, sql_type: SqlType) -> Self {
        self.columns.push(IndexColumn {
            name: name.into(),
            sql_type,
            nullable: false,
        });
        self
    }

    /// Adds a nullable column.
    pub fn nullable_column(mut self, name: impl Into<String>, sql_type: SqlType) -> Self {
        self.columns.push(IndexColumn {
            name: name.into(),
            sql_type,
            nullable: true,
        });
        self
    }

    /// Finalizes the index with its projection function.
    pub fn rows(
        self,
        f: impl Fn(&D) -> Vec<IndexRow> + Send + Sync + 'static,
    ) -> DocbaseResult<IndexDef> {
        if self.columns.is_empty() {
            return Err(DocbaseError::Configuration(format!(
                "map index '{}' must declare at least one column",
                self.name
            )));
        }
        validate_columns(&self.name, &self.columns)?;
        let (projection, decoder) = erase(f);
        Ok(IndexDef {
            name: self.name,
            doc_type: D::document_type(),
            columns: self.columns,
            kind: IndexKind::Map,
            projection,
            decoder,
        })
    }
}

/// Builder for reduce indexes.
///
/// # Example
///
/// ```ignore
/// let count_by_tag = ReduceIndex::<Post>::new("count_by_tag")
///     .key("tag", SqlType::Text)
///     .aggregate("n", SqlType::BigInt, Aggregate::Count)
///     .rows(|p| vec![IndexRow::new(vec![p.tag.as_str().into(), 1i64.into()])])?;
/// ```
pub struct ReduceIndex<D: Document> {
    name: String,
    keys: Vec<IndexColumn>,
    values: Vec<(IndexColumn, Aggregate)>,
    _marker: std::marker::PhantomData<fn(&D)>,
}

impl<D: Document> ReduceIndex<D> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            keys: Vec::new(),
            values: Vec::new(),
            _marker: std::marker::PhantomData,
        }
    }

    /// Adds a grouping key column. Keys are always NOT NULL.
    pub fn key(mut self, name: impl Into<String>, sql_type: SqlType) -> Self {
        self.keys.push(IndexColumn {
            name: name.into(),
            sql_type,
            nullable: false,
        });
        self
    }

    /// Adds an aggregated value column.
    pub fn aggregate(
        mut self,
        name: impl Into<String>,
        sql_type: SqlType,
        aggregate: Aggregate,
    ) -> Self {
        self.values.push((
            IndexColumn { name: name.into(), sql_type, nullable: false },
            aggregate,
        ));
        self
    }

    /// Finalizes the index with its projection function. The projection
    /// emits full rows (key values followed by per-document contributions).
    pub fn rows(
        self,
        f: impl Fn(&D) -> Vec<IndexRow> + Send + Sync + 'static,
    ) -> DocbaseResult<IndexDef> {
        if self.keys.is_empty() {
            return Err(DocbaseError::Configuration(format!(
                "reduce index '{}' must declare at least one key column",
                self.name
            )));
        }
        if self.values.is_empty() {
            return Err(DocbaseError::Configuration(format!(
                "reduce index '{}' must declare at least one aggregated column",
                self.name
            )));
        }
        let key_len = self.keys.len();
        let aggregates: Vec<Aggregate> = self.values.iter().map(|(_, a)| *a).collect();
        let mut columns = self.keys;
        columns.extend(self.values.into_iter().map(|(c, _)| c));
        validate_columns(&self.name, &columns)?;
        let (projection, decoder) = erase(f);
        Ok(IndexDef {
            name: self.name,
            doc_type: D::document_type(),
            columns,
            kind: IndexKind::Reduce { key_len, aggregates },
            projection,
            decoder,
        })
    }
}

fn validate_columns(index: &str, columns: &[IndexColumn]) -> DocbaseResult<()> {
    let mut seen = std::collections::HashSet::new();
    for col in columns {
        if col.name == "document_id" {
            return Err(DocbaseError::Configuration(format!(
                "index '{index}' may not declare the reserved column 'document_id'"
            )));
        }
        if !seen.insert(col.name.as_str()) {
            return Err(DocbaseError::Configuration(format!(
                "index '{index}' declares duplicate column '{}'",
                col.name
            )));
        }
    }
    Ok(())
}

/// Registry of all indexes declared on a store, keyed by name and by
/// document type tag.
#[derive(Debug, Default)]
pub(crate) struct IndexRegistry {
    by_name: HashMap<String, Arc<IndexDef>>,
    by_type: HashMap<&'static str, Vec<Arc<IndexDef>>>,
}

impl IndexRegistry {
    pub fn register(&mut self, def: IndexDef) -> DocbaseResult<()> {
        if self.by_name.contains_key(def.name()) {
            return Err(DocbaseError::Configuration(format!(
                "duplicate index name '{}'",
                def.name()
            )));
        }
        let def = Arc::new(def);
        self.by_type
            .entry(def.doc_type())
            .or_default()
            .push(Arc::clone(&def));
        self.by_name.insert(def.name().to_string(), def);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Arc<IndexDef>> {
        self.by_name.get(name)
    }

    pub fn for_type(&self, doc_type: &str) -> &[Arc<IndexDef>] {
        self.by_type
            .get(doc_type)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn all(&self) -> impl Iterator<Item = &Arc<IndexDef>> {
        self.by_name.values()
    }
}

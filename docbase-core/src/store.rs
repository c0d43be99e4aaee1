//! The document store: process-wide configuration and session factory.
//!
//! A [`DocumentStore`] is built once per configured database, holds the
//! dialect, the executor, the codec, the registered document types and
//! indexes, and the id allocator. It is immutable after construction apart
//! from the atomic id pool, so it is safe to share across tasks. Sessions
//! borrow the store and never outlive it.
//!
//! # Example
//!
//! ```ignore
//! let store = DocumentStore::builder()
//!     .dialect(SqliteDialect)
//!     .executor(executor)
//!     .register::<User>()
//!     .index(MapIndex::<User>::new("by_name")
//!         .column("name", SqlType::Text)
//!         .rows(|u| vec![IndexRow::new(vec![u.name.as_str().into()])])?)
//!     .build()?;
//! store.initialize().await?;
//! let mut session = store.create_session();
//! ```

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, instrument};

use crate::dialect::Dialect;
use crate::document::{AnyDocument, Codec, Document, DocumentExt, JsonCodec};
use crate::error::{DocbaseError, DocbaseResult};
use crate::executor::{SqlExecutor, Statement};
use crate::ids::{IdAllocator, DEFAULT_BLOCK_SIZE, ID_DIMENSION};
use crate::index::{IndexDef, IndexKind, IndexRegistry};
use crate::schema::{ColumnDef, SchemaManager, TableSchema};
use crate::session::Session;
use crate::value::{SqlType, SqlValue};

pub(crate) type DocDecoder =
    Arc<dyn Fn(Value) -> DocbaseResult<Box<dyn AnyDocument>> + Send + Sync>;

/// Registration record for one document type.
pub(crate) struct DocTypeInfo {
    pub collection: &'static str,
    pub decoder: DocDecoder,
}

impl std::fmt::Debug for DocTypeInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocTypeInfo")
            .field("collection", &self.collection)
            .finish_non_exhaustive()
    }
}

/// The configured store.
#[derive(Debug)]
pub struct DocumentStore {
    pub(crate) dialect: Arc<dyn Dialect>,
    pub(crate) executor: Arc<dyn SqlExecutor>,
    pub(crate) codec: Arc<dyn Codec>,
    pub(crate) prefix: String,
    pub(crate) registry: IndexRegistry,
    pub(crate) types: HashMap<&'static str, DocTypeInfo>,
    pub(crate) ids: IdAllocator,
}

impl DocumentStore {
    pub fn builder() -> DocumentStoreBuilder {
        DocumentStoreBuilder::new()
    }

    /// The wide table documents persist into.
    pub fn documents_table(&self) -> String {
        format!("{}documents", self.prefix)
    }

    /// The id range reservation table.
    pub fn identifiers_table(&self) -> String {
        format!("{}identifiers", self.prefix)
    }

    /// The prefix shared by every table this store owns.
    pub fn table_prefix(&self) -> &str {
        &self.prefix
    }

    pub fn dialect(&self) -> &dyn Dialect {
        self.dialect.as_ref()
    }

    /// The schema migration API, for hosting applications that manage extra
    /// tables beside the store's own.
    pub fn schema_manager(&self) -> SchemaManager<'_> {
        SchemaManager::new(self.executor.as_ref(), self.dialect.as_ref())
    }

    /// Registered index descriptors for a document type tag.
    pub fn indexes_for(&self, doc_type: &str) -> Vec<&IndexDef> {
        self.registry
            .for_type(doc_type)
            .iter()
            .map(|def| def.as_ref())
            .collect()
    }

    pub(crate) fn type_info(&self, doc_type: &str) -> DocbaseResult<&DocTypeInfo> {
        self.types.get(doc_type).ok_or_else(|| {
            DocbaseError::Configuration(format!(
                "document type '{doc_type}' is not registered with the store"
            ))
        })
    }

    /// Creates the bootstrap tables (documents, identifiers, one table per
    /// map index, aggregated + bridge tables per reduce index) and seeds the
    /// id allocator. Idempotent.
    #[instrument(skip_all, fields(prefix = %self.prefix))]
    pub async fn initialize(&self) -> DocbaseResult<()> {
        let schema = self.schema_manager();

        schema
            .create_table(&TableSchema::new(
                self.documents_table(),
                vec![
                    ColumnDef::primary("id", SqlType::BigInt),
                    ColumnDef::not_null("doc_type", SqlType::VarChar(128)),
                    ColumnDef::not_null("collection", SqlType::VarChar(128)),
                    ColumnDef::not_null("content", SqlType::Blob),
                    ColumnDef::not_null("content_type", SqlType::VarChar(64)),
                    ColumnDef::not_null("version", SqlType::BigInt),
                ],
            ))
            .await?;

        schema
            .create_table(&TableSchema::new(
                self.identifiers_table(),
                vec![
                    ColumnDef::primary("dimension", SqlType::VarChar(128)),
                    ColumnDef::not_null("next_value", SqlType::BigInt),
                ],
            ))
            .await?;

        let mut defs: Vec<&Arc<IndexDef>> = self.registry.all().collect();
        defs.sort_by_key(|def| def.name().to_string());
        for def in defs {
            match def.kind() {
                IndexKind::Map => {
                    let mut columns = vec![ColumnDef::not_null("document_id", SqlType::BigInt)];
                    columns.extend(def.columns().iter().map(|c| ColumnDef {
                        name: c.name.clone(),
                        sql_type: c.sql_type,
                        nullable: c.nullable,
                        primary_key: false,
                    }));
                    let table = def.document_table(&self.prefix);
                    schema
                        .create_table(&TableSchema::new(table.clone(), columns))
                        .await?;
                    schema.create_index(&table, &["document_id"], false).await?;
                }
                IndexKind::Reduce { key_len, .. } => {
                    let mut reduced_columns: Vec<ColumnDef> = def
                        .columns()
                        .iter()
                        .take(*key_len)
                        .map(|c| ColumnDef::key_part(c.name.clone(), c.sql_type))
                        .collect();
                    reduced_columns.extend(
                        def.columns()
                            .iter()
                            .skip(*key_len)
                            .map(|c| ColumnDef::not_null(c.name.clone(), c.sql_type)),
                    );
                    schema
                        .create_table(&TableSchema::new(
                            def.reduced_table(&self.prefix),
                            reduced_columns,
                        ))
                        .await?;

                    let mut bridge_columns =
                        vec![ColumnDef::key_part("document_id", SqlType::BigInt)];
                    bridge_columns.extend(
                        def.key_columns()
                            .iter()
                            .map(|c| ColumnDef::key_part(c.name.clone(), c.sql_type)),
                    );
                    let bridge = def.document_table(&self.prefix);
                    schema
                        .create_table(&TableSchema::new(bridge.clone(), bridge_columns))
                        .await?;
                    schema
                        .create_index(&bridge, &["document_id"], false)
                        .await?;
                }
            }
        }

        self.seed_identifiers().await?;
        debug!("store initialized");
        Ok(())
    }

    async fn seed_identifiers(&self) -> DocbaseResult<()> {
        let q = |name: &str| self.dialect.quote_ident(name);
        let table = self.identifiers_table();
        let rows = self
            .executor
            .query(&Statement::new(
                format!(
                    "SELECT {} FROM {} WHERE {} = {}",
                    q("next_value"),
                    q(&table),
                    q("dimension"),
                    self.dialect.placeholder(1)
                ),
                vec![SqlValue::Text(ID_DIMENSION.to_string())],
            ))
            .await?;
        match rows.first().and_then(|row| row.i64(0)) {
            Some(next_value) => self.ids.seed(next_value),
            None => {
                self.executor
                    .execute(&Statement::new(
                        format!(
                            "INSERT INTO {} ({}, {}) VALUES ({}, {})",
                            q(&table),
                            q("dimension"),
                            q("next_value"),
                            self.dialect.placeholder(1),
                            self.dialect.placeholder(2)
                        ),
                        vec![
                            SqlValue::Text(ID_DIMENSION.to_string()),
                            SqlValue::BigInt(1),
                        ],
                    ))
                    .await?;
                self.ids.seed(1);
            }
        }
        Ok(())
    }

    /// Opens a new unit-of-work session. Cheap and synchronous.
    pub fn create_session(&self) -> Session<'_> {
        Session::new(self)
    }
}

/// Builder for [`DocumentStore`].
pub struct DocumentStoreBuilder {
    dialect: Option<Arc<dyn Dialect>>,
    executor: Option<Arc<dyn SqlExecutor>>,
    codec: Arc<dyn Codec>,
    prefix: String,
    id_block_size: i64,
    types: HashMap<&'static str, DocTypeInfo>,
    indexes: Vec<IndexDef>,
}

impl DocumentStoreBuilder {
    fn new() -> Self {
        Self {
            dialect: None,
            executor: None,
            codec: Arc::new(JsonCodec),
            prefix: "docbase_".to_string(),
            id_block_size: DEFAULT_BLOCK_SIZE,
            types: HashMap::new(),
            indexes: Vec::new(),
        }
    }

    /// Selects the SQL dialect. Required.
    pub fn dialect(mut self, dialect: impl Dialect) -> Self {
        self.dialect = Some(Arc::new(dialect));
        self
    }

    /// Injects the executor the store runs its SQL through. Required.
    pub fn executor(mut self, executor: Arc<dyn SqlExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Replaces the default JSON codec.
    pub fn codec(mut self, codec: impl Codec + 'static) -> Self {
        self.codec = Arc::new(codec);
        self
    }

    /// Prefix shared by every table the store owns. Default `docbase_`.
    pub fn table_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Number of ids a session reserves per block. Default 64.
    pub fn id_block_size(mut self, block_size: i64) -> Self {
        self.id_block_size = block_size.max(1);
        self
    }

    /// Registers a document type.
    pub fn register<D: Document>(mut self) -> Self {
        let decoder: DocDecoder = Arc::new(|value: Value| {
            let doc = D::from_interchange(value)?;
            Ok(Box::new(doc) as Box<dyn AnyDocument>)
        });
        self.types.insert(
            D::document_type(),
            DocTypeInfo { collection: D::collection(), decoder },
        );
        self
    }

    /// Registers an index built with [`MapIndex`](crate::index::MapIndex) or
    /// [`ReduceIndex`](crate::index::ReduceIndex).
    pub fn index(mut self, def: IndexDef) -> Self {
        self.indexes.push(def);
        self
    }

    /// Validates the configuration and produces the store.
    pub fn build(self) -> DocbaseResult<DocumentStore> {
        let dialect = self
            .dialect
            .ok_or_else(|| DocbaseError::Configuration("a dialect is required".to_string()))?;
        let executor = self
            .executor
            .ok_or_else(|| DocbaseError::Configuration("an executor is required".to_string()))?;

        let mut registry = IndexRegistry::default();
        for def in self.indexes {
            if !self.types.contains_key(def.doc_type()) {
                return Err(DocbaseError::Configuration(format!(
                    "index '{}' targets unregistered document type '{}'",
                    def.name(),
                    def.doc_type()
                )));
            }
            registry.register(def)?;
        }

        Ok(DocumentStore {
            dialect,
            executor,
            codec: self.codec,
            prefix: self.prefix,
            registry,
            types: self.types,
            ids: IdAllocator::new(self.id_block_size),
        })
    }
}

//! The unit-of-work session.
//!
//! A session tracks document identity, detects mutations by snapshot
//! comparison, and flushes everything as one transaction: id reservation,
//! document inserts, versioned updates, index maintenance, deletes, in that
//! order. Sessions are single-context: hand one between tasks sequentially,
//! never use it concurrently.
//!
//! Reads check the session's own state first, so a `get` after a `save` in
//! the same session observes the pending write. A failed flush rolls its
//! transaction back and cancels the session; in-memory state is only
//! touched after a successful commit, so a cancelled or dropped flush
//! leaves the dirty set intact.

use std::collections::HashSet;
use std::marker::PhantomData;
use tracing::{debug, instrument, warn};

use crate::compile::{QueryCompiler, Selection};
use crate::document::{decode_payload, AnyDocument, DocId, Document, UNASSIGNED_ID};
use crate::engine::{batch_insert, IndexMaintenance};
use crate::error::{DocbaseError, DocbaseResult};
use crate::executor::{SqlTransaction, Statement};
use crate::identity::{DocState, IdentityMap, TrackedDocument};
use crate::ids::{IdBlock, ID_DIMENSION};
use crate::index::{IndexDef, IndexRow};
use crate::page::{Page, PageRequest};
use crate::query::{Expr, OrderBy, Query};
use crate::store::DocumentStore;
use crate::tracker::{self, ChangeSet};
use crate::value::{SqlRow, SqlValue};

type RowCache = Vec<((&'static str, DocId), String, Vec<IndexRow>)>;

/// A unit of work over a [`DocumentStore`].
pub struct Session<'s> {
    store: &'s DocumentStore,
    identity: IdentityMap,
    block: Option<IdBlock>,
    max_assigned: DocId,
    /// Documents saved with a caller-assigned id whose stored state is
    /// unknown until the next flush resolves them.
    probe_pending: Vec<(&'static str, DocId)>,
    /// Deletes requested for documents this session never tracked.
    untracked_deletes: HashSet<(&'static str, DocId)>,
    cancelled: bool,
}

impl<'s> Session<'s> {
    pub(crate) fn new(store: &'s DocumentStore) -> Self {
        Self {
            store,
            identity: IdentityMap::new(),
            block: None,
            max_assigned: 0,
            probe_pending: Vec::new(),
            untracked_deletes: HashSet::new(),
            cancelled: false,
        }
    }

    /// Whether a failed flush has cancelled this session.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    /// Number of documents currently tracked.
    pub fn tracked_count(&self) -> usize {
        self.identity.len()
    }

    /// Registers a document to be persisted at the next flush.
    ///
    /// A document without an id gets one immediately from the session's
    /// reserved range and is written back through `doc`. Saving again after
    /// a `delete` revives the document (last call wins). Synchronous: no
    /// database round trip happens here.
    pub fn save<D: Document>(&mut self, doc: &mut D) -> DocbaseResult<()> {
        self.ensure_active()?;
        self.store.type_info(D::document_type())?;
        let tag = D::document_type();
        if doc.id() == UNASSIGNED_ID {
            let id = self.next_id();
            doc.set_id(id);
            self.identity
                .add(tag, id, TrackedDocument::new(Box::new(doc.clone()), DocState::New));
            return Ok(());
        }
        let id = doc.id();
        self.untracked_deletes.remove(&(tag, id));
        match self.identity.get_mut(tag, id) {
            Some(entry) => {
                entry.document = Box::new(doc.clone());
                if entry.state == DocState::Deleted {
                    entry.state = if entry.version > 0 { DocState::Clean } else { DocState::New };
                }
            }
            None => {
                // Unknown whether this id is already stored; the next flush
                // probes and turns it into an insert or an update.
                self.identity
                    .add(tag, id, TrackedDocument::new(Box::new(doc.clone()), DocState::New));
                self.probe_pending.push((tag, id));
            }
        }
        Ok(())
    }

    /// Marks a tracked document for deletion at the next flush.
    pub fn delete<D: Document>(&mut self, doc: &D) -> DocbaseResult<()> {
        self.delete_by_id::<D>(doc.id())
    }

    /// Marks a document for deletion by id, without loading it.
    pub fn delete_by_id<D: Document>(&mut self, id: DocId) -> DocbaseResult<()> {
        self.ensure_active()?;
        self.store.type_info(D::document_type())?;
        if id == UNASSIGNED_ID {
            return Err(DocbaseError::Configuration(
                "cannot delete a document that has no id".to_string(),
            ));
        }
        let tag = D::document_type();
        match self.identity.get_mut(tag, id) {
            Some(entry) => entry.state = DocState::Deleted,
            None => {
                self.untracked_deletes.insert((tag, id));
            }
        }
        Ok(())
    }

    /// Loads a document by id, reusing the tracked instance when present.
    /// Returns `None` for unknown ids and for documents pending deletion.
    pub async fn get<D: Document>(&mut self, id: DocId) -> DocbaseResult<Option<D>> {
        self.load(id, false).await
    }

    /// Loads a document without enrolling it in change detection. Read-only
    /// documents are skipped by the flush mutation scan.
    pub async fn get_read_only<D: Document>(&mut self, id: DocId) -> DocbaseResult<Option<D>> {
        self.load(id, true).await
    }

    /// Loads a batch of documents by id in input order; missing ids are
    /// omitted. The database round trip is a single chunked IN query.
    pub async fn get_many<D: Document>(&mut self, ids: &[DocId]) -> DocbaseResult<Vec<D>> {
        self.ensure_active()?;
        let store = self.store;
        let tag = D::document_type();
        let mut missing: Vec<DocId> = Vec::new();
        for &id in ids {
            if self.identity.get(tag, id).is_none()
                && !self.untracked_deletes.contains(&(tag, id))
                && !missing.contains(&id)
            {
                missing.push(id);
            }
        }

        if !missing.is_empty() {
            let q = |name: &str| store.dialect.quote_ident(name);
            let table = store.documents_table();
            // One parameter is reserved for the type tag.
            let chunk_size = (store.dialect.max_parameters() - 1).max(1);
            for chunk in missing.chunks(chunk_size) {
                let placeholders: Vec<String> = (2..=chunk.len() + 1)
                    .map(|n| store.dialect.placeholder(n))
                    .collect();
                let mut params = vec![SqlValue::Text(tag.to_string())];
                params.extend(chunk.iter().map(|id| SqlValue::BigInt(*id)));
                let rows = store
                    .executor
                    .query(&Statement::new(
                        format!(
                            "SELECT {}, {}, {} FROM {} WHERE {} = {} AND {} IN ({})",
                            q("id"),
                            q("content"),
                            q("version"),
                            q(&table),
                            q("doc_type"),
                            store.dialect.placeholder(1),
                            q("id"),
                            placeholders.join(", ")
                        ),
                        params,
                    ))
                    .await?;
                for row in &rows {
                    self.track_fetched::<D>(row, false)?;
                }
            }
        }

        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for &id in ids {
            if !seen.insert(id) || self.untracked_deletes.contains(&(tag, id)) {
                continue;
            }
            if let Some(entry) = self.identity.get(tag, id) {
                if entry.state() == DocState::Deleted {
                    continue;
                }
                out.push(self.downcast_entry::<D>(entry)?);
            }
        }
        Ok(out)
    }

    /// Starts a typed query against a registered index.
    ///
    /// Building is pure; validation and SQL generation happen when the
    /// query is compiled by `list`, `ids`, `count`, `first` or `page`.
    pub fn query<'q, D: Document>(&'q mut self, index: &str) -> SessionQuery<'q, 's, D> {
        SessionQuery {
            session: self,
            index: index.to_string(),
            query: Query::new(),
            _marker: PhantomData,
        }
    }

    /// Reads the aggregated rows of a reduce index, optionally filtered
    /// over its columns.
    pub async fn reduce_rows(
        &mut self,
        index: &str,
        filter: Option<Expr>,
    ) -> DocbaseResult<Vec<IndexRow>> {
        self.ensure_active()?;
        let mut query = Query::new();
        query.filter = filter;
        let stmt = {
            let primary = self.resolve_index(index)?;
            let documents_table = self.store.documents_table();
            let compiler = QueryCompiler::new(
                self.store.dialect.as_ref(),
                &documents_table,
                &self.store.prefix,
                primary.as_ref(),
                Vec::new(),
            );
            compiler.compile(&query, Selection::ReducedRows)?
        };
        let rows = self.store.executor.query(&stmt).await?;
        Ok(rows.into_iter().map(|row| IndexRow::new(row.0)).collect())
    }

    /// Flushes all pending mutations in one transaction.
    ///
    /// On success snapshots are refreshed and the dirty set is cleared; a
    /// second call with no intervening mutation issues zero DML. On failure
    /// after the transaction opened, the transaction is rolled back and the
    /// session is cancelled.
    #[instrument(skip_all)]
    pub async fn save_changes(&mut self) -> DocbaseResult<()> {
        self.ensure_active()?;
        self.resolve_probes().await?;
        let change_set = tracker::scan(&mut self.identity, self.store.codec.as_ref())?;

        let mut deletes: Vec<(&'static str, DocId)> = change_set.deletes.clone();
        for key in &self.untracked_deletes {
            if !deletes.contains(key) {
                deletes.push(*key);
            }
        }
        deletes.sort();

        if change_set.inserts.is_empty() && change_set.updates.is_empty() && deletes.is_empty() {
            debug!("nothing to flush");
            return Ok(());
        }
        debug!(
            inserts = change_set.inserts.len(),
            updates = change_set.updates.len(),
            deletes = deletes.len(),
            "flushing session"
        );

        let mut tx = self.store.executor.begin().await?;
        match self.flush_inner(tx.as_mut(), &change_set, &deletes).await {
            Ok(row_cache) => match tx.commit().await {
                Ok(()) => {
                    self.after_commit(change_set, &deletes, row_cache);
                    Ok(())
                }
                Err(err) => {
                    self.cancelled = true;
                    Err(err)
                }
            },
            Err(err) => {
                warn!(error = %err, "flush failed, rolling back");
                tx.rollback().await.ok();
                self.cancelled = true;
                Err(err)
            }
        }
    }

    /// Closes the session, discarding pending writes and detaching every
    /// tracked document. There is never an open transaction to roll back
    /// outside [`Session::save_changes`], so closing is synchronous.
    pub fn close(mut self) {
        self.identity.detach_all();
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn ensure_active(&self) -> DocbaseResult<()> {
        if self.cancelled {
            Err(DocbaseError::SessionCancelled)
        } else {
            Ok(())
        }
    }

    fn next_id(&mut self) -> DocId {
        loop {
            if let Some(block) = &mut self.block {
                if let Some(id) = block.take() {
                    self.max_assigned = self.max_assigned.max(id);
                    return id;
                }
            }
            self.block = Some(self.store.ids.take_block());
        }
    }

    async fn load<D: Document>(&mut self, id: DocId, read_only: bool) -> DocbaseResult<Option<D>> {
        self.ensure_active()?;
        let tag = D::document_type();
        if self.untracked_deletes.contains(&(tag, id)) {
            return Ok(None);
        }
        if let Some(entry) = self.identity.get(tag, id) {
            if entry.state() == DocState::Deleted {
                return Ok(None);
            }
            return Ok(Some(self.downcast_entry::<D>(entry)?));
        }

        let q = |name: &str| self.store.dialect.quote_ident(name);
        let rows = self
            .store
            .executor
            .query(&Statement::new(
                format!(
                    "SELECT {}, {}, {} FROM {} WHERE {} = {} AND {} = {}",
                    q("id"),
                    q("content"),
                    q("version"),
                    q(&self.store.documents_table()),
                    q("id"),
                    self.store.dialect.placeholder(1),
                    q("doc_type"),
                    self.store.dialect.placeholder(2)
                ),
                vec![SqlValue::BigInt(id), SqlValue::Text(tag.to_string())],
            ))
            .await?;
        match rows.first() {
            Some(row) => Ok(Some(self.track_fetched::<D>(row, read_only)?)),
            None => Ok(None),
        }
    }

    /// Tracks a `(id, content, version)` row as a Clean entry and returns
    /// the decoded document.
    fn track_fetched<D: Document>(&mut self, row: &SqlRow, read_only: bool) -> DocbaseResult<D> {
        let tag = D::document_type();
        let id = row
            .i64(0)
            .ok_or_else(|| DocbaseError::Backend("document id column unreadable".to_string()))?;
        let bytes = row
            .get(1)
            .as_bytes()
            .ok_or_else(|| DocbaseError::Backend("document payload unreadable".to_string()))?
            .to_vec();
        let version = row.i64(2).unwrap_or(0);
        let doc: D = decode_payload(self.store.codec.as_ref(), &bytes)?;
        let mut entry = TrackedDocument::new(Box::new(doc.clone()), DocState::Clean);
        entry.snapshot = Some(bytes);
        entry.version = version;
        entry.read_only = read_only;
        self.identity.add(tag, id, entry);
        Ok(doc)
    }

    fn downcast_entry<D: Document>(&self, entry: &TrackedDocument) -> DocbaseResult<D> {
        entry
            .document
            .downcast_ref::<D>()
            .cloned()
            .ok_or_else(|| {
                DocbaseError::Configuration(format!(
                    "tracked entry for type '{}' holds a different Rust type",
                    D::document_type()
                ))
            })
    }

    fn resolve_index(&self, name: &str) -> DocbaseResult<&std::sync::Arc<IndexDef>> {
        self.store
            .registry
            .get(name)
            .ok_or_else(|| DocbaseError::QueryCompile(format!("unknown index '{name}'")))
    }

    fn compile_for<D: Document>(
        &self,
        index: &str,
        query: &Query,
        selection: Selection,
    ) -> DocbaseResult<Statement> {
        let primary = self.resolve_index(index)?;
        if primary.doc_type() != D::document_type() {
            return Err(DocbaseError::QueryCompile(format!(
                "index '{index}' is over '{}', not '{}'",
                primary.doc_type(),
                D::document_type()
            )));
        }
        let mut joins = Vec::with_capacity(query.joins.len());
        for name in &query.joins {
            joins.push(self.resolve_index(name)?);
        }
        let documents_table = self.store.documents_table();
        let compiler = QueryCompiler::new(
            self.store.dialect.as_ref(),
            &documents_table,
            &self.store.prefix,
            primary.as_ref(),
            joins.iter().map(|j| j.as_ref()).collect(),
        );
        compiler.compile(query, selection)
    }

    async fn run_documents<D: Document>(
        &mut self,
        index: &str,
        query: &Query,
    ) -> DocbaseResult<Vec<D>> {
        self.ensure_active()?;
        let stmt = self.compile_for::<D>(index, query, Selection::Documents)?;
        let rows = self.store.executor.query(&stmt).await?;
        self.hydrate::<D>(rows)
    }

    async fn run_ids<D: Document>(
        &mut self,
        index: &str,
        query: &Query,
    ) -> DocbaseResult<Vec<DocId>> {
        self.ensure_active()?;
        let stmt = self.compile_for::<D>(index, query, Selection::Ids)?;
        let rows = self.store.executor.query(&stmt).await?;
        Ok(rows.iter().filter_map(|row| row.i64(0)).collect())
    }

    async fn run_count<D: Document>(&mut self, index: &str, query: &Query) -> DocbaseResult<u64> {
        self.ensure_active()?;
        let stmt = self.compile_for::<D>(index, query, Selection::Count)?;
        let rows = self.store.executor.query(&stmt).await?;
        Ok(rows.first().and_then(|row| row.i64(0)).unwrap_or(0) as u64)
    }

    /// Turns `(id, content, version)` result rows into documents, reusing
    /// tracked instances and deduplicating multi-row index matches.
    fn hydrate<D: Document>(&mut self, rows: Vec<SqlRow>) -> DocbaseResult<Vec<D>> {
        let tag = D::document_type();
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for row in rows {
            let Some(id) = row.i64(0) else { continue };
            if !seen.insert(id) || self.untracked_deletes.contains(&(tag, id)) {
                continue;
            }
            if let Some(entry) = self.identity.get(tag, id) {
                if entry.state() == DocState::Deleted {
                    continue;
                }
                out.push(self.downcast_entry::<D>(entry)?);
            } else {
                out.push(self.track_fetched::<D>(&row, false)?);
            }
        }
        Ok(out)
    }

    /// Resolves saves that carried a caller-assigned id: reads the stored
    /// payload and version so the flush can tell inserts from updates.
    async fn resolve_probes(&mut self) -> DocbaseResult<()> {
        if self.probe_pending.is_empty() {
            return Ok(());
        }
        let store = self.store;
        let pending = std::mem::take(&mut self.probe_pending);
        let q = |name: &str| store.dialect.quote_ident(name);
        let table = store.documents_table();
        for (tag, id) in pending {
            let rows = store
                .executor
                .query(&Statement::new(
                    format!(
                        "SELECT {}, {} FROM {} WHERE {} = {} AND {} = {}",
                        q("content"),
                        q("version"),
                        q(&table),
                        q("id"),
                        store.dialect.placeholder(1),
                        q("doc_type"),
                        store.dialect.placeholder(2)
                    ),
                    vec![SqlValue::BigInt(id), SqlValue::Text(tag.to_string())],
                ))
                .await?;
            if let Some(row) = rows.first() {
                let bytes = row
                    .get(0)
                    .as_bytes()
                    .ok_or_else(|| {
                        DocbaseError::Backend("document payload unreadable".to_string())
                    })?
                    .to_vec();
                let version = row.i64(1).unwrap_or(0);
                if let Some(entry) = self.identity.get_mut(tag, id) {
                    entry.snapshot = Some(bytes);
                    entry.version = version;
                    if entry.state != DocState::Deleted {
                        entry.state = DocState::Clean;
                    }
                }
            }
        }
        Ok(())
    }

    async fn flush_inner(
        &self,
        tx: &mut dyn SqlTransaction,
        change_set: &ChangeSet,
        deletes: &[(&'static str, DocId)],
    ) -> DocbaseResult<RowCache> {
        let dialect = self.store.dialect.as_ref();
        let q = |name: &str| dialect.quote_ident(name);
        let documents_table = self.store.documents_table();

        // (a) make every handed-out id durably reserved before inserting.
        if self.max_assigned > 0 && self.max_assigned >= self.store.ids.durable_high() {
            self.confirm_id_range(tx, self.max_assigned + 1).await?;
        }

        // (b) new documents.
        if !change_set.inserts.is_empty() {
            let columns = [
                "id",
                "doc_type",
                "collection",
                "content",
                "content_type",
                "version",
            ];
            let rows: Vec<Vec<SqlValue>> = change_set
                .inserts
                .iter()
                .map(|w| {
                    vec![
                        SqlValue::BigInt(w.id),
                        SqlValue::Text(w.doc_type.to_string()),
                        SqlValue::Text(w.collection.to_string()),
                        SqlValue::Blob(w.payload.clone()),
                        SqlValue::Text(self.store.codec.content_type().to_string()),
                        SqlValue::BigInt(1),
                    ]
                })
                .collect();
            batch_insert(tx, dialect, &documents_table, &columns, &rows).await?;
        }

        // (c) modified documents, compare-and-set on version.
        for w in &change_set.updates {
            let affected = tx
                .execute(&Statement::new(
                    format!(
                        "UPDATE {} SET {} = {}, {} = {}, {} = {} + 1 \
                         WHERE {} = {} AND {} = {}",
                        q(&documents_table),
                        q("content"),
                        dialect.placeholder(1),
                        q("content_type"),
                        dialect.placeholder(2),
                        q("version"),
                        q("version"),
                        q("id"),
                        dialect.placeholder(3),
                        q("version"),
                        dialect.placeholder(4)
                    ),
                    vec![
                        SqlValue::Blob(w.payload.clone()),
                        SqlValue::Text(self.store.codec.content_type().to_string()),
                        SqlValue::BigInt(w.id),
                        SqlValue::BigInt(w.expected_version),
                    ],
                ))
                .await?;
            if affected == 0 {
                return Err(DocbaseError::Concurrency(format!(
                    "document {} was changed by another session (expected version {})",
                    w.id, w.expected_version
                )));
            }
        }

        // (d) index maintenance, per affected document and registered index.
        let engine = IndexMaintenance::new(
            dialect,
            &self.store.prefix,
            &documents_table,
            self.store.codec.as_ref(),
        );
        let mut row_cache: RowCache = Vec::new();

        for w in &change_set.inserts {
            let entry = self.identity.get(w.doc_type, w.id).ok_or_else(|| {
                DocbaseError::Backend("tracked entry disappeared mid-flush".to_string())
            })?;
            for def in self.store.registry.for_type(w.doc_type) {
                let rows = engine
                    .apply_document(tx, def.as_ref(), w.id, None, Some(entry.document.as_ref()))
                    .await?;
                row_cache.push(((w.doc_type, w.id), def.name().to_string(), rows));
            }
        }

        for w in &change_set.updates {
            let entry = self.identity.get(w.doc_type, w.id).ok_or_else(|| {
                DocbaseError::Backend("tracked entry disappeared mid-flush".to_string())
            })?;
            let old_doc = self.decode_snapshot(w.doc_type, entry)?;
            for def in self.store.registry.for_type(w.doc_type) {
                let rows = engine
                    .apply_document(
                        tx,
                        def.as_ref(),
                        w.id,
                        old_doc.as_deref(),
                        Some(entry.document.as_ref()),
                    )
                    .await?;
                row_cache.push(((w.doc_type, w.id), def.name().to_string(), rows));
            }
        }

        for (tag, id) in deletes {
            let old_doc = match self.identity.get(tag, *id) {
                Some(entry) => self.decode_snapshot(tag, entry)?,
                None => self.fetch_stored(tx, tag, *id).await?,
            };
            if let Some(old) = old_doc {
                for def in self.store.registry.for_type(tag) {
                    engine
                        .apply_document(tx, def.as_ref(), *id, Some(old.as_ref()), None)
                        .await?;
                }
            }
        }

        // (e) removed documents last.
        if !deletes.is_empty() {
            let ids: Vec<DocId> = deletes.iter().map(|(_, id)| *id).collect();
            for chunk in ids.chunks(dialect.max_parameters().max(1)) {
                let placeholders: Vec<String> = (1..=chunk.len())
                    .map(|n| dialect.placeholder(n))
                    .collect();
                tx.execute(&Statement::new(
                    format!(
                        "DELETE FROM {} WHERE {} IN ({})",
                        q(&documents_table),
                        q("id"),
                        placeholders.join(", ")
                    ),
                    chunk.iter().map(|id| SqlValue::BigInt(*id)).collect(),
                ))
                .await?;
            }
        }

        Ok(row_cache)
    }

    /// Compare-and-set loop advancing the identifiers row to `needed`.
    async fn confirm_id_range(
        &self,
        tx: &mut dyn SqlTransaction,
        needed: i64,
    ) -> DocbaseResult<()> {
        let dialect = self.store.dialect.as_ref();
        let q = |name: &str| dialect.quote_ident(name);
        let table = self.store.identifiers_table();
        loop {
            let rows = tx
                .query(&Statement::new(
                    format!(
                        "SELECT {} FROM {} WHERE {} = {}",
                        q("next_value"),
                        q(&table),
                        q("dimension"),
                        dialect.placeholder(1)
                    ),
                    vec![SqlValue::Text(ID_DIMENSION.to_string())],
                ))
                .await?;
            match rows.first().and_then(|row| row.i64(0)) {
                None => {
                    tx.execute(&Statement::new(
                        format!(
                            "INSERT INTO {} ({}, {}) VALUES ({}, {})",
                            q(&table),
                            q("dimension"),
                            q("next_value"),
                            dialect.placeholder(1),
                            dialect.placeholder(2)
                        ),
                        vec![
                            SqlValue::Text(ID_DIMENSION.to_string()),
                            SqlValue::BigInt(needed),
                        ],
                    ))
                    .await?;
                    break;
                }
                Some(current) if current >= needed => break,
                Some(current) => {
                    let affected = tx
                        .execute(&Statement::new(
                            format!(
                                "UPDATE {} SET {} = {} WHERE {} = {} AND {} = {}",
                                q(&table),
                                q("next_value"),
                                dialect.placeholder(1),
                                q("dimension"),
                                dialect.placeholder(2),
                                q("next_value"),
                                dialect.placeholder(3)
                            ),
                            vec![
                                SqlValue::BigInt(needed),
                                SqlValue::Text(ID_DIMENSION.to_string()),
                                SqlValue::BigInt(current),
                            ],
                        ))
                        .await?;
                    if affected == 1 {
                        break;
                    }
                    // Lost the race against another reservation; re-read.
                }
            }
        }
        Ok(())
    }

    fn decode_snapshot(
        &self,
        tag: &str,
        entry: &TrackedDocument,
    ) -> DocbaseResult<Option<Box<dyn AnyDocument>>> {
        match &entry.snapshot {
            Some(bytes) => {
                let value = self.store.codec.decode(bytes)?;
                let doc = (self.store.type_info(tag)?.decoder)(value)?;
                Ok(Some(doc))
            }
            None => Ok(None),
        }
    }

    /// Reads and decodes a stored payload inside the flush transaction,
    /// used to recall index rows of documents this session never loaded.
    async fn fetch_stored(
        &self,
        tx: &mut dyn SqlTransaction,
        tag: &str,
        id: DocId,
    ) -> DocbaseResult<Option<Box<dyn AnyDocument>>> {
        let dialect = self.store.dialect.as_ref();
        let q = |name: &str| dialect.quote_ident(name);
        let rows = tx
            .query(&Statement::new(
                format!(
                    "SELECT {} FROM {} WHERE {} = {} AND {} = {}",
                    q("content"),
                    q(&self.store.documents_table()),
                    q("id"),
                    dialect.placeholder(1),
                    q("doc_type"),
                    dialect.placeholder(2)
                ),
                vec![SqlValue::BigInt(id), SqlValue::Text(tag.to_string())],
            ))
            .await?;
        match rows.first() {
            Some(row) => {
                let bytes = row.get(0).as_bytes().ok_or_else(|| {
                    DocbaseError::Backend("document payload unreadable".to_string())
                })?;
                let value = self.store.codec.decode(bytes)?;
                Ok(Some((self.store.type_info(tag)?.decoder)(value)?))
            }
            None => Ok(None),
        }
    }

    /// Applies the committed flush to in-memory state: snapshots refresh,
    /// states settle to Clean, deleted entries are purged, index rows are
    /// cached on their entries.
    fn after_commit(
        &mut self,
        change_set: ChangeSet,
        deletes: &[(&'static str, DocId)],
        row_cache: RowCache,
    ) {
        // The identifiers row only counts once it is committed.
        if self.max_assigned > 0 {
            self.store.ids.mark_durable(self.max_assigned + 1);
        }
        for w in change_set.inserts {
            if let Some(entry) = self.identity.get_mut(w.doc_type, w.id) {
                entry.state = DocState::Clean;
                entry.snapshot = Some(w.payload);
                entry.version = 1;
            }
        }
        for w in change_set.updates {
            if let Some(entry) = self.identity.get_mut(w.doc_type, w.id) {
                entry.state = DocState::Clean;
                entry.snapshot = Some(w.payload);
                entry.version += 1;
            }
        }
        for (tag, id) in deletes {
            self.identity.remove(tag, *id);
        }
        self.untracked_deletes.clear();
        for ((tag, id), index_name, rows) in row_cache {
            if let Some(entry) = self.identity.get_mut(tag, id) {
                entry.index_rows.insert(index_name, rows);
            }
        }
    }
}

/// A typed query bound to a session and a primary index.
pub struct SessionQuery<'q, 's, D: Document> {
    session: &'q mut Session<'s>,
    index: String,
    query: Query,
    _marker: PhantomData<fn() -> D>,
}

impl<'q, 's, D: Document> SessionQuery<'q, 's, D> {
    /// Adds a predicate; multiple calls AND together.
    pub fn filter(mut self, expr: Expr) -> Self {
        self.query.filter = Some(match self.query.filter.take() {
            Some(existing) => existing.and(expr),
            None => expr,
        });
        self
    }

    /// Inner-joins another index on document id. A document matches only if
    /// all joined index rows exist.
    pub fn join(mut self, index: &str) -> Self {
        self.query.joins.push(index.to_string());
        self
    }

    /// Appends an ordering key (see [`asc`](crate::query::asc) /
    /// [`desc`](crate::query::desc)).
    pub fn order_by(mut self, order: OrderBy) -> Self {
        self.query.order.push(order);
        self
    }

    pub fn skip(mut self, n: u64) -> Self {
        self.query.skip = Some(n);
        self
    }

    pub fn take(mut self, n: u64) -> Self {
        self.query.take = Some(n);
        self
    }

    /// Compiles, executes and hydrates matching documents.
    pub async fn list(self) -> DocbaseResult<Vec<D>> {
        self.session.run_documents::<D>(&self.index, &self.query).await
    }

    /// Compiles and executes, returning matching document ids.
    pub async fn ids(self) -> DocbaseResult<Vec<DocId>> {
        self.session.run_ids::<D>(&self.index, &self.query).await
    }

    /// Counts matching index rows.
    pub async fn count(self) -> DocbaseResult<u64> {
        self.session.run_count::<D>(&self.index, &self.query).await
    }

    /// The first matching document, if any.
    pub async fn first(mut self) -> DocbaseResult<Option<D>> {
        self.query.take = Some(1);
        let docs = self
            .session
            .run_documents::<D>(&self.index, &self.query)
            .await?;
        Ok(docs.into_iter().next())
    }

    /// Whether any document matches.
    pub async fn exists(mut self) -> DocbaseResult<bool> {
        self.query.take = Some(1);
        let ids = self.session.run_ids::<D>(&self.index, &self.query).await?;
        Ok(!ids.is_empty())
    }

    /// Fetches one page plus the total count.
    pub async fn page(mut self, request: PageRequest) -> DocbaseResult<Page<D>> {
        let total = self.session.run_count::<D>(&self.index, &self.query).await?;
        self.query.skip = Some(request.offset());
        self.query.take = Some(request.per_page);
        let items = self
            .session
            .run_documents::<D>(&self.index, &self.query)
            .await?;
        Ok(Page::assemble(items, total, &request))
    }
}

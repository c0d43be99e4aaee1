//! Per-session identity map: the registry of tracked documents.
//!
//! Keys are `(document type, id)`; an id-only lookup supports the hydration
//! path of queries, which knows the id and type tag straight off the row.
//! The map is intra-session only and never survives the session.

use std::collections::HashMap;

use crate::document::{AnyDocument, DocId};
use crate::index::IndexRow;

/// Lifecycle state of a tracked document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocState {
    /// Loaded or flushed; in-memory bytes equal the stored payload.
    Clean,
    /// Snapshot comparison found different bytes at flush time.
    Modified,
    /// Saved into the session and not yet persisted.
    New,
    /// Scheduled for removal at the next flush.
    Deleted,
    /// The owning session has been closed.
    Detached,
}

/// One entry of the identity map.
pub struct TrackedDocument {
    pub(crate) document: Box<dyn AnyDocument>,
    /// Payload bytes at load or last flush; `None` until first persisted.
    pub(crate) snapshot: Option<Vec<u8>>,
    pub(crate) state: DocState,
    /// Stored document version for optimistic concurrency; 0 until stored.
    pub(crate) version: i64,
    /// Read-only entries are excluded from the flush mutation scan.
    pub(crate) read_only: bool,
    /// Index rows produced for this document at the last flush, per index.
    pub(crate) index_rows: HashMap<String, Vec<IndexRow>>,
}

impl TrackedDocument {
    pub(crate) fn new(document: Box<dyn AnyDocument>, state: DocState) -> Self {
        Self {
            document,
            snapshot: None,
            state,
            version: 0,
            read_only: false,
            index_rows: HashMap::new(),
        }
    }

    pub fn state(&self) -> DocState {
        self.state
    }

    pub fn version(&self) -> i64 {
        self.version
    }

    pub fn document(&self) -> &dyn AnyDocument {
        self.document.as_ref()
    }
}

impl std::fmt::Debug for TrackedDocument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackedDocument")
            .field("doc_type", &self.document.type_name())
            .field("id", &self.document.doc_id())
            .field("state", &self.state)
            .field("version", &self.version)
            .field("read_only", &self.read_only)
            .finish_non_exhaustive()
    }
}

/// The per-session `(type, id) → entry` registry.
#[derive(Debug, Default)]
pub struct IdentityMap {
    entries: HashMap<(&'static str, DocId), TrackedDocument>,
}

impl IdentityMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, doc_type: &'static str, id: DocId) -> Option<&TrackedDocument> {
        self.entries.get(&(doc_type, id))
    }

    pub fn get_mut(
        &mut self,
        doc_type: &'static str,
        id: DocId,
    ) -> Option<&mut TrackedDocument> {
        self.entries.get_mut(&(doc_type, id))
    }

    /// Id-only lookup, yielding the entry regardless of type.
    pub fn get_by_id(&self, id: DocId) -> Option<&TrackedDocument> {
        self.entries
            .iter()
            .find(|((_, entry_id), _)| *entry_id == id)
            .map(|(_, entry)| entry)
    }

    /// Inserts or replaces an entry.
    pub fn add(&mut self, doc_type: &'static str, id: DocId, entry: TrackedDocument) {
        self.entries.insert((doc_type, id), entry);
    }

    pub fn remove(&mut self, doc_type: &'static str, id: DocId) -> Option<TrackedDocument> {
        self.entries.remove(&(doc_type, id))
    }

    /// Iterates entries currently in the given state.
    pub fn enumerate(
        &self,
        state: DocState,
    ) -> impl Iterator<Item = (&(&'static str, DocId), &TrackedDocument)> {
        self.entries
            .iter()
            .filter(move |(_, entry)| entry.state == state)
    }

    pub fn iter(
        &self,
    ) -> impl Iterator<Item = (&(&'static str, DocId), &TrackedDocument)> {
        self.entries.iter()
    }

    pub fn iter_mut(
        &mut self,
    ) -> impl Iterator<Item = (&(&'static str, DocId), &mut TrackedDocument)> {
        self.entries.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Marks every entry detached and drops them; called when the session
    /// closes.
    pub fn detach_all(&mut self) {
        for entry in self.entries.values_mut() {
            entry.state = DocState::Detached;
        }
        self.entries.clear();
    }
}

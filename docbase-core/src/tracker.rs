//! Snapshot-based change detection.
//!
//! Nothing observes documents while the caller holds them: at flush time the
//! tracker re-encodes every tracked, non-deleted, non-read-only document and
//! compares the bytes against the snapshot taken at load or last flush.
//! Byte-equal means no DML. This keeps the contract deterministic and puts
//! no requirements on the document type beyond serializability.

use crate::document::{encode_payload, Codec, DocId};
use crate::error::DocbaseResult;
use crate::identity::{DocState, IdentityMap};

/// One pending document write, carrying the encoded payload so the flush
/// can refresh snapshots after commit without re-encoding.
#[derive(Debug)]
pub(crate) struct PendingWrite {
    pub doc_type: &'static str,
    pub collection: &'static str,
    pub id: DocId,
    pub payload: Vec<u8>,
    /// The version the row must still have for an update to win its
    /// compare-and-set. Unused for inserts.
    pub expected_version: i64,
}

/// Everything one flush has to persist, in deterministic order.
#[derive(Debug, Default)]
pub(crate) struct ChangeSet {
    pub inserts: Vec<PendingWrite>,
    pub updates: Vec<PendingWrite>,
    pub deletes: Vec<(&'static str, DocId)>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.inserts.is_empty() && self.updates.is_empty() && self.deletes.is_empty()
    }
}

/// Scans the identity map and produces the flush change set.
///
/// Serialization failures surface here, before any transaction opens, so the
/// session stays usable when the caller handles them.
pub(crate) fn scan(identity: &mut IdentityMap, codec: &dyn Codec) -> DocbaseResult<ChangeSet> {
    let mut change_set = ChangeSet::default();

    for (&(doc_type, id), entry) in identity.iter_mut() {
        match entry.state {
            DocState::Deleted => {
                // Entries that were never persisted have nothing to delete.
                if entry.version > 0 || entry.snapshot.is_some() {
                    change_set.deletes.push((doc_type, id));
                }
            }
            DocState::New => {
                let payload = encode_payload(codec, entry.document.as_ref())?;
                change_set.inserts.push(PendingWrite {
                    doc_type,
                    collection: entry.document.collection_name(),
                    id,
                    payload,
                    expected_version: 0,
                });
            }
            DocState::Clean | DocState::Modified => {
                if entry.read_only {
                    continue;
                }
                let payload = encode_payload(codec, entry.document.as_ref())?;
                if entry.snapshot.as_deref() == Some(payload.as_slice()) {
                    entry.state = DocState::Clean;
                } else {
                    entry.state = DocState::Modified;
                    change_set.updates.push(PendingWrite {
                        doc_type,
                        collection: entry.document.collection_name(),
                        id,
                        payload,
                        expected_version: entry.version,
                    });
                }
            }
            DocState::Detached => {}
        }
    }

    // Identity map iteration order is arbitrary; flush DML order is not.
    change_set.inserts.sort_by_key(|w| (w.doc_type, w.id));
    change_set.updates.sort_by_key(|w| (w.doc_type, w.id));
    change_set.deletes.sort();

    Ok(change_set)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{Document, JsonCodec};
    use crate::identity::TrackedDocument;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Widget {
        id: DocId,
        size: i64,
    }

    impl Document for Widget {
        fn id(&self) -> DocId {
            self.id
        }
        fn set_id(&mut self, id: DocId) {
            self.id = id;
        }
        fn document_type() -> &'static str {
            "widget"
        }
    }

    fn tracked(widget: Widget, state: DocState) -> TrackedDocument {
        TrackedDocument::new(Box::new(widget), state)
    }

    #[test]
    fn test_new_documents_become_inserts() {
        let mut identity = IdentityMap::new();
        identity.add("widget", 1, tracked(Widget { id: 1, size: 2 }, DocState::New));
        let cs = scan(&mut identity, &JsonCodec).unwrap();
        assert_eq!(cs.inserts.len(), 1);
        assert!(cs.updates.is_empty());
        assert!(cs.deletes.is_empty());
    }

    #[test]
    fn test_unchanged_clean_document_produces_no_dml() {
        let codec = JsonCodec;
        let widget = Widget { id: 1, size: 2 };
        let snapshot = encode_payload(&codec, &widget).unwrap();
        let mut entry = tracked(widget, DocState::Clean);
        entry.snapshot = Some(snapshot);
        entry.version = 1;
        let mut identity = IdentityMap::new();
        identity.add("widget", 1, entry);

        let cs = scan(&mut identity, &codec).unwrap();
        assert!(cs.is_empty());
        assert_eq!(identity.get("widget", 1).unwrap().state(), DocState::Clean);
    }

    #[test]
    fn test_mutated_document_becomes_update() {
        let codec = JsonCodec;
        let original = Widget { id: 1, size: 2 };
        let snapshot = encode_payload(&codec, &original).unwrap();
        let mut entry = tracked(Widget { id: 1, size: 99 }, DocState::Clean);
        entry.snapshot = Some(snapshot);
        entry.version = 3;
        let mut identity = IdentityMap::new();
        identity.add("widget", 1, entry);

        let cs = scan(&mut identity, &codec).unwrap();
        assert_eq!(cs.updates.len(), 1);
        assert_eq!(cs.updates[0].expected_version, 3);
        assert_eq!(identity.get("widget", 1).unwrap().state(), DocState::Modified);
    }

    #[test]
    fn test_read_only_documents_are_skipped() {
        let codec = JsonCodec;
        let original = Widget { id: 1, size: 2 };
        let snapshot = encode_payload(&codec, &original).unwrap();
        let mut entry = tracked(Widget { id: 1, size: 99 }, DocState::Clean);
        entry.snapshot = Some(snapshot);
        entry.read_only = true;
        let mut identity = IdentityMap::new();
        identity.add("widget", 1, entry);

        let cs = scan(&mut identity, &codec).unwrap();
        assert!(cs.is_empty());
    }

    #[test]
    fn test_deleted_unpersisted_document_is_dropped_silently() {
        let mut identity = IdentityMap::new();
        identity.add("widget", 5, tracked(Widget { id: 5, size: 1 }, DocState::Deleted));
        let cs = scan(&mut identity, &JsonCodec).unwrap();
        assert!(cs.is_empty());
    }

    #[test]
    fn test_deleted_persisted_document_emits_delete() {
        let mut entry = tracked(Widget { id: 5, size: 1 }, DocState::Deleted);
        entry.version = 2;
        let mut identity = IdentityMap::new();
        identity.add("widget", 5, entry);
        let cs = scan(&mut identity, &JsonCodec).unwrap();
        assert_eq!(cs.deletes, vec![("widget", 5)]);
    }
}

//! Core traits for document representation and payload encoding.
//!
//! This module provides the fundamental trait stored documents implement,
//! the type-erased form the session tracks them in, and the injected codec
//! that turns documents into the opaque payload persisted in the documents
//! table.

use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::any::Any;
use std::fmt;

use crate::error::DocbaseResult;

/// The stable 64-bit identifier every stored document carries.
///
/// Ids are assigned by the store's range allocator and are unique across the
/// entire store, not just within a collection. `0` means "not yet assigned".
pub type DocId = i64;

/// Id value of a document that has never been saved.
pub const UNASSIGNED_ID: DocId = 0;

/// Core trait that all documents stored in docbase must implement.
///
/// A document is an application object with a stable integer id, a type
/// discriminator used to key index registrations, and an optional collection
/// name grouping documents in the documents table.
///
/// # Example
///
/// ```ignore
/// use docbase_core::document::{DocId, Document};
/// use serde::{Serialize, Deserialize};
///
/// #[derive(Debug, Clone, Serialize, Deserialize)]
/// pub struct User {
///     pub id: DocId,
///     pub name: String,
/// }
///
/// impl Document for User {
///     fn id(&self) -> DocId { self.id }
///     fn set_id(&mut self, id: DocId) { self.id = id; }
///     fn document_type() -> &'static str { "user" }
/// }
/// ```
pub trait Document: Serialize + DeserializeOwned + Send + Sync + Clone + 'static {
    /// Returns this document's identifier, or [`UNASSIGNED_ID`] before the
    /// first save.
    fn id(&self) -> DocId;

    /// Writes the identifier assigned by the session back into the document.
    fn set_id(&mut self, id: DocId);

    /// A short, stable type discriminator (e.g. `"user"`). Index
    /// registrations and identity tracking are keyed by this tag.
    fn document_type() -> &'static str;

    /// The collection this document type belongs to. The default collection
    /// is the empty string.
    fn collection() -> &'static str {
        ""
    }
}

/// Codec that converts between the JSON interchange form of a document and
/// the opaque payload bytes stored in the documents table.
///
/// The codec is injected at store construction; the engine never interprets
/// payload bytes beyond equality comparison for change detection.
pub trait Codec: Send + Sync + fmt::Debug {
    /// The content tag stored beside the payload (e.g. `"application/json"`).
    fn content_type(&self) -> &'static str;

    /// Encodes an interchange value into payload bytes.
    fn encode(&self, value: &Value) -> DocbaseResult<Vec<u8>>;

    /// Decodes payload bytes back into an interchange value.
    fn decode(&self, bytes: &[u8]) -> DocbaseResult<Value>;
}

/// The default codec: compact JSON text, stored as UTF-8 bytes.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn content_type(&self) -> &'static str {
        "application/json"
    }

    fn encode(&self, value: &Value) -> DocbaseResult<Vec<u8>> {
        Ok(serde_json::to_vec(value)?)
    }

    fn decode(&self, bytes: &[u8]) -> DocbaseResult<Value> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Extension trait bridging typed documents and the interchange form.
///
/// Automatically implemented for every [`Document`].
pub trait DocumentExt: Document {
    /// Converts this document to its JSON interchange value.
    fn to_interchange(&self) -> DocbaseResult<Value>;

    /// Reconstructs a document from its interchange value.
    fn from_interchange(value: Value) -> DocbaseResult<Self>;
}

impl<D: Document> DocumentExt for D {
    fn to_interchange(&self) -> DocbaseResult<Value> {
        Ok(serde_json::to_value(self)?)
    }

    fn from_interchange(value: Value) -> DocbaseResult<Self> {
        Ok(serde_json::from_value(value)?)
    }
}

/// Type-erased document, the form the session's identity map tracks.
///
/// Works like a standard trait object with document-specific accessors, so
/// heterogeneous document types can share one tracking structure. Most users
/// never touch this trait; it is public because index projections receive
/// `&dyn Any` obtained through it.
pub trait AnyDocument: Send + Sync {
    /// The document's identifier.
    fn doc_id(&self) -> DocId;

    /// Writes an assigned identifier into the document.
    fn assign_id(&mut self, id: DocId);

    /// The document's type discriminator.
    fn type_name(&self) -> &'static str;

    /// The document's collection.
    fn collection_name(&self) -> &'static str;

    /// Borrows the document as `Any` for downcasting.
    fn as_any(&self) -> &dyn Any;

    /// Borrows the document mutably as `Any` for downcasting.
    fn as_any_mut(&mut self) -> &mut dyn Any;

    /// Clones the document into a new boxed `AnyDocument`.
    fn clone_box(&self) -> Box<dyn AnyDocument>;

    /// Converts the document to its interchange value.
    fn to_interchange_any(&self) -> DocbaseResult<Value>;
}

impl dyn AnyDocument {
    /// Attempts to downcast a reference to a concrete document type.
    pub fn downcast_ref<D: Document>(&self) -> Option<&D> {
        self.as_any().downcast_ref::<D>()
    }

    /// Attempts to downcast a mutable reference to a concrete document type.
    pub fn downcast_mut<D: Document>(&mut self) -> Option<&mut D> {
        self.as_any_mut().downcast_mut::<D>()
    }
}

impl<D: Document> AnyDocument for D {
    fn doc_id(&self) -> DocId {
        self.id()
    }

    fn assign_id(&mut self, id: DocId) {
        self.set_id(id);
    }

    fn type_name(&self) -> &'static str {
        D::document_type()
    }

    fn collection_name(&self) -> &'static str {
        D::collection()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn clone_box(&self) -> Box<dyn AnyDocument> {
        Box::new(self.clone())
    }

    fn to_interchange_any(&self) -> DocbaseResult<Value> {
        DocumentExt::to_interchange(self)
    }
}

impl Clone for Box<dyn AnyDocument> {
    fn clone(&self) -> Box<dyn AnyDocument> {
        self.clone_box()
    }
}

/// Encodes a tracked document to payload bytes through the codec.
pub(crate) fn encode_payload(
    codec: &dyn Codec,
    doc: &dyn AnyDocument,
) -> DocbaseResult<Vec<u8>> {
    let value = doc.to_interchange_any()?;
    codec.encode(&value)
}

/// Decodes payload bytes into a typed document.
pub(crate) fn decode_payload<D: Document>(
    codec: &dyn Codec,
    bytes: &[u8],
) -> DocbaseResult<D> {
    let value = codec.decode(bytes)?;
    D::from_interchange(value)
}

//! Error types and result types for docbase operations.
//!
//! Every failure mode the engine can signal maps to one variant of
//! [`DocbaseError`]. Use [`DocbaseResult<T>`] as the return type for fallible
//! operations.

use serde_json::Error as SerdeJsonError;
use thiserror::Error;

/// Represents all possible errors raised by the document store.
///
/// The variants are distinct by recovery strategy: configuration and query
/// compilation errors are programmer errors and not retryable; transient
/// errors may be retried on a fresh session; concurrency errors cancel the
/// session that observed them.
#[derive(Error, Debug)]
pub enum DocbaseError {
    /// Invalid store configuration: unknown or duplicate index, unregistered
    /// document type, schema mismatch at bootstrap. Fatal, not retryable.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The codec refused to encode or decode a document payload.
    /// When raised before a flush opens its transaction, the session remains
    /// usable.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// An id or unique-index collision was detected at flush, or a versioned
    /// update lost a compare-and-set race. The transaction has been rolled
    /// back and the session is cancelled.
    #[error("concurrency conflict: {0}")]
    Concurrency(String),

    /// A transient backend failure (connection reset, lock timeout,
    /// deadlock victim). The flush was rolled back; the caller may retry on
    /// a fresh session. The library never retries internally.
    #[error("transient database error: {0}")]
    Transient(String),

    /// Any other error surfaced by the SQL executor.
    #[error("backend error: {0}")]
    Backend(String),

    /// A query referenced a column not present on the index, joined an
    /// unknown index, or was otherwise uncompilable. Reported when the query
    /// is compiled, never at execution.
    #[error("query compile error: {0}")]
    QueryCompile(String),

    /// The filter mini-language failed to parse. `position` is the byte
    /// offset of the failure within the input.
    #[error("filter parse error at position {position}: {message}")]
    Parse { position: usize, message: String },

    /// The session was cancelled by an earlier failed flush; all subsequent
    /// operations on it fail. Create a new session to continue.
    #[error("session is cancelled after a failed flush")]
    SessionCancelled,
}

/// A specialized `Result` type for docbase operations.
pub type DocbaseResult<T> = Result<T, DocbaseError>;

impl From<SerdeJsonError> for DocbaseError {
    fn from(err: SerdeJsonError) -> Self {
        DocbaseError::Serialization(err.to_string())
    }
}

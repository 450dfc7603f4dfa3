//! Error types and result types for data-access operations.
//!
//! Every fallible operation in this crate returns [`DalResult<T>`]. Variants carry the
//! offending field, value or collection so callers do not need to re-derive context.

use bson::{error::Error as BsonError, oid::ObjectId};
use std::{fmt, time::Duration};
use thiserror::Error;

/// The step of a blob upload that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlobStage {
    /// Opening the upload stream.
    Open,
    /// Writing the payload.
    Write,
    /// Closing (finalizing) the upload stream.
    Close,
}

impl fmt::Display for BlobStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlobStage::Open => f.write_str("open"),
            BlobStage::Write => f.write_str("write"),
            BlobStage::Close => f.write_str("close"),
        }
    }
}

/// Represents all possible errors that can occur when going through the data-access layer.
#[derive(Error, Debug)]
pub enum DalError {
    /// A selector was required but none was given.
    #[error("Selector is null")]
    NullSelector,
    /// The selector is neither an ObjectId nor a filter document.
    /// The argument names the BSON type that was supplied.
    #[error("Unsupported selector kind {0} (only an ObjectId or a filter document is supported)")]
    UnsupportedSelectorKind(String),
    /// A single-result query matched more than one document.
    #[error("Ambiguous match: {count} documents matched in collection {collection}")]
    AmbiguousMatch { collection: String, count: u64 },
    /// A single-result query (or a blob lookup) matched nothing.
    #[error("Document not found {selector} in collection {collection}")]
    NotFound { collection: String, selector: String },
    /// A reference field is not an embedded document, or has no `id` property.
    #[error("Invalid reference field {field}: {reason}")]
    InvalidReferenceShape { field: String, reason: String },
    /// A reference `id` is not a string holding a 24 character hex ObjectId.
    #[error("Invalid identifier format in field {field}: {value}")]
    InvalidIdentifierFormat { field: String, value: String },
    /// The index required before an insert could not be created.
    #[error("Index creation failed on collection {collection}: {message}")]
    IndexCreationFailed { collection: String, message: String },
    /// An error reported by the underlying database.
    #[error("Storage operation failed: {0}")]
    StorageOperationFailed(String),
    /// A blob upload failed. `id` is the generated identifier when the failure happened
    /// before the stream was closed, and `None` when closing failed.
    #[error("Blob {stage} failed: {message}")]
    BlobWrite {
        stage: BlobStage,
        id: Option<ObjectId>,
        message: String,
    },
    /// Serialization/deserialization error when converting between documents and BSON.
    #[error("Serialization error: {0}")]
    Serialization(String),
    /// Error during store initialization or connection setup.
    #[error("Initialization error: {0}")]
    Initialization(String),
    /// The operation did not complete within the configured deadline.
    #[error("Operation {operation} timed out after {limit:?}")]
    Timeout {
        operation: &'static str,
        limit: Duration,
    },
}

/// A specialized `Result` type for data-access operations.
pub type DalResult<T> = Result<T, DalError>;

impl DalError {
    /// Returns `true` for [`DalError::NotFound`].
    pub fn is_not_found(&self) -> bool {
        matches!(self, DalError::NotFound { .. })
    }

    /// Builds a [`DalError::NotFound`] for `selector` in `collection`.
    pub fn not_found(collection: &str, selector: impl fmt::Display) -> Self {
        DalError::NotFound {
            collection: collection.to_string(),
            selector: selector.to_string(),
        }
    }
}

impl From<BsonError> for DalError {
    fn from(err: BsonError) -> Self {
        DalError::Serialization(err.to_string())
    }
}

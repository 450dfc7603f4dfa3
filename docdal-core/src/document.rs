//! Document model traits and reserved field names.
//!
//! The data-access layer itself is schema-agnostic and works on raw BSON documents. The
//! [`Document`] trait is the static registration point that binds a Rust model type to the
//! collection that stores it; it is used by typed collections and by the reference
//! resolver to name the target collection of a reference.

use bson::{
    Document as BsonDocument,
    de::deserialize_from_document,
    ser::serialize_to_document,
};
use serde::{Serialize, de::DeserializeOwned};

use crate::error::DalResult;

/// Native identifier field.
pub const ID_FIELD: &str = "_id";
/// Creation timestamp. Immutable once set; the default index and sort key.
pub const CREATE_AT: &str = "create_at";
/// Last modification timestamp.
pub const MODIFY_AT: &str = "modify_at";
/// Soft-delete timestamp.
pub const DELETE_AT: &str = "delete_at";
/// Soft-delete flag.
pub const IS_DELETE: &str = "is_delete";

/// Core trait for model types stored through the data-access layer.
///
/// # Example
///
/// ```ignore
/// use docdal::document::Document;
/// use bson::oid::ObjectId;
/// use serde::{Serialize, Deserialize};
///
/// #[derive(Debug, Clone, Serialize, Deserialize)]
/// pub struct Author {
///     #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
///     pub id: Option<ObjectId>,
///     pub name: String,
/// }
///
/// impl Document for Author {
///     fn collection_name() -> &'static str {
///         "authors"
///     }
/// }
/// ```
pub trait Document: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Returns the name of the collection this document type lives in.
    fn collection_name() -> &'static str;
}

/// Conversion helpers between models and raw BSON documents.
///
/// Automatically implemented for every [`Document`].
pub trait DocumentExt: Document {
    /// Serializes this model into a BSON document.
    ///
    /// # Errors
    ///
    /// Returns [`DalError::Serialization`](crate::error::DalError::Serialization) if the
    /// model does not serialize to a document.
    fn to_document(&self) -> DalResult<BsonDocument>;

    /// Deserializes a model from a BSON document.
    ///
    /// # Errors
    ///
    /// Returns [`DalError::Serialization`](crate::error::DalError::Serialization) if the
    /// document does not match the model.
    fn from_document(document: BsonDocument) -> DalResult<Self>;
}

impl<D: Document> DocumentExt for D {
    fn to_document(&self) -> DalResult<BsonDocument> {
        Ok(serialize_to_document(self)?)
    }

    fn from_document(document: BsonDocument) -> DalResult<Self> {
        Ok(deserialize_from_document(document)?)
    }
}

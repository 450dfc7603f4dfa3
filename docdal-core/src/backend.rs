//! Storage backend abstraction for the data-access layer.
//!
//! This module defines the capability set a document database must provide. The
//! front-end types ([`DocumentStore`](crate::store::DocumentStore),
//! [`Collection`](crate::collection::Collection), [`BlobStore`](crate::blob::BlobStore))
//! resolve selectors, apply defaults and check a connection out of the backend's pool;
//! the backend then runs exactly one native operation on that connection.
//!
//! # Traits
//!
//! - [`StoreBackend`]: The core trait for storage backends
//! - [`StoreBackendBuilder`]: Factory trait for creating backend instances
//!
//! # Examples
//!
//! ```ignore
//! use docdal::backend::StoreBackend;
//! use bson::doc;
//!
//! let conn = backend.pool().acquire().await?;
//! let ids = backend
//!     .insert_documents(&conn, "users", vec![doc! { "name": "Alice" }])
//!     .await?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use async_trait::async_trait;
use bson::{Bson, Document as BsonDocument, oid::ObjectId};
use futures::stream::BoxStream;
use std::fmt::Debug;

use crate::{
    blob::Blob,
    error::DalResult,
    index::IndexSpec,
    pool::ConnectionPool,
    query::FindSpec,
    update::{Change, ChangeInfo},
};

/// Abstract interface for document database backends.
///
/// Every method receives the connection checked out by the caller and runs a single
/// round trip against it. Backends never acquire connections themselves.
///
/// # Thread Safety
///
/// All implementations must be thread-safe and support concurrent access from multiple
/// async tasks. Isolation between concurrent operations is whatever the database
/// itself provides.
///
/// # Error Handling
///
/// Driver failures are reported as
/// [`DalError::StorageOperationFailed`](crate::error::DalError::StorageOperationFailed)
/// unless a method documents a more specific variant.
#[async_trait]
pub trait StoreBackend: Send + Sync + Debug {
    /// The connection handle handed out by the pool.
    type Connection: Clone + Send + Sync + Debug + 'static;

    /// The pool that bounds concurrent use of this backend.
    fn pool(&self) -> &ConnectionPool<Self::Connection>;

    /// Ensures `index` exists on `collection`. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`DalError::IndexCreationFailed`](crate::error::DalError::IndexCreationFailed)
    /// if the index cannot be created, for example when a unique index conflicts with
    /// existing data.
    async fn ensure_index(
        &self,
        conn: &Self::Connection,
        collection: &str,
        index: &IndexSpec,
    ) -> DalResult<()>;

    /// Inserts `documents` as given and returns their identifiers, in order. Documents
    /// without an `_id` receive a generated ObjectId.
    async fn insert_documents(
        &self,
        conn: &Self::Connection,
        collection: &str,
        documents: Vec<BsonDocument>,
    ) -> DalResult<Vec<Bson>>;

    /// Counts the documents matching `filter`.
    async fn count_documents(
        &self,
        conn: &Self::Connection,
        collection: &str,
        filter: BsonDocument,
    ) -> DalResult<u64>;

    /// Streams the documents selected by `spec`: filtered, sorted, then skipped and
    /// limited when the page is valid.
    ///
    /// The returned stream owns everything it needs; the caller keeps the connection
    /// checked out until the stream is dropped.
    async fn find_documents(
        &self,
        conn: &Self::Connection,
        collection: &str,
        spec: FindSpec,
    ) -> DalResult<BoxStream<'static, DalResult<BsonDocument>>>;

    /// Applies an update (operator form) to the first document matching `filter`,
    /// inserting one when nothing matches and `upsert` is set.
    async fn update_document(
        &self,
        conn: &Self::Connection,
        collection: &str,
        filter: BsonDocument,
        update: BsonDocument,
        upsert: bool,
    ) -> DalResult<ChangeInfo>;

    /// Replaces the first document matching `filter`, inserting `replacement` when
    /// nothing matches.
    async fn replace_document(
        &self,
        conn: &Self::Connection,
        collection: &str,
        filter: BsonDocument,
        replacement: BsonDocument,
    ) -> DalResult<ChangeInfo>;

    /// Deletes the first matching document, or every matching document unless
    /// `just_one` is set.
    async fn delete_documents(
        &self,
        conn: &Self::Connection,
        collection: &str,
        filter: BsonDocument,
        just_one: bool,
    ) -> DalResult<ChangeInfo>;

    /// Atomically applies `change` to the first document matching `filter`.
    ///
    /// Returns the document before or after the change (per `return_new`) along with
    /// a change summary.
    ///
    /// # Errors
    ///
    /// Returns [`DalError::NotFound`](crate::error::DalError::NotFound) when nothing
    /// matches and `change.upsert` is not set.
    async fn find_and_modify(
        &self,
        conn: &Self::Connection,
        collection: &str,
        filter: BsonDocument,
        change: &Change,
    ) -> DalResult<(Option<BsonDocument>, ChangeInfo)>;

    /// Runs an aggregation pipeline verbatim and collects its output.
    async fn aggregate(
        &self,
        conn: &Self::Connection,
        collection: &str,
        pipeline: Vec<BsonDocument>,
    ) -> DalResult<Vec<BsonDocument>>;

    /// Stores `bytes` as a blob named `name` under the caller-generated `id`.
    ///
    /// # Errors
    ///
    /// Returns [`DalError::BlobWrite`](crate::error::DalError::BlobWrite) naming the
    /// stage (open, write, close) that failed.
    async fn write_blob(
        &self,
        conn: &Self::Connection,
        bucket: &str,
        id: ObjectId,
        name: &str,
        bytes: &[u8],
    ) -> DalResult<()>;

    /// Reads the blob `id`, its stored name and full content.
    ///
    /// # Errors
    ///
    /// Returns [`DalError::NotFound`](crate::error::DalError::NotFound) if no blob has
    /// this identifier.
    async fn read_blob(&self, conn: &Self::Connection, bucket: &str, id: ObjectId)
    -> DalResult<Blob>;

    /// Drops the whole database.
    async fn drop_database(&self, conn: &Self::Connection) -> DalResult<()>;

    /// Closes the pool and releases the client.
    async fn shutdown(self) -> DalResult<()>
    where
        Self: Sized,
    {
        self.pool().close();
        Ok(())
    }
}

/// Factory trait for constructing store backends.
#[async_trait]
pub trait StoreBackendBuilder {
    type Backend: StoreBackend;

    async fn build(self) -> DalResult<Self::Backend>;
}

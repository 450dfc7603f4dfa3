//! Main entry point for interacting with a document database.
//!
//! A [`DocumentStore`] owns a backend and the store configuration. Collections, typed
//! collections and the blob store are cheap borrowed views over it; every operation they
//! run checks a connection out of the backend's pool and gives it back before
//! returning.
//!
//! # Example
//!
//! ```ignore
//! use docdal::store::DocumentStore;
//! use docdal::memory::InMemoryStore;
//! use bson::doc;
//!
//! let store = DocumentStore::new(InMemoryStore::new());
//! let users = store.collection("users");
//! users.create(vec![doc! { "name": "Alice" }], vec![]).await?;
//! ```

use std::future::Future;
use tracing::{info, warn};

use crate::{
    backend::StoreBackend,
    blob::BlobStore,
    collection::{Collection, TypedCollection},
    config::StoreConfig,
    document::Document,
    error::{DalError, DalResult},
    pool::PooledConnection,
};

/// A document store bound to a specific backend implementation.
///
/// # Type Parameters
///
/// * `B` - The backend implementation type
#[derive(Debug)]
pub struct DocumentStore<B: StoreBackend> {
    backend: B,
    config: StoreConfig,
}

impl<B: StoreBackend> DocumentStore<B> {
    /// Creates a new document store with the given backend and default configuration.
    pub fn new(backend: B) -> Self {
        Self::with_config(backend, StoreConfig::default())
    }

    /// Creates a new document store with an explicit configuration.
    pub fn with_config(backend: B, config: StoreConfig) -> Self {
        Self { backend, config }
    }

    /// Returns the store configuration.
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Returns the underlying backend.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Gets an untyped collection with the given name.
    pub fn collection<'a>(&'a self, name: &str) -> Collection<'a, B> {
        Collection::new(name.to_string(), self)
    }

    /// Gets a typed collection for the specified document type.
    ///
    /// The collection name is determined by the document type's `collection_name()` method.
    pub fn typed_collection<'a, D: Document>(&'a self) -> TypedCollection<'a, B, D> {
        TypedCollection::new(self.collection(D::collection_name()))
    }

    /// Gets the blob store, using the configured bucket prefix.
    pub fn blobs<'a>(&'a self) -> BlobStore<'a, B> {
        BlobStore::new(self.config.blob_bucket.clone(), self)
    }

    /// Drops the whole database.
    pub async fn drop_database(&self) -> DalResult<()> {
        self.run("drop_database", async {
            let conn = self.acquire().await?;
            warn!("dropping database");
            self.backend.drop_database(&conn).await
        })
        .await
    }

    /// Closes the pool and shuts the backend down.
    pub async fn shutdown(self) -> DalResult<()> {
        info!("shutting down document store");
        self.backend.shutdown().await
    }

    /// Checks a connection out of the backend's pool.
    pub(crate) async fn acquire(&self) -> DalResult<PooledConnection<B::Connection>> {
        self.backend.pool().acquire().await
    }

    /// Runs one operation under the configured deadline.
    ///
    /// When the deadline passes the future is dropped, which releases any connection it
    /// had checked out.
    pub(crate) async fn run<T, F>(&self, operation: &'static str, op: F) -> DalResult<T>
    where
        F: Future<Output = DalResult<T>>,
    {
        match self.config.operation_timeout {
            Some(limit) => tokio::time::timeout(limit, op).await.unwrap_or_else(|_| {
                warn!(operation, ?limit, "operation timed out");
                Err(DalError::Timeout { operation, limit })
            }),
            None => op.await,
        }
    }
}
